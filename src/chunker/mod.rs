//! Regex-and-line heuristic chunker: splits a source file into `Chunk`s without
//! parsing a grammar. Declaration lines (by a per-language prefix list) seed a
//! function/class chunk whose extent is found by brace-balance or indentation;
//! everything else falls back to fixed-size, overlapping line windows.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::Config;
use crate::model::{Chunk, ChunkType, Language};

#[derive(Debug, Error)]
pub enum ChunkerError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{0} is not valid UTF-8")]
    NotUtf8(PathBuf),
    #[error("{0} exceeds the configured file size limit")]
    TooLarge(PathBuf),
}

#[derive(Clone, Copy)]
enum Family {
    /// Extent found by brace balance from the declaration line.
    Brace,
    /// Extent found by indentation relative to the declaration line.
    Indent,
    /// No declaration detection; the whole file is windowed.
    Window,
}

struct LanguageProfile {
    family: Family,
    decl_prefixes: &'static [&'static str],
}

fn profile(language: Language) -> LanguageProfile {
    use Family::*;
    match language {
        Language::Go => LanguageProfile { family: Brace, decl_prefixes: &["func "] },
        Language::Rust => LanguageProfile {
            family: Brace,
            decl_prefixes: &["fn ", "pub fn ", "pub(crate) fn ", "struct ", "enum ", "impl ", "trait "],
        },
        Language::Java => LanguageProfile {
            family: Brace,
            decl_prefixes: &["class ", "interface ", "enum ", "public ", "private ", "protected "],
        },
        Language::C => LanguageProfile {
            family: Brace,
            decl_prefixes: &["struct ", "void ", "int ", "static ", "typedef "],
        },
        Language::Cpp => LanguageProfile {
            family: Brace,
            decl_prefixes: &["class ", "struct ", "void ", "int ", "static ", "namespace "],
        },
        Language::Javascript => LanguageProfile {
            family: Brace,
            decl_prefixes: &["function ", "class ", "const ", "export function", "export class", "async function"],
        },
        Language::Typescript => LanguageProfile {
            family: Brace,
            decl_prefixes: &[
                "function ", "class ", "interface ", "const ", "export function",
                "export class", "async function", "type ",
            ],
        },
        Language::Php => LanguageProfile {
            family: Brace,
            decl_prefixes: &["function ", "class ", "public function", "private function", "protected function"],
        },
        Language::Swift => LanguageProfile {
            family: Brace,
            decl_prefixes: &["func ", "class ", "struct ", "enum ", "extension "],
        },
        Language::Kotlin => LanguageProfile {
            family: Brace,
            decl_prefixes: &["fun ", "class ", "object ", "interface "],
        },
        Language::Css => LanguageProfile { family: Brace, decl_prefixes: &[] },
        Language::Ruby => LanguageProfile { family: Indent, decl_prefixes: &["def ", "class ", "module "] },
        Language::Python => LanguageProfile { family: Indent, decl_prefixes: &["def ", "class ", "async def "] },
        Language::Shell
        | Language::Sql
        | Language::Markdown
        | Language::Json
        | Language::Yaml
        | Language::Toml
        | Language::Html
        | Language::Unknown => LanguageProfile { family: Window, decl_prefixes: &[] },
    }
}

fn detect_language(path: &Path) -> Language {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("").to_lowercase();
    match ext.as_str() {
        "go" => Language::Go,
        "py" | "pyi" => Language::Python,
        "js" | "jsx" | "mjs" | "cjs" => Language::Javascript,
        "ts" | "tsx" => Language::Typescript,
        "rs" => Language::Rust,
        "java" => Language::Java,
        "c" | "h" => Language::C,
        "cpp" | "cc" | "cxx" | "hpp" | "hh" => Language::Cpp,
        "rb" => Language::Ruby,
        "php" => Language::Php,
        "swift" => Language::Swift,
        "kt" | "kts" => Language::Kotlin,
        "sh" | "bash" | "zsh" => Language::Shell,
        "sql" => Language::Sql,
        "md" | "markdown" => Language::Markdown,
        "json" => Language::Json,
        "yaml" | "yml" => Language::Yaml,
        "toml" => Language::Toml,
        "html" | "htm" => Language::Html,
        "css" | "scss" | "less" => Language::Css,
        _ => Language::Unknown,
    }
}

pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    max_file_size: u64,
}

impl Chunker {
    pub fn new(config: &Config) -> Self {
        Chunker {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            max_file_size: config.max_file_size,
        }
    }

    /// Chunk a single file. Returns an empty `Vec` (not an error) for files that
    /// are binary (a NUL byte in the first 8KiB) — there is nothing to index.
    pub fn chunk_file(&self, path: &Path, project_root: &Path) -> Result<Vec<Chunk>, ChunkerError> {
        let meta = std::fs::metadata(path).map_err(|source| ChunkerError::Io { path: path.to_path_buf(), source })?;
        if meta.len() > self.max_file_size {
            return Err(ChunkerError::TooLarge(path.to_path_buf()));
        }

        let bytes = std::fs::read(path).map_err(|source| ChunkerError::Io { path: path.to_path_buf(), source })?;
        if bytes.iter().take(8192).any(|&b| b == 0) {
            tracing::debug!(path = %path.display(), "skipping binary file");
            return Ok(Vec::new());
        }

        let source = String::from_utf8(bytes).map_err(|_| ChunkerError::NotUtf8(path.to_path_buf()))?;
        let source = source.replace("\r\n", "\n");

        let file_hash = {
            let mut hasher = Sha256::new();
            hasher.update(source.as_bytes());
            format!("{:x}", hasher.finalize())
        };

        let relative_path = path
            .strip_prefix(project_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        let language = detect_language(path);
        let lines = split_lines(&source);
        let ranges = match profile(language).family {
            Family::Window => Vec::new(),
            _ => decl_ranges(&lines, language, self.chunk_size),
        };

        let mut chunks = Vec::new();
        let mut cursor = 0usize;
        for (start, end, chunk_type, symbol) in &ranges {
            if *start > cursor {
                self.window_chunks(&lines, cursor, *start, &mut chunks);
            }
            push_chunk(&mut chunks, &lines, *start, *end, *chunk_type, symbol.clone());
            cursor = *end;
        }
        if cursor < lines.len() {
            self.window_chunks(&lines, cursor, lines.len(), &mut chunks);
        }

        let file_size = source.len() as u64;
        Ok(chunks
            .into_iter()
            .map(|mut c: Chunk| {
                c.file_path = path.to_path_buf();
                c.relative_path = relative_path.clone();
                c.file_hash = file_hash.clone();
                c.file_size = file_size;
                c.language = language;
                c.project_root = project_root.to_path_buf();
                c
            })
            .collect())
    }

    /// Fixed-size, overlapping line windows over `lines[from..to]`, measured in
    /// bytes (`chunk_size`/`chunk_overlap` are byte counts).
    fn window_chunks(&self, lines: &[Line<'_>], from: usize, to: usize, out: &mut Vec<Chunk>) {
        if from >= to {
            return;
        }
        let mut i = from;
        while i < to {
            let mut j = i;
            let mut size = 0usize;
            while j < to && (size == 0 || size < self.chunk_size) {
                size += lines[j].text.len() + 1;
                j += 1;
            }
            push_chunk(out, lines, i, j, ChunkType::Generic, None);
            if j >= to {
                break;
            }
            // Step back by roughly chunk_overlap bytes worth of lines for the next window.
            let mut back = 0usize;
            let mut k = j;
            while k > i && back < self.chunk_overlap {
                k -= 1;
                back += lines[k].text.len() + 1;
            }
            i = k.max(i + 1);
        }
    }
}

struct Line<'a> {
    text: &'a str,
    start_byte: usize,
}

fn split_lines(source: &str) -> Vec<Line<'_>> {
    let mut lines = Vec::new();
    let mut offset = 0usize;
    for text in source.split('\n') {
        lines.push(Line { text, start_byte: offset });
        offset += text.len() + 1;
    }
    lines
}

fn indent_of(line: &str) -> usize {
    line.chars().take_while(|c| *c == ' ' || *c == '\t').count()
}

fn decl_start(line: &str, decl_prefixes: &[&str], brace_no_prefix: bool) -> bool {
    let trimmed = line.trim_start();
    if trimmed.is_empty() {
        return false;
    }
    if decl_prefixes.iter().any(|p| trimmed.starts_with(p)) {
        return true;
    }
    brace_no_prefix && indent_of(line) == 0 && trimmed.contains('{') && !trimmed.starts_with('}')
}

fn symbol_name(line: &str) -> Option<String> {
    let trimmed = line.trim_start();
    let rest = trimmed
        .split_once(' ')
        .map(|(_, rest)| rest)
        .unwrap_or(trimmed);
    let name: String = rest
        .trim_start()
        .chars()
        .take_while(|c| c.is_alphanumeric() || *c == '_')
        .collect();
    (!name.is_empty()).then_some(name)
}

fn decl_chunk_type(trimmed: &str) -> ChunkType {
    if trimmed.contains("class ") || trimmed.contains("struct ") || trimmed.contains("interface ")
        || trimmed.contains("enum ") || trimmed.contains("trait ") || trimmed.contains("module ")
        || trimmed.contains("object ")
    {
        ChunkType::Class
    } else if trimmed.is_empty() {
        ChunkType::Generic
    } else {
        ChunkType::Function
    }
}

/// Find `(start_line, end_line_exclusive, chunk_type, symbol)` for every
/// declaration detected in `lines`, capping extent at `2 * chunk_size` bytes.
fn decl_ranges(
    lines: &[Line<'_>],
    language: Language,
    chunk_size: usize,
) -> Vec<(usize, usize, ChunkType, Option<String>)> {
    let prof = profile(language);
    let brace_no_prefix = prof.decl_prefixes.is_empty() && matches!(prof.family, Family::Brace);
    let mut ranges = Vec::new();
    let mut i = 0usize;
    while i < lines.len() {
        let line = lines[i].text;
        if !decl_start(line, prof.decl_prefixes, brace_no_prefix) {
            i += 1;
            continue;
        }
        let start = i;
        let cap_bytes = chunk_size.saturating_mul(2).max(1);
        let end = match prof.family {
            Family::Brace => brace_extent(lines, start, cap_bytes),
            Family::Indent => indent_extent(lines, start, cap_bytes),
            Family::Window => start + 1,
        };
        ranges.push((start, end, decl_chunk_type(line.trim_start()), symbol_name(line)));
        i = end.max(start + 1);
    }
    ranges
}

fn brace_extent(lines: &[Line<'_>], start: usize, cap_bytes: usize) -> usize {
    let mut depth = 0i64;
    let mut seen_open = false;
    let mut bytes = 0usize;
    for i in start..lines.len() {
        let text = lines[i].text;
        bytes += text.len() + 1;
        for c in text.chars() {
            match c {
                '{' => {
                    depth += 1;
                    seen_open = true;
                }
                '}' => depth -= 1,
                _ => {}
            }
        }
        if (seen_open && depth <= 0) || bytes >= cap_bytes {
            return i + 1;
        }
        if !seen_open && text.trim_end().ends_with(';') {
            return i + 1;
        }
    }
    lines.len()
}

fn indent_extent(lines: &[Line<'_>], start: usize, cap_bytes: usize) -> usize {
    let base_indent = indent_of(lines[start].text);
    let mut bytes = lines[start].text.len() + 1;
    for i in (start + 1)..lines.len() {
        let text = lines[i].text;
        if !text.trim().is_empty() && indent_of(text) <= base_indent {
            return i;
        }
        bytes += text.len() + 1;
        if bytes >= cap_bytes {
            return i + 1;
        }
    }
    lines.len()
}

fn push_chunk(
    out: &mut Vec<Chunk>,
    lines: &[Line<'_>],
    start: usize,
    end: usize,
    chunk_type: ChunkType,
    symbol_name: Option<String>,
) {
    if start >= end || start >= lines.len() {
        return;
    }
    let end = end.min(lines.len());
    let content = lines[start..end].iter().map(|l| l.text).collect::<Vec<_>>().join("\n");
    if content.trim().is_empty() {
        return;
    }
    let start_byte = lines[start].start_byte as u64;
    let end_byte = start_byte + content.len() as u64;
    out.push(Chunk {
        file_path: PathBuf::new(),
        relative_path: String::new(),
        file_hash: String::new(),
        file_size: 0,
        language: Language::Unknown,
        content,
        start_line: start as u32 + 1,
        end_line: end as u32,
        start_byte,
        end_byte,
        chunk_type,
        symbol_name,
        project_root: PathBuf::new(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn chunker() -> Chunker {
        Chunker::new(&Config::default())
    }

    #[test]
    fn chunks_rust_function() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.rs");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "fn add(a: i32, b: i32) -> i32 {{\n    a + b\n}}\n").unwrap();
        drop(f);

        let chunks = chunker().chunk_file(&path, dir.path()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_type, ChunkType::Function);
        assert_eq!(chunks[0].symbol_name.as_deref(), Some("add"));
        assert!(chunks[0].content.contains("a + b"));
    }

    #[test]
    fn chunks_python_class_by_indent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.py");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "class Foo:\n    def bar(self):\n        return 1\n\nx = 1\n").unwrap();
        drop(f);

        let chunks = chunker().chunk_file(&path, dir.path()).unwrap();
        assert!(chunks.iter().any(|c| c.chunk_type == ChunkType::Class && c.content.contains("def bar")));
    }

    #[test]
    fn binary_file_yields_no_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, [0u8, 1, 2, 3, 0, 5]).unwrap();
        let chunks = chunker().chunk_file(&path, dir.path()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn oversized_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "hello").unwrap();
        let mut config = Config::default();
        config.max_file_size = 2;
        let small = Chunker::new(&config);
        let err = small.chunk_file(&path, dir.path()).unwrap_err();
        assert!(matches!(err, ChunkerError::TooLarge(_)));
    }

    #[test]
    fn unknown_language_falls_back_to_windows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, "line one\nline two\nline three\n").unwrap();
        let chunks = chunker().chunk_file(&path, dir.path()).unwrap();
        assert!(!chunks.is_empty());
        assert!(chunks.iter().all(|c| c.chunk_type == ChunkType::Generic));
    }
}
