//! Shared data model: chunk records, the pre-insert chunk builder, and the filter
//! predicate algebra used by `search`/`find`/`delete_where`.

use std::path::PathBuf;

use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};

/// Closed set of language tags a chunk can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Go,
    Python,
    Javascript,
    Typescript,
    Rust,
    Java,
    C,
    Cpp,
    Ruby,
    Php,
    Swift,
    Kotlin,
    Shell,
    Sql,
    Markdown,
    Json,
    Yaml,
    Toml,
    Html,
    Css,
    Unknown,
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Language::Go => "go",
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Typescript => "typescript",
            Language::Rust => "rust",
            Language::Java => "java",
            Language::C => "c",
            Language::Cpp => "cpp",
            Language::Ruby => "ruby",
            Language::Php => "php",
            Language::Swift => "swift",
            Language::Kotlin => "kotlin",
            Language::Shell => "shell",
            Language::Sql => "sql",
            Language::Markdown => "markdown",
            Language::Json => "json",
            Language::Yaml => "yaml",
            Language::Toml => "toml",
            Language::Html => "html",
            Language::Css => "css",
            Language::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for Language {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "go" => Language::Go,
            "python" => Language::Python,
            "javascript" => Language::Javascript,
            "typescript" => Language::Typescript,
            "rust" => Language::Rust,
            "java" => Language::Java,
            "c" => Language::C,
            "cpp" => Language::Cpp,
            "ruby" => Language::Ruby,
            "php" => Language::Php,
            "swift" => Language::Swift,
            "kotlin" => Language::Kotlin,
            "shell" => Language::Shell,
            "sql" => Language::Sql,
            "markdown" => Language::Markdown,
            "json" => Language::Json,
            "yaml" => Language::Yaml,
            "toml" => Language::Toml,
            "html" => Language::Html,
            "css" => Language::Css,
            _ => Language::Unknown,
        })
    }
}

/// Kind of code element a chunk represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkType {
    Function,
    Class,
    Block,
    Comment,
    Generic,
}

impl std::fmt::Display for ChunkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChunkType::Function => "function",
            ChunkType::Class => "class",
            ChunkType::Block => "block",
            ChunkType::Comment => "comment",
            ChunkType::Generic => "generic",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for ChunkType {
    type Err = ParseChunkTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "function" => Ok(ChunkType::Function),
            "class" => Ok(ChunkType::Class),
            "block" => Ok(ChunkType::Block),
            "comment" => Ok(ChunkType::Comment),
            "generic" => Ok(ChunkType::Generic),
            other => Err(ParseChunkTypeError(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseChunkTypeError(String);

impl std::fmt::Display for ParseChunkTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown chunk type: '{}'", self.0)
    }
}

impl std::error::Error for ParseChunkTypeError {}

/// The pre-insert form of a `ChunkRecord` — everything the chunker can produce
/// before the store assigns an `id` and the provider fills in `vector`.
#[derive(Debug, Clone)]
pub struct Chunk {
    pub file_path: PathBuf,
    pub relative_path: String,
    pub file_hash: String,
    pub file_size: u64,
    pub language: Language,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: u64,
    pub end_byte: u64,
    pub chunk_type: ChunkType,
    pub symbol_name: Option<String>,
    pub project_root: PathBuf,
}

/// The atomic unit of retrieval: a `Chunk` plus the store-assigned `id` and the
/// provider-produced `vector`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: u64,
    pub file_path: PathBuf,
    pub relative_path: String,
    pub file_hash: String,
    pub file_size: u64,
    pub language: Language,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    pub start_byte: u64,
    pub end_byte: u64,
    pub chunk_type: ChunkType,
    pub symbol_name: Option<String>,
    pub project_root: PathBuf,
    pub indexed_at: chrono::DateTime<chrono::Utc>,
    #[serde(skip)]
    pub vector: Vec<f32>,
}

impl ChunkRecord {
    pub fn from_chunk(id: u64, chunk: Chunk, vector: Vec<f32>, indexed_at: chrono::DateTime<chrono::Utc>) -> Self {
        ChunkRecord {
            id,
            file_path: chunk.file_path,
            relative_path: chunk.relative_path,
            file_hash: chunk.file_hash,
            file_size: chunk.file_size,
            language: chunk.language,
            content: chunk.content,
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            start_byte: chunk.start_byte,
            end_byte: chunk.end_byte,
            chunk_type: chunk.chunk_type,
            symbol_name: chunk.symbol_name,
            project_root: chunk.project_root,
            indexed_at,
            vector,
        }
    }
}

/// A scalar payload field a `Filter` predicate can compare against.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Text(String),
    Int(i64),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

/// Predicate algebra evaluated over a `ChunkRecord`'s payload. Used by
/// `search`/`find`/`delete_where`.
#[derive(Debug, Clone)]
pub enum Filter {
    Equal(String, FieldValue),
    NotEqual(String, FieldValue),
    Gte(String, i64),
    Lte(String, i64),
    Contains(String, String),
    Prefix(String, String),
    GlobMatch(String, String),
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Evaluate this predicate against a record. Field names mirror `ChunkRecord`'s
    /// own field names.
    pub fn matches(&self, record: &ChunkRecord) -> bool {
        match self {
            Filter::Equal(field, value) => field_eq(record, field, value),
            Filter::NotEqual(field, value) => !field_eq(record, field, value),
            Filter::Gte(field, value) => field_numeric(record, field).is_some_and(|v| v >= *value),
            Filter::Lte(field, value) => field_numeric(record, field).is_some_and(|v| v <= *value),
            Filter::Contains(field, substr) => field_text(record, field)
                .is_some_and(|s| s.contains(substr.as_str())),
            Filter::Prefix(field, prefix) => field_text(record, field)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
            Filter::GlobMatch(field, pattern) => match compile_glob(pattern) {
                Some(m) => field_text(record, field).is_some_and(|s| m.is_match(s.as_ref())),
                None => false,
            },
            Filter::And(preds) => preds.iter().all(|p| p.matches(record)),
            Filter::Or(preds) => preds.iter().any(|p| p.matches(record)),
            Filter::Not(pred) => !pred.matches(record),
        }
    }
}

fn compile_glob(pattern: &str) -> Option<GlobMatcher> {
    Glob::new(pattern).ok().map(|g| g.compile_matcher())
}

fn field_text(record: &ChunkRecord, field: &str) -> Option<std::borrow::Cow<'_, str>> {
    use std::borrow::Cow;
    Some(match field {
        "file_path" => Cow::Owned(record.file_path.display().to_string()),
        "relative_path" => Cow::Borrowed(record.relative_path.as_str()),
        "file_hash" => Cow::Borrowed(record.file_hash.as_str()),
        "language" => Cow::Owned(record.language.to_string()),
        "content" => Cow::Borrowed(record.content.as_str()),
        "chunk_type" => Cow::Owned(record.chunk_type.to_string()),
        "symbol_name" => Cow::Borrowed(record.symbol_name.as_deref().unwrap_or("")),
        "project_root" => Cow::Owned(record.project_root.display().to_string()),
        _ => return None,
    })
}

fn field_numeric(record: &ChunkRecord, field: &str) -> Option<i64> {
    match field {
        "start_line" => Some(record.start_line as i64),
        "end_line" => Some(record.end_line as i64),
        "start_byte" => Some(record.start_byte as i64),
        "end_byte" => Some(record.end_byte as i64),
        "file_size" => Some(record.file_size as i64),
        "id" => Some(record.id as i64),
        _ => None,
    }
}

fn field_eq(record: &ChunkRecord, field: &str, value: &FieldValue) -> bool {
    match value {
        FieldValue::Text(s) => field_text(record, field).is_some_and(|f| f.as_ref() == s.as_str()),
        FieldValue::Int(i) => field_numeric(record, field).is_some_and(|f| f == *i),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ChunkRecord {
        ChunkRecord {
            id: 1,
            file_path: PathBuf::from("/proj/a.go"),
            relative_path: "a.go".into(),
            file_hash: "deadbeef".into(),
            file_size: 100,
            language: Language::Go,
            content: "func Hello() {}".into(),
            start_line: 3,
            end_line: 5,
            start_byte: 20,
            end_byte: 40,
            chunk_type: ChunkType::Function,
            symbol_name: Some("Hello".into()),
            project_root: PathBuf::from("/proj"),
            indexed_at: chrono::Utc::now(),
            vector: vec![0.1, 0.2],
        }
    }

    #[test]
    fn equal_matches_language() {
        let f = Filter::Equal("language".into(), "go".into());
        assert!(f.matches(&sample()));
        let f = Filter::Equal("language".into(), "python".into());
        assert!(!f.matches(&sample()));
    }

    #[test]
    fn and_or_not_compose() {
        let rec = sample();
        let f = Filter::And(vec![
            Filter::Equal("language".into(), "go".into()),
            Filter::Gte("start_line".into(), 1),
        ]);
        assert!(f.matches(&rec));

        let f = Filter::Not(Box::new(Filter::Equal("language".into(), "go".into())));
        assert!(!f.matches(&rec));

        let f = Filter::Or(vec![
            Filter::Equal("language".into(), "python".into()),
            Filter::Equal("language".into(), "go".into()),
        ]);
        assert!(f.matches(&rec));
    }

    #[test]
    fn glob_match_on_relative_path() {
        let f = Filter::GlobMatch("relative_path".into(), "*.go".into());
        assert!(f.matches(&sample()));
        let f = Filter::GlobMatch("relative_path".into(), "*.py".into());
        assert!(!f.matches(&sample()));
    }

    #[test]
    fn chunk_type_round_trips() {
        for ct in [
            ChunkType::Function,
            ChunkType::Class,
            ChunkType::Block,
            ChunkType::Comment,
            ChunkType::Generic,
        ] {
            let s = ct.to_string();
            let parsed: ChunkType = s.parse().unwrap();
            assert_eq!(ct, parsed);
        }
    }
}
