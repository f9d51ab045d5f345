//! End-to-end scenarios over the indexer, store, and search orchestrator
//! working together, using a deterministic mock provider in place of a real
//! embedding backend.

use std::path::Path;

use vecgrep::embedding::ProviderError;
use vecgrep::{
    ChunkType, CollectionParams, Config, Filter, Indexer, Language, Mode, SearchOptions,
    SearchOrchestrator, Store,
};

const DIMS: usize = 5;

/// Deterministic embedding provider over a tiny fixed vocabulary (`func`,
/// `bye`, `hello`, `postgres`, `connection`); every other word contributes to
/// no dimension at all, so only vocabulary overlap between query and content
/// drives similarity. Comment lines (`//`, `#`) are skipped entirely, the way
/// a real code embedding model weighs identifiers and bodies over prose —
/// this is what lets a function named `connectPostgres` outrank a comment
/// that merely repeats the word "postgres".
struct KeywordProvider;

impl KeywordProvider {
    fn bucket(token: &str) -> Option<usize> {
        let t = token.to_lowercase();
        match t.as_str() {
            "func" | "function" => Some(0),
            "bye" | "farewell" => Some(1),
            "hello" | "greeting" => Some(2),
            "connection" => Some(4),
            _ if t.contains("postgres") => Some(3),
            _ => None,
        }
    }
}

impl vecgrep::embedding::Provider for KeywordProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, ProviderError> {
        if text.trim().is_empty() {
            return Err(ProviderError::EmptyInput);
        }
        let mut v = vec![0f32; DIMS];
        for line in text.lines() {
            let trimmed = line.trim_start();
            if trimmed.starts_with("//") || trimmed.starts_with('#') {
                continue;
            }
            for raw in line.split(|c: char| !c.is_alphanumeric() && c != '_') {
                if raw.is_empty() {
                    continue;
                }
                if let Some(idx) = Self::bucket(raw) {
                    v[idx] += 1.0;
                }
            }
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in v.iter_mut() {
                *x /= norm;
            }
        }
        Ok(v)
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn model(&self) -> &str {
        "keyword-mock"
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn ping(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

fn new_store(data: &tempfile::TempDir) -> Store {
    Store::create_or_open(
        &data.path().join("index.db"),
        &data.path().join("hnsw"),
        CollectionParams {
            dimensions: DIMS,
            distance_metric: vecgrep::config::DistanceMetric::Cosine,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 100,
        },
    )
    .unwrap()
}

fn new_config() -> Config {
    Config { dimensions: DIMS, workers: 1, ..Config::default() }
}

fn index_fresh(project_root: &Path) -> (tempfile::TempDir, vecgrep::IndexResult, Store) {
    let data = tempfile::tempdir().unwrap();
    let store = new_store(&data);
    let indexer = Indexer::new(store, KeywordProvider, new_config());
    let result = indexer.run(project_root, None, false, None).unwrap();
    (data, result, indexer.into_store())
}

#[test]
fn scenario_a_fresh_index_single_file() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(
        project.path().join("main.go"),
        "package main\n\nfunc Hello() string { return \"hi\" }\n",
    )
    .unwrap();

    let (_data, result, store) = index_fresh(project.path());

    assert_eq!(result.files_processed, 1);
    assert!(result.chunks_created >= 1);

    let chunks = store.all().unwrap();
    let hello = chunks
        .iter()
        .find(|c| c.symbol_name.as_deref() == Some("Hello"))
        .expect("Hello chunk present");
    assert_eq!(hello.chunk_type, ChunkType::Function);
    assert_eq!(hello.language, Language::Go);
    assert!(hello.start_line <= 3);
    assert!(hello.content.contains("func Hello()"));
}

#[test]
fn scenario_b_incremental_rerun_skips_unchanged() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(
        project.path().join("main.go"),
        "package main\n\nfunc Hello() string { return \"hi\" }\n",
    )
    .unwrap();

    let data = tempfile::tempdir().unwrap();
    let store = new_store(&data);
    let indexer = Indexer::new(store, KeywordProvider, new_config());
    indexer.run(project.path(), None, false, None).unwrap();

    let second = indexer.run(project.path(), None, false, None).unwrap();
    assert_eq!(second.files_processed, 0);
    assert_eq!(second.files_skipped, 1);
    assert_eq!(second.chunks_created, 0);
}

#[test]
fn scenario_c_file_modification_reindexes_and_reranks() {
    let project = tempfile::tempdir().unwrap();
    let main_go = project.path().join("main.go");
    std::fs::write(&main_go, "package main\n\nfunc Hello() string { return \"hi\" }\n").unwrap();

    let data = tempfile::tempdir().unwrap();
    let store = new_store(&data);
    let indexer = Indexer::new(store, KeywordProvider, new_config());
    indexer.run(project.path(), None, false, None).unwrap();

    let mut contents = std::fs::read_to_string(&main_go).unwrap();
    contents.push_str("func Bye() string { return \"bye\" }\n");
    std::fs::write(&main_go, &contents).unwrap();

    let result = indexer.run(project.path(), None, false, None).unwrap();
    assert_eq!(result.files_processed, 1);
    assert!(result.chunks_created >= 2);

    let store = indexer.into_store();
    let orchestrator = SearchOrchestrator::new(store, KeywordProvider);
    let mut options = SearchOptions::new(5);
    options.mode = Some(Mode::Semantic);
    let results = orchestrator.search("farewell function", &options).unwrap();

    assert!(!results.is_empty());
    assert_eq!(results[0].record.symbol_name.as_deref(), Some("Bye"));
}

#[test]
fn scenario_d_delete_by_path_clears_the_collection() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(
        project.path().join("main.go"),
        "package main\n\nfunc Hello() string { return \"hi\" }\n",
    )
    .unwrap();

    let (_data, _result, store) = index_fresh(project.path());
    assert!(store.count().unwrap() > 0);

    let removed = store
        .delete_where(Some(&Filter::Equal("relative_path".into(), "main.go".into())))
        .unwrap();
    assert!(removed > 0);
    assert_eq!(store.count().unwrap(), 0);
    assert!(store.find(None, usize::MAX).unwrap().is_empty());
}

#[test]
fn scenario_e_hybrid_vs_semantic_vs_keyword_ranking() {
    let project = tempfile::tempdir().unwrap();
    std::fs::write(
        project.path().join("a.go"),
        "package main\n\nfunc connectPostgres() error {\n\treturn nil\n}\n",
    )
    .unwrap();
    std::fs::write(
        project.path().join("b.go"),
        "package main\n\n// a long unrelated comment that happens to mention postgres\n// postgres postgres postgres postgres postgres\nfunc unrelated() {}\n",
    )
    .unwrap();

    let (_data, _result, store) = index_fresh(project.path());
    let orchestrator = SearchOrchestrator::new(store, KeywordProvider);

    let mut semantic = SearchOptions::new(5);
    semantic.mode = Some(Mode::Semantic);
    let semantic_results = orchestrator.search("postgres connection", &semantic).unwrap();
    assert!(!semantic_results.is_empty());
    assert_eq!(semantic_results[0].record.relative_path, "a.go");

    let mut keyword = SearchOptions::new(5);
    keyword.mode = Some(Mode::Keyword);
    let keyword_results = orchestrator.search("postgres connection", &keyword).unwrap();
    assert!(!keyword_results.is_empty());
    assert_eq!(keyword_results[0].record.relative_path, "b.go");

    let mut hybrid_vec = SearchOptions::new(5);
    hybrid_vec.mode = Some(Mode::Hybrid);
    hybrid_vec.vector_weight = 0.7;
    let hybrid_vec_results = orchestrator.search("postgres connection", &hybrid_vec).unwrap();
    assert_eq!(hybrid_vec_results[0].record.relative_path, "a.go");

    let mut hybrid_text = SearchOptions::new(5);
    hybrid_text.mode = Some(Mode::Hybrid);
    hybrid_text.vector_weight = 0.0;
    let hybrid_text_results = orchestrator.search("postgres connection", &hybrid_text).unwrap();
    assert_eq!(hybrid_text_results[0].record.relative_path, keyword_results[0].record.relative_path);
}

#[test]
fn scenario_f_filter_isolation_preserves_relative_ordering() {
    let project = tempfile::tempdir().unwrap();
    // Each Go file adds one more "connection" mention than the last, pulling
    // its embedding progressively further from the pure "func" direction of
    // the query — giving a strict, deterministic similarity ordering instead
    // of a tie among otherwise-identical functions.
    for i in 0..6 {
        let mut content = format!("package main\n\nfunc GoFunc{i}() int {{ return {i} }}\n");
        if i > 0 {
            let mentions: Vec<&str> = std::iter::repeat("connection").take(i).collect();
            content.push_str(&format!("var extra{i} = \"{}\"\n", mentions.join(" ")));
        }
        std::fs::write(project.path().join(format!("go_{i}.go")), content).unwrap();
    }
    std::fs::write(project.path().join("script.py"), "def py_func():\n    return 1\n").unwrap();
    std::fs::write(project.path().join("app.rb"), "def rb_func\n  1\nend\n").unwrap();
    std::fs::write(project.path().join("main.rs"), "fn rs_func() -> i32 { 1 }\n").unwrap();

    let (_data, result, store) = index_fresh(project.path());
    assert_eq!(result.files_processed, 9);

    let go_count = store
        .find(Some(&Filter::Equal("language".into(), "go".into())), usize::MAX)
        .unwrap()
        .len();
    assert_eq!(go_count, 6);

    let orchestrator = SearchOrchestrator::new(store, KeywordProvider);

    let mut filtered_opts = SearchOptions::new(10);
    filtered_opts.mode = Some(Mode::Semantic);
    filtered_opts.language = Some("go".into());
    let filtered = orchestrator.search("go function", &filtered_opts).unwrap();
    assert_eq!(filtered.len(), 6);
    assert!(filtered.iter().all(|c| c.record.language == Language::Go));

    let mut unfiltered_opts = SearchOptions::new(50);
    unfiltered_opts.mode = Some(Mode::Semantic);
    let unfiltered = orchestrator.search("go function", &unfiltered_opts).unwrap();
    let unfiltered_go_order: Vec<u64> = unfiltered
        .iter()
        .filter(|c| c.record.language == Language::Go)
        .map(|c| c.record.id)
        .collect();
    let filtered_order: Vec<u64> = filtered.iter().map(|c| c.record.id).collect();
    assert_eq!(filtered_order, unfiltered_go_order);
}
