//! Search orchestrator: turns a query into semantic/keyword/hybrid retrieval
//! against the store, builds filters from user-facing options, and formats
//! results.

use serde::Serialize;
use thiserror::Error;

use crate::embedding::{Provider, ProviderError};
use crate::model::{ChunkRecord, Filter};
use crate::store::{ScoredChunk, Store, StoreError};

#[derive(Debug, Error)]
pub enum SearchError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("not found: {0}")]
    NotFound(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Semantic,
    Keyword,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Default,
    Compact,
    Json,
}

/// User-facing filter knobs; `filter_to_predicate` lowers this to `Filter`.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub mode: Option<Mode>,
    pub top_k: usize,
    pub vector_weight: f32,
    pub over_request_factor: usize,
    pub explain: bool,
    pub language: Option<String>,
    pub languages: Vec<String>,
    pub chunk_type: Option<String>,
    pub file_pattern: Option<String>,
    pub directory: Option<String>,
    pub min_line: Option<i64>,
    pub max_line: Option<i64>,
}

impl SearchOptions {
    pub fn new(top_k: usize) -> Self {
        SearchOptions {
            top_k,
            vector_weight: 0.7,
            over_request_factor: crate::config::DEFAULT_SEARCH_OVER_REQUEST_FACTOR,
            ..Default::default()
        }
    }
}

/// Lower user-facing `SearchOptions` into the store's `Filter` algebra: every
/// non-empty knob contributes one predicate, all combined with `And`.
pub fn build_filter(options: &SearchOptions) -> Option<Filter> {
    let mut preds = Vec::new();

    if let Some(lang) = &options.language {
        preds.push(Filter::Equal("language".into(), lang.as_str().into()));
    }
    if !options.languages.is_empty() {
        preds.push(Filter::Or(
            options
                .languages
                .iter()
                .map(|l| Filter::Equal("language".into(), l.as_str().into()))
                .collect(),
        ));
    }
    if let Some(ct) = &options.chunk_type {
        preds.push(Filter::Equal("chunk_type".into(), ct.as_str().into()));
    }
    if let Some(pattern) = &options.file_pattern {
        preds.push(Filter::GlobMatch("relative_path".into(), pattern.clone()));
    }
    if let Some(dir) = &options.directory {
        preds.push(Filter::Prefix("relative_path".into(), dir.clone()));
    }
    if let Some(min) = options.min_line {
        preds.push(Filter::Gte("start_line".into(), min));
    }
    if let Some(max) = options.max_line {
        preds.push(Filter::Lte("start_line".into(), max));
    }

    match preds.len() {
        0 => None,
        1 => preds.pop(),
        _ => Some(Filter::And(preds)),
    }
}

pub struct SearchOrchestrator<P: Provider> {
    store: Store,
    provider: P,
}

impl<P: Provider> SearchOrchestrator<P> {
    pub fn new(store: Store, provider: P) -> Self {
        SearchOrchestrator { store, provider }
    }

    pub fn search(&self, query: &str, options: &SearchOptions) -> Result<Vec<ScoredChunk>, SearchError> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidInput("query must not be empty".into()));
        }
        let filter = build_filter(options);
        let mode = options.mode.unwrap_or(Mode::Hybrid);
        let top_k = options.top_k.max(1);

        let results = match mode {
            Mode::Keyword => self.store.text_search(query, top_k, filter.as_ref())?,
            Mode::Semantic => {
                let q = self.provider.embed(query)?;
                self.store.search(&q, top_k, filter.as_ref(), options.explain, options.over_request_factor)?
            }
            Mode::Hybrid => {
                let q = self.provider.embed(query)?;
                self.store.hybrid_search(
                    query,
                    &q,
                    top_k,
                    options.vector_weight,
                    filter.as_ref(),
                    options.explain,
                    options.over_request_factor,
                )?
            }
        };
        Ok(results)
    }

    /// Chunks whose embedding is closest to the chunk stored at `source_id`.
    pub fn similar_by_id(
        &self,
        source_id: u64,
        limit: usize,
        exclude_same_file: bool,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let source = self
            .store
            .get(source_id)?
            .ok_or_else(|| SearchError::NotFound(format!("chunk {source_id}")))?;
        self.similar_to(&source, limit, exclude_same_file)
    }

    /// Finds the narrowest chunk covering `(path, line)` (by `relative_path` or
    /// `file_path`), tie-broken by lowest `start_line` then lowest `id`, and
    /// searches from its embedding.
    pub fn similar_by_location(
        &self,
        path: &str,
        line: u32,
        limit: usize,
        exclude_same_file: bool,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let candidates = self.store.find(None, usize::MAX)?;
        let source = candidates
            .into_iter()
            .filter(|r| (r.relative_path == path || r.file_path.to_string_lossy() == path))
            .filter(|r| r.start_line <= line && line <= r.end_line)
            .min_by_key(|r| (r.end_line - r.start_line, r.start_line, r.id))
            .ok_or_else(|| SearchError::NotFound(format!("no chunk covers {path}:{line}")))?;
        self.similar_to(&source, limit, exclude_same_file)
    }

    /// Embeds `snippet` and searches from that embedding; no source chunk to
    /// exclude since the snippet isn't stored.
    pub fn similar_by_text(&self, snippet: &str, limit: usize) -> Result<Vec<ScoredChunk>, SearchError> {
        if snippet.trim().is_empty() {
            return Err(SearchError::InvalidInput("snippet must not be empty".into()));
        }
        let vector = self.provider.embed(snippet)?;
        let factor = crate::config::DEFAULT_SEARCH_OVER_REQUEST_FACTOR;
        let over_request = (limit * factor).max(crate::config::DEFAULT_SEARCH_OVER_REQUEST_FLOOR);
        let hits = self.store.search(&vector, over_request, None, false, factor)?;
        Ok(hits.into_iter().take(limit).collect())
    }

    fn similar_to(
        &self,
        source: &ChunkRecord,
        limit: usize,
        exclude_same_file: bool,
    ) -> Result<Vec<ScoredChunk>, SearchError> {
        let factor = crate::config::DEFAULT_SEARCH_OVER_REQUEST_FACTOR;
        let over_request = (limit * factor).max(crate::config::DEFAULT_SEARCH_OVER_REQUEST_FLOOR);
        let hits = self.store.search(&source.vector, over_request, None, false, factor)?;
        let filtered = hits
            .into_iter()
            .filter(|c| c.record.id != source.id)
            .filter(|c| !exclude_same_file || c.record.relative_path != source.relative_path)
            .take(limit)
            .collect();
        Ok(filtered)
    }
}

#[derive(Debug, Serialize)]
pub struct JsonResult {
    pub chunk_id: u64,
    pub file_path: String,
    pub relative_path: String,
    pub content: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_type: String,
    pub symbol_name: Option<String>,
    pub language: String,
    pub distance: f32,
    pub score: f32,
}

impl From<&ScoredChunk> for JsonResult {
    fn from(c: &ScoredChunk) -> Self {
        JsonResult {
            chunk_id: c.record.id,
            file_path: c.record.file_path.display().to_string(),
            relative_path: c.record.relative_path.clone(),
            content: c.record.content.clone(),
            start_line: c.record.start_line,
            end_line: c.record.end_line,
            chunk_type: c.record.chunk_type.to_string(),
            symbol_name: c.record.symbol_name.clone(),
            language: c.record.language.to_string(),
            distance: 1.0 - c.score,
            score: c.score,
        }
    }
}

/// Render results in `format`. `json` is a stable array of `JsonResult`.
pub fn format_results(results: &[ScoredChunk], format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => {
            let values: Vec<JsonResult> = results.iter().map(JsonResult::from).collect();
            serde_json::to_string_pretty(&values).unwrap_or_else(|_| "[]".into())
        }
        OutputFormat::Compact => results
            .iter()
            .map(|c| {
                let mut line = format!(
                    "{}:{}-{}\t{:.4}",
                    c.record.relative_path, c.record.start_line, c.record.end_line, c.score
                );
                if let Some(symbol) = &c.record.symbol_name {
                    line.push('\t');
                    line.push_str(symbol);
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Default => results
            .iter()
            .map(|c| {
                let symbol = c.record.symbol_name.as_deref().unwrap_or("-");
                let indented: String = c.record.content.lines().map(|l| format!("    {l}")).collect::<Vec<_>>().join("\n");
                format!(
                    "{} [{}:{}-{}] {} ({}) score={:.4}\n{}",
                    c.record.relative_path,
                    c.record.relative_path,
                    c.record.start_line,
                    c.record.end_line,
                    symbol,
                    c.record.language,
                    c.score,
                    indented
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_filter_is_not_wrapped_in_and() {
        let mut opts = SearchOptions::new(5);
        opts.language = Some("go".into());
        let filter = build_filter(&opts).unwrap();
        assert!(matches!(filter, Filter::Equal(_, _)));
    }

    #[test]
    fn multiple_filters_combine_with_and() {
        let mut opts = SearchOptions::new(5);
        opts.language = Some("go".into());
        opts.directory = Some("src/".into());
        let filter = build_filter(&opts).unwrap();
        assert!(matches!(filter, Filter::And(_)));
    }

    #[test]
    fn no_filters_is_none() {
        let opts = SearchOptions::new(5);
        assert!(build_filter(&opts).is_none());
    }

    #[test]
    fn empty_query_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::Store::create_or_open(
            &dir.path().join("index.db"),
            &dir.path().join("hnsw"),
            crate::store::CollectionParams {
                dimensions: 4,
                distance_metric: crate::config::DistanceMetric::Cosine,
                hnsw_m: 16,
                hnsw_ef_construction: 200,
                hnsw_ef_search: 100,
            },
        )
        .unwrap();

        struct NoopProvider;
        impl Provider for NoopProvider {
            fn embed(&self, _: &str) -> Result<Vec<f32>, ProviderError> {
                Ok(vec![0.0; 4])
            }
            fn embed_batch(&self, t: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
                Ok(t.iter().map(|_| vec![0.0; 4]).collect())
            }
            fn model(&self) -> &str {
                "noop"
            }
            fn dimensions(&self) -> usize {
                4
            }
            fn ping(&self) -> Result<(), ProviderError> {
                Ok(())
            }
        }

        let orchestrator = SearchOrchestrator::new(store, NoopProvider);
        let err = orchestrator.search("   ", &SearchOptions::new(5)).unwrap_err();
        assert!(matches!(err, SearchError::InvalidInput(_)));
    }
}
