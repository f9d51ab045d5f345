//! Persistent single-collection store: a SQLite table holding chunk payload and
//! embedding bytes (the source of truth), plus a derived HNSW index rebuilt from
//! that table for fast approximate nearest-neighbor search.
//!
//! Sync methods internally drive an owned tokio `Runtime` so callers never have
//! to deal with async themselves — the same bridge pattern the rest of this
//! codebase's storage layer has always used.

mod hnsw;

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use sqlx::{sqlite::SqlitePoolOptions, Row, SqlitePool};
use thiserror::Error;
use tokio::runtime::Runtime;

use crate::config::DistanceMetric;
use crate::model::{Chunk, ChunkRecord, ChunkType, Filter, Language};

use hnsw::HnswGraph;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_path TEXT NOT NULL,
    relative_path TEXT NOT NULL,
    file_hash TEXT NOT NULL,
    file_size INTEGER NOT NULL,
    language TEXT NOT NULL,
    content TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    start_byte INTEGER NOT NULL,
    end_byte INTEGER NOT NULL,
    chunk_type TEXT NOT NULL,
    symbol_name TEXT,
    project_root TEXT NOT NULL,
    indexed_at TEXT NOT NULL,
    embedding BLOB NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chunks_relative_path ON chunks(relative_path);
CREATE INDEX IF NOT EXISTS idx_chunks_file_hash ON chunks(file_hash);
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("embedding dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("chunk {0} not found")]
    NotFound(u64),
    #[error("corrupt on-disk state: {0}")]
    Corrupt(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("HNSW error: {0}")]
    Hnsw(String),
}

/// A chunk plus its semantic (and, for hybrid queries, keyword) score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub record: ChunkRecord,
    pub score: f32,
    pub explain: Option<Explain>,
}

/// Per-result diagnostics returned when a search is run with `explain: true`.
#[derive(Debug, Clone)]
pub struct Explain {
    pub index_type: &'static str,
    pub nodes_visited: usize,
    pub candidates_considered: usize,
    pub candidates_filtered: usize,
    pub duration_micros: u64,
    pub ef_used: usize,
}

/// Tunable parameters fixed at collection creation time and carried in the
/// on-disk header; re-opening with a mismatched `dimensions` fails loudly.
#[derive(Debug, Clone, Copy)]
pub struct CollectionParams {
    pub dimensions: usize,
    pub distance_metric: DistanceMetric,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
}

/// A persistent collection: SQLite record table + derived HNSW ANN index.
pub struct Store {
    pool: SqlitePool,
    rt: Runtime,
    closed: AtomicBool,
    graph: RwLock<HnswGraph>,
    params: CollectionParams,
    index_dir: PathBuf,
}

impl Store {
    /// Open the collection at `db_path`, creating it (and the header) if absent.
    /// `index_dir` is where the derived HNSW graph files live (sibling directory
    /// of the database is the conventional choice).
    pub fn create_or_open(
        db_path: &Path,
        index_dir: &Path,
        params: CollectionParams,
    ) -> Result<Self, StoreError> {
        let rt = Runtime::new().map_err(|e| StoreError::Hnsw(e.to_string()))?;

        let path_str = db_path.to_string_lossy().replace('\\', "/");
        let db_url = format!("sqlite://{path_str}?mode=rwc");

        let pool = rt.block_on(async {
            SqlitePoolOptions::new()
                .max_connections(4)
                .idle_timeout(std::time::Duration::from_secs(300))
                .after_connect(|conn, _meta| {
                    Box::pin(async move {
                        sqlx::query("PRAGMA foreign_keys = ON").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA journal_mode = WAL").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA busy_timeout = 5000").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA synchronous = NORMAL").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA cache_size = -16384").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA temp_store = MEMORY").execute(&mut *conn).await?;
                        sqlx::query("PRAGMA mmap_size = 268435456").execute(&mut *conn).await?;
                        Ok(())
                    })
                })
                .connect(&db_url)
                .await
        })?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let restrictive = std::fs::Permissions::from_mode(0o600);
            let _ = std::fs::set_permissions(db_path, restrictive.clone());
            let _ = std::fs::set_permissions(db_path.with_extension("db-wal"), restrictive.clone());
            let _ = std::fs::set_permissions(db_path.with_extension("db-shm"), restrictive);
        }

        rt.block_on(async {
            for stmt in SCHEMA.split(';') {
                let stmt = stmt.trim();
                if stmt.is_empty() {
                    continue;
                }
                sqlx::query(stmt).execute(&pool).await?;
            }
            Ok::<_, sqlx::Error>(())
        })?;

        let header = rt.block_on(read_header(&pool))?;
        let params = match header {
            Some(existing) => {
                check_header(&existing, &params)?;
                existing
            }
            None => {
                rt.block_on(write_header(&pool, &params))?;
                params
            }
        };

        std::fs::create_dir_all(index_dir)?;
        let graph = if HnswGraph::exists(index_dir, "graph") {
            HnswGraph::load(index_dir, "graph", params.distance_metric)?
        } else {
            HnswGraph::empty(params.distance_metric, params.hnsw_m, params.hnsw_ef_construction)
        };

        Ok(Store {
            pool,
            rt,
            closed: AtomicBool::new(false),
            graph: RwLock::new(graph),
            params,
            index_dir: index_dir.to_path_buf(),
        })
    }

    pub fn params(&self) -> CollectionParams {
        self.params
    }

    /// Insert a chunk with its embedding, returning the assigned id.
    pub fn insert(&self, chunk: Chunk, vector: Vec<f32>) -> Result<u64, StoreError> {
        Ok(self.insert_batch(vec![(chunk, vector)])?[0])
    }

    /// Insert many chunks in one transaction, returning their assigned ids in order.
    pub fn insert_batch(&self, items: Vec<(Chunk, Vec<f32>)>) -> Result<Vec<u64>, StoreError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }
        for (_, v) in &items {
            if v.len() != self.params.dimensions {
                return Err(StoreError::DimensionMismatch {
                    expected: self.params.dimensions,
                    actual: v.len(),
                });
            }
        }

        let now = chrono::Utc::now();
        let ids = self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;
            let mut ids = Vec::with_capacity(items.len());
            for (chunk, vector) in &items {
                let bytes = embedding_to_bytes(vector);
                let row = sqlx::query(
                    "INSERT INTO chunks (file_path, relative_path, file_hash, file_size, language,
                        content, start_line, end_line, start_byte, end_byte, chunk_type,
                        symbol_name, project_root, indexed_at, embedding)
                     VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
                )
                .bind(chunk.file_path.display().to_string())
                .bind(&chunk.relative_path)
                .bind(&chunk.file_hash)
                .bind(chunk.file_size as i64)
                .bind(chunk.language.to_string())
                .bind(&chunk.content)
                .bind(chunk.start_line as i64)
                .bind(chunk.end_line as i64)
                .bind(chunk.start_byte as i64)
                .bind(chunk.end_byte as i64)
                .bind(chunk.chunk_type.to_string())
                .bind(&chunk.symbol_name)
                .bind(chunk.project_root.display().to_string())
                .bind(now.to_rfc3339())
                .bind(bytes)
                .execute(&mut *tx)
                .await?;
                ids.push(row.last_insert_rowid() as u64);
            }
            tx.commit().await?;
            Ok::<_, sqlx::Error>(ids)
        })?;

        let vectors: Vec<(u64, Vec<f32>)> = ids
            .iter()
            .copied()
            .zip(items.into_iter().map(|(_, v)| v))
            .collect();
        let inserted = self.graph.write().expect("hnsw graph lock poisoned").insert_batch(&vectors);
        if inserted.is_err() {
            // Graph was loaded from disk (immutable); rebuild it from the table instead.
            self.rebuild_graph()?;
        }

        Ok(ids)
    }

    /// Replace the existing chunk for `(relative_path, start_byte, end_byte)`, if
    /// any, with `chunk`/`vector`. Used by the indexer when re-embedding changed
    /// files without disturbing ids of untouched chunks elsewhere in the file.
    pub fn upsert(&self, chunk: Chunk, vector: Vec<f32>) -> Result<u64, StoreError> {
        let existing = self.rt.block_on(async {
            sqlx::query(
                "SELECT id FROM chunks WHERE relative_path = ?1 AND start_byte = ?2 AND end_byte = ?3",
            )
            .bind(&chunk.relative_path)
            .bind(chunk.start_byte as i64)
            .bind(chunk.end_byte as i64)
            .fetch_optional(&self.pool)
            .await
        })?;
        if let Some(row) = existing {
            let id: i64 = row.get(0);
            self.delete(id as u64)?;
        }
        self.insert(chunk, vector)
    }

    pub fn get(&self, id: u64) -> Result<Option<ChunkRecord>, StoreError> {
        let row = self.rt.block_on(async {
            sqlx::query("SELECT * FROM chunks WHERE id = ?1")
                .bind(id as i64)
                .fetch_optional(&self.pool)
                .await
        })?;
        row.map(row_to_record).transpose()
    }

    pub fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let deleted = self.rt.block_on(async {
            let result = sqlx::query("DELETE FROM chunks WHERE id = ?1")
                .bind(id as i64)
                .execute(&self.pool)
                .await?;
            Ok::<_, sqlx::Error>(result.rows_affected() > 0)
        })?;
        if deleted {
            self.rebuild_graph()?;
        }
        Ok(deleted)
    }

    /// Delete every chunk matching `filter`. A filter matching the entire
    /// collection (`None`) drops and recreates both the record table and the
    /// derived HNSW index rather than deleting row-by-row, per the invariant
    /// that wiping a collection always leaves a schema-fresh, empty one behind.
    pub fn delete_where(&self, filter: Option<&Filter>) -> Result<u64, StoreError> {
        match filter {
            None => {
                self.rt.block_on(async {
                    sqlx::query("DELETE FROM chunks").execute(&self.pool).await?;
                    sqlx::query("VACUUM").execute(&self.pool).await?;
                    Ok::<_, sqlx::Error>(())
                })?;
                *self.graph.write().expect("hnsw graph lock poisoned") = HnswGraph::empty(
                    self.params.distance_metric,
                    self.params.hnsw_m,
                    self.params.hnsw_ef_construction,
                );
                for ext in ["hnsw.graph", "hnsw.data", "hnsw.checksum"] {
                    let _ = std::fs::remove_file(self.index_dir.join(format!("graph.{ext}")));
                }
                Ok(0)
            }
            Some(filter) => {
                let matches = self.find(Some(filter), usize::MAX)?;
                for record in &matches {
                    self.rt.block_on(async {
                        sqlx::query("DELETE FROM chunks WHERE id = ?1")
                            .bind(record.id as i64)
                            .execute(&self.pool)
                            .await
                    })?;
                }
                if !matches.is_empty() {
                    self.rebuild_graph()?;
                }
                Ok(matches.len() as u64)
            }
        }
    }

    /// Metadata-only query: every record matching `filter` (or all records, if
    /// `filter` is `None`), in insertion order, capped at `limit`.
    pub fn find(&self, filter: Option<&Filter>, limit: usize) -> Result<Vec<ChunkRecord>, StoreError> {
        let rows = self.rt.block_on(async {
            sqlx::query("SELECT * FROM chunks ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await
        })?;
        let mut out = Vec::new();
        for row in rows {
            let record = row_to_record(row)?;
            if filter.is_none_or(|f| f.matches(&record)) {
                out.push(record);
                if out.len() >= limit {
                    break;
                }
            }
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<u64, StoreError> {
        let row = self
            .rt
            .block_on(async { sqlx::query("SELECT COUNT(*) FROM chunks").fetch_one(&self.pool).await })?;
        Ok(row.get::<i64, _>(0) as u64)
    }

    pub fn all(&self) -> Result<Vec<ChunkRecord>, StoreError> {
        self.find(None, usize::MAX)
    }

    /// Semantic search: HNSW neighbors over `query`, over-requested and
    /// re-requested as needed so that `filter` can be applied without starving
    /// `top_k` results, per the over-request algorithm (`k' = max(top_k*3, 50)`,
    /// `k'' = k'*2` if still short and the index hasn't been exhausted).
    pub fn search(
        &self,
        query: &[f32],
        top_k: usize,
        filter: Option<&Filter>,
        explain: bool,
        over_request_factor: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        if query.len() != self.params.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.params.dimensions,
                actual: query.len(),
            });
        }
        let start = std::time::Instant::now();
        let graph = self.graph.read().expect("hnsw graph lock poisoned");
        let total = graph.len();
        if total == 0 {
            return Ok(Vec::new());
        }

        let floor = crate::config::DEFAULT_SEARCH_OVER_REQUEST_FLOOR;
        let factor = over_request_factor.max(1);
        let mut k = (top_k.saturating_mul(factor)).max(floor).min(total);
        let mut nodes_visited = 0usize;
        let mut ef_used = 0usize;
        let mut candidates;
        loop {
            ef_used = self.params.hnsw_ef_search.max(k);
            let neighbors = graph.search(query, k, ef_used);
            nodes_visited = neighbors.len();
            candidates = self.resolve_candidates(neighbors, filter)?;
            if candidates.len() >= top_k || k >= total {
                break;
            }
            k = (k * 2).min(total);
        }
        drop(graph);

        let candidates_filtered = nodes_visited.saturating_sub(candidates.len());
        candidates.truncate(top_k);
        if explain {
            let duration_micros = start.elapsed().as_micros() as u64;
            for c in &mut candidates {
                c.explain = Some(Explain {
                    index_type: "hnsw",
                    nodes_visited,
                    candidates_considered: k,
                    candidates_filtered,
                    duration_micros,
                    ef_used,
                });
            }
        }
        Ok(candidates)
    }

    /// Keyword search: BM25-like relevance over `content`, scored in `[0, 1]`
    /// (mean, over query tokens, of each token's frequency-saturated presence
    /// — more literal occurrences push a token's contribution closer to 1
    /// without letting any single repeated token dominate the average).
    pub fn text_search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let tokens: Vec<String> = query
            .split_whitespace()
            .map(|t| t.to_lowercase())
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let mut scored: Vec<ScoredChunk> = self
            .find(filter, usize::MAX)?
            .into_iter()
            .filter_map(|record| {
                let score = text_score(&record.content, &tokens);
                (score > 0.0).then_some(ScoredChunk { record, score, explain: None })
            })
            .collect();
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Hybrid search: `score = vector_weight * vector_score + (1 - vector_weight) * text_score`,
    /// over the union of each mode's candidates.
    pub fn hybrid_search(
        &self,
        query_text: &str,
        query_vector: &[f32],
        top_k: usize,
        vector_weight: f32,
        filter: Option<&Filter>,
        explain: bool,
        over_request_factor: usize,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let start = std::time::Instant::now();
        let factor = over_request_factor.max(1);
        let over_request = (top_k * factor).max(crate::config::DEFAULT_SEARCH_OVER_REQUEST_FLOOR);
        let vector_hits = self.search(query_vector, over_request, filter, false, factor)?;
        let text_hits = self.text_search(query_text, over_request, filter)?;
        let nodes_visited = vector_hits.len() + text_hits.len();
        let ef_used = self.params.hnsw_ef_search.max(over_request);

        let tokens: Vec<String> = query_text.split_whitespace().map(|t| t.to_lowercase()).collect();

        let mut by_id: std::collections::HashMap<u64, ScoredChunk> = std::collections::HashMap::new();
        for hit in vector_hits {
            by_id.insert(hit.record.id, ScoredChunk { score: 0.0, ..hit });
        }
        for hit in text_hits {
            by_id
                .entry(hit.record.id)
                .or_insert_with(|| ScoredChunk { record: hit.record.clone(), score: 0.0, explain: None });
        }
        let candidates_considered = by_id.len();
        let candidates_filtered = nodes_visited.saturating_sub(candidates_considered);
        let duration_micros = start.elapsed().as_micros() as u64;

        let mut out: Vec<ScoredChunk> = by_id
            .into_values()
            .map(|mut c| {
                let vector_score = {
                    let v = c.record.vector.as_slice();
                    if v.is_empty() { 0.0 } else { cosine_like_score(v, query_vector) }
                };
                let text_score = text_score(&c.record.content, &tokens);
                c.score = vector_weight * vector_score + (1.0 - vector_weight) * text_score;
                if explain {
                    c.explain = Some(Explain {
                        index_type: "hnsw+bm25",
                        nodes_visited,
                        candidates_considered,
                        candidates_filtered,
                        duration_micros,
                        ef_used,
                    });
                }
                c
            })
            .collect();
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        out.truncate(top_k);
        Ok(out)
    }

    /// Rebuild the HNSW graph from the record table and persist it to disk.
    /// Called after any structural change (delete, id reuse avoidance) that the
    /// incremental `insert_batch` path can't express against a loaded graph.
    pub fn sync(&self) -> Result<(), StoreError> {
        self.rebuild_graph()
    }

    fn rebuild_graph(&self) -> Result<(), StoreError> {
        let rows = self.rt.block_on(async {
            sqlx::query("SELECT id, embedding FROM chunks").fetch_all(&self.pool).await
        })?;
        let vectors: Result<Vec<(u64, Vec<f32>)>, StoreError> = rows
            .into_iter()
            .map(|row| {
                let id: i64 = row.get(0);
                let bytes: Vec<u8> = row.get(1);
                Ok((id as u64, bytes_to_embedding(&bytes)?))
            })
            .collect();
        let graph = HnswGraph::build(
            self.params.distance_metric,
            self.params.hnsw_m,
            self.params.hnsw_ef_construction,
            &vectors?,
        );
        graph.save(&self.index_dir, "graph")?;
        *self.graph.write().expect("hnsw graph lock poisoned") = graph;
        Ok(())
    }

    fn resolve_candidates(
        &self,
        neighbors: Vec<(usize, f32)>,
        filter: Option<&Filter>,
    ) -> Result<Vec<ScoredChunk>, StoreError> {
        let mut out = Vec::with_capacity(neighbors.len());
        for (id, score) in neighbors {
            let Some(record) = self.get(id as u64)? else {
                continue;
            };
            if filter.is_none_or(|f| f.matches(&record)) {
                out.push(ScoredChunk { record, score, explain: None });
            }
        }
        out.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        Ok(out)
    }

    pub fn close(self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::Release);
        self.rt.block_on(async {
            sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool).await?;
            self.pool.close().await;
            Ok(())
        })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _ = self
                .rt
                .block_on(async { sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)").execute(&self.pool).await });
        }));
    }
}

async fn read_header(pool: &SqlitePool) -> Result<Option<CollectionParams>, sqlx::Error> {
    let dim: Option<(String,)> = sqlx::query_as("SELECT value FROM metadata WHERE key = 'dimensions'")
        .fetch_optional(pool)
        .await?;
    let Some((dim,)) = dim else {
        return Ok(None);
    };
    let metric: Option<(String,)> = sqlx::query_as("SELECT value FROM metadata WHERE key = 'distance_metric'")
        .fetch_optional(pool)
        .await?;
    let m: Option<(String,)> = sqlx::query_as("SELECT value FROM metadata WHERE key = 'hnsw_m'")
        .fetch_optional(pool)
        .await?;
    let ef_c: Option<(String,)> = sqlx::query_as("SELECT value FROM metadata WHERE key = 'hnsw_ef_construction'")
        .fetch_optional(pool)
        .await?;
    let ef_s: Option<(String,)> = sqlx::query_as("SELECT value FROM metadata WHERE key = 'hnsw_ef_search'")
        .fetch_optional(pool)
        .await?;

    Ok(Some(CollectionParams {
        dimensions: dim.parse().unwrap_or(0),
        distance_metric: metric
            .map(|(m,)| if m == "euclidean" { DistanceMetric::Euclidean } else { DistanceMetric::Cosine })
            .unwrap_or_default(),
        hnsw_m: m.map(|(v,)| v.parse().unwrap_or(16)).unwrap_or(16),
        hnsw_ef_construction: ef_c.map(|(v,)| v.parse().unwrap_or(200)).unwrap_or(200),
        hnsw_ef_search: ef_s.map(|(v,)| v.parse().unwrap_or(100)).unwrap_or(100),
    }))
}

async fn write_header(pool: &SqlitePool, params: &CollectionParams) -> Result<(), sqlx::Error> {
    let metric = match params.distance_metric {
        DistanceMetric::Cosine => "cosine",
        DistanceMetric::Euclidean => "euclidean",
    };
    for (key, value) in [
        ("dimensions", params.dimensions.to_string()),
        ("distance_metric", metric.to_string()),
        ("hnsw_m", params.hnsw_m.to_string()),
        ("hnsw_ef_construction", params.hnsw_ef_construction.to_string()),
        ("hnsw_ef_search", params.hnsw_ef_search.to_string()),
        ("created_at", chrono::Utc::now().to_rfc3339()),
    ] {
        sqlx::query("INSERT INTO metadata (key, value) VALUES (?1, ?2)")
            .bind(key)
            .bind(value)
            .execute(pool)
            .await?;
    }
    Ok(())
}

fn check_header(existing: &CollectionParams, requested: &CollectionParams) -> Result<(), StoreError> {
    if existing.dimensions != requested.dimensions {
        return Err(StoreError::DimensionMismatch {
            expected: existing.dimensions,
            actual: requested.dimensions,
        });
    }
    if existing.distance_metric != requested.distance_metric {
        return Err(StoreError::Corrupt(format!(
            "collection was created with distance_metric={:?}, cannot reopen as {:?}",
            existing.distance_metric, requested.distance_metric
        )));
    }
    Ok(())
}

fn row_to_record(row: sqlx::sqlite::SqliteRow) -> Result<ChunkRecord, StoreError> {
    let id: i64 = row.get("id");
    let embedding: Vec<u8> = row.get("embedding");
    let indexed_at: String = row.get("indexed_at");
    Ok(ChunkRecord {
        id: id as u64,
        file_path: PathBuf::from(row.get::<String, _>("file_path")),
        relative_path: row.get("relative_path"),
        file_hash: row.get("file_hash"),
        file_size: row.get::<i64, _>("file_size") as u64,
        language: Language::from_str(&row.get::<String, _>("language")).unwrap_or(Language::Unknown),
        content: row.get("content"),
        start_line: row.get::<i64, _>("start_line") as u32,
        end_line: row.get::<i64, _>("end_line") as u32,
        start_byte: row.get::<i64, _>("start_byte") as u64,
        end_byte: row.get::<i64, _>("end_byte") as u64,
        chunk_type: ChunkType::from_str(&row.get::<String, _>("chunk_type"))
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        symbol_name: row.get("symbol_name"),
        project_root: PathBuf::from(row.get::<String, _>("project_root")),
        indexed_at: chrono::DateTime::parse_from_rfc3339(&indexed_at)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?
            .with_timezone(&chrono::Utc),
        vector: bytes_to_embedding(&embedding)?,
    })
}

fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    bytemuck::cast_slice(v).to_vec()
}

fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>, StoreError> {
    if bytes.len() % std::mem::size_of::<f32>() != 0 {
        return Err(StoreError::Corrupt("embedding blob is not f32-aligned".into()));
    }
    Ok(bytemuck::cast_slice(bytes).to_vec())
}

fn text_score(content: &str, tokens: &[String]) -> f32 {
    if tokens.is_empty() {
        return 0.0;
    }
    const K1: f32 = 1.2;
    let lower = content.to_lowercase();
    let sum: f32 = tokens
        .iter()
        .map(|t| {
            let count = lower.matches(t.as_str()).count() as f32;
            count / (count + K1)
        })
        .sum();
    sum / tokens.len() as f32
}

fn cosine_like_score(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        (dot / (na * nb)).clamp(-1.0, 1.0)
    }
}
