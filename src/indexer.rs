//! Incremental indexer: walks a project tree, hash-diffs against the store,
//! and drives a bounded worker pool that chunks, embeds, and upserts changed
//! files.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use globset::{Glob, GlobSetBuilder};
use ignore::WalkBuilder;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::chunker::Chunker;
use crate::config::Config;
use crate::embedding::Provider;
use crate::model::{Chunk, Filter};
use crate::store::{Store, StoreError};

const DEFAULT_IGNORES: &[&str] = &[
    ".git/**",
    "node_modules/**",
    "vendor/**",
    "*.min.js",
    "*.lock",
    "go.sum",
];

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("operation cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Provider(#[from] crate::embedding::ProviderError),
}

/// Snapshot delivered to the progress callback at file-completion granularity.
#[derive(Debug, Clone)]
pub struct IndexProgress {
    pub total_files: u64,
    pub processed_files: u64,
    pub skipped_files: u64,
    pub total_chunks: u64,
    pub current_file: Option<PathBuf>,
    pub errors_so_far: u64,
}

/// Per-file failure recorded without halting the run.
#[derive(Debug, Clone)]
pub struct IndexFileError {
    pub path: PathBuf,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct IndexResult {
    pub files_processed: u64,
    pub files_skipped: u64,
    pub chunks_created: u64,
    pub duration: Duration,
    pub errors: Vec<IndexFileError>,
}

pub struct Indexer<P: Provider> {
    store: Store,
    provider: P,
    chunker: Chunker,
    config: Config,
    cancel: Arc<AtomicBool>,
}

impl<P: Provider> Indexer<P> {
    pub fn new(store: Store, provider: P, config: Config) -> Self {
        let chunker = Chunker::new(&config);
        Indexer { store, provider, chunker, config, cancel: Arc::new(AtomicBool::new(false)) }
    }

    /// A clonable handle a caller can use to cancel an in-flight `run`.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// The underlying store, for callers that need to query or mutate it
    /// directly between indexing runs (stats, search, explicit deletes).
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Reclaims the store, e.g. to hand it to a `SearchOrchestrator` once
    /// indexing is done.
    pub fn into_store(self) -> Store {
        self.store
    }

    pub fn run(
        &self,
        project_root: &Path,
        paths: Option<&[PathBuf]>,
        force_full: bool,
        progress: Option<&mut (dyn FnMut(IndexProgress) + Send)>,
    ) -> Result<IndexResult, IndexError> {
        let start = Instant::now();
        let project_root = dunce::canonicalize(project_root).map_err(|e| {
            IndexError::Store(StoreError::Io(e))
        })?;

        let files = self.walk(&project_root, paths);
        let total_files = files.len() as u64;

        let mut to_process = Vec::new();
        let mut skipped = 0u64;
        for path in files {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(IndexError::Cancelled);
            }
            let Ok(bytes) = std::fs::read(&path) else {
                to_process.push(path);
                continue;
            };
            let hash = hex_sha256(&bytes);
            if !force_full && self.unchanged(&project_root, &path, &hash)? {
                skipped += 1;
                continue;
            }
            to_process.push(path);
        }

        let processed_files = Arc::new(AtomicU64::new(0));
        let total_chunks = Arc::new(AtomicU64::new(0));
        let error_count = Arc::new(AtomicU64::new(0));
        let mut errors = Vec::new();

        let (tx, rx) = crossbeam_channel::bounded::<PathBuf>(to_process.len().max(1));
        for path in &to_process {
            tx.send(path.clone()).expect("channel sized to to_process.len()");
        }
        drop(tx);

        let (err_tx, err_rx) = crossbeam_channel::unbounded::<IndexFileError>();
        let workers = self.config.workers.max(1);
        let progress_mutex = std::sync::Mutex::new(progress);
        std::thread::scope(|scope| {
            for _ in 0..workers {
                let rx = rx.clone();
                let err_tx = err_tx.clone();
                let processed_files = processed_files.clone();
                let total_chunks = total_chunks.clone();
                let error_count = error_count.clone();
                let cancel = self.cancel.clone();
                let project_root = project_root.clone();
                let progress_mutex = &progress_mutex;
                scope.spawn(move || {
                    while let Ok(path) = rx.recv() {
                        if cancel.load(Ordering::Relaxed) {
                            break;
                        }
                        let mut counts_as_processed = true;
                        match self.index_one_file(&project_root, &path) {
                            Ok(0) => {
                                // No chunks produced (e.g. a binary file): nothing was
                                // indexed, so it doesn't count as processed either.
                                counts_as_processed = false;
                            }
                            Ok(n) => {
                                total_chunks.fetch_add(n, Ordering::Relaxed);
                            }
                            Err(IndexError::Cancelled) => {
                                cancel.store(true, Ordering::Relaxed);
                                break;
                            }
                            Err(e) => {
                                error_count.fetch_add(1, Ordering::Relaxed);
                                let _ = err_tx.send(IndexFileError { path: path.clone(), message: e.to_string() });
                            }
                        }
                        if counts_as_processed {
                            processed_files.fetch_add(1, Ordering::Relaxed);
                        }
                        let mut guard = progress_mutex.lock().unwrap_or_else(|p| p.into_inner());
                        if let Some(cb) = guard.as_deref_mut() {
                            cb(IndexProgress {
                                total_files,
                                processed_files: processed_files.load(Ordering::Relaxed),
                                skipped_files: skipped,
                                total_chunks: total_chunks.load(Ordering::Relaxed),
                                current_file: Some(path.clone()),
                                errors_so_far: error_count.load(Ordering::Relaxed),
                            });
                        }
                    }
                });
            }
        });
        drop(err_tx);
        errors.extend(err_rx.try_iter());

        if self.cancel.load(Ordering::Relaxed) {
            return Err(IndexError::Cancelled);
        }

        self.store.sync()?;

        Ok(IndexResult {
            files_processed: processed_files.load(Ordering::Relaxed),
            files_skipped: skipped,
            chunks_created: total_chunks.load(Ordering::Relaxed),
            duration: start.elapsed(),
            errors,
        })
    }

    fn unchanged(&self, project_root: &Path, path: &Path, new_hash: &str) -> Result<bool, IndexError> {
        let relative_path = path
            .strip_prefix(project_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let existing = self.store.find(
            Some(&Filter::Equal("relative_path".into(), relative_path.into())),
            1,
        )?;
        Ok(existing.first().is_some_and(|r| r.file_hash == new_hash))
    }

    fn index_one_file(&self, project_root: &Path, path: &Path) -> Result<u64, IndexError> {
        let relative_path = path
            .strip_prefix(project_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        self.store
            .delete_where(Some(&Filter::Equal("relative_path".into(), relative_path.clone().into())))?;

        let chunks = match self.chunker.chunk_file(path, project_root) {
            Ok(c) => c,
            Err(e) => return Err(IndexError::Store(StoreError::Io(to_io_error(e)))),
        };
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut created = 0u64;
        for batch in chunks.chunks(self.config.batch_size.max(1)) {
            if self.cancel.load(Ordering::Relaxed) {
                return Err(IndexError::Cancelled);
            }
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.provider.embed_batch(&texts)?;
            for (chunk, vector) in batch.iter().cloned().zip(vectors) {
                self.store.insert(chunk, vector)?;
                created += 1;
            }
        }
        Ok(created)
    }

    fn walk(&self, project_root: &Path, paths: Option<&[PathBuf]>) -> Vec<PathBuf> {
        let roots: Vec<PathBuf> = match paths {
            Some(p) if !p.is_empty() => p.to_vec(),
            _ => vec![project_root.to_path_buf()],
        };

        let mut extra = GlobSetBuilder::new();
        for pattern in DEFAULT_IGNORES.iter().copied().chain(self.config.ignore_patterns.iter().map(String::as_str)) {
            if let Ok(glob) = Glob::new(pattern) {
                extra.add(glob);
            }
            // Bare basename patterns (no path separator) should also match at any depth.
            if !pattern.contains('/') {
                if let Ok(glob) = Glob::new(&format!("**/{pattern}")) {
                    extra.add(glob);
                }
            }
        }
        let extra = extra.build().unwrap_or_else(|_| globset::GlobSet::empty());

        let mut files = Vec::new();
        for root in roots {
            let builder = WalkBuilder::new(&root)
                .add_custom_ignore_filename(".vecgrepignore")
                .git_ignore(true)
                .git_global(false)
                .git_exclude(false)
                .build();
            for entry in builder.flatten() {
                let path = entry.path();
                if !path.is_file() {
                    continue;
                }
                let relative = path.strip_prefix(project_root).unwrap_or(path);
                if extra.is_match(relative) {
                    continue;
                }
                let Ok(meta) = std::fs::metadata(path) else { continue };
                if meta.len() > self.config.max_file_size {
                    continue;
                }
                files.push(path.to_path_buf());
            }
        }
        files
    }
}

fn hex_sha256(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn to_io_error(e: crate::chunker::ChunkerError) -> std::io::Error {
    use crate::chunker::ChunkerError as C;
    match e {
        C::Io { source, .. } => source,
        C::NotUtf8(path) => std::io::Error::new(std::io::ErrorKind::InvalidData, path.display().to_string()),
        C::TooLarge(path) => std::io::Error::new(std::io::ErrorKind::Other, path.display().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::CollectionParams;
    use crate::config::DistanceMetric;

    struct FixedProvider;

    impl Provider for FixedProvider {
        fn embed(&self, _text: &str) -> Result<Vec<f32>, crate::embedding::ProviderError> {
            Ok(vec![0.1, 0.2, 0.3, 0.4])
        }
        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, crate::embedding::ProviderError> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2, 0.3, 0.4]).collect())
        }
        fn model(&self) -> &str {
            "fixed"
        }
        fn dimensions(&self) -> usize {
            4
        }
        fn ping(&self) -> Result<(), crate::embedding::ProviderError> {
            Ok(())
        }
    }

    fn params() -> CollectionParams {
        CollectionParams {
            dimensions: 4,
            distance_metric: DistanceMetric::Cosine,
            hnsw_m: 16,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 100,
        }
    }

    #[test]
    fn indexes_a_small_project() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("main.go"), "package main\n\nfunc Hello() string { return \"hi\" }\n")
            .unwrap();

        let data = tempfile::tempdir().unwrap();
        let store = Store::create_or_open(&data.path().join("index.db"), &data.path().join("hnsw"), params())
            .unwrap();

        let indexer = Indexer::new(store, FixedProvider, Config::default());
        let result = indexer.run(project.path(), None, false, None).unwrap();
        assert_eq!(result.files_processed, 1);
        assert!(result.chunks_created >= 1);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn unchanged_file_is_skipped_on_second_run() {
        let project = tempfile::tempdir().unwrap();
        std::fs::write(project.path().join("main.go"), "package main\n\nfunc Hello() string { return \"hi\" }\n")
            .unwrap();

        let data = tempfile::tempdir().unwrap();
        let store = Store::create_or_open(&data.path().join("index.db"), &data.path().join("hnsw"), params())
            .unwrap();
        let indexer = Indexer::new(store, FixedProvider, Config::default());
        indexer.run(project.path(), None, false, None).unwrap();
        let second = indexer.run(project.path(), None, false, None).unwrap();
        assert_eq!(second.files_skipped, 1);
        assert_eq!(second.files_processed, 0);
    }
}
