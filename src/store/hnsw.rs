//! HNSW (Hierarchical Navigable Small World) index for approximate nearest
//! neighbor search over chunk embeddings.
//!
//! ## Security
//!
//! hnsw_rs serializes via bincode, which is unmaintained (RUSTSEC-2025-0141).
//! We compute and verify blake3 checksums on save/load to catch corruption.
//!
//! ## Memory management
//!
//! Loading an index returns `Hnsw<'a, ..>` borrowing from `HnswIo`. `LoadedHnsw`
//! manages this self-referential relationship: `HnswIo` is heap-allocated and
//! held behind a raw pointer, the borrowed `Hnsw` is transmuted to `'static` and
//! kept in `ManuallyDrop`, and a custom `Drop` impl frees the `Hnsw` before the
//! `HnswIo` it borrows from. Sound only because `Hnsw` never mutates the data
//! `HnswIo` owns.
//!
//! ## Distance metric
//!
//! A collection picks `cosine` or `euclidean` once, at creation, and the choice
//! is fixed for its lifetime. hnsw_rs monomorphizes `Hnsw<f32, D>` over a single
//! distance type, so there is no single graph type that is generic over the
//! *choice* of metric at runtime — `HnswGraph` is an enum over the two
//! monomorphized instantiations, with the construction/search/persistence logic
//! written once as functions generic over `D: Distance<f32>` and called from
//! both arms.

use std::mem::ManuallyDrop;
use std::path::Path;

use hnsw_rs::anndists::dist::distances::{DistCosine, DistL2};
use hnsw_rs::anndists::dist::Distance;
use hnsw_rs::api::AnnT;
use hnsw_rs::hnsw::Hnsw;
use hnsw_rs::hnswio::HnswIo;

use crate::config::DistanceMetric;

use super::StoreError;

pub(crate) const MAX_LAYER: usize = 16;

const HNSW_EXTENSIONS: &[&str] = &["hnsw.graph", "hnsw.data", "hnsw.ids"];

/// Self-referential wrapper around an HNSW graph loaded from disk.
struct LoadedHnsw<D: Distance<f32> + Send + Sync + 'static> {
    io_ptr: *mut HnswIo,
    hnsw: ManuallyDrop<Hnsw<'static, f32, D>>,
}

impl<D: Distance<f32> + Send + Sync + 'static> Drop for LoadedHnsw<D> {
    fn drop(&mut self) {
        // SAFETY: drop order is hnsw then io_ptr; hnsw only reads from data
        // owned by the HnswIo behind io_ptr, which stays valid until here.
        unsafe {
            ManuallyDrop::drop(&mut self.hnsw);
            drop(Box::from_raw(self.io_ptr));
        }
    }
}

// SAFETY: io_ptr points to heap-owned file buffers with no external aliasing;
// Hnsw<f32, D> is itself Send+Sync for the distance types we instantiate.
unsafe impl<D: Distance<f32> + Send + Sync + 'static> Send for LoadedHnsw<D> {}
unsafe impl<D: Distance<f32> + Send + Sync + 'static> Sync for LoadedHnsw<D> {}

enum GraphState<D: Distance<f32> + Send + Sync + 'static> {
    Owned(Hnsw<'static, f32, D>),
    Loaded(LoadedHnsw<D>),
}

impl<D: Distance<f32> + Send + Sync + 'static> GraphState<D> {
    fn hnsw(&self) -> &Hnsw<'static, f32, D> {
        match self {
            GraphState::Owned(h) => h,
            GraphState::Loaded(l) => &l.hnsw,
        }
    }
}

/// In-memory (or mmap-loaded) HNSW graph plus the id mapping from hnsw_rs's
/// internal sequential index back to our chunk ids.
pub(crate) enum HnswGraph {
    Cosine(GraphState<DistCosine>),
    Euclidean(GraphState<DistL2>),
}

impl HnswGraph {
    pub(crate) fn empty(metric: DistanceMetric, m: usize, ef_construction: usize) -> Self {
        match metric {
            DistanceMetric::Cosine => HnswGraph::Cosine(GraphState::Owned(Hnsw::new(
                m,
                1,
                MAX_LAYER,
                ef_construction,
                DistCosine,
            ))),
            DistanceMetric::Euclidean => HnswGraph::Euclidean(GraphState::Owned(Hnsw::new(
                m,
                1,
                MAX_LAYER,
                ef_construction,
                DistL2,
            ))),
        }
    }

    /// Build a fresh graph from `(chunk_id, vector)` pairs.
    pub(crate) fn build(
        metric: DistanceMetric,
        m: usize,
        ef_construction: usize,
        vectors: &[(u64, Vec<f32>)],
    ) -> Self {
        if vectors.is_empty() {
            return Self::empty(metric, m, ef_construction);
        }
        let nb_elem = vectors.len();
        match metric {
            DistanceMetric::Cosine => {
                let mut hnsw = Hnsw::new(m, nb_elem, MAX_LAYER, ef_construction, DistCosine);
                insert_all(&mut hnsw, vectors);
                HnswGraph::Cosine(GraphState::Owned(hnsw))
            }
            DistanceMetric::Euclidean => {
                let mut hnsw = Hnsw::new(m, nb_elem, MAX_LAYER, ef_construction, DistL2);
                insert_all(&mut hnsw, vectors);
                HnswGraph::Euclidean(GraphState::Owned(hnsw))
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        match self {
            HnswGraph::Cosine(g) => g.hnsw().get_nb_point(),
            HnswGraph::Euclidean(g) => g.hnsw().get_nb_point(),
        }
    }

    /// Insert a batch into an owned (not loaded) graph. Errors if the graph
    /// was loaded from disk, since hnsw_rs's loaded form borrows immutably.
    pub(crate) fn insert_batch(&mut self, items: &[(u64, Vec<f32>)]) -> Result<(), StoreError> {
        if items.is_empty() {
            return Ok(());
        }
        match self {
            HnswGraph::Cosine(GraphState::Owned(h)) => {
                insert_all(h, items);
                Ok(())
            }
            HnswGraph::Euclidean(GraphState::Owned(h)) => {
                insert_all(h, items);
                Ok(())
            }
            _ => Err(StoreError::Hnsw(
                "cannot incrementally insert into a loaded HNSW graph; rebuild required".into(),
            )),
        }
    }

    /// Search for nearest neighbors. Returns `(internal_id, score)` pairs,
    /// where score is always "higher is better" regardless of the underlying
    /// distance metric.
    pub(crate) fn search(&self, query: &[f32], k: usize, ef_search: usize) -> Vec<(usize, f32)> {
        match self {
            HnswGraph::Cosine(g) => g
                .hnsw()
                .search_neighbours(query, k, ef_search)
                .into_iter()
                .map(|n| (n.d_id, 1.0 - n.distance))
                .collect(),
            HnswGraph::Euclidean(g) => g
                .hnsw()
                .search_neighbours(query, k, ef_search)
                .into_iter()
                .map(|n| (n.d_id, 1.0 / (1.0 + n.distance)))
                .collect(),
        }
    }

    pub(crate) fn save(&self, dir: &Path, basename: &str) -> Result<(), StoreError> {
        match self {
            HnswGraph::Cosine(g) => save_graph(g.hnsw(), dir, basename),
            HnswGraph::Euclidean(g) => save_graph(g.hnsw(), dir, basename),
        }
    }

    pub(crate) fn load(dir: &Path, basename: &str, metric: DistanceMetric) -> Result<Self, StoreError> {
        match metric {
            DistanceMetric::Cosine => {
                let loaded = load_graph::<DistCosine>(dir, basename)?;
                Ok(HnswGraph::Cosine(GraphState::Loaded(loaded)))
            }
            DistanceMetric::Euclidean => {
                let loaded = load_graph::<DistL2>(dir, basename)?;
                Ok(HnswGraph::Euclidean(GraphState::Loaded(loaded)))
            }
        }
    }

    pub(crate) fn exists(dir: &Path, basename: &str) -> bool {
        HNSW_EXTENSIONS
            .iter()
            .all(|ext| dir.join(format!("{basename}.{ext}")).exists())
    }
}

fn insert_all<D: Distance<f32> + Send + Sync + 'static>(
    hnsw: &mut Hnsw<'static, f32, D>,
    vectors: &[(u64, Vec<f32>)],
) {
    let data_for_insert: Vec<(&Vec<f32>, usize)> = vectors
        .iter()
        .map(|(id, v)| (v, *id as usize))
        .collect();
    hnsw.parallel_insert_data(&data_for_insert);
}

fn save_graph<D: Distance<f32> + Send + Sync + 'static>(
    hnsw: &Hnsw<'static, f32, D>,
    dir: &Path,
    basename: &str,
) -> Result<(), StoreError> {
    std::fs::create_dir_all(dir).map_err(StoreError::Io)?;

    let temp_dir = dir.join(format!(".{basename}.tmp"));
    if temp_dir.exists() {
        std::fs::remove_dir_all(&temp_dir).map_err(StoreError::Io)?;
    }
    std::fs::create_dir_all(&temp_dir).map_err(StoreError::Io)?;

    hnsw.file_dump(&temp_dir, basename)
        .map_err(|e| StoreError::Hnsw(format!("failed to dump HNSW graph: {e}")))?;

    let mut checksums = Vec::new();
    for ext in &["hnsw.graph", "hnsw.data"] {
        let path = temp_dir.join(format!("{basename}.{ext}"));
        if path.exists() {
            let file = std::fs::File::open(&path).map_err(StoreError::Io)?;
            let mut hasher = blake3::Hasher::new();
            hasher
                .update_reader(file)
                .map_err(StoreError::Io)?;
            checksums.push(format!("{ext}:{}", hasher.finalize().to_hex()));
        }
    }
    let checksum_path = temp_dir.join(format!("{basename}.hnsw.checksum"));
    std::fs::write(&checksum_path, checksums.join("\n")).map_err(StoreError::Io)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let restrictive = std::fs::Permissions::from_mode(0o600);
        for ext in &["hnsw.graph", "hnsw.data", "hnsw.checksum"] {
            let path = temp_dir.join(format!("{basename}.{ext}"));
            if path.exists() {
                let _ = std::fs::set_permissions(&path, restrictive.clone());
            }
        }
    }

    for ext in &["hnsw.graph", "hnsw.data", "hnsw.checksum"] {
        let from = temp_dir.join(format!("{basename}.{ext}"));
        let to = dir.join(format!("{basename}.{ext}"));
        if from.exists() {
            std::fs::rename(&from, &to).map_err(StoreError::Io)?;
        }
    }
    let _ = std::fs::remove_dir(&temp_dir);
    Ok(())
}

fn verify_checksums(dir: &Path, basename: &str) -> Result<(), StoreError> {
    let checksum_path = dir.join(format!("{basename}.hnsw.checksum"));
    let Ok(content) = std::fs::read_to_string(&checksum_path) else {
        tracing::warn!("no checksum file for HNSW graph at {}", dir.display());
        return Ok(());
    };
    for line in content.lines() {
        let Some((ext, expected)) = line.split_once(':') else {
            continue;
        };
        if !["hnsw.graph", "hnsw.data"].contains(&ext) {
            continue;
        }
        let path = dir.join(format!("{basename}.{ext}"));
        if !path.exists() {
            continue;
        }
        let file = std::fs::File::open(&path).map_err(StoreError::Io)?;
        let mut hasher = blake3::Hasher::new();
        hasher
            .update_reader(file)
            .map_err(StoreError::Io)?;
        let actual = hasher.finalize().to_hex().to_string();
        if actual != expected {
            return Err(StoreError::Corrupt(format!(
                "checksum mismatch for {}: expected {expected}, got {actual}",
                path.display()
            )));
        }
    }
    Ok(())
}

fn load_graph<D: Distance<f32> + Send + Sync + Default + 'static>(
    dir: &Path,
    basename: &str,
) -> Result<LoadedHnsw<D>, StoreError> {
    let graph_path = dir.join(format!("{basename}.hnsw.graph"));
    let data_path = dir.join(format!("{basename}.hnsw.data"));
    if !graph_path.exists() || !data_path.exists() {
        return Err(StoreError::Hnsw(format!(
            "no HNSW graph at {}/{basename}",
            dir.display()
        )));
    }
    verify_checksums(dir, basename)?;

    let io = Box::new(HnswIo::new(dir, basename));
    let io_ptr = Box::into_raw(io);

    // SAFETY: io_ptr was just created from Box::into_raw above.
    let hnsw: Hnsw<'_, f32, D> = match unsafe { &mut *io_ptr }.load_hnsw() {
        Ok(h) => h,
        Err(e) => {
            // SAFETY: reclaiming the box we just leaked, on the error path.
            unsafe {
                drop(Box::from_raw(io_ptr));
            }
            return Err(StoreError::Hnsw(format!("failed to load HNSW graph: {e}")));
        }
    };

    // SAFETY: io_ptr outlives hnsw; LoadedHnsw's Drop frees hnsw before io_ptr,
    // and hnsw never mutates the buffers io_ptr owns.
    let hnsw: Hnsw<'static, f32, D> = unsafe { std::mem::transmute(hnsw) };

    Ok(LoadedHnsw {
        io_ptr,
        hnsw: ManuallyDrop::new(hnsw),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture(seed: u64, dim: usize) -> Vec<f32> {
        (0..dim)
            .map(|i| ((seed as f32 * 0.1) + (i as f32 * 0.01)).sin())
            .collect()
    }

    #[test]
    fn build_and_search_cosine() {
        let vectors: Vec<(u64, Vec<f32>)> = (0..5).map(|i| (i, fixture(i, 16))).collect();
        let graph = HnswGraph::build(DistanceMetric::Cosine, 16, 200, &vectors);
        assert_eq!(graph.len(), 5);
        let results = graph.search(&fixture(2, 16), 3, 100);
        assert!(!results.is_empty());
        assert_eq!(results[0].0, 2);
    }

    #[test]
    fn build_and_search_euclidean() {
        let vectors: Vec<(u64, Vec<f32>)> = (0..5).map(|i| (i, fixture(i, 16))).collect();
        let graph = HnswGraph::build(DistanceMetric::Euclidean, 16, 200, &vectors);
        assert_eq!(graph.len(), 5);
        let results = graph.search(&fixture(2, 16), 3, 100);
        assert_eq!(results[0].0, 2);
        for (_, score) in &results {
            assert!(*score > 0.0 && *score <= 1.0);
        }
    }

    #[test]
    fn empty_graph_search_is_empty() {
        let graph = HnswGraph::build(DistanceMetric::Cosine, 16, 200, &[]);
        assert_eq!(graph.len(), 0);
        assert!(graph.search(&fixture(1, 16), 5, 100).is_empty());
    }

    #[test]
    fn save_and_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let vectors: Vec<(u64, Vec<f32>)> = (0..8).map(|i| (i, fixture(i, 16))).collect();
        let graph = HnswGraph::build(DistanceMetric::Cosine, 16, 200, &vectors);
        graph.save(dir.path(), "graph").unwrap();
        assert!(HnswGraph::exists(dir.path(), "graph"));

        let loaded = HnswGraph::load(dir.path(), "graph", DistanceMetric::Cosine).unwrap();
        assert_eq!(loaded.len(), 8);
        let results = loaded.search(&fixture(3, 16), 3, 100);
        assert_eq!(results[0].0, 3);
    }

    #[test]
    fn insert_batch_rejects_loaded_graph() {
        let dir = tempfile::tempdir().unwrap();
        let vectors: Vec<(u64, Vec<f32>)> = (0..3).map(|i| (i, fixture(i, 16))).collect();
        let graph = HnswGraph::build(DistanceMetric::Cosine, 16, 200, &vectors);
        graph.save(dir.path(), "graph").unwrap();
        let mut loaded = HnswGraph::load(dir.path(), "graph", DistanceMetric::Cosine).unwrap();
        let err = loaded.insert_batch(&[(9, fixture(9, 16))]).unwrap_err();
        assert!(matches!(err, StoreError::Hnsw(_)));
    }
}
