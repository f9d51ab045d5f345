//! Layered configuration: a user-level `~/.config/vecgrep/config.toml` merged with a
//! project-local `.vecgrep.toml`, later values overriding earlier ones field-by-field.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const DEFAULT_CHUNK_SIZE: usize = 2048;
pub const DEFAULT_CHUNK_OVERLAP: usize = 256;
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1024 * 1024;
pub const DEFAULT_BATCH_SIZE: usize = 32;
pub const DEFAULT_WORKERS: usize = 4;
pub const DEFAULT_DIMENSIONS: usize = 768;
pub const DEFAULT_HNSW_M: usize = 16;
pub const DEFAULT_HNSW_EF_CONSTRUCTION: usize = 200;
pub const DEFAULT_HNSW_EF_SEARCH: usize = 100;
pub const DEFAULT_PROVIDER_MAX_RETRIES: u32 = 3;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 0;
pub const DEFAULT_HYBRID_VECTOR_WEIGHT: f32 = 0.7;
pub const DEFAULT_SEARCH_OVER_REQUEST_FACTOR: usize = 3;
pub const DEFAULT_SEARCH_OVER_REQUEST_FLOOR: usize = 50;

/// Distance metric a collection is created with. Chosen once, at collection
/// creation, and fixed for the collection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    Euclidean,
}

/// The fixed `Config` value the indexer and store are constructed with, per
/// spec.md §9's "Configuration object" enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_file_size: u64,
    pub ignore_patterns: Vec<String>,
    pub batch_size: usize,
    pub workers: usize,
    pub dimensions: usize,
    pub distance_metric: DistanceMetric,
    pub hnsw_m: usize,
    pub hnsw_ef_construction: usize,
    pub hnsw_ef_search: usize,
    pub provider_max_retries: u32,
    pub cache_max_entries: usize,
    pub cache_ttl_secs: u64,
    pub hybrid_vector_weight: f32,
    pub search_over_request_factor: usize,
    pub provider_endpoint: Option<String>,
    pub provider_model: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            ignore_patterns: Vec::new(),
            batch_size: DEFAULT_BATCH_SIZE,
            workers: DEFAULT_WORKERS,
            dimensions: DEFAULT_DIMENSIONS,
            distance_metric: DistanceMetric::Cosine,
            hnsw_m: DEFAULT_HNSW_M,
            hnsw_ef_construction: DEFAULT_HNSW_EF_CONSTRUCTION,
            hnsw_ef_search: DEFAULT_HNSW_EF_SEARCH,
            provider_max_retries: DEFAULT_PROVIDER_MAX_RETRIES,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            hybrid_vector_weight: DEFAULT_HYBRID_VECTOR_WEIGHT,
            search_over_request_factor: DEFAULT_SEARCH_OVER_REQUEST_FACTOR,
            provider_endpoint: None,
            provider_model: None,
        }
    }
}

impl Config {
    /// Load the user config, then the project config, merging field-by-field with
    /// the project's values winning. Missing files are not an error.
    pub fn load(project_root: &Path) -> anyhow::Result<Config> {
        let mut partial = ConfigFile::default();

        if let Some(user_path) = user_config_path() {
            if let Some(user) = load_file(&user_path)? {
                partial = partial.override_with(user);
            }
        }

        let project_path = project_root.join(".vecgrep.toml");
        if let Some(project) = load_file(&project_path)? {
            partial = partial.override_with(project);
        }

        Ok(partial.into_config())
    }
}

/// Mirror of `Config` with every field optional, used purely as the merge
/// representation while reading layered TOML files — matches the teacher's
/// `Config::load`/`override_with` shape (later file wins, missing keys fall
/// through to the earlier layer, not to the type default).
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigFile {
    chunk_size: Option<usize>,
    chunk_overlap: Option<usize>,
    max_file_size: Option<u64>,
    ignore_patterns: Option<Vec<String>>,
    batch_size: Option<usize>,
    workers: Option<usize>,
    dimensions: Option<usize>,
    distance_metric: Option<DistanceMetric>,
    hnsw_m: Option<usize>,
    hnsw_ef_construction: Option<usize>,
    hnsw_ef_search: Option<usize>,
    provider_max_retries: Option<u32>,
    cache_max_entries: Option<usize>,
    cache_ttl_secs: Option<u64>,
    hybrid_vector_weight: Option<f32>,
    search_over_request_factor: Option<usize>,
    provider_endpoint: Option<String>,
    provider_model: Option<String>,
}

impl ConfigFile {
    fn override_with(self, other: ConfigFile) -> ConfigFile {
        ConfigFile {
            chunk_size: other.chunk_size.or(self.chunk_size),
            chunk_overlap: other.chunk_overlap.or(self.chunk_overlap),
            max_file_size: other.max_file_size.or(self.max_file_size),
            ignore_patterns: other.ignore_patterns.or(self.ignore_patterns),
            batch_size: other.batch_size.or(self.batch_size),
            workers: other.workers.or(self.workers),
            dimensions: other.dimensions.or(self.dimensions),
            distance_metric: other.distance_metric.or(self.distance_metric),
            hnsw_m: other.hnsw_m.or(self.hnsw_m),
            hnsw_ef_construction: other.hnsw_ef_construction.or(self.hnsw_ef_construction),
            hnsw_ef_search: other.hnsw_ef_search.or(self.hnsw_ef_search),
            provider_max_retries: other.provider_max_retries.or(self.provider_max_retries),
            cache_max_entries: other.cache_max_entries.or(self.cache_max_entries),
            cache_ttl_secs: other.cache_ttl_secs.or(self.cache_ttl_secs),
            hybrid_vector_weight: other.hybrid_vector_weight.or(self.hybrid_vector_weight),
            search_over_request_factor: other
                .search_over_request_factor
                .or(self.search_over_request_factor),
            provider_endpoint: other.provider_endpoint.or(self.provider_endpoint),
            provider_model: other.provider_model.or(self.provider_model),
        }
    }

    fn into_config(self) -> Config {
        let d = Config::default();
        Config {
            chunk_size: self.chunk_size.unwrap_or(d.chunk_size),
            chunk_overlap: self.chunk_overlap.unwrap_or(d.chunk_overlap),
            max_file_size: self.max_file_size.unwrap_or(d.max_file_size),
            ignore_patterns: self.ignore_patterns.unwrap_or(d.ignore_patterns),
            batch_size: self.batch_size.unwrap_or(d.batch_size),
            workers: self.workers.unwrap_or(d.workers),
            dimensions: self.dimensions.unwrap_or(d.dimensions),
            distance_metric: self.distance_metric.unwrap_or(d.distance_metric),
            hnsw_m: self.hnsw_m.unwrap_or(d.hnsw_m),
            hnsw_ef_construction: self.hnsw_ef_construction.unwrap_or(d.hnsw_ef_construction),
            hnsw_ef_search: self.hnsw_ef_search.unwrap_or(d.hnsw_ef_search),
            provider_max_retries: self.provider_max_retries.unwrap_or(d.provider_max_retries),
            cache_max_entries: self.cache_max_entries.unwrap_or(d.cache_max_entries),
            cache_ttl_secs: self.cache_ttl_secs.unwrap_or(d.cache_ttl_secs),
            hybrid_vector_weight: self.hybrid_vector_weight.unwrap_or(d.hybrid_vector_weight),
            search_over_request_factor: self
                .search_over_request_factor
                .unwrap_or(d.search_over_request_factor),
            provider_endpoint: self.provider_endpoint.or(d.provider_endpoint),
            provider_model: self.provider_model.or(d.provider_model),
        }
    }
}

fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vecgrep").join("config.toml"))
}

fn load_file(path: &Path) -> anyhow::Result<Option<ConfigFile>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => {
            let config: ConfigFile = toml::from_str(&contents)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
            Ok(Some(config))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.chunk_size, 2048);
        assert_eq!(config.chunk_overlap, 256);
        assert_eq!(config.batch_size, 32);
        assert_eq!(config.workers, 4);
        assert_eq!(config.hybrid_vector_weight, 0.7);
        assert_eq!(config.search_over_request_factor, 3);
    }

    #[test]
    fn project_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let mut f = std::fs::File::create(dir.path().join(".vecgrep.toml")).unwrap();
        writeln!(f, "chunk_size = 4096").unwrap();
        writeln!(f, "workers = 8").unwrap();
        drop(f);

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.workers, 8);
    }

    #[test]
    fn missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.chunk_size, DEFAULT_CHUNK_SIZE);
    }
}
