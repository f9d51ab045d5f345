//! Local-first semantic code search: incremental indexing, a persistent
//! vector+metadata store, and a search orchestrator over it.

pub mod chunker;
pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
mod indexer;
pub mod model;
pub mod search;
pub mod store;

pub use config::Config;
pub use error::Error;
pub use indexer::{IndexError, IndexFileError, IndexProgress, IndexResult, Indexer};
pub use model::{Chunk, ChunkRecord, ChunkType, Filter, Language};
pub use search::{Mode, OutputFormat, SearchError, SearchOptions, SearchOrchestrator};
pub use store::{CollectionParams, ScoredChunk, Store, StoreError};

pub type Result<T> = std::result::Result<T, Error>;
