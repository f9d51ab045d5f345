//! Crate-wide error taxonomy.
//!
//! Every subsystem returns its own `thiserror` enum; this module unifies them at the
//! library boundary into one `Error` that callers match on.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type returned by public library entry points.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("embedding dimension mismatch: store expects {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("embedding provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("embedding provider rejected credentials: {0}")]
    ProviderAuth(String),

    #[error("embedding provider rate limited the request")]
    ProviderRateLimited,

    #[error("operation cancelled")]
    Cancelled,

    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("corrupt on-disk state: {0}")]
    Corrupt(String),
}

impl From<crate::store::StoreError> for Error {
    fn from(e: crate::store::StoreError) -> Self {
        use crate::store::StoreError as S;
        match e {
            S::DimensionMismatch { expected, actual } => {
                Error::DimensionMismatch { expected, actual }
            }
            S::NotFound(id) => Error::NotFound(format!("chunk {id}")),
            S::Corrupt(msg) => Error::Corrupt(msg),
            S::InvalidFilter(msg) => Error::InvalidInput(msg),
            S::Io(source) => Error::Io {
                path: PathBuf::new(),
                source,
            },
            S::Sqlx(e) => Error::Corrupt(e.to_string()),
            S::Hnsw(msg) => Error::Corrupt(msg),
        }
    }
}

impl From<crate::embedding::ProviderError> for Error {
    fn from(e: crate::embedding::ProviderError) -> Self {
        use crate::embedding::ProviderError as P;
        match e {
            P::EmptyInput => Error::InvalidInput("empty input passed to embedding provider".into()),
            P::Unavailable(msg) => Error::ProviderUnavailable(msg),
            P::Auth(msg) => Error::ProviderAuth(msg),
            P::RateLimited => Error::ProviderRateLimited,
            P::Cancelled => Error::Cancelled,
            P::DimensionMismatch { expected, actual } => {
                Error::DimensionMismatch { expected, actual }
            }
        }
    }
}

impl From<crate::chunker::ChunkerError> for Error {
    fn from(e: crate::chunker::ChunkerError) -> Self {
        use crate::chunker::ChunkerError as C;
        match e {
            C::Io { path, source } => Error::Io { path, source },
            C::NotUtf8(path) => Error::InvalidInput(format!("{} is not valid UTF-8", path.display())),
            C::TooLarge(path) => Error::InvalidInput(format!("{} exceeds the file size limit", path.display())),
        }
    }
}

impl From<crate::IndexError> for Error {
    fn from(e: crate::IndexError) -> Self {
        match e {
            crate::IndexError::Cancelled => Error::Cancelled,
            crate::IndexError::Store(s) => s.into(),
            crate::IndexError::Provider(p) => p.into(),
        }
    }
}

impl From<crate::search::SearchError> for Error {
    fn from(e: crate::search::SearchError) -> Self {
        match e {
            crate::search::SearchError::Store(s) => s.into(),
            crate::search::SearchError::Provider(p) => p.into(),
            crate::search::SearchError::InvalidInput(msg) => Error::InvalidInput(msg),
            crate::search::SearchError::NotFound(msg) => Error::NotFound(msg),
        }
    }
}
