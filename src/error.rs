//! Error taxonomy of the indexing and query pipeline.
use crate::db::StoreError;
use crate::embedder::EmbedderError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("directory not found: {0}")]
    DirectoryNotFound(String),

    #[error("cannot read {path}: {source}")]
    FileUnreadable {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to delete stale chunks for {path}: {source}")]
    StoreDelete {
        path: String,
        #[source]
        source: StoreError,
    },

    #[error("vector store rejected the batch: {0}")]
    StoreWrite(#[source] StoreError),

    #[error("no index found (collection {0:?} does not exist); run index_documents first")]
    CollectionMissing(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("embedding failed: {0}")]
    Embedding(#[from] EmbedderError),

    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("ledger I/O error on {path}: {source}")]
    LedgerIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger {path} is not valid JSON: {source}")]
    LedgerFormat {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl IndexError {
    /// Errors that describe the caller's request rather than a fault in the
    /// server; they are reported back as tool results.
    #[must_use]
    pub fn is_reportable(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotFound(_) | Self::CollectionMissing(_) | Self::InvalidArgument(_)
        )
    }
}
