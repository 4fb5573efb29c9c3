//! Vector source abstraction.
//!
//! The export pipeline only needs to fetch index-aligned arrays for one
//! collection; this trait keeps it independent of the store behind them.

use async_trait::async_trait;

use crate::domain::SourceBatch;
use crate::error::ExportError;

/// A read-only provider of stored embeddings.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VectorSource: Send + Sync {
    /// Returns the names of all collections in the source.
    async fn collection_names(&self) -> Result<Vec<String>, ExportError>;

    /// Fetches up to `limit` records of `collection` (all when `None`).
    ///
    /// Fails with `ExportError::SourceUnavailable`, listing the existing
    /// collections, when `collection` does not exist.
    async fn fetch(&self, collection: &str, limit: Option<usize>)
        -> Result<SourceBatch, ExportError>;
}
