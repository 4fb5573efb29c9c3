//! Domain types for exported corpora.
//!
//! A corpus is a set of documents (id, text, embedding, metadata) joined
//! positionally with the projections computed from their embeddings.

mod corpus;
mod document;
mod matrix;
mod types;

pub use corpus::{CorpusExport, CorpusMetadata};
pub use document::{Document, SourceBatch};
pub use matrix::EmbeddingMatrix;
pub use types::{DocumentId, Metadata, MetadataValue};
