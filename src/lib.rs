//! vecscope - export vector store embeddings with precomputed 3D projections
//!
//! This crate reads a collection of embeddings from a Chroma persist
//! directory, computes PCA, UMAP and t-SNE layouts of the vectors, and
//! writes documents plus layouts into one JSON document for visualizers.
//! It also ships the sentence-embedding service that produces such vectors.

pub mod config;
pub mod domain;
pub mod embedding;
pub mod error;
pub mod projection;
pub mod services;
pub mod storage;

pub use error::{ExportError, Result};
