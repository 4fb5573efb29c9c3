//! Text embedding inference.
//!
//! The export pipeline never embeds text itself; it consumes vectors that
//! are already stored. This module provides the model that produces them,
//! so queries against an exported corpus can be embedded the same way.
//!
//! - [`EmbeddingEngine`] - a BERT sentence-transformer run with Candle
//! - [`TextEmbedder`] - the seam request handlers depend on
//! - [`server`] - the HTTP service wrapping a shared engine
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use vecscope::embedding::{server, EmbeddingConfig, EmbeddingEngine};
//!
//! let engine = EmbeddingEngine::load(EmbeddingConfig::default())?;
//! server::serve("127.0.0.1:5001".parse()?, Arc::new(engine)).await?;
//! ```

mod engine;
pub mod server;

pub use engine::{EmbeddingConfig, EmbeddingEngine, EmbeddingError, TextEmbedder, DEFAULT_MODEL_ID};
