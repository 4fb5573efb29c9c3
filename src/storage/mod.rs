//! Vector store access.
//!
//! This module provides the read side of the export pipeline:
//!
//! - [`VectorSource`] - the interface the pipeline fetches from
//! - [`ChromaStore`] - a Chroma persist directory (`chroma.sqlite3`)
//! - [`Database`] - async-safe rusqlite wrapper via `spawn_blocking`

mod chroma;
mod database;
mod schema;
mod source;

pub use chroma::{
    ChromaStore, Collection, CollectionInfo, GetResult, Include, Record, SQLITE_FILENAME,
};
pub use database::{Database, DatabaseError, Result};
pub use source::VectorSource;

#[cfg(test)]
pub use source::MockVectorSource;
