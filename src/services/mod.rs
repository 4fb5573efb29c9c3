//! Pipeline services.
//!
//! [`ExportService`] drives one export run over any [`VectorSource`](crate::storage::VectorSource);
//! [`sink`] owns the on-disk artifact.

mod export_service;
pub mod sink;

pub use export_service::{ExportRequest, ExportService, ExportSummary};
