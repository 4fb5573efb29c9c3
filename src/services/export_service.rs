//! The export pipeline: fetch, project, assemble, write.
//!
//! ```text
//! VectorSource::fetch -> EmbeddingMatrix -> ProjectionEngine -> CorpusExport -> sink::write
//! ```
//!
//! Every failure aborts the run before anything is written.

use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use tracing::info;

use super::sink;
use crate::config::ExportSettings;
use crate::domain::{CorpusExport, EmbeddingMatrix};
use crate::error::{ExportError, Result};
use crate::projection::ProjectionEngine;
use crate::storage::VectorSource;

/// Parameters of one export run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportRequest {
    pub collection: String,
    pub limit: Option<NonZeroUsize>,
    pub output: PathBuf,
    pub skip_projections: bool,
    /// Corpus name recorded in the export header.
    pub name: String,
    /// Model recorded as the producer of the stored vectors.
    pub embedding_model: String,
}

impl From<&ExportSettings> for ExportRequest {
    fn from(settings: &ExportSettings) -> Self {
        Self {
            collection: settings.collection.clone(),
            limit: settings.limit,
            output: settings.output.clone(),
            skip_projections: settings.skip_projections,
            name: settings.name.clone(),
            embedding_model: settings.embedding_model.clone(),
        }
    }
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub documents: usize,
    pub embedding_dim: usize,
    pub projected: bool,
    pub output: PathBuf,
    pub bytes_written: u64,
    pub duration_ms: u64,
}

/// Runs exports from a vector source.
pub struct ExportService<S: VectorSource> {
    source: S,
    engine: Arc<ProjectionEngine>,
}

impl<S: VectorSource> ExportService<S> {
    pub fn new(source: S, engine: ProjectionEngine) -> Self {
        Self {
            source,
            engine: Arc::new(engine),
        }
    }

    /// Runs one export end to end.
    ///
    /// Embeddings are checked for a common dimension before projecting; a
    /// ragged batch fails with `ExportError::ShapeMismatch`. Projections are
    /// skipped for an empty corpus or when the request asks for it.
    pub async fn run(&self, request: &ExportRequest) -> Result<ExportSummary> {
        let started = Instant::now();

        let limit = request.limit.map(NonZeroUsize::get);
        let batch = self.source.fetch(&request.collection, limit).await?;
        info!(documents = batch.len(), "Exporting documents");

        let matrix = EmbeddingMatrix::from_rows(&batch.embeddings)?;

        let projections = if request.skip_projections || matrix.is_empty() {
            info!("Skipping projection computation");
            None
        } else {
            let engine = Arc::clone(&self.engine);
            tokio::task::spawn_blocking(move || engine.project(&matrix))
                .await
                .map_err(|e| ExportError::TaskFailed(e.to_string()))?
        };
        let projected = projections.is_some();

        let export = CorpusExport::assemble(
            request.name.clone(),
            request.embedding_model.clone(),
            batch,
            projections,
        );
        let documents = export.metadata.count;
        let embedding_dim = export.metadata.embedding_dim;

        let output = request.output.clone();
        let bytes_written = tokio::task::spawn_blocking(move || sink::write(&export, &output))
            .await
            .map_err(|e| ExportError::TaskFailed(e.to_string()))??;

        Ok(ExportSummary {
            documents,
            embedding_dim,
            projected,
            output: request.output.clone(),
            bytes_written,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }
}
