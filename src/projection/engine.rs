//! Runs every projection method over one matrix.

use std::time::Instant;

use tracing::info;

use super::neighbors::{self, Neighborhoods};
use super::{normalize, pca, tsne, umap, Point3, ProjectionConfig, ProjectionMethod, Projections};
use crate::domain::EmbeddingMatrix;

/// Computes and normalizes the PCA, UMAP and t-SNE layouts of a corpus.
#[derive(Debug, Clone, Default)]
pub struct ProjectionEngine {
    config: ProjectionConfig,
}

impl ProjectionEngine {
    pub fn new(config: ProjectionConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::default()
    }

    /// Projects every row of `matrix` with each method.
    ///
    /// Returns `None` for an empty matrix without running any algorithm.
    /// Otherwise every layout has exactly one point per row, in row order,
    /// with each axis inside `[-scale / 2, scale / 2]`.
    pub fn project(&self, matrix: &EmbeddingMatrix) -> Option<Projections> {
        if matrix.is_empty() {
            info!("Empty corpus, no projections computed");
            return None;
        }

        let n = matrix.len();
        info!(points = n, dim = matrix.dim(), "Computing projections");

        let started = Instant::now();
        let graphs = neighbors::neighborhoods(
            &neighbors::to_rows(matrix),
            self.config.umap.neighbor_count(n),
            self.config.tsne.neighbor_count(n),
        );
        info!(
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Neighbor graphs built"
        );

        Some(Projections {
            pca: self.run(ProjectionMethod::Pca, matrix, &graphs),
            umap: self.run(ProjectionMethod::Umap, matrix, &graphs),
            tsne: self.run(ProjectionMethod::Tsne, matrix, &graphs),
        })
    }

    fn run(
        &self,
        method: ProjectionMethod,
        matrix: &EmbeddingMatrix,
        graphs: &Neighborhoods,
    ) -> Vec<Point3> {
        let started = Instant::now();
        let seed = self.config.seed;
        info!(%method, "Computing projection");

        let raw = match method {
            ProjectionMethod::Pca => pca::fit_transform(matrix, &self.config.pca, seed),
            ProjectionMethod::Umap => {
                umap::layout(matrix, &graphs.cosine, &self.config.umap, seed)
            }
            ProjectionMethod::Tsne => {
                tsne::layout(matrix, &graphs.euclidean, &self.config.tsne, seed)
            }
        };
        let points = normalize(&raw, self.config.scale);

        info!(
            %method,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Projection done"
        );
        points
    }
}
