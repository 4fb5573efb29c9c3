//! Low-dimensional projections of embedding matrices.
//!
//! Three independent layouts are computed from the same N×D matrix and each
//! is rescaled into a shared bounding box:
//!
//! - [`pca`] - variance-preserving linear projection
//! - [`umap`] - neighborhood-preserving layout over a cosine k-NN graph
//! - [`tsne`] - Barnes-Hut t-SNE, emphasizing clusters
//!
//! Row `i` of every layout corresponds to row `i` of the input. All random
//! choices are driven by a fixed seed, so identical input produces identical
//! output.
//!
//! # Example
//!
//! ```ignore
//! use vecscope::projection::ProjectionEngine;
//!
//! let engine = ProjectionEngine::with_defaults();
//! let projections = engine.project(&matrix).expect("non-empty corpus");
//! assert_eq!(projections.pca.len(), matrix.len());
//! ```

mod engine;
mod neighbors;
mod normalize;
pub mod pca;
pub mod tsne;
pub mod umap;

pub use engine::ProjectionEngine;
pub use normalize::{normalize, DEFAULT_SCALE};
pub use pca::PcaConfig;
pub use tsne::TsneConfig;
pub use umap::UmapConfig;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Seed shared by every projection method.
pub const DEFAULT_SEED: u64 = 42;

/// A point in the projected space.
pub type Point3 = [f64; 3];

/// Projection algorithm identifiers, in the order they are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionMethod {
    /// Principal component analysis.
    Pca,
    /// Uniform manifold approximation and projection.
    Umap,
    /// t-distributed stochastic neighbor embedding.
    Tsne,
}

impl ProjectionMethod {
    /// All methods in computation order.
    pub const ALL: [ProjectionMethod; 3] = [
        ProjectionMethod::Pca,
        ProjectionMethod::Umap,
        ProjectionMethod::Tsne,
    ];

    /// Key used for this method in the export document.
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectionMethod::Pca => "pca",
            ProjectionMethod::Umap => "umap",
            ProjectionMethod::Tsne => "tsne",
        }
    }
}

impl fmt::Display for ProjectionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized layouts for every method, index-aligned with the documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projections {
    pub pca: Vec<Point3>,
    pub umap: Vec<Point3>,
    pub tsne: Vec<Point3>,
}

impl Projections {
    /// Returns the layout computed by `method`.
    pub fn get(&self, method: ProjectionMethod) -> &[Point3] {
        match method {
            ProjectionMethod::Pca => &self.pca,
            ProjectionMethod::Umap => &self.umap,
            ProjectionMethod::Tsne => &self.tsne,
        }
    }

    /// Iterates `(method, layout)` pairs in computation order.
    pub fn iter(&self) -> impl Iterator<Item = (ProjectionMethod, &[Point3])> {
        ProjectionMethod::ALL
            .into_iter()
            .map(move |method| (method, self.get(method)))
    }
}

/// Hyperparameters for every projection method.
///
/// The defaults are part of the reproducibility contract: changing any of
/// them changes the exported coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Edge length of the bounding box every layout is rescaled into.
    pub scale: f64,
    /// Seed for all random number generators.
    pub seed: u64,
    pub pca: PcaConfig,
    pub umap: UmapConfig,
    pub tsne: TsneConfig,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            scale: DEFAULT_SCALE,
            seed: DEFAULT_SEED,
            pca: PcaConfig::default(),
            umap: UmapConfig::default(),
            tsne: TsneConfig::default(),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::domain::EmbeddingMatrix;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use rand_distr::{Distribution, StandardNormal};

    /// Three well-separated Gaussian blobs in `dim` dimensions.
    pub fn blobs(per_cluster: usize, dim: usize) -> (EmbeddingMatrix, Vec<usize>) {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut rows = Vec::new();
        let mut labels = Vec::new();

        for cluster in 0..3 {
            for _ in 0..per_cluster {
                let row: Vec<f32> = (0..dim)
                    .map(|d| {
                        let center = if d % 3 == cluster { 10.0 } else { 0.0 };
                        let noise: f64 = StandardNormal.sample(&mut rng);
                        (center + noise * 0.3) as f32
                    })
                    .collect();
                rows.push(row);
                labels.push(cluster);
            }
        }

        (EmbeddingMatrix::from_rows(&rows).unwrap(), labels)
    }

    /// Mean distance between points sharing a label divided by the mean
    /// distance between points with different labels.
    pub fn separation_ratio(points: &[[f64; 3]], labels: &[usize]) -> f64 {
        let (mut within, mut within_n, mut between, mut between_n) = (0.0, 0usize, 0.0, 0usize);
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                let d: f64 = (0..3)
                    .map(|a| (points[i][a] - points[j][a]).powi(2))
                    .sum::<f64>()
                    .sqrt();
                if labels[i] == labels[j] {
                    within += d;
                    within_n += 1;
                } else {
                    between += d;
                    between_n += 1;
                }
            }
        }
        (within / within_n as f64) / (between / between_n as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_keys() {
        let keys: Vec<&str> = ProjectionMethod::ALL.iter().map(|m| m.as_str()).collect();
        assert_eq!(keys, vec!["pca", "umap", "tsne"]);
        assert_eq!(
            serde_json::to_string(&ProjectionMethod::Tsne).unwrap(),
            "\"tsne\""
        );
    }

    #[test]
    fn default_config_matches_named_constants() {
        let config = ProjectionConfig::default();
        assert_eq!(config.seed, 42);
        assert_eq!(config.scale, 40.0);
        assert_eq!(config.umap.n_neighbors, 15);
        assert_eq!(config.umap.min_dist, 0.1);
        assert_eq!(config.tsne.max_iter, 1000);
    }

    #[test]
    fn projections_iter_in_order() {
        let projections = Projections {
            pca: vec![[1.0, 0.0, 0.0]],
            umap: vec![[2.0, 0.0, 0.0]],
            tsne: vec![[3.0, 0.0, 0.0]],
        };
        let firsts: Vec<(ProjectionMethod, f64)> =
            projections.iter().map(|(m, p)| (m, p[0][0])).collect();
        assert_eq!(
            firsts,
            vec![
                (ProjectionMethod::Pca, 1.0),
                (ProjectionMethod::Umap, 2.0),
                (ProjectionMethod::Tsne, 3.0),
            ]
        );
    }
}
