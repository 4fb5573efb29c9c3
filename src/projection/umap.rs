//! Uniform manifold approximation and projection.
//!
//! The layout is built in four steps:
//!
//! 1. exact cosine k-NN over the input rows
//! 2. per-point bandwidth calibration (`rho`, `sigma`) so every point sees
//!    `log2(n_neighbors)` worth of membership mass
//! 3. fuzzy-union symmetrization of the directed memberships
//! 4. epoch-sampled stochastic gradient descent with negative sampling,
//!    starting from a rescaled PCA layout
//!
//! The low-dimensional similarity curve `1 / (1 + a·d^(2b))` is fitted to
//! `min_dist` and `spread` with Levenberg-Marquardt.

use std::collections::BTreeMap;

use rand::Rng;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::neighbors::{nearest_neighbors, to_rows, Knn, Metric};
use super::pca::{self, PcaConfig};
use super::Point3;
use crate::domain::EmbeddingMatrix;

/// Default neighborhood size, counting the point itself.
pub const DEFAULT_N_NEIGHBORS: usize = 15;

/// Default minimum spacing of points in the layout.
pub const DEFAULT_MIN_DIST: f64 = 0.1;

/// Default scale of the embedded points.
pub const DEFAULT_SPREAD: f64 = 1.0;

/// Default initial SGD learning rate.
pub const DEFAULT_LEARNING_RATE: f64 = 1.0;

/// Default number of negative samples per positive sample.
pub const DEFAULT_NEGATIVE_SAMPLE_RATE: usize = 5;

/// Epochs used when `n_epochs` is unset, for small and large corpora.
const SMALL_CORPUS_EPOCHS: usize = 500;
const LARGE_CORPUS_EPOCHS: usize = 200;
const LARGE_CORPUS_THRESHOLD: usize = 10_000;

const SMOOTH_K_ITERATIONS: usize = 64;
const SMOOTH_K_TOLERANCE: f64 = 1e-5;
const MIN_SIGMA_SCALE: f64 = 1e-3;

const CURVE_POINTS: usize = 300;
const CURVE_MAX_ITER: usize = 200;

/// Half-width of the box the initial layout is scaled into.
const INIT_EXTENT: f64 = 10.0;
const INIT_NOISE: f64 = 1e-4;

const GRADIENT_CLIP: f64 = 4.0;
const REPULSION_EPSILON: f64 = 1e-3;

/// UMAP hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UmapConfig {
    /// Neighborhood size, counting the point itself.
    pub n_neighbors: usize,
    pub min_dist: f64,
    pub spread: f64,
    /// Optimization epochs. `None` picks by corpus size.
    pub n_epochs: Option<usize>,
    pub learning_rate: f64,
    pub negative_sample_rate: usize,
}

impl Default for UmapConfig {
    fn default() -> Self {
        Self {
            n_neighbors: DEFAULT_N_NEIGHBORS,
            min_dist: DEFAULT_MIN_DIST,
            spread: DEFAULT_SPREAD,
            n_epochs: None,
            learning_rate: DEFAULT_LEARNING_RATE,
            negative_sample_rate: DEFAULT_NEGATIVE_SAMPLE_RATE,
        }
    }
}

impl UmapConfig {
    /// Neighbors per point in a corpus of `n`, excluding the point itself.
    pub fn neighbor_count(&self, n: usize) -> usize {
        self.n_neighbors
            .saturating_sub(1)
            .max(1)
            .min(n.saturating_sub(1))
    }

    /// Epoch count for a corpus of `n` points.
    pub fn epochs_for(&self, n: usize) -> usize {
        self.n_epochs.unwrap_or(if n > LARGE_CORPUS_THRESHOLD {
            LARGE_CORPUS_EPOCHS
        } else {
            SMALL_CORPUS_EPOCHS
        })
    }
}

/// A weighted directed edge of the fuzzy graph.
#[derive(Debug, Clone, Copy)]
struct Edge {
    head: usize,
    tail: usize,
    weight: f64,
}

/// Computes a 3D UMAP layout of the rows of `matrix`.
pub fn fit_transform(matrix: &EmbeddingMatrix, config: &UmapConfig, seed: u64) -> Vec<Point3> {
    let k = config.neighbor_count(matrix.len());
    let knn = nearest_neighbors(&to_rows(matrix), k, Metric::Cosine);
    layout(matrix, &knn, config, seed)
}

/// Lays out `matrix` from its precomputed cosine k-NN graph.
pub(crate) fn layout(
    matrix: &EmbeddingMatrix,
    knn: &Knn,
    config: &UmapConfig,
    seed: u64,
) -> Vec<Point3> {
    let n = matrix.len();
    match n {
        0 => return Vec::new(),
        1 => return vec![[0.0; 3]],
        _ => {}
    }

    let edges = fuzzy_graph(&knn.indices, &knn.distances);
    let (a, b) = fit_curve(config.spread, config.min_dist);
    tracing::debug!(n, edges = edges.len(), a, b, "UMAP graph built");

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut embedding = initial_layout(matrix, &mut rng, seed);
    optimize(&mut embedding, &edges, a, b, config, &mut rng);
    embedding
}

/// Finds `rho` (distance to the nearest distinct neighbor) and `sigma`
/// (bandwidth) for one point.
fn smooth_knn(distances: &[f64], mean_distance: f64) -> (f64, f64) {
    let target = ((distances.len() + 1) as f64).log2();
    let rho = distances.iter().copied().find(|&d| d > 0.0).unwrap_or(0.0);

    let mass = |sigma: f64| -> f64 {
        distances
            .iter()
            .map(|&d| {
                let excess = d - rho;
                if excess > 0.0 {
                    (-excess / sigma).exp()
                } else {
                    1.0
                }
            })
            .sum()
    };

    let (mut lo, mut hi, mut sigma) = (0.0_f64, f64::INFINITY, 1.0_f64);
    for _ in 0..SMOOTH_K_ITERATIONS {
        let total = mass(sigma);
        if (total - target).abs() < SMOOTH_K_TOLERANCE {
            break;
        }
        if total > target {
            hi = sigma;
            sigma = (lo + hi) / 2.0;
        } else {
            lo = sigma;
            sigma = if hi.is_infinite() { sigma * 2.0 } else { (lo + hi) / 2.0 };
        }
    }

    let local_mean = distances.iter().sum::<f64>() / distances.len().max(1) as f64;
    let floor = if rho > 0.0 { local_mean } else { mean_distance };
    (rho, sigma.max(MIN_SIGMA_SCALE * floor))
}

/// Builds the symmetric fuzzy simplicial set as a list of directed edges,
/// one per direction, ordered by `(head, tail)`.
fn fuzzy_graph(indices: &[Vec<usize>], distances: &[Vec<f64>]) -> Vec<Edge> {
    let total: f64 = distances.iter().flatten().sum();
    let count = distances.iter().map(Vec::len).sum::<usize>().max(1);
    let mean_distance = total / count as f64;

    // (low, high) -> (weight low->high, weight high->low)
    let mut pairs: BTreeMap<(usize, usize), (f64, f64)> = BTreeMap::new();
    for (i, (neighbors, dists)) in indices.iter().zip(distances).enumerate() {
        let (rho, sigma) = smooth_knn(dists, mean_distance);
        for (&j, &d) in neighbors.iter().zip(dists) {
            let excess = d - rho;
            let w = if excess <= 0.0 || sigma == 0.0 {
                1.0
            } else {
                (-excess / sigma).exp()
            };
            let entry = pairs.entry((i.min(j), i.max(j))).or_insert((0.0, 0.0));
            if i < j {
                entry.0 = w;
            } else {
                entry.1 = w;
            }
        }
    }

    let mut edges = Vec::with_capacity(pairs.len() * 2);
    for ((i, j), (forward, backward)) in pairs {
        let weight = forward + backward - forward * backward;
        if weight > 0.0 {
            edges.push(Edge { head: i, tail: j, weight });
            edges.push(Edge { head: j, tail: i, weight });
        }
    }
    edges.sort_by(|x, y| (x.head, x.tail).cmp(&(y.head, y.tail)));
    edges
}

/// Fits `a`, `b` so that `1 / (1 + a·x^(2b))` matches the target membership
/// curve: 1 below `min_dist`, then `exp(-(x - min_dist) / spread)`.
pub fn fit_curve(spread: f64, min_dist: f64) -> (f64, f64) {
    let xs: Vec<f64> = (0..CURVE_POINTS)
        .map(|i| 3.0 * spread * i as f64 / (CURVE_POINTS - 1) as f64)
        .collect();
    let ys: Vec<f64> = xs
        .iter()
        .map(|&x| {
            if x < min_dist {
                1.0
            } else {
                (-(x - min_dist) / spread).exp()
            }
        })
        .collect();

    let sse = |a: f64, b: f64| -> f64 {
        xs.iter()
            .zip(&ys)
            .map(|(&x, &y)| (curve(x, a, b) - y).powi(2))
            .sum()
    };

    let (mut a, mut b) = (1.0_f64, 1.0_f64);
    let mut error = sse(a, b);
    let mut lambda: f64 = 1e-3;

    for _ in 0..CURVE_MAX_ITER {
        // Normal equations JᵀJ·δ = -Jᵀr for the two parameters.
        let (mut jaa, mut jab, mut jbb) = (0.0_f64, 0.0_f64, 0.0_f64);
        let (mut ga, mut gb) = (0.0_f64, 0.0_f64);
        for (&x, &y) in xs.iter().zip(&ys) {
            if x <= 0.0 {
                continue;
            }
            let p = x.powf(2.0 * b);
            let denom = (1.0 + a * p).powi(2);
            let da = -p / denom;
            let db = -2.0 * a * p * x.ln() / denom;
            let r = curve(x, a, b) - y;
            jaa += da * da;
            jab += da * db;
            jbb += db * db;
            ga += da * r;
            gb += db * r;
        }

        let mut improved = false;
        for _ in 0..16 {
            let (maa, mbb) = (jaa * (1.0 + lambda), jbb * (1.0 + lambda));
            let det = maa * mbb - jab * jab;
            if det.abs() > f64::MIN_POSITIVE {
                let step_a = -(mbb * ga - jab * gb) / det;
                let step_b = -(maa * gb - jab * ga) / det;
                let (na, nb) = (a + step_a, b + step_b);
                if na > 0.0 && nb > 0.0 {
                    let candidate = sse(na, nb);
                    if candidate < error {
                        improved = (error - candidate) > 1e-15 * error.max(1e-300);
                        a = na;
                        b = nb;
                        error = candidate;
                        lambda = (lambda / 10.0).max(1e-12);
                        break;
                    }
                }
            }
            lambda *= 10.0;
        }
        if !improved {
            break;
        }
    }

    (a, b)
}

#[inline]
fn curve(x: f64, a: f64, b: f64) -> f64 {
    1.0 / (1.0 + a * x.powf(2.0 * b))
}

/// PCA layout with a little jitter, rescaled per axis into
/// `[0, INIT_EXTENT]`. Falls back to uniform noise when PCA collapses.
fn initial_layout(matrix: &EmbeddingMatrix, rng: &mut ChaCha8Rng, seed: u64) -> Vec<Point3> {
    let mut points = pca::fit_transform(matrix, &PcaConfig::default(), seed);
    let extent = points
        .iter()
        .flatten()
        .fold(0.0_f64, |m, v| m.max(v.abs()));

    if extent > 0.0 {
        let noise = Normal::new(0.0, INIT_NOISE).ok();
        for p in points.iter_mut() {
            for v in p.iter_mut() {
                *v *= INIT_EXTENT / extent;
                if let Some(noise) = &noise {
                    *v += noise.sample(rng);
                }
            }
        }
    } else {
        tracing::debug!("PCA layout collapsed; using random initialization");
        for p in points.iter_mut() {
            for v in p.iter_mut() {
                *v = rng.gen_range(-INIT_EXTENT..INIT_EXTENT);
            }
        }
    }

    for axis in 0..3 {
        let (min, max) = points.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
            (lo.min(p[axis]), hi.max(p[axis]))
        });
        let range = max - min;
        if range > 0.0 {
            for p in points.iter_mut() {
                p[axis] = INIT_EXTENT * (p[axis] - min) / range;
            }
        }
    }
    points
}

#[inline]
fn clip(v: f64) -> f64 {
    v.clamp(-GRADIENT_CLIP, GRADIENT_CLIP)
}

#[inline]
fn distance_squared(a: &Point3, b: &Point3) -> f64 {
    (0..3).map(|d| (a[d] - b[d]).powi(2)).sum()
}

/// Epoch-sampled SGD over the graph edges.
///
/// Each edge is sampled in proportion to its weight; every positive sample
/// pulls both endpoints together and is followed by `negative_sample_rate`
/// repulsive samples against uniformly chosen points.
fn optimize(
    embedding: &mut [Point3],
    edges: &[Edge],
    a: f64,
    b: f64,
    config: &UmapConfig,
    rng: &mut ChaCha8Rng,
) {
    let n = embedding.len();
    let n_epochs = config.epochs_for(n);
    if edges.is_empty() || n_epochs == 0 {
        return;
    }

    let max_weight = edges.iter().map(|e| e.weight).fold(0.0, f64::max);
    let cutoff = max_weight / n_epochs as f64;
    let edges: Vec<Edge> = edges.iter().copied().filter(|e| e.weight >= cutoff).collect();

    let epochs_per_sample: Vec<f64> = edges.iter().map(|e| max_weight / e.weight).collect();
    let negative_rate = config.negative_sample_rate.max(1) as f64;
    let epochs_per_negative: Vec<f64> = epochs_per_sample.iter().map(|e| e / negative_rate).collect();
    let mut next_sample = epochs_per_sample.clone();
    let mut next_negative = epochs_per_negative.clone();

    let mut alpha = config.learning_rate;
    for epoch in 0..n_epochs {
        let now = epoch as f64;
        for (e, edge) in edges.iter().enumerate() {
            if next_sample[e] > now {
                continue;
            }

            let (j, k) = (edge.head, edge.tail);
            let current = embedding[j];
            let other = embedding[k];
            let dist_sq = distance_squared(&current, &other);

            let attract = if dist_sq > 0.0 {
                -2.0 * a * b * dist_sq.powf(b - 1.0) / (a * dist_sq.powf(b) + 1.0)
            } else {
                0.0
            };
            for d in 0..3 {
                let grad = clip(attract * (current[d] - other[d]));
                embedding[j][d] += grad * alpha;
                embedding[k][d] -= grad * alpha;
            }
            next_sample[e] += epochs_per_sample[e];

            let negatives = ((now - next_negative[e]) / epochs_per_negative[e]).max(0.0) as usize;
            for _ in 0..negatives {
                let k = rng.gen_range(0..n);
                if k == j {
                    continue;
                }
                let current = embedding[j];
                let other = embedding[k];
                let dist_sq = distance_squared(&current, &other);

                let repel = if dist_sq > 0.0 {
                    2.0 * b / ((REPULSION_EPSILON + dist_sq) * (a * dist_sq.powf(b) + 1.0))
                } else {
                    0.0
                };
                for d in 0..3 {
                    let grad = if repel > 0.0 {
                        clip(repel * (current[d] - other[d]))
                    } else {
                        GRADIENT_CLIP
                    };
                    embedding[j][d] += grad * alpha;
                }
            }
            next_negative[e] += negatives as f64 * epochs_per_negative[e];
        }

        alpha = config.learning_rate * (1.0 - (epoch + 1) as f64 / n_epochs as f64);
    }
}
