//! Barnes-Hut t-SNE in three dimensions.
//!
//! Input affinities are sparse: each point only considers its
//! `3·perplexity` nearest neighbors under squared Euclidean distance. The
//! repulsive forces are approximated with an octree, treating any cell
//! whose width is small relative to its distance (`width / dist < angle`)
//! as a single mass at its center.

use std::collections::BTreeMap;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use super::neighbors::{nearest_neighbors, to_rows, Knn, Metric};
use super::pca::{self, PcaConfig};
use super::Point3;
use crate::domain::EmbeddingMatrix;

/// Default total number of gradient steps.
pub const DEFAULT_MAX_ITER: usize = 1000;

/// Perplexity bounds and the corpus-size divisor used to pick it.
pub const DEFAULT_MIN_PERPLEXITY: f64 = 5.0;
pub const DEFAULT_MAX_PERPLEXITY: f64 = 30.0;
pub const DEFAULT_PERPLEXITY_DIVISOR: usize = 5;

pub const DEFAULT_EARLY_EXAGGERATION: f64 = 12.0;
pub const DEFAULT_EXPLORATION_ITER: usize = 250;
pub const DEFAULT_ANGLE: f64 = 0.5;
pub const DEFAULT_MIN_GRAD_NORM: f64 = 1e-7;

const EXPLORATION_MOMENTUM: f64 = 0.5;
const FINAL_MOMENTUM: f64 = 0.8;
const MIN_LEARNING_RATE: f64 = 50.0;
const MIN_GAIN: f64 = 0.01;

const PERPLEXITY_STEPS: usize = 100;
const PERPLEXITY_TOLERANCE: f64 = 1e-5;
const MIN_PROBABILITY_MASS: f64 = 1e-8;

const INIT_STD: f64 = 1e-4;
const MAX_TREE_DEPTH: usize = 32;

/// t-SNE hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TsneConfig {
    pub max_iter: usize,
    pub min_perplexity: f64,
    pub max_perplexity: f64,
    /// Perplexity is `N / perplexity_divisor` before clamping.
    pub perplexity_divisor: usize,
    pub early_exaggeration: f64,
    /// Iterations run with early exaggeration.
    pub exploration_iter: usize,
    /// Barnes-Hut opening angle.
    pub angle: f64,
    pub min_grad_norm: f64,
    /// Fixed learning rate. `None` uses `max(N / early_exaggeration / 4, 50)`.
    pub learning_rate: Option<f64>,
}

impl Default for TsneConfig {
    fn default() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            min_perplexity: DEFAULT_MIN_PERPLEXITY,
            max_perplexity: DEFAULT_MAX_PERPLEXITY,
            perplexity_divisor: DEFAULT_PERPLEXITY_DIVISOR,
            early_exaggeration: DEFAULT_EARLY_EXAGGERATION,
            exploration_iter: DEFAULT_EXPLORATION_ITER,
            angle: DEFAULT_ANGLE,
            min_grad_norm: DEFAULT_MIN_GRAD_NORM,
            learning_rate: None,
        }
    }
}

impl TsneConfig {
    /// Perplexity used for a corpus of `n` points:
    /// `clamp(n / divisor, min, max)`, never more than `n - 1`.
    pub fn perplexity_for(&self, n: usize) -> f64 {
        let raw = (n / self.perplexity_divisor.max(1)) as f64;
        let clamped = raw.max(self.min_perplexity).min(self.max_perplexity);
        clamped.min(n.saturating_sub(1) as f64)
    }

    /// Neighbors considered per point: `3·perplexity + 1`, at most `n - 1`.
    pub fn neighbor_count(&self, n: usize) -> usize {
        n.saturating_sub(1)
            .min((3.0 * self.perplexity_for(n)) as usize + 1)
    }

    fn learning_rate_for(&self, n: usize) -> f64 {
        self.learning_rate
            .unwrap_or_else(|| (n as f64 / self.early_exaggeration / 4.0).max(MIN_LEARNING_RATE))
    }
}

/// Symmetric joint probabilities, one sorted row per point.
type Affinities = Vec<Vec<(usize, f64)>>;

/// Computes a 3D t-SNE layout of the rows of `matrix`.
pub fn fit_transform(matrix: &EmbeddingMatrix, config: &TsneConfig, seed: u64) -> Vec<Point3> {
    let k = config.neighbor_count(matrix.len());
    let knn = nearest_neighbors(&to_rows(matrix), k, Metric::SquaredEuclidean);
    layout(matrix, &knn, config, seed)
}

/// Lays out `matrix` from its precomputed squared Euclidean k-NN graph.
pub(crate) fn layout(
    matrix: &EmbeddingMatrix,
    knn: &Knn,
    config: &TsneConfig,
    seed: u64,
) -> Vec<Point3> {
    let n = matrix.len();
    match n {
        0 => return Vec::new(),
        1 => return vec![[0.0; 3]],
        _ => {}
    }

    let perplexity = config.perplexity_for(n);
    let affinities = joint_probabilities(&knn.indices, &knn.distances, perplexity);
    tracing::debug!(n, perplexity, "t-SNE affinities computed");

    let mut embedding = initial_layout(matrix, seed);
    let learning_rate = config.learning_rate_for(n);
    let exploration = config.exploration_iter.min(config.max_iter);

    let descent = Descent {
        affinities: &affinities,
        angle: config.angle,
        learning_rate,
        min_grad_norm: config.min_grad_norm,
    };
    descent.run(
        &mut embedding,
        exploration,
        config.early_exaggeration,
        EXPLORATION_MOMENTUM,
    );
    descent.run(
        &mut embedding,
        config.max_iter - exploration,
        1.0,
        FINAL_MOMENTUM,
    );
    embedding
}

/// Binary-searches the Gaussian precision for each point so the entropy of
/// its conditional distribution equals `ln(perplexity)`, then symmetrizes
/// as `(P + Pᵀ) / sum`.
fn joint_probabilities(indices: &[Vec<usize>], distances: &[Vec<f64>], perplexity: f64) -> Affinities {
    let n = indices.len();
    let desired_entropy = perplexity.max(1.0).ln();

    let mut joint: Vec<BTreeMap<usize, f64>> = vec![BTreeMap::new(); n];
    for (i, (neighbors, dists)) in indices.iter().zip(distances).enumerate() {
        let conditional = conditional_row(dists, desired_entropy);
        for (&j, p) in neighbors.iter().zip(conditional) {
            *joint[i].entry(j).or_insert(0.0) += p;
            *joint[j].entry(i).or_insert(0.0) += p;
        }
    }

    let total: f64 = joint.iter().flat_map(|row| row.values()).sum();
    let total = total.max(f64::MIN_POSITIVE);
    joint
        .into_iter()
        .map(|row| row.into_iter().map(|(j, p)| (j, p / total)).collect())
        .collect()
}

fn conditional_row(distances: &[f64], desired_entropy: f64) -> Vec<f64> {
    let mut beta: f64 = 1.0;
    let (mut beta_min, mut beta_max) = (f64::NEG_INFINITY, f64::INFINITY);
    let mut probabilities = vec![0.0; distances.len()];

    for _ in 0..PERPLEXITY_STEPS {
        for (p, &d) in probabilities.iter_mut().zip(distances) {
            *p = (-d * beta).exp();
        }
        let mut sum: f64 = probabilities.iter().sum();
        if sum == 0.0 {
            sum = MIN_PROBABILITY_MASS;
        }
        let mut weighted = 0.0_f64;
        for (p, &d) in probabilities.iter_mut().zip(distances) {
            *p /= sum;
            weighted += d * *p;
        }

        let entropy = sum.ln() + beta * weighted;
        let diff = entropy - desired_entropy;
        if diff.abs() <= PERPLEXITY_TOLERANCE {
            break;
        }
        if diff > 0.0 {
            beta_min = beta;
            beta = if beta_max.is_infinite() { beta * 2.0 } else { (beta + beta_max) / 2.0 };
        } else {
            beta_max = beta;
            beta = if beta_min.is_infinite() { beta / 2.0 } else { (beta + beta_min) / 2.0 };
        }
    }
    probabilities
}

/// PCA layout scaled so the first axis has standard deviation 1e-4.
/// Falls back to small Gaussian noise when PCA collapses.
fn initial_layout(matrix: &EmbeddingMatrix, seed: u64) -> Vec<Point3> {
    let mut points = pca::fit_transform(matrix, &PcaConfig::default(), seed);
    let n = points.len() as f64;
    let mean = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let std = (points.iter().map(|p| (p[0] - mean).powi(2)).sum::<f64>() / n).sqrt();

    if std > 0.0 {
        for v in points.iter_mut().flatten() {
            *v = *v / std * INIT_STD;
        }
    } else {
        tracing::debug!("PCA layout collapsed; using random initialization");
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        for v in points.iter_mut().flatten() {
            let z: f64 = StandardNormal.sample(&mut rng);
            *v = z * INIT_STD;
        }
    }
    points
}

/// One gradient-descent phase with fixed exaggeration and momentum.
struct Descent<'a> {
    affinities: &'a Affinities,
    angle: f64,
    learning_rate: f64,
    min_grad_norm: f64,
}

impl Descent<'_> {
    fn run(&self, embedding: &mut [Point3], iterations: usize, exaggeration: f64, momentum: f64) {
        let n = embedding.len();
        let mut update = vec![[0.0_f64; 3]; n];
        let mut gains = vec![[1.0_f64; 3]; n];

        for iteration in 0..iterations {
            let grad = self.gradient(embedding, exaggeration);
            let grad_norm = grad.iter().flatten().map(|g| g * g).sum::<f64>().sqrt();

            for i in 0..n {
                for d in 0..3 {
                    let g = grad[i][d];
                    let gain = if update[i][d] * g < 0.0 {
                        gains[i][d] + 0.2
                    } else {
                        gains[i][d] * 0.8
                    };
                    gains[i][d] = gain.max(MIN_GAIN);
                    update[i][d] = momentum * update[i][d] - self.learning_rate * gains[i][d] * g;
                    embedding[i][d] += update[i][d];
                }
            }

            if grad_norm <= self.min_grad_norm {
                tracing::debug!(iteration, grad_norm, "t-SNE gradient vanished");
                break;
            }
        }
    }

    /// KL-divergence gradient `4·(F_attr - F_rep / Z)`.
    fn gradient(&self, embedding: &[Point3], exaggeration: f64) -> Vec<Point3> {
        let tree = Octree::build(embedding);
        let theta_sq = self.angle * self.angle;

        let mut repulsive = vec![[0.0; 3]; embedding.len()];
        let mut z = 0.0_f64;
        for (i, point) in embedding.iter().enumerate() {
            z += tree.repulsion(point, theta_sq, &mut repulsive[i]);
        }
        let z = z.max(f64::MIN_POSITIVE);

        embedding
            .iter()
            .enumerate()
            .map(|(i, yi)| {
                let mut attractive = [0.0; 3];
                for &(j, p) in &self.affinities[i] {
                    let yj = &embedding[j];
                    let diff = [yi[0] - yj[0], yi[1] - yj[1], yi[2] - yj[2]];
                    let q = 1.0 / (1.0 + diff.iter().map(|v| v * v).sum::<f64>());
                    let strength = exaggeration * p * q;
                    for d in 0..3 {
                        attractive[d] += strength * diff[d];
                    }
                }
                let mut g = [0.0; 3];
                for d in 0..3 {
                    g[d] = 4.0 * (attractive[d] - repulsive[i][d] / z);
                }
                g
            })
            .collect()
    }
}

/// Space-partitioning tree over the current layout.
///
/// Cells live in a flat arena; a subdivided cell owns eight consecutive
/// children starting at `children`. Leaves hold one distinct position with
/// a multiplicity.
struct Octree {
    cells: Vec<Cell>,
}

#[derive(Debug, Clone)]
struct Cell {
    center: Point3,
    half_width: f64,
    depth: usize,
    count: usize,
    /// Sum of member positions; divided by `count` for the center of mass.
    mass: Point3,
    /// Position of a leaf's members.
    point: Point3,
    children: Option<usize>,
}

impl Cell {
    fn empty(center: Point3, half_width: f64, depth: usize) -> Self {
        Self {
            center,
            half_width,
            depth,
            count: 0,
            mass: [0.0; 3],
            point: [0.0; 3],
            children: None,
        }
    }

    fn octant(&self, p: &Point3) -> usize {
        (0..3)
            .filter(|&d| p[d] >= self.center[d])
            .map(|d| 1 << d)
            .sum()
    }
}

impl Octree {
    fn build(points: &[Point3]) -> Self {
        let mut min = [f64::INFINITY; 3];
        let mut max = [f64::NEG_INFINITY; 3];
        for p in points {
            for d in 0..3 {
                min[d] = min[d].min(p[d]);
                max[d] = max[d].max(p[d]);
            }
        }
        let center = [
            (min[0] + max[0]) / 2.0,
            (min[1] + max[1]) / 2.0,
            (min[2] + max[2]) / 2.0,
        ];
        let extent = (0..3).map(|d| max[d] - min[d]).fold(0.0, f64::max);
        let half_width = (extent / 2.0) * (1.0 + 1e-5) + 1e-12;

        let mut tree = Self {
            cells: vec![Cell::empty(center, half_width, 0)],
        };
        for p in points {
            tree.insert(*p);
        }
        tree
    }

    fn insert(&mut self, p: Point3) {
        let mut idx = 0;
        loop {
            let cell = &mut self.cells[idx];
            let previous = cell.count;
            cell.count += 1;
            for d in 0..3 {
                cell.mass[d] += p[d];
            }

            if let Some(first) = cell.children {
                idx = first + cell.octant(&p);
                continue;
            }
            if previous == 0 {
                cell.point = p;
                return;
            }
            if cell.point == p || cell.depth >= MAX_TREE_DEPTH {
                return;
            }

            // Split the leaf and push its existing members down one level.
            let resident = cell.point;
            let resident_octant = cell.octant(&resident);
            let (center, half, depth) = (cell.center, cell.half_width / 2.0, cell.depth + 1);
            let first = self.cells.len();
            self.cells[idx].children = Some(first);
            for octant in 0..8 {
                let mut child_center = center;
                for (d, c) in child_center.iter_mut().enumerate() {
                    *c += if octant & (1 << d) != 0 { half } else { -half };
                }
                self.cells.push(Cell::empty(child_center, half, depth));
            }
            let child = &mut self.cells[first + resident_octant];
            child.count = previous;
            child.point = resident;
            child.mass = [
                resident[0] * previous as f64,
                resident[1] * previous as f64,
                resident[2] * previous as f64,
            ];
            idx = first + self.cells[idx].octant(&p);
        }
    }

    /// Accumulates the unnormalized repulsive force on `target` into
    /// `force` and returns its contribution to the normalization `Z`.
    fn repulsion(&self, target: &Point3, theta_sq: f64, force: &mut Point3) -> f64 {
        let mut z = 0.0_f64;
        let mut stack = vec![0usize];
        while let Some(idx) = stack.pop() {
            let cell = &self.cells[idx];
            if cell.count == 0 {
                continue;
            }

            let (summary, mut count) = match cell.children {
                None => (cell.point, cell.count as f64),
                Some(first) => {
                    let inv = 1.0 / cell.count as f64;
                    let com = [cell.mass[0] * inv, cell.mass[1] * inv, cell.mass[2] * inv];
                    let d2 = squared(target, &com);
                    let width = 2.0 * cell.half_width;
                    if d2 == 0.0 || width * width / d2 >= theta_sq {
                        stack.extend(first..first + 8);
                        continue;
                    }
                    (com, cell.count as f64)
                }
            };

            let diff = [
                target[0] - summary[0],
                target[1] - summary[1],
                target[2] - summary[2],
            ];
            let d2 = diff.iter().map(|v| v * v).sum::<f64>();
            if d2 == 0.0 {
                // The target itself; only its duplicates count.
                count -= 1.0;
            }
            let q = 1.0 / (1.0 + d2);
            z += count * q;
            let mult = count * q * q;
            for d in 0..3 {
                force[d] += mult * diff[d];
            }
        }
        z
    }
}

#[inline]
fn squared(a: &Point3, b: &Point3) -> f64 {
    (0..3).map(|d| (a[d] - b[d]).powi(2)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::test_support::{blobs, separation_ratio};

    #[test]
    fn perplexity_adapts_to_corpus_size() {
        let config = TsneConfig::default();
        assert_eq!(config.perplexity_for(10), 5.0);
        assert_eq!(config.perplexity_for(100), 20.0);
        assert_eq!(config.perplexity_for(104), 20.0);
        assert_eq!(config.perplexity_for(10_000), 30.0);
        // Tiny corpora are further capped at N - 1.
        assert_eq!(config.perplexity_for(3), 2.0);
    }

    #[test]
    fn neighbor_count_follows_perplexity() {
        let config = TsneConfig::default();
        assert_eq!(config.neighbor_count(100), 61);
        assert_eq!(config.neighbor_count(10_000), 91);
        assert_eq!(config.neighbor_count(10), 9);
        assert_eq!(config.neighbor_count(1), 0);
    }

    #[test]
    fn conditional_row_matches_perplexity() {
        let distances = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0];
        let row = conditional_row(&distances, 3.0_f64.ln());

        assert!((row.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        let entropy: f64 = -row.iter().filter(|&&p| p > 0.0).map(|p| p * p.ln()).sum::<f64>();
        assert!((entropy - 3.0_f64.ln()).abs() < 1e-4, "entropy = {entropy}");
    }

    #[test]
    fn joint_probabilities_are_symmetric_and_normalized() {
        let indices = vec![vec![1, 2], vec![0, 2], vec![1, 0]];
        let distances = vec![vec![1.0, 4.0], vec![1.0, 2.0], vec![2.0, 4.0]];
        let p = joint_probabilities(&indices, &distances, 1.5);

        let total: f64 = p.iter().flatten().map(|(_, v)| v).sum();
        assert!((total - 1.0).abs() < 1e-12);
        for (i, row) in p.iter().enumerate() {
            for &(j, v) in row {
                let back = p[j].iter().find(|(k, _)| *k == i).map(|(_, v)| *v);
                assert_eq!(back, Some(v));
            }
        }
    }

    #[test]
    fn octree_counts_duplicates_once_per_leaf() {
        let points = vec![[0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [1.0, 1.0, 1.0]];
        let tree = Octree::build(&points);
        assert_eq!(tree.cells[0].count, 3);

        // With angle 0 every cell is opened, so Z is exact.
        let mut force = [0.0; 3];
        let z = tree.repulsion(&points[0], 0.0, &mut force);
        let expected = 1.0 + 1.0 / 4.0;
        assert!((z - expected).abs() < 1e-12, "z = {z}");
    }

    #[test]
    fn exact_and_approximate_repulsion_agree() {
        let (matrix, _) = blobs(10, 3);
        let points: Vec<Point3> = matrix
            .rows()
            .map(|r| [f64::from(r[0]), f64::from(r[1]), f64::from(r[2])])
            .collect();
        let tree = Octree::build(&points);

        let target = points[0];
        let mut exact = [0.0; 3];
        let z_exact = tree.repulsion(&target, 0.0, &mut exact);
        let mut approx = [0.0; 3];
        let z_approx = tree.repulsion(&target, 0.25, &mut approx);

        assert!((z_exact - z_approx).abs() / z_exact < 0.05);
    }

    #[test]
    fn small_corpora_do_not_panic() {
        let config = TsneConfig {
            max_iter: 300,
            ..TsneConfig::default()
        };
        for n in 1..=20 {
            let rows: Vec<Vec<f32>> = (0..n)
                .map(|i| (0..8).map(|d| ((i * 5 + d * 3) % 7) as f32).collect())
                .collect();
            let matrix = EmbeddingMatrix::from_rows(&rows).unwrap();
            let points = fit_transform(&matrix, &config, 42);

            assert_eq!(points.len(), n);
            assert!(points.iter().flatten().all(|v| v.is_finite()), "n = {n}");
        }
    }

    #[test]
    fn identical_rows_stay_finite() {
        let rows = vec![vec![0.5_f32; 4]; 7];
        let matrix = EmbeddingMatrix::from_rows(&rows).unwrap();
        let points = fit_transform(&matrix, &TsneConfig::default(), 42);
        assert!(points.iter().flatten().all(|v| v.is_finite()));
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let (matrix, _) = blobs(8, 6);
        let config = TsneConfig {
            max_iter: 300,
            ..TsneConfig::default()
        };
        assert_eq!(
            fit_transform(&matrix, &config, 42),
            fit_transform(&matrix, &config, 42)
        );
    }

    #[test]
    fn separates_clusters() {
        let (matrix, labels) = blobs(20, 9);
        let points = fit_transform(&matrix, &TsneConfig::default(), 42);
        let ratio = separation_ratio(&points, &labels);
        assert!(ratio < 0.5, "separation ratio {ratio}");
    }
}
