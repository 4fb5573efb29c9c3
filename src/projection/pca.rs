//! Principal component analysis by subspace iteration.
//!
//! The top components of the centered matrix are found by repeatedly
//! multiplying a seeded random basis by `XᵀX` and re-orthonormalizing. This
//! never materializes the D×D covariance matrix, so each step costs
//! O(N·D) per component.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, StandardNormal};
use serde::{Deserialize, Serialize};

use super::neighbors::dot;
use super::Point3;
use crate::domain::EmbeddingMatrix;

/// Number of output components.
const COMPONENTS: usize = 3;

/// Default cap on subspace iterations.
pub const DEFAULT_MAX_ITER: usize = 300;

/// Default convergence tolerance on `1 - |cos|` between successive bases.
pub const DEFAULT_TOLERANCE: f64 = 1e-10;

/// Fraction of its original norm below which a basis vector is treated as
/// lying in the span of the earlier ones.
const RANK_EPSILON: f64 = 1e-8;

/// PCA hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PcaConfig {
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for PcaConfig {
    fn default() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

/// Projects every row onto the top three principal components.
///
/// Components are ordered by explained variance and each is signed so that
/// its largest-magnitude loading is positive. Components that do not exist
/// (rank below three, or D < 3) project to 0.
pub fn fit_transform(matrix: &EmbeddingMatrix, config: &PcaConfig, seed: u64) -> Vec<Point3> {
    let n = matrix.len();
    let d = matrix.dim();
    if n == 0 {
        return Vec::new();
    }

    let centered = center(matrix);
    let k = COMPONENTS.min(d);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let mut basis: Vec<Vec<f64>> = (0..k)
        .map(|_| (0..d).map(|_| StandardNormal.sample(&mut rng)).collect())
        .collect();
    orthonormalize(&mut basis);

    for iteration in 0..config.max_iter {
        let mut next = multiply_gram(&centered, &basis);
        orthonormalize(&mut next);

        let drift = basis
            .iter()
            .zip(&next)
            .filter(|(_, b)| b.iter().any(|&v| v != 0.0))
            .map(|(a, b)| 1.0 - dot(a, b).abs())
            .fold(0.0, f64::max);

        basis = next;
        if drift < config.tolerance {
            tracing::debug!(iteration, "PCA converged");
            break;
        }
    }

    // Order by explained variance.
    let mut components: Vec<(f64, Vec<f64>, Vec<f64>)> = basis
        .into_iter()
        .map(|mut axis| {
            let mut scores: Vec<f64> = centered.iter().map(|row| dot(row, &axis)).collect();
            if let Some(pivot) = axis
                .iter()
                .copied()
                .max_by(|a, b| a.abs().total_cmp(&b.abs()))
            {
                if pivot < 0.0 {
                    axis.iter_mut().for_each(|v| *v = -*v);
                    scores.iter_mut().for_each(|v| *v = -*v);
                }
            }
            let variance = scores.iter().map(|s| s * s).sum::<f64>();
            (variance, axis, scores)
        })
        .collect();
    components.sort_by(|a, b| b.0.total_cmp(&a.0));

    (0..n)
        .map(|i| {
            let mut point = [0.0; 3];
            for (c, (_, _, scores)) in components.iter().enumerate() {
                point[c] = scores[i];
            }
            point
        })
        .collect()
}

/// Subtracts the column means.
fn center(matrix: &EmbeddingMatrix) -> Vec<Vec<f64>> {
    let d = matrix.dim();
    let mut mean = vec![0.0_f64; d];
    for row in matrix.rows() {
        for (m, &v) in mean.iter_mut().zip(row) {
            *m += f64::from(v);
        }
    }
    let n = matrix.len() as f64;
    mean.iter_mut().for_each(|m| *m /= n);

    matrix
        .rows()
        .map(|row| row.iter().zip(&mean).map(|(&v, m)| f64::from(v) - m).collect())
        .collect()
}

/// Computes `Xᵀ(X·q)` for every basis vector `q`.
fn multiply_gram(rows: &[Vec<f64>], basis: &[Vec<f64>]) -> Vec<Vec<f64>> {
    basis
        .iter()
        .map(|q| {
            let mut out = vec![0.0_f64; q.len()];
            for row in rows {
                let s = dot(row, q);
                if s != 0.0 {
                    for (o, &x) in out.iter_mut().zip(row) {
                        *o += s * x;
                    }
                }
            }
            out
        })
        .collect()
}

/// Modified Gram-Schmidt. Vectors that vanish after projection are zeroed.
fn orthonormalize(basis: &mut [Vec<f64>]) {
    for c in 0..basis.len() {
        let (done, rest) = basis.split_at_mut(c);
        let v = &mut rest[0];
        let original = dot(v, v).sqrt();
        for prev in done.iter() {
            let proj = dot(v, prev);
            for (x, p) in v.iter_mut().zip(prev) {
                *x -= proj * p;
            }
        }
        let norm = dot(v, v).sqrt();
        if norm == 0.0 || norm < RANK_EPSILON * original {
            v.iter_mut().for_each(|x| *x = 0.0);
        } else {
            v.iter_mut().for_each(|x| *x /= norm);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(rows: &[Vec<f32>]) -> EmbeddingMatrix {
        EmbeddingMatrix::from_rows(rows).unwrap()
    }

    #[test]
    fn recovers_dominant_axis() {
        // Points spread along x with a little y noise.
        let rows: Vec<Vec<f32>> = (0..20)
            .map(|i| {
                let t = i as f32 - 10.0;
                vec![t, 0.1 * (i % 3) as f32, 0.0, 0.0]
            })
            .collect();
        let points = fit_transform(&matrix(&rows), &PcaConfig::default(), 42);

        assert_eq!(points.len(), 20);
        // First component is x (sign fixed positive), so scores follow t.
        for (i, p) in points.iter().enumerate() {
            let t = i as f64 - 10.0 + 0.5;
            assert!((p[0] - t).abs() < 0.05, "row {i}: {} vs {t}", p[0]);
        }
        let var = |c: usize| points.iter().map(|p| p[c] * p[c]).sum::<f64>();
        assert!(var(0) > var(1));
        assert!(var(1) >= var(2));
    }

    #[test]
    fn single_row_projects_to_origin() {
        let points = fit_transform(&matrix(&[vec![0.3, 0.4, 0.5, 0.6]]), &PcaConfig::default(), 42);
        assert_eq!(points, vec![[0.0, 0.0, 0.0]]);
    }

    #[test]
    fn low_dimension_pads_missing_components() {
        let rows = vec![vec![1.0, 2.0], vec![3.0, 1.0], vec![-1.0, 0.0]];
        let points = fit_transform(&matrix(&rows), &PcaConfig::default(), 42);
        assert!(points.iter().all(|p| p[2] == 0.0));
    }

    #[test]
    fn identity_rows_are_rank_deficient_but_finite() {
        let rows = vec![
            vec![1.0, 0.0, 0.0, 0.0],
            vec![0.0, 1.0, 0.0, 0.0],
            vec![0.0, 0.0, 1.0, 0.0],
        ];
        let points = fit_transform(&matrix(&rows), &PcaConfig::default(), 42);

        assert_eq!(points.len(), 3);
        assert!(points.iter().flatten().all(|v| v.is_finite()));
        // Three centered points span at most two dimensions.
        assert!(points.iter().all(|p| p[2].abs() < 1e-9));
    }

    #[test]
    fn deterministic_for_fixed_seed() {
        let rows: Vec<Vec<f32>> = (0..15)
            .map(|i| (0..8).map(|d| ((i * 7 + d * 3) % 11) as f32).collect())
            .collect();
        let m = matrix(&rows);

        let a = fit_transform(&m, &PcaConfig::default(), 42);
        let b = fit_transform(&m, &PcaConfig::default(), 42);
        assert_eq!(a, b);
    }
}
