//! Exact k-nearest-neighbor search shared by the nonlinear methods.
//!
//! UMAP ranks neighbors by cosine distance and t-SNE by squared Euclidean
//! distance. Both graphs come out of one pass over the unordered pairs, so
//! the `O(N²·D)` distance work is paid once per export.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::domain::EmbeddingMatrix;

/// Distance used when ranking neighbors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Metric {
    /// `1 - cos(a, b)`. A zero vector is at distance 0 from another zero
    /// vector and 1 from everything else.
    Cosine,
    /// `|a - b|^2`.
    SquaredEuclidean,
}

/// Neighbor lists sorted by ascending distance, excluding the point itself.
#[derive(Debug, Clone)]
pub(crate) struct Knn {
    pub indices: Vec<Vec<usize>>,
    pub distances: Vec<Vec<f64>>,
}

/// Both neighbor graphs of one corpus.
#[derive(Debug, Clone)]
pub(crate) struct Neighborhoods {
    pub cosine: Knn,
    pub euclidean: Knn,
}

/// Copies the matrix into `f64` rows.
pub(crate) fn to_rows(matrix: &EmbeddingMatrix) -> Vec<Vec<f64>> {
    matrix
        .rows()
        .map(|row| row.iter().map(|&v| f64::from(v)).collect())
        .collect()
}

#[inline]
pub(crate) fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Brute-force k-NN under a single metric.
pub(crate) fn nearest_neighbors(rows: &[Vec<f64>], k: usize, metric: Metric) -> Knn {
    match metric {
        Metric::Cosine => neighborhoods(rows, k, 0).cosine,
        Metric::SquaredEuclidean => neighborhoods(rows, 0, k).euclidean,
    }
}

/// Computes the cosine and squared Euclidean k-NN graphs together.
///
/// Each `k` is capped at `n - 1`. Ties are broken by index, so the result
/// does not depend on visiting order.
pub(crate) fn neighborhoods(
    rows: &[Vec<f64>],
    k_cosine: usize,
    k_euclidean: usize,
) -> Neighborhoods {
    let n = rows.len();
    let k_cosine = k_cosine.min(n.saturating_sub(1));
    let k_euclidean = k_euclidean.min(n.saturating_sub(1));

    let norms: Vec<f64> = rows.iter().map(|r| dot(r, r).sqrt()).collect();
    let mut cosine: Vec<BinaryHeap<Candidate>> = (0..n).map(|_| BinaryHeap::new()).collect();
    let mut euclidean: Vec<BinaryHeap<Candidate>> = (0..n).map(|_| BinaryHeap::new()).collect();

    for i in 0..n {
        for j in i + 1..n {
            let (mut product, mut squared) = (0.0_f64, 0.0_f64);
            for (x, y) in rows[i].iter().zip(&rows[j]) {
                product += x * y;
                squared += (x - y) * (x - y);
            }

            if k_cosine > 0 {
                let d = cosine_distance(product, norms[i], norms[j]);
                offer(&mut cosine[i], k_cosine, Candidate::new(d, j));
                offer(&mut cosine[j], k_cosine, Candidate::new(d, i));
            }
            if k_euclidean > 0 {
                offer(&mut euclidean[i], k_euclidean, Candidate::new(squared, j));
                offer(&mut euclidean[j], k_euclidean, Candidate::new(squared, i));
            }
        }
    }

    Neighborhoods {
        cosine: collect(cosine),
        euclidean: collect(euclidean),
    }
}

fn cosine_distance(product: f64, norm_a: f64, norm_b: f64) -> f64 {
    match (norm_a == 0.0, norm_b == 0.0) {
        (true, true) => 0.0,
        (true, false) | (false, true) => 1.0,
        (false, false) => (1.0 - product / (norm_a * norm_b)).max(0.0),
    }
}

/// A neighbor ordered by `(distance, index)`.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    distance: f64,
    index: usize,
}

impl Candidate {
    fn new(distance: f64, index: usize) -> Self {
        Self { distance, index }
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then(self.index.cmp(&other.index))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

/// Keeps the `k` smallest candidates in a max-heap.
fn offer(heap: &mut BinaryHeap<Candidate>, k: usize, candidate: Candidate) {
    if heap.len() < k {
        heap.push(candidate);
    } else if heap.peek().is_some_and(|worst| candidate < *worst) {
        heap.pop();
        heap.push(candidate);
    }
}

fn collect(heaps: Vec<BinaryHeap<Candidate>>) -> Knn {
    let mut indices = Vec::with_capacity(heaps.len());
    let mut distances = Vec::with_capacity(heaps.len());
    for heap in heaps {
        let sorted = heap.into_sorted_vec();
        indices.push(sorted.iter().map(|c| c.index).collect());
        distances.push(sorted.iter().map(|c| c.distance).collect());
    }
    Knn { indices, distances }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_neighbors_ignore_magnitude() {
        let rows = vec![
            vec![1.0, 0.0],
            vec![10.0, 0.5],
            vec![0.0, 1.0],
            vec![-1.0, 0.0],
        ];
        let knn = nearest_neighbors(&rows, 2, Metric::Cosine);

        assert_eq!(knn.indices[0], vec![1, 2]);
        assert!(knn.distances[0][0] < 0.01);
        assert!((knn.distances[0][1] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn k_is_capped_by_corpus_size() {
        let rows = vec![vec![0.0, 0.0], vec![1.0, 1.0]];
        let knn = nearest_neighbors(&rows, 15, Metric::SquaredEuclidean);

        assert_eq!(knn.indices, vec![vec![1], vec![0]]);
        assert_eq!(knn.distances[0], vec![2.0]);
    }

    #[test]
    fn single_row_has_no_neighbors() {
        let knn = nearest_neighbors(&[vec![1.0]], 15, Metric::Cosine);
        assert_eq!(knn.indices, vec![Vec::<usize>::new()]);
    }

    #[test]
    fn zero_vectors_are_close_to_each_other() {
        let rows = vec![vec![0.0, 0.0], vec![0.0, 0.0], vec![1.0, 0.0]];
        let knn = nearest_neighbors(&rows, 2, Metric::Cosine);

        assert_eq!(knn.indices[0], vec![1, 2]);
        assert_eq!(knn.distances[0], vec![0.0, 1.0]);
    }

    #[test]
    fn ties_resolve_to_lower_index() {
        let rows = vec![vec![0.0], vec![1.0], vec![-1.0], vec![1.0]];
        let knn = nearest_neighbors(&rows, 2, Metric::SquaredEuclidean);

        assert_eq!(knn.indices[0], vec![1, 2]);
        assert_eq!(knn.indices[1], vec![3, 0]);
    }

    fn squared_euclidean(a: &[f64], b: &[f64]) -> f64 {
        a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    /// Sorts every other row by `distance` and keeps the first `k`.
    fn exhaustive(
        rows: &[Vec<f64>],
        k: usize,
        distance: impl Fn(usize, usize) -> f64,
    ) -> Vec<Vec<usize>> {
        (0..rows.len())
            .map(|i| {
                let mut all: Vec<(f64, usize)> = (0..rows.len())
                    .filter(|&j| j != i)
                    .map(|j| (distance(i, j), j))
                    .collect();
                all.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
                all.into_iter().take(k).map(|(_, j)| j).collect()
            })
            .collect()
    }

    #[test]
    fn shared_pass_matches_exhaustive_search() {
        let rows: Vec<Vec<f64>> = (0..30)
            .map(|i| {
                (0..5)
                    .map(|d| (((i * 7 + d * 3) % 11) as f64 - 5.0) * (1.0 + (i % 4) as f64))
                    .collect()
            })
            .collect();
        let graphs = neighborhoods(&rows, 6, 9);

        let unit: Vec<Vec<f64>> = rows
            .iter()
            .map(|r| {
                let norm = dot(r, r).sqrt();
                r.iter().map(|v| v / norm).collect()
            })
            .collect();
        let cosine = exhaustive(&rows, 6, |i, j| (1.0 - dot(&unit[i], &unit[j])).max(0.0));
        let euclidean = exhaustive(&rows, 9, |i, j| squared_euclidean(&rows[i], &rows[j]));

        assert_eq!(graphs.euclidean.indices, euclidean);
        for (i, (got, want)) in graphs.cosine.indices.iter().zip(&cosine).enumerate() {
            // Near-ties may swap under rounding; compare the distance profile.
            let profile = |js: &[usize]| -> Vec<f64> {
                js.iter()
                    .map(|&j| (1.0 - dot(&unit[i], &unit[j])).max(0.0))
                    .collect()
            };
            for (g, w) in profile(got).iter().zip(&profile(want)) {
                assert!((g - w).abs() < 1e-12, "row {i}: {got:?} vs {want:?}");
            }
        }
    }
}
