//! Dense row-major embedding matrix.

use crate::error::{ExportError, Result};

/// N×D matrix of embeddings, one row per document in document order.
///
/// Construction rejects ragged input, so every row is guaranteed to have
/// the same dimension.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingMatrix {
    rows: usize,
    dim: usize,
    data: Vec<f32>,
}

impl EmbeddingMatrix {
    /// Builds a matrix from per-document vectors.
    ///
    /// The first row fixes the dimension; any later row that differs yields
    /// `ExportError::ShapeMismatch` naming the offending index.
    pub fn from_rows<R: AsRef<[f32]>>(rows: &[R]) -> Result<Self> {
        let dim = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut data = Vec::with_capacity(rows.len() * dim);

        for (index, row) in rows.iter().enumerate() {
            let row = row.as_ref();
            if row.len() != dim {
                return Err(ExportError::ShapeMismatch {
                    index,
                    expected: dim,
                    found: row.len(),
                });
            }
            data.extend_from_slice(row);
        }

        Ok(Self {
            rows: rows.len(),
            dim,
            data,
        })
    }

    /// Number of rows (documents).
    pub fn len(&self) -> usize {
        self.rows
    }

    /// Returns whether the matrix has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Dimension shared by every row.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Returns row `i`.
    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dim..(i + 1) * self.dim]
    }

    /// Iterates rows in order.
    pub fn rows(&self) -> impl Iterator<Item = &[f32]> {
        (0..self.rows).map(move |i| self.row(i))
    }
}
