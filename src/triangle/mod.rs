//! Loss triangle data model
//!
//! A [`Triangle`] is a fixed-shape, row-major `f64` matrix indexed by origin
//! period (row) and development period (column). Cells that have not been
//! observed yet carry NaN as the missing-value sentinel — never a literal
//! zero, which is a valid claim amount.
//!
//! Shape is validated once at construction; every numeric routine downstream
//! can then index freely without re-checking.

pub mod algebra;
mod loader;

pub use loader::{load_triangle_csv, load_weights_csv};

use serde::{Deserialize, Serialize};

use crate::error::{ReservingError, Result};

/// Two-dimensional numeric array with NaN marking unobserved cells.
///
/// Used both for claim triangles and for weight matrices (where every entry
/// is expected to be finite and non-negative).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triangle {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl Triangle {
    /// Create a triangle of the given shape with every cell unobserved.
    pub fn unobserved(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![f64::NAN; rows * cols],
        }
    }

    /// Create a triangle of the given shape filled with a constant.
    pub fn filled(rows: usize, cols: usize, value: f64) -> Self {
        Self {
            rows,
            cols,
            data: vec![value; rows * cols],
        }
    }

    /// Build from row vectors. Every row must have the same length;
    /// ragged input is rejected before any numeric routine runs.
    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        if rows.is_empty() {
            return Err(ReservingError::EmptyInput("triangle rows"));
        }
        let cols = rows[0].len();
        if cols == 0 {
            return Err(ReservingError::EmptyInput("triangle columns"));
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(ReservingError::RaggedInput {
                    row: i,
                    len: row.len(),
                    expected: cols,
                });
            }
        }
        let n_rows = rows.len();
        let data = rows.into_iter().flatten().collect();
        Ok(Self {
            rows: n_rows,
            cols,
            data,
        })
    }

    /// Build from possibly ragged row vectors, padding short rows with NaN
    /// out to the longest row. This is the documented ingestion path for
    /// staircase-shaped input delivered without explicit markers.
    pub fn from_ragged_rows(rows: Vec<Vec<f64>>) -> Result<Self> {
        if rows.is_empty() {
            return Err(ReservingError::EmptyInput("triangle rows"));
        }
        let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
        if cols == 0 {
            return Err(ReservingError::EmptyInput("triangle columns"));
        }
        let n_rows = rows.len();
        let mut data = Vec::with_capacity(n_rows * cols);
        for row in rows {
            let pad = cols - row.len();
            data.extend(row);
            data.extend(std::iter::repeat(f64::NAN).take(pad));
        }
        Ok(Self {
            rows: n_rows,
            cols,
            data,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: f64) {
        self.data[row * self.cols + col] = value;
    }

    /// True if the cell holds an observed (non-NaN) value.
    #[inline]
    pub fn is_observed(&self, row: usize, col: usize) -> bool {
        !self.get(row, col).is_nan()
    }

    /// Iterate over all cell values in row-major order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.data.iter().copied()
    }

    /// Observation mask: true where the cell is non-NaN.
    pub fn mask(&self) -> Mask {
        Mask {
            rows: self.rows,
            cols: self.cols,
            data: self.data.iter().map(|v| !v.is_nan()).collect(),
        }
    }

    /// The latest observed value per origin row, scanning from the right.
    /// Rows with no observed cell yield NaN.
    pub fn latest_diagonal(&self) -> Vec<f64> {
        (0..self.rows)
            .map(|i| {
                (0..self.cols)
                    .rev()
                    .map(|j| self.get(i, j))
                    .find(|v| !v.is_nan())
                    .unwrap_or(f64::NAN)
            })
            .collect()
    }

    /// Column index of the last observed cell per row, or None for an
    /// all-unobserved row.
    pub fn last_observed_col(&self, row: usize) -> Option<usize> {
        (0..self.cols).rev().find(|&j| self.is_observed(row, j))
    }

    /// Error unless `other` has the same shape as `self`.
    pub fn ensure_same_shape(&self, other: &Triangle) -> Result<()> {
        if self.rows != other.rows || self.cols != other.cols {
            return Err(ReservingError::ShapeMismatch {
                expected_rows: self.rows,
                expected_cols: self.cols,
                actual_rows: other.rows,
                actual_cols: other.cols,
            });
        }
        Ok(())
    }
}

/// Boolean matrix with the same shape semantics as [`Triangle`].
#[derive(Debug, Clone, PartialEq)]
pub struct Mask {
    rows: usize,
    cols: usize,
    data: Vec<bool>,
}

impl Mask {
    /// All-true mask of the given shape.
    pub fn full(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![true; rows * cols],
        }
    }

    /// Mask marking strictly positive weights.
    pub fn from_weights(weights: &Triangle) -> Self {
        Self {
            rows: weights.rows(),
            cols: weights.cols(),
            data: weights.values().map(|w| w > 0.0).collect(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.data[row * self.cols + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize, value: bool) {
        self.data[row * self.cols + col] = value;
    }

    /// Number of true cells.
    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&b| b).count()
    }
}
