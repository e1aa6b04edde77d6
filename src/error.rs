//! Error types shared across the reserving engine

use thiserror::Error;

/// Errors raised at the input boundary or by the fitting routines.
///
/// Numeric edge cases inside the engines (zero denominators, degenerate
/// variance) are handled with documented fallback values and never surface
/// as errors; see the individual modules.
#[derive(Debug, Error)]
pub enum ReservingError {
    /// Two matrices that must share a shape do not.
    #[error("shape mismatch: expected {expected_rows}x{expected_cols}, got {actual_rows}x{actual_cols}")]
    ShapeMismatch {
        expected_rows: usize,
        expected_cols: usize,
        actual_rows: usize,
        actual_cols: usize,
    },

    /// Row-oriented input with inconsistent row lengths.
    #[error("ragged input: row {row} has {len} columns, expected {expected}")]
    RaggedInput {
        row: usize,
        len: usize,
        expected: usize,
    },

    /// A matrix or series with no data where data is required.
    #[error("empty input: {0}")]
    EmptyInput(&'static str),

    /// A factor vector whose length does not match the triangle's transitions.
    #[error("factor vector has length {actual}, expected {expected} development transitions")]
    FactorLength { expected: usize, actual: usize },

    /// Two parallel series that must share a length do not.
    #[error("length mismatch: {name} has length {actual}, expected {expected}")]
    LengthMismatch {
        name: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Too few observations for the requested fit.
    #[error("insufficient data: {0}")]
    InsufficientData(&'static str),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ReservingError>;
