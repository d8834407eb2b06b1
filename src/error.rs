//! Error types shared by the planner, the backends and the Tucker types.
//!
//! Every check that can fail runs before a new instance is assembled, so an
//! `Err` never leaves a half-built tensor behind and operands are only ever
//! borrowed.

use thiserror::Error;

/// Errors raised by compressed-tensor operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum Error {
    /// A mode index is outside `0..ndim`.
    #[error("mode {mode} is out of range for a tensor with {ndim} modes")]
    InvalidMode { mode: usize, ndim: usize },

    /// A matrix does not fit the axis it is applied to.
    #[error("{operation}: expected dimension {expected}, got {actual}")]
    DimensionMismatch {
        operation: &'static str,
        expected: usize,
        actual: usize,
    },

    /// The two operands of a binary operation represent tensors of
    /// different shapes.
    #[error("{operation}: shapes {lhs:?} and {rhs:?} are incompatible")]
    ShapeMismatch {
        operation: &'static str,
        lhs: Vec<usize>,
        rhs: Vec<usize>,
    },

    /// Core, factors and mode metadata do not describe a valid tensor.
    #[error("invalid Tucker structure: {0}")]
    InvalidStructure(String),

    /// The row/column split of a matrix view was not supplied.
    #[error("the row split `n` and column split `m` are required for matrices")]
    MissingShapeSplit,

    /// The tensor has no shared factor to multiply.
    #[error("tensor has no shared modes")]
    NoSharedModes,

    /// The contraction needs more distinct axis labels than are available.
    #[error("contraction needs more than {available} axis labels")]
    LabelsExhausted { available: usize },

    /// A contraction notation string is malformed or does not match its
    /// operands.
    #[error("invalid contraction `{notation}`: {reason}")]
    Notation { notation: String, reason: String },

    /// QR or SVD did not produce a result.
    #[error("decomposition failed: {0}")]
    Decomposition(String),

    /// The array library rejected a shape.
    #[error("backend error: {0}")]
    Backend(String),
}

/// Result alias used across the crate.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use crate::error::Error;

    #[test]
    fn invalid_mode_message_names_mode_and_order() {
        let error = Error::InvalidMode { mode: 4, ndim: 3 };

        assert_eq!(
            error.to_string(),
            "mode 4 is out of range for a tensor with 3 modes"
        );
    }

    #[test]
    fn dimension_mismatch_message_names_operation() {
        let error = Error::DimensionMismatch {
            operation: "k_mode_product",
            expected: 5,
            actual: 2,
        };

        assert_eq!(
            error.to_string(),
            "k_mode_product: expected dimension 5, got 2"
        );
    }
}
