//! The generic numeric backend.
//!
//! This module provides the [`Backend`] trait which defines the complete
//! contract the compressed tensor types need from a dense array library:
//! tensor creation, elementwise arithmetic, reductions, reshaping,
//! generalized contraction and the QR / SVD decompositions.
//!
//! The default backend is [`ndarray`] and can be swapped out using crate
//! feature flags.

#[cfg(feature = "ndarray-backend")]
pub mod ndarray;

use core::fmt::Debug;

use num_traits::Float;

use crate::error::Result;

/// Memory order used when reshaping a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Order {
    /// Row-major: the last axis varies fastest.
    #[default]
    RowMajor,
    /// Column-major: the first axis varies fastest.
    ColumnMajor,
}

/// A trait that defines the contract for tensor operations that every
/// backend must fulfill.
///
/// The `Backend` trait is the only way the Tucker types touch numbers. Every
/// compressed tensor is parameterized by its backend, so the choice is fixed
/// when the instance is built and never changes under it. All functions are
/// pure: they borrow their inputs and return freshly allocated tensors.
///
/// Some methods in this trait are marked `unsafe` because they do not perform
/// any invariant checks (e.g., for shape compatibility). The caller (typically
/// one of the Tucker types) is responsible for ensuring all preconditions are
/// met before calling these functions.
pub trait Backend {
    /// The scalar element type.
    type Primitive: Float + Debug + 'static;

    /// The concrete tensor representation provided by the backend.
    type Tensor: Clone + Debug;

    /// Returns the number of dimensions of the tensor.
    fn ndim(tensor: &Self::Tensor) -> usize;

    /// Returns the shape of the tensor as a slice of dimensions.
    fn shape(tensor: &Self::Tensor) -> &[usize];

    /// Creates a tensor with all elements set to zero, with the given shape.
    ///
    /// # Safety
    ///
    /// The caller must ensure that no dimensions overflow `isize` and the
    /// product of axis lengths does not overflow [`isize::MAX`].
    unsafe fn zeros(shape: &[usize]) -> Self::Tensor;

    /// Creates a tensor from row-major data.
    ///
    /// # Safety
    ///
    /// See the safety notes for [`Backend::zeros()`]. Additionally, the
    /// length of `data` must equal the product of `shape`.
    unsafe fn from_vec(data: Vec<Self::Primitive>, shape: &[usize]) -> Self::Tensor;

    /// Elementwise sum of two tensors.
    ///
    /// # Safety
    ///
    /// Both tensors must have the same shape.
    unsafe fn add(lhs: &Self::Tensor, rhs: &Self::Tensor) -> Self::Tensor;

    /// Elementwise product of two tensors.
    ///
    /// # Safety
    ///
    /// Both tensors must have the same shape.
    unsafe fn mul(lhs: &Self::Tensor, rhs: &Self::Tensor) -> Self::Tensor;

    /// Multiplies every element by `scalar`.
    fn scale(tensor: &Self::Tensor, scalar: Self::Primitive) -> Self::Tensor;

    /// Sum of all elements. For a zero-dimensional tensor this is its value.
    fn sum(tensor: &Self::Tensor) -> Self::Primitive;

    /// Frobenius norm of the tensor.
    fn norm(tensor: &Self::Tensor) -> Self::Primitive;

    /// Square root of a scalar. Negative input yields `NaN`.
    #[inline]
    fn sqrt(value: Self::Primitive) -> Self::Primitive {
        value.sqrt()
    }

    /// Transpose of a matrix.
    ///
    /// # Errors
    ///
    /// Fails if `matrix` is not two-dimensional.
    fn transpose(matrix: &Self::Tensor) -> Result<Self::Tensor>;

    /// Matrix product `lhs @ rhs`.
    ///
    /// # Errors
    ///
    /// Fails if either tensor is not two-dimensional or the column count of
    /// `lhs` differs from the row count of `rhs`.
    fn matmul(lhs: &Self::Tensor, rhs: &Self::Tensor) -> Result<Self::Tensor>;

    /// Reorders the axes of a tensor.
    ///
    /// # Errors
    ///
    /// Fails if `axes` is not a permutation of `0..ndim`.
    fn permute(tensor: &Self::Tensor, axes: &[usize]) -> Result<Self::Tensor>;

    /// Reshapes a tensor, reading and writing elements in `order`.
    ///
    /// # Errors
    ///
    /// Fails if the element counts differ.
    fn reshape(
        tensor: &Self::Tensor,
        shape: &[usize],
        order: Order,
    ) -> Result<Self::Tensor>;

    /// Pads a tensor with zeros; `widths[axis]` is `(before, after)`.
    ///
    /// # Safety
    ///
    /// `widths` must have one entry per axis.
    unsafe fn pad(tensor: &Self::Tensor, widths: &[(usize, usize)]) -> Self::Tensor;

    /// Joins tensors along an existing axis.
    ///
    /// # Errors
    ///
    /// Fails if the tensors differ on any other axis.
    fn concatenate(tensors: &[&Self::Tensor], axis: usize) -> Result<Self::Tensor>;

    /// Keeps the first `len` entries along `axis`.
    ///
    /// # Safety
    ///
    /// `axis` must be in range and `len` must not exceed its length.
    unsafe fn take(tensor: &Self::Tensor, axis: usize, len: usize) -> Self::Tensor;

    /// Generalized multi-operand contraction in einsum notation, e.g.
    /// `"ab,ca,db->cd"`.
    ///
    /// # Errors
    ///
    /// Fails on malformed notation or operands that disagree with it.
    fn einsum(notation: &str, operands: &[&Self::Tensor]) -> Result<Self::Tensor>;

    /// Thin QR decomposition of a matrix, returning `(Q, R)`.
    ///
    /// # Errors
    ///
    /// Fails if `matrix` is not two-dimensional.
    fn qr(matrix: &Self::Tensor) -> Result<(Self::Tensor, Self::Tensor)>;

    /// Thin SVD of a matrix, returning `(U, S, Vt)` with the singular values
    /// in descending order.
    ///
    /// # Errors
    ///
    /// Fails if `matrix` is not two-dimensional or the iteration does not
    /// converge.
    fn svd(
        matrix: &Self::Tensor,
    ) -> Result<(Self::Tensor, Vec<Self::Primitive>, Self::Tensor)>;
}

cfg_if::cfg_if! {
    if #[cfg(feature = "ndarray-backend")] {
        /// Dynamically configured type alias for the selected backend, based
        /// on crate feature flags.
        pub type SelectedBackend<T> = ndarray::NdarrayBackend<T>;
    } else {
        compile_error!(
            "A backend feature must be enabled. Available: `ndarray-backend`"
        );
    }
}
