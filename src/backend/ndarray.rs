//! [`ndarray`] crate backend.
//!
//! Dense storage and elementwise math come from [`ndarray`], QR and SVD from
//! [`nalgebra`].

mod einsum;

use core::fmt::Debug;
use core::marker::PhantomData;

use nalgebra::{DMatrix, RealField, SVD};
use ndarray::{
    Array2, ArrayD, ArrayView2, Axis, Ix2, IxDyn, LinalgScalar,
    Order as MemoryOrder, ScalarOperand, ShapeError, Slice,
};
use num_traits::Float;

use crate::backend::{Backend, Order};
use crate::error::{Error, Result};

/// Marker type for the [`ndarray`] backend.
#[derive(Debug)]
pub struct NdarrayBackend<T>
where
    T: Clone,
{
    _marker: PhantomData<T>,
}

impl<T> Backend for NdarrayBackend<T>
where
    T: Float + RealField + LinalgScalar + ScalarOperand + Debug,
{
    type Primitive = T;
    type Tensor = ArrayD<T>;

    #[inline]
    fn ndim(tensor: &Self::Tensor) -> usize {
        tensor.ndim()
    }

    #[inline]
    fn shape(tensor: &Self::Tensor) -> &[usize] {
        tensor.shape()
    }

    #[inline]
    unsafe fn zeros(shape: &[usize]) -> Self::Tensor {
        ArrayD::zeros(IxDyn(shape))
    }

    #[inline]
    unsafe fn from_vec(
        data: Vec<Self::Primitive>,
        shape: &[usize],
    ) -> Self::Tensor {
        // SAFETY: The caller has already guaranteed that the shape is valid
        // and the element count in `data` matches the shape's requirements.
        unsafe { ArrayD::from_shape_vec_unchecked(IxDyn(shape), data) }
    }

    #[inline]
    unsafe fn add(lhs: &Self::Tensor, rhs: &Self::Tensor) -> Self::Tensor {
        lhs + rhs
    }

    #[inline]
    unsafe fn mul(lhs: &Self::Tensor, rhs: &Self::Tensor) -> Self::Tensor {
        lhs * rhs
    }

    #[inline]
    fn scale(tensor: &Self::Tensor, scalar: Self::Primitive) -> Self::Tensor {
        tensor * scalar
    }

    #[inline]
    fn sum(tensor: &Self::Tensor) -> Self::Primitive {
        tensor.sum()
    }

    fn norm(tensor: &Self::Tensor) -> Self::Primitive {
        let squares = tensor
            .iter()
            .fold(<T as num_traits::Zero>::zero(), |acc, &value| {
                acc + value * value
            });
        Float::sqrt(squares)
    }

    fn transpose(matrix: &Self::Tensor) -> Result<Self::Tensor> {
        Ok(as_matrix(matrix)?.t().to_owned().into_dyn())
    }

    fn matmul(lhs: &Self::Tensor, rhs: &Self::Tensor) -> Result<Self::Tensor> {
        let lhs = as_matrix(lhs)?;
        let rhs = as_matrix(rhs)?;
        if lhs.ncols() != rhs.nrows() {
            return Err(Error::DimensionMismatch {
                operation: "matmul",
                expected: lhs.ncols(),
                actual: rhs.nrows(),
            });
        }

        Ok(lhs.dot(&rhs).into_dyn())
    }

    fn permute(tensor: &Self::Tensor, axes: &[usize]) -> Result<Self::Tensor> {
        let mut seen = vec![false; tensor.ndim()];
        let valid = axes.len() == tensor.ndim()
            && axes.iter().all(|&axis| {
                seen.get_mut(axis)
                    .is_some_and(|slot| !core::mem::replace(slot, true))
            });
        if !valid {
            return Err(Error::Backend(format!(
                "{axes:?} is not a permutation of {} axes",
                tensor.ndim()
            )));
        }

        Ok(tensor
            .view()
            .permuted_axes(IxDyn(axes))
            .as_standard_layout()
            .into_owned())
    }

    fn reshape(
        tensor: &Self::Tensor,
        shape: &[usize],
        order: Order,
    ) -> Result<Self::Tensor> {
        let order = match order {
            Order::RowMajor => MemoryOrder::RowMajor,
            Order::ColumnMajor => MemoryOrder::ColumnMajor,
        };

        tensor
            .to_shape((shape.to_vec(), order))
            .map(|reshaped| reshaped.into_owned())
            .map_err(shape_error)
    }

    unsafe fn pad(
        tensor: &Self::Tensor,
        widths: &[(usize, usize)],
    ) -> Self::Tensor {
        let shape: Vec<usize> = tensor
            .shape()
            .iter()
            .zip(widths)
            .map(|(&len, &(before, after))| before + len + after)
            .collect();
        let mut padded = ArrayD::zeros(IxDyn(&shape));
        padded
            .slice_each_axis_mut(|description| {
                let axis = description.axis.index();
                let before = widths[axis].0;
                Slice::from(before..before + tensor.shape()[axis])
            })
            .assign(tensor);

        padded
    }

    fn concatenate(
        tensors: &[&Self::Tensor],
        axis: usize,
    ) -> Result<Self::Tensor> {
        let views: Vec<_> = tensors.iter().map(|tensor| tensor.view()).collect();

        ndarray::concatenate(Axis(axis), &views).map_err(shape_error)
    }

    #[inline]
    unsafe fn take(
        tensor: &Self::Tensor,
        axis: usize,
        len: usize,
    ) -> Self::Tensor {
        tensor.slice_axis(Axis(axis), Slice::from(0..len)).to_owned()
    }

    fn einsum(
        notation: &str,
        operands: &[&Self::Tensor],
    ) -> Result<Self::Tensor> {
        tracing::trace!(notation, operands = operands.len(), "einsum");
        einsum::contract(notation, operands)
    }

    fn qr(matrix: &Self::Tensor) -> Result<(Self::Tensor, Self::Tensor)> {
        let decomposition = to_dmatrix(matrix)?.qr();

        Ok((from_dmatrix(&decomposition.q()), from_dmatrix(&decomposition.r())))
    }

    fn svd(
        matrix: &Self::Tensor,
    ) -> Result<(Self::Tensor, Vec<Self::Primitive>, Self::Tensor)> {
        let decomposition =
            SVD::try_new(to_dmatrix(matrix)?, true, true, <T as Float>::epsilon(), 0)
                .ok_or_else(|| {
                    Error::Decomposition("SVD did not converge".to_owned())
                })?;
        let (Some(u), Some(v_t)) = (decomposition.u, decomposition.v_t) else {
            return Err(Error::Decomposition(
                "SVD did not compute singular vectors".to_owned(),
            ));
        };
        let singular_values =
            decomposition.singular_values.iter().copied().collect();

        Ok((from_dmatrix(&u), singular_values, from_dmatrix(&v_t)))
    }
}

fn shape_error(error: ShapeError) -> Error {
    Error::Backend(error.to_string())
}

fn as_matrix<T>(tensor: &ArrayD<T>) -> Result<ArrayView2<'_, T>> {
    tensor.view().into_dimensionality::<Ix2>().map_err(shape_error)
}

fn to_dmatrix<T>(tensor: &ArrayD<T>) -> Result<DMatrix<T>>
where
    T: RealField + Copy,
{
    let matrix = as_matrix(tensor)?;

    Ok(DMatrix::from_fn(matrix.nrows(), matrix.ncols(), |row, col| {
        matrix[[row, col]]
    }))
}

fn from_dmatrix<T>(matrix: &DMatrix<T>) -> ArrayD<T>
where
    T: RealField + Copy,
{
    Array2::from_shape_fn((matrix.nrows(), matrix.ncols()), |(row, col)| {
        matrix[(row, col)]
    })
    .into_dyn()
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{ArrayD, IxDyn, array};

    use crate::backend::{Backend, Order, ndarray::NdarrayBackend};

    type B = NdarrayBackend<f64>;

    #[test]
    fn ndarray_zeros_has_correct_shape() {
        let shape = &[2, 3];
        let array = unsafe { B::zeros(shape) };

        assert_eq!(array.shape(), shape);
        assert!(array.iter().all(|&value| value == 0.0));
    }

    #[test]
    fn ndarray_shape_and_ndim_are_correct() {
        let shape = &[2, 3, 4];
        let array = unsafe { B::zeros(shape) };

        assert_eq!(B::shape(&array), shape);
        assert_eq!(B::ndim(&array), shape.len());
    }

    #[test]
    fn ndarray_from_vec_is_correct() {
        let shape = &[2, 3];
        let data = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let data_clone = data.clone();
        let array = unsafe { B::from_vec(data, shape) };

        assert_eq!(array.shape(), shape);
        assert_eq!(array.into_raw_vec_and_offset().0, data_clone);
    }

    #[test]
    fn ndarray_add_and_mul_are_elementwise() {
        let lhs = array![[1.0, 2.0], [3.0, 4.0]].into_dyn();
        let rhs = array![[5.0, 6.0], [7.0, 8.0]].into_dyn();

        let sum = unsafe { B::add(&lhs, &rhs) };
        let product = unsafe { B::mul(&lhs, &rhs) };

        assert_eq!(sum, array![[6.0, 8.0], [10.0, 12.0]].into_dyn());
        assert_eq!(product, array![[5.0, 12.0], [21.0, 32.0]].into_dyn());
    }

    #[test]
    fn ndarray_scale_and_norm() {
        let tensor = array![[3.0, 0.0], [0.0, 4.0]].into_dyn();

        assert_eq!(B::norm(&tensor), 5.0);
        assert_eq!(B::norm(&B::scale(&tensor, 2.0)), 10.0);
        assert_eq!(B::sum(&tensor), 7.0);
    }

    #[test]
    fn ndarray_matmul_rejects_mismatched_inner_dimension() {
        let lhs = ArrayD::<f64>::zeros(IxDyn(&[2, 3]));
        let rhs = ArrayD::<f64>::zeros(IxDyn(&[2, 3]));

        assert!(B::matmul(&lhs, &rhs).is_err());
    }

    #[test]
    fn ndarray_permute_rejects_repeated_axes() {
        let tensor = ArrayD::<f64>::zeros(IxDyn(&[2, 3]));

        assert!(B::permute(&tensor, &[0, 0]).is_err());
        assert_eq!(B::permute(&tensor, &[1, 0]).unwrap().shape(), &[3, 2]);
    }

    #[test]
    fn ndarray_column_major_reshape_runs_first_axis_fastest() {
        let flat = array![0.0, 1.0, 2.0, 3.0, 4.0, 5.0].into_dyn();

        let matrix = B::reshape(&flat, &[2, 3], Order::ColumnMajor).unwrap();

        assert_eq!(matrix, array![[0.0, 2.0, 4.0], [1.0, 3.0, 5.0]].into_dyn());
    }

    #[test]
    fn ndarray_pad_places_block_after_leading_zeros() {
        let tensor = array![[1.0, 2.0]].into_dyn();

        let padded = unsafe { B::pad(&tensor, &[(0, 1), (2, 0)]) };

        assert_eq!(
            padded,
            array![[0.0, 0.0, 1.0, 2.0], [0.0, 0.0, 0.0, 0.0]].into_dyn()
        );
    }

    #[test]
    fn ndarray_concatenate_and_take_along_columns() {
        let lhs = array![[1.0], [2.0]].into_dyn();
        let rhs = array![[3.0], [4.0]].into_dyn();

        let joined = B::concatenate(&[&lhs, &rhs], 1).unwrap();
        let first = unsafe { B::take(&joined, 1, 1) };

        assert_eq!(joined, array![[1.0, 3.0], [2.0, 4.0]].into_dyn());
        assert_eq!(first, lhs);
    }

    #[test]
    fn ndarray_qr_reproduces_matrix() {
        let matrix =
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]].into_dyn();

        let (q, r) = B::qr(&matrix).unwrap();
        let product = B::matmul(&q, &r).unwrap();

        assert_eq!(q.shape(), &[3, 2]);
        assert_eq!(r.shape(), &[2, 2]);
        for (&actual, &expected) in product.iter().zip(matrix.iter()) {
            assert_abs_diff_eq!(actual, expected, epsilon = 1e-12);
        }
    }

    #[test]
    fn ndarray_svd_orders_singular_values() {
        let matrix = array![[0.0, 1.0], [3.0, 0.0], [0.0, 0.0]].into_dyn();

        let (u, s, v_t) = B::svd(&matrix).unwrap();

        assert_eq!(u.shape(), &[3, 2]);
        assert_eq!(v_t.shape(), &[2, 2]);
        assert_abs_diff_eq!(s[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(s[1], 1.0, epsilon = 1e-12);
    }
}
