//! # The plain Tucker tensor
//!
//! A [`Tucker`] tensor stores a core of shape `r_1 x ... x r_d` and one factor
//! matrix of shape `n_i x r_i` per mode. The dense tensor it represents,
//!
//! ```text
//! T = G x_1 U_1 x_2 U_2 ... x_d U_d
//! ```
//!
//! is never formed unless [`Tucker::full`] is called: addition, scaling,
//! inner products, norms and mode products all work on the core and factors
//! directly.

use core::fmt;
use core::ops::{Mul, Neg};

use num_traits::One;

use crate::backend::Backend;
use crate::decomposition::{self, Truncation};
use crate::error::{Error, Result};
use crate::plan::{ContractionPlan, FactorSlot, ModeLayout, Operand};

/// How [`Tucker::norm`] computes the Frobenius norm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NormMethod {
    /// `sqrt(flat_inner(self, self))`. Cheap and built only from
    /// differentiable compositions, but rounding can push the radicand below
    /// zero for tensors close to zero, in which case the result is `NaN`.
    #[default]
    InnerProduct,
    /// Replaces every factor by the `R` of its QR decomposition and takes the
    /// dense norm of the much smaller result. Never negative, but densifies.
    Qr,
}

/// A tensor in Tucker format: a core and one factor matrix per mode.
pub struct Tucker<B: Backend> {
    core: B::Tensor,
    factors: Vec<B::Tensor>,
}

impl<B: Backend> Clone for Tucker<B> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            factors: self.factors.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for Tucker<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tucker")
            .field("core", &self.core)
            .field("factors", &self.factors)
            .finish()
    }
}

/// Checks that `factor` is a matrix with `rank` columns.
pub(crate) fn check_factor<B: Backend>(
    factor: &B::Tensor,
    mode: usize,
    rank: usize,
) -> Result<()> {
    let shape = B::shape(factor);
    if shape.len() != 2 || shape[1] != rank {
        return Err(Error::InvalidStructure(format!(
            "factor of mode {mode} has shape {shape:?}, expected (_, {rank})"
        )));
    }

    Ok(())
}

/// Checks that `matrix` can left-multiply a factor with `rows` rows.
pub(crate) fn check_mode_matrix<B: Backend>(
    operation: &'static str,
    matrix: &B::Tensor,
    rows: usize,
) -> Result<()> {
    let shape = B::shape(matrix);
    if shape.len() != 2 {
        return Err(Error::InvalidStructure(format!(
            "{operation}: expected a matrix, got shape {shape:?}"
        )));
    }
    if shape[1] != rows {
        return Err(Error::DimensionMismatch {
            operation,
            expected: rows,
            actual: shape[1],
        });
    }

    Ok(())
}

/// Block-diagonal direct sum of two cores along every mode but the first,
/// concatenated along the first.
pub(crate) fn direct_sum_cores<B: Backend>(
    lhs: &B::Tensor,
    rhs: &B::Tensor,
) -> Result<B::Tensor> {
    let (lhs_rank, rhs_rank) = (B::shape(lhs), B::shape(rhs));
    if lhs_rank.len() != rhs_rank.len() {
        return Err(Error::ShapeMismatch {
            operation: "add",
            lhs: lhs_rank.to_vec(),
            rhs: rhs_rank.to_vec(),
        });
    }
    let lhs_widths: Vec<_> = (0..lhs_rank.len())
        .map(|mode| if mode == 0 { (0, 0) } else { (0, rhs_rank[mode]) })
        .collect();
    let rhs_widths: Vec<_> = (0..rhs_rank.len())
        .map(|mode| if mode == 0 { (0, 0) } else { (lhs_rank[mode], 0) })
        .collect();

    // SAFETY: both width lists have one entry per axis of their core.
    let (lhs_padded, rhs_padded) =
        unsafe { (B::pad(lhs, &lhs_widths), B::pad(rhs, &rhs_widths)) };

    B::concatenate(&[&lhs_padded, &rhs_padded], 0)
}

/// Stacks two factors of the same mode side by side.
pub(crate) fn join_factors<B: Backend>(
    lhs: &B::Tensor,
    rhs: &B::Tensor,
) -> Result<B::Tensor> {
    B::concatenate(&[lhs, rhs], 1)
}

/// `other^T @ factor`: maps this tensor's rank on a mode to the other's.
pub(crate) fn gram<B: Backend>(
    factor: &B::Tensor,
    other: &B::Tensor,
) -> Result<B::Tensor> {
    B::matmul(&B::transpose(other)?, factor)
}

/// Sum of the elementwise product of two cores of equal shape.
pub(crate) fn core_inner<B: Backend>(
    intermediate: &B::Tensor,
    core: &B::Tensor,
) -> Result<B::Primitive> {
    if B::shape(intermediate) != B::shape(core) {
        return Err(Error::ShapeMismatch {
            operation: "flat_inner",
            lhs: B::shape(intermediate).to_vec(),
            rhs: B::shape(core).to_vec(),
        });
    }

    // SAFETY: shapes were checked above.
    Ok(B::sum(&unsafe { B::mul(intermediate, core) }))
}

impl<B: Backend> Tucker<B> {
    /// Creates a Tucker tensor from its core and one factor per mode.
    ///
    /// # Errors
    ///
    /// Fails if the number of factors differs from the order of the core, or
    /// factor `i` is not a matrix with `core.shape[i]` columns.
    pub fn new(core: B::Tensor, factors: Vec<B::Tensor>) -> Result<Self> {
        let rank = B::shape(&core);
        if rank.is_empty() || rank.len() != factors.len() {
            return Err(Error::InvalidStructure(format!(
                "core of shape {rank:?} with {} factors",
                factors.len()
            )));
        }
        for (mode, (factor, &rank)) in factors.iter().zip(rank).enumerate() {
            check_factor::<B>(factor, mode, rank)?;
        }

        Ok(Self { core, factors })
    }

    /// Skips validation; for callers that build factors from a valid tensor.
    pub(crate) fn from_parts(core: B::Tensor, factors: Vec<B::Tensor>) -> Self {
        Self { core, factors }
    }

    /// Compresses a dense tensor with a truncated HOSVD.
    ///
    /// # Errors
    ///
    /// Fails on a zero-dimensional tensor, a rank list of the wrong length,
    /// or a failed SVD.
    pub fn from_dense(
        dense: &B::Tensor,
        truncation: &Truncation<B::Primitive>,
    ) -> Result<Self> {
        let layout = ModeLayout::plain(B::ndim(dense));
        let decomposition = decomposition::hosvd::<B>(dense, &layout, truncation)?;

        Ok(Self {
            core: decomposition.core,
            factors: decomposition.regular_factors,
        })
    }

    #[must_use]
    pub const fn core(&self) -> &B::Tensor {
        &self.core
    }

    #[must_use]
    pub fn factors(&self) -> &[B::Tensor] {
        &self.factors
    }

    /// Splits the tensor into its core and factors.
    #[must_use]
    pub fn into_parts(self) -> (B::Tensor, Vec<B::Tensor>) {
        (self.core, self.factors)
    }

    /// Shape of the represented dense tensor.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.factors
            .iter()
            .map(|factor| B::shape(factor)[0])
            .collect()
    }

    /// Multilinear rank, i.e. the shape of the core.
    #[must_use]
    pub fn rank(&self) -> &[usize] {
        B::shape(&self.core)
    }

    #[must_use]
    pub fn ndim(&self) -> usize {
        B::ndim(&self.core)
    }

    /// Name of the element type.
    #[must_use]
    pub fn dtype(&self) -> &'static str {
        core::any::type_name::<B::Primitive>()
    }

    /// Number of stored scalars: core plus factors.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        let core: usize = self.rank().iter().product();
        let factors: usize = self
            .factors
            .iter()
            .map(|factor| B::shape(factor).iter().product::<usize>())
            .sum();

        core + factors
    }

    /// Reconstructs the dense tensor.
    ///
    /// # Errors
    ///
    /// Fails if the order exceeds what one contraction can label.
    pub fn full(&self) -> Result<B::Tensor> {
        ContractionPlan::reconstruction(&ModeLayout::plain(self.ndim()))?
            .execute::<B, _>(|operand| match operand {
                Operand::Core => Some(&self.core),
                Operand::Factor(FactorSlot::Regular(index)) => self.factors.get(index),
                _ => None,
            })
    }

    fn check_same_shape(&self, other: &Self, operation: &'static str) -> Result<()> {
        let (lhs, rhs) = (self.shape(), other.shape());
        if lhs != rhs {
            return Err(Error::ShapeMismatch { operation, lhs, rhs });
        }

        Ok(())
    }

    /// Sum of two tensors of the same shape. The rank of the result is the
    /// sum of both ranks on every mode.
    ///
    /// # Errors
    ///
    /// Fails if the shapes differ.
    pub fn try_add(&self, other: &Self) -> Result<Self> {
        self.check_same_shape(other, "add")?;
        let core = direct_sum_cores::<B>(&self.core, &other.core)?;
        let factors = self
            .factors
            .iter()
            .zip(&other.factors)
            .map(|(lhs, rhs)| join_factors::<B>(lhs, rhs))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { core, factors })
    }

    /// Difference of two tensors of the same shape.
    ///
    /// # Errors
    ///
    /// Fails if the shapes differ.
    pub fn try_sub(&self, other: &Self) -> Result<Self> {
        self.try_add(&-other)
    }

    /// Multiplies the tensor by a scalar; only the core changes.
    #[must_use]
    pub fn scale(&self, scalar: B::Primitive) -> Self {
        Self {
            core: B::scale(&self.core, scalar),
            factors: self.factors.clone(),
        }
    }

    /// Frobenius inner product, computed on the cores after mapping every
    /// mode of `self` onto the factor basis of `other`.
    ///
    /// # Errors
    ///
    /// Fails if the shapes differ.
    pub fn flat_inner(&self, other: &Self) -> Result<B::Primitive> {
        self.check_same_shape(other, "flat_inner")?;
        let grams = self
            .factors
            .iter()
            .zip(&other.factors)
            .map(|(factor, other)| gram::<B>(factor, other))
            .collect::<Result<Vec<_>>>()?;
        let intermediate =
            ContractionPlan::intermediate_core(&ModeLayout::plain(self.ndim()))?
                .execute::<B, _>(|operand| match operand {
                    Operand::Core => Some(&self.core),
                    Operand::Gram(FactorSlot::Regular(index)) => grams.get(index),
                    _ => None,
                })?;

        core_inner::<B>(&intermediate, &other.core)
    }

    /// Frobenius norm.
    ///
    /// # Errors
    ///
    /// Fails if a QR decomposition or contraction fails.
    pub fn norm(&self, method: NormMethod) -> Result<B::Primitive> {
        match method {
            NormMethod::InnerProduct => Ok(B::sqrt(self.flat_inner(self)?)),
            NormMethod::Qr => {
                let factors = self
                    .factors
                    .iter()
                    .map(|factor| B::qr(factor).map(|(_, r)| r))
                    .collect::<Result<Vec<_>>>()?;
                let reduced = Self {
                    core: self.core.clone(),
                    factors,
                };

                Ok(B::norm(&reduced.full()?))
            }
        }
    }

    /// Mode-`k` product `T x_k mat`: left-multiplies factor `k` by `mat`.
    /// The rank is unchanged and `shape[k]` becomes `mat.shape[0]`.
    ///
    /// # Errors
    ///
    /// Fails if `k` is out of range or `mat` does not have `shape[k]`
    /// columns.
    pub fn k_mode_product(&self, k: usize, mat: &B::Tensor) -> Result<Self> {
        let factor = self.factors.get(k).ok_or(Error::InvalidMode {
            mode: k,
            ndim: self.ndim(),
        })?;
        check_mode_matrix::<B>("k_mode_product", mat, B::shape(factor)[0])?;
        let product = B::matmul(mat, factor)?;

        let mut factors = self.factors.clone();
        factors[k] = product;

        Ok(Self {
            core: self.core.clone(),
            factors,
        })
    }
}

impl<B: Backend> Neg for &Tucker<B> {
    type Output = Tucker<B>;

    fn neg(self) -> Self::Output {
        self.scale(-<B::Primitive as One>::one())
    }
}

impl<B: Backend> Neg for Tucker<B> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        -&self
    }
}

impl<B: Backend> Mul<B::Primitive> for &Tucker<B> {
    type Output = Tucker<B>;

    fn mul(self, scalar: B::Primitive) -> Self::Output {
        self.scale(scalar)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, ArrayD};

    use crate::decomposition::Truncation;
    use crate::error::Error;
    use crate::testing::{Backend64, assert_close, random_tensor, random_tucker};
    use crate::tucker::{NormMethod, Tucker};

    #[test]
    fn tucker_new_validates_factor_ranks() {
        let core = random_tensor(&[2, 3], 0);
        let good = vec![random_tensor(&[4, 2], 1), random_tensor(&[5, 3], 2)];
        let bad = vec![random_tensor(&[4, 2], 1), random_tensor(&[5, 2], 2)];

        assert!(Tucker::<Backend64>::new(core.clone(), good).is_ok());
        assert!(matches!(
            Tucker::<Backend64>::new(core.clone(), bad),
            Err(Error::InvalidStructure(_))
        ));
        assert!(Tucker::<Backend64>::new(core, vec![random_tensor(&[4, 2], 1)]).is_err());
    }

    #[test]
    fn tucker_properties_follow_core_and_factors() {
        let tensor = random_tucker(&[4, 5, 6], &[2, 3, 2], 3);

        assert_eq!(tensor.shape(), vec![4, 5, 6]);
        assert_eq!(tensor.rank(), &[2, 3, 2]);
        assert_eq!(tensor.ndim(), 3);
        assert_eq!(tensor.dtype(), "f64");
        assert_eq!(tensor.parameter_count(), 12 + 8 + 15 + 12);
    }

    #[test]
    fn tucker_full_matches_mode_products() {
        let tensor = random_tucker(&[3, 4], &[2, 2], 5);
        let core = tensor.core().clone().into_dimensionality::<ndarray::Ix2>().unwrap();
        let u = tensor.factors()[0].clone().into_dimensionality::<ndarray::Ix2>().unwrap();
        let v = tensor.factors()[1].clone().into_dimensionality::<ndarray::Ix2>().unwrap();

        let expected: Array2<f64> = u.dot(&core).dot(&v.t());

        assert_close(&tensor.full().unwrap(), &expected.into_dyn(), 1e-12);
    }

    #[test]
    fn tucker_add_sums_dense_tensors_and_ranks() {
        let a = random_tucker(&[4, 3, 5], &[2, 2, 3], 11);
        let b = random_tucker(&[4, 3, 5], &[1, 3, 2], 12);

        let sum = a.try_add(&b).unwrap();

        assert_eq!(sum.rank(), &[3, 5, 5]);
        let expected: ArrayD<f64> = a.full().unwrap() + b.full().unwrap();
        assert_close(&sum.full().unwrap(), &expected, 1e-10);
    }

    #[test]
    fn tucker_add_rejects_different_shapes() {
        let a = random_tucker(&[4, 3], &[2, 2], 1);
        let b = random_tucker(&[4, 2], &[2, 2], 2);

        assert!(matches!(a.try_add(&b), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn tucker_sub_and_neg() {
        let a = random_tucker(&[3, 3, 3], &[2, 2, 2], 4);
        let b = random_tucker(&[3, 3, 3], &[2, 1, 2], 5);

        let difference = a.try_sub(&b).unwrap();
        let negated = -&a;

        let expected: ArrayD<f64> = a.full().unwrap() - b.full().unwrap();
        assert_close(&difference.full().unwrap(), &expected, 1e-10);
        assert_close(&negated.full().unwrap(), &(-a.full().unwrap()), 1e-12);
        assert_abs_diff_eq!(
            a.try_sub(&a).unwrap().norm(NormMethod::Qr).unwrap(),
            0.0,
            epsilon = 1e-10
        );
    }

    #[test]
    fn tucker_scale_only_touches_core() {
        let a = random_tucker(&[3, 4], &[2, 2], 8);

        let scaled = &a * 2.5;

        assert_eq!(scaled.factors(), a.factors());
        assert_close(&scaled.full().unwrap(), &(a.full().unwrap() * 2.5), 1e-12);
    }

    #[test]
    fn tucker_flat_inner_matches_dense_inner_product() {
        let a = random_tucker(&[4, 3, 5], &[2, 3, 2], 21);
        let b = random_tucker(&[4, 3, 5], &[3, 1, 2], 22);

        let expected = (a.full().unwrap() * b.full().unwrap()).sum();

        assert_abs_diff_eq!(a.flat_inner(&b).unwrap(), expected, epsilon = 1e-10);
        assert_abs_diff_eq!(b.flat_inner(&a).unwrap(), expected, epsilon = 1e-10);
    }

    #[test]
    fn tucker_norm_methods_agree() {
        let a = random_tucker(&[5, 4, 3], &[2, 3, 2], 31);

        let dense = a.full().unwrap();
        let expected = dense.iter().map(|value| value * value).sum::<f64>().sqrt();

        assert_abs_diff_eq!(
            a.norm(NormMethod::InnerProduct).unwrap(),
            expected,
            epsilon = 1e-10
        );
        assert_abs_diff_eq!(a.norm(NormMethod::Qr).unwrap(), expected, epsilon = 1e-10);
    }

    #[test]
    fn tucker_k_mode_product_changes_one_mode() {
        let a = random_tucker(&[3, 4, 5], &[2, 2, 2], 41);
        let mat = random_tensor(&[7, 4], 42);

        let product = a.k_mode_product(1, &mat).unwrap();

        assert_eq!(product.shape(), vec![3, 7, 5]);
        assert_eq!(product.rank(), a.rank());
    }

    #[test]
    fn tucker_k_mode_product_with_identity_is_noop() {
        let a = random_tucker(&[3, 4, 5], &[2, 2, 2], 43);
        let identity = Array2::<f64>::eye(5).into_dyn();

        let product = a.k_mode_product(2, &identity).unwrap();

        assert_close(&product.full().unwrap(), &a.full().unwrap(), 1e-12);
    }

    #[test]
    fn tucker_k_mode_product_validates_input() {
        let a = random_tucker(&[3, 4], &[2, 2], 44);

        assert_eq!(
            a.k_mode_product(2, &random_tensor(&[2, 4], 0)).unwrap_err(),
            Error::InvalidMode { mode: 2, ndim: 2 }
        );
        assert_eq!(
            a.k_mode_product(0, &random_tensor(&[2, 4], 0)).unwrap_err(),
            Error::DimensionMismatch {
                operation: "k_mode_product",
                expected: 3,
                actual: 4
            }
        );
    }

    #[test]
    fn tucker_from_dense_round_trips_within_tolerance() {
        let dense = random_tensor(&[4, 5, 3], 51);

        let exact = Tucker::<Backend64>::from_dense(&dense, &Truncation::Tolerance(1e-12))
            .unwrap();
        let truncated =
            Tucker::<Backend64>::from_dense(&dense, &Truncation::Tolerance(0.3)).unwrap();

        assert_close(&exact.full().unwrap(), &dense, 1e-10);
        let norm = dense.iter().map(|value| value * value).sum::<f64>().sqrt();
        let error = (&truncated.full().unwrap() - &dense)
            .iter()
            .map(|value| value * value)
            .sum::<f64>()
            .sqrt();
        assert!(error <= 0.3 * norm + 1e-12);
    }
}
