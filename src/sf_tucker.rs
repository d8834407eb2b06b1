//! # Shared-factor Tucker tensors
//!
//! An [`SFTucker`] tensor is a Tucker tensor in which a designated set of
//! modes, the symmetric modes, all read from one shared factor matrix. The
//! remaining modes keep a private factor each, stored in mode order with the
//! shared modes skipped.
//!
//! Every binary operation first compares the mode layouts of its operands.
//! When they differ the operation is not defined on the shared-factor level:
//! both operands are expanded to plain [`Tucker`] tensors and the plain
//! operation is used instead.

pub mod matrix;

use core::fmt;
use core::ops::{Mul, Neg};

use num_traits::One;

use crate::backend::Backend;
use crate::decomposition::{self, Truncation};
use crate::error::{Error, Result};
use crate::plan::{ContractionPlan, FactorSlot, ModeLayout, Operand};
use crate::tucker::{
    NormMethod, Tucker, check_factor, check_mode_matrix, core_inner, direct_sum_cores, gram,
    join_factors,
};

/// A Tucker tensor whose symmetric modes share one factor matrix.
pub struct SFTucker<B: Backend> {
    core: B::Tensor,
    regular_factors: Vec<B::Tensor>,
    shared_factor: Option<B::Tensor>,
    layout: ModeLayout,
}

impl<B: Backend> Clone for SFTucker<B> {
    fn clone(&self) -> Self {
        Self {
            core: self.core.clone(),
            regular_factors: self.regular_factors.clone(),
            shared_factor: self.shared_factor.clone(),
            layout: self.layout.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for SFTucker<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SFTucker")
            .field("core", &self.core)
            .field("regular_factors", &self.regular_factors)
            .field("shared_factor", &self.shared_factor)
            .field("symmetric_modes", &self.layout.shared_modes())
            .finish()
    }
}

impl<B: Backend> From<Tucker<B>> for SFTucker<B> {
    /// Wraps a plain tensor; no mode is shared.
    fn from(tensor: Tucker<B>) -> Self {
        let (core, regular_factors) = tensor.into_parts();
        let layout = ModeLayout::plain(regular_factors.len());

        Self {
            core,
            regular_factors,
            shared_factor: None,
            layout,
        }
    }
}

impl<B: Backend> SFTucker<B> {
    /// Creates a tensor from its core, the private factors of the regular
    /// modes (in mode order), the symmetric modes and their shared factor.
    ///
    /// # Errors
    ///
    /// Fails if a symmetric mode is out of range or repeated, the number of
    /// regular factors does not cover the other modes, a shared factor is
    /// given without symmetric modes (or the reverse), or a factor's column
    /// count differs from the core rank of a mode that reads it.
    pub fn new(
        core: B::Tensor,
        regular_factors: Vec<B::Tensor>,
        symmetric_modes: &[usize],
        shared_factor: Option<B::Tensor>,
    ) -> Result<Self> {
        let rank = B::shape(&core);
        if rank.is_empty() {
            return Err(Error::InvalidStructure(
                "core must have at least one mode".to_owned(),
            ));
        }
        let layout = ModeLayout::new(rank.len(), symmetric_modes)?;
        if regular_factors.len() != layout.regular_count() {
            return Err(Error::InvalidStructure(format!(
                "{} regular factors for {} regular modes",
                regular_factors.len(),
                layout.regular_count()
            )));
        }
        if shared_factor.is_some() != layout.has_shared() {
            return Err(Error::InvalidStructure(format!(
                "shared factor present: {}, symmetric modes: {symmetric_modes:?}",
                shared_factor.is_some()
            )));
        }
        for (mode, slot) in layout.slots().enumerate() {
            let factor = match slot {
                FactorSlot::Regular(index) => regular_factors.get(index),
                FactorSlot::Shared => shared_factor.as_ref(),
            };
            if let Some(factor) = factor {
                check_factor::<B>(factor, mode, rank[mode])?;
            }
        }

        Ok(Self {
            core,
            regular_factors,
            shared_factor,
            layout,
        })
    }

    /// Compresses a dense tensor whose last `ds` modes are symmetric.
    ///
    /// The shared factor is fitted to all symmetric modes at once, so those
    /// modes must have equal sizes.
    ///
    /// # Errors
    ///
    /// Fails if `ds` exceeds the order, the symmetric modes differ in size,
    /// or the decomposition fails.
    pub fn from_dense(
        dense: &B::Tensor,
        ds: usize,
        truncation: &Truncation<B::Primitive>,
    ) -> Result<Self> {
        let layout = ModeLayout::trailing(B::ndim(dense), ds)?;
        let decomposition = decomposition::hosvd::<B>(dense, &layout, truncation)?;

        Ok(Self {
            core: decomposition.core,
            regular_factors: decomposition.regular_factors,
            shared_factor: decomposition.shared_factor,
            layout,
        })
    }

    #[must_use]
    pub const fn core(&self) -> &B::Tensor {
        &self.core
    }

    #[must_use]
    pub fn regular_factors(&self) -> &[B::Tensor] {
        &self.regular_factors
    }

    #[must_use]
    pub const fn shared_factor(&self) -> Option<&B::Tensor> {
        self.shared_factor.as_ref()
    }

    /// The symmetric modes in increasing order.
    #[must_use]
    pub fn symmetric_modes(&self) -> &[usize] {
        self.layout.shared_modes()
    }

    #[must_use]
    pub const fn layout(&self) -> &ModeLayout {
        &self.layout
    }

    /// The factor stored in `slot`.
    #[must_use]
    pub fn factor(&self, slot: FactorSlot) -> Option<&B::Tensor> {
        match slot {
            FactorSlot::Regular(index) => self.regular_factors.get(index),
            FactorSlot::Shared => self.shared_factor.as_ref(),
        }
    }

    /// Factors of every mode in mode order, the shared one repeated.
    fn mode_factors(&self) -> impl Iterator<Item = &B::Tensor> {
        // every slot of the layout resolves; `new` checks it
        self.layout.slots().filter_map(move |slot| self.factor(slot))
    }

    /// Shape of the represented dense tensor.
    #[must_use]
    pub fn shape(&self) -> Vec<usize> {
        self.mode_factors()
            .map(|factor| B::shape(factor)[0])
            .collect()
    }

    #[must_use]
    pub fn rank(&self) -> &[usize] {
        B::shape(&self.core)
    }

    #[must_use]
    pub const fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    #[must_use]
    pub fn dtype(&self) -> &'static str {
        core::any::type_name::<B::Primitive>()
    }

    /// Number of stored scalars; the shared factor is counted once.
    #[must_use]
    pub fn parameter_count(&self) -> usize {
        let size = |tensor: &B::Tensor| B::shape(tensor).iter().product::<usize>();

        size(&self.core)
            + self.regular_factors.iter().map(size).sum::<usize>()
            + self.shared_factor.as_ref().map_or(0, size)
    }

    /// Reconstructs the dense tensor, applying the shared factor on every
    /// symmetric mode.
    ///
    /// # Errors
    ///
    /// Fails if the order exceeds what one contraction can label.
    pub fn full(&self) -> Result<B::Tensor> {
        ContractionPlan::reconstruction(&self.layout)?.execute::<B, _>(|operand| {
            match operand {
                Operand::Core => Some(&self.core),
                Operand::Factor(slot) => self.factor(slot),
                _ => None,
            }
        })
    }

    /// Expands the shared factor into one private copy per symmetric mode.
    #[must_use]
    pub fn to_regular_tucker(&self) -> Tucker<B> {
        Tucker::from_parts(self.core.clone(), self.mode_factors().cloned().collect())
    }

    fn check_same_shape(&self, other: &Self, operation: &'static str) -> Result<()> {
        let (lhs, rhs) = (self.shape(), other.shape());
        if lhs != rhs {
            return Err(Error::ShapeMismatch { operation, lhs, rhs });
        }

        Ok(())
    }

    /// Sum of two tensors of the same shape.
    ///
    /// With equal symmetric modes the cores form a direct sum and both the
    /// regular and the shared factors are stacked side by side. Otherwise
    /// the sum is taken between the plain expansions and has no shared
    /// modes.
    ///
    /// # Errors
    ///
    /// Fails if the shapes differ.
    pub fn try_add(&self, other: &Self) -> Result<Self> {
        self.check_same_shape(other, "add")?;
        if self.layout != other.layout {
            tracing::debug!(
                lhs = ?self.symmetric_modes(),
                rhs = ?other.symmetric_modes(),
                "symmetric modes differ, adding plain expansions"
            );
            return self
                .to_regular_tucker()
                .try_add(&other.to_regular_tucker())
                .map(Self::from);
        }

        let core = direct_sum_cores::<B>(&self.core, &other.core)?;
        let regular_factors = self
            .regular_factors
            .iter()
            .zip(&other.regular_factors)
            .map(|(lhs, rhs)| join_factors::<B>(lhs, rhs))
            .collect::<Result<Vec<_>>>()?;
        let shared_factor = match (&self.shared_factor, &other.shared_factor) {
            (Some(lhs), Some(rhs)) => Some(join_factors::<B>(lhs, rhs)?),
            _ => None,
        };

        Ok(Self {
            core,
            regular_factors,
            shared_factor,
            layout: self.layout.clone(),
        })
    }

    /// Difference of two tensors of the same shape; see [`Self::try_add`].
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
            regular_factors: self.regular_factors.clone(),
            shared_factor: self.shared_factor.clone(),
            layout: self.layout.clone(),
        }
    }

    /// Frobenius inner product on the compressed representation. The shared
    /// Gram matrix is formed once and applied on every symmetric mode.
    /// Operands with different symmetric modes use the plain inner product.
    ///
    /// # Errors
    ///
    /// Fails if the shapes differ.
    pub fn flat_inner(&self, other: &Self) -> Result<B::Primitive> {
        self.check_same_shape(other, "flat_inner")?;
        if self.layout != other.layout {
            tracing::debug!(
                lhs = ?self.symmetric_modes(),
                rhs = ?other.symmetric_modes(),
                "symmetric modes differ, using the plain inner product"
            );
            return self
                .to_regular_tucker()
                .flat_inner(&other.to_regular_tucker());
        }

        let grams = self
            .regular_factors
            .iter()
            .zip(&other.regular_factors)
            .map(|(factor, other)| gram::<B>(factor, other))
            .collect::<Result<Vec<_>>>()?;
        let shared_gram = match (&self.shared_factor, &other.shared_factor) {
            (Some(factor), Some(other)) => Some(gram::<B>(factor, other)?),
            _ => None,
        };
        let intermediate = ContractionPlan::intermediate_core(&self.layout)?
            .execute::<B, _>(|operand| match operand {
                Operand::Core => Some(&self.core),
                Operand::Gram(FactorSlot::Regular(index)) => grams.get(index),
                Operand::Gram(FactorSlot::Shared) => shared_gram.as_ref(),
                _ => None,
            })?;

        core_inner::<B>(&intermediate, &other.core)
    }

    /// Frobenius norm; see [`NormMethod`] for the trade-offs.
    ///
    /// # Errors
    ///
    /// Fails if a QR decomposition or contraction fails.
    pub fn norm(&self, method: NormMethod) -> Result<B::Primitive> {
        match method {
            NormMethod::InnerProduct => Ok(B::sqrt(self.flat_inner(self)?)),
            NormMethod::Qr => {
                let r_factor = |factor: &B::Tensor| B::qr(factor).map(|(_, r)| r);
                let reduced = Self {
                    core: self.core.clone(),
                    regular_factors: self
                        .regular_factors
                        .iter()
                        .map(r_factor)
                        .collect::<Result<Vec<_>>>()?,
                    shared_factor: self.shared_factor.as_ref().map(r_factor).transpose()?,
                    layout: self.layout.clone(),
                };

                Ok(B::norm(&reduced.full()?))
            }
        }
    }

    /// Mode-`k` product `T x_k mat`.
    ///
    /// On a regular mode only that mode's private factor changes. A
    /// symmetric mode cannot change alone without breaking the shared
    /// factor, so the tensor is expanded to plain form first and the result
    /// has no shared modes.
    ///
    /// # Errors
    ///
    /// Fails if `k` is out of range or `mat` does not have `shape[k]`
    /// columns.
    pub fn k_mode_product(&self, k: usize, mat: &B::Tensor) -> Result<Self> {
        if k >= self.ndim() {
            return Err(Error::InvalidMode {
                mode: k,
                ndim: self.ndim(),
            });
        }
        let index = match self.layout.factor_slot(k) {
            FactorSlot::Shared => {
                tracing::debug!(mode = k, "mode product on a symmetric mode, expanding");
                return self
                    .to_regular_tucker()
                    .k_mode_product(k, mat)
                    .map(Self::from);
            }
            FactorSlot::Regular(index) => index,
        };
        let factor = &self.regular_factors[index];
        check_mode_matrix::<B>("k_mode_product", mat, B::shape(factor)[0])?;

        let mut regular_factors = self.regular_factors.clone();
        regular_factors[index] = B::matmul(mat, factor)?;

        Ok(Self {
            core: self.core.clone(),
            regular_factors,
            shared_factor: self.shared_factor.clone(),
            layout: self.layout.clone(),
        })
    }

    /// Left-multiplies the shared factor by `mat`, which applies the product
    /// on every symmetric mode at once.
    ///
    /// # Errors
    ///
    /// Fails if there are no symmetric modes or `mat` does not have as many
    /// columns as the shared factor has rows.
    pub fn symmetric_modes_product(&self, mat: &B::Tensor) -> Result<Self> {
        let shared = self.shared_factor.as_ref().ok_or(Error::NoSharedModes)?;
        check_mode_matrix::<B>("symmetric_modes_product", mat, B::shape(shared)[0])?;

        Ok(Self {
            core: self.core.clone(),
            regular_factors: self.regular_factors.clone(),
            shared_factor: Some(B::matmul(mat, shared)?),
            layout: self.layout.clone(),
        })
    }
}

impl<B: Backend> Neg for &SFTucker<B> {
    type Output = SFTucker<B>;

    fn neg(self) -> Self::Output {
        self.scale(-<B::Primitive as One>::one())
    }
}

impl<B: Backend> Neg for SFTucker<B> {
    type Output = Self;

    fn neg(self) -> Self::Output {
        -&self
    }
}

impl<B: Backend> Mul<B::Primitive> for &SFTucker<B> {
    type Output = SFTucker<B>;

    fn mul(self, scalar: B::Primitive) -> Self::Output {
        self.scale(scalar)
    }
}
