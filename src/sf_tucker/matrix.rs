//! # The matrix view
//!
//! An [`SFTuckerMatrix`] reads a shared-factor Tucker tensor as a linear
//! operator. Every mode `i` of size `n_i * m_i` is split into a row index
//! `j < n_i` and a column index `k < m_i`, with factor row `j + n_i * k`
//! holding entry `(j, k)`. Reshaping a factor in column-major order
//! therefore yields an `(n_i, m_i, r_i)` operator factor.
//!
//! The symmetric modes are always the trailing `ds` modes and share one
//! split, so the shared factor reshapes to the same operator factor on every
//! one of them.

use core::fmt;

use crate::backend::{Backend, Order};
use crate::decomposition::Truncation;
use crate::error::{Error, Result};
use crate::plan::{ContractionPlan, FactorSlot, ModeLayout, Operand};
use crate::sf_tucker::SFTucker;
use crate::tucker::Tucker;

/// The right-hand side of [`SFTuckerMatrix::matmul`].
#[derive(Debug)]
pub enum MatmulOperand<'a, B: Backend> {
    /// A dense tensor whose trailing axes match the column split; any
    /// leading axes are batch axes.
    Dense(&'a B::Tensor),
    /// A plain Tucker tensor of the column shape.
    Tucker(&'a Tucker<B>),
    /// A shared-factor Tucker tensor of the column shape.
    SFTucker(&'a SFTucker<B>),
    /// Another matrix whose row split equals this matrix's column split.
    Matrix(&'a SFTuckerMatrix<B>),
}

/// The result of [`SFTuckerMatrix::matmul`]; its kind follows the operand.
#[derive(Debug)]
pub enum MatmulOutput<B: Backend> {
    Dense(B::Tensor),
    Tucker(SFTucker<B>),
    Matrix(SFTuckerMatrix<B>),
}

impl<B: Backend> MatmulOutput<B> {
    #[must_use]
    pub fn into_dense(self) -> Option<B::Tensor> {
        match self {
            Self::Dense(tensor) => Some(tensor),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_tucker(self) -> Option<SFTucker<B>> {
        match self {
            Self::Tucker(tensor) => Some(tensor),
            _ => None,
        }
    }

    #[must_use]
    pub fn into_matrix(self) -> Option<SFTuckerMatrix<B>> {
        match self {
            Self::Matrix(matrix) => Some(matrix),
            _ => None,
        }
    }
}

/// A shared-factor Tucker tensor viewed as a linear operator.
pub struct SFTuckerMatrix<B: Backend> {
    tensor: SFTucker<B>,
    n: Vec<usize>,
    m: Vec<usize>,
}

impl<B: Backend> Clone for SFTuckerMatrix<B> {
    fn clone(&self) -> Self {
        Self {
            tensor: self.tensor.clone(),
            n: self.n.clone(),
            m: self.m.clone(),
        }
    }
}

impl<B: Backend> fmt::Debug for SFTuckerMatrix<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SFTuckerMatrix")
            .field("tensor", &self.tensor)
            .field("n", &self.n)
            .field("m", &self.m)
            .finish()
    }
}

/// Operator factors keyed by slot.
struct SplitFactors<B: Backend> {
    regular: Vec<B::Tensor>,
    shared: Option<B::Tensor>,
}

impl<B: Backend> SplitFactors<B> {
    fn get(&self, slot: FactorSlot) -> Option<&B::Tensor> {
        match slot {
            FactorSlot::Regular(index) => self.regular.get(index),
            FactorSlot::Shared => self.shared.as_ref(),
        }
    }
}

/// Checks that `n` and `m` split `shape` and agree on the shared modes.
fn check_split(
    shape: &[usize],
    n: &[usize],
    m: &[usize],
    layout: &ModeLayout,
) -> Result<()> {
    if n.len() != shape.len() || m.len() != shape.len() {
        return Err(Error::InvalidStructure(format!(
            "row split {n:?} and column split {m:?} for {} modes",
            shape.len()
        )));
    }
    for ((&size, &rows), &cols) in shape.iter().zip(n).zip(m) {
        if rows * cols != size {
            return Err(Error::DimensionMismatch {
                operation: "matrix split",
                expected: size,
                actual: rows * cols,
            });
        }
    }
    if let Some(&last) = layout.shared_modes().last() {
        if layout
            .shared_modes()
            .iter()
            .any(|&mode| n[mode] != n[last] || m[mode] != m[last])
        {
            return Err(Error::InvalidStructure(format!(
                "symmetric modes {:?} have different splits",
                layout.shared_modes()
            )));
        }
    }

    Ok(())
}

/// Flattens the `[n, r, q]` or `[n, p, r, q]` result of a mode product into
/// a factor with rows `j + n * p` and columns `r * q_len + q`.
fn merge_mode_product<B: Backend>(product: &B::Tensor) -> Result<B::Tensor> {
    match *B::shape(product) {
        [rows, rank, other] => B::reshape(product, &[rows, rank * other], Order::RowMajor),
        [rows, cols, rank, other] => B::reshape(
            &B::permute(product, &[1, 0, 2, 3])?,
            &[cols * rows, rank * other],
            Order::RowMajor,
        ),
        ref shape => Err(Error::InvalidStructure(format!(
            "unexpected mode product of shape {shape:?}"
        ))),
    }
}

impl<B: Backend> SFTuckerMatrix<B> {
    /// Compresses a dense tensor and reads it as an operator with row split
    /// `n` and column split `m`; the last `ds` modes are symmetric.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::MissingShapeSplit`] if either split is absent,
    /// and otherwise if the splits do not factor the shape or the
    /// decomposition fails.
    pub fn from_dense(
        dense: &B::Tensor,
        ds: usize,
        n: Option<&[usize]>,
        m: Option<&[usize]>,
        truncation: &Truncation<B::Primitive>,
    ) -> Result<Self> {
        let (Some(n), Some(m)) = (n, m) else {
            return Err(Error::MissingShapeSplit);
        };
        let layout = ModeLayout::trailing(B::ndim(dense), ds)?;
        check_split(B::shape(dense), n, m, &layout)?;

        Ok(Self {
            tensor: SFTucker::from_dense(dense, ds, truncation)?,
            n: n.to_vec(),
            m: m.to_vec(),
        })
    }

    /// Reads an existing tensor as an operator.
    ///
    /// # Errors
    ///
    /// Fails if the symmetric modes are not the trailing modes or the
    /// splits do not factor the shape.
    pub fn from_parts(tensor: SFTucker<B>, n: Vec<usize>, m: Vec<usize>) -> Result<Self> {
        let layout = ModeLayout::trailing(tensor.ndim(), tensor.symmetric_modes().len())?;
        if &layout != tensor.layout() {
            return Err(Error::InvalidStructure(format!(
                "symmetric modes {:?} are not the trailing modes",
                tensor.symmetric_modes()
            )));
        }
        check_split(&tensor.shape(), &n, &m, &layout)?;

        Ok(Self { tensor, n, m })
    }

    /// Row split.
    #[must_use]
    pub fn n(&self) -> &[usize] {
        &self.n
    }

    /// Column split.
    #[must_use]
    pub fn m(&self) -> &[usize] {
        &self.m
    }

    /// Number of trailing symmetric modes.
    #[must_use]
    pub fn ds(&self) -> usize {
        self.tensor.symmetric_modes().len()
    }

    #[must_use]
    pub const fn ndim(&self) -> usize {
        self.tensor.ndim()
    }

    #[must_use]
    pub const fn as_sf_tucker(&self) -> &SFTucker<B> {
        &self.tensor
    }

    #[must_use]
    pub fn into_sf_tucker(self) -> SFTucker<B> {
        self.tensor
    }

    /// The dense tensor of shape `n_i * m_i` per mode.
    ///
    /// # Errors
    ///
    /// See [`SFTucker::full`].
    pub fn full(&self) -> Result<B::Tensor> {
        self.tensor.full()
    }

    fn split_factors(&self) -> Result<SplitFactors<B>> {
        let split = |factor: &B::Tensor, mode: usize| {
            let rank = B::shape(factor)[1];
            B::reshape(factor, &[self.n[mode], self.m[mode], rank], Order::ColumnMajor)
        };
        let regular = self
            .tensor
            .regular_factors()
            .iter()
            .enumerate()
            .map(|(mode, factor)| split(factor, mode))
            .collect::<Result<Vec<_>>>()?;
        let shared = self
            .tensor
            .shared_factor()
            .map(|factor| split(factor, self.ndim() - 1))
            .transpose()?;

        Ok(SplitFactors { regular, shared })
    }

    /// Matrix product `self @ other`, dispatched once on the operand kind.
    ///
    /// A dense operand gives a dense result with its batch axes in front.
    /// A Tucker operand gives an [`SFTucker`] whose rank on each mode is the
    /// product of both ranks. A matrix operand gives a matrix with this
    /// row split and the operand's column split. The compressed results keep
    /// the symmetric modes when both sides share the same ones and have none
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Fails if the operand's shape does not match the column split.
    pub fn matmul(&self, other: MatmulOperand<'_, B>) -> Result<MatmulOutput<B>> {
        match other {
            MatmulOperand::Dense(dense) => self.matmul_dense(dense).map(MatmulOutput::Dense),
            MatmulOperand::Tucker(tensor) => {
                self.check_columns(&tensor.shape())?;
                let layout = ModeLayout::plain(tensor.ndim());
                self.compressed_product(&layout, tensor.core(), false, |slot| match slot {
                    FactorSlot::Regular(index) => tensor.factors().get(index),
                    FactorSlot::Shared => None,
                })
                .map(MatmulOutput::Tucker)
            }
            MatmulOperand::SFTucker(tensor) => {
                self.check_columns(&tensor.shape())?;
                self.compressed_product(tensor.layout(), tensor.core(), false, |slot| {
                    tensor.factor(slot)
                })
                .map(MatmulOutput::Tucker)
            }
            MatmulOperand::Matrix(matrix) => {
                self.check_columns(&matrix.n)?;
                let split = matrix.split_factors()?;
                let tensor = self.compressed_product(
                    matrix.tensor.layout(),
                    matrix.tensor.core(),
                    true,
                    |slot| split.get(slot),
                )?;

                Ok(MatmulOutput::Matrix(Self {
                    tensor,
                    n: self.n.clone(),
                    m: matrix.m.clone(),
                }))
            }
        }
    }

    fn check_columns(&self, rows: &[usize]) -> Result<()> {
        if rows != self.m.as_slice() {
            return Err(Error::ShapeMismatch {
                operation: "matmul",
                lhs: self.m.clone(),
                rhs: rows.to_vec(),
            });
        }

        Ok(())
    }

    fn matmul_dense(&self, dense: &B::Tensor) -> Result<B::Tensor> {
        let shape = B::shape(dense);
        let d = self.ndim();
        if shape.len() < d {
            return Err(Error::DimensionMismatch {
                operation: "matmul",
                expected: d,
                actual: shape.len(),
            });
        }
        let batch = shape.len() - d;
        self.check_columns(&shape[batch..])?;
        let split = self.split_factors()?;

        ContractionPlan::matvec(self.tensor.layout(), batch)?.execute::<B, _>(|operand| {
            match operand {
                Operand::Core => Some(self.tensor.core()),
                Operand::Factor(slot) => split.get(slot),
                Operand::Dense => Some(dense),
                _ => None,
            }
        })
    }

    /// Multiplies every operator factor into the matching factor of a
    /// compressed right operand and takes the outer product of the cores.
    fn compressed_product<'o, F>(
        &self,
        other_layout: &ModeLayout,
        other_core: &B::Tensor,
        other_is_matrix: bool,
        other_factor: F,
    ) -> Result<SFTucker<B>>
    where
        B::Tensor: 'o,
        F: Fn(FactorSlot) -> Option<&'o B::Tensor>,
    {
        let own_layout = self.tensor.layout();
        let layout = if own_layout == other_layout {
            own_layout.clone()
        } else {
            tracing::debug!(
                lhs = ?own_layout.shared_modes(),
                rhs = ?other_layout.shared_modes(),
                "symmetric modes differ, the product has none"
            );
            ModeLayout::plain(self.ndim())
        };
        let split = self.split_factors()?;

        let mut regular_factors = Vec::with_capacity(layout.regular_count());
        let mut shared_factor = None;
        for mode in 0..self.ndim() {
            let slot = layout.factor_slot(mode);
            if slot == FactorSlot::Shared && shared_factor.is_some() {
                continue;
            }
            let (Some(lhs), Some(rhs)) = (
                split.get(own_layout.factor_slot(mode)),
                other_factor(other_layout.factor_slot(mode)),
            ) else {
                return Err(Error::InvalidStructure(format!("no factor for mode {mode}")));
            };
            let product = ContractionPlan::mode_product(slot, other_is_matrix)?
                .execute::<B, _>(|operand| match operand {
                    Operand::Factor(_) => Some(lhs),
                    Operand::OtherFactor(_) => Some(rhs),
                    _ => None,
                })?;
            let merged = merge_mode_product::<B>(&product)?;
            match slot {
                FactorSlot::Regular(_) => regular_factors.push(merged),
                FactorSlot::Shared => shared_factor = Some(merged),
            }
        }

        let outer = ContractionPlan::interleaved_outer(self.ndim())?.execute::<B, _>(
            |operand| match operand {
                Operand::Core => Some(self.tensor.core()),
                Operand::OtherCore => Some(other_core),
                _ => None,
            },
        )?;
        let rank: Vec<usize> = self
            .tensor
            .rank()
            .iter()
            .zip(B::shape(other_core))
            .map(|(own, other)| own * other)
            .collect();
        let core = B::reshape(&outer, &rank, Order::RowMajor)?;

        SFTucker::new(core, regular_factors, layout.shared_modes(), shared_factor)
    }
}
