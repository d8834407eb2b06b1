//! Truncated HOSVD used by the `from_dense` constructors.
//!
//! Each regular mode gets the leading left singular vectors of its
//! unfolding. The shared modes are compressed together: their unfoldings are
//! placed side by side and one set of singular vectors serves all of them.
//! The core is the dense tensor projected onto the transposed factors.

use num_traits::{Float, NumCast};

use crate::backend::{Backend, Order};
use crate::error::{Error, Result};
use crate::plan::{ContractionPlan, FactorSlot, ModeLayout, Operand};

/// How many singular vectors to keep per mode.
#[derive(Debug, Clone, PartialEq)]
pub enum Truncation<P> {
    /// Relative Frobenius tolerance: the reconstruction error is at most
    /// `eps * ||T||`.
    Tolerance(P),
    /// Explicit multilinear rank, one entry per mode. Entries are clamped to
    /// what the mode supports; shared modes use the entry of the last shared
    /// mode.
    Ranks(Vec<usize>),
}

/// Core and factors produced by [`hosvd`].
#[derive(Debug)]
pub(crate) struct Decomposition<B: Backend> {
    pub(crate) core: B::Tensor,
    pub(crate) regular_factors: Vec<B::Tensor>,
    pub(crate) shared_factor: Option<B::Tensor>,
}

fn cast<P: Float>(value: usize) -> Result<P> {
    <P as NumCast>::from(value).ok_or_else(|| {
        Error::Decomposition(format!("{value} is not representable"))
    })
}

/// Mode-`mode` unfolding: the `mode` axis first, the rest flattened
/// row-major.
fn unfold<B: Backend>(tensor: &B::Tensor, mode: usize) -> Result<B::Tensor> {
    let shape = B::shape(tensor);
    let axes: Vec<usize> = core::iter::once(mode)
        .chain((0..shape.len()).filter(|&axis| axis != mode))
        .collect();
    let rows = shape[mode];
    let cols = shape.iter().product::<usize>() / rows.max(1);

    B::reshape(&B::permute(tensor, &axes)?, &[rows, cols], Order::RowMajor)
}

/// Number of singular vectors to keep.
///
/// `weight` is the number of unfoldings stacked into the decomposed matrix,
/// which scales both its energy and its share of the error budget.
fn choose_rank<P: Float>(
    singular_values: &[P],
    truncation: &Truncation<P>,
    mode: usize,
    ndim: usize,
    norm_squared: P,
    weight: usize,
) -> Result<usize> {
    let available = singular_values.len();
    let rank = match truncation {
        Truncation::Ranks(ranks) => ranks[mode],
        Truncation::Tolerance(eps) => {
            let budget =
                *eps * *eps * norm_squared * cast::<P>(weight)? / cast::<P>(ndim)?;
            let mut tail = P::zero();
            let mut rank = available;
            for (index, &value) in singular_values.iter().enumerate().rev() {
                tail = tail + value * value;
                if tail > budget {
                    break;
                }
                rank = index;
            }
            rank
        }
    };

    Ok(rank.clamp(1, available.max(1)))
}

fn leading_singular_vectors<B: Backend>(
    matrix: &B::Tensor,
    truncation: &Truncation<B::Primitive>,
    mode: usize,
    ndim: usize,
    norm_squared: B::Primitive,
    weight: usize,
) -> Result<B::Tensor> {
    let (u, singular_values, _) = B::svd(matrix)?;
    let rank = choose_rank(
        &singular_values,
        truncation,
        mode,
        ndim,
        norm_squared,
        weight,
    )?;

    // SAFETY: `u` is a matrix with one column per singular value and
    // `rank` is clamped to that count.
    Ok(unsafe { B::take(&u, 1, rank) })
}

/// Truncated HOSVD of `dense` with the mode structure of `layout`.
pub(crate) fn hosvd<B: Backend>(
    dense: &B::Tensor,
    layout: &ModeLayout,
    truncation: &Truncation<B::Primitive>,
) -> Result<Decomposition<B>> {
    let shape = B::shape(dense).to_vec();
    let ndim = shape.len();
    if ndim == 0 || ndim != layout.ndim() {
        return Err(Error::InvalidStructure(format!(
            "cannot decompose a {ndim}-d tensor into {} modes",
            layout.ndim()
        )));
    }
    if let Truncation::Ranks(ranks) = truncation {
        if ranks.len() != ndim {
            return Err(Error::InvalidStructure(format!(
                "{} ranks given for {ndim} modes",
                ranks.len()
            )));
        }
    }
    let shared = layout.shared_modes();
    if let Some(&first) = shared.first() {
        if shared.iter().any(|&mode| shape[mode] != shape[first]) {
            return Err(Error::InvalidStructure(format!(
                "shared modes {shared:?} of shape {shape:?} differ in size"
            )));
        }
    }

    let norm = B::norm(dense);
    let norm_squared = norm * norm;

    let mut regular_factors = Vec::with_capacity(layout.regular_count());
    for mode in (0..ndim).filter(|&mode| !layout.is_shared(mode)) {
        regular_factors.push(leading_singular_vectors::<B>(
            &unfold::<B>(dense, mode)?,
            truncation,
            mode,
            ndim,
            norm_squared,
            1,
        )?);
    }

    let shared_factor = match shared.last() {
        Some(&last) => {
            let unfoldings = shared
                .iter()
                .map(|&mode| unfold::<B>(dense, mode))
                .collect::<Result<Vec<_>>>()?;
            let stacked =
                B::concatenate(&unfoldings.iter().collect::<Vec<_>>(), 1)?;
            Some(leading_singular_vectors::<B>(
                &stacked,
                truncation,
                last,
                ndim,
                norm_squared,
                shared.len(),
            )?)
        }
        None => None,
    };

    let core = ContractionPlan::projection(layout)?.execute::<B, _>(|operand| {
        match operand {
            Operand::Dense => Some(dense),
            Operand::Factor(FactorSlot::Regular(index)) => {
                regular_factors.get(index)
            }
            Operand::Factor(FactorSlot::Shared) => shared_factor.as_ref(),
            _ => None,
        }
    })?;
    tracing::debug!(
        shape = ?shape,
        rank = ?B::shape(&core),
        shared = ?shared,
        "truncated HOSVD"
    );

    Ok(Decomposition {
        core,
        regular_factors,
        shared_factor,
    })
}
