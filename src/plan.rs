//! Index-algebra planning.
//!
//! Every operation that contracts a Tucker core against its factor matrices
//! goes through a [`ContractionPlan`]: a list of labeled terms and an output
//! label string, rendered to einsum notation and handed to
//! [`Backend::einsum`](crate::backend::Backend::einsum).
//!
//! The planner never looks at numbers. It only knows the order of the tensor
//! and which modes read from the shared factor ([`ModeLayout`]). A shared
//! factor is a single operand referenced by one term per shared mode; each of
//! those terms carries the labels of its own mode, so the shared matrix is
//! applied once per mode and never forces a diagonal.

use crate::backend::Backend;
use crate::error::{Error, Result};

/// Axis labels, in the order they are handed out.
const LABELS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Where the factor matrix of a mode lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FactorSlot {
    /// Index into the list of regular (private) factors.
    Regular(usize),
    /// The one factor shared by every shared mode.
    Shared,
}

/// Mode structure of a (shared-factor) Tucker tensor: its order and the
/// sorted set of modes that use the shared factor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModeLayout {
    ndim: usize,
    shared: Vec<usize>,
}

impl ModeLayout {
    /// Creates a layout with the given shared modes, in any order.
    ///
    /// # Errors
    ///
    /// Fails if a shared mode is out of range or listed twice.
    pub fn new(ndim: usize, shared: &[usize]) -> Result<Self> {
        let mut sorted = shared.to_vec();
        sorted.sort_unstable();
        if let Some(&mode) = sorted.iter().find(|&&mode| mode >= ndim) {
            return Err(Error::InvalidMode { mode, ndim });
        }
        if sorted.windows(2).any(|pair| pair[0] == pair[1]) {
            return Err(Error::InvalidStructure(format!(
                "shared modes {shared:?} contain duplicates"
            )));
        }

        Ok(Self {
            ndim,
            shared: sorted,
        })
    }

    /// A layout without shared modes.
    #[must_use]
    pub const fn plain(ndim: usize) -> Self {
        Self {
            ndim,
            shared: Vec::new(),
        }
    }

    /// A layout whose last `ds` modes are shared.
    ///
    /// # Errors
    ///
    /// Fails if `ds > ndim`.
    pub fn trailing(ndim: usize, ds: usize) -> Result<Self> {
        if ds > ndim {
            return Err(Error::InvalidStructure(format!(
                "{ds} shared modes requested for a tensor with {ndim} modes"
            )));
        }

        Ok(Self {
            ndim,
            shared: (ndim - ds..ndim).collect(),
        })
    }

    #[must_use]
    pub const fn ndim(&self) -> usize {
        self.ndim
    }

    /// The shared modes in increasing order.
    #[must_use]
    pub fn shared_modes(&self) -> &[usize] {
        &self.shared
    }

    /// Number of modes with a private factor.
    #[must_use]
    pub fn regular_count(&self) -> usize {
        self.ndim - self.shared.len()
    }

    #[must_use]
    pub fn has_shared(&self) -> bool {
        !self.shared.is_empty()
    }

    #[must_use]
    pub fn is_shared(&self, mode: usize) -> bool {
        self.shared.binary_search(&mode).is_ok()
    }

    /// Number of shared modes strictly before `mode`.
    #[must_use]
    pub fn shared_before(&self, mode: usize) -> usize {
        self.shared.partition_point(|&shared| shared < mode)
    }

    /// The factor a mode reads from.
    #[must_use]
    pub fn factor_slot(&self, mode: usize) -> FactorSlot {
        if self.is_shared(mode) {
            FactorSlot::Shared
        } else {
            FactorSlot::Regular(mode - self.shared_before(mode))
        }
    }

    /// Factor slots of every mode, in mode order.
    pub fn slots(&self) -> impl Iterator<Item = FactorSlot> {
        (0..self.ndim).map(move |mode| self.factor_slot(mode))
    }
}

/// Hands out distinct axis labels.
#[derive(Debug, Default)]
pub struct LabelPool {
    next: usize,
}

impl LabelPool {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Returns a label not handed out before.
    ///
    /// # Errors
    ///
    /// Fails once all labels are used.
    pub fn fresh(&mut self) -> Result<char> {
        let label = LABELS
            .get(self.next)
            .copied()
            .map(char::from)
            .ok_or(Error::LabelsExhausted {
                available: LABELS.len(),
            })?;
        self.next += 1;

        Ok(label)
    }

    /// Returns `count` fresh labels.
    ///
    /// # Errors
    ///
    /// Fails once all labels are used.
    pub fn take(&mut self, count: usize) -> Result<Vec<char>> {
        (0..count).map(|_| self.fresh()).collect()
    }
}

/// The tensor a plan term refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    /// The core of the tensor the plan is built for.
    Core,
    /// The core of the second operand of a binary operation.
    OtherCore,
    /// A factor of the tensor the plan is built for.
    Factor(FactorSlot),
    /// A factor of the second operand.
    OtherFactor(FactorSlot),
    /// The per-mode product `other_factor^T @ factor`.
    Gram(FactorSlot),
    /// A dense tensor supplied by the caller.
    Dense,
}

/// One operand of a contraction and the labels of its axes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub operand: Operand,
    pub labels: Vec<char>,
}

impl Term {
    fn new(operand: Operand, labels: impl IntoIterator<Item = char>) -> Self {
        Self {
            operand,
            labels: labels.into_iter().collect(),
        }
    }
}

/// A symbolic contraction: terms in operand order plus output labels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractionPlan {
    terms: Vec<Term>,
    output: Vec<char>,
}

impl ContractionPlan {
    #[must_use]
    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    #[must_use]
    pub fn output(&self) -> &[char] {
        &self.output
    }

    /// Renders the plan in einsum notation.
    #[must_use]
    pub fn notation(&self) -> String {
        let inputs: Vec<String> = self
            .terms
            .iter()
            .map(|term| term.labels.iter().collect())
            .collect();
        let output: String = self.output.iter().collect();

        format!("{}->{output}", inputs.join(","))
    }

    /// Resolves every term to a tensor and runs the contraction.
    ///
    /// # Errors
    ///
    /// Fails if `lookup` has no tensor for a term, or the backend rejects
    /// the contraction.
    pub fn execute<'a, B, F>(&self, mut lookup: F) -> Result<B::Tensor>
    where
        B: Backend,
        B::Tensor: 'a,
        F: FnMut(Operand) -> Option<&'a B::Tensor>,
    {
        let operands = self
            .terms
            .iter()
            .map(|term| {
                lookup(term.operand).ok_or_else(|| {
                    Error::InvalidStructure(format!(
                        "no tensor for {:?}",
                        term.operand
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        B::einsum(&self.notation(), &operands)
    }

    /// Dense reconstruction: the core contracted with every factor,
    /// `core[c..] * U_i[f_i, c_i] -> [f..]`.
    ///
    /// # Errors
    ///
    /// Fails if the order needs more labels than are available.
    pub fn reconstruction(layout: &ModeLayout) -> Result<Self> {
        let mut pool = LabelPool::new();
        let core = pool.take(layout.ndim())?;
        let full = pool.take(layout.ndim())?;

        let mut terms = vec![Term::new(Operand::Core, core.iter().copied())];
        terms.extend(
            layout
                .slots()
                .zip(full.iter().zip(&core))
                .map(|(slot, (&f, &c))| Term::new(Operand::Factor(slot), [f, c])),
        );

        Ok(Self {
            terms,
            output: full,
        })
    }

    /// Projection of a dense tensor onto transposed factors,
    /// `dense[f..] * U_i[f_i, c_i] -> [c..]`.
    ///
    /// # Errors
    ///
    /// Fails if the order needs more labels than are available.
    pub fn projection(layout: &ModeLayout) -> Result<Self> {
        let mut pool = LabelPool::new();
        let core = pool.take(layout.ndim())?;
        let full = pool.take(layout.ndim())?;

        let mut terms = vec![Term::new(Operand::Dense, full.iter().copied())];
        terms.extend(
            layout
                .slots()
                .zip(full.iter().zip(&core))
                .map(|(slot, (&f, &c))| Term::new(Operand::Factor(slot), [f, c])),
        );

        Ok(Self {
            terms,
            output: core,
        })
    }

    /// The core with every Gram matrix applied,
    /// `core[c..] * G_i[o_i, c_i] -> [o..]`, where `G_i` maps this
    /// tensor's rank on mode `i` to the other operand's.
    ///
    /// # Errors
    ///
    /// Fails if the order needs more labels than are available.
    pub fn intermediate_core(layout: &ModeLayout) -> Result<Self> {
        let mut pool = LabelPool::new();
        let core = pool.take(layout.ndim())?;
        let other = pool.take(layout.ndim())?;

        let mut terms = vec![Term::new(Operand::Core, core.iter().copied())];
        terms.extend(
            layout
                .slots()
                .zip(other.iter().zip(&core))
                .map(|(slot, (&o, &c))| Term::new(Operand::Gram(slot), [o, c])),
        );

        Ok(Self {
            terms,
            output: other,
        })
    }

    /// Matrix-view times dense tensor. Factors are the `(n_i, m_i, r_i)`
    /// reshapes; the dense operand carries `batch` leading axes ahead of the
    /// column axes:
    /// `core[c..] * A_i[n_i, m_i, c_i] * x[b.., m..] -> [b.., n..]`.
    ///
    /// # Errors
    ///
    /// Fails if the order needs more labels than are available.
    pub fn matvec(layout: &ModeLayout, batch: usize) -> Result<Self> {
        let mut pool = LabelPool::new();
        let core = pool.take(layout.ndim())?;
        let mut rows = Vec::with_capacity(layout.ndim());
        let mut cols = Vec::with_capacity(layout.ndim());
        let mut terms = vec![Term::new(Operand::Core, core.iter().copied())];
        for (slot, &c) in layout.slots().zip(&core) {
            let (row, col) = (pool.fresh()?, pool.fresh()?);
            rows.push(row);
            cols.push(col);
            terms.push(Term::new(Operand::Factor(slot), [row, col, c]));
        }
        let batch = pool.take(batch)?;

        terms.push(Term::new(
            Operand::Dense,
            batch.iter().chain(&cols).copied(),
        ));

        Ok(Self {
            terms,
            output: batch.into_iter().chain(rows).collect(),
        })
    }

    /// Outer product of two cores with the axes interleaved,
    /// `a[x0, x1, ..] * b[y0, y1, ..] -> [x0, y0, x1, y1, ..]`, so that a
    /// row-major reshape merges each `(x_i, y_i)` pair into one axis.
    ///
    /// # Errors
    ///
    /// Fails if the order needs more labels than are available.
    pub fn interleaved_outer(ndim: usize) -> Result<Self> {
        let mut pool = LabelPool::new();
        let lhs = pool.take(ndim)?;
        let rhs = pool.take(ndim)?;
        let output = lhs
            .iter()
            .zip(&rhs)
            .flat_map(|(&x, &y)| [x, y])
            .collect();

        Ok(Self {
            terms: vec![
                Term::new(Operand::Core, lhs),
                Term::new(Operand::OtherCore, rhs),
            ],
            output,
        })
    }

    /// Product of one reshaped matrix factor `A[n, m, r]` with a factor of
    /// the right operand: a vector factor `U[m, q]` gives `[n, r, q]`, a
    /// matrix factor `B[m, p, q]` gives `[n, p, r, q]`.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the label pool is fresh.
    pub fn mode_product(slot: FactorSlot, other_is_matrix: bool) -> Result<Self> {
        let mut pool = LabelPool::new();
        let [n, m, r, p, q] = [
            pool.fresh()?,
            pool.fresh()?,
            pool.fresh()?,
            pool.fresh()?,
            pool.fresh()?,
        ];
        let (other, output) = if other_is_matrix {
            (vec![m, p, q], vec![n, p, r, q])
        } else {
            (vec![m, q], vec![n, r, q])
        };

        Ok(Self {
            terms: vec![
                Term::new(Operand::Factor(slot), [n, m, r]),
                Term::new(Operand::OtherFactor(slot), other),
            ],
            output,
        })
    }
}
