//! # sftucker
//!
//! Tucker tensors and shared-factor Tucker (SF-Tucker) tensors for
//! Riemannian optimization on fixed-rank manifolds.
//!
//! A [`Tucker`] tensor stores a small core and one factor matrix per mode.
//! An [`SFTucker`] tensor lets a set of modes reuse one factor, which keeps
//! symmetric structure intact and shrinks the parameter count. An
//! [`SFTuckerMatrix`] reads an SF-Tucker tensor as a linear operator by
//! splitting every mode into a row and a column part.
//!
//! All arithmetic runs on the compressed representation through a pluggable
//! [`Backend`]; the dense tensor is only formed on request. Contractions are
//! described symbolically by the [`plan`] module and executed by the
//! backend's einsum.
//!
//! ```no_run
//! use ndarray::{ArrayD, IxDyn};
//! use sftucker::{NormMethod, SFTucker, SelectedBackend, Truncation};
//!
//! let dense = ArrayD::<f64>::ones(IxDyn(&[4, 5, 5]));
//! let tensor =
//!     SFTucker::<SelectedBackend<f64>>::from_dense(&dense, 2, &Truncation::Tolerance(1e-8))?;
//! let norm = tensor.norm(NormMethod::InnerProduct)?;
//! # Ok::<(), sftucker::Error>(())
//! ```

pub mod backend;
pub mod decomposition;
pub mod error;
pub mod plan;
pub mod sf_tucker;
pub mod tucker;

#[cfg(test)]
mod property_tests;
#[cfg(test)]
pub(crate) mod testing;

pub use backend::{Backend, SelectedBackend};
pub use decomposition::Truncation;
pub use error::{Error, Result};
pub use sf_tucker::SFTucker;
pub use sf_tucker::matrix::{MatmulOperand, MatmulOutput, SFTuckerMatrix};
pub use tucker::{NormMethod, Tucker};
