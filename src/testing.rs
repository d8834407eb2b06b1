//! Seeded fixtures for the unit tests.

use approx::assert_abs_diff_eq;
use ndarray::{ArrayD, IxDyn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::ndarray::NdarrayBackend;
use crate::sf_tucker::SFTucker;
use crate::tucker::Tucker;

pub(crate) type Backend64 = NdarrayBackend<f64>;

/// Uniform entries in `[-1, 1)`.
pub(crate) fn random_tensor(shape: &[usize], seed: u64) -> ArrayD<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    ArrayD::from_shape_fn(IxDyn(shape), |_| rng.gen_range(-1.0..1.0))
}

pub(crate) fn random_tucker(shape: &[usize], rank: &[usize], seed: u64) -> Tucker<Backend64> {
    let core = random_tensor(rank, seed);
    let factors = shape
        .iter()
        .zip(rank)
        .enumerate()
        .map(|(mode, (&n, &r))| random_tensor(&[n, r], seed + 1 + mode as u64))
        .collect();

    Tucker::new(core, factors).unwrap()
}

/// A shared-factor tensor whose last `ds` modes share one factor. The
/// shared modes take their size and rank from the last entry.
pub(crate) fn random_sf_tucker(
    shape: &[usize],
    rank: &[usize],
    ds: usize,
    seed: u64,
) -> SFTucker<Backend64> {
    let d = shape.len();
    let mut rank = rank.to_vec();
    for mode in d - ds..d {
        rank[mode] = rank[d - 1];
    }
    let core = random_tensor(&rank, seed);
    let regular = (0..d - ds)
        .map(|mode| random_tensor(&[shape[mode], rank[mode]], seed + 1 + mode as u64))
        .collect();
    let shared = (ds > 0).then(|| random_tensor(&[shape[d - 1], rank[d - 1]], seed + 100));
    let modes: Vec<usize> = (d - ds..d).collect();

    SFTucker::new(core, regular, &modes, shared).unwrap()
}

pub(crate) fn assert_close(actual: &ArrayD<f64>, expected: &ArrayD<f64>, epsilon: f64) {
    assert_eq!(actual.shape(), expected.shape());
    for (&a, &e) in actual.iter().zip(expected) {
        assert_abs_diff_eq!(a, e, epsilon = epsilon);
    }
}
