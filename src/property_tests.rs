//! Property-based tests for the compressed algebra.
//!
//! Every property is checked against the dense reconstruction, on random
//! tensors whose shapes, ranks and symmetric mode counts are drawn by
//! proptest.

use ndarray::{Array2, ArrayD};
use proptest::prelude::*;

use crate::testing::{random_sf_tucker, random_tensor};
use crate::tucker::NormMethod;

fn proptest_config() -> ProptestConfig {
    ProptestConfig {
        cases: 24,
        ..ProptestConfig::default()
    }
}

fn dense_inner(lhs: &ArrayD<f64>, rhs: &ArrayD<f64>) -> f64 {
    lhs.iter().zip(rhs).map(|(a, b)| a * b).sum()
}

fn max_abs_diff(lhs: &ArrayD<f64>, rhs: &ArrayD<f64>) -> f64 {
    lhs.iter()
        .zip(rhs)
        .map(|(a, b)| (a - b).abs())
        .fold(0.0, f64::max)
}

/// Order 2..=4, mode sizes 2..=4, ranks 1..=3 and up to `ndim` symmetric
/// modes.
fn structure() -> impl Strategy<Value = (Vec<usize>, Vec<usize>, usize)> {
    (2usize..=4).prop_flat_map(|ndim| {
        (
            prop::collection::vec(2usize..=4, ndim),
            prop::collection::vec(1usize..=3, ndim),
            0..=ndim,
        )
    })
}

/// The shape with its symmetric modes resized to the last mode.
fn symmetric_shape(shape: &[usize], ds: usize) -> Vec<usize> {
    let d = shape.len();
    let mut shape = shape.to_vec();
    for mode in d - ds..d {
        shape[mode] = shape[d - 1];
    }
    shape
}

proptest! {
    #![proptest_config(proptest_config())]

    #[test]
    fn full_is_additive(
        (shape, rank, ds) in structure(),
        other_ds in 0usize..=4,
        seed in 0u64..1000,
    ) {
        let shape = symmetric_shape(&shape, ds);
        let other_ds = other_ds.min(ds);
        let a = random_sf_tucker(&shape, &rank, ds, seed);
        let b = random_sf_tucker(&shape, &rank, other_ds, seed + 500);

        let sum = a.try_add(&b).unwrap();

        let expected = a.full().unwrap() + b.full().unwrap();
        prop_assert!(max_abs_diff(&sum.full().unwrap(), &expected) < 1e-9);
    }

    #[test]
    fn flat_inner_is_bilinear(
        (shape, rank, ds) in structure(),
        scalar in -3.0f64..3.0,
        seed in 0u64..1000,
    ) {
        let shape = symmetric_shape(&shape, ds);
        let a = random_sf_tucker(&shape, &rank, ds, seed);
        let b = random_sf_tucker(&shape, &rank, ds, seed + 1);

        let scaled = (&a * scalar).flat_inner(&b).unwrap();
        let inner = a.flat_inner(&b).unwrap();

        let tolerance = 1e-9 * (1.0 + inner.abs());
        prop_assert!((scaled - scalar * inner).abs() < tolerance * 3.0);
        prop_assert!(
            (inner - dense_inner(&a.full().unwrap(), &b.full().unwrap())).abs() < tolerance
        );
    }

    #[test]
    fn norms_square_to_self_inner_product(
        (shape, rank, ds) in structure(),
        seed in 0u64..1000,
    ) {
        let shape = symmetric_shape(&shape, ds);
        let a = random_sf_tucker(&shape, &rank, ds, seed);

        let inner = a.flat_inner(&a).unwrap();
        let by_inner = a.norm(NormMethod::InnerProduct).unwrap();
        let by_qr = a.norm(NormMethod::Qr).unwrap();

        let tolerance = 1e-9 * (1.0 + inner);
        prop_assert!(by_qr >= 0.0);
        prop_assert!((by_inner * by_inner - inner).abs() < tolerance);
        prop_assert!((by_qr * by_qr - inner).abs() < tolerance);
    }

    #[test]
    fn mode_product_changes_only_its_mode(
        (shape, rank, ds) in structure(),
        rows in 1usize..=5,
        mode_seed in 0usize..4,
        seed in 0u64..1000,
    ) {
        let shape = symmetric_shape(&shape, ds);
        let a = random_sf_tucker(&shape, &rank, ds, seed);
        let k = mode_seed % shape.len();
        let mat = random_tensor(&[rows, shape[k]], seed + 7);

        let product = a.k_mode_product(k, &mat).unwrap();

        let mut expected = shape.clone();
        expected[k] = rows;
        prop_assert_eq!(product.shape(), expected);
        prop_assert_eq!(product.rank(), a.rank());
    }

    #[test]
    fn identity_mode_product_is_noop(
        (shape, rank, ds) in structure(),
        mode_seed in 0usize..4,
        seed in 0u64..1000,
    ) {
        let shape = symmetric_shape(&shape, ds);
        let a = random_sf_tucker(&shape, &rank, ds, seed);
        let k = mode_seed % shape.len();
        let identity = Array2::<f64>::eye(shape[k]).into_dyn();

        let product = a.k_mode_product(k, &identity).unwrap();

        prop_assert!(max_abs_diff(&product.full().unwrap(), &a.full().unwrap()) < 1e-12);
    }

    #[test]
    fn symmetric_modes_product_resizes_all_shared_modes(
        (shape, rank, ds) in structure(),
        rows in 1usize..=5,
        seed in 0u64..1000,
    ) {
        prop_assume!(ds > 0);
        let shape = symmetric_shape(&shape, ds);
        let a = random_sf_tucker(&shape, &rank, ds, seed);
        let shared_rank = a.shared_factor().unwrap().shape()[1];
        let mat = random_tensor(&[rows, shape[shape.len() - 1]], seed + 3);

        let product = a.symmetric_modes_product(&mat).unwrap();

        prop_assert_eq!(product.shared_factor().unwrap().shape()[1], shared_rank);
        for &mode in product.symmetric_modes() {
            prop_assert_eq!(product.shape()[mode], rows);
        }
    }

    #[test]
    fn mismatched_layouts_add_like_plain_tensors(
        (shape, rank, ds) in structure(),
        seed in 0u64..1000,
    ) {
        prop_assume!(ds > 0);
        let shape = symmetric_shape(&shape, ds);
        let a = random_sf_tucker(&shape, &rank, ds, seed);
        let b = random_sf_tucker(&shape, &rank, ds - 1, seed + 11);

        let sum = a.try_add(&b).unwrap();
        let plain = a.to_regular_tucker().try_add(&b.to_regular_tucker()).unwrap();

        prop_assert!(sum.symmetric_modes().is_empty());
        prop_assert_eq!(sum.core(), plain.core());
        prop_assert_eq!(sum.regular_factors(), plain.factors());
    }
}
