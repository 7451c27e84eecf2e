mod common;

use approx::assert_abs_diff_eq;
use ndarray::{array, Array1, Array2};

use common::{assert_all_close, gaussian_blob, pseudo_random};
use scarlet_core::prox::{
    prox_hard, prox_l0, prox_plus, prox_soft, prox_soft_plus, prox_unity_plus, CenterOperator,
    GradientAxis, GradientOperator, MonotonicMode, MonotonicOperator, SymmetryOperator,
};

// ---------------------------------------------------------------------------
// Element-wise operators
// ---------------------------------------------------------------------------

#[test]
fn test_prox_plus_clamps_negatives() {
    let mut x = array![[-1.0, 2.0], [0.5, -0.1]];
    prox_plus(&mut x);
    assert_eq!(x, array![[0.0, 2.0], [0.5, 0.0]]);
}

#[test]
fn test_prox_plus_zeroes_nan() {
    let mut x = array![f64::NAN, 1.0];
    prox_plus(&mut x);
    assert_eq!(x, array![0.0, 1.0]);
}

#[test]
fn test_prox_hard_threshold() {
    let mut x = array![0.05, -0.2, 0.1, -0.01];
    prox_hard(&mut x, 0.1);
    assert_eq!(x, array![0.0, -0.2, 0.1, 0.0]);
}

#[test]
fn test_prox_soft_shrinks() {
    let mut x = array![1.0, -1.0, 0.2];
    prox_soft(&mut x, 0.5);
    assert_all_close(&x, &array![0.5, -0.5, 0.0], 1e-12);

    let mut y = array![1.0, -1.0, 0.2];
    prox_soft_plus(&mut y, 0.5);
    assert_all_close(&y, &array![0.5, 0.0, 0.0], 1e-12);
}

#[test]
fn test_prox_unity_plus_normalises() {
    let mut sed = array![2.0, -1.0, 6.0];
    let total = prox_unity_plus(&mut sed);
    assert_abs_diff_eq!(total, 8.0, epsilon = 1e-12);
    assert_all_close(&sed, &array![0.25, 0.0, 0.75], 1e-12);
}

#[test]
fn test_prox_unity_plus_falls_back_to_uniform() {
    let mut sed = array![-2.0, -1.0, 0.0, -3.0];
    let total = prox_unity_plus(&mut sed);
    assert_eq!(total, 0.0);
    assert_all_close(&sed, &Array1::from_elem(4, 0.25), 1e-12);
}

// ---------------------------------------------------------------------------
// L0 budget
// ---------------------------------------------------------------------------

#[test]
fn test_prox_l0_keeps_largest_magnitudes() {
    let mut x = array![0.1, -5.0, 3.0, 0.0, -0.5, 4.0];
    prox_l0(&mut x, 3);
    assert_eq!(x, array![0.0, -5.0, 3.0, 0.0, 0.0, 4.0]);
    assert_eq!(x.iter().filter(|v| **v != 0.0).count(), 3);
}

#[test]
fn test_prox_l0_ties_break_by_index() {
    let mut x = array![1.0, 2.0, 1.0, 1.0];
    prox_l0(&mut x, 2);
    assert_eq!(x, array![1.0, 2.0, 0.0, 0.0]);
}

#[test]
fn test_prox_l0_with_fewer_nonzeros_than_budget() {
    let mut x = array![[0.0, 1.0], [0.0, -2.0]];
    let before = x.clone();
    prox_l0(&mut x, 3);
    assert_eq!(x, before);
}

// ---------------------------------------------------------------------------
// Monotonicity
// ---------------------------------------------------------------------------

fn noisy_blob(size: usize, seed: u64) -> Array2<f64> {
    let c = (size / 2) as f64;
    gaussian_blob(size, size, c, c, 2.0) + pseudo_random(size, size, seed) * 0.3
}

#[test]
fn test_monotonic_nearest_decreases_along_parent_chains() {
    let size = 15;
    let center = (7, 7);
    let op = MonotonicOperator::new((size, size), center, MonotonicMode::Nearest, 0.0).unwrap();
    let mut x = noisy_blob(size, 3);
    op.apply(&mut x);

    let flat: Vec<f64> = x.iter().copied().collect();
    for r in 0..size {
        for c in 0..size {
            let refs = op.references(r, c);
            if (r, c) == center {
                assert!(refs.is_empty());
                continue;
            }
            assert_eq!(refs.len(), 1, "pixel ({r},{c})");
            let (parent, weight) = refs[0];
            assert_eq!(weight, 1.0);
            assert!(flat[r * size + c] <= flat[parent], "pixel ({r},{c}) above its parent");
        }
    }

    // Axes and diagonals are parent chains.
    let rays: [(i64, i64); 8] = [(0, 1), (1, 0), (0, -1), (-1, 0), (1, 1), (1, -1), (-1, 1), (-1, -1)];
    for (dy, dx) in rays {
        for step in 1..=7i64 {
            let (r1, c1) = (7 + dy * (step - 1), 7 + dx * (step - 1));
            let (r2, c2) = (7 + dy * step, 7 + dx * step);
            let inner = x[[r1 as usize, c1 as usize]];
            let outer = x[[r2 as usize, c2 as usize]];
            assert!(
                inner >= outer,
                "ray ({dy},{dx}) step {step}: {inner} < {outer}"
            );
        }
    }
}

#[test]
fn test_monotonic_weighted_respects_references() {
    let size = 11;
    let op = MonotonicOperator::new((size, size), (5, 5), MonotonicMode::Weighted, 0.0).unwrap();
    let mut x = noisy_blob(size, 11);
    op.apply(&mut x);

    let flat: Vec<f64> = x.iter().copied().collect();
    for r in 0..size {
        for c in 0..size {
            let refs = op.references(r, c);
            if refs.is_empty() {
                continue;
            }
            let weight: f64 = refs.iter().map(|(_, w)| w).sum();
            assert_abs_diff_eq!(weight, 1.0, epsilon = 1e-12);
            let reference: f64 = refs.iter().map(|&(j, w)| w * flat[j]).sum();
            assert!(x[[r, c]] <= reference + 1e-12, "pixel ({r},{c}) above its reference");
        }
    }
}

#[test]
fn test_monotonic_min_gradient_enforces_strict_decrease() {
    let op = MonotonicOperator::new((5, 5), (2, 2), MonotonicMode::Nearest, 0.2).unwrap();
    let mut x = Array2::<f64>::ones((5, 5));
    op.apply(&mut x);
    assert_abs_diff_eq!(x[[2, 2]], 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(x[[2, 3]], 0.8, epsilon = 1e-12);
    assert_abs_diff_eq!(x[[2, 4]], 0.64, epsilon = 1e-12);
}

#[test]
fn test_monotonic_rejects_bad_parameters() {
    assert!(MonotonicOperator::new((5, 5), (5, 2), MonotonicMode::Nearest, 0.0).is_err());
    assert!(MonotonicOperator::new((5, 5), (2, 2), MonotonicMode::Nearest, 1.0).is_err());
    assert!(MonotonicOperator::new((5, 5), (2, 2), MonotonicMode::Nearest, -0.1).is_err());
}

#[test]
fn test_monotonic_exact_is_feasible() {
    let size = 9;
    let op = MonotonicOperator::new((size, size), (4, 4), MonotonicMode::Exact, 0.0).unwrap();
    let mut x = noisy_blob(size, 5);
    op.apply(&mut x);

    let flat: Vec<f64> = x.iter().copied().collect();
    for r in 0..size {
        for c in 0..size {
            for &(j, _) in op.references(r, c) {
                assert!(flat[r * size + c] <= flat[j] + 1e-12, "pixel ({r},{c}) above parent");
            }
        }
    }
}

#[test]
fn test_monotonic_exact_pools_violators() {
    // 1x3 row with center on the left: [1, 3, 2] -> parent chain 0 <- 1 <- 2.
    let op = MonotonicOperator::new((1, 3), (0, 0), MonotonicMode::Exact, 0.0).unwrap();
    let mut x = array![[1.0, 3.0, 2.0]];
    op.apply(&mut x);
    assert_all_close(&x, &array![[2.0, 2.0, 2.0]], 1e-12);
}

#[test]
fn test_monotonic_leaves_monotone_input_unchanged() {
    let size = 13;
    let blob = gaussian_blob(size, size, 6.0, 6.0, 2.5);
    for mode in [MonotonicMode::Nearest, MonotonicMode::Exact] {
        let op = MonotonicOperator::new((size, size), (6, 6), mode, 0.0).unwrap();
        let mut x = blob.clone();
        op.apply(&mut x);
        assert_all_close(&x, &blob, 1e-12);
    }
}

// ---------------------------------------------------------------------------
// Gradient
// ---------------------------------------------------------------------------

#[test]
fn test_gradient_x_pools_row_violators() {
    // Chains 0 -> 1 -> 2 <- 3 <- 4 about the center column.
    let op = GradientOperator::new((1, 5), (0, 2), GradientAxis::X).unwrap();
    let mut x = array![[3.0, 1.0, 2.0, 5.0, 4.0]];
    op.apply(&mut x);
    let a = 11.0 / 3.0;
    assert_all_close(&x, &array![[2.0, 2.0, a, a, a]], 1e-12);
}

#[test]
fn test_gradient_y_matches_transposed_x() {
    let op = GradientOperator::new((5, 1), (2, 0), GradientAxis::Y).unwrap();
    assert_eq!(op.axis(), GradientAxis::Y);
    let mut x = array![[3.0], [1.0], [2.0], [5.0], [4.0]];
    op.apply(&mut x);
    let a = 11.0 / 3.0;
    assert_all_close(&x, &array![[2.0], [2.0], [a], [a], [a]], 1e-12);
}

#[test]
fn test_gradient_decreases_away_from_center_line() {
    let (h, w) = (9, 11);
    let (cy, cx) = (4, 6);
    let noisy = gaussian_blob(h, w, 4.0, 6.0, 2.0) + pseudo_random(h, w, 8) * 0.3;

    let op = GradientOperator::new((h, w), (cy, cx), GradientAxis::X).unwrap();
    let mut x = noisy.clone();
    op.apply(&mut x);
    for r in 0..h {
        for c in 0..w - 1 {
            let (inner, outer) = if c < cx { (c + 1, c) } else { (c, c + 1) };
            assert!(x[[r, outer]] <= x[[r, inner]] + 1e-12, "row {r} columns {inner}->{outer}");
        }
    }

    let op = GradientOperator::new((h, w), (cy, cx), GradientAxis::Y).unwrap();
    let mut x = noisy;
    op.apply(&mut x);
    for c in 0..w {
        for r in 0..h - 1 {
            let (inner, outer) = if r < cy { (r + 1, r) } else { (r, r + 1) };
            assert!(x[[outer, c]] <= x[[inner, c]] + 1e-12, "column {c} rows {inner}->{outer}");
        }
    }
}

#[test]
fn test_gradient_leaves_separable_blob_unchanged() {
    let blob = gaussian_blob(11, 13, 5.0, 6.0, 2.0);
    for axis in [GradientAxis::X, GradientAxis::Y] {
        let op = GradientOperator::new((11, 13), (5, 6), axis).unwrap();
        let mut x = blob.clone();
        op.apply(&mut x);
        assert_all_close(&x, &blob, 1e-12);
    }
    assert!(GradientOperator::new((11, 13), (11, 6), GradientAxis::X).is_err());
}

// ---------------------------------------------------------------------------
// Symmetry and center
// ---------------------------------------------------------------------------

#[test]
fn test_symmetry_pairs_are_equal() {
    let op = SymmetryOperator::new((9, 9), (4, 4)).unwrap();
    let mut x = pseudo_random(9, 9, 21);
    op.apply(&mut x);
    for r in 0..9 {
        for c in 0..9 {
            assert_eq!(x[[r, c]], x[[8 - r, 8 - c]], "pixel ({r},{c}) not symmetric");
        }
    }
}

#[test]
fn test_symmetry_off_center_leaves_unpaired_pixels() {
    // Center at (1, 1) in a 4x5 box: rows/cols beyond 2 have no partner.
    let op = SymmetryOperator::new((4, 5), (1, 1)).unwrap();
    let mut x = pseudo_random(4, 5, 8);
    let before = x.clone();
    op.apply(&mut x);
    assert_eq!(x[[3, 4]], before[[3, 4]]);
    assert_eq!(x[[0, 4]], before[[0, 4]]);
    assert_eq!(x[[0, 0]], x[[2, 2]]);
    assert_abs_diff_eq!(x[[0, 0]], 0.5 * (before[[0, 0]] + before[[2, 2]]), epsilon = 1e-12);
}

#[test]
fn test_center_on_peak_projection() {
    let op = CenterOperator::new((1, 3), (0, 1)).unwrap();
    let mut x = array![[4.0, 1.0, 0.5]];
    op.apply(&mut x);
    // Pool the center with the brightest violator.
    assert_all_close(&x, &array![[2.5, 2.5, 0.5]], 1e-12);

    let mut y = pseudo_random(7, 7, 4);
    let op = CenterOperator::new((7, 7), (3, 3)).unwrap();
    op.apply(&mut y);
    let peak = y[[3, 3]];
    assert!(y.iter().all(|&v| v <= peak + 1e-12));
}

// ---------------------------------------------------------------------------
// Idempotence
// ---------------------------------------------------------------------------

#[test]
fn test_projections_are_idempotent() {
    let size = 11;
    let center = (5, 5);
    let monotonic = [
        MonotonicOperator::new((size, size), center, MonotonicMode::Nearest, 0.0).unwrap(),
        MonotonicOperator::new((size, size), center, MonotonicMode::Weighted, 0.1).unwrap(),
        MonotonicOperator::new((size, size), center, MonotonicMode::Exact, 0.0).unwrap(),
    ];
    let symmetry = SymmetryOperator::new((size, size), center).unwrap();
    let centered = CenterOperator::new((size, size), center).unwrap();
    let gradient = GradientOperator::new((size, size), center, GradientAxis::X).unwrap();

    let x = noisy_blob(size, 42);
    let mut projections: Vec<Box<dyn Fn(&mut Array2<f64>) + '_>> = Vec::new();
    for op in &monotonic {
        projections.push(Box::new(move |a: &mut Array2<f64>| op.apply(a)));
    }
    projections.push(Box::new(|a: &mut Array2<f64>| symmetry.apply(a)));
    projections.push(Box::new(|a: &mut Array2<f64>| centered.apply(a)));
    projections.push(Box::new(|a: &mut Array2<f64>| gradient.apply(a)));
    projections.push(Box::new(|a: &mut Array2<f64>| prox_plus(a)));
    projections.push(Box::new(|a: &mut Array2<f64>| prox_hard(a, 0.3)));
    projections.push(Box::new(|a: &mut Array2<f64>| prox_l0(a, 10)));

    for (i, project) in projections.iter().enumerate() {
        let mut once = x.clone();
        project(&mut once);
        let mut twice = once.clone();
        project(&mut twice);
        assert_all_close(&once, &twice, 1e-12);
        assert!(once.iter().all(|v| v.is_finite()), "projection {i} produced non-finite values");
    }
}
