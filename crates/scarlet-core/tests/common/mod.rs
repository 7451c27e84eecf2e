#![allow(dead_code)]

use ndarray::{Array2, Array3};

/// Unit-peak circular Gaussian centered at (cy, cx).
pub fn gaussian_blob(h: usize, w: usize, cy: f64, cx: f64, sigma: f64) -> Array2<f64> {
    Array2::from_shape_fn((h, w), |(r, c)| {
        let dy = r as f64 - cy;
        let dx = c as f64 - cx;
        (-(dx * dx + dy * dy) / (2.0 * sigma * sigma)).exp()
    })
}

/// Multi-band cube of a single source: `sed[b] * amplitude * blob`.
pub fn source_cube(blob: &Array2<f64>, sed: &[f64], amplitude: f64) -> Array3<f64> {
    let (h, w) = blob.dim();
    Array3::from_shape_fn((sed.len(), h, w), |(b, r, c)| sed[b] * amplitude * blob[[r, c]])
}

/// Normalized Gaussian PSF of odd side `size`, centered at `size / 2`.
pub fn gaussian_psf(size: usize, sigma: f64) -> Array2<f64> {
    let center = (size / 2) as f64;
    let psf = gaussian_blob(size, size, center, center, sigma);
    let total = psf.sum();
    psf / total
}

/// Stack of PSFs, one per sigma.
pub fn psf_stack(size: usize, sigmas: &[f64]) -> Array3<f64> {
    let mut stack = Array3::<f64>::zeros((sigmas.len(), size, size));
    for (mut band, &sigma) in stack.outer_iter_mut().zip(sigmas) {
        band.assign(&gaussian_psf(size, sigma));
    }
    stack
}

/// Deterministic pseudo-random values in [-1, 1) from a linear congruential
/// generator.
pub fn pseudo_random(h: usize, w: usize, seed: u64) -> Array2<f64> {
    let mut state = seed.wrapping_mul(6_364_136_223_846_793_005).wrapping_add(1);
    Array2::from_shape_fn((h, w), |_| {
        state = state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        ((state >> 11) as f64 / (1u64 << 53) as f64) * 2.0 - 1.0
    })
}

pub fn inner(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn max_abs_diff(a: &Array2<f64>, b: &Array2<f64>) -> f64 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Element-wise `|a - e| <= epsilon` over two equally long sequences.
pub fn assert_all_close<'a, 'b, A, E>(actual: A, expected: E, epsilon: f64)
where
    A: IntoIterator<Item = &'a f64>,
    E: IntoIterator<Item = &'b f64>,
{
    let actual: Vec<f64> = actual.into_iter().copied().collect();
    let expected: Vec<f64> = expected.into_iter().copied().collect();
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (a, e)) in actual.iter().zip(&expected).enumerate() {
        assert!(
            approx::abs_diff_eq!(*a, *e, epsilon = epsilon),
            "element {i}: {a} != {e} (epsilon {epsilon})"
        );
    }
}
