use ndarray::{Array, Array1, Dimension, Zip};

use crate::scene::BoundingBox;

/// For every box, the indices of the boxes it overlaps (itself included).
pub(super) fn overlap_lists(boxes: &[BoundingBox]) -> Vec<Vec<usize>> {
    boxes
        .iter()
        .map(|a| {
            boxes
                .iter()
                .enumerate()
                .filter(|(_, b)| a.overlaps(b))
                .map(|(l, _)| l)
                .collect()
        })
        .collect()
}

/// Block-Gershgorin bound on the SED Hessian row of each component:
/// `Wmax * sum_l max_b ||P_b S_k|| * ||P_b S_l||`.
///
/// `conv_norms[k][b]` is the Frobenius norm of component k's convolved
/// morphology in band b.
pub(super) fn sed_lipschitz(overlaps: &[Vec<usize>], conv_norms: &[Vec<f64>], wmax: f64) -> Vec<f64> {
    overlaps
        .iter()
        .enumerate()
        .map(|(k, neighbours)| {
            let row: f64 = neighbours
                .iter()
                .map(|&l| {
                    conv_norms[k]
                        .iter()
                        .zip(&conv_norms[l])
                        .map(|(a, b)| a * b)
                        .fold(0.0, f64::max)
                })
                .sum();
            wmax * row
        })
        .collect()
}

/// Block-Gershgorin bound on the morphology Hessian row of each component:
/// `Wmax * sum_l sum_b |A_bk A_bl| * ||P_b||_k * ||P_b||_l`.
///
/// `kernel_norms[k][b]` bounds the operator norm of component k's band-b
/// convolution.
pub(super) fn morphology_lipschitz(
    overlaps: &[Vec<usize>],
    seds: &[Array1<f64>],
    kernel_norms: &[Vec<f64>],
    wmax: f64,
) -> Vec<f64> {
    overlaps
        .iter()
        .enumerate()
        .map(|(k, neighbours)| {
            let row: f64 = neighbours
                .iter()
                .map(|&l| {
                    (0..seds[k].len())
                        .map(|b| {
                            (seds[k][b] * seds[l][b]).abs() * kernel_norms[k][b] * kernel_norms[l][b]
                        })
                        .sum::<f64>()
                })
                .sum();
            wmax * row
        })
        .collect()
}

/// `x + beta * (x - prev)`
pub(super) fn extrapolate<D: Dimension>(x: &Array<f64, D>, prev: &Array<f64, D>, beta: f64) -> Array<f64, D> {
    let mut y = x.clone();
    if beta != 0.0 {
        Zip::from(&mut y).and(prev).for_each(|y, &p| *y += beta * (*y - p));
    }
    y
}

/// Change of one block between iterations.
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct BlockChange {
    /// `||next - x|| / ||next||`
    pub relative: f64,
    /// `<y - next, next - x>`, positive when the momentum points uphill.
    pub restart: f64,
}

impl BlockChange {
    pub fn measure<D: Dimension>(x: &Array<f64, D>, y: &Array<f64, D>, next: &Array<f64, D>) -> Self {
        let mut diff2 = 0.0;
        let mut norm2 = 0.0;
        let mut restart = 0.0;
        Zip::from(x).and(y).and(next).for_each(|&x, &y, &n| {
            let d = n - x;
            diff2 += d * d;
            norm2 += n * n;
            restart += (y - n) * d;
        });
        let relative = if norm2 > 0.0 {
            (diff2 / norm2).sqrt()
        } else if diff2 > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        Self { relative, restart }
    }
}

/// Next term of the FISTA sequence: `(1 + sqrt(1 + 4 t^2)) / 2`.
pub(super) fn next_momentum(t: f64) -> f64 {
    0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt())
}
