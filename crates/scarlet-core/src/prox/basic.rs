//! Element-wise proximal operators. All of them work in place on any ndarray
//! of floats and are projections (idempotent) for a fixed threshold.

use ndarray::{ArrayBase, DataMut, Dimension};
use num_traits::Float;

/// Clamp every entry to be non-negative. NaN entries become zero.
pub fn prox_plus<F, S, D>(x: &mut ArrayBase<S, D>)
where
    F: Float,
    S: DataMut<Elem = F>,
    D: Dimension,
{
    x.mapv_inplace(|v| if v > F::zero() { v } else { F::zero() });
}

/// Hard threshold: zero every entry with `|v| < thresh`.
pub fn prox_hard<F, S, D>(x: &mut ArrayBase<S, D>, thresh: F)
where
    F: Float,
    S: DataMut<Elem = F>,
    D: Dimension,
{
    x.mapv_inplace(|v| if v.abs() < thresh { F::zero() } else { v });
}

/// L0 projection with a budget: keep the `budget` largest-magnitude entries
/// and zero the rest. Ties are broken in favour of the lower logical index.
pub fn prox_l0<F, S, D>(x: &mut ArrayBase<S, D>, budget: usize)
where
    F: Float,
    S: DataMut<Elem = F>,
    D: Dimension,
{
    let n = x.len();
    if budget >= n {
        return;
    }
    let magnitudes: Vec<F> = x.iter().map(|v| v.abs()).collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
        magnitudes[b]
            .partial_cmp(&magnitudes[a])
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });

    let mut keep = vec![false; n];
    for &idx in &order[..budget] {
        keep[idx] = true;
    }
    for (v, keep) in x.iter_mut().zip(keep) {
        if !keep {
            *v = F::zero();
        }
    }
}

/// Soft threshold (L1 proximal operator): shrink magnitudes by `thresh`.
pub fn prox_soft<F, S, D>(x: &mut ArrayBase<S, D>, thresh: F)
where
    F: Float,
    S: DataMut<Elem = F>,
    D: Dimension,
{
    x.mapv_inplace(|v| {
        let shrunk = v.abs() - thresh;
        if shrunk > F::zero() {
            shrunk * v.signum()
        } else {
            F::zero()
        }
    });
}

/// Soft threshold restricted to the non-negative orthant.
pub fn prox_soft_plus<F, S, D>(x: &mut ArrayBase<S, D>, thresh: F)
where
    F: Float,
    S: DataMut<Elem = F>,
    D: Dimension,
{
    x.mapv_inplace(|v| {
        let shrunk = v - thresh;
        if shrunk > F::zero() {
            shrunk
        } else {
            F::zero()
        }
    });
}

/// Clamp to non-negative and normalise to unit sum. Falls back to a uniform
/// vector when nothing positive is left.
///
/// Returns the sum before normalisation (zero on fallback).
pub fn prox_unity_plus<F, S, D>(x: &mut ArrayBase<S, D>) -> F
where
    F: Float,
    S: DataMut<Elem = F>,
    D: Dimension,
{
    prox_plus(x);
    let total = x.iter().fold(F::zero(), |acc, &v| acc + v);
    if total > F::zero() && total.is_finite() {
        x.mapv_inplace(|v| v / total);
        total
    } else {
        let n = F::from(x.len().max(1)).unwrap_or_else(F::one);
        x.fill(F::one() / n);
        F::zero()
    }
}
