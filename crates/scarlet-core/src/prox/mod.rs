pub mod basic;
pub mod gradient;
pub mod monotonic;
pub mod symmetry;

use ndarray::Array2;

pub use basic::{prox_hard, prox_l0, prox_plus, prox_soft, prox_soft_plus, prox_unity_plus};
pub use gradient::{GradientAxis, GradientOperator};
pub use monotonic::{CenterOperator, MonotonicMode, MonotonicOperator};
pub use symmetry::SymmetryOperator;

/// Run `f` on the row-major flat buffer of `x`, copying only when the array
/// is not in standard layout.
pub(crate) fn with_flat_mut<F>(x: &mut Array2<f64>, f: F)
where
    F: FnOnce(&mut [f64]),
{
    if let Some(values) = x.as_slice_mut() {
        f(values);
        return;
    }
    let mut values: Vec<f64> = x.iter().copied().collect();
    f(&mut values);
    for (dst, src) in x.iter_mut().zip(values) {
        *dst = src;
    }
}
