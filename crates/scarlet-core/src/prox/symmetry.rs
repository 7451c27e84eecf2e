use ndarray::Array2;

use crate::error::Result;

use super::monotonic::check_center;
use super::with_flat_mut;

/// 180-degree symmetry about a center pixel.
///
/// Each pixel whose rotated partner lies inside the box is replaced by the
/// mean of the pair. Pixels without a partner (boxes clipped at the scene
/// edge) are left unconstrained.
#[derive(Clone, Debug)]
pub struct SymmetryOperator {
    shape: (usize, usize),
    /// Flat index pairs (p, rotate180(p)) with p before its partner.
    pairs: Vec<(usize, usize)>,
}

impl SymmetryOperator {
    pub fn new(shape: (usize, usize), center: (usize, usize)) -> Result<Self> {
        check_center(shape, center)?;
        let (h, w) = shape;
        let (cy, cx) = (center.0 as i64, center.1 as i64);
        let mut pairs = Vec::new();
        for r in 0..h as i64 {
            for c in 0..w as i64 {
                let (pr, pc) = (2 * cy - r, 2 * cx - c);
                if pr < 0 || pc < 0 || pr >= h as i64 || pc >= w as i64 {
                    continue;
                }
                let idx = r as usize * w + c as usize;
                let partner = pr as usize * w + pc as usize;
                if idx < partner {
                    pairs.push((idx, partner));
                }
            }
        }
        Ok(Self { shape, pairs })
    }

    pub fn apply(&self, x: &mut Array2<f64>) {
        debug_assert_eq!(x.dim(), self.shape);
        with_flat_mut(x, |values| {
            for &(a, b) in &self.pairs {
                let mean = 0.5 * (values[a] + values[b]);
                values[a] = mean;
                values[b] = mean;
            }
        });
    }
}
