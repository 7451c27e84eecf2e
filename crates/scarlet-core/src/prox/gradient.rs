use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::Result;

use super::monotonic::{check_center, tree_isotonic};
use super::with_flat_mut;

/// Direction in which a [`GradientOperator`] keeps flux from increasing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GradientAxis {
    /// Along every row, away from the center column.
    X,
    /// Along every column, away from the center row.
    Y,
}

/// One-dimensional monotonicity about the center column (X) or row (Y).
///
/// Each row (X) or column (Y) splits into two chains rooted on the center
/// line; the projection is the exact least-squares fit onto those chains.
#[derive(Clone, Debug)]
pub struct GradientOperator {
    shape: (usize, usize),
    axis: GradientAxis,
    parent: Vec<usize>,
    /// Children before parents, center line last.
    order: Vec<usize>,
}

fn step_toward(i: usize, target: usize) -> usize {
    if i < target {
        i + 1
    } else if i > target {
        i - 1
    } else {
        i
    }
}

impl GradientOperator {
    pub fn new(shape: (usize, usize), center: (usize, usize), axis: GradientAxis) -> Result<Self> {
        check_center(shape, center)?;
        let (h, w) = shape;
        let (cy, cx) = center;

        let mut parent = Vec::with_capacity(h * w);
        for r in 0..h {
            for c in 0..w {
                let (pr, pc) = match axis {
                    GradientAxis::X => (r, step_toward(c, cx)),
                    GradientAxis::Y => (step_toward(r, cy), c),
                };
                parent.push(pr * w + pc);
            }
        }

        let distance = |idx: usize| match axis {
            GradientAxis::X => (idx % w).abs_diff(cx),
            GradientAxis::Y => (idx / w).abs_diff(cy),
        };
        let mut order: Vec<usize> = (0..h * w).collect();
        order.sort_by_key(|&idx| std::cmp::Reverse(distance(idx)));

        Ok(Self {
            shape,
            axis,
            parent,
            order,
        })
    }

    pub fn axis(&self) -> GradientAxis {
        self.axis
    }

    pub fn apply(&self, x: &mut Array2<f64>) {
        debug_assert_eq!(x.dim(), self.shape);
        with_flat_mut(x, |values| tree_isotonic(values, &self.parent, &self.order));
    }
}
