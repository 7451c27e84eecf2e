use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScarletError};

use super::with_flat_mut;

/// How the inward reference value of each pixel is formed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum MonotonicMode {
    /// Single closest neighbour that is nearer to the center.
    #[default]
    Nearest,
    /// Cosine-weighted average of the inward neighbours.
    Weighted,
    /// Exact isotonic projection on the nearest-neighbour tree. Can be slow
    /// and is sensitive to pathological inputs.
    Exact,
}

impl std::fmt::Display for MonotonicMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Nearest => write!(f, "Nearest"),
            Self::Weighted => write!(f, "Weighted"),
            Self::Exact => write!(f, "Exact"),
        }
    }
}

/// Radial monotonicity about a center pixel.
///
/// Ordering is guaranteed only along the reference structure: in `Nearest`
/// and `Exact` mode every pixel ends up no brighter than its nearest inward
/// neighbour, so flux decreases along each parent chain (the axes and
/// diagonals among them). Rays at other angles cross chains and may
/// brighten. `Weighted` mode caps each pixel by the weighted mean of its
/// inward neighbours, which does not order any single neighbour pair.
///
/// The neighbour geometry (the sparse "linear operator" of the constraint) is
/// computed once from the box shape and center and reused on every call.
#[derive(Clone, Debug)]
pub struct MonotonicOperator {
    shape: (usize, usize),
    center: usize,
    mode: MonotonicMode,
    min_gradient: f64,
    /// Non-center pixels sorted by increasing distance from the center.
    order: Vec<usize>,
    /// Inward references (flat index, weight) per pixel; weights sum to one.
    references: Vec<Vec<(usize, f64)>>,
    /// Nearest inward neighbour per pixel. The center is its own parent.
    parent: Vec<usize>,
}

pub(crate) fn check_center(shape: (usize, usize), center: (usize, usize)) -> Result<()> {
    let (h, w) = shape;
    if h == 0 || w == 0 || center.0 >= h || center.1 >= w {
        return Err(ScarletError::InvalidParameter(format!(
            "center {center:?} outside a {h}x{w} morphology"
        )));
    }
    Ok(())
}

impl MonotonicOperator {
    pub fn new(
        shape: (usize, usize),
        center: (usize, usize),
        mode: MonotonicMode,
        min_gradient: f64,
    ) -> Result<Self> {
        check_center(shape, center)?;
        if !(0.0..1.0).contains(&min_gradient) {
            return Err(ScarletError::InvalidParameter(format!(
                "monotonic min_gradient must lie in [0, 1), got {min_gradient}"
            )));
        }

        let (h, w) = shape;
        let (cy, cx) = (center.0 as f64, center.1 as f64);
        let center_idx = center.0 * w + center.1;
        let distance = |r: i64, c: i64| ((r as f64 - cy).powi(2) + (c as f64 - cx).powi(2)).sqrt();

        let n = h * w;
        let mut parent = vec![center_idx; n];
        let mut references: Vec<Vec<(usize, f64)>> = vec![Vec::new(); n];

        for r in 0..h as i64 {
            for c in 0..w as i64 {
                let idx = r as usize * w + c as usize;
                if idx == center_idx {
                    continue;
                }
                let d = distance(r, c);
                let (uy, ux) = ((cy - r as f64) / d, (cx - c as f64) / d);

                let mut nearest: Option<(usize, f64)> = None;
                let mut weighted = Vec::with_capacity(3);
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let (nr, nc) = (r + dy, c + dx);
                        if (dy == 0 && dx == 0) || nr < 0 || nc < 0 || nr >= h as i64 || nc >= w as i64 {
                            continue;
                        }
                        let nd = distance(nr, nc);
                        if nd >= d {
                            continue;
                        }
                        let nidx = nr as usize * w + nc as usize;
                        if nearest.map_or(true, |(_, best)| nd < best) {
                            nearest = Some((nidx, nd));
                        }
                        let cos = (dy as f64 * uy + dx as f64 * ux) / ((dy * dy + dx * dx) as f64).sqrt();
                        if cos > 0.0 {
                            weighted.push((nidx, cos));
                        }
                    }
                }

                // A step toward the center always exists on the grid.
                let Some((nearest_idx, _)) = nearest else {
                    continue;
                };
                parent[idx] = nearest_idx;
                references[idx] = match mode {
                    MonotonicMode::Weighted => {
                        let total: f64 = weighted.iter().map(|(_, wt)| wt).sum();
                        weighted.into_iter().map(|(j, wt)| (j, wt / total)).collect()
                    }
                    MonotonicMode::Nearest | MonotonicMode::Exact => vec![(nearest_idx, 1.0)],
                };
            }
        }

        let mut order: Vec<usize> = (0..n).filter(|&i| i != center_idx).collect();
        order.sort_by(|&a, &b| {
            let da = distance((a / w) as i64, (a % w) as i64);
            let db = distance((b / w) as i64, (b % w) as i64);
            da.total_cmp(&db).then(a.cmp(&b))
        });

        Ok(Self {
            shape,
            center: center_idx,
            mode,
            min_gradient,
            order,
            references,
            parent,
        })
    }

    pub fn mode(&self) -> MonotonicMode {
        self.mode
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Inward references of the pixel at (row, col).
    pub fn references(&self, row: usize, col: usize) -> &[(usize, f64)] {
        &self.references[row * self.shape.1 + col]
    }

    /// Project `x` in place so every pixel is no brighter than its inward
    /// reference. `min_gradient` only applies to the approximate modes.
    pub fn apply(&self, x: &mut Array2<f64>) {
        debug_assert_eq!(x.dim(), self.shape);
        with_flat_mut(x, |values| match self.mode {
            MonotonicMode::Nearest | MonotonicMode::Weighted => self.apply_approximate(values),
            MonotonicMode::Exact => {
                let order: Vec<usize> = self
                    .order
                    .iter()
                    .rev()
                    .copied()
                    .chain(std::iter::once(self.center))
                    .collect();
                tree_isotonic(values, &self.parent, &order);
            }
        });
    }

    fn apply_approximate(&self, values: &mut [f64]) {
        let scale = 1.0 - self.min_gradient;
        for &idx in &self.order {
            let refs = &self.references[idx];
            if refs.is_empty() {
                continue;
            }
            let reference: f64 = refs.iter().map(|&(j, wt)| wt * values[j]).sum();
            let cap = reference * scale;
            if values[idx] > cap {
                values[idx] = cap;
            }
        }
    }
}

/// Exact projection onto `{x : x[center] >= x[p] for all p}`.
#[derive(Clone, Debug)]
pub struct CenterOperator {
    shape: (usize, usize),
    parent: Vec<usize>,
    order: Vec<usize>,
}

impl CenterOperator {
    pub fn new(shape: (usize, usize), center: (usize, usize)) -> Result<Self> {
        check_center(shape, center)?;
        let n = shape.0 * shape.1;
        let center_idx = center.0 * shape.1 + center.1;
        let order = (0..n)
            .filter(|&i| i != center_idx)
            .chain(std::iter::once(center_idx))
            .collect();
        Ok(Self {
            shape,
            parent: vec![center_idx; n],
            order,
        })
    }

    pub fn apply(&self, x: &mut Array2<f64>) {
        debug_assert_eq!(x.dim(), self.shape);
        with_flat_mut(x, |values| tree_isotonic(values, &self.parent, &self.order));
    }
}

#[derive(Default)]
struct Block {
    sum: f64,
    count: usize,
    members: Vec<usize>,
    pending: Vec<usize>,
}

impl Block {
    fn mean(&self) -> f64 {
        self.sum / self.count as f64
    }
}

/// Least-squares projection onto `{x : x[v] <= x[parent[v]]}` for a rooted
/// tree. `order` lists every node with children before their parent and the
/// root last.
///
/// Bottom-up block merging: each node absorbs the child block with the
/// largest mean while that mean exceeds its own.
pub(crate) fn tree_isotonic(values: &mut [f64], parent: &[usize], order: &[usize]) {
    let n = values.len();
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); n];
    for &node in order {
        if parent[node] != node {
            children[parent[node]].push(node);
        }
    }

    let mut block_of = vec![usize::MAX; n];
    let mut blocks: Vec<Block> = Vec::with_capacity(n);

    for &node in order {
        let mut block = Block {
            sum: values[node],
            count: 1,
            members: vec![node],
            pending: children[node]
                .iter()
                .map(|&c| block_of[c])
                .filter(|&id| id != usize::MAX)
                .collect(),
        };

        loop {
            let best = block
                .pending
                .iter()
                .enumerate()
                .max_by(|a, b| blocks[*a.1].mean().total_cmp(&blocks[*b.1].mean()))
                .map(|(pos, &id)| (pos, id));
            match best {
                Some((pos, id)) if blocks[id].mean() > block.mean() => {
                    block.pending.swap_remove(pos);
                    let child = std::mem::take(&mut blocks[id]);
                    block.sum += child.sum;
                    block.count += child.count;
                    block.members.extend(child.members);
                    block.pending.extend(child.pending);
                }
                _ => break,
            }
        }

        block_of[node] = blocks.len();
        blocks.push(block);
    }

    for block in blocks.iter().filter(|b| b.count > 0) {
        let mean = block.mean();
        for &m in &block.members {
            values[m] = mean;
        }
    }
}
