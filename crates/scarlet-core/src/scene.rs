use std::fmt;

use ndarray::{s, Array3, ArrayView3, ArrayViewMut3, Zip};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ScarletError};

/// Caller-supplied source position in pixel coordinates (x = column, y = row).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    pub x: f64,
    pub y: f64,
}

impl Peak {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Nearest pixel as (row, col), or an error when the peak falls outside a
    /// `height` x `width` scene.
    pub fn pixel(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        let row = self.y.round();
        let col = self.x.round();
        let inside = row.is_finite()
            && col.is_finite()
            && row >= 0.0
            && col >= 0.0
            && row < height as f64
            && col < width as f64;
        if !inside {
            return Err(ScarletError::PeakOutsideScene {
                x: self.x,
                y: self.y,
                width,
                height,
            });
        }
        Ok((row as usize, col as usize))
    }
}

/// Rectangular region of the scene: origin (y0, x0) plus extent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct BoundingBox {
    pub y0: usize,
    pub x0: usize,
    pub height: usize,
    pub width: usize,
}

impl BoundingBox {
    pub fn new(y0: usize, x0: usize, height: usize, width: usize) -> Self {
        Self {
            y0,
            x0,
            height,
            width,
        }
    }

    /// The whole `height` x `width` scene.
    pub fn full(height: usize, width: usize) -> Self {
        Self::new(0, 0, height, width)
    }

    /// Box of side `2 * radius + 1` centered on (row, col), clipped to the scene.
    pub fn centered(row: usize, col: usize, radius: usize, height: usize, width: usize) -> Self {
        let y0 = row.saturating_sub(radius);
        let x0 = col.saturating_sub(radius);
        let y1 = row.saturating_add(radius).saturating_add(1).min(height);
        let x1 = col.saturating_add(radius).saturating_add(1).min(width);
        Self::new(y0, x0, y1.saturating_sub(y0), x1.saturating_sub(x0))
    }

    /// One past the last row.
    pub fn y1(&self) -> usize {
        self.y0 + self.height
    }

    /// One past the last column.
    pub fn x1(&self) -> usize {
        self.x0 + self.width
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.height, self.width)
    }

    pub fn is_empty(&self) -> bool {
        self.height == 0 || self.width == 0
    }

    pub fn contains(&self, row: usize, col: usize) -> bool {
        row >= self.y0 && row < self.y1() && col >= self.x0 && col < self.x1()
    }

    pub fn fits_within(&self, height: usize, width: usize) -> bool {
        !self.is_empty() && self.y1() <= height && self.x1() <= width
    }

    pub fn intersect(&self, other: &BoundingBox) -> Option<BoundingBox> {
        let y0 = self.y0.max(other.y0);
        let x0 = self.x0.max(other.x0);
        let y1 = self.y1().min(other.y1());
        let x1 = self.x1().min(other.x1());
        if y1 <= y0 || x1 <= x0 {
            return None;
        }
        Some(BoundingBox::new(y0, x0, y1 - y0, x1 - x0))
    }

    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.intersect(other).is_some()
    }

    /// Read the box region out of a [band, y, x] cube.
    pub fn gather<'a>(&self, cube: &'a Array3<f64>) -> ArrayView3<'a, f64> {
        cube.slice(s![.., self.y0..self.y1(), self.x0..self.x1()])
    }

    /// Mutable view of the box region of a [band, y, x] cube.
    pub fn gather_mut<'a>(&self, cube: &'a mut Array3<f64>) -> ArrayViewMut3<'a, f64> {
        cube.slice_mut(s![.., self.y0..self.y1(), self.x0..self.x1()])
    }

    /// Accumulate a box-local [band, h, w] array into the scene cube.
    pub fn scatter_add(&self, cube: &mut Array3<f64>, local: &ArrayView3<f64>) {
        let mut region = self.gather_mut(cube);
        region += local;
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}:{}, {}:{}]",
            self.y0,
            self.y1(),
            self.x0,
            self.x1()
        )
    }
}

/// Per-pixel weighting of the residual.
#[derive(Clone, Debug, Default)]
pub enum Weights {
    /// Every pixel weighted 1; no noise model is available.
    #[default]
    Uniform,
    /// One background RMS per band; weight = 1 / rms^2.
    BackgroundRms(Vec<f64>),
    /// Inverse-variance weights with the cube's shape.
    InverseVariance(Array3<f64>),
    /// Variance map with the cube's shape; weight = 1 / variance.
    Variance(Array3<f64>),
}

/// Image cube bound to its weight map. Masked pixels carry weight 0.
#[derive(Clone, Debug)]
pub struct Observation {
    images: Array3<f64>,
    weights: Array3<f64>,
    noise_model: bool,
}

fn sanitize_weight(w: f64) -> f64 {
    if w.is_finite() && w > 0.0 {
        w
    } else {
        0.0
    }
}

fn check_shape(what: &'static str, expected: (usize, usize, usize), actual: (usize, usize, usize)) -> Result<()> {
    if expected != actual {
        return Err(ScarletError::ShapeMismatch {
            what,
            expected: vec![expected.0, expected.1, expected.2],
            actual: vec![actual.0, actual.1, actual.2],
        });
    }
    Ok(())
}

impl Observation {
    pub fn new(images: Array3<f64>, weights: Weights) -> Result<Self> {
        let dim = images.dim();
        let (bands, height, width) = dim;
        if bands == 0 || height == 0 || width == 0 {
            return Err(ScarletError::InvalidParameter(format!(
                "image cube must be non-empty, got {bands}x{height}x{width}"
            )));
        }

        let (weights, noise_model) = match weights {
            Weights::Uniform => (Array3::<f64>::ones(dim), false),
            Weights::BackgroundRms(rms) => {
                if rms.len() != bands {
                    return Err(ScarletError::ShapeMismatch {
                        what: "background rms",
                        expected: vec![bands],
                        actual: vec![rms.len()],
                    });
                }
                if let Some(bad) = rms.iter().find(|r| !(r.is_finite() && **r > 0.0)) {
                    return Err(ScarletError::InvalidParameter(format!(
                        "background rms must be positive and finite, got {bad}"
                    )));
                }
                let w = Array3::from_shape_fn(dim, |(b, _, _)| 1.0 / (rms[b] * rms[b]));
                (w, true)
            }
            Weights::InverseVariance(w) => {
                check_shape("weights", dim, w.dim())?;
                (w.mapv(sanitize_weight), true)
            }
            Weights::Variance(var) => {
                check_shape("variance", dim, var.dim())?;
                (var.mapv(|v| sanitize_weight(1.0 / v)), true)
            }
        };

        let mut images = images;
        let mut unusable = false;
        Zip::from(&mut images).and(&weights).for_each(|d, &w| {
            if !d.is_finite() {
                if w > 0.0 {
                    unusable = true;
                }
                *d = 0.0;
            }
        });
        if unusable {
            return Err(ScarletError::InvalidParameter(
                "image cube has non-finite values at unmasked pixels".into(),
            ));
        }

        Ok(Self {
            images,
            weights,
            noise_model,
        })
    }

    /// Subtract a constant background level per band.
    pub fn with_sky(mut self, sky: &[f64]) -> Result<Self> {
        if sky.len() != self.bands() {
            return Err(ScarletError::ShapeMismatch {
                what: "sky",
                expected: vec![self.bands()],
                actual: vec![sky.len()],
            });
        }
        for (mut band, &level) in self.images.outer_iter_mut().zip(sky) {
            band -= level;
        }
        Ok(self)
    }

    pub fn bands(&self) -> usize {
        self.images.dim().0
    }

    pub fn height(&self) -> usize {
        self.images.dim().1
    }

    pub fn width(&self) -> usize {
        self.images.dim().2
    }

    pub fn shape(&self) -> (usize, usize, usize) {
        self.images.dim()
    }

    pub fn images(&self) -> &Array3<f64> {
        &self.images
    }

    pub fn weights(&self) -> &Array3<f64> {
        &self.weights
    }

    pub fn max_weight(&self) -> f64 {
        self.weights.iter().copied().fold(0.0, f64::max)
    }

    pub fn is_masked(&self, band: usize, row: usize, col: usize) -> bool {
        self.weights[[band, row, col]] <= 0.0
    }

    /// Noise sigma at a pixel, when the weights carry a noise model and the
    /// pixel is not masked.
    pub fn noise_rms(&self, band: usize, row: usize, col: usize) -> Option<f64> {
        if !self.noise_model {
            return None;
        }
        let w = self.weights[[band, row, col]];
        (w > 0.0).then(|| 1.0 / w.sqrt())
    }

    /// Gradient of the weighted least-squares objective: W * (model - data).
    pub fn weighted_residual(&self, model: &Array3<f64>) -> Array3<f64> {
        let mut residual = Array3::<f64>::zeros(self.images.dim());
        Zip::from(&mut residual)
            .and(model)
            .and(&self.images)
            .and(&self.weights)
            .for_each(|r, &m, &d, &w| *r = w * (m - d));
        residual
    }

    /// 0.5 * sum(W * (model - data)^2).
    pub fn objective(&self, model: &Array3<f64>) -> f64 {
        let mut total = 0.0;
        Zip::from(model)
            .and(&self.images)
            .and(&self.weights)
            .for_each(|&m, &d, &w| total += w * (m - d) * (m - d));
        0.5 * total
    }

    /// Unweighted RMS of (data - model) over unmasked pixels.
    pub fn residual_rms(&self, model: &Array3<f64>) -> f64 {
        let mut sum = 0.0;
        let mut count = 0usize;
        Zip::from(model)
            .and(&self.images)
            .and(&self.weights)
            .for_each(|&m, &d, &w| {
                if w > 0.0 {
                    sum += (d - m) * (d - m);
                    count += 1;
                }
            });
        if count == 0 {
            0.0
        } else {
            (sum / count as f64).sqrt()
        }
    }
}
