use std::f64::consts::PI;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::consts::SIGMA_TO_FWHM;
use crate::error::{Result, ScarletError};

/// Analytic PSF profile.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum PsfModel {
    /// `exp(-r^2 / (2 sigma^2))`
    Gaussian { sigma: f64 },
    /// `(1 + r^2 / alpha^2)^(-beta)`
    Moffat { alpha: f64, beta: f64 },
}

impl PsfModel {
    /// Full width at half maximum in pixels.
    pub fn fwhm(&self) -> f64 {
        match *self {
            Self::Gaussian { sigma } => sigma * SIGMA_TO_FWHM,
            Self::Moffat { alpha, beta } => 2.0 * alpha * (2f64.powf(1.0 / beta) - 1.0).sqrt(),
        }
    }

    /// The same profile with its width multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        match *self {
            Self::Gaussian { sigma } => Self::Gaussian {
                sigma: sigma * factor,
            },
            Self::Moffat { alpha, beta } => Self::Moffat {
                alpha: alpha * factor,
                beta,
            },
        }
    }

    fn validate(&self) -> Result<()> {
        let ok = match *self {
            Self::Gaussian { sigma } => sigma.is_finite() && sigma > 0.0,
            Self::Moffat { alpha, beta } => {
                alpha.is_finite() && alpha > 0.0 && beta.is_finite() && beta > 0.0
            }
        };
        if !ok {
            return Err(ScarletError::InvalidParameter(format!(
                "PSF model parameters must be positive and finite: {self:?}"
            )));
        }
        Ok(())
    }

    fn profile(&self, r2: f64) -> f64 {
        match *self {
            Self::Gaussian { sigma } => (-r2 / (2.0 * sigma * sigma)).exp(),
            Self::Moffat { alpha, beta } => (1.0 + r2 / (alpha * alpha)).powf(-beta),
        }
    }
}

// ---------------------------------------------------------------------------
// PSF generation
// ---------------------------------------------------------------------------

/// Sample `model` on a `height` x `width` grid centered at
/// `(height / 2, width / 2)`, normalized to sum 1.
pub fn generate_psf(model: &PsfModel, height: usize, width: usize) -> Result<Array2<f64>> {
    model.validate()?;
    if height == 0 || width == 0 {
        return Err(ScarletError::InvalidParameter(format!(
            "PSF grid must be non-empty, got {height}x{width}"
        )));
    }
    let (cy, cx) = ((height / 2) as f64, (width / 2) as f64);
    let mut psf = Array2::from_shape_fn((height, width), |(r, c)| {
        let dy = r as f64 - cy;
        let dx = c as f64 - cx;
        model.profile(dx * dx + dy * dy)
    });
    let sum = psf.sum();
    if sum > 0.0 {
        psf /= sum;
    }
    Ok(psf)
}

// ---------------------------------------------------------------------------
// Moment fitting
// ---------------------------------------------------------------------------

/// Positive flux and its centroid (row, col).
fn centroid(psf: &ArrayView2<f64>) -> Result<(f64, f64, f64)> {
    let mut total = 0.0;
    let mut sy = 0.0;
    let mut sx = 0.0;
    for ((r, c), &v) in psf.indexed_iter() {
        if v > 0.0 {
            total += v;
            sy += v * r as f64;
            sx += v * c as f64;
        }
    }
    if !(total > 0.0 && total.is_finite()) {
        return Err(ScarletError::InvalidParameter(
            "PSF has no positive flux to measure".into(),
        ));
    }
    Ok((total, sy / total, sx / total))
}

/// Gaussian-equivalent width from the second moment of the positive flux:
/// `sigma^2 = sum(I * r^2) / (2 * sum(I))`.
pub fn moment_sigma(psf: &ArrayView2<f64>) -> Result<f64> {
    let (total, cy, cx) = centroid(psf)?;
    let mut second = 0.0;
    for ((r, c), &v) in psf.indexed_iter() {
        if v > 0.0 {
            let dy = r as f64 - cy;
            let dx = c as f64 - cx;
            second += v * (dx * dx + dy * dy);
        }
    }
    Ok((second / (2.0 * total)).sqrt())
}

/// Gaussian with the PSF's moment width.
pub fn fit_gaussian(psf: &ArrayView2<f64>) -> Result<PsfModel> {
    let sigma = moment_sigma(psf)?;
    if sigma <= 0.0 {
        return Err(ScarletError::InvalidParameter(
            "PSF is a single pixel; cannot fit a width".into(),
        ));
    }
    Ok(PsfModel::Gaussian { sigma })
}

/// Moffat profile of fixed `beta` whose FWHM matches the PSF. The FWHM is
/// taken from the area of the pixels above half the maximum.
pub fn fit_moffat(psf: &ArrayView2<f64>, beta: f64) -> Result<PsfModel> {
    if !(beta.is_finite() && beta > 0.0) {
        return Err(ScarletError::InvalidParameter(format!(
            "Moffat beta must be positive, got {beta}"
        )));
    }
    centroid(psf)?;
    let peak = psf.iter().copied().fold(f64::MIN, f64::max);
    let half = 0.5 * peak;
    let area = psf.iter().filter(|&&v| v >= half).count() as f64;
    let fwhm = 2.0 * (area / PI).sqrt();
    let alpha = fwhm / (2.0 * (2f64.powf(1.0 / beta) - 1.0).sqrt());
    Ok(PsfModel::Moffat { alpha, beta })
}
