use ndarray::Array3;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::blend::{Blend, FitConfig, FitObserver, FitSummary, NoOpObserver};
use crate::component::{Component, ComponentConfig};
use crate::convolve::{ConvolutionMethod, PsfOperator};
use crate::error::{Result, ScarletError};
use crate::scene::{Observation, Peak};

/// Everything needed to deblend one scene.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeblendConfig {
    #[serde(default)]
    pub component: ComponentConfig,
    #[serde(default)]
    pub fit: FitConfig,
    #[serde(default)]
    pub convolution: ConvolutionMethod,
    /// Scene-wide components added after the peaks to soak up unmodelled
    /// flux.
    #[serde(default)]
    pub garbage_collectors: usize,
}

/// Result of [`deblend`].
#[derive(Clone, Debug)]
pub struct DeblendOutput {
    pub blend: Blend,
    pub summary: FitSummary,
    /// Peaks dropped for insufficient flux.
    pub skipped: Vec<Peak>,
}

impl DeblendOutput {
    /// Reconstructed model cube.
    pub fn model(&self) -> Array3<f64> {
        self.blend.get_model()
    }
}

/// Initialise one component per peak, skip insignificant peaks, append any
/// garbage collectors, and fit.
pub fn deblend(
    observation: Observation,
    peaks: &[Peak],
    psf: Option<&Array3<f64>>,
    config: &DeblendConfig,
) -> Result<DeblendOutput> {
    deblend_reported(observation, peaks, psf, config, &NoOpObserver)
}

/// [`deblend`] with progress callbacks.
pub fn deblend_reported(
    observation: Observation,
    peaks: &[Peak],
    psf: Option<&Array3<f64>>,
    config: &DeblendConfig,
    observer: &dyn FitObserver,
) -> Result<DeblendOutput> {
    let operator = match psf {
        Some(stack) => {
            if stack.dim().0 != observation.bands() {
                return Err(ScarletError::ShapeMismatch {
                    what: "PSF bands",
                    expected: vec![observation.bands()],
                    actual: vec![stack.dim().0],
                });
            }
            Some(PsfOperator::from_stack(stack, config.convolution)?)
        }
        None => None,
    };

    info!(
        peaks = peaks.len(),
        bands = observation.bands(),
        convolution = %config.convolution,
        garbage_collectors = config.garbage_collectors,
        "Deblending scene"
    );
    let collectors = (0..config.garbage_collectors)
        .map(|_| {
            Component::garbage_collector(
                &observation,
                operator.as_ref(),
                config.garbage_collectors,
                &config.component,
            )
        })
        .collect::<Result<Vec<_>>>()?;
    let (blend, skipped) =
        Blend::from_peaks(observation, peaks, operator.as_ref(), &config.component)?;
    let mut blend = if collectors.is_empty() {
        blend
    } else {
        blend.with_components(collectors)?
    };
    let summary = blend.fit_with(&config.fit, observer)?;

    Ok(DeblendOutput {
        blend,
        summary,
        skipped,
    })
}
