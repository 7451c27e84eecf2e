use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::blend::{Blend, FitConfig, FitObserver, FitSummary, NoOpObserver};
use crate::component::{Component, ComponentConfig};
use crate::consts::{
    DEFAULT_PSF_MATCH_E_REL, DEFAULT_PSF_MATCH_L0_THRESH, DEFAULT_PSF_MATCH_MAX_ITER, DEFAULT_SLACK,
    DEFAULT_TARGET_SCALE,
};
use crate::constraint::{ConstraintKind, SedConstraint};
use crate::convolve::{ConvolutionMethod, Kernel, PsfOperator};
use crate::error::{Result, ScarletError};
use crate::scene::{BoundingBox, Observation, Weights};

use super::model::{fit_gaussian, fit_moffat, generate_psf, PsfModel};

/// The common PSF every band is matched to.
#[derive(Clone, Debug)]
pub enum TargetPsf {
    /// An explicit kernel image.
    Image(Array2<f64>),
    /// An analytic profile sampled on the PSF grid.
    Model(PsfModel),
    /// A Gaussian fitted to the narrowest band, narrowed by `scale`.
    FitGaussian { scale: f64 },
    /// A Moffat of fixed `beta` fitted to the narrowest band, narrowed by `scale`.
    FitMoffat { beta: f64, scale: f64 },
}

impl Default for TargetPsf {
    fn default() -> Self {
        Self::FitGaussian {
            scale: DEFAULT_TARGET_SCALE,
        }
    }
}

/// Solver settings for difference-kernel fits.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PsfMatchConfig {
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    #[serde(default = "default_e_rel")]
    pub e_rel: f64,
    /// Kernel pixels below this level are zeroed after every step.
    #[serde(default = "default_l0_thresh")]
    pub l0_thresh: f64,
    /// Extra kernel constraints, applied before the sparsity threshold.
    #[serde(default)]
    pub constraints: Vec<ConstraintKind>,
    #[serde(default)]
    pub convolution: ConvolutionMethod,
}

fn default_max_iter() -> usize {
    DEFAULT_PSF_MATCH_MAX_ITER
}
fn default_e_rel() -> f64 {
    DEFAULT_PSF_MATCH_E_REL
}
fn default_l0_thresh() -> f64 {
    DEFAULT_PSF_MATCH_L0_THRESH
}

impl Default for PsfMatchConfig {
    fn default() -> Self {
        Self {
            max_iter: DEFAULT_PSF_MATCH_MAX_ITER,
            e_rel: DEFAULT_PSF_MATCH_E_REL,
            l0_thresh: DEFAULT_PSF_MATCH_L0_THRESH,
            constraints: Vec::new(),
            convolution: ConvolutionMethod::default(),
        }
    }
}

/// Fitted difference kernels: `kernels[b] * target ~ psfs[b]`.
#[derive(Clone, Debug)]
pub struct DiffKernels {
    /// [band, h, w], one kernel per band.
    pub kernels: Array3<f64>,
    pub target: Array2<f64>,
    /// The underlying fit, for diagnostics.
    pub blend: Blend,
    pub summary: FitSummary,
}

impl DiffKernels {
    pub fn kernel(&self, band: usize) -> ArrayView2<'_, f64> {
        self.kernels.index_axis(Axis(0), band)
    }

    /// Non-zero pixels in each kernel.
    pub fn nonzero_counts(&self) -> Vec<usize> {
        self.kernels
            .outer_iter()
            .map(|k| k.iter().filter(|&&v| v != 0.0).count())
            .collect()
    }
}

fn check_scale(scale: f64) -> Result<()> {
    if !(scale.is_finite() && scale > 0.0) {
        return Err(ScarletError::InvalidParameter(format!(
            "target scale must be positive, got {scale}"
        )));
    }
    Ok(())
}

/// Sample the target on the PSF grid, fitting it first if needed.
pub fn resolve_target(psfs: &Array3<f64>, target: &TargetPsf) -> Result<Array2<f64>> {
    let (_, height, width) = psfs.dim();
    match target {
        TargetPsf::Image(image) => {
            if image.is_empty() || !image.iter().all(|v| v.is_finite()) {
                return Err(ScarletError::InvalidParameter(
                    "target PSF image must be non-empty and finite".into(),
                ));
            }
            Ok(image.clone())
        }
        TargetPsf::Model(model) => generate_psf(model, height, width),
        TargetPsf::FitGaussian { scale } => {
            check_scale(*scale)?;
            let narrowest = narrowest(psfs, |psf| fit_gaussian(psf))?;
            generate_psf(&narrowest.scaled(*scale), height, width)
        }
        TargetPsf::FitMoffat { beta, scale } => {
            check_scale(*scale)?;
            let narrowest = narrowest(psfs, |psf| fit_moffat(psf, *beta))?;
            generate_psf(&narrowest.scaled(*scale), height, width)
        }
    }
}

fn narrowest<F>(psfs: &Array3<f64>, fit: F) -> Result<PsfModel>
where
    F: Fn(&ArrayView2<f64>) -> Result<PsfModel>,
{
    let mut best: Option<PsfModel> = None;
    for psf in psfs.outer_iter() {
        let model = fit(&psf)?;
        match best {
            Some(b) if b.fwhm() <= model.fwhm() => {}
            _ => best = Some(model),
        }
    }
    best.ok_or_else(|| ScarletError::InvalidParameter("PSF stack has no bands".into()))
}

/// Fit one difference kernel per band so that convolving it with the target
/// reproduces that band's PSF.
pub fn build_diff_kernels(psfs: &Array3<f64>, target: &TargetPsf, config: &PsfMatchConfig) -> Result<DiffKernels> {
    build_diff_kernels_reported(psfs, target, config, &NoOpObserver)
}

/// [`build_diff_kernels`] with progress callbacks.
///
/// Every band becomes one component: a one-hot fixed SED, a full-grid
/// morphology starting from the band's own PSF, and the target as its
/// kernel. The PSF stack itself is the data.
pub fn build_diff_kernels_reported(
    psfs: &Array3<f64>,
    target: &TargetPsf,
    config: &PsfMatchConfig,
    observer: &dyn FitObserver,
) -> Result<DiffKernels> {
    let (bands, height, width) = psfs.dim();
    if bands == 0 || height == 0 || width == 0 {
        return Err(ScarletError::InvalidParameter(format!(
            "PSF stack must be non-empty, got {bands}x{height}x{width}"
        )));
    }
    let target = resolve_target(psfs, target)?;
    let operator = PsfOperator::broadcast(Kernel::Full(target.clone()), bands, config.convolution)?;

    let mut constraints = config.constraints.clone();
    constraints.push(ConstraintKind::HardThreshold {
        thresh: config.l0_thresh,
    });
    let component_config = ComponentConfig {
        constraints,
        sed_constraint: SedConstraint::Positive,
        positive_morphology: true,
        min_snr: 0.0,
        ..ComponentConfig::default()
    };

    let bbox = BoundingBox::full(height, width);
    let center = (height / 2, width / 2);
    let components = psfs
        .outer_iter()
        .enumerate()
        .map(|(b, psf)| {
            let mut sed = Array1::<f64>::zeros(bands);
            sed[b] = 1.0;
            let morph = psf.mapv(|v| v.max(0.0));
            Ok(
                Component::new((height, width), bbox, center, sed, morph, &component_config)?
                    .with_psf(&operator)?
                    .with_fixed_sed(),
            )
        })
        .collect::<Result<Vec<_>>>()?;

    let observation = Observation::new(psfs.clone(), Weights::Uniform)?;
    let mut blend = Blend::new(observation, components)?;
    let fit = FitConfig {
        max_iter: config.max_iter,
        e_rel: config.e_rel,
        slack: DEFAULT_SLACK,
        time_limit_secs: None,
    };
    let summary = blend.fit_with(&fit, observer)?;

    let mut kernels = Array3::<f64>::zeros((bands, height, width));
    for (mut kernel, component) in kernels.outer_iter_mut().zip(blend.components()) {
        kernel.assign(component.morphology());
    }

    info!(
        bands,
        iterations = summary.iterations,
        residual_rms = summary.residual_rms,
        "Difference kernels built"
    );

    Ok(DiffKernels {
        kernels,
        target,
        blend,
        summary,
    })
}
