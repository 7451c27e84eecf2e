use ndarray::{s, Array1, Array2, Array3, ArrayView2, ArrayView3};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::consts::{DEFAULT_BOX_RADIUS, DEFAULT_MIN_SNR};
use crate::constraint::{ConstraintChain, ConstraintKind, SedConstraint};
use crate::convolve::{PreparedPsf, PsfOperator};
use crate::error::{Result, ScarletError};
use crate::prox::MonotonicMode;
use crate::scene::{BoundingBox, Observation, Peak};

/// How components are built from peaks and constrained during the fit.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ComponentConfig {
    /// Half-width of the bounding box; the box side is `2 * box_radius + 1`
    /// before clipping to the scene.
    #[serde(default = "default_box_radius")]
    pub box_radius: usize,
    /// Morphology constraints, applied left to right.
    #[serde(default = "default_constraints")]
    pub constraints: Vec<ConstraintKind>,
    #[serde(default)]
    pub sed_constraint: SedConstraint,
    /// Append a positivity projection to the morphology constraints.
    #[serde(default = "default_positive_morphology")]
    pub positive_morphology: bool,
    /// Peak flux summed over bands must exceed `min_snr` noise sigmas.
    #[serde(default = "default_min_snr")]
    pub min_snr: f64,
}

fn default_box_radius() -> usize {
    DEFAULT_BOX_RADIUS
}
fn default_constraints() -> Vec<ConstraintKind> {
    vec![
        ConstraintKind::monotonic(MonotonicMode::Nearest),
        ConstraintKind::Symmetric,
    ]
}
fn default_positive_morphology() -> bool {
    true
}
fn default_min_snr() -> f64 {
    DEFAULT_MIN_SNR
}

impl Default for ComponentConfig {
    fn default() -> Self {
        Self {
            box_radius: DEFAULT_BOX_RADIUS,
            constraints: default_constraints(),
            sed_constraint: SedConstraint::default(),
            positive_morphology: true,
            min_snr: DEFAULT_MIN_SNR,
        }
    }
}

impl ComponentConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.min_snr.is_finite() && self.min_snr >= 0.0) {
            return Err(ScarletError::InvalidParameter(format!(
                "min_snr must be finite and non-negative, got {}",
                self.min_snr
            )));
        }
        Ok(())
    }
}

/// One source: an SED shared by a single morphology, convolved per band and
/// placed into its bounding box.
///
/// `model[b] = sed[b] * convolve(morphology, kernel[b])`
#[derive(Clone, Debug)]
pub struct Component {
    peak: Peak,
    scene_shape: (usize, usize),
    bbox: BoundingBox,
    center: (usize, usize),
    sed: Array1<f64>,
    morph: Array2<f64>,
    psf: Option<PreparedPsf>,
    constraints: ConstraintChain,
    sed_constraint: SedConstraint,
    fixed_sed: bool,
    fixed_morph: bool,
}

impl Component {
    /// Build a component from explicit SED and morphology.
    ///
    /// `bbox` must lie inside the `scene_shape` (height, width) scene, the
    /// morphology must match the box, and `center` is the peak pixel in box
    /// coordinates (row, col).
    pub fn new(
        scene_shape: (usize, usize),
        bbox: BoundingBox,
        center: (usize, usize),
        sed: Array1<f64>,
        morph: Array2<f64>,
        config: &ComponentConfig,
    ) -> Result<Self> {
        let (height, width) = scene_shape;
        if !bbox.fits_within(height, width) {
            return Err(ScarletError::BoxOutsideScene {
                bbox,
                height,
                width,
            });
        }
        if morph.dim() != bbox.shape() {
            return Err(ScarletError::ShapeMismatch {
                what: "morphology",
                expected: vec![bbox.height, bbox.width],
                actual: vec![morph.nrows(), morph.ncols()],
            });
        }
        if center.0 >= bbox.height || center.1 >= bbox.width {
            return Err(ScarletError::InvalidParameter(format!(
                "center {center:?} outside bounding box {bbox}"
            )));
        }
        if sed.is_empty() {
            return Err(ScarletError::InvalidParameter("SED must have at least one band".into()));
        }

        let constraints = ConstraintChain::bind(
            &config.constraints,
            bbox.shape(),
            center,
            config.positive_morphology,
        )?;

        Ok(Self {
            peak: Peak::new((bbox.x0 + center.1) as f64, (bbox.y0 + center.0) as f64),
            scene_shape,
            bbox,
            center,
            sed,
            morph,
            psf: None,
            constraints,
            sed_constraint: config.sed_constraint,
            fixed_sed: false,
            fixed_morph: false,
        })
    }

    /// Initialise a component at `peak`: SED from the data at the peak pixel,
    /// morphology a single bright pixel that reproduces it.
    ///
    /// Fails with [`ScarletError::SourceInit`] when the band-summed peak flux
    /// does not exceed `min_snr` noise sigmas; callers usually skip such peaks.
    pub fn from_peak(
        observation: &Observation,
        peak: Peak,
        psf: Option<&PsfOperator>,
        config: &ComponentConfig,
    ) -> Result<Self> {
        config.validate()?;
        let (bands, height, width) = observation.shape();
        let (row, col) = peak.pixel(height, width)?;

        let mut flux = 0.0;
        let mut variance = 0.0;
        let mut sed = Array1::<f64>::zeros(bands);
        for b in 0..bands {
            if observation.is_masked(b, row, col) {
                continue;
            }
            let value = observation.images()[[b, row, col]];
            sed[b] = value;
            flux += value;
            if let Some(sigma) = observation.noise_rms(b, row, col) {
                variance += sigma * sigma;
            }
        }
        let threshold = config.min_snr * variance.sqrt();
        if !(flux > threshold) {
            return Err(ScarletError::SourceInit {
                x: peak.x,
                y: peak.y,
                flux,
                threshold,
            });
        }

        let bbox = BoundingBox::centered(row, col, config.box_radius, height, width);
        let center = (row - bbox.y0, col - bbox.x0);
        let amplitude = config.sed_constraint.apply(&mut sed);
        let mut morph = Array2::<f64>::zeros(bbox.shape());
        morph[center] = amplitude;

        let mut component = Self::new((height, width), bbox, center, sed, morph, config)?;
        component.peak = peak;
        if let Some(psf) = psf {
            component = component.with_psf(psf)?;
        }

        debug!(x = peak.x, y = peak.y, %bbox, flux, "Initialised component");
        Ok(component)
    }

    /// Scene-wide component that absorbs flux no peak accounts for.
    ///
    /// The SED is the mean unmasked flux per band and the morphology is flat,
    /// split evenly over `share` collectors. Only positivity is enforced on
    /// the morphology.
    pub fn garbage_collector(
        observation: &Observation,
        psf: Option<&PsfOperator>,
        share: usize,
        config: &ComponentConfig,
    ) -> Result<Self> {
        let (bands, height, width) = observation.shape();
        let mut sed = Array1::<f64>::zeros(bands);
        for (b, band) in observation.images().outer_iter().enumerate() {
            let mut total = 0.0;
            let mut count = 0usize;
            for ((r, c), &value) in band.indexed_iter() {
                if !observation.is_masked(b, r, c) {
                    total += value.max(0.0);
                    count += 1;
                }
            }
            if count > 0 {
                sed[b] = total / count as f64;
            }
        }
        if !(sed.sum() > 0.0) {
            sed.fill(1.0);
        }
        let amplitude = config.sed_constraint.apply(&mut sed);
        let level = amplitude / share.max(1) as f64;

        let collector_config = ComponentConfig {
            constraints: Vec::new(),
            positive_morphology: true,
            ..config.clone()
        };
        let bbox = BoundingBox::full(height, width);
        let morph = Array2::from_elem((height, width), level);
        let mut component = Self::new(
            (height, width),
            bbox,
            (height / 2, width / 2),
            sed,
            morph,
            &collector_config,
        )?;
        if let Some(psf) = psf {
            component = component.with_psf(psf)?;
        }

        debug!(level, "Initialised garbage collector");
        Ok(component)
    }

    /// Convolve the morphology with `psf` in every band.
    pub fn with_psf(mut self, psf: &PsfOperator) -> Result<Self> {
        if psf.bands() != self.sed.len() {
            return Err(ScarletError::ShapeMismatch {
                what: "PSF bands",
                expected: vec![self.sed.len()],
                actual: vec![psf.bands()],
            });
        }
        self.psf = Some(psf.prepare(self.bbox.shape()));
        Ok(self)
    }

    /// Keep the SED fixed during the fit.
    pub fn with_fixed_sed(mut self) -> Self {
        self.fixed_sed = true;
        self
    }

    /// Keep the morphology fixed during the fit.
    pub fn with_fixed_morphology(mut self) -> Self {
        self.fixed_morph = true;
        self
    }

    /// The caller-supplied peak.
    pub fn center(&self) -> Peak {
        self.peak
    }

    /// Flux-weighted centroid of the morphology in scene coordinates, or
    /// `None` when the morphology has no positive flux.
    pub fn centroid(&self) -> Option<Peak> {
        let mut total = 0.0;
        let mut sx = 0.0;
        let mut sy = 0.0;
        for ((r, c), &v) in self.morph.indexed_iter() {
            if v > 0.0 {
                total += v;
                sy += v * r as f64;
                sx += v * c as f64;
            }
        }
        (total > 0.0).then(|| {
            Peak::new(
                self.bbox.x0 as f64 + sx / total,
                self.bbox.y0 as f64 + sy / total,
            )
        })
    }

    pub fn sed(&self) -> &Array1<f64> {
        &self.sed
    }

    pub fn morphology(&self) -> &Array2<f64> {
        &self.morph
    }

    pub fn bbox(&self) -> BoundingBox {
        self.bbox
    }

    /// Peak pixel in box coordinates (row, col).
    pub fn box_center(&self) -> (usize, usize) {
        self.center
    }

    pub fn bands(&self) -> usize {
        self.sed.len()
    }

    /// (height, width) of the scene the component is placed in.
    pub fn scene_shape(&self) -> (usize, usize) {
        self.scene_shape
    }

    pub fn constraints(&self) -> &ConstraintChain {
        &self.constraints
    }

    pub fn sed_constraint(&self) -> SedConstraint {
        self.sed_constraint
    }

    pub fn has_psf(&self) -> bool {
        self.psf.is_some()
    }

    pub fn is_sed_fixed(&self) -> bool {
        self.fixed_sed
    }

    pub fn is_morphology_fixed(&self) -> bool {
        self.fixed_morph
    }

    /// Model restricted to the bounding box: [band, box_h, box_w].
    pub fn model_in_box(&self) -> Array3<f64> {
        self.render(&self.sed, &self.morph.view())
    }

    /// Model placed into its bounding box of an otherwise empty scene cube.
    pub fn get_model(&self) -> Array3<f64> {
        let (height, width) = self.scene_shape;
        let mut cube = Array3::<f64>::zeros((self.bands(), height, width));
        self.bbox.scatter_add(&mut cube, &self.model_in_box().view());
        cube
    }

    /// Gradient step on SED and morphology followed by their projections.
    pub fn update(
        &mut self,
        sed_grad: &Array1<f64>,
        sed_step: f64,
        morph_grad: &Array2<f64>,
        morph_step: f64,
    ) -> Result<()> {
        if sed_grad.len() != self.sed.len() {
            return Err(ScarletError::ShapeMismatch {
                what: "SED gradient",
                expected: vec![self.sed.len()],
                actual: vec![sed_grad.len()],
            });
        }
        if morph_grad.dim() != self.morph.dim() {
            return Err(ScarletError::ShapeMismatch {
                what: "morphology gradient",
                expected: vec![self.morph.nrows(), self.morph.ncols()],
                actual: vec![morph_grad.nrows(), morph_grad.ncols()],
            });
        }
        if !self.fixed_sed {
            self.sed = self.sed_step(&self.sed, sed_grad, sed_step);
        }
        if !self.fixed_morph {
            self.morph = self.morphology_step(&self.morph, morph_grad, morph_step);
        }
        Ok(())
    }

    /// Convolved morphology per band: [band, box_h, box_w].
    pub(crate) fn convolved(&self, morph: &ArrayView2<f64>) -> Array3<f64> {
        let (h, w) = morph.dim();
        let mut out = Array3::<f64>::zeros((self.bands(), h, w));
        for (b, mut band) in out.outer_iter_mut().enumerate() {
            match &self.psf {
                Some(psf) => band.assign(&psf.convolve(b, morph)),
                None => band.assign(morph),
            }
        }
        out
    }

    pub(crate) fn render(&self, sed: &Array1<f64>, morph: &ArrayView2<f64>) -> Array3<f64> {
        let mut out = self.convolved(morph);
        for (mut band, &amplitude) in out.outer_iter_mut().zip(sed.iter()) {
            band *= amplitude;
        }
        out
    }

    /// Gradient w.r.t. the SED given the box residual and the convolved
    /// morphology: `<R[b], conv_b(S)>` per band.
    pub(crate) fn sed_gradient(residual: &ArrayView3<f64>, convolved: &Array3<f64>) -> Array1<f64> {
        residual
            .outer_iter()
            .zip(convolved.outer_iter())
            .map(|(r, c)| r.iter().zip(c.iter()).map(|(a, b)| a * b).sum())
            .collect()
    }

    /// Gradient w.r.t. the morphology: `sum_b sed[b] * adjoint_b(R[b])`.
    pub(crate) fn morphology_gradient(&self, sed: &Array1<f64>, residual: &ArrayView3<f64>) -> Array2<f64> {
        let mut grad = Array2::<f64>::zeros(self.bbox.shape());
        for (b, r) in residual.outer_iter().enumerate() {
            let amplitude = sed[b];
            if amplitude == 0.0 {
                continue;
            }
            match &self.psf {
                Some(psf) => grad.scaled_add(amplitude, &psf.adjoint(b, &r)),
                None => grad.scaled_add(amplitude, &r),
            }
        }
        grad
    }

    /// `prox_sed(point - step * grad)`
    pub(crate) fn sed_step(&self, point: &Array1<f64>, grad: &Array1<f64>, step: f64) -> Array1<f64> {
        let mut next = point.clone();
        next.scaled_add(-step, grad);
        self.sed_constraint.apply(&mut next);
        next
    }

    /// `prox_morph(point - step * grad)` through the constraint chain.
    pub(crate) fn morphology_step(&self, point: &Array2<f64>, grad: &Array2<f64>, step: f64) -> Array2<f64> {
        let mut next = point.clone();
        next.scaled_add(-step, grad);
        self.constraints.apply(&mut next, step);
        next
    }

    /// Operator-norm bound of the band convolution (1 without a PSF).
    pub(crate) fn norm_bound(&self, band: usize) -> f64 {
        self.psf.as_ref().map_or(1.0, |psf| psf.norm_bound(band))
    }

    pub(crate) fn set_sed(&mut self, sed: Array1<f64>) {
        self.sed = sed;
    }

    pub(crate) fn set_morphology(&mut self, morph: Array2<f64>) {
        self.morph = morph;
    }

    /// Data cube values at the peak pixel, for diagnostics.
    pub fn peak_values(&self, observation: &Observation) -> Result<Array1<f64>> {
        let (row, col) = self.peak.pixel(observation.height(), observation.width())?;
        Ok(observation.images().slice(s![.., row, col]).to_owned())
    }
}
