/// Minimum component count to update components with Rayon.
pub const PARALLEL_COMPONENT_THRESHOLD: usize = 4;

/// Kernel area (kh*kw) at or above which `ConvolutionMethod::Auto` picks FFT.
pub const FFT_KERNEL_AREA_THRESHOLD: usize = 121;

/// Small epsilon to avoid division by zero in floating-point comparisons.
pub const EPSILON: f64 = 1e-12;

/// Default iteration cap for a deblending fit.
pub const DEFAULT_MAX_ITER: usize = 200;

/// Default relative-change convergence tolerance.
pub const DEFAULT_E_REL: f64 = 1e-3;

/// Fraction of the inverse Lipschitz constant used as the gradient step.
pub const DEFAULT_SLACK: f64 = 0.9;

/// Default half-width of a component bounding box (box side = 2*radius + 1).
pub const DEFAULT_BOX_RADIUS: usize = 10;

/// Peak flux must exceed this many noise sigmas to initialise a component.
pub const DEFAULT_MIN_SNR: f64 = 3.0;

/// Iteration cap for difference-kernel fits.
pub const DEFAULT_PSF_MATCH_MAX_ITER: usize = 500;

/// Convergence tolerance for difference-kernel fits.
pub const DEFAULT_PSF_MATCH_E_REL: f64 = 1e-5;

/// Hard-threshold level applied to difference kernels.
pub const DEFAULT_PSF_MATCH_L0_THRESH: f64 = 1e-4;

/// Width reduction applied to the narrowest band when fitting a target PSF.
pub const DEFAULT_TARGET_SCALE: f64 = 0.5;

/// Conversion factor between a Gaussian sigma and its FWHM.
pub const SIGMA_TO_FWHM: f64 = 2.354_820_045_030_949;
