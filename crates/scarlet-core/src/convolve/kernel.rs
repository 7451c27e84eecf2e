use std::fmt;

use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::consts::FFT_KERNEL_AREA_THRESHOLD;
use crate::error::{Result, ScarletError};

use super::direct::{convolve_same, convolve_separable_same, correlate_same, correlate_separable_same};
use super::fft::FftConvolver;

/// Convolution kernel, either a full 2-D array or the outer product of a
/// vertical and a horizontal 1-D kernel. The origin is the middle sample
/// (`len / 2`) along each axis.
#[derive(Clone, Debug, PartialEq)]
pub enum Kernel {
    Full(Array2<f64>),
    Separable {
        vertical: Array1<f64>,
        horizontal: Array1<f64>,
    },
}

impl Kernel {
    pub fn dim(&self) -> (usize, usize) {
        match self {
            Self::Full(k) => k.dim(),
            Self::Separable {
                vertical,
                horizontal,
            } => (vertical.len(), horizontal.len()),
        }
    }

    /// Dense 2-D form of the kernel.
    pub fn to_array(&self) -> Array2<f64> {
        match self {
            Self::Full(k) => k.clone(),
            Self::Separable {
                vertical,
                horizontal,
            } => Array2::from_shape_fn((vertical.len(), horizontal.len()), |(r, c)| {
                vertical[r] * horizontal[c]
            }),
        }
    }

    /// Sum of absolute values; bounds the operator norm of the convolution.
    pub fn l1_norm(&self) -> f64 {
        match self {
            Self::Full(k) => k.iter().map(|v| v.abs()).sum(),
            Self::Separable {
                vertical,
                horizontal,
            } => {
                let v: f64 = vertical.iter().map(|v| v.abs()).sum();
                let h: f64 = horizontal.iter().map(|v| v.abs()).sum();
                v * h
            }
        }
    }

    fn validate(&self) -> Result<()> {
        let (kh, kw) = self.dim();
        if kh == 0 || kw == 0 {
            return Err(ScarletError::InvalidParameter("empty convolution kernel".into()));
        }
        let finite = match self {
            Self::Full(k) => k.iter().all(|v| v.is_finite()),
            Self::Separable {
                vertical,
                horizontal,
            } => vertical.iter().chain(horizontal.iter()).all(|v| v.is_finite()),
        };
        if !finite {
            return Err(ScarletError::InvalidParameter(
                "convolution kernel contains non-finite values".into(),
            ));
        }
        Ok(())
    }
}

/// Execution strategy for kernel convolution. Both strategies produce the
/// same result up to floating-point rounding.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvolutionMethod {
    /// Direct for small kernels, FFT for large ones.
    #[default]
    Auto,
    /// Filter-window convolution.
    Direct,
    /// FFT convolution with precomputed kernel spectra.
    Fft,
}

impl ConvolutionMethod {
    fn resolve(self, kernel: &Kernel) -> Self {
        match self {
            Self::Auto => {
                let (kh, kw) = kernel.dim();
                let separable = matches!(kernel, Kernel::Separable { .. });
                if !separable && kh * kw >= FFT_KERNEL_AREA_THRESHOLD {
                    Self::Fft
                } else {
                    Self::Direct
                }
            }
            other => other,
        }
    }
}

impl fmt::Display for ConvolutionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "Auto"),
            Self::Direct => write!(f, "Direct"),
            Self::Fft => write!(f, "FFT"),
        }
    }
}

/// Per-band convolution kernels shared by the components of a scene.
#[derive(Clone, Debug)]
pub struct PsfOperator {
    kernels: Vec<Kernel>,
    /// Index into `kernels` for every band.
    band_map: Vec<usize>,
    method: ConvolutionMethod,
}

impl PsfOperator {
    /// One kernel per band.
    pub fn new(kernels: Vec<Kernel>, method: ConvolutionMethod) -> Result<Self> {
        if kernels.is_empty() {
            return Err(ScarletError::InvalidParameter(
                "PSF operator needs at least one kernel".into(),
            ));
        }
        for k in &kernels {
            k.validate()?;
        }
        let band_map = (0..kernels.len()).collect();
        Ok(Self {
            kernels,
            band_map,
            method,
        })
    }

    /// Per-band kernels from a [band, h, w] stack.
    pub fn from_stack(psfs: &Array3<f64>, method: ConvolutionMethod) -> Result<Self> {
        let kernels = psfs
            .axis_iter(Axis(0))
            .map(|k| Kernel::Full(k.to_owned()))
            .collect();
        Self::new(kernels, method)
    }

    /// The same kernel for every one of `bands` bands.
    pub fn broadcast(kernel: Kernel, bands: usize, method: ConvolutionMethod) -> Result<Self> {
        if bands == 0 {
            return Err(ScarletError::InvalidParameter(
                "PSF operator needs at least one band".into(),
            ));
        }
        kernel.validate()?;
        Ok(Self {
            kernels: vec![kernel],
            band_map: vec![0; bands],
            method,
        })
    }

    pub fn bands(&self) -> usize {
        self.band_map.len()
    }

    pub fn kernel(&self, band: usize) -> &Kernel {
        &self.kernels[self.band_map[band]]
    }

    pub fn method(&self) -> ConvolutionMethod {
        self.method
    }

    /// Precompute the band convolvers for a morphology of `shape`.
    pub fn prepare(&self, shape: (usize, usize)) -> PreparedPsf {
        let convolvers = self
            .kernels
            .iter()
            .map(|kernel| match self.method.resolve(kernel) {
                ConvolutionMethod::Fft => BandConvolver::Fft {
                    convolver: FftConvolver::new(shape, &kernel.to_array().view()),
                    norm: kernel.l1_norm(),
                },
                _ => BandConvolver::Direct(kernel.clone()),
            })
            .collect();
        PreparedPsf {
            shape,
            convolvers,
            band_map: self.band_map.clone(),
        }
    }
}

#[derive(Clone, Debug)]
enum BandConvolver {
    Direct(Kernel),
    Fft { convolver: FftConvolver, norm: f64 },
}

/// Band kernels prepared for one morphology shape.
#[derive(Clone, Debug)]
pub struct PreparedPsf {
    shape: (usize, usize),
    convolvers: Vec<BandConvolver>,
    band_map: Vec<usize>,
}

impl PreparedPsf {
    pub fn bands(&self) -> usize {
        self.band_map.len()
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    /// Convolve `image` with the kernel of `band`, keeping its shape.
    pub fn convolve(&self, band: usize, image: &ArrayView2<f64>) -> Array2<f64> {
        match &self.convolvers[self.band_map[band]] {
            BandConvolver::Direct(Kernel::Full(k)) => convolve_same(image, &k.view()),
            BandConvolver::Direct(Kernel::Separable {
                vertical,
                horizontal,
            }) => convolve_separable_same(image, &vertical.view(), &horizontal.view()),
            BandConvolver::Fft { convolver, .. } => convolver.convolve(image),
        }
    }

    /// Adjoint of [`PreparedPsf::convolve`] (correlation with the kernel).
    pub fn adjoint(&self, band: usize, image: &ArrayView2<f64>) -> Array2<f64> {
        match &self.convolvers[self.band_map[band]] {
            BandConvolver::Direct(Kernel::Full(k)) => correlate_same(image, &k.view()),
            BandConvolver::Direct(Kernel::Separable {
                vertical,
                horizontal,
            }) => correlate_separable_same(image, &vertical.view(), &horizontal.view()),
            BandConvolver::Fft { convolver, .. } => convolver.adjoint(image),
        }
    }

    /// Upper bound on the operator norm of the band's convolution.
    pub fn norm_bound(&self, band: usize) -> f64 {
        match &self.convolvers[self.band_map[band]] {
            BandConvolver::Direct(kernel) => kernel.l1_norm(),
            BandConvolver::Fft { norm, .. } => *norm,
        }
    }
}
