use std::fmt;
use std::sync::Arc;

use ndarray::{s, Array2, ArrayView2, ArrayViewMut1, Zip};
use num_complex::Complex;
use rustfft::{Fft, FftPlanner};

/// Row/column FFT plans for one padded shape.
#[derive(Clone)]
struct Fft2d {
    shape: (usize, usize),
    row_forward: Arc<dyn Fft<f64>>,
    col_forward: Arc<dyn Fft<f64>>,
    row_inverse: Arc<dyn Fft<f64>>,
    col_inverse: Arc<dyn Fft<f64>>,
}

impl Fft2d {
    fn new(shape: (usize, usize)) -> Self {
        let (h, w) = shape;
        let mut planner = FftPlanner::new();
        Self {
            shape,
            row_forward: planner.plan_fft_forward(w),
            col_forward: planner.plan_fft_forward(h),
            row_inverse: planner.plan_fft_inverse(w),
            col_inverse: planner.plan_fft_inverse(h),
        }
    }

    /// Zero-pad a real array into the plan's shape and transform it.
    fn spectrum_of(&self, data: &ArrayView2<f64>) -> Array2<Complex<f64>> {
        let (dh, dw) = data.dim();
        let mut buffer = Array2::<Complex<f64>>::zeros(self.shape);
        Zip::from(buffer.slice_mut(s![..dh, ..dw]))
            .and(data)
            .for_each(|dst, &src| *dst = Complex::new(src, 0.0));
        self.transform(&mut buffer, &self.row_forward, &self.col_forward);
        buffer
    }

    fn inverse(&self, data: &mut Array2<Complex<f64>>) {
        self.transform(data, &self.row_inverse, &self.col_inverse);
        let scale = 1.0 / (self.shape.0 * self.shape.1) as f64;
        data.mapv_inplace(|v| v * scale);
    }

    fn transform(&self, data: &mut Array2<Complex<f64>>, row: &Arc<dyn Fft<f64>>, col: &Arc<dyn Fft<f64>>) {
        let (h, w) = self.shape;
        let mut buffer = vec![Complex::new(0.0, 0.0); h.max(w)];

        for lane in data.rows_mut() {
            process_lane(lane, row.as_ref(), &mut buffer[..w]);
        }
        for lane in data.columns_mut() {
            process_lane(lane, col.as_ref(), &mut buffer[..h]);
        }
    }
}

fn process_lane(mut lane: ArrayViewMut1<Complex<f64>>, fft: &dyn Fft<f64>, buffer: &mut [Complex<f64>]) {
    if let Some(slice) = lane.as_slice_mut() {
        fft.process(slice);
        return;
    }
    for (b, v) in buffer.iter_mut().zip(lane.iter()) {
        *b = *v;
    }
    fft.process(buffer);
    for (v, b) in lane.iter_mut().zip(buffer.iter()) {
        *v = *b;
    }
}

/// Zero-padded linear convolution through a 2-D FFT, with the kernel
/// spectra precomputed for one image shape.
///
/// Numerically equivalent to `convolve_same` / `correlate_same`.
#[derive(Clone)]
pub struct FftConvolver {
    shape: (usize, usize),
    forward_offset: (usize, usize),
    adjoint_offset: (usize, usize),
    spectrum: Array2<Complex<f64>>,
    flipped_spectrum: Array2<Complex<f64>>,
    plan: Fft2d,
}

impl FftConvolver {
    pub fn new(shape: (usize, usize), kernel: &ArrayView2<f64>) -> Self {
        let (h, w) = shape;
        let (kh, kw) = kernel.dim();
        let plan = Fft2d::new((h + kh - 1, w + kw - 1));
        let spectrum = plan.spectrum_of(kernel);
        let flipped_spectrum = plan.spectrum_of(&kernel.slice(s![..;-1, ..;-1]));
        Self {
            shape,
            forward_offset: (kh / 2, kw / 2),
            adjoint_offset: (kh - 1 - kh / 2, kw - 1 - kw / 2),
            spectrum,
            flipped_spectrum,
            plan,
        }
    }

    pub fn shape(&self) -> (usize, usize) {
        self.shape
    }

    pub fn convolve(&self, image: &ArrayView2<f64>) -> Array2<f64> {
        self.filter(image, &self.spectrum, self.forward_offset)
    }

    pub fn adjoint(&self, image: &ArrayView2<f64>) -> Array2<f64> {
        self.filter(image, &self.flipped_spectrum, self.adjoint_offset)
    }

    fn filter(
        &self,
        image: &ArrayView2<f64>,
        spectrum: &Array2<Complex<f64>>,
        offset: (usize, usize),
    ) -> Array2<f64> {
        debug_assert_eq!(image.dim(), self.shape);
        let mut product = self.plan.spectrum_of(image);
        Zip::from(&mut product)
            .and(spectrum)
            .for_each(|p, &k| *p *= k);
        self.plan.inverse(&mut product);

        let (h, w) = self.shape;
        let (oh, ow) = offset;
        product
            .slice(s![oh..oh + h, ow..ow + w])
            .mapv(|v| v.re)
    }
}

impl fmt::Debug for FftConvolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FftConvolver")
            .field("shape", &self.shape)
            .field("padded", &self.plan.shape)
            .finish()
    }
}
