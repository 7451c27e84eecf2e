pub mod direct;
pub mod fft;
pub mod kernel;

pub use direct::{convolve_same, convolve_separable_same, correlate_same, correlate_separable_same};
pub use fft::FftConvolver;
pub use kernel::{ConvolutionMethod, Kernel, PreparedPsf, PsfOperator};
