pub mod matching;
pub mod model;

pub use matching::{
    build_diff_kernels, build_diff_kernels_reported, resolve_target, DiffKernels, PsfMatchConfig, TargetPsf,
};
pub use model::{fit_gaussian, fit_moffat, generate_psf, moment_sigma, PsfModel};
