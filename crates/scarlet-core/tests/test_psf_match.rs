mod common;

use approx::assert_abs_diff_eq;
use ndarray::{Array2, Array3, Axis};

use common::{gaussian_psf, max_abs_diff, psf_stack};
use scarlet_core::blend::BlendState;
use scarlet_core::convolve::convolve_same;
use scarlet_core::psf::{
    build_diff_kernels, fit_gaussian, fit_moffat, generate_psf, moment_sigma, resolve_target,
    PsfMatchConfig, PsfModel, TargetPsf,
};

// ---------------------------------------------------------------------------
// Analytic profiles
// ---------------------------------------------------------------------------

#[test]
fn test_generate_psf_is_normalized_and_centered() {
    for model in [
        PsfModel::Gaussian { sigma: 1.5 },
        PsfModel::Moffat {
            alpha: 3.0,
            beta: 2.5,
        },
    ] {
        let psf = generate_psf(&model, 21, 25).unwrap();
        assert_abs_diff_eq!(psf.sum(), 1.0, epsilon = 1e-12);
        let peak = psf.iter().copied().fold(0.0, f64::max);
        assert_eq!(psf[[10, 12]], peak, "{model:?} peak off center");
    }
}

#[test]
fn test_generate_psf_rejects_bad_models() {
    assert!(generate_psf(&PsfModel::Gaussian { sigma: 0.0 }, 11, 11).is_err());
    assert!(generate_psf(
        &PsfModel::Moffat {
            alpha: 2.0,
            beta: -1.0
        },
        11,
        11
    )
    .is_err());
    assert!(generate_psf(&PsfModel::Gaussian { sigma: 1.0 }, 0, 11).is_err());
}

#[test]
fn test_moment_sigma_recovers_gaussian_width() {
    for sigma in [1.5, 2.0, 3.0] {
        let psf = gaussian_psf(41, sigma);
        let measured = moment_sigma(&psf.view()).unwrap();
        assert!((measured - sigma).abs() < 0.05, "sigma {sigma}: measured {measured}");
    }
    assert!(moment_sigma(&Array2::<f64>::zeros((5, 5)).view()).is_err());
}

#[test]
fn test_fwhm_and_scaling() {
    let gaussian = PsfModel::Gaussian { sigma: 2.0 };
    assert_abs_diff_eq!(gaussian.fwhm(), 2.0 * 2.354_820_045, epsilon = 1e-6);
    assert_abs_diff_eq!(gaussian.scaled(0.5).fwhm(), gaussian.fwhm() * 0.5, epsilon = 1e-12);

    let moffat = PsfModel::Moffat {
        alpha: 4.0,
        beta: 1.0,
    };
    assert_abs_diff_eq!(moffat.fwhm(), 8.0, epsilon = 1e-12);
    assert_eq!(
        moffat.scaled(2.0),
        PsfModel::Moffat {
            alpha: 8.0,
            beta: 1.0
        }
    );
}

#[test]
fn test_fit_moffat_matches_fwhm() {
    let truth = PsfModel::Moffat {
        alpha: 6.0,
        beta: 3.0,
    };
    let psf = generate_psf(&truth, 41, 41).unwrap();
    let fitted = fit_moffat(&psf.view(), 3.0).unwrap();
    let rel = (fitted.fwhm() - truth.fwhm()).abs() / truth.fwhm();
    assert!(rel < 0.05, "fwhm {} vs {}", fitted.fwhm(), truth.fwhm());
    assert!(fit_moffat(&psf.view(), 0.0).is_err());
}

// ---------------------------------------------------------------------------
// Target resolution
// ---------------------------------------------------------------------------

#[test]
fn test_fitted_target_narrows_the_sharpest_band() {
    let psfs = psf_stack(41, &[2.5, 2.0, 3.0]);
    let target = resolve_target(&psfs, &TargetPsf::FitGaussian { scale: 0.5 }).unwrap();
    let expected = gaussian_psf(41, 1.0);
    assert!(max_abs_diff(&target, &expected) < 1e-4);

    let fitted = fit_gaussian(&psfs.index_axis(Axis(0), 1)).unwrap();
    match fitted {
        PsfModel::Gaussian { sigma } => assert!((sigma - 2.0).abs() < 0.05),
        other => panic!("expected a Gaussian, got {other:?}"),
    }
}

#[test]
fn test_target_variants() {
    let psfs = psf_stack(21, &[2.0, 3.0]);

    let image = gaussian_psf(21, 0.8);
    let resolved = resolve_target(&psfs, &TargetPsf::Image(image.clone())).unwrap();
    assert_eq!(resolved, image);

    let model = resolve_target(&psfs, &TargetPsf::Model(PsfModel::Gaussian { sigma: 1.0 })).unwrap();
    assert_eq!(model.dim(), (21, 21));

    let moffat = resolve_target(
        &psfs,
        &TargetPsf::FitMoffat {
            beta: 2.5,
            scale: 0.5,
        },
    )
    .unwrap();
    assert_abs_diff_eq!(moffat.sum(), 1.0, epsilon = 1e-12);

    assert!(resolve_target(&psfs, &TargetPsf::FitGaussian { scale: 0.0 }).is_err());
    assert!(resolve_target(&psfs, &TargetPsf::Image(Array2::zeros((0, 0)))).is_err());
}

// ---------------------------------------------------------------------------
// Difference kernels
// ---------------------------------------------------------------------------

#[test]
fn test_diff_kernels_reproduce_band_psfs() {
    let size = 41;
    let psfs = psf_stack(size, &[2.0, 2.5, 3.0]);
    let target = TargetPsf::Model(PsfModel::Gaussian { sigma: 1.0 });
    let target_image = resolve_target(&psfs, &target).unwrap();

    // The fit starts from kernel = band PSF.
    let mut initial_sq = 0.0;
    for psf in psfs.outer_iter() {
        let start = convolve_same(&psf.view(), &target_image.view());
        initial_sq += (&start - &psf).mapv(|v| v * v).sum();
    }
    let initial_rms = (initial_sq / psfs.len() as f64).sqrt();

    let diff = build_diff_kernels(&psfs, &target, &PsfMatchConfig::default()).unwrap();
    assert_eq!(diff.kernels.dim(), (3, size, size));
    assert_ne!(diff.summary.state, BlendState::Iterating);
    assert!(
        diff.summary.residual_rms < 0.1 * initial_rms,
        "residual {} vs initial {initial_rms}",
        diff.summary.residual_rms
    );

    for (b, psf) in psfs.outer_iter().enumerate() {
        let kernel = diff.kernel(b).to_owned();
        assert!(kernel.iter().all(|&v| v >= 0.0), "band {b} kernel has negative pixels");
        assert!((kernel.sum() - 1.0).abs() < 0.02, "band {b} kernel sum {}", kernel.sum());

        let rebuilt = convolve_same(&kernel.view(), &diff.target.view());
        let err = max_abs_diff(&rebuilt, &psf.to_owned());
        assert!(err < 2e-3, "band {b}: max error {err}");
    }
}

#[test]
fn test_diff_kernels_are_sparse() {
    let size = 41;
    let psfs = psf_stack(size, &[2.0, 2.5, 3.0]);
    let target = TargetPsf::Model(PsfModel::Gaussian { sigma: 1.0 });
    let diff = build_diff_kernels(&psfs, &target, &PsfMatchConfig::default()).unwrap();

    for (b, count) in diff.nonzero_counts().into_iter().enumerate() {
        assert!(count > 0, "band {b} kernel is empty");
        assert!(count < size * size / 2, "band {b} kernel has {count} non-zero pixels");
    }
    // Wider bands need wider kernels.
    let counts = diff.nonzero_counts();
    assert!(counts[0] < counts[2]);
}

#[test]
fn test_diff_kernels_reject_empty_stack() {
    let empty = Array3::<f64>::zeros((0, 11, 11));
    assert!(build_diff_kernels(&empty, &TargetPsf::default(), &PsfMatchConfig::default()).is_err());
}
