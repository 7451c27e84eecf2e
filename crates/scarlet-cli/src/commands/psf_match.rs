use anyhow::{ensure, Context, Result};
use clap::Args;
use ndarray::Array3;
use scarlet_core::psf::{
    build_diff_kernels_reported, generate_psf, PsfMatchConfig, PsfModel, TargetPsf,
};

use crate::progress::FitProgress;
use crate::summary::print_psf_match_result;

#[derive(Args)]
pub struct PsfMatchArgs {
    /// Comma-separated Gaussian PSF widths, one per band
    #[arg(long, default_value = "2,2.5,3")]
    pub sigmas: String,

    /// Target Gaussian width (default: half the narrowest band's fitted width)
    #[arg(long)]
    pub target: Option<f64>,

    /// Side of the PSF grid in pixels
    #[arg(long, default_value = "41")]
    pub size: usize,

    /// Kernel pixels below this level are zeroed
    #[arg(long)]
    pub l0_thresh: Option<f64>,

    /// Iteration limit
    #[arg(long)]
    pub max_iter: Option<usize>,
}

pub fn run(args: &PsfMatchArgs) -> Result<()> {
    let sigmas = parse_list(&args.sigmas).context("Invalid --sigmas")?;
    ensure!(!sigmas.is_empty(), "--sigmas needs at least one width");

    let mut psfs = Array3::<f64>::zeros((sigmas.len(), args.size, args.size));
    for (mut band, &sigma) in psfs.outer_iter_mut().zip(&sigmas) {
        band.assign(&generate_psf(&PsfModel::Gaussian { sigma }, args.size, args.size)?);
    }

    let target = match args.target {
        Some(sigma) => TargetPsf::Model(PsfModel::Gaussian { sigma }),
        None => TargetPsf::default(),
    };
    let mut config = PsfMatchConfig::default();
    if let Some(thresh) = args.l0_thresh {
        config.l0_thresh = thresh;
    }
    if let Some(max_iter) = args.max_iter {
        config.max_iter = max_iter;
    }

    println!("Matching {} PSFs on a {}x{} grid", sigmas.len(), args.size, args.size);
    let progress = FitProgress::new("Matching PSFs")?;
    let kernels = build_diff_kernels_reported(&psfs, &target, &config, &progress)
        .context("PSF matching failed")?;

    print_psf_match_result(&sigmas, &kernels);
    Ok(())
}

fn parse_list(s: &str) -> Result<Vec<f64>> {
    s.split(',')
        .map(|part| {
            let part = part.trim();
            part.parse::<f64>()
                .with_context(|| format!("'{part}' is not a number"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("2, 2.5,3").unwrap(), vec![2.0, 2.5, 3.0]);
        assert!(parse_list("2,,3").is_err());
        assert!(parse_list("wide").is_err());
    }
}
