use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use scarlet_core::constraint::ConstraintKind;
use scarlet_core::deblend::{deblend_reported, DeblendConfig};
use tracing::info;

use super::config::load_config;
use crate::progress::FitProgress;
use crate::scene_file::SceneSpec;
use crate::summary::{print_deblend_result, print_deblend_summary};

#[derive(Args)]
pub struct DeblendArgs {
    /// Scene description (TOML)
    #[arg(long)]
    pub scene: PathBuf,

    /// Deblend config file (TOML)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Override the iteration limit
    #[arg(long)]
    pub max_iter: Option<usize>,

    /// Override the convergence threshold
    #[arg(long)]
    pub e_rel: Option<f64>,

    /// Comma-separated morphology constraints, e.g. "monotonic,symmetric"
    #[arg(long)]
    pub constraints: Option<String>,

    /// Scene-wide components that absorb unmodelled flux
    #[arg(long)]
    pub garbage_collectors: Option<usize>,
}

pub fn run(args: &DeblendArgs) -> Result<()> {
    let mut config = match args.config {
        Some(ref path) => load_config(path)?,
        None => DeblendConfig::default(),
    };
    if let Some(max_iter) = args.max_iter {
        config.fit.max_iter = max_iter;
    }
    if let Some(e_rel) = args.e_rel {
        config.fit.e_rel = e_rel;
    }
    if let Some(ref names) = args.constraints {
        config.component.constraints = parse_constraints(names)?;
    }
    if let Some(count) = args.garbage_collectors {
        config.garbage_collectors = count;
    }

    let spec = SceneSpec::load(&args.scene)?;
    let scene = spec.synthesize()?;
    info!(
        scene = %args.scene.display(),
        sources = spec.sources.len(),
        bands = spec.bands(),
        "Scene synthesised"
    );
    print_deblend_summary(&args.scene, &spec, &config);

    let progress = FitProgress::new("Deblending")?;
    let output = deblend_reported(
        scene.observation,
        &scene.peaks,
        scene.psf.as_ref(),
        &config,
        &progress,
    )
    .context("Deblending failed")?;

    print_deblend_result(&output);
    Ok(())
}

fn parse_constraints(names: &str) -> Result<Vec<ConstraintKind>> {
    names
        .split(',')
        .filter(|name| !name.trim().is_empty())
        .map(|name| {
            name.parse::<ConstraintKind>()
                .with_context(|| format!("Invalid constraint '{}'", name.trim()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use scarlet_core::prox::MonotonicMode;

    #[test]
    fn test_parse_constraints() {
        let parsed = parse_constraints("monotonic-exact, symmetric,l0:30,X").unwrap();
        assert_eq!(
            parsed,
            vec![
                ConstraintKind::monotonic(MonotonicMode::Exact),
                ConstraintKind::Symmetric,
                ConstraintKind::L0 { budget: 30 },
                ConstraintKind::GradientX,
            ]
        );
        assert!(parse_constraints("").unwrap().is_empty());
    }

    #[test]
    fn test_deprecated_constraint_is_reported() {
        let err = parse_constraints("symmetric,cone").unwrap_err();
        assert!(err.to_string().contains("cone"), "{err}");
    }
}
