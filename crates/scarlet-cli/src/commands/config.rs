use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use scarlet_core::deblend::DeblendConfig;

#[derive(Args)]
pub struct ConfigArgs {
    /// Write config to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

/// Print or save a full default DeblendConfig as TOML.
pub fn run(args: &ConfigArgs) -> Result<()> {
    let toml_str = default_config_toml()?;

    if let Some(ref path) = args.output {
        std::fs::write(path, &toml_str)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        println!("Default config saved to {}", path.display());
    } else {
        print!("{}", toml_str);
    }

    Ok(())
}

pub fn default_config_toml() -> Result<String> {
    Ok(toml::to_string_pretty(&DeblendConfig::default())?)
}

/// Read a DeblendConfig from a TOML file; missing fields take their defaults.
pub fn load_config(path: &std::path::Path) -> Result<DeblendConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    toml::from_str(&contents).context("Invalid deblend config")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scarlet_core::constraint::ConstraintKind;

    #[test]
    fn test_default_config_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deblend.toml");
        std::fs::write(&path, default_config_toml().unwrap()).unwrap();

        let loaded = load_config(&path).unwrap();
        let defaults = DeblendConfig::default();
        assert_eq!(loaded.fit.max_iter, defaults.fit.max_iter);
        assert_eq!(loaded.component.constraints, defaults.component.constraints);
        assert_eq!(loaded.convolution, defaults.convolution);
    }

    #[test]
    fn test_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "[fit]\nmax_iter = 12\n\n[component]\nconstraints = [\"Symmetric\"]\n",
        )
        .unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.fit.max_iter, 12);
        assert_eq!(loaded.component.constraints, vec![ConstraintKind::Symmetric]);
        assert_eq!(loaded.component.box_radius, DeblendConfig::default().component.box_radius);
    }

    #[test]
    fn test_missing_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load_config(&dir.path().join("absent.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config"));
    }
}
