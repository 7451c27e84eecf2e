use std::path::Path;

use anyhow::{bail, ensure, Context, Result};
use ndarray::{Array2, Array3, Axis};
use scarlet_core::convolve::convolve_same;
use scarlet_core::psf::{generate_psf, PsfModel};
use scarlet_core::scene::{Observation, Peak, Weights};
use serde::{Deserialize, Serialize};

fn default_psf_size() -> usize {
    15
}

/// TOML description of a synthetic multi-band scene.
///
/// ```toml
/// height = 40
/// width = 48
/// background_rms = [0.05, 0.05, 0.05]
/// psf_sigmas = [1.0, 1.2, 1.4]
///
/// [[source]]
/// x = 14.0
/// y = 20.0
/// sigma = 2.0
/// amplitude = 10.0
/// sed = [0.2, 0.5, 0.3]
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SceneSpec {
    pub height: usize,
    pub width: usize,
    /// Per-band noise level used for the weights; uniform weights when absent.
    #[serde(default)]
    pub background_rms: Option<Vec<f64>>,
    /// Constant per-band sky added to the images and subtracted before fitting.
    #[serde(default)]
    pub sky: Option<Vec<f64>>,
    /// Gaussian PSF width per band; no PSF when absent.
    #[serde(default)]
    pub psf_sigmas: Option<Vec<f64>>,
    #[serde(default = "default_psf_size")]
    pub psf_size: usize,
    #[serde(rename = "source", default)]
    pub sources: Vec<SourceSpec>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SourceSpec {
    pub x: f64,
    pub y: f64,
    pub sigma: f64,
    /// Peak brightness before the SED is applied.
    pub amplitude: f64,
    pub sed: Vec<f64>,
}

/// A synthesised scene ready to deblend.
pub struct Scene {
    pub observation: Observation,
    pub peaks: Vec<Peak>,
    pub psf: Option<Array3<f64>>,
}

impl SceneSpec {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scene {}", path.display()))?;
        let spec: SceneSpec = toml::from_str(&contents).context("Invalid scene description")?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn bands(&self) -> usize {
        self.sources.first().map_or(0, |s| s.sed.len())
    }

    fn validate(&self) -> Result<()> {
        ensure!(self.height > 0 && self.width > 0, "Scene must be non-empty");
        ensure!(!self.sources.is_empty(), "Scene has no sources");
        let bands = self.bands();
        ensure!(bands > 0, "Source SEDs must have at least one band");
        for (i, source) in self.sources.iter().enumerate() {
            if source.sed.len() != bands {
                bail!(
                    "Source {} has {} bands, expected {}",
                    i,
                    source.sed.len(),
                    bands
                );
            }
            ensure!(source.sigma > 0.0, "Source {} must have a positive sigma", i);
        }
        for (name, list) in [
            ("background_rms", &self.background_rms),
            ("sky", &self.sky),
            ("psf_sigmas", &self.psf_sigmas),
        ] {
            if let Some(values) = list {
                ensure!(
                    values.len() == bands,
                    "{} has {} entries, expected {}",
                    name,
                    values.len(),
                    bands
                );
            }
        }
        ensure!(self.psf_size % 2 == 1, "psf_size must be odd");
        Ok(())
    }

    /// Render the sources (convolved with the band PSFs when given) into an
    /// observation.
    pub fn synthesize(&self) -> Result<Scene> {
        self.validate()?;
        let bands = self.bands();
        let (h, w) = (self.height, self.width);

        let psf = match &self.psf_sigmas {
            Some(sigmas) => {
                let mut stack = Array3::<f64>::zeros((bands, self.psf_size, self.psf_size));
                for (mut band, &sigma) in stack.outer_iter_mut().zip(sigmas) {
                    band.assign(&generate_psf(&PsfModel::Gaussian { sigma }, self.psf_size, self.psf_size)?);
                }
                Some(stack)
            }
            None => None,
        };

        let mut images = Array3::<f64>::zeros((bands, h, w));
        for source in &self.sources {
            let blob = gaussian(h, w, source);
            for (b, mut band) in images.outer_iter_mut().enumerate() {
                let scaled = &blob * source.sed[b];
                match &psf {
                    Some(stack) => band += &convolve_same(&scaled.view(), &stack.index_axis(Axis(0), b)),
                    None => band += &scaled,
                }
            }
        }
        if let Some(sky) = &self.sky {
            for (mut band, &level) in images.outer_iter_mut().zip(sky) {
                band += level;
            }
        }

        let weights = match &self.background_rms {
            Some(rms) => Weights::BackgroundRms(rms.clone()),
            None => Weights::Uniform,
        };
        let mut observation = Observation::new(images, weights)?;
        if let Some(sky) = &self.sky {
            observation = observation.with_sky(sky)?;
        }

        let peaks = self.sources.iter().map(|s| Peak::new(s.x, s.y)).collect();
        Ok(Scene {
            observation,
            peaks,
            psf,
        })
    }
}

fn gaussian(h: usize, w: usize, source: &SourceSpec) -> Array2<f64> {
    let two_var = 2.0 * source.sigma * source.sigma;
    Array2::from_shape_fn((h, w), |(r, c)| {
        let dy = r as f64 - source.y;
        let dx = c as f64 - source.x;
        source.amplitude * (-(dx * dx + dy * dy) / two_var).exp()
    })
}
