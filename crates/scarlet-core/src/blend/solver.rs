use std::ops::Index;
use std::time::Instant;

use ndarray::{Array1, Array2, Array3};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::component::{Component, ComponentConfig};
use crate::consts::{EPSILON, PARALLEL_COMPONENT_THRESHOLD};
use crate::convolve::PsfOperator;
use crate::error::{Result, ScarletError};
use crate::scene::{Observation, Peak};

use super::steps::{
    extrapolate, morphology_lipschitz, next_momentum, overlap_lists, sed_lipschitz, BlockChange,
};
use super::types::{BlendState, FitConfig, FitObserver, FitSummary, IterationStats, NoOpObserver};

/// Run `f` for every component index, in parallel once there are enough
/// components to pay for it.
fn per_component<T, F>(count: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync + Send,
{
    if count >= PARALLEL_COMPONENT_THRESHOLD {
        (0..count).into_par_iter().map(f).collect()
    } else {
        (0..count).map(f).collect()
    }
}

/// Multiply band b of a [band, h, w] array by `sed[b]`.
fn scale_bands(local: &mut Array3<f64>, sed: &Array1<f64>) {
    for (mut band, &amplitude) in local.outer_iter_mut().zip(sed.iter()) {
        band *= amplitude;
    }
}

/// Joint fit of a set of components to an observation.
///
/// Every iteration runs an SED pass and then a morphology pass. Each pass
/// rebuilds the model from the extrapolated (momentum) point, takes a
/// gradient step of `slack / L_k` per component and projects the result
/// through the component's constraints. Box-local arrays reach the scene
/// cube only through [`crate::scene::BoundingBox`] gather/scatter.
#[derive(Clone, Debug)]
pub struct Blend {
    observation: Observation,
    components: Vec<Component>,
    overlaps: Vec<Vec<usize>>,
    sed_prev: Vec<Array1<f64>>,
    morph_prev: Vec<Array2<f64>>,
    momentum: f64,
    iterations: usize,
    state: BlendState,
    history: Vec<IterationStats>,
}

impl Blend {
    /// Bind components to the observation they are fitted against.
    pub fn new(observation: Observation, components: Vec<Component>) -> Result<Self> {
        if components.is_empty() {
            return Err(ScarletError::EmptyBlend);
        }
        let (bands, height, width) = observation.shape();
        for component in &components {
            if component.bands() != bands {
                return Err(ScarletError::ShapeMismatch {
                    what: "component SED",
                    expected: vec![bands],
                    actual: vec![component.bands()],
                });
            }
            if component.scene_shape() != (height, width) {
                let (h, w) = component.scene_shape();
                return Err(ScarletError::ShapeMismatch {
                    what: "component scene",
                    expected: vec![height, width],
                    actual: vec![h, w],
                });
            }
            let bbox = component.bbox();
            if !bbox.fits_within(height, width) {
                return Err(ScarletError::BoxOutsideScene {
                    bbox,
                    height,
                    width,
                });
            }
        }

        let boxes: Vec<_> = components.iter().map(Component::bbox).collect();
        let overlaps = overlap_lists(&boxes);
        let sed_prev = components.iter().map(|c| c.sed().clone()).collect();
        let morph_prev = components.iter().map(|c| c.morphology().clone()).collect();

        Ok(Self {
            observation,
            components,
            overlaps,
            sed_prev,
            morph_prev,
            momentum: 1.0,
            iterations: 0,
            state: BlendState::DataBound,
            history: Vec::new(),
        })
    }

    /// Initialise one component per peak and bind them to `observation`.
    ///
    /// Peaks without significant flux are skipped and returned alongside the
    /// blend; any other failure aborts.
    pub fn from_peaks(
        observation: Observation,
        peaks: &[Peak],
        psf: Option<&PsfOperator>,
        config: &ComponentConfig,
    ) -> Result<(Self, Vec<Peak>)> {
        let mut components = Vec::with_capacity(peaks.len());
        let mut skipped = Vec::new();
        for &peak in peaks {
            match Component::from_peak(&observation, peak, psf, config) {
                Ok(component) => components.push(component),
                Err(e) if e.is_recoverable() => {
                    warn!(x = peak.x, y = peak.y, error = %e, "Skipping peak");
                    skipped.push(peak);
                }
                Err(e) => return Err(e),
            }
        }
        let blend = Self::new(observation, components)?;
        Ok((blend, skipped))
    }

    /// Fit with default solver settings apart from `max_iter` and `e_rel`.
    pub fn fit(&mut self, max_iter: usize, e_rel: f64) -> Result<FitSummary> {
        self.fit_with(&FitConfig::new(max_iter, e_rel), &NoOpObserver)
    }

    /// Fit until every free SED and morphology changes by at most `e_rel`
    /// (relative) on the same iteration, or until `max_iter` / the time limit.
    ///
    /// Restarts the iteration count and momentum; the components continue
    /// from their current values.
    pub fn fit_with(&mut self, config: &FitConfig, observer: &dyn FitObserver) -> Result<FitSummary> {
        config.validate()?;
        let start = Instant::now();
        let time_limit = config.time_limit()?;
        self.reset_solver();
        self.state = BlendState::Iterating;

        info!(
            components = self.components.len(),
            bands = self.observation.bands(),
            max_iter = config.max_iter,
            e_rel = config.e_rel,
            "Starting fit"
        );
        observer.begin_fit(config.max_iter);

        let mut converged = false;
        let mut timed_out = false;
        while self.iterations < config.max_iter {
            let stats = self.iterate(config.slack);
            debug!(
                iteration = stats.iteration,
                objective = stats.objective,
                sed_change = stats.max_sed_change,
                morph_change = stats.max_morph_change,
                restarted = stats.restarted,
                "Iteration complete"
            );
            observer.iteration(&stats);
            self.history.push(stats);

            if stats.max_sed_change <= config.e_rel && stats.max_morph_change <= config.e_rel {
                converged = true;
                break;
            }
            if time_limit.is_some_and(|limit| start.elapsed() >= limit) {
                timed_out = true;
                break;
            }
        }

        self.state = if converged {
            BlendState::Converged
        } else {
            BlendState::MaxIterReached
        };
        if timed_out {
            warn!(iterations = self.iterations, "Fit stopped at the time limit");
        } else if !converged {
            warn!(max_iter = config.max_iter, "Fit reached max_iter without converging");
        }

        let summary = FitSummary {
            iterations: self.iterations,
            converged,
            state: self.state,
            residual_rms: self.residual_rms(),
            timed_out,
            elapsed: start.elapsed(),
        };
        info!(
            iterations = summary.iterations,
            converged,
            residual_rms = summary.residual_rms,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Fit finished"
        );
        observer.finish_fit(&summary);
        Ok(summary)
    }

    fn reset_solver(&mut self) {
        self.momentum = 1.0;
        self.iterations = 0;
        self.history.clear();
        for (prev, c) in self.sed_prev.iter_mut().zip(&self.components) {
            prev.assign(c.sed());
        }
        for (prev, c) in self.morph_prev.iter_mut().zip(&self.components) {
            prev.assign(c.morphology());
        }
    }

    fn iterate(&mut self, slack: f64) -> IterationStats {
        let t = self.momentum;
        let t_next = next_momentum(t);
        let beta = (t - 1.0) / t_next;
        let wmax = self.observation.max_weight();

        let (sed_change, sed_restart) = self.sed_pass(beta, slack, wmax);
        let (morph_change, morph_restart) = self.morphology_pass(beta, slack, wmax);

        let restarted = sed_restart + morph_restart > 0.0;
        self.momentum = if restarted { 1.0 } else { t_next };
        self.iterations += 1;

        IterationStats {
            iteration: self.iterations,
            objective: self.observation.objective(&self.get_model()),
            max_sed_change: sed_change,
            max_morph_change: morph_change,
            restarted,
        }
    }

    /// Accelerated proximal step on every free SED. Returns the largest
    /// relative change and the summed restart criterion.
    fn sed_pass(&mut self, beta: f64, slack: f64, wmax: f64) -> (f64, f64) {
        if self.components.iter().all(Component::is_sed_fixed) {
            return (0.0, 0.0);
        }
        let count = self.components.len();
        let components = &self.components;

        let convolved: Vec<Array3<f64>> =
            per_component(count, |k| components[k].convolved(&components[k].morphology().view()));
        let conv_norms: Vec<Vec<f64>> = convolved
            .iter()
            .map(|c| {
                c.outer_iter()
                    .map(|band| band.iter().map(|v| v * v).sum::<f64>().sqrt())
                    .collect()
            })
            .collect();
        let lipschitz = sed_lipschitz(&self.overlaps, &conv_norms, wmax);

        let extrapolated: Vec<Array1<f64>> = components
            .iter()
            .zip(&self.sed_prev)
            .map(|(c, prev)| {
                if c.is_sed_fixed() {
                    c.sed().clone()
                } else {
                    extrapolate(c.sed(), prev, beta)
                }
            })
            .collect();

        let mut model = Array3::<f64>::zeros(self.observation.shape());
        for (k, c) in components.iter().enumerate() {
            let mut local = convolved[k].clone();
            scale_bands(&mut local, &extrapolated[k]);
            c.bbox().scatter_add(&mut model, &local.view());
        }
        let residual = self.observation.weighted_residual(&model);

        let updates = per_component(count, |k| {
            let c = &components[k];
            if c.is_sed_fixed() || lipschitz[k] <= EPSILON {
                return None;
            }
            let local = c.bbox().gather(&residual);
            let grad = Component::sed_gradient(&local, &convolved[k]);
            let next = c.sed_step(&extrapolated[k], &grad, slack / lipschitz[k]);
            let change = BlockChange::measure(c.sed(), &extrapolated[k], &next);
            Some((next, change))
        });

        let mut max_change = 0.0_f64;
        let mut restart = 0.0;
        for (k, update) in updates.into_iter().enumerate() {
            if self.components[k].is_sed_fixed() {
                continue;
            }
            self.sed_prev[k].assign(self.components[k].sed());
            if let Some((next, change)) = update {
                max_change = max_change.max(change.relative);
                restart += change.restart;
                self.components[k].set_sed(next);
            }
        }
        (max_change, restart)
    }

    /// Accelerated proximal step on every free morphology, using the SEDs
    /// from the preceding SED pass.
    fn morphology_pass(&mut self, beta: f64, slack: f64, wmax: f64) -> (f64, f64) {
        let count = self.components.len();
        let components = &self.components;

        let seds: Vec<Array1<f64>> = components.iter().map(|c| c.sed().clone()).collect();
        let kernel_norms: Vec<Vec<f64>> = components
            .iter()
            .map(|c| (0..c.bands()).map(|b| c.norm_bound(b)).collect())
            .collect();
        let lipschitz = morphology_lipschitz(&self.overlaps, &seds, &kernel_norms, wmax);

        let extrapolated: Vec<Array2<f64>> = components
            .iter()
            .zip(&self.morph_prev)
            .map(|(c, prev)| {
                if c.is_morphology_fixed() {
                    c.morphology().clone()
                } else {
                    extrapolate(c.morphology(), prev, beta)
                }
            })
            .collect();

        let locals: Vec<Array3<f64>> =
            per_component(count, |k| components[k].render(&seds[k], &extrapolated[k].view()));
        let mut model = Array3::<f64>::zeros(self.observation.shape());
        for (c, local) in components.iter().zip(&locals) {
            c.bbox().scatter_add(&mut model, &local.view());
        }
        let residual = self.observation.weighted_residual(&model);

        let updates = per_component(count, |k| {
            let c = &components[k];
            if c.is_morphology_fixed() || lipschitz[k] <= EPSILON {
                return None;
            }
            let local = c.bbox().gather(&residual);
            let grad = c.morphology_gradient(&seds[k], &local);
            let next = c.morphology_step(&extrapolated[k], &grad, slack / lipschitz[k]);
            let change = BlockChange::measure(c.morphology(), &extrapolated[k], &next);
            Some((next, change))
        });

        let mut max_change = 0.0_f64;
        let mut restart = 0.0;
        for (k, update) in updates.into_iter().enumerate() {
            if self.components[k].is_morphology_fixed() {
                continue;
            }
            self.morph_prev[k].assign(self.components[k].morphology());
            if let Some((next, change)) = update {
                max_change = max_change.max(change.relative);
                restart += change.restart;
                self.components[k].set_morphology(next);
            }
        }
        (max_change, restart)
    }

    /// Sum of all component models: [band, height, width].
    pub fn get_model(&self) -> Array3<f64> {
        let count = self.components.len();
        let components = &self.components;
        let locals = per_component(count, |k| components[k].model_in_box());
        let mut model = Array3::<f64>::zeros(self.observation.shape());
        for (c, local) in components.iter().zip(&locals) {
            c.bbox().scatter_add(&mut model, &local.view());
        }
        model
    }

    /// Full-scene model of a single component.
    pub fn component_model(&self, index: usize) -> Result<Array3<f64>> {
        Ok(self.component(index)?.get_model())
    }

    pub fn component(&self, index: usize) -> Result<&Component> {
        self.components
            .get(index)
            .ok_or(ScarletError::ComponentIndexOutOfRange {
                index,
                total: self.components.len(),
            })
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn observation(&self) -> &Observation {
        &self.observation
    }

    /// Iterations run by the latest fit.
    pub fn iterations(&self) -> usize {
        self.iterations
    }

    pub fn state(&self) -> BlendState {
        self.state
    }

    /// Per-iteration diagnostics of the latest fit.
    pub fn history(&self) -> &[IterationStats] {
        &self.history
    }

    /// Unweighted RMS of `data - model` over unmasked pixels.
    pub fn residual_rms(&self) -> f64 {
        self.observation.residual_rms(&self.get_model())
    }

    /// Rebind with `extra` appended to the current components. Iteration
    /// count, momentum and history start over.
    pub fn with_components(self, extra: Vec<Component>) -> Result<Self> {
        let Self {
            observation,
            mut components,
            ..
        } = self;
        components.extend(extra);
        Self::new(observation, components)
    }
}

impl Index<usize> for Blend {
    type Output = Component;

    fn index(&self, index: usize) -> &Component {
        &self.components[index]
    }
}
