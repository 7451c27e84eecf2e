use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::consts::{DEFAULT_E_REL, DEFAULT_MAX_ITER, DEFAULT_SLACK};
use crate::error::{Result, ScarletError};

/// Lifecycle of a [`super::Blend`]. A blend exists only once data is bound,
/// so there is no separate uninitialised state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlendState {
    DataBound,
    Iterating,
    Converged,
    MaxIterReached,
}

impl fmt::Display for BlendState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataBound => write!(f, "Data bound"),
            Self::Iterating => write!(f, "Iterating"),
            Self::Converged => write!(f, "Converged"),
            Self::MaxIterReached => write!(f, "Max iterations reached"),
        }
    }
}

/// Solver settings for one call to [`super::Blend::fit_with`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FitConfig {
    #[serde(default = "default_max_iter")]
    pub max_iter: usize,
    /// Relative change below which an SED or morphology counts as converged.
    #[serde(default = "default_e_rel")]
    pub e_rel: f64,
    /// Gradient step as a fraction of the inverse Lipschitz bound.
    #[serde(default = "default_slack")]
    pub slack: f64,
    /// Stop after this many seconds even if `max_iter` is not reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_secs: Option<f64>,
}

fn default_max_iter() -> usize {
    DEFAULT_MAX_ITER
}
fn default_e_rel() -> f64 {
    DEFAULT_E_REL
}
fn default_slack() -> f64 {
    DEFAULT_SLACK
}

impl Default for FitConfig {
    fn default() -> Self {
        Self {
            max_iter: DEFAULT_MAX_ITER,
            e_rel: DEFAULT_E_REL,
            slack: DEFAULT_SLACK,
            time_limit_secs: None,
        }
    }
}

impl FitConfig {
    pub fn new(max_iter: usize, e_rel: f64) -> Self {
        Self {
            max_iter,
            e_rel,
            ..Self::default()
        }
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !(self.e_rel.is_finite() && self.e_rel >= 0.0) {
            return Err(ScarletError::InvalidParameter(format!(
                "e_rel must be finite and non-negative, got {}",
                self.e_rel
            )));
        }
        if !(self.slack.is_finite() && self.slack > 0.0 && self.slack < 2.0) {
            return Err(ScarletError::InvalidParameter(format!(
                "slack must be in (0, 2), got {}",
                self.slack
            )));
        }
        self.time_limit()?;
        Ok(())
    }

    /// Wall-clock budget of a fit. Limits that are not positive or do not
    /// fit in a [`Duration`] are rejected.
    pub fn time_limit(&self) -> Result<Option<Duration>> {
        self.time_limit_secs
            .map(|limit| {
                if !(limit > 0.0) {
                    return Err(ScarletError::InvalidParameter(format!(
                        "time limit must be positive, got {limit}"
                    )));
                }
                Duration::try_from_secs_f64(limit).map_err(|e| {
                    ScarletError::InvalidParameter(format!("time limit {limit} s is out of range: {e}"))
                })
            })
            .transpose()
    }
}

/// Diagnostics recorded after every iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IterationStats {
    /// 1-based iteration number within the fit.
    pub iteration: usize,
    /// `0.5 * sum(W * (model - data)^2)` after the update.
    pub objective: f64,
    /// Largest relative SED change over the free components.
    pub max_sed_change: f64,
    /// Largest relative morphology change over the free components.
    pub max_morph_change: f64,
    /// The momentum sequence was reset after this iteration.
    pub restarted: bool,
}

/// Outcome of a fit. Reaching `max_iter` is reported here, not as an error.
#[derive(Clone, Debug)]
pub struct FitSummary {
    pub iterations: usize,
    pub converged: bool,
    pub state: BlendState,
    pub residual_rms: f64,
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Progress callbacks for a running fit.
///
/// All methods have default no-op implementations.
pub trait FitObserver: Send + Sync {
    /// The fit is starting and will run at most `max_iter` iterations.
    fn begin_fit(&self, _max_iter: usize) {}

    /// One iteration has completed.
    fn iteration(&self, _stats: &IterationStats) {}

    /// The fit has stopped.
    fn finish_fit(&self, _summary: &FitSummary) {}
}

/// No-op observer, used when `fit` delegates to `fit_with`.
pub(crate) struct NoOpObserver;
impl FitObserver for NoOpObserver {}
