mod solver;
mod steps;
mod types;

pub use solver::Blend;
pub use types::{BlendState, FitConfig, FitObserver, FitSummary, IterationStats};
pub(crate) use types::NoOpObserver;
