use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use scarlet_core::blend::{FitObserver, FitSummary, IterationStats};

/// Progress bar driven by solver callbacks.
pub struct FitProgress {
    pb: ProgressBar,
}

impl FitProgress {
    pub fn new(label: &str) -> Result<Self> {
        let pb = ProgressBar::new(0);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{msg:20} [{bar:40}] {pos}/{len}")?
                .progress_chars("=> "),
        );
        pb.set_message(label.to_string());
        Ok(Self { pb })
    }
}

impl FitObserver for FitProgress {
    fn begin_fit(&self, max_iter: usize) {
        self.pb.set_length(max_iter as u64);
        self.pb.set_position(0);
    }

    fn iteration(&self, stats: &IterationStats) {
        self.pb.set_position(stats.iteration as u64);
    }

    fn finish_fit(&self, summary: &FitSummary) {
        self.pb.finish_with_message(summary.state.to_string());
    }
}
