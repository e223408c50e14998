//! [`IndicatifProgress`]: renders [`cc_core::progress::ProgressObserver`]
//! callbacks as a progress bar, grounded on the teacher CLI's
//! `IndicatifProgress` (`commands/write.rs`) but collapsed to the two
//! read/write callbacks the core actually emits.

use std::time::Duration;

use cc_core::progress::ProgressObserver;
use indicatif::{ProgressBar, ProgressStyle};

fn bar_style(phase: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(&format!(
            "{{spinner:.green}} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{bytes}}/{{total_bytes}} ({{bytes_per_sec}}, {{eta}}) {phase}"
        ))
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

/// One progress bar, recreated per phase (read vs. write) since the
/// core never interleaves the two within a single task.
pub struct IndicatifProgress {
    bar: Option<ProgressBar>,
}

impl IndicatifProgress {
    /// A renderer with no active bar yet.
    pub fn new() -> Self {
        IndicatifProgress { bar: None }
    }

    fn ensure_bar(&mut self, total: u64, phase: &str) -> &ProgressBar {
        if self.bar.as_ref().map(|b| b.length()) != Some(Some(total)) {
            if let Some(old) = self.bar.take() {
                old.finish_and_clear();
            }
            let pb = ProgressBar::new(total);
            pb.set_style(bar_style(phase));
            pb.enable_steady_tick(Duration::from_millis(100));
            self.bar = Some(pb);
        }
        self.bar.as_ref().unwrap()
    }

    /// Finish and clear whatever bar is active, e.g. once a task completes.
    pub fn finish(&mut self) {
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
    }
}

impl Default for IndicatifProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressObserver for IndicatifProgress {
    fn on_read_progress(&mut self, done: u64, total: u64) {
        self.ensure_bar(total, "reading").set_position(done);
    }

    fn on_write_progress(&mut self, done: u64, total: u64) {
        self.ensure_bar(total, "writing").set_position(done);
    }
}
