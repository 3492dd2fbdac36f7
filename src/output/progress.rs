use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use log::debug;

use super::styling::{failure, notice, section_header, success};
use crate::error::UsageError;
use crate::pipeline::{PipelineObserver, RetryEvent, Stage};

/// Progress bars on stderr, one per pipeline stage.
///
/// Retry and failure notices are printed above the active bar so they do not
/// garble it.
pub struct StageProgress {
    unit: &'static str,
    bar: Mutex<Option<ProgressBar>>,
}

impl StageProgress {
    pub fn new(unit: &'static str) -> Self {
        eprintln!("{}", section_header("⚙️", "Stages"));
        Self {
            unit,
            bar: Mutex::new(None),
        }
    }

    /// Prints a line above the active bar, or straight to stderr without one.
    pub fn println(&self, message: impl AsRef<str>) {
        match self.lock().as_ref() {
            Some(bar) => bar.println(message.as_ref()),
            None => eprintln!("{}", message.as_ref()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<ProgressBar>> {
        self.bar
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn label(&self, stage: Stage) -> String {
        match stage {
            Stage::Discovery => "Stage 1/2: Fetching jobs".to_string(),
            Stage::Details => format!("Stage 2/2: Fetching/processing {}s", self.unit),
        }
    }
}

impl PipelineObserver for StageProgress {
    fn stage_started(&self, stage: Stage, units: usize) {
        let unit = match stage {
            Stage::Discovery => "job",
            Stage::Details => self.unit,
        };
        let pb = create_bar(units as u64, notice(self.label(stage)).to_string(), unit);
        if let Some(previous) = self.lock().replace(pb) {
            previous.finish();
        }
    }

    fn unit_finished(&self, _stage: Stage) {
        if let Some(bar) = self.lock().as_ref() {
            bar.inc(1);
        }
    }

    fn unit_dropped(&self, stage: Stage, unit: &str, error: &UsageError) {
        debug!("Dropped {unit} during {stage}: {error}");
        self.println(format!(
            "  {} {unit}: {error}",
            failure("Skipping")
        ));
    }

    fn retrying(&self, event: &RetryEvent<'_>) {
        debug!("Retrying {} after {}", event.operation, event.error);
        self.println(format!(
            "  Error {} -- backing off {:.1} seconds (try {})",
            event.operation,
            event.delay.as_secs_f64(),
            event.attempt
        ));
    }

    fn stage_finished(&self, stage: Stage) {
        if let Some(bar) = self.lock().take() {
            bar.finish_with_message(success(format!("{} ✓", self.label(stage))).to_string());
        }
    }

    fn interrupted(&self) {
        self.println(notice("Exiting...").to_string());
    }
}

fn create_bar(len: u64, message: String, unit: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_draw_target(ProgressDrawTarget::stderr());
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "  {{msg}} [{{bar:30.cyan/blue}}] {{pos}}/{{len}} {unit}s ({{elapsed}}, eta {{eta}})"
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bar_lifecycle_per_stage() {
        let progress = StageProgress::new("build");

        progress.stage_started(Stage::Discovery, 2);
        progress.unit_finished(Stage::Discovery);
        progress.unit_finished(Stage::Discovery);
        assert_eq!(progress.lock().as_ref().map(ProgressBar::position), Some(2));

        progress.stage_finished(Stage::Discovery);
        assert!(progress.lock().is_none());

        progress.stage_started(Stage::Details, 5);
        assert_eq!(progress.lock().as_ref().and_then(ProgressBar::length), Some(5));
        progress.stage_finished(Stage::Details);
    }

    #[test]
    fn test_details_label_uses_unit() {
        let progress = StageProgress::new("job");
        assert_eq!(
            progress.label(Stage::Details),
            "Stage 2/2: Fetching/processing jobs"
        );
    }

    #[test]
    fn test_notifications_without_bar_do_not_panic() {
        let progress = StageProgress::new("build");
        progress.unit_finished(Stage::Details);
        progress.unit_dropped(
            Stage::Details,
            "app#1",
            &UsageError::Api {
                status: 502,
                message: String::new(),
            },
        );
        progress.interrupted();
    }
}
