use std::time::Duration;

use log::{info, warn};

use crate::error::UsageError;

/// The two fan-out stages of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Listing the builds of every job
    Discovery,
    /// Fetching every build and aggregating it
    Details,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Discovery => write!(f, "discovery"),
            Stage::Details => write!(f, "details"),
        }
    }
}

/// A retry about to happen after a transient failure.
#[derive(Debug)]
pub struct RetryEvent<'a> {
    pub operation: &'a str,
    /// Attempt that just failed, starting at 1
    pub attempt: u32,
    pub delay: Duration,
    pub error: &'a UsageError,
}

/// Receives progress notifications from a run.
///
/// Implementations must return quickly and must not fail: the pipeline calls
/// them inline from its workers.
pub trait PipelineObserver: Send + Sync {
    fn stage_started(&self, _stage: Stage, _units: usize) {}

    fn unit_finished(&self, _stage: Stage) {}

    fn unit_dropped(&self, _stage: Stage, _unit: &str, _error: &UsageError) {}

    fn retrying(&self, _event: &RetryEvent<'_>) {}

    fn stage_finished(&self, _stage: Stage) {}

    /// The user asked to stop; partial results follow.
    fn interrupted(&self) {}
}

/// Observer that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl PipelineObserver for LogObserver {
    fn stage_started(&self, stage: Stage, units: usize) {
        info!("Starting {stage} stage with {units} work units");
    }

    fn unit_dropped(&self, stage: Stage, unit: &str, error: &UsageError) {
        warn!("Dropping {unit} from {stage} stage: {error}");
    }

    fn retrying(&self, event: &RetryEvent<'_>) {
        warn!(
            "Error during {} ({}) -- backing off {:.1} seconds (try {})",
            event.operation,
            event.error,
            event.delay.as_secs_f64(),
            event.attempt
        );
    }

    fn stage_finished(&self, stage: Stage) {
        info!("Finished {stage} stage");
    }

    fn interrupted(&self) {
        warn!("Exiting...");
    }
}
