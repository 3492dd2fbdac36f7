mod observer;

use std::sync::Arc;

use futures::stream::{self, Stream, StreamExt};
use log::info;
use serde::Serialize;

use crate::aggregate::{BucketAggregator, UsageStats};
use crate::cancel::CancelToken;
use crate::error::{Result, UsageError};
use crate::retry::{RetryPolicy, RetryingCaller};
use crate::sources::{BuildRef, JobRef, RemoteSource};

pub use observer::{LogObserver, PipelineObserver, RetryEvent, Stage};

pub const DEFAULT_WORKERS: usize = 25;

/// Tuning knobs of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Concurrent work units per stage
    pub workers: usize,
    /// Abort the run when a unit exhausts its retries instead of dropping it
    pub strict: bool,
    pub retry: RetryPolicy,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            strict: false,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Completed,
    Cancelled,
}

/// What a run did, together with the buckets it filled.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: Outcome,
    pub unit: &'static str,
    pub jobs_found: usize,
    pub jobs_disabled: usize,
    pub jobs_dropped: usize,
    pub build_refs: usize,
    pub builds_recorded: usize,
    pub builds_dropped: usize,
    pub stats: UsageStats,
}

impl RunReport {
    fn new(unit: &'static str) -> Self {
        Self {
            outcome: Outcome::Completed,
            unit,
            jobs_found: 0,
            jobs_disabled: 0,
            jobs_dropped: 0,
            build_refs: 0,
            builds_recorded: 0,
            builds_dropped: 0,
            stats: UsageStats::default(),
        }
    }
}

/// Two-stage fetch of a CI server's build history.
///
/// Stage 1 lists the builds of every enabled job, stage 2 fetches every
/// build and adds it to the aggregator. Both stages run at most `workers`
/// units at a time and stop taking new units once the cancel token fires.
pub struct FetchPipeline {
    source: Arc<dyn RemoteSource>,
    caller: RetryingCaller,
    observer: Arc<dyn PipelineObserver>,
    workers: usize,
    strict: bool,
    cancel: CancelToken,
}

impl FetchPipeline {
    pub fn new(
        source: Arc<dyn RemoteSource>,
        settings: PipelineSettings,
        observer: Arc<dyn PipelineObserver>,
        cancel: CancelToken,
    ) -> Self {
        Self {
            source,
            caller: RetryingCaller::new(settings.retry, Arc::clone(&observer)),
            observer,
            workers: settings.workers.max(1),
            strict: settings.strict,
            cancel,
        }
    }

    /// Runs both stages, filling `aggregator`.
    ///
    /// A cancelled run still returns `Ok` with whatever was aggregated before
    /// the signal.
    ///
    /// # Errors
    ///
    /// Returns the first permanent error (rejected credentials, unexpected
    /// response), or an exhausted unit when running in strict mode. No
    /// report is produced in that case.
    pub async fn run(&self, aggregator: &BucketAggregator) -> Result<RunReport> {
        let mut report = RunReport::new(self.source.unit());

        let build_refs = self.discover(&mut report).await?;

        if self.cancel.is_cancelled() {
            info!("Cancelled during discovery, skipping build details");
            report.outcome = Outcome::Cancelled;
        } else {
            self.fetch_details(&build_refs, aggregator, &mut report)
                .await?;
            if self.cancel.is_cancelled() {
                report.outcome = Outcome::Cancelled;
            }
        }

        report.stats = aggregator.snapshot();
        Ok(report)
    }

    async fn discover(&self, report: &mut RunReport) -> Result<Vec<BuildRef>> {
        let jobs = match self
            .caller
            .call("listing jobs", &self.cancel, || self.source.list_jobs())
            .await
        {
            Ok(jobs) => jobs,
            Err(UsageError::Cancelled) => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        report.jobs_found = jobs.len();
        let jobs: Vec<JobRef> = jobs.into_iter().filter(|job| job.enabled).collect();
        report.jobs_disabled = report.jobs_found - jobs.len();
        info!(
            "Found {} jobs ({} disabled)",
            report.jobs_found, report.jobs_disabled
        );

        self.observer.stage_started(Stage::Discovery, jobs.len());

        let units = stream::iter(jobs)
            .map(|job: JobRef| async move {
                let operation = format!("listing builds of {}", job.name);
                let result = self
                    .caller
                    .call(&operation, &self.cancel, || self.source.list_build_refs(&job))
                    .await;
                (job, result)
            })
            .buffer_unordered(self.workers);
        let mut units = std::pin::pin!(units);

        let mut build_refs = Vec::new();
        while let Some((job, result)) = self.next_unit(&mut units).await {
            match result {
                Ok(refs) => build_refs.extend(refs),
                Err(e) => {
                    if self.unit_failed(Stage::Discovery, &job.name, e)? {
                        report.jobs_dropped += 1;
                    }
                }
            }
            self.observer.unit_finished(Stage::Discovery);
        }

        self.observer.stage_finished(Stage::Discovery);
        report.build_refs = build_refs.len();
        Ok(build_refs)
    }

    async fn fetch_details(
        &self,
        build_refs: &[BuildRef],
        aggregator: &BucketAggregator,
        report: &mut RunReport,
    ) -> Result<()> {
        self.observer.stage_started(Stage::Details, build_refs.len());

        let units = stream::iter(build_refs.iter().cloned())
            .map(|build: BuildRef| async move {
                let operation = format!("fetching build {build}");
                let result = self
                    .caller
                    .call(&operation, &self.cancel, || {
                        self.source.get_build_detail(&build)
                    })
                    .await
                    .map(|record| aggregator.record(&record));
                (build, result)
            })
            .buffer_unordered(self.workers);
        let mut units = std::pin::pin!(units);

        while let Some((build, result)) = self.next_unit(&mut units).await {
            match result {
                Ok(()) => report.builds_recorded += 1,
                Err(e) => {
                    if self.unit_failed(Stage::Details, &build.to_string(), e)? {
                        report.builds_dropped += 1;
                    }
                }
            }
            self.observer.unit_finished(Stage::Details);
        }

        self.observer.stage_finished(Stage::Details);
        Ok(())
    }

    /// Next finished unit, or `None` when the stage is done or cancelled.
    async fn next_unit<S>(&self, units: &mut S) -> Option<S::Item>
    where
        S: Stream + Unpin,
    {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            item = units.next() => item,
        }
    }

    /// Returns `Ok(true)` when the unit is dropped, `Err` when the run must stop.
    fn unit_failed(&self, stage: Stage, unit: &str, error: UsageError) -> Result<bool> {
        match error {
            UsageError::Cancelled => Ok(false),
            e if e.is_unit_local() && !self.strict => {
                self.observer.unit_dropped(stage, unit, &e);
                Ok(true)
            }
            e => Err(e),
        }
    }
}
