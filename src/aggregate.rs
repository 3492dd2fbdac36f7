use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::sources::BuildRecord;

/// Calendar month used as bucket key; orders chronologically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    pub year: i32,
    pub month: u32,
}

impl Serialize for MonthKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl std::fmt::Display for MonthKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// Build count and CI minutes accumulated for one month.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Bucket {
    pub build_count: u64,
    pub total_duration: f64,
}

/// Month-bucketed accumulator shared by all detail workers.
///
/// One mutex guards the whole map. The lock is never held across an await,
/// so a plain `std::sync::Mutex` is enough.
#[derive(Debug, Default)]
pub struct BucketAggregator {
    buckets: Mutex<BTreeMap<MonthKey, Bucket>>,
}

impl BucketAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds one build to the bucket of `year`/`month`, creating it on first use.
    pub fn record_build(&self, year: i32, month: u32, duration_minutes: f64) {
        let mut buckets = self.lock();
        let bucket = buckets.entry(MonthKey { year, month }).or_default();
        bucket.build_count += 1;
        bucket.total_duration += duration_minutes.max(0.0);
    }

    /// Adds a fetched record; an unknown duration counts the build with zero minutes.
    pub fn record(&self, record: &BuildRecord) {
        self.record_build(
            record.year(),
            record.month(),
            record.duration_minutes.unwrap_or(0.0),
        );
    }

    pub fn snapshot(&self) -> UsageStats {
        UsageStats {
            buckets: self.lock().clone(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<MonthKey, Bucket>> {
        // A panicking writer cannot leave a bucket half-updated, so the data
        // behind a poisoned lock is still consistent.
        self.buckets
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

/// Minimum, maximum and average of a per-month figure.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Spread<T> {
    pub min: T,
    pub max: T,
    pub avg: f64,
}

/// Immutable view of the buckets handed to the reporters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UsageStats {
    buckets: BTreeMap<MonthKey, Bucket>,
}

impl UsageStats {
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Buckets in chronological order.
    pub fn months(&self) -> impl Iterator<Item = (&MonthKey, &Bucket)> {
        self.buckets.iter()
    }

    #[cfg(test)]
    pub fn get(&self, year: i32, month: u32) -> Option<&Bucket> {
        self.buckets.get(&MonthKey { year, month })
    }

    pub fn total_builds(&self) -> u64 {
        self.buckets.values().map(|b| b.build_count).sum()
    }

    pub fn total_duration(&self) -> f64 {
        self.buckets.values().map(|b| b.total_duration).sum()
    }

    /// Spread of build counts over the months present, `None` when empty.
    #[allow(clippy::cast_precision_loss)]
    pub fn build_count_spread(&self) -> Option<Spread<u64>> {
        let counts = self.buckets.values().map(|b| b.build_count);
        Some(Spread {
            min: counts.clone().min()?,
            max: counts.max()?,
            avg: self.total_builds() as f64 / self.buckets.len() as f64,
        })
    }

    /// Spread of CI minutes over the months present, `None` when empty.
    #[allow(clippy::cast_precision_loss)]
    pub fn duration_spread(&self) -> Option<Spread<f64>> {
        if self.buckets.is_empty() {
            return None;
        }

        let durations = self.buckets.values().map(|b| b.total_duration);
        Some(Spread {
            min: durations.clone().fold(f64::INFINITY, f64::min),
            max: durations.fold(f64::NEG_INFINITY, f64::max),
            avg: self.total_duration() / self.buckets.len() as f64,
        })
    }
}
