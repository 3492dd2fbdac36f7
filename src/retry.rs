use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Result, UsageError};
use crate::pipeline::{PipelineObserver, RetryEvent};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
pub const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given failed attempt: `base * 2^(attempt - 1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }
}

/// Decides whether an error is worth another attempt.
pub type ErrorClassifier = fn(&UsageError) -> bool;

/// Runs remote calls with exponential backoff on transient errors.
///
/// Each retry is reported to the observer before sleeping. Both the attempt
/// and the backoff sleep end early when the run is cancelled.
#[derive(Clone)]
pub struct RetryingCaller {
    policy: RetryPolicy,
    classifier: ErrorClassifier,
    observer: Arc<dyn PipelineObserver>,
}

impl RetryingCaller {
    pub fn new(policy: RetryPolicy, observer: Arc<dyn PipelineObserver>) -> Self {
        Self {
            policy: RetryPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
            classifier: UsageError::is_transient,
            observer,
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_classifier(mut self, classifier: ErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    #[cfg(test)]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `op` until it succeeds, fails permanently or runs out of attempts.
    ///
    /// # Errors
    ///
    /// - the operation's own error when it is not transient
    /// - [`UsageError::RetriesExhausted`] after `max_attempts` transient failures
    /// - [`UsageError::Cancelled`] as soon as the token fires, abandoning any
    ///   attempt in flight
    pub async fn call<T, F, Fut>(&self, operation: &str, cancel: &CancelToken, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(UsageError::Cancelled),
                result = op() => result,
            };

            let error = match result {
                Ok(value) => return Ok(value),
                Err(e) if !(self.classifier)(&e) => return Err(e),
                Err(e) => e,
            };

            if attempt >= self.policy.max_attempts {
                return Err(UsageError::RetriesExhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: Box::new(error),
                });
            }

            let delay = self.policy.delay_for(attempt);
            self.observer.retrying(&RetryEvent {
                operation,
                attempt,
                delay,
                error: &error,
            });

            tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(UsageError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
        }
    }
}
