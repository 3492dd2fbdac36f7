pub mod gitlab;
pub mod jenkins;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};

use crate::error::Result;

pub use gitlab::GitLabSource;
pub use jenkins::JenkinsSource;

/// A schedulable unit on the CI server (Jenkins job, GitLab project).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRef {
    /// Key understood by the source (Jenkins full name, GitLab project id)
    pub id: String,
    /// Human readable path used in notifications
    pub name: String,
    /// False when the job is disabled for CI
    pub enabled: bool,
}

/// One historical execution of a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BuildRef {
    pub job_id: String,
    pub number: u64,
}

impl std::fmt::Display for BuildRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.job_id, self.number)
    }
}

/// Start time and duration of one build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildRecord {
    pub timestamp: DateTime<Utc>,
    /// Execution time in minutes, `None` when the server does not know it
    pub duration_minutes: Option<f64>,
}

impl BuildRecord {
    pub fn year(&self) -> i32 {
        self.timestamp.year()
    }

    pub fn month(&self) -> u32 {
        self.timestamp.month()
    }
}

/// Read access to the build history of a CI server.
///
/// Every call is a network round trip and may fail transiently; see
/// [`crate::error::UsageError::is_transient`].
#[async_trait]
pub trait RemoteSource: Send + Sync {
    /// Unit shown in reports ("build" for Jenkins, "job" for GitLab).
    fn unit(&self) -> &'static str;

    async fn list_jobs(&self) -> Result<Vec<JobRef>>;

    async fn list_build_refs(&self, job: &JobRef) -> Result<Vec<BuildRef>>;

    async fn get_build_detail(&self, build: &BuildRef) -> Result<BuildRecord>;
}

/// Reads the response body as JSON, mapping non-success statuses to errors.
pub(crate) async fn read_json<T>(response: reqwest::Response) -> Result<T>
where
    T: serde::de::DeserializeOwned,
{
    let status = response.status();
    if !status.is_success() {
        let message = response
            .text()
            .await
            .unwrap_or_else(|_| "Unable to read error response".to_string());
        return Err(crate::error::UsageError::from_status(status, message));
    }

    let body = response.bytes().await?;
    Ok(serde_json::from_slice(&body)?)
}
