use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Project as returned by `GET /projects`.
#[derive(Debug, Deserialize)]
pub struct GitLabProject {
    pub id: u64,
    pub path_with_namespace: String,
    /// Absent on instances that hide feature flags from the caller
    pub jobs_enabled: Option<bool>,
}

/// CI job as returned by `GET /projects/:id/jobs`.
#[derive(Debug, Deserialize)]
pub struct GitLabJob {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    /// Seconds, `null` for jobs that never ran
    pub duration: Option<f64>,
}
