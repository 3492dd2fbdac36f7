use serde::Deserialize;

/// Response of `api/json?tree=jobs[...]` on the root or on a folder.
#[derive(Debug, Deserialize)]
pub struct JobListing {
    #[serde(default)]
    pub jobs: Vec<JobNode>,
}

/// An item of a job listing: a buildable job or a folder.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobNode {
    pub full_name: Option<String>,
    pub name: Option<String>,
    pub url: String,
    /// Ball colour; only buildable jobs have one
    pub color: Option<String>,
    /// Present on folders (including multibranch projects)
    pub jobs: Option<Vec<serde_json::Value>>,
}

impl JobNode {
    pub fn is_folder(&self) -> bool {
        self.jobs.is_some()
    }

    pub fn is_disabled(&self) -> bool {
        self.color.as_deref() == Some("disabled")
    }
}

/// Response of `api/json?tree=allBuilds[number]` on a job.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildListing {
    #[serde(default)]
    pub all_builds: Vec<BuildNumber>,
}

#[derive(Debug, Deserialize)]
pub struct BuildNumber {
    pub number: u64,
}

/// Response of `api/json?tree=timestamp,duration,building` on a build.
#[derive(Debug, Deserialize)]
pub struct BuildInfo {
    /// Start time, epoch milliseconds
    pub timestamp: i64,
    /// Milliseconds
    pub duration: Option<u64>,
    #[serde(default)]
    pub building: bool,
}
