use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use log::debug;
use reqwest::Client;
use url::Url;

use super::types::{BuildInfo, BuildListing, JobListing};
use crate::auth::Credentials;
use crate::error::{Result, UsageError};
use crate::sources::{read_json, BuildRecord, BuildRef, JobRef, RemoteSource};

const JOB_TREE: &str = "jobs[fullName,name,url,color,jobs[url]]";
const BUILD_TREE: &str = "allBuilds[number]";
const DETAIL_TREE: &str = "timestamp,duration,building";

/// Jenkins JSON API binding.
///
/// One `reqwest::Client` is shared by all workers; it is safe for concurrent
/// use and carries no per-request state.
pub struct JenkinsSource {
    client: Client,
    base_url: Url,
    credentials: Option<Credentials>,
}

impl JenkinsSource {
    /// Creates a source for the Jenkins instance at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the HTTP client cannot be built.
    pub fn new(base_url: &str, credentials: Option<Credentials>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ci-usage/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| UsageError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base_url = Url::parse(base_url)
            .map_err(|e| UsageError::Config(format!("Invalid Jenkins URL: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(UsageError::Config(format!(
                "Invalid Jenkins URL: {base_url}"
            )));
        }
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    /// URL of a job or folder from its full name (`folder/sub/job`).
    fn job_url(&self, full_name: &str) -> Result<Url> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| UsageError::Config(format!("Invalid Jenkins URL: {}", self.base_url)))?;
            segments.pop_if_empty();
            for part in full_name.split('/') {
                segments.push("job").push(part);
            }
            segments.push("");
        }
        Ok(url)
    }

    async fn get_api<T>(&self, url: &Url, tree: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        let api_url = url
            .join("api/json")
            .map_err(|e| UsageError::Config(format!("Invalid API URL: {e}")))?;
        debug!("GET {api_url} tree={tree}");

        let mut request = self.client.get(api_url).query(&[("tree", tree)]);
        if let Some(credentials) = &self.credentials {
            request = request.basic_auth(
                &credentials.username,
                Some(credentials.password.as_str()),
            );
        }

        read_json(request.send().await?).await
    }
}

#[async_trait]
impl RemoteSource for JenkinsSource {
    fn unit(&self) -> &'static str {
        "build"
    }

    /// Walks the job tree, descending into folders.
    ///
    /// Jobs reachable through several folders (views, multibranch projects)
    /// are reported once.
    async fn list_jobs(&self) -> Result<Vec<JobRef>> {
        let mut jobs = Vec::new();
        let mut seen = HashSet::new();
        let mut folders = VecDeque::from([(self.base_url.clone(), None::<String>)]);

        while let Some((folder_url, parent)) = folders.pop_front() {
            let listing: JobListing = self.get_api(&folder_url, JOB_TREE).await?;

            for node in listing.jobs {
                if !seen.insert(node.url.clone()) {
                    continue;
                }

                let full_name = match (&node.full_name, &node.name, &parent) {
                    (Some(full_name), _, _) => full_name.clone(),
                    (None, Some(name), Some(parent)) => format!("{parent}/{name}"),
                    (None, Some(name), None) => name.clone(),
                    (None, None, _) => {
                        debug!("Skipping unnamed job at {}", node.url);
                        continue;
                    }
                };

                if node.color.is_some() {
                    jobs.push(JobRef {
                        id: full_name.clone(),
                        name: full_name.clone(),
                        enabled: !node.is_disabled(),
                    });
                }

                if node.is_folder() {
                    folders.push_back((self.job_url(&full_name)?, Some(full_name)));
                }
            }
        }

        debug!("Discovered {} Jenkins jobs", jobs.len());
        Ok(jobs)
    }

    async fn list_build_refs(&self, job: &JobRef) -> Result<Vec<BuildRef>> {
        let listing: BuildListing = self.get_api(&self.job_url(&job.id)?, BUILD_TREE).await?;

        Ok(listing
            .all_builds
            .into_iter()
            .map(|build| BuildRef {
                job_id: job.id.clone(),
                number: build.number,
            })
            .collect())
    }

    async fn get_build_detail(&self, build: &BuildRef) -> Result<BuildRecord> {
        let build_url = self
            .job_url(&build.job_id)?
            .join(&format!("{}/", build.number))
            .map_err(|e| UsageError::Config(format!("Invalid build URL: {e}")))?;
        let info: BuildInfo = self.get_api(&build_url, DETAIL_TREE).await?;

        let timestamp = DateTime::from_timestamp_millis(info.timestamp)
            .ok_or_else(|| UsageError::InvalidTimestamp(info.timestamp.to_string()))?;

        #[allow(clippy::cast_precision_loss)]
        let duration_minutes = if info.building {
            None
        } else {
            info.duration.map(|ms| ms as f64 / 60_000.0)
        };

        Ok(BuildRecord {
            timestamp,
            duration_minutes,
        })
    }
}
