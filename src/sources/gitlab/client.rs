use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use url::Url;

use super::types::{GitLabJob, GitLabProject};
use crate::auth::Token;
use crate::error::{Result, UsageError};
use crate::sources::{read_json, BuildRecord, BuildRef, JobRef, RemoteSource};

const PAGE_SIZE: &str = "100";

/// GitLab REST API v4 binding covering every project of an instance.
///
/// Job listings already carry creation time and duration, so they are kept
/// in a prefetch table and handed out by [`RemoteSource::get_build_detail`]
/// without another request.
pub struct GitLabSource {
    client: Client,
    api_url: Url,
    token: Option<Token>,
    prefetched: Mutex<HashMap<BuildRef, BuildRecord>>,
}

impl GitLabSource {
    /// Creates a source for the GitLab instance at `base_url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the API URL cannot be constructed or the HTTP
    /// client cannot be built.
    pub fn new(
        base_url: &str,
        token: Option<Token>,
        timeout: Duration,
        insecure: bool,
    ) -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("ci-usage/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .danger_accept_invalid_certs(insecure)
            .build()
            .map_err(|e| UsageError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut base = Url::parse(base_url)
            .map_err(|e| UsageError::Config(format!("Invalid base URL: {e}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let api_url = base
            .join("api/v4/")
            .map_err(|e| UsageError::Config(format!("Invalid API base URL: {e}")))?;

        Ok(Self {
            client,
            api_url,
            token,
            prefetched: Mutex::new(HashMap::new()),
        })
    }

    fn auth_request(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if let Some(token) = &self.token {
            request.header("PRIVATE-TOKEN", token.as_str())
        } else {
            request
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.api_url
            .join(path)
            .map_err(|e| UsageError::Config(format!("Invalid API URL: {e}")))
    }

    /// Fetches every page of a list endpoint, following `x-next-page`.
    async fn get_all_pages<T>(&self, url: Url) -> Result<Vec<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page = Some("1".to_string());

        while let Some(current) = page {
            debug!("GET {url} page={current}");
            let response = self
                .auth_request(
                    self.client
                        .get(url.clone())
                        .query(&[("per_page", PAGE_SIZE), ("page", current.as_str())]),
                )
                .send()
                .await?;

            page = response
                .headers()
                .get("x-next-page")
                .and_then(|value| value.to_str().ok())
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_owned);

            let batch: Vec<T> = read_json(response).await?;
            items.extend(batch);
        }

        Ok(items)
    }

    fn lock_prefetched(&self) -> std::sync::MutexGuard<'_, HashMap<BuildRef, BuildRecord>> {
        self.prefetched
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

fn to_record(job: &GitLabJob) -> BuildRecord {
    BuildRecord {
        timestamp: job.created_at,
        duration_minutes: job.duration.map(|seconds| seconds / 60.0),
    }
}

#[async_trait]
impl RemoteSource for GitLabSource {
    fn unit(&self) -> &'static str {
        "job"
    }

    async fn list_jobs(&self) -> Result<Vec<JobRef>> {
        let projects: Vec<GitLabProject> = self.get_all_pages(self.endpoint("projects")?).await?;

        Ok(projects
            .into_iter()
            .map(|project| JobRef {
                id: project.id.to_string(),
                name: project.path_with_namespace,
                enabled: project.jobs_enabled.unwrap_or(true),
            })
            .collect())
    }

    async fn list_build_refs(&self, job: &JobRef) -> Result<Vec<BuildRef>> {
        let url = self.endpoint(&format!("projects/{}/jobs", job.id))?;
        let jobs: Vec<GitLabJob> = self.get_all_pages(url).await?;

        let refs: Vec<(BuildRef, BuildRecord)> = jobs
            .iter()
            .map(|ci_job| {
                (
                    BuildRef {
                        job_id: job.id.clone(),
                        number: ci_job.id,
                    },
                    to_record(ci_job),
                )
            })
            .collect();

        let refs: Vec<BuildRef> = {
            let mut prefetched = self.lock_prefetched();
            refs.into_iter()
                .map(|(build, record)| {
                    prefetched.insert(build.clone(), record);
                    build
                })
                .collect()
        };
        Ok(refs)
    }

    async fn get_build_detail(&self, build: &BuildRef) -> Result<BuildRecord> {
        let prefetched = self.lock_prefetched().remove(build);
        if let Some(record) = prefetched {
            return Ok(record);
        }

        let url = self.endpoint(&format!("projects/{}/jobs/{}", build.job_id, build.number))?;
        let response = self.auth_request(self.client.get(url)).send().await?;
        let job: GitLabJob = read_json(response).await?;

        Ok(to_record(&job))
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;

    fn source(server: &mockito::Server, token: Option<Token>) -> GitLabSource {
        GitLabSource::new(&server.url(), token, Duration::from_secs(5), false).unwrap()
    }

    fn project(id: &str, name: &str) -> JobRef {
        JobRef {
            id: id.to_string(),
            name: name.to_string(),
            enabled: true,
        }
    }

    #[test]
    fn test_api_url_keeps_relative_root() {
        let source = GitLabSource::new(
            "https://example.com/gitlab",
            None,
            Duration::from_secs(1),
            false,
        )
        .unwrap();

        assert_eq!(
            source.endpoint("projects").unwrap().as_str(),
            "https://example.com/gitlab/api/v4/projects"
        );
    }

    #[tokio::test]
    async fn test_list_jobs_follows_pagination() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/api/v4/projects")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("page".into(), "1".into()),
                Matcher::UrlEncoded("per_page".into(), "100".into()),
            ]))
            .match_header("private-token", "glpat-test")
            .with_header("content-type", "application/json")
            .with_header("x-next-page", "2")
            .with_body(r#"[{"id": 1, "path_with_namespace": "group/app", "jobs_enabled": true}]"#)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/api/v4/projects")
            .match_query(Matcher::UrlEncoded("page".into(), "2".into()))
            .with_header("content-type", "application/json")
            .with_header("x-next-page", "")
            .with_body(
                r#"[{"id": 2, "path_with_namespace": "group/docs", "jobs_enabled": false},
                    {"id": 3, "path_with_namespace": "group/legacy"}]"#,
            )
            .create_async()
            .await;

        let jobs = source(&server, Some(Token::from("glpat-test")))
            .list_jobs()
            .await
            .unwrap();

        first.assert_async().await;
        second.assert_async().await;
        let summary: Vec<(&str, &str, bool)> = jobs
            .iter()
            .map(|j| (j.id.as_str(), j.name.as_str(), j.enabled))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("1", "group/app", true),
                ("2", "group/docs", false),
                ("3", "group/legacy", true)
            ]
        );
    }

    #[tokio::test]
    async fn test_listed_jobs_are_served_from_prefetch_once() {
        let mut server = mockito::Server::new_async().await;
        let _listing = server
            .mock("GET", "/api/v4/projects/7/jobs")
            .match_query(Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(
                r#"[{"id": 100, "created_at": "2023-01-05T10:00:00.000Z", "duration": 300.0},
                    {"id": 101, "created_at": "2023-02-01T00:00:00.000Z", "duration": null}]"#,
            )
            .create_async()
            .await;
        let detail = server
            .mock("GET", "/api/v4/projects/7/jobs/100")
            .with_header("content-type", "application/json")
            .with_body(r#"{"id": 100, "created_at": "2023-01-05T10:00:00.000Z", "duration": 300.0}"#)
            .expect(1)
            .create_async()
            .await;
        let source = source(&server, None);

        let refs = source.list_build_refs(&project("7", "group/app")).await.unwrap();
        assert_eq!(refs.len(), 2);

        let first = source.get_build_detail(&refs[0]).await.unwrap();
        assert_eq!(
            first.timestamp,
            Utc.with_ymd_and_hms(2023, 1, 5, 10, 0, 0).unwrap()
        );
        assert_eq!(first.duration_minutes, Some(5.0));

        let second = source.get_build_detail(&refs[1]).await.unwrap();
        assert_eq!(second.duration_minutes, None);

        // The prefetched record is consumed; a second lookup hits the API.
        let again = source.get_build_detail(&refs[0]).await.unwrap();
        assert_eq!(again, first);
        detail.assert_async().await;
    }

    #[tokio::test]
    async fn test_forbidden_is_unauthorized() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v4/projects")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"message": "403 Forbidden"}"#)
            .create_async()
            .await;

        let result = source(&server, None).list_jobs().await;

        assert!(matches!(result, Err(UsageError::Unauthorized { status: 403 })));
    }

    #[tokio::test]
    async fn test_rate_limit_is_transient() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/v4/projects/9/jobs")
            .match_query(Matcher::Any)
            .with_status(429)
            .create_async()
            .await;

        let err = source(&server, None)
            .list_build_refs(&project("9", "group/busy"))
            .await
            .unwrap_err();

        assert!(err.is_transient());
    }
}
