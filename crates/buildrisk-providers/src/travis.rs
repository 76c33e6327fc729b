//! Travis CI adapter. Paces itself with a fixed per-request sleep (§4.1).
//! Travis has the smallest surviving user base of the five providers; the
//! adapter covers only what §4.1 requires and nothing speculative.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::instrument;

use buildrisk_domain::CiStatus;

use crate::adapter::CiProviderAdapter;
use crate::error::{ProviderError, Result};
use crate::models::{BuildsPage, FetchBuildsParams, JobInfo, LogObject, NormalizedBuild};
use crate::normalize::normalize_status;

const STATUS_VOCAB: &[(&str, CiStatus)] = &[
    ("created", CiStatus::Pending),
    ("started", CiStatus::Running),
    ("passed", CiStatus::Completed),
    ("failed", CiStatus::Completed),
    ("errored", CiStatus::Completed),
    ("canceled", CiStatus::Completed),
];

pub struct TravisAdapter {
    client: Client,
    api_token: String,
    request_delay: std::time::Duration,
}

impl TravisAdapter {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent("buildrisk-providers/0.1")
                .build()
                .expect("failed to build reqwest client"),
            api_token: api_token.into(),
            request_delay: std::time::Duration::from_millis(500),
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .header("Authorization", format!("token {}", self.api_token))
            .header("Travis-API-Version", "3")
            .send()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;
        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound),
            StatusCode::TOO_MANY_REQUESTS => Err(ProviderError::RateLimitedSecondary {
                retry_after_secs: 60,
            }),
            status if status.is_server_error() => {
                Err(ProviderError::Retryable(format!("5xx from Travis: {status}")))
            }
            status => Err(ProviderError::Permanent(format!(
                "unexpected Travis status: {status}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct BuildsResponse {
    builds: Vec<TravisBuild>,
}

#[derive(Debug, Deserialize)]
struct TravisBuild {
    id: u64,
    number: String,
    state: String,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    commit: Option<TravisCommit>,
}

#[derive(Debug, Deserialize)]
struct TravisCommit {
    sha: String,
    branch: Option<TravisBranch>,
    author: Option<TravisAuthor>,
}

#[derive(Debug, Deserialize)]
struct TravisBranch {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TravisAuthor {
    name: String,
}

impl TravisBuild {
    fn into_normalized(self) -> NormalizedBuild {
        let (commit_sha, branch, author) = match self.commit {
            Some(c) => (
                c.sha,
                c.branch.map(|b| b.name).unwrap_or_default(),
                c.author.map(|a| a.name).unwrap_or_default(),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        let is_bot_commit = buildrisk_domain::build::is_bot_commit(
            &author,
            buildrisk_domain::build::DEFAULT_BOT_SUBSTRINGS,
        );
        NormalizedBuild {
            provider_build_id: self.id.to_string(),
            build_number: self.number.parse().unwrap_or(0),
            commit_sha,
            branch,
            status: normalize_status(&self.state, STATUS_VOCAB),
            conclusion: None,
            started_at: self.started_at,
            finished_at: self.finished_at,
            author,
            is_bot_commit,
            raw_payload: serde_json::Value::Null,
        }
    }
}

#[async_trait]
impl CiProviderAdapter for TravisAdapter {
    fn name(&self) -> &'static str {
        "travis"
    }

    #[instrument(skip(self))]
    async fn fetch_builds(
        &self,
        repo_full_name: &str,
        params: FetchBuildsParams,
    ) -> Result<BuildsPage> {
        self.wait_rate_limit().await;
        let slug = repo_full_name.replace('/', "%2F");
        let url = format!(
            "https://api.travis-ci.com/repo/{slug}/builds?limit={}",
            params.limit.max(1)
        );
        let response = self.get(&url).await?;
        let parsed: BuildsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;

        let builds: Vec<NormalizedBuild> = parsed
            .builds
            .into_iter()
            .map(TravisBuild::into_normalized)
            .filter(|b| !(params.exclude_bots && b.is_bot_commit))
            .filter(|b| !params.only_completed || b.status == CiStatus::Completed)
            .collect();

        Ok(BuildsPage {
            builds,
            aborted_on_log_unavailability: false,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_build_details(
        &self,
        _repo_full_name: &str,
        provider_build_id: &str,
    ) -> Result<Option<NormalizedBuild>> {
        self.wait_rate_limit().await;
        let url = format!("https://api.travis-ci.com/build/{provider_build_id}");
        match self.get(&url).await {
            Ok(response) => {
                let build: TravisBuild = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::Retryable(e.to_string()))?;
                Ok(Some(build.into_normalized()))
            }
            Err(ProviderError::NotFound) => Ok(None),
            Err(other) => Err(other),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_build_jobs(
        &self,
        _repo_full_name: &str,
        provider_build_id: &str,
    ) -> Result<Vec<JobInfo>> {
        #[derive(Deserialize)]
        struct JobsResponse {
            jobs: Vec<TravisJob>,
        }
        #[derive(Deserialize)]
        struct TravisJob {
            id: u64,
            state: String,
            started_at: Option<DateTime<Utc>>,
            finished_at: Option<DateTime<Utc>>,
        }

        self.wait_rate_limit().await;
        let url = format!("https://api.travis-ci.com/build/{provider_build_id}/jobs");
        let response = self.get(&url).await?;
        let parsed: JobsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;
        Ok(parsed
            .jobs
            .into_iter()
            .map(|j| JobInfo {
                job_id: j.id.to_string(),
                job_name: String::new(),
                status: normalize_status(&j.state, STATUS_VOCAB),
                started_at: j.started_at,
                finished_at: j.finished_at,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn fetch_build_logs(
        &self,
        _repo_full_name: &str,
        _provider_build_id: &str,
        job_id: Option<&str>,
    ) -> Result<Vec<LogObject>> {
        self.wait_rate_limit().await;
        let Some(job_id) = job_id else {
            return Ok(Vec::new());
        };
        let url = format!("https://api.travis-ci.com/job/{job_id}/log");
        match self.get(&url).await {
            Ok(response) => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| ProviderError::Retryable(e.to_string()))?;
                Ok(vec![LogObject {
                    job_id: job_id.to_string(),
                    job_name: String::new(),
                    size_bytes: text.len() as u64,
                    path: format!("{job_id}/log.txt"),
                    text,
                }])
            }
            Err(ProviderError::NotFound) => Ok(Vec::new()),
            Err(other) => Err(other),
        }
    }

    async fn wait_rate_limit(&self) {
        tokio::time::sleep(self.request_delay).await;
    }
}
