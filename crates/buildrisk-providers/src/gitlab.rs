//! GitLab CI adapter. No shared token pool; self-paces with a fixed delay.

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
    ("pending", CiStatus::Queued),
    ("running", CiStatus::Running),
    ("success", CiStatus::Completed),
    ("failed", CiStatus::Completed),
    ("canceled", CiStatus::Completed),
    ("skipped", CiStatus::Completed),
];

pub struct GitLabAdapter {
    client: Client,
    token: String,
    request_delay: std::time::Duration,
}

impl GitLabAdapter {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent("buildrisk-providers/0.1")
                .build()
                .expect("failed to build reqwest client"),
            token: token.into(),
            request_delay: std::time::Duration::from_millis(200),
        }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .header("PRIVATE-TOKEN", &self.token)
            .send()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;
        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound),
            status if status.is_server_error() => {
                Err(ProviderError::Retryable(format!("5xx from GitLab: {status}")))
            }
            status => Err(ProviderError::Permanent(format!(
                "unexpected GitLab status: {status}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Pipeline {
    id: u64,
    iid: u64,
    sha: String,
    #[serde(rename = "ref")]
    git_ref: String,
    status: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    user: Option<PipelineUser>,
}

#[derive(Debug, Deserialize)]
struct PipelineUser {
    username: String,
}

impl Pipeline {
    fn into_normalized(self) -> NormalizedBuild {
        let author = self.user.map(|u| u.username).unwrap_or_default();
        let is_bot_commit = buildrisk_domain::build::is_bot_commit(
            &author,
            buildrisk_domain::build::DEFAULT_BOT_SUBSTRINGS,
        );
        NormalizedBuild {
            provider_build_id: self.id.to_string(),
            build_number: self.iid,
            commit_sha: self.sha,
            branch: self.git_ref,
            status: normalize_status(&self.status, STATUS_VOCAB),
            conclusion: None,
            started_at: self.created_at,
            finished_at: self.updated_at,
            author,
            is_bot_commit,
            raw_payload: serde_json::Value::Null,
        }
    }
}

#[async_trait]
impl CiProviderAdapter for GitLabAdapter {
    fn name(&self) -> &'static str {
        "gitlab"
    }

    #[instrument(skip(self))]
    async fn fetch_builds(
        &self,
        repo_full_name: &str,
        params: FetchBuildsParams,
    ) -> Result<BuildsPage> {
        self.wait_rate_limit().await;
        let project = urlencoding_lite(repo_full_name);
        let url = format!(
            "https://gitlab.com/api/v4/projects/{project}/pipelines?per_page={}&page={}",
            params.limit.max(1),
            params.page.max(1)
        );
        let response = self.get(&url).await?;
        let pipelines: Vec<Pipeline> = response
            .json()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;

        let builds: Vec<NormalizedBuild> = pipelines
            .into_iter()
            .map(Pipeline::into_normalized)
            .filter(|b| !(params.exclude_bots && b.is_bot_commit))
            .collect();

        Ok(BuildsPage {
            builds,
            aborted_on_log_unavailability: false,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_build_details(
        &self,
        repo_full_name: &str,
        provider_build_id: &str,
    ) -> Result<Option<NormalizedBuild>> {
        self.wait_rate_limit().await;
        let project = urlencoding_lite(repo_full_name);
        let url = format!("https://gitlab.com/api/v4/projects/{project}/pipelines/{provider_build_id}");
        match self.get(&url).await {
            Ok(response) => {
                let pipeline: Pipeline = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::Retryable(e.to_string()))?;
                Ok(Some(pipeline.into_normalized()))
            }
            Err(ProviderError::NotFound) => Ok(None),
            Err(other) => Err(other),
        }
    }

    #[instrument(skip(self))]
    async fn fetch_build_jobs(
        &self,
        repo_full_name: &str,
        provider_build_id: &str,
    ) -> Result<Vec<JobInfo>> {
        #[derive(Deserialize)]
        struct GlJob {
            id: u64,
            name: String,
            status: String,
            started_at: Option<DateTime<Utc>>,
            finished_at: Option<DateTime<Utc>>,
        }
        self.wait_rate_limit().await;
        let project = urlencoding_lite(repo_full_name);
        let url = format!(
            "https://gitlab.com/api/v4/projects/{project}/pipelines/{provider_build_id}/jobs"
        );
        let response = self.get(&url).await?;
        let jobs: Vec<GlJob> = response
            .json()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;
        Ok(jobs
            .into_iter()
            .map(|j| JobInfo {
                job_id: j.id.to_string(),
                job_name: j.name,
                status: normalize_status(&j.status, STATUS_VOCAB),
                started_at: j.started_at,
                finished_at: j.finished_at,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn fetch_build_logs(
        &self,
        repo_full_name: &str,
        _provider_build_id: &str,
        job_id: Option<&str>,
    ) -> Result<Vec<LogObject>> {
        self.wait_rate_limit().await;
        let Some(job_id) = job_id else {
            return Ok(Vec::new());
        };
        let project = urlencoding_lite(repo_full_name);
        let url = format!("https://gitlab.com/api/v4/projects/{project}/jobs/{job_id}/trace");
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
                    path: format!("{job_id}/trace.log"),
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

fn urlencoding_lite(repo_full_name: &str) -> String {
    repo_full_name.replace('/', "%2F")
}
