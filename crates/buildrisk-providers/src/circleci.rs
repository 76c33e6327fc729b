//! CircleCI adapter. Paces itself with a fixed per-request sleep (§4.1).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::instrument;

use buildrisk_domain::{CiConclusion, CiStatus};

use crate::adapter::CiProviderAdapter;
use crate::error::{ProviderError, Result};
use crate::models::{BuildsPage, FetchBuildsParams, JobInfo, LogObject, NormalizedBuild};
use crate::normalize::{normalize_conclusion, normalize_status};

const STATUS_VOCAB: &[(&str, CiStatus)] = &[
    ("created", CiStatus::Pending),
    ("queued", CiStatus::Queued),
    ("running", CiStatus::Running),
    ("success", CiStatus::Completed),
    ("failed", CiStatus::Completed),
    ("canceled", CiStatus::Completed),
];

const CONCLUSION_VOCAB: &[(&str, CiConclusion)] = &[
    ("success", CiConclusion::Success),
    ("failed", CiConclusion::Failure),
    ("canceled", CiConclusion::Cancelled),
];

pub struct CircleCiAdapter {
    client: Client,
    api_token: String,
    request_delay: std::time::Duration,
}

impl CircleCiAdapter {
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
            .header("Circle-Token", &self.api_token)
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
                Err(ProviderError::Retryable(format!("5xx from CircleCI: {status}")))
            }
            status => Err(ProviderError::Permanent(format!(
                "unexpected CircleCI status: {status}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PipelineWorkflowsResponse {
    items: Vec<CircleWorkflow>,
}

#[derive(Debug, Deserialize)]
struct CircleWorkflow {
    id: String,
    pipeline_number: u64,
    status: String,
    created_at: Option<DateTime<Utc>>,
    stopped_at: Option<DateTime<Utc>>,
}

impl CircleWorkflow {
    fn into_normalized(self, commit_sha: String, branch: String) -> NormalizedBuild {
        NormalizedBuild {
            provider_build_id: self.id,
            build_number: self.pipeline_number,
            commit_sha,
            branch,
            status: normalize_status(&self.status, STATUS_VOCAB),
            conclusion: normalize_conclusion(&self.status, CONCLUSION_VOCAB),
            started_at: self.created_at,
            finished_at: self.stopped_at,
            author: String::new(),
            is_bot_commit: false,
            raw_payload: serde_json::Value::Null,
        }
    }
}

#[async_trait]
impl CiProviderAdapter for CircleCiAdapter {
    fn name(&self) -> &'static str {
        "circleci"
    }

    #[instrument(skip(self))]
    async fn fetch_builds(
        &self,
        repo_full_name: &str,
        params: FetchBuildsParams,
    ) -> Result<BuildsPage> {
        self.wait_rate_limit().await;
        let url = format!(
            "https://circleci.com/api/v2/insights/gh/{repo_full_name}/workflows?branch={}",
            params.branch.as_deref().unwrap_or("main")
        );
        let response = self.get(&url).await?;
        let parsed: PipelineWorkflowsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;

        let builds: Vec<NormalizedBuild> = parsed
            .items
            .into_iter()
            .take(params.limit.max(1) as usize)
            .map(|w| w.into_normalized(String::new(), params.branch.clone().unwrap_or_default()))
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
        let url = format!("https://circleci.com/api/v2/workflow/{provider_build_id}");
        match self.get(&url).await {
            Ok(response) => {
                let workflow: CircleWorkflow = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::Retryable(e.to_string()))?;
                Ok(Some(workflow.into_normalized(String::new(), String::new())))
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
            items: Vec<CircleJob>,
        }
        #[derive(Deserialize)]
        struct CircleJob {
            id: String,
            name: String,
            status: String,
            started_at: Option<DateTime<Utc>>,
            stopped_at: Option<DateTime<Utc>>,
        }

        self.wait_rate_limit().await;
        let url = format!("https://circleci.com/api/v2/workflow/{provider_build_id}/job");
        let response = self.get(&url).await?;
        let parsed: JobsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;
        Ok(parsed
            .items
            .into_iter()
            .map(|j| JobInfo {
                job_id: j.id,
                job_name: j.name,
                status: normalize_status(&j.status, STATUS_VOCAB),
                started_at: j.started_at,
                finished_at: j.stopped_at,
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
        let url = format!("https://circleci.com/api/v2/job/{job_id}");
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
                    path: format!("{job_id}.log"),
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
