//! GitHub Actions adapter. Rate limiting goes through the shared
//! `buildrisk-tokenpool::TokenPool` rather than a per-adapter sleep (§4.1).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, instrument, warn};

use buildrisk_domain::{CiConclusion, CiStatus};
use buildrisk_tokenpool::TokenPool;

use crate::adapter::CiProviderAdapter;
use crate::error::{ProviderError, Result};
use crate::models::{BuildsPage, FetchBuildsParams, JobInfo, LogObject, NormalizedBuild};
use crate::normalize::{normalize_conclusion, normalize_status};

const STATUS_VOCAB: &[(&str, CiStatus)] = &[
    ("queued", CiStatus::Queued),
    ("in_progress", CiStatus::Running),
    ("completed", CiStatus::Completed),
    ("waiting", CiStatus::Pending),
    ("pending", CiStatus::Pending),
];

const CONCLUSION_VOCAB: &[(&str, CiConclusion)] = &[
    ("success", CiConclusion::Success),
    ("failure", CiConclusion::Failure),
    ("cancelled", CiConclusion::Cancelled),
    ("skipped", CiConclusion::Skipped),
    ("timed_out", CiConclusion::TimedOut),
    ("action_required", CiConclusion::ActionRequired),
    ("neutral", CiConclusion::Neutral),
];

pub struct GitHubAdapter {
    client: Client,
    pool: Arc<TokenPool>,
    bot_substrings: Vec<String>,
    log_unavailable_threshold: u32,
}

impl GitHubAdapter {
    pub fn new(pool: Arc<TokenPool>) -> Self {
        let client = Client::builder()
            .user_agent("buildrisk-providers/0.1")
            .build()
            .expect("failed to build reqwest client");
        Self {
            client,
            pool,
            bot_substrings: buildrisk_domain::build::DEFAULT_BOT_SUBSTRINGS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            log_unavailable_threshold: 5,
        }
    }

    pub fn with_log_unavailable_threshold(mut self, threshold: u32) -> Self {
        self.log_unavailable_threshold = threshold;
        self
    }

    #[instrument(skip(self))]
    async fn authorized_get(&self, url: &str) -> Result<reqwest::Response> {
        let token = self
            .pool
            .acquire()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&token.secret)
            .send()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;

        if let (Some(remaining), Some(limit), Some(reset)) = (
            header_i64(&response, "x-ratelimit-remaining"),
            header_i64(&response, "x-ratelimit-limit"),
            header_i64(&response, "x-ratelimit-reset"),
        ) {
            let reset_at = Utc
                .timestamp_opt(reset, 0)
                .single()
                .unwrap_or_else(Utc::now);
            let _ = self
                .pool
                .record_response(&token.hash, remaining, limit, reset_at)
                .await;
        }

        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound),
            StatusCode::UNAUTHORIZED => {
                let _ = self.pool.mark_invalid(&token.hash).await;
                Err(ProviderError::Permanent("invalid GitHub token".into()))
            }
            StatusCode::FORBIDDEN => {
                let body = response.text().await.unwrap_or_default();
                if body.to_lowercase().contains("secondary rate limit") {
                    let _ = self
                        .pool
                        .record_secondary_rate_limit(&token.hash, None)
                        .await;
                    Err(ProviderError::RateLimitedSecondary {
                        retry_after_secs: 60,
                    })
                } else {
                    Err(ProviderError::Permanent(format!(
                        "403 from GitHub: {body}"
                    )))
                }
            }
            status if status.is_server_error() => {
                Err(ProviderError::Retryable(format!("5xx from GitHub: {status}")))
            }
            status => Err(ProviderError::Permanent(format!(
                "unexpected GitHub status: {status}"
            ))),
        }
    }
}

fn header_i64(response: &reqwest::Response, name: &str) -> Option<i64> {
    response
        .headers()
        .get(name)?
        .to_str()
        .ok()?
        .parse::<i64>()
        .ok()
}

#[derive(Debug, Deserialize)]
struct WorkflowRunsResponse {
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize, Clone)]
struct WorkflowRun {
    id: u64,
    run_number: u64,
    head_sha: String,
    head_branch: Option<String>,
    status: Option<String>,
    conclusion: Option<String>,
    run_started_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    actor: Option<Actor>,
}

#[derive(Debug, Deserialize, Clone)]
struct Actor {
    login: String,
}

impl WorkflowRun {
    fn into_normalized(self, bot_substrings: &[String]) -> NormalizedBuild {
        let status = self
            .status
            .as_deref()
            .map(|s| normalize_status(s, STATUS_VOCAB))
            .unwrap_or(CiStatus::Unknown);
        let conclusion = self
            .conclusion
            .as_deref()
            .and_then(|c| normalize_conclusion(c, CONCLUSION_VOCAB));
        let author = self.actor.map(|a| a.login).unwrap_or_default();
        let needles: Vec<&str> = bot_substrings.iter().map(|s| s.as_str()).collect();
        let is_bot_commit = buildrisk_domain::build::is_bot_commit(&author, &needles);

        NormalizedBuild {
            provider_build_id: self.id.to_string(),
            build_number: self.run_number,
            commit_sha: self.head_sha,
            branch: self.head_branch.unwrap_or_default(),
            status,
            conclusion,
            started_at: self.run_started_at,
            finished_at: self.updated_at,
            author,
            is_bot_commit,
            raw_payload: serde_json::Value::Null,
        }
    }
}

#[async_trait]
impl CiProviderAdapter for GitHubAdapter {
    fn name(&self) -> &'static str {
        "github"
    }

    #[instrument(skip(self))]
    async fn fetch_builds(
        &self,
        repo_full_name: &str,
        params: FetchBuildsParams,
    ) -> Result<BuildsPage> {
        let url = format!(
            "https://api.github.com/repos/{repo_full_name}/actions/runs?per_page={}&page={}",
            params.limit.max(1),
            params.page.max(1)
        );
        let response = self.authorized_get(&url).await?;
        let parsed: WorkflowRunsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;

        let mut builds = Vec::new();
        let mut consecutive_unavailable = 0u32;
        let mut aborted = false;

        for run in parsed.workflow_runs {
            if params.only_completed && run.status.as_deref() != Some("completed") {
                continue;
            }
            let normalized = run.into_normalized(&self.bot_substrings);
            if params.exclude_bots && normalized.is_bot_commit {
                continue;
            }

            if params.only_with_logs {
                match self
                    .fetch_build_logs(repo_full_name, &normalized.provider_build_id, None)
                    .await
                {
                    Ok(logs) if !logs.is_empty() => {
                        consecutive_unavailable = 0;
                    }
                    _ => {
                        consecutive_unavailable += 1;
                        if consecutive_unavailable >= self.log_unavailable_threshold {
                            warn!(
                                repo = repo_full_name,
                                "aborting page: log-unavailable threshold reached"
                            );
                            aborted = true;
                            break;
                        }
                        continue;
                    }
                }
            }

            builds.push(normalized);
            if builds.len() as u32 >= params.limit {
                break;
            }
        }

        Ok(BuildsPage {
            builds,
            aborted_on_log_unavailability: aborted,
        })
    }

    #[instrument(skip(self))]
    async fn fetch_build_details(
        &self,
        repo_full_name: &str,
        provider_build_id: &str,
    ) -> Result<Option<NormalizedBuild>> {
        let url = format!(
            "https://api.github.com/repos/{repo_full_name}/actions/runs/{provider_build_id}"
        );
        match self.authorized_get(&url).await {
            Ok(response) => {
                let run: WorkflowRun = response
                    .json()
                    .await
                    .map_err(|e| ProviderError::Retryable(e.to_string()))?;
                Ok(Some(run.into_normalized(&self.bot_substrings)))
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
        struct JobsResponse {
            jobs: Vec<Job>,
        }
        #[derive(Deserialize)]
        struct Job {
            id: u64,
            name: String,
            status: Option<String>,
            started_at: Option<DateTime<Utc>>,
            completed_at: Option<DateTime<Utc>>,
        }

        let url = format!(
            "https://api.github.com/repos/{repo_full_name}/actions/runs/{provider_build_id}/jobs"
        );
        let response = self.authorized_get(&url).await?;
        let parsed: JobsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;

        Ok(parsed
            .jobs
            .into_iter()
            .map(|j| JobInfo {
                job_id: j.id.to_string(),
                job_name: j.name,
                status: j
                    .status
                    .as_deref()
                    .map(|s| normalize_status(s, STATUS_VOCAB))
                    .unwrap_or(CiStatus::Unknown),
                started_at: j.started_at,
                finished_at: j.completed_at,
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn fetch_build_logs(
        &self,
        repo_full_name: &str,
        provider_build_id: &str,
        job_id: Option<&str>,
    ) -> Result<Vec<LogObject>> {
        let jobs = if let Some(job_id) = job_id {
            vec![JobInfo {
                job_id: job_id.to_string(),
                job_name: String::new(),
                status: CiStatus::Completed,
                started_at: None,
                finished_at: None,
            }]
        } else {
            self.fetch_build_jobs(repo_full_name, provider_build_id)
                .await?
        };

        let mut logs = Vec::new();
        for job in jobs {
            let url = format!(
                "https://api.github.com/repos/{repo_full_name}/actions/jobs/{}/logs",
                job.job_id
            );
            match self.authorized_get(&url).await {
                Ok(response) => {
                    let text = response
                        .text()
                        .await
                        .map_err(|e| ProviderError::Retryable(e.to_string()))?;
                    logs.push(LogObject {
                        job_id: job.job_id.clone(),
                        job_name: job.job_name.clone(),
                        size_bytes: text.len() as u64,
                        path: format!("{provider_build_id}/{}.log", job.job_id),
                        text,
                    });
                }
                // Expired/unavailable logs surface as not-found; the resource
                // acquirer, not this adapter, decides Failed vs MissingResource.
                Err(ProviderError::NotFound) => {
                    debug!(job_id = job.job_id, "logs unavailable for job");
                }
                Err(other) => return Err(other),
            }
        }
        Ok(logs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_run_maps_bot_actor_correctly() {
        let run = WorkflowRun {
            id: 1,
            run_number: 42,
            head_sha: "deadbeef".into(),
            head_branch: Some("main".into()),
            status: Some("completed".into()),
            conclusion: Some("success".into()),
            run_started_at: None,
            updated_at: None,
            actor: Some(Actor {
                login: "dependabot[bot]".into(),
            }),
        };
        let normalized = run.into_normalized(
            &buildrisk_domain::build::DEFAULT_BOT_SUBSTRINGS
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>(),
        );
        assert!(normalized.is_bot_commit);
        assert_eq!(normalized.status, CiStatus::Completed);
        assert_eq!(normalized.conclusion, Some(CiConclusion::Success));
    }
}
