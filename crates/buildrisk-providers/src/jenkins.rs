//! Jenkins adapter. Paces itself with a fixed per-request sleep (§4.1).

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::instrument;

use buildrisk_domain::CiStatus;

use crate::adapter::CiProviderAdapter;
use crate::error::{ProviderError, Result};
use crate::models::{BuildsPage, FetchBuildsParams, JobInfo, LogObject, NormalizedBuild};
use crate::normalize::normalize_status;

const STATUS_VOCAB: &[(&str, CiStatus)] = &[
    ("NOT_BUILT", CiStatus::Pending),
    ("IN_PROGRESS", CiStatus::Running),
    ("SUCCESS", CiStatus::Completed),
    ("FAILURE", CiStatus::Completed),
    ("ABORTED", CiStatus::Completed),
    ("UNSTABLE", CiStatus::Completed),
];

pub struct JenkinsAdapter {
    client: Client,
    base_url: String,
    user: String,
    api_token: String,
    request_delay: std::time::Duration,
}

impl JenkinsAdapter {
    pub fn new(base_url: impl Into<String>, user: impl Into<String>, api_token: impl Into<String>) -> Self {
        Self {
            client: Client::builder()
                .user_agent("buildrisk-providers/0.1")
                .build()
                .expect("failed to build reqwest client"),
            base_url: base_url.into(),
            user: user.into(),
            api_token: api_token.into(),
            request_delay: std::time::Duration::from_millis(300),
        }
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.user, Some(&self.api_token))
            .send()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;
        match response.status() {
            StatusCode::OK => Ok(response),
            StatusCode::NOT_FOUND => Err(ProviderError::NotFound),
            status if status.is_server_error() => {
                Err(ProviderError::Retryable(format!("5xx from Jenkins: {status}")))
            }
            status => Err(ProviderError::Permanent(format!(
                "unexpected Jenkins status: {status}"
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JenkinsBuildsResponse {
    builds: Vec<JenkinsBuild>,
}

#[derive(Debug, Deserialize)]
struct JenkinsBuild {
    number: u64,
    result: Option<String>,
    timestamp: i64,
    duration: i64,
    #[serde(rename = "actions", default)]
    actions: Vec<serde_json::Value>,
}

impl JenkinsBuild {
    fn commit_sha(&self) -> String {
        self.actions
            .iter()
            .find_map(|a| a.get("lastBuiltRevision")?.get("SHA1")?.as_str())
            .unwrap_or_default()
            .to_string()
    }

    fn into_normalized(self) -> NormalizedBuild {
        let started_at = Utc.timestamp_millis_opt(self.timestamp).single();
        let finished_at = started_at.map(|s| s + chrono::Duration::milliseconds(self.duration));
        let status = self
            .result
            .as_deref()
            .map(|r| normalize_status(r, STATUS_VOCAB))
            .unwrap_or(CiStatus::Running);
        NormalizedBuild {
            provider_build_id: self.number.to_string(),
            build_number: self.number,
            commit_sha: self.commit_sha(),
            branch: String::new(),
            status,
            conclusion: None,
            started_at,
            finished_at,
            author: String::new(),
            is_bot_commit: false,
            raw_payload: serde_json::Value::Null,
        }
    }
}

fn job_path(repo_full_name: &str) -> String {
    repo_full_name
        .split('/')
        .map(|segment| format!("job/{segment}"))
        .collect::<Vec<_>>()
        .join("/")
}

#[async_trait]
impl CiProviderAdapter for JenkinsAdapter {
    fn name(&self) -> &'static str {
        "jenkins"
    }

    #[instrument(skip(self))]
    async fn fetch_builds(
        &self,
        repo_full_name: &str,
        params: FetchBuildsParams,
    ) -> Result<BuildsPage> {
        self.wait_rate_limit().await;
        let path = format!(
            "/{}/api/json?tree=builds[number,result,timestamp,duration,actions[lastBuiltRevision[SHA1]]]",
            job_path(repo_full_name)
        );
        let response = self.get(&path).await?;
        let parsed: JenkinsBuildsResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Retryable(e.to_string()))?;

        let builds: Vec<NormalizedBuild> = parsed
            .builds
            .into_iter()
            .filter(|b| !params.only_completed || b.result.is_some())
            .take(params.limit.max(1) as usize)
            .map(JenkinsBuild::into_normalized)
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
        let path = format!(
            "/{}/{provider_build_id}/api/json?tree=number,result,timestamp,duration,actions[lastBuiltRevision[SHA1]]",
            job_path(repo_full_name)
        );
        match self.get(&path).await {
            Ok(response) => {
                let build: JenkinsBuild = response
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
        // Jenkins freestyle/pipeline jobs have one implicit "job" per build.
        Ok(vec![JobInfo {
            job_id: provider_build_id.to_string(),
            job_name: "build".to_string(),
            status: CiStatus::Unknown,
            started_at: None,
            finished_at: None,
        }])
    }

    #[instrument(skip(self))]
    async fn fetch_build_logs(
        &self,
        repo_full_name: &str,
        provider_build_id: &str,
        _job_id: Option<&str>,
    ) -> Result<Vec<LogObject>> {
        self.wait_rate_limit().await;
        let path = format!("/{}/{provider_build_id}/consoleText", job_path(repo_full_name));
        match self.get(&path).await {
            Ok(response) => {
                let text = response
                    .text()
                    .await
                    .map_err(|e| ProviderError::Retryable(e.to_string()))?;
                Ok(vec![LogObject {
                    job_id: provider_build_id.to_string(),
                    job_name: "build".to_string(),
                    size_bytes: text.len() as u64,
                    path: format!("{provider_build_id}/consoleText.log"),
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_path_nests_multi_segment_repo_names() {
        assert_eq!(job_path("org/team/app"), "job/org/job/team/job/app");
    }
}
