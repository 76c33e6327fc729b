//! Provider-agnostic wire shapes (§4.1). Each adapter maps its native
//! payload into these before anything crosses into `buildrisk-domain`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use buildrisk_domain::{CiConclusion, CiStatus};

#[derive(Debug, Clone, Default)]
pub struct FetchBuildsParams {
    pub since: Option<DateTime<Utc>>,
    pub limit: u32,
    pub page: u32,
    pub branch: Option<String>,
    pub only_with_logs: bool,
    pub exclude_bots: bool,
    pub only_completed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedBuild {
    pub provider_build_id: String,
    pub build_number: u64,
    pub commit_sha: String,
    pub branch: String,
    pub status: CiStatus,
    pub conclusion: Option<CiConclusion>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub author: String,
    pub is_bot_commit: bool,
    pub raw_payload: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInfo {
    pub job_id: String,
    pub job_name: String,
    pub status: CiStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogObject {
    pub job_id: String,
    pub job_name: String,
    pub path: String,
    pub text: String,
    pub size_bytes: u64,
}

#[derive(Debug, Clone)]
pub struct BuildsPage {
    pub builds: Vec<NormalizedBuild>,
    /// True when the page was aborted early because `only_with_logs` hit
    /// `LOG_UNAVAILABLE_THRESHOLD` consecutive unavailable responses (§4.1).
    pub aborted_on_log_unavailability: bool,
}
