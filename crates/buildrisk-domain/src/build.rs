//! A single observed CI run, normalized across providers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{RawBuildRunId, RawRepositoryId};
use crate::repo::CiProvider;

/// Normalized status, kept distinct from `IngestionStatus`/`ExtractionStatus`
/// per the open-question resolution recorded in DESIGN.md.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Unknown,
}

/// Outcome of a completed run. Only meaningful when `status = Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CiConclusion {
    Success,
    Failure,
    Cancelled,
    Skipped,
    TimedOut,
    ActionRequired,
    Neutral,
}

/// Default substrings that flag an author/committer as a bot, per §4.1's
/// `is_bot_commit` normalization rule. Configurable at the adapter layer;
/// this is the fallback used when no override list is supplied.
pub const DEFAULT_BOT_SUBSTRINGS: &[&str] =
    &["[bot]", "dependabot", "renovate", "github-actions"];

pub fn is_bot_commit(author: &str, bot_substrings: &[&str]) -> bool {
    let lower = author.to_lowercase();
    bot_substrings
        .iter()
        .any(|needle| lower.contains(&needle.to_lowercase()))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawBuildRun {
    pub id: RawBuildRunId,
    pub repo_id: RawRepositoryId,
    pub provider: CiProvider,
    /// Unique within the repo, as assigned by the provider.
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
    /// Raw provider payload, retained for audit/debugging, never parsed again
    /// once normalized fields above are populated.
    pub raw_payload: serde_json::Value,
}

impl RawBuildRun {
    /// Once a run reaches `Completed`, fields must no longer be mutated;
    /// callers should construct a new record instead of patching this one.
    pub fn is_immutable(&self) -> bool {
        self.status == CiStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bot_detection_is_case_insensitive_substring_match() {
        assert!(is_bot_commit(
            "Dependabot[bot]",
            DEFAULT_BOT_SUBSTRINGS
        ));
        assert!(is_bot_commit("renovate-bot", DEFAULT_BOT_SUBSTRINGS));
        assert!(!is_bot_commit("jane-doe", DEFAULT_BOT_SUBSTRINGS));
    }
}
