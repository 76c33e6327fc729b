//! Per-repo configuration and per-build ingestion tracking (§3, §4.3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::{IngestionBuildId, RawBuildRunId, RawRepositoryId, RepoConfigId};
use crate::repo::CiProvider;

/// `RepoConfig.status` lifecycle from §4.3's status-transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoConfigStatus {
    Queued,
    Ingesting,
    IngestionComplete,
    IngestionPartial,
    Processing,
    Processed,
    Failed,
}

impl RepoConfigStatus {
    /// Whether `next` is a legal transition from `self`, per §4.3's table
    /// plus the explicit "Sync requested" edge back to Queued from Processed.
    pub fn can_transition_to(self, next: RepoConfigStatus) -> bool {
        use RepoConfigStatus::*;
        matches!(
            (self, next),
            (Queued, Ingesting)
                | (Ingesting, IngestionComplete)
                | (Ingesting, IngestionPartial)
                | (Ingesting, Failed)
                | (IngestionComplete, Processing)
                | (IngestionPartial, Processing)
                | (Processing, Processed)
                | (Processing, Failed)
                | (Processed, Queued)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConstraints {
    pub max_builds: Option<u64>,
    pub since_days: Option<u32>,
    pub only_with_logs: bool,
    pub exclude_bots: bool,
    pub only_completed: bool,
}

impl Default for ImportConstraints {
    fn default() -> Self {
        Self {
            max_builds: None,
            since_days: None,
            only_with_logs: false,
            exclude_bots: true,
            only_completed: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub id: RepoConfigId,
    pub repo_id: RawRepositoryId,
    pub provider: CiProvider,
    pub constraints: ImportConstraints,
    /// Feature names the operator requested; advisory only — the
    /// registry-derived schedule always wins per DESIGN.md's resolution.
    pub requested_features: Vec<String>,
    pub status: RepoConfigStatus,
    pub builds_fetched: u64,
    pub builds_completed: u64,
    pub builds_failed: u64,
    /// Monotonic checkpoint: only `IngestionBuild`s with a larger `sequence`
    /// than this are considered by the next processing run.
    pub last_processed_sequence: Option<i64>,
    pub last_sync_error: Option<String>,
}

impl RepoConfig {
    pub fn new(repo_id: RawRepositoryId, provider: CiProvider) -> Self {
        Self {
            id: RepoConfigId::new(),
            repo_id,
            provider,
            constraints: ImportConstraints::default(),
            requested_features: Vec::new(),
            status: RepoConfigStatus::Queued,
            builds_fetched: 0,
            builds_completed: 0,
            builds_failed: 0,
            last_processed_sequence: None,
            last_sync_error: None,
        }
    }

    /// Validates and applies a status transition; returns an error message
    /// (not a panic) when the transition violates §4.3's DAG, so callers at
    /// the orchestrator layer can surface it as a domain error.
    pub fn transition(&mut self, next: RepoConfigStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "illegal RepoConfig transition {:?} -> {:?}",
                self.status, next
            ));
        }
        self.status = next;
        Ok(())
    }
}

/// One of the four concrete resources a feature extractor may depend on,
/// plus the two synthetic "already in the database" resources used by
/// nodes that only need prior build records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    BareRepo,
    Worktree,
    BuildLogs,
    GithubApiClient,
    BuildRun,
    RawBuildRuns,
    /// Supplemental resource added in SPEC_FULL.md §11: a security/quality
    /// scan report keyed by commit, produced by the SonarQube/Trivy
    /// integrations rather than the core acquirer.
    ScanReport,
}

/// Per-resource lifecycle for one `IngestionBuild`. `Failed` is retryable
/// ("Failed = actual error"); `MissingResource` callers instead record this
/// at the `IngestionBuild` level — see `IngestionStatus::MissingResource`
/// and the per-resource `ResourceOutcome` below, which is the finer-grained
/// twin used inside `resource_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
    /// Confirmed and permanently unavailable (expired logs, unreachable
    /// commit) — distinct from `Failed`, which implies retrying might help.
    MissingResource,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub state: ResourceState,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ResourceOutcome {
    pub fn pending() -> Self {
        Self {
            state: ResourceState::Pending,
            error: None,
            started_at: None,
            completed_at: None,
        }
    }
}

/// `IngestionBuild.status` per §3/§4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Pending,
    Fetched,
    Ingesting,
    Ingested,
    MissingResource,
    Failed,
}

impl IngestionStatus {
    pub fn can_transition_to(self, next: IngestionStatus) -> bool {
        use IngestionStatus::*;
        matches!(
            (self, next),
            (Pending, Fetched)
                | (Fetched, Ingesting)
                | (Ingesting, Ingested)
                | (Ingesting, MissingResource)
                | (Ingesting, Failed)
                // explicit reset-to-Pending is always legal from a terminal state
                | (MissingResource, Pending)
                | (Failed, Pending)
        )
    }
}

/// Orchestration tracking record per `(RepoConfig, RawBuildRun)` pair.
/// Business key is `(repo_config_id, raw_build_run_id)`; upserts on that key
/// are idempotent (§8 property 3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionBuild {
    pub id: IngestionBuildId,
    /// Insertion order assigned by the state store on first upsert; 0 until
    /// then. Checkpointing sorts and filters on this, never on `created_at`
    /// or the (unordered, random) `id`.
    pub sequence: i64,
    pub repo_config_id: RepoConfigId,
    pub raw_build_run_id: RawBuildRunId,
    pub ci_run_id: String,
    pub commit_sha: String,
    /// The sha actually checked out, if fork-commit replay changed it
    /// (§4.4, §8 scenario 5).
    pub effective_sha: Option<String>,
    pub status: IngestionStatus,
    pub required_resources: Vec<ResourceKind>,
    pub resource_status: HashMap<ResourceKind, ResourceOutcome>,
    pub ingestion_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestionBuild {
    pub fn new(
        repo_config_id: RepoConfigId,
        raw_build_run_id: RawBuildRunId,
        ci_run_id: impl Into<String>,
        commit_sha: impl Into<String>,
        required_resources: Vec<ResourceKind>,
    ) -> Self {
        let now = Utc::now();
        let resource_status = required_resources
            .iter()
            .map(|r| (*r, ResourceOutcome::pending()))
            .collect();
        Self {
            id: IngestionBuildId::new(),
            sequence: 0,
            repo_config_id,
            raw_build_run_id,
            ci_run_id: ci_run_id.into(),
            commit_sha: commit_sha.into(),
            effective_sha: None,
            status: IngestionStatus::Pending,
            required_resources,
            resource_status,
            ingestion_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn transition(&mut self, next: IngestionStatus) -> Result<(), String> {
        if !self.status.can_transition_to(next) {
            return Err(format!(
                "illegal IngestionBuild transition {:?} -> {:?}",
                self.status, next
            ));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Whether this build can be retried via "RetryFailedIngestion". Only
    /// `Failed` is retryable; `MissingResource` is expected-and-permanent.
    pub fn is_retryable(&self) -> bool {
        self.status == IngestionStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> IngestionBuild {
        IngestionBuild::new(
            RepoConfigId::new(),
            RawBuildRunId::new(),
            "run-1",
            "deadbeef",
            vec![ResourceKind::BareRepo, ResourceKind::BuildLogs],
        )
    }

    #[test]
    fn status_monotonicity_rejects_illegal_jump() {
        let mut build = sample();
        assert!(build.transition(IngestionStatus::Ingesting).is_err());
        assert!(build.transition(IngestionStatus::Fetched).is_ok());
        assert!(build.transition(IngestionStatus::Ingesting).is_ok());
        assert!(build.transition(IngestionStatus::Ingested).is_ok());
    }

    #[test]
    fn missing_resource_is_not_retryable_but_failed_is() {
        let mut build = sample();
        build.transition(IngestionStatus::Fetched).unwrap();
        build.transition(IngestionStatus::Ingesting).unwrap();
        build.transition(IngestionStatus::MissingResource).unwrap();
        assert!(!build.is_retryable());

        let mut build2 = sample();
        build2.transition(IngestionStatus::Fetched).unwrap();
        build2.transition(IngestionStatus::Ingesting).unwrap();
        build2.transition(IngestionStatus::Failed).unwrap();
        assert!(build2.is_retryable());
        assert!(build2.transition(IngestionStatus::Pending).is_ok());
    }

    #[test]
    fn repo_config_status_follows_strict_dag() {
        let mut cfg = RepoConfig::new(RawRepositoryId::new(), CiProvider::GitHub);
        assert!(cfg.transition(RepoConfigStatus::Processing).is_err());
        cfg.transition(RepoConfigStatus::Ingesting).unwrap();
        cfg.transition(RepoConfigStatus::IngestionPartial).unwrap();
        cfg.transition(RepoConfigStatus::Processing).unwrap();
        cfg.transition(RepoConfigStatus::Processed).unwrap();
        cfg.transition(RepoConfigStatus::Queued).unwrap();
    }
}
