//! Backend-agnostic persistence traits over the §3 entities.
//!
//! Narrow traits per entity family, combined into one `StateStore` marker
//! trait so the orchestrator can depend on `Arc<dyn StateStore>` without
//! caring whether the backend is SurrealDB or an in-memory fake.

use async_trait::async_trait;
use std::collections::HashSet;

use buildrisk_domain::ids::{
    IngestionBuildId, RawBuildRunId, RawRepositoryId, RepoConfigId, TrainingBuildId,
};
use buildrisk_domain::{FeatureAuditLog, IngestionBuild, RawBuildRun, RawRepository, RepoConfig, TrainingBuild};

use crate::error::Result;

#[async_trait]
pub trait RepositoryCatalog: Send + Sync {
    async fn upsert_repository(&self, repo: RawRepository) -> Result<RawRepository>;
    async fn get_repository(&self, id: &RawRepositoryId) -> Result<RawRepository>;
    async fn get_repository_by_full_name(&self, full_name: &str) -> Result<Option<RawRepository>>;
}

#[async_trait]
pub trait BuildRunCatalog: Send + Sync {
    /// Idempotent on `(repo_id, provider_build_id)`: a second call with the
    /// same key updates in place rather than creating a duplicate (§8
    /// property 3 applies to `IngestionBuild`, but `RawBuildRun` upserts
    /// share the same idempotency contract since fetch pages may overlap).
    async fn upsert_build_run(&self, build_run: RawBuildRun) -> Result<RawBuildRun>;
    async fn get_build_run(&self, id: &RawBuildRunId) -> Result<RawBuildRun>;

    /// Which of the given commit SHAs already have a stored `RawBuildRun`
    /// for this repo — used by sync-until-existing mode (§4.3) to detect the
    /// page where every build is already known.
    async fn shas_already_stored(
        &self,
        repo_id: &RawRepositoryId,
        shas: &[String],
    ) -> Result<HashSet<String>>;

    /// Every stored build run for a repo, oldest insertion first — used by
    /// `git_commit_info` to resolve a build's previously-built ancestor.
    async fn list_build_runs_for_repo(&self, repo_id: &RawRepositoryId) -> Result<Vec<RawBuildRun>>;
}

#[async_trait]
pub trait RepoConfigStore: Send + Sync {
    async fn create_repo_config(&self, config: RepoConfig) -> Result<RepoConfig>;
    async fn get_repo_config(&self, id: &RepoConfigId) -> Result<RepoConfig>;
    async fn save_repo_config(&self, config: RepoConfig) -> Result<RepoConfig>;

    /// Atomic increments on the three monotonic counters (§5's "Shared
    /// resources" requirement — these must never be read-modify-write at
    /// the caller).
    async fn increment_counters(
        &self,
        id: &RepoConfigId,
        fetched: u64,
        completed: u64,
        failed: u64,
    ) -> Result<()>;

    /// Cascades to `IngestionBuild`s, `TrainingBuild`s, and
    /// `FeatureAuditLog`s for this config, atomically (§3 ownership rule).
    /// `RawRepository`/`RawBuildRun` rows are never touched.
    async fn delete_repo_config_cascade(&self, id: &RepoConfigId) -> Result<()>;

    /// Every `RepoConfig` importing this repository — used by the GitHub
    /// webhook handler to find which configs a `workflow_run` event applies
    /// to, since one `RawRepository` may be imported by more than one
    /// `RepoConfig`.
    async fn list_repo_configs_for_repository(
        &self,
        repo_id: &RawRepositoryId,
    ) -> Result<Vec<RepoConfig>>;

    /// Every `RepoConfig` on file — the daemon's background tick walks this
    /// to find configs with pending ingestion/processing work.
    async fn list_all_repo_configs(&self) -> Result<Vec<RepoConfig>>;
}

#[async_trait]
pub trait IngestionLedger: Send + Sync {
    /// Upsert keyed by the business key `(repo_config_id, raw_build_run_id)`.
    /// A second upsert with the same key returns the existing record
    /// unchanged in identity (same `id`), only refreshing mutable fields.
    async fn upsert_ingestion_build(&self, build: IngestionBuild) -> Result<IngestionBuild>;
    async fn get_ingestion_build(&self, id: &IngestionBuildId) -> Result<IngestionBuild>;
    async fn save_ingestion_build(&self, build: IngestionBuild) -> Result<IngestionBuild>;
    async fn list_ingestion_builds_for_config(
        &self,
        config_id: &RepoConfigId,
    ) -> Result<Vec<IngestionBuild>>;
}

#[async_trait]
pub trait TrainingStore: Send + Sync {
    async fn upsert_training_build(&self, build: TrainingBuild) -> Result<TrainingBuild>;
    async fn get_training_build(&self, id: &TrainingBuildId) -> Result<TrainingBuild>;
    async fn list_training_builds_for_config(
        &self,
        config_id: &RepoConfigId,
    ) -> Result<Vec<TrainingBuild>>;
}

#[async_trait]
pub trait AuditLogStore: Send + Sync {
    async fn append_audit_log(&self, log: FeatureAuditLog) -> Result<FeatureAuditLog>;
    async fn get_audit_log_for_build(
        &self,
        raw_build_run_id: &RawBuildRunId,
    ) -> Result<Option<FeatureAuditLog>>;
}

/// Marker trait combining every storage capability the orchestrator needs.
/// Implemented by `SurrealStateStore` (production) and `MemoryStateStore`
/// (tests).
pub trait StateStore:
    RepositoryCatalog + BuildRunCatalog + RepoConfigStore + IngestionLedger + TrainingStore + AuditLogStore
{
}

impl<T> StateStore for T where
    T: RepositoryCatalog
        + BuildRunCatalog
        + RepoConfigStore
        + IngestionLedger
        + TrainingStore
        + AuditLogStore
{
}
