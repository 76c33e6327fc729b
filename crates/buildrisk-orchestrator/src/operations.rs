//! The §6/§10.4 operator surface: `ImportRepository`, `RetryFailedIngestion`,
//! `RetryFailedProcessing`, `DeleteRepository`, `GetImportProgress`.
//! `SyncRepository`/`StartProcessing` are thin public re-exports of
//! `sync_repository`/`dispatch_processing` already defined in `ingest.rs`/
//! `process.rs`; this module covers everything else that surface names.

use std::sync::Arc;

use buildrisk_domain::ids::RepoConfigId;
use buildrisk_domain::{
    CiProvider, ExtractionStatus, ImportConstraints, IngestionStatus, RawRepository, RepoConfig,
};
use tracing::instrument;

use crate::error::{OrchestratorError, Result};
use crate::orchestrator::Orchestrator;

pub struct ImportRepositoryRequest {
    pub full_name: String,
    pub provider_repo_id: String,
    pub provider: CiProvider,
    pub default_branch: String,
    pub constraints: ImportConstraints,
    pub requested_features: Vec<String>,
}

/// `GetImportProgress`'s read-model: a point-in-time summary, never itself
/// persisted.
#[derive(Debug, Clone)]
pub struct ImportProgress {
    pub status: buildrisk_domain::RepoConfigStatus,
    pub builds_fetched: u64,
    pub builds_completed: u64,
    pub builds_failed: u64,
    pub ingestion_builds_pending: u64,
    pub ingestion_builds_ingested: u64,
    pub ingestion_builds_missing_resource: u64,
    pub ingestion_builds_failed: u64,
    pub training_builds_completed: u64,
    pub training_builds_partial: u64,
    pub training_builds_failed: u64,
}

impl Orchestrator {
    /// `ImportRepository`: registers the `RawRepository` (reusing an
    /// existing one for this `full_name` if present, since that identity is
    /// shared across every `RepoConfig` that imports it), creates a fresh
    /// `RepoConfig`, and kicks off the first ingestion run.
    #[instrument(skip(self))]
    pub async fn import_repository(&self, req: ImportRepositoryRequest) -> Result<RepoConfig> {
        let repo = match self.state.get_repository_by_full_name(&req.full_name).await? {
            Some(existing) => existing,
            None => {
                self.state
                    .upsert_repository(RawRepository::new(
                        req.full_name,
                        req.provider_repo_id,
                        req.provider,
                        req.default_branch,
                    ))
                    .await?
            }
        };

        let mut config = RepoConfig::new(repo.id.clone(), req.provider);
        config.constraints = req.constraints;
        config.requested_features = req.requested_features;
        config = self.state.create_repo_config(config).await?;

        self.ingest_builds(&config.id).await
    }

    /// Resets every `Failed` (not `MissingResource`) `IngestionBuild` for
    /// this config back to `Pending` and re-runs `dispatch_ingestion` (§7:
    /// "Retry failed ingestion resets Failed ... builds to Pending").
    #[instrument(skip(self))]
    pub async fn retry_failed_ingestion(&self, config_id: &RepoConfigId) -> Result<RepoConfig> {
        let builds = self.state.list_ingestion_builds_for_config(config_id).await?;
        for mut build in builds.into_iter().filter(|b| b.is_retryable()) {
            build
                .transition(IngestionStatus::Pending)
                .map_err(OrchestratorError::IllegalTransition)?;
            self.state.save_ingestion_build(build).await?;
        }
        self.dispatch_ingestion(config_id).await
    }

    /// Resets every `Failed`-extraction `TrainingBuild` for this config back
    /// to `Pending` and reprocesses just those builds, without advancing
    /// `last_processed_sequence` (§7: "reprocess failed resets TrainingBuilds
    /// with Failed extraction back to Pending and redispatches").
    #[instrument(skip(self))]
    pub async fn retry_failed_processing(&self, config_id: &RepoConfigId) -> Result<RepoConfig> {
        let config = self.state.get_repo_config(config_id).await?;
        let repo = Arc::new(self.state.get_repository(&config.repo_id).await?);

        let failed_training_builds: Vec<_> = self
            .state
            .list_training_builds_for_config(config_id)
            .await?
            .into_iter()
            .filter(|b| b.extraction_status == ExtractionStatus::Failed)
            .collect();

        let failed_run_ids: std::collections::HashSet<_> = failed_training_builds
            .iter()
            .map(|b| b.raw_build_run_id.clone())
            .collect();

        for mut build in failed_training_builds {
            build.extraction_status = ExtractionStatus::Pending;
            build.extraction_error = None;
            self.state.upsert_training_build(build).await?;
        }

        let to_reprocess: Vec<_> = self
            .state
            .list_ingestion_builds_for_config(config_id)
            .await?
            .into_iter()
            .filter(|b| b.status == IngestionStatus::Ingested && failed_run_ids.contains(&b.raw_build_run_id))
            .collect();

        let requested_features = if config.requested_features.is_empty() {
            buildrisk_features::FEATURE_REGISTRY
                .keys()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
        } else {
            config.requested_features.clone()
        };
        let previous_build_run_ids: Vec<(String, u64)> = self
            .state
            .list_build_runs_for_repo(&repo.id)
            .await?
            .into_iter()
            .map(|r| (r.commit_sha, r.build_number))
            .collect();

        self.run_processing_chord(repo, requested_features, previous_build_run_ids, to_reprocess)
            .await;

        Ok(self.state.get_repo_config(config_id).await?)
    }

    /// `DeleteRepository`: cascades to `IngestionBuild`s, `TrainingBuild`s,
    /// and `FeatureAuditLog`s for this config; the shared `RawRepository`/
    /// `RawBuildRun` rows are untouched (§3's ownership rule).
    #[instrument(skip(self))]
    pub async fn delete_repository(&self, config_id: &RepoConfigId) -> Result<()> {
        self.state.delete_repo_config_cascade(config_id).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_import_progress(&self, config_id: &RepoConfigId) -> Result<ImportProgress> {
        let config = self.state.get_repo_config(config_id).await?;
        let ingestion_builds = self.state.list_ingestion_builds_for_config(config_id).await?;
        let training_builds = self.state.list_training_builds_for_config(config_id).await?;

        let count = |pred: &dyn Fn(&buildrisk_domain::IngestionBuild) -> bool| {
            ingestion_builds.iter().filter(|b| pred(b)).count() as u64
        };

        Ok(ImportProgress {
            status: config.status,
            builds_fetched: config.builds_fetched,
            builds_completed: config.builds_completed,
            builds_failed: config.builds_failed,
            ingestion_builds_pending: count(&|b| b.status == IngestionStatus::Pending),
            ingestion_builds_ingested: count(&|b| b.status == IngestionStatus::Ingested),
            ingestion_builds_missing_resource: count(&|b| b.status == IngestionStatus::MissingResource),
            ingestion_builds_failed: count(&|b| b.status == IngestionStatus::Failed),
            training_builds_completed: training_builds
                .iter()
                .filter(|b| b.extraction_status == ExtractionStatus::Completed)
                .count() as u64,
            training_builds_partial: training_builds
                .iter()
                .filter(|b| b.extraction_status == ExtractionStatus::Partial)
                .count() as u64,
            training_builds_failed: training_builds
                .iter()
                .filter(|b| b.extraction_status == ExtractionStatus::Failed)
                .count() as u64,
        })
    }
}
