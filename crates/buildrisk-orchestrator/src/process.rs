//! `dispatch_processing`: the third stage of §4.3's pipeline. Consumes
//! `Ingested` `IngestionBuild`s past the repo's checkpoint, runs the feature
//! DAG over each, and records `TrainingBuild`/`FeatureAuditLog` rows.

use std::collections::HashSet;
use std::sync::Arc;

use buildrisk_domain::ids::{IngestionBuildId, RepoConfigId};
use buildrisk_domain::{
    ExtractionStatus, IngestionBuild, IngestionStatus, RawRepository, RepoConfigStatus, ResourceKind,
    TrainingBuild,
};
use buildrisk_features::{FeatureDagRuntime, NodeContext};
use buildrisk_providers::ProviderRegistry;
use buildrisk_resources::GitBackend;
use tracing::{instrument, warn};

use crate::chord::{chord, ChordConfig};
use crate::error::{OrchestratorError, Result};
use crate::orchestrator::Orchestrator;

impl Orchestrator {
    /// Runs every build in `builds` through the feature DAG via a single
    /// chord and returns the per-build outcome in the same order. Shared by
    /// `dispatch_processing`'s batches and `retry_failed_processing`, which
    /// reprocesses a specific set of builds without touching the checkpoint.
    pub(crate) async fn run_processing_chord(
        &self,
        repo: Arc<RawRepository>,
        requested_features: Vec<String>,
        previous_build_run_ids: Vec<(String, u64)>,
        builds: Vec<IngestionBuild>,
    ) -> Vec<std::result::Result<(), String>> {
        let state = Arc::clone(&self.state);
        let dag = Arc::clone(&self.dag);
        let git = Arc::clone(&self.git);
        let providers = Arc::clone(&self.providers);
        let base_dir = self.config.repos_dir.clone();
        let scan_eligible = Arc::new(scan_eligible_builds(
            &builds,
            self.config.scan_builds_per_query,
            self.config.scan_commits_per_batch,
        ));

        chord(
            builds,
            ChordConfig {
                max_concurrent: self.config.max_concurrent_processing,
                fail_fast: false,
            },
            move |build| {
                let repo = Arc::clone(&repo);
                let state = Arc::clone(&state);
                let dag = Arc::clone(&dag);
                let git = Arc::clone(&git);
                let providers = Arc::clone(&providers);
                let requested_features = requested_features.clone();
                let previous_build_run_ids = previous_build_run_ids.clone();
                let base_dir = base_dir.clone();
                let scan_eligible = scan_eligible.contains(&build.id);
                async move {
                    run_processing_workflow(
                        repo,
                        state,
                        dag,
                        git,
                        providers,
                        requested_features,
                        previous_build_run_ids,
                        base_dir,
                        build,
                        scan_eligible,
                    )
                    .await
                }
            },
            |results| results,
        )
        .await
    }

    /// `StartProcessing`'s core: `IngestionComplete`/`IngestionPartial` ->
    /// `Processing` -> `Processed`/`Failed`. Only builds with `sequence` past
    /// `last_processed_sequence` are considered, batched in groups of
    /// `processing_builds_per_batch` and run through the feature DAG via a
    /// chord, honoring the soft/hard processing deadlines (§5).
    #[instrument(skip(self))]
    pub async fn dispatch_processing(&self, config_id: &RepoConfigId) -> Result<RepoConfigStatus> {
        let mut config = self.state.get_repo_config(config_id).await?;
        let repo = Arc::new(self.state.get_repository(&config.repo_id).await?);

        config
            .transition(RepoConfigStatus::Processing)
            .map_err(OrchestratorError::IllegalTransition)?;
        config = self.state.save_repo_config(config).await?;

        let requested_features = if config.requested_features.is_empty() {
            buildrisk_features::FEATURE_REGISTRY
                .keys()
                .map(|k| k.to_string())
                .collect::<Vec<_>>()
        } else {
            config.requested_features.clone()
        };

        let all_builds = self
            .state
            .list_ingestion_builds_for_config(config_id)
            .await?;
        let checkpoint = config.last_processed_sequence;
        let mut pending: Vec<IngestionBuild> = all_builds
            .into_iter()
            .filter(|b| b.status == IngestionStatus::Ingested)
            .filter(|b| checkpoint.map_or(true, |cp| b.sequence > cp))
            .collect();
        pending.sort_by_key(|b| b.sequence);

        let previous_build_run_ids: Vec<(String, u64)> = self
            .state
            .list_build_runs_for_repo(&repo.id)
            .await?
            .into_iter()
            .map(|r| (r.commit_sha, r.build_number))
            .collect();

        let deadline = tokio::time::Instant::now() + self.config.processing_soft_deadline;
        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut last_checkpoint = config.last_processed_sequence;
        let mut processed_count = 0usize;

        for batch in pending.chunks(self.config.processing_builds_per_batch) {
            if tokio::time::Instant::now() >= deadline {
                warn!(config_id = %config_id, remaining = pending.len() - processed_count, "processing soft deadline reached, marking remaining builds as timed out");
                for timed_out in &pending[processed_count..] {
                    let mut timed_out_build = TrainingBuild::new(
                        timed_out.raw_build_run_id.clone(),
                        timed_out.repo_config_id.clone(),
                    );
                    timed_out_build.extraction_status = ExtractionStatus::Failed;
                    timed_out_build.extraction_error = Some("timeout".to_string());
                    self.state.upsert_training_build(timed_out_build).await?;
                    failed += 1;
                }
                break;
            }

            let batch_vec = batch.to_vec();
            let last_in_batch = batch_vec.last().map(|b| b.sequence);

            let results = self
                .run_processing_chord(
                    Arc::clone(&repo),
                    requested_features.clone(),
                    previous_build_run_ids.clone(),
                    batch_vec,
                )
                .await;

            for result in &results {
                match result {
                    Ok(()) => completed += 1,
                    Err(e) => {
                        warn!(error = %e, "processing workflow failed for a build");
                        failed += 1;
                    }
                }
            }
            if last_in_batch.is_some() {
                last_checkpoint = last_in_batch;
            }
            processed_count += batch.len();
        }

        if let Some(checkpoint) = last_checkpoint {
            config = self.state.get_repo_config(config_id).await?;
            config.last_processed_sequence = Some(checkpoint);
            config = self.state.save_repo_config(config).await?;
        }

        // §4.3's table has no dedicated "partially processed" status; a mixed
        // batch still reaches Processed as long as something completed, and
        // failures remain retryable via RetryFailedProcessing (recorded as an
        // open-question resolution in DESIGN.md).
        let next_status = if failed == 0 || completed > 0 {
            RepoConfigStatus::Processed
        } else {
            RepoConfigStatus::Failed
        };

        config = self.state.get_repo_config(config_id).await?;
        if let Err(e) = config.transition(next_status) {
            warn!(error = %e, "processing chord callback: illegal transition, leaving status as-is");
        } else {
            self.state.save_repo_config(config).await?;
        }

        Ok(next_status)
    }
}

/// Throttles how many builds per batch query an external scan tool (§6's
/// `SCAN_BUILDS_PER_QUERY`/`SCAN_COMMITS_PER_BATCH`): at most
/// `scan_builds_per_query` builds are marked eligible, drawn from at most
/// `scan_commits_per_batch` distinct commits (several builds commonly share
/// a commit, e.g. matrix CI configs, and only need one scan between them).
/// Builds outside the throttle simply see `ScanReport` absent and the scan
/// nodes skip them like any other missing resource.
fn scan_eligible_builds(
    builds: &[IngestionBuild],
    scan_builds_per_query: u32,
    scan_commits_per_batch: u32,
) -> HashSet<IngestionBuildId> {
    let mut eligible = HashSet::new();
    let mut seen_commits: HashSet<&str> = HashSet::new();

    for build in builds {
        if eligible.len() as u32 >= scan_builds_per_query {
            break;
        }
        if !seen_commits.contains(build.commit_sha.as_str()) {
            if seen_commits.len() as u32 >= scan_commits_per_batch {
                continue;
            }
            seen_commits.insert(&build.commit_sha);
        }
        eligible.insert(build.id.clone());
    }

    eligible
}

async fn run_processing_workflow(
    repo: Arc<RawRepository>,
    state: Arc<dyn buildrisk_state::StateStore>,
    dag: Arc<FeatureDagRuntime>,
    git: Arc<dyn GitBackend>,
    providers: Arc<ProviderRegistry>,
    requested_features: Vec<String>,
    previous_build_run_ids: Vec<(String, u64)>,
    base_dir: std::path::PathBuf,
    build: IngestionBuild,
    scan_eligible: bool,
) -> std::result::Result<(), String> {
    let raw_build_run = state
        .get_build_run(&build.raw_build_run_id)
        .await
        .map_err(|e| e.to_string())?;

    let mut available_resources: HashSet<ResourceKind> = HashSet::new();
    available_resources.insert(ResourceKind::BuildRun);
    available_resources.insert(ResourceKind::RawBuildRuns);
    for (kind, outcome) in &build.resource_status {
        if outcome.state == buildrisk_domain::ResourceState::Completed {
            available_resources.insert(*kind);
        }
    }
    if scan_eligible {
        available_resources.insert(ResourceKind::ScanReport);
    }

    let repo_id = repo.id.to_string();
    let bare_repo_path = build
        .resource_status
        .get(&ResourceKind::BareRepo)
        .filter(|o| o.state == buildrisk_domain::ResourceState::Completed)
        .map(|_| buildrisk_resources::git::bare_repo_path(&base_dir, &repo_id));
    let worktree_path = build
        .resource_status
        .get(&ResourceKind::Worktree)
        .filter(|o| o.state == buildrisk_domain::ResourceState::Completed)
        .map(|_| {
            let sha = build.effective_sha.as_deref().unwrap_or(&build.commit_sha);
            let short_sha = &sha[..sha.len().min(12)];
            buildrisk_resources::git::worktree_path(&base_dir, &repo_id, short_sha)
        });

    let mut log_texts = Vec::new();
    if available_resources.contains(&ResourceKind::BuildLogs) {
        if let Some(adapter) = providers.get(repo.provider) {
            if let Ok(jobs) = adapter.fetch_build_jobs(&repo.full_name, &build.ci_run_id).await {
                for job in jobs {
                    if let Ok(objects) = adapter
                        .fetch_build_logs(&repo.full_name, &build.ci_run_id, Some(&job.job_id))
                        .await
                    {
                        for obj in objects {
                            log_texts.push((obj.job_name, obj.text));
                        }
                    }
                }
            }
        }
    }

    let provider_adapter = providers.get(repo.provider);
    if provider_adapter.is_some() && repo.provider == buildrisk_domain::CiProvider::GitHub {
        available_resources.insert(ResourceKind::GithubApiClient);
    }

    let ctx = NodeContext {
        build: raw_build_run,
        repo_full_name: repo.full_name.clone(),
        bare_repo_path,
        worktree_path,
        effective_sha: build.effective_sha.clone(),
        log_texts,
        available_resources,
        produced_features: buildrisk_domain::FeatureMap::new(),
        git,
        provider: provider_adapter,
        previous_build_run_ids,
    };

    let correlation_id = build.id.to_string();
    let outcome = dag
        .run(&requested_features, &correlation_id, build.raw_build_run_id.clone(), ctx)
        .await
        .map_err(|e| e.to_string())?;

    let mut training_build = TrainingBuild::new(build.raw_build_run_id.clone(), build.repo_config_id.clone());
    training_build.extraction_status = outcome.extraction_status;
    training_build.features = outcome.features;
    training_build.missing_resources = outcome
        .audit_log
        .node_results
        .iter()
        .flat_map(|n| n.resources_missing.clone())
        .collect();
    training_build.skipped_features = outcome
        .audit_log
        .node_results
        .iter()
        .filter(|n| n.status == buildrisk_domain::NodeStatus::Skipped)
        .map(|n| n.name.clone())
        .collect();
    if outcome.extraction_status == ExtractionStatus::Failed {
        training_build.extraction_error = outcome
            .audit_log
            .node_results
            .iter()
            .find_map(|n| n.error.clone());
    }

    state
        .upsert_training_build(training_build)
        .await
        .map_err(|e| e.to_string())?;
    state
        .append_audit_log(outcome.audit_log)
        .await
        .map_err(|e| e.to_string())?;

    if outcome.extraction_status == ExtractionStatus::Failed {
        Err("feature extraction failed".to_string())
    } else {
        Ok(())
    }
}
