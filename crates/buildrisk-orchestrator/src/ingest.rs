//! `ingest_builds` / `dispatch_ingestion`: the first two stages of §4.3's
//! pipeline. Fetches CI build pages, records `RawBuildRun`/`IngestionBuild`
//! rows, then prepares the on-disk resources each ingestion build needs.

use std::sync::Arc;

use buildrisk_domain::ids::{RawBuildRunId, RepoConfigId};
use buildrisk_domain::{
    IngestionBuild, IngestionStatus, RawBuildRun, RawRepository, RepoConfig, RepoConfigStatus, ResourceKind,
    ResourceOutcome, ResourceState,
};
use buildrisk_providers::{CiProviderAdapter, FetchBuildsParams, ProviderError};
use buildrisk_resources::{CloneAuth, ResourceAcquirer};
use chrono::Utc;
use tracing::{info, instrument, warn};

use crate::chord::{chord, ChordConfig};
use crate::error::{OrchestratorError, Result};
use crate::orchestrator::{clone_url, Orchestrator};

/// Safety cap on how many unbounded pages a fresh import will walk when the
/// operator didn't set `max_builds` (§4.3's sync-until-existing mode has its
/// own stopping rule; this guards the *unbounded* fresh-import path only).
const MAX_UNBOUNDED_PAGES: u32 = 200;

impl Orchestrator {
    /// `ImportRepository`'s core: fetch build pages, then hand off to
    /// ingestion. `Queued -> Ingesting` at the start; the final status is set
    /// by `dispatch_ingestion`'s chord callback.
    #[instrument(skip(self))]
    pub async fn ingest_builds(&self, config_id: &RepoConfigId) -> Result<RepoConfig> {
        let mut config = self.state.get_repo_config(config_id).await?;
        let repo = self.state.get_repository(&config.repo_id).await?;

        config
            .transition(RepoConfigStatus::Ingesting)
            .map_err(OrchestratorError::IllegalTransition)?;
        config = self.state.save_repo_config(config).await?;

        let fetched = self.fetch_pages(&config, &repo, false).await?;
        self.state
            .increment_counters(config_id, fetched as u64, 0, 0)
            .await?;

        self.dispatch_ingestion(config_id).await
    }

    /// `SyncRepository`'s core: `Processed -> Queued -> Ingesting`, sequential
    /// paging that stops at the first page where every build is already
    /// stored (§4.3's sync-until-existing mode).
    #[instrument(skip(self))]
    pub async fn sync_repository(&self, config_id: &RepoConfigId) -> Result<RepoConfig> {
        let mut config = self.state.get_repo_config(config_id).await?;
        let repo = self.state.get_repository(&config.repo_id).await?;

        config
            .transition(RepoConfigStatus::Queued)
            .map_err(OrchestratorError::IllegalTransition)?;
        config
            .transition(RepoConfigStatus::Ingesting)
            .map_err(OrchestratorError::IllegalTransition)?;
        config = self.state.save_repo_config(config).await?;

        let fetched = self.fetch_pages(&config, &repo, true).await?;
        self.state
            .increment_counters(config_id, fetched as u64, 0, 0)
            .await?;

        self.dispatch_ingestion(config_id).await
    }

    /// Returns the number of newly-created `IngestionBuild` rows.
    async fn fetch_pages(&self, config: &RepoConfig, repo: &RawRepository, sync_until_existing: bool) -> Result<u32> {
        let adapter = self
            .providers
            .get(config.provider)
            .ok_or(OrchestratorError::UnregisteredProvider(config.provider))?;

        let page_count = if sync_until_existing {
            None
        } else {
            config
                .constraints
                .max_builds
                .map(|max| (max as u32).div_ceil(self.config.ingestion_builds_per_page.max(1)))
        };

        let mut total_created = 0u32;

        match page_count {
            Some(n) if n > 0 => {
                // Known page count: fan out via a chord (§4.3's
                // `group(fetch_page[1..N])`).
                let pages: Vec<u32> = (1..=n).collect();
                let repo_full_name = repo.full_name.clone();
                let params_template = params_from_constraints(config);
                let adapter = Arc::clone(&adapter);
                let page_results = chord(
                    pages,
                    ChordConfig {
                        max_concurrent: 4,
                        fail_fast: false,
                    },
                    move |page| {
                        let adapter = Arc::clone(&adapter);
                        let repo_full_name = repo_full_name.clone();
                        let mut params = params_template.clone();
                        params.page = page;
                        async move { fetch_page_with_retry(adapter, &repo_full_name, params).await }
                    },
                    |results| results,
                )
                .await;

                for result in page_results {
                    match result {
                        Ok(builds) => total_created += self.record_builds(config, repo, builds).await?,
                        Err(e) => warn!(error = %e, "fetch page failed after retries, chord still aggregates"),
                    }
                }
            }
            _ => {
                // Unbounded: sequential paging, stopping early either on an
                // empty page or (sync mode) a page that is entirely already
                // stored.
                let mut page = 1u32;
                loop {
                    let mut params = params_from_constraints(config);
                    params.page = page;
                    let builds = match fetch_page_with_retry(Arc::clone(&adapter), &repo.full_name, params).await {
                        Ok(page) => page.builds,
                        Err(e) => {
                            warn!(error = %e, page, "fetch page failed after retries");
                            break;
                        }
                    };

                    if builds.is_empty() {
                        break;
                    }

                    if sync_until_existing {
                        let shas: Vec<String> = builds.iter().map(|b| b.commit_sha.clone()).collect();
                        let already = self.state.shas_already_stored(&repo.id, &shas).await?;
                        if shas.iter().all(|s| already.contains(s)) {
                            info!(page, "sync-until-existing: page fully known, stopping");
                            break;
                        }
                    }

                    total_created += self
                        .record_builds(
                            config,
                            repo,
                            buildrisk_providers::BuildsPage {
                                builds,
                                aborted_on_log_unavailability: false,
                            },
                        )
                        .await?;

                    page += 1;
                    if page > MAX_UNBOUNDED_PAGES {
                        warn!("hit unbounded page safety cap, stopping");
                        break;
                    }
                }
            }
        }

        Ok(total_created)
    }

    async fn record_builds(
        &self,
        config: &RepoConfig,
        repo: &RawRepository,
        page: buildrisk_providers::BuildsPage,
    ) -> Result<u32> {
        let mut created = 0u32;
        for normalized in page.builds {
            let build_run = RawBuildRun {
                id: RawBuildRunId::new(),
                repo_id: repo.id.clone(),
                provider: repo.provider,
                provider_build_id: normalized.provider_build_id,
                build_number: normalized.build_number,
                commit_sha: normalized.commit_sha,
                branch: normalized.branch,
                status: normalized.status,
                conclusion: normalized.conclusion,
                started_at: normalized.started_at,
                finished_at: normalized.finished_at,
                author: normalized.author,
                is_bot_commit: normalized.is_bot_commit,
                raw_payload: normalized.raw_payload,
            };
            let stored = self.state.upsert_build_run(build_run).await?;

            // Idempotent per §8 property 3: upserting keyed on
            // (repo_config_id, raw_build_run_id) never doubles the record
            // when the same fetch page runs twice.
            let ingestion = IngestionBuild::new(
                config.id.clone(),
                stored.id.clone(),
                stored.provider_build_id.clone(),
                stored.commit_sha.clone(),
                vec![ResourceKind::BareRepo, ResourceKind::Worktree, ResourceKind::BuildLogs],
            );
            let attempted_id = ingestion.id.clone();
            let stored_ingestion = self.state.upsert_ingestion_build(ingestion).await?;
            if stored_ingestion.id == attempted_id {
                created += 1;
            }
        }
        Ok(created)
    }

    /// `dispatch_ingestion`: runs the ingestion chord over every `Pending`
    /// `IngestionBuild` for this config, then aggregates the overall status
    /// (§4.3's strict status table).
    #[instrument(skip(self))]
    pub async fn dispatch_ingestion(&self, config_id: &RepoConfigId) -> Result<RepoConfig> {
        let config = self.state.get_repo_config(config_id).await?;
        let repo = Arc::new(self.state.get_repository(&config.repo_id).await?);

        let pending: Vec<IngestionBuild> = self
            .state
            .list_ingestion_builds_for_config(config_id)
            .await?
            .into_iter()
            .filter(|b| matches!(b.status, IngestionStatus::Pending))
            .collect();

        let group_size = pending.len();
        let state = Arc::clone(&self.state);
        let acquirer = Arc::clone(&self.acquirer);
        let providers = Arc::clone(&self.providers);
        let log_threshold = self.config.log_unavailable_threshold;

        let results = chord(
            pending,
            ChordConfig {
                max_concurrent: self.config.max_concurrent_ingestion,
                fail_fast: false,
            },
            move |build| {
                let repo = Arc::clone(&repo);
                let state = Arc::clone(&state);
                let acquirer = Arc::clone(&acquirer);
                let providers = Arc::clone(&providers);
                async move { run_ingestion_workflow(repo, state, acquirer, providers, log_threshold, build).await }
            },
            |results| results,
        )
        .await;

        let mut completed = 0u64;
        let mut failed = 0u64;
        for result in &results {
            match result {
                Ok(()) => completed += 1,
                Err(_) => failed += 1,
            }
        }
        self.state.increment_counters(config_id, 0, completed, failed).await?;

        let mut config = self.state.get_repo_config(config_id).await?;
        let next_status = if group_size == 0 || failed == 0 {
            RepoConfigStatus::IngestionComplete
        } else if completed > 0 {
            RepoConfigStatus::IngestionPartial
        } else {
            RepoConfigStatus::Failed
        };
        if let Err(e) = config.transition(next_status) {
            warn!(error = %e, "ingestion chord callback: illegal transition, leaving status as-is");
        } else {
            config = self.state.save_repo_config(config).await?;
        }
        Ok(config)
    }
}

fn params_from_constraints(config: &RepoConfig) -> FetchBuildsParams {
    let since = config
        .constraints
        .since_days
        .map(|days| Utc::now() - chrono::Duration::days(days as i64));
    FetchBuildsParams {
        since,
        limit: 50,
        page: 1,
        branch: None,
        only_with_logs: config.constraints.only_with_logs,
        exclude_bots: config.constraints.exclude_bots,
        only_completed: config.constraints.only_completed,
    }
}

/// Fetch: up to 3 attempts with exponential backoff (§4.3's retry policy).
async fn fetch_page_with_retry(
    adapter: Arc<dyn CiProviderAdapter>,
    repo_full_name: &str,
    params: FetchBuildsParams,
) -> Result<buildrisk_providers::BuildsPage, String> {
    let mut attempt = 0u32;
    loop {
        match adapter.fetch_builds(repo_full_name, params.clone()).await {
            Ok(page) => return Ok(page),
            Err(e @ ProviderError::Permanent(_)) | Err(e @ ProviderError::NotFound) => {
                return Err(e.to_string());
            }
            Err(e) => {
                attempt += 1;
                if attempt >= 3 {
                    return Err(e.to_string());
                }
                let backoff_ms = 200u64 * 2u64.pow(attempt);
                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
            }
        }
    }
}

/// The per-build ingestion sub-task: clone, worktree, log download. Returns
/// `Err` only for an actual retryable-but-exhausted error; expected
/// unavailability (expired logs, unreachable commit) is folded into the
/// saved `IngestionBuild.resource_status` and still returns `Ok(())` since
/// §7 treats `MissingResource` as "not a task failure", only a build-level
/// outcome.
async fn run_ingestion_workflow(
    repo: Arc<RawRepository>,
    state: Arc<dyn buildrisk_state::StateStore>,
    acquirer: Arc<ResourceAcquirer>,
    providers: Arc<buildrisk_providers::ProviderRegistry>,
    log_unavailable_threshold: u32,
    mut build: IngestionBuild,
) -> Result<(), String> {
    build.transition(IngestionStatus::Fetched)?;
    build.transition(IngestionStatus::Ingesting)?;

    let repo_id = repo.id.to_string();
    let remote = clone_url(&repo);

    let bare = acquirer
        .bare_clone(&repo_id, &remote, Some(&build.commit_sha), CloneAuth::Unauthenticated)
        .await;
    build
        .resource_status
        .insert(ResourceKind::BareRepo, outcome_from_resource_result(&bare));

    if let Ok(bare_path) = &bare {
        let wt = acquirer.worktree(&repo_id, bare_path, &build.commit_sha).await;
        if let Ok((_, effective_sha)) = &wt {
            build.effective_sha = Some(effective_sha.clone());
        }
        build
            .resource_status
            .insert(ResourceKind::Worktree, outcome_from_resource_result(&wt));
    }

    let mut logs_missing_streak = 0u32;
    let mut logs_outcome = ResourceOutcome::pending();
    if let Some(adapter) = providers.get(repo.provider) {
        match adapter.fetch_build_jobs(&repo.full_name, &build.ci_run_id).await {
            Ok(jobs) => {
                let mut any_error = None;
                for job in jobs {
                    match adapter
                        .fetch_build_logs(&repo.full_name, &build.ci_run_id, Some(&job.job_id))
                        .await
                    {
                        Ok(_) => logs_missing_streak = 0,
                        Err(ProviderError::NotFound) => {
                            logs_missing_streak += 1;
                            if logs_missing_streak >= log_unavailable_threshold {
                                break;
                            }
                        }
                        Err(e) => {
                            any_error = Some(e);
                            break;
                        }
                    }
                }
                logs_outcome = match any_error {
                    Some(e) => ResourceOutcome {
                        state: ResourceState::Failed,
                        error: Some(e.to_string()),
                        started_at: Some(Utc::now()),
                        completed_at: Some(Utc::now()),
                    },
                    None if logs_missing_streak > 0 => ResourceOutcome {
                        state: ResourceState::MissingResource,
                        error: Some("logs expired".to_string()),
                        started_at: Some(Utc::now()),
                        completed_at: Some(Utc::now()),
                    },
                    None => ResourceOutcome {
                        state: ResourceState::Completed,
                        error: None,
                        started_at: Some(Utc::now()),
                        completed_at: Some(Utc::now()),
                    },
                };
            }
            Err(e) => {
                logs_outcome = ResourceOutcome {
                    state: ResourceState::Failed,
                    error: Some(e.to_string()),
                    started_at: Some(Utc::now()),
                    completed_at: Some(Utc::now()),
                };
            }
        }
    }
    build.resource_status.insert(ResourceKind::BuildLogs, logs_outcome);

    let any_failed = build
        .resource_status
        .values()
        .any(|o| o.state == ResourceState::Failed);
    let any_missing = build
        .resource_status
        .values()
        .any(|o| o.state == ResourceState::MissingResource);

    let final_status = if any_failed {
        IngestionStatus::Failed
    } else if any_missing {
        IngestionStatus::MissingResource
    } else {
        IngestionStatus::Ingested
    };
    build.ingestion_error = build
        .resource_status
        .values()
        .find_map(|o| o.error.clone());
    build.transition(final_status)?;

    state
        .save_ingestion_build(build)
        .await
        .map_err(|e| e.to_string())?;

    if any_failed {
        Err("ingestion resource acquisition failed".to_string())
    } else {
        Ok(())
    }
}

fn outcome_from_resource_result<T>(result: &std::result::Result<T, buildrisk_resources::ResourceError>) -> ResourceOutcome {
    match result {
        Ok(_) => ResourceOutcome {
            state: ResourceState::Completed,
            error: None,
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        },
        Err(buildrisk_resources::ResourceError::MissingResource(msg)) => ResourceOutcome {
            state: ResourceState::MissingResource,
            error: Some(msg.clone()),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        },
        Err(e) => ResourceOutcome {
            state: ResourceState::Failed,
            error: Some(e.to_string()),
            started_at: Some(Utc::now()),
            completed_at: Some(Utc::now()),
        },
    }
}
