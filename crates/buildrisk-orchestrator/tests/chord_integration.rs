//! End-to-end exercise of the chord fan-out/fan-in pipeline: import a repo,
//! let `dispatch_ingestion`'s chord run over every fetched build, then let
//! `dispatch_processing`'s chord run the feature DAG over every ingested
//! build. No real git subprocess or HTTP call is made — a fake adapter and a
//! fake git backend stand in, exercising the same concurrency primitives a
//! production run would use.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};

use buildrisk_domain::{CiProvider, CiStatus, ImportConstraints, RepoConfigStatus};
use buildrisk_features::{FeatureDagRuntime, RepoSnapshotFeaturesNode};
use buildrisk_orchestrator::{ExportFormat, ExportJobRequest, ImportRepositoryRequest, Orchestrator, OrchestratorConfig};
use buildrisk_providers::adapter::CiProviderAdapter;
use buildrisk_providers::error::Result as ProviderResult;
use buildrisk_providers::models::{BuildsPage, FetchBuildsParams, JobInfo, LogObject, NormalizedBuild};
use buildrisk_providers::registry::ProviderRegistry;
use buildrisk_resources::git::{CommitInfo, GitBackend, NumstatEntry};
use buildrisk_resources::{InMemoryLockStore, ResourceAcquirer};
use buildrisk_resources::error::Result as ResourceResult;
use buildrisk_state::MemoryStateStore;
use buildrisk_tokenpool::TokenPool;

/// Returns two builds on page 1, nothing after — enough to drive the chord
/// over more than one item without an unbounded page walk.
struct FakeCiAdapter {
    fetch_calls: AtomicU32,
}

#[async_trait]
impl CiProviderAdapter for FakeCiAdapter {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn fetch_builds(&self, _repo_full_name: &str, params: FetchBuildsParams) -> ProviderResult<BuildsPage> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        if params.page > 1 {
            return Ok(BuildsPage {
                builds: vec![],
                aborted_on_log_unavailability: false,
            });
        }
        let builds = (0..2)
            .map(|i| NormalizedBuild {
                provider_build_id: format!("run-{i}"),
                build_number: i as u64 + 1,
                commit_sha: format!("{:040x}", i + 1),
                branch: "main".to_string(),
                status: CiStatus::Completed,
                conclusion: Some(buildrisk_domain::CiConclusion::Success),
                started_at: Some(Utc::now()),
                finished_at: Some(Utc::now()),
                author: "octocat".to_string(),
                is_bot_commit: false,
                raw_payload: serde_json::json!({}),
            })
            .collect();
        Ok(BuildsPage {
            builds,
            aborted_on_log_unavailability: false,
        })
    }

    async fn fetch_build_details(&self, _repo_full_name: &str, _provider_build_id: &str) -> ProviderResult<Option<NormalizedBuild>> {
        Ok(None)
    }

    async fn fetch_build_jobs(&self, _repo_full_name: &str, _provider_build_id: &str) -> ProviderResult<Vec<JobInfo>> {
        Ok(vec![JobInfo {
            job_id: "job-1".to_string(),
            job_name: "build".to_string(),
            status: CiStatus::Completed,
            started_at: Some(Utc::now()),
            finished_at: Some(Utc::now()),
        }])
    }

    async fn fetch_build_logs(
        &self,
        _repo_full_name: &str,
        _provider_build_id: &str,
        _job_id: Option<&str>,
    ) -> ProviderResult<Vec<LogObject>> {
        Ok(vec![LogObject {
            job_id: "job-1".to_string(),
            job_name: "build".to_string(),
            path: "build.log".to_string(),
            text: "all green".to_string(),
            size_bytes: 9,
        }])
    }
}

/// Creates the directories the real subprocess backend would, so the
/// feature DAG's worktree-reading nodes see a path that actually exists.
struct FakeGitBackend;

#[async_trait]
impl GitBackend for FakeGitBackend {
    async fn clone_bare(&self, _remote_url: &str, dest: &Path, _auth_header: Option<&str>) -> ResourceResult<()> {
        tokio::fs::create_dir_all(dest).await.map_err(|e| {
            buildrisk_resources::error::ResourceError::Git(format!("mkdir failed: {e}"))
        })?;
        Ok(())
    }

    async fn commit_exists(&self, _repo_dir: &Path, _sha: &str) -> ResourceResult<bool> {
        Ok(false)
    }

    async fn worktree_add(&self, _bare_repo: &Path, worktree_path: &Path, _sha: &str) -> ResourceResult<()> {
        tokio::fs::create_dir_all(worktree_path).await.map_err(|e| {
            buildrisk_resources::error::ResourceError::Git(format!("mkdir failed: {e}"))
        })?;
        Ok(())
    }

    async fn worktree_remove(&self, _bare_repo: &Path, _worktree_path: &Path) -> ResourceResult<()> {
        Ok(())
    }

    async fn rev_list(&self, _repo_dir: &Path, sha: &str, _limit: usize) -> ResourceResult<Vec<String>> {
        Ok(vec![sha.to_string(), "0".repeat(40)])
    }

    async fn log(&self, _repo_dir: &Path, sha: &str) -> ResourceResult<CommitInfo> {
        let authored_at = if sha == "0".repeat(40) {
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        } else {
            Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
        };
        Ok(CommitInfo {
            sha: sha.to_string(),
            parents: vec![],
            author: "octocat".to_string(),
            message: "fake commit".to_string(),
            authored_at,
        })
    }

    async fn numstat(&self, _repo_dir: &Path, _from_sha: &str, _to_sha: &str) -> ResourceResult<Vec<NumstatEntry>> {
        Ok(vec![])
    }
}

fn test_orchestrator(base_dir: &Path) -> Orchestrator {
    let state: Arc<dyn buildrisk_state::StateStore> = Arc::new(MemoryStateStore::new());
    let git: Arc<dyn GitBackend> = Arc::new(FakeGitBackend);
    let locks = Arc::new(InMemoryLockStore::new());
    let acquirer = Arc::new(ResourceAcquirer::new(git.clone(), locks, base_dir));

    let mut providers = ProviderRegistry::new();
    providers.register(
        CiProvider::GitHub,
        Arc::new(FakeCiAdapter {
            fetch_calls: AtomicU32::new(0),
        }),
    );

    let dag = Arc::new(FeatureDagRuntime::new(vec![Arc::new(RepoSnapshotFeaturesNode)]));

    let config = OrchestratorConfig {
        repos_dir: base_dir.to_path_buf(),
        worktrees_dir: base_dir.to_path_buf(),
        ..OrchestratorConfig::default()
    };

    Orchestrator::new(
        state,
        Arc::new(providers),
        acquirer,
        git,
        dag,
        Arc::new(TokenPool::new()),
        config,
    )
}

#[tokio::test]
async fn import_runs_ingestion_and_processing_chords_to_completion() {
    let tmp = tempfile::tempdir().unwrap();
    let orchestrator = test_orchestrator(tmp.path());

    let config = orchestrator
        .import_repository(ImportRepositoryRequest {
            full_name: "acme/widgets".to_string(),
            provider_repo_id: "123".to_string(),
            provider: CiProvider::GitHub,
            default_branch: "main".to_string(),
            constraints: ImportConstraints::default(),
            requested_features: vec!["gh_num_commits".to_string(), "gh_sloc".to_string()],
        })
        .await
        .unwrap();

    assert_eq!(config.status, RepoConfigStatus::IngestionComplete);

    let progress = orchestrator.get_import_progress(&config.id).await.unwrap();
    assert_eq!(progress.ingestion_builds_ingested, 2);
    assert_eq!(progress.ingestion_builds_failed, 0);
    assert_eq!(progress.ingestion_builds_missing_resource, 0);

    let final_status = orchestrator.dispatch_processing(&config.id).await.unwrap();
    assert_eq!(final_status, RepoConfigStatus::Processed);

    let progress = orchestrator.get_import_progress(&config.id).await.unwrap();
    assert_eq!(progress.training_builds_completed, 2);
    assert_eq!(progress.training_builds_failed, 0);

    let mut csv_out = Vec::new();
    orchestrator
        .run_export_job(
            ExportJobRequest {
                repo_config_ids: vec![config.id.clone()],
                features: vec!["gh_num_commits".to_string(), "gh_sloc".to_string()],
                format: ExportFormat::Csv,
                include_partial: false,
            },
            &mut csv_out,
        )
        .await
        .unwrap();
    let csv = String::from_utf8(csv_out).unwrap();
    assert_eq!(csv.lines().count(), 3); // header + 2 rows
    assert!(csv.lines().next().unwrap().contains("gh_num_commits"));
}

#[tokio::test]
async fn retry_failed_ingestion_resets_only_retryable_builds() {
    let tmp = tempfile::tempdir().unwrap();
    let orchestrator = test_orchestrator(tmp.path());

    let config = orchestrator
        .import_repository(ImportRepositoryRequest {
            full_name: "acme/widgets".to_string(),
            provider_repo_id: "123".to_string(),
            provider: CiProvider::GitHub,
            default_branch: "main".to_string(),
            constraints: ImportConstraints::default(),
            requested_features: vec!["gh_num_commits".to_string()],
        })
        .await
        .unwrap();

    // Already `Ingested`: retry is a no-op chord over zero pending builds,
    // and the config settles back to `IngestionComplete`.
    let retried = orchestrator.retry_failed_ingestion(&config.id).await.unwrap();
    assert_eq!(retried.status, RepoConfigStatus::IngestionComplete);
}
