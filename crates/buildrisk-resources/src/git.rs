//! Git subprocess wrapper generalized for the resource acquirer (§4.4).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::instrument;

use crate::error::{ResourceError, Result};

#[derive(Debug, Clone)]
pub struct NumstatEntry {
    pub path: String,
    pub added: Option<u64>,
    pub removed: Option<u64>,
    pub binary: bool,
}

#[derive(Debug, Clone)]
pub struct CommitInfo {
    pub sha: String,
    pub parents: Vec<String>,
    pub author: String,
    pub message: String,
    pub authored_at: chrono::DateTime<chrono::Utc>,
}

/// Everything the feature DAG's git-backed extractors need from a working
/// copy. One implementation wraps the real `git` binary; tests may swap in
/// a fake for nodes that don't need a real repository.
#[async_trait]
pub trait GitBackend: Send + Sync {
    async fn clone_bare(&self, remote_url: &str, dest: &Path, auth_header: Option<&str>) -> Result<()>;

    async fn commit_exists(&self, repo_dir: &Path, sha: &str) -> Result<bool>;

    async fn worktree_add(&self, bare_repo: &Path, worktree_path: &Path, sha: &str) -> Result<()>;

    async fn worktree_remove(&self, bare_repo: &Path, worktree_path: &Path) -> Result<()>;

    /// `rev-list` walking backward from `sha`, newest first, capped at `limit`.
    async fn rev_list(&self, repo_dir: &Path, sha: &str, limit: usize) -> Result<Vec<String>>;

    async fn log(&self, repo_dir: &Path, sha: &str) -> Result<CommitInfo>;

    /// `diff --numstat parent..sha`.
    async fn numstat(&self, repo_dir: &Path, from_sha: &str, to_sha: &str) -> Result<Vec<NumstatEntry>>;
}

pub struct SubprocessGitBackend;

impl SubprocessGitBackend {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .await
            .map_err(|e| ResourceError::Git(format!("failed to spawn git {args:?}: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ResourceError::Git(format!(
                "git {args:?} failed: {stderr}"
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for SubprocessGitBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl GitBackend for SubprocessGitBackend {
    #[instrument(skip(self, auth_header))]
    async fn clone_bare(&self, remote_url: &str, dest: &Path, auth_header: Option<&str>) -> Result<()> {
        let dest_str = dest.to_string_lossy().to_string();
        let mut args: Vec<&str> = vec!["clone", "--bare"];
        if let Some(header) = auth_header {
            args.push("-c");
            args.push(header);
        }
        args.push(remote_url);
        args.push(&dest_str);

        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        self.run(parent, &args).await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn commit_exists(&self, repo_dir: &Path, sha: &str) -> Result<bool> {
        let output = Command::new("git")
            .args(["cat-file", "-e", &format!("{sha}^{{commit}}")])
            .current_dir(repo_dir)
            .output()
            .await
            .map_err(|e| ResourceError::Git(format!("failed to spawn git cat-file: {e}")))?;
        Ok(output.status.success())
    }

    #[instrument(skip(self))]
    async fn worktree_add(&self, bare_repo: &Path, worktree_path: &Path, sha: &str) -> Result<()> {
        let path_str = worktree_path.to_string_lossy().to_string();
        self.run(bare_repo, &["worktree", "add", "--detach", &path_str, sha])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn worktree_remove(&self, bare_repo: &Path, worktree_path: &Path) -> Result<()> {
        let path_str = worktree_path.to_string_lossy().to_string();
        self.run(bare_repo, &["worktree", "remove", "--force", &path_str])
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn rev_list(&self, repo_dir: &Path, sha: &str, limit: usize) -> Result<Vec<String>> {
        let max_count = limit.to_string();
        let out = self
            .run(
                repo_dir,
                &["rev-list", "--first-parent", "--max-count", &max_count, sha],
            )
            .await?;
        Ok(out.lines().map(|l| l.to_string()).collect())
    }

    #[instrument(skip(self))]
    async fn log(&self, repo_dir: &Path, sha: &str) -> Result<CommitInfo> {
        let out = self
            .run(
                repo_dir,
                &["log", "-1", "--format=%H%x1f%P%x1f%an%x1f%aI%x1f%s", sha],
            )
            .await?;
        let mut fields = out.splitn(5, '\u{1f}');
        let sha = fields.next().unwrap_or_default().to_string();
        let parents = fields
            .next()
            .unwrap_or_default()
            .split_whitespace()
            .map(|s| s.to_string())
            .collect();
        let author = fields.next().unwrap_or_default().to_string();
        let authored_at = fields
            .next()
            .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(chrono::Utc::now);
        let message = fields.next().unwrap_or_default().to_string();
        Ok(CommitInfo {
            sha,
            parents,
            author,
            message,
            authored_at,
        })
    }

    #[instrument(skip(self))]
    async fn numstat(&self, repo_dir: &Path, from_sha: &str, to_sha: &str) -> Result<Vec<NumstatEntry>> {
        let range = format!("{from_sha}..{to_sha}");
        let out = self
            .run(repo_dir, &["diff", "--numstat", &range])
            .await?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let mut parts = line.splitn(3, '\t');
                let added = parts.next()?;
                let removed = parts.next()?;
                let path = parts.next()?.to_string();
                if added == "-" || removed == "-" {
                    Some(NumstatEntry {
                        path,
                        added: None,
                        removed: None,
                        binary: true,
                    })
                } else {
                    Some(NumstatEntry {
                        path,
                        added: added.parse().ok(),
                        removed: removed.parse().ok(),
                        binary: false,
                    })
                }
            })
            .collect())
    }
}

pub fn bare_repo_path(base_dir: &Path, repo_id: &str) -> PathBuf {
    base_dir.join("bare").join(repo_id)
}

pub fn worktree_path(base_dir: &Path, repo_id: &str, short_sha: &str) -> PathBuf {
    base_dir.join("worktrees").join(repo_id).join(short_sha)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_git_sync(dir: &Path, args: &[&str]) {
        let output = std::process::Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
    }

    fn make_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        run_git_sync(dir.path(), &["init"]);
        run_git_sync(dir.path(), &["config", "user.name", "test"]);
        run_git_sync(dir.path(), &["config", "user.email", "test@example.com"]);
        run_git_sync(dir.path(), &["commit", "--allow-empty", "-m", "initial"]);
        dir
    }

    #[tokio::test]
    async fn commit_exists_is_true_for_head() {
        let repo = make_repo();
        let backend = SubprocessGitBackend::new();
        let head = backend.run(repo.path(), &["rev-parse", "HEAD"]).await.unwrap();
        assert!(backend.commit_exists(repo.path(), &head).await.unwrap());
    }

    #[tokio::test]
    async fn commit_exists_is_false_for_bogus_sha() {
        let repo = make_repo();
        let backend = SubprocessGitBackend::new();
        assert!(!backend
            .commit_exists(repo.path(), "0000000000000000000000000000000000000000")
            .await
            .unwrap());
    }

    #[test]
    fn worktree_path_nests_by_repo_and_short_sha() {
        let base = Path::new("/var/data/buildrisk");
        let path = worktree_path(base, "repo-1", "abc1234");
        assert_eq!(path, base.join("worktrees/repo-1/abc1234"));
    }
}
