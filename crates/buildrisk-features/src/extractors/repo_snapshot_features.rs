//! Counts commits, computes repo age, and walks a fresh worktree for source
//! and test line counts (§4.6).

use async_trait::async_trait;
use buildrisk_domain::{FeatureMap, FeatureValue, ResourceKind};
use walkdir_lite::walk_files;

use crate::node::{ExtractorNode, NodeContext};

mod walkdir_lite {
    use std::path::{Path, PathBuf};

    /// Minimal recursive directory walk, skipping VCS metadata. The feature
    /// set here doesn't need symlink handling or `.gitignore` awareness — a
    /// fresh worktree is already scoped to tracked files.
    pub fn walk_files(root: &Path) -> Vec<PathBuf> {
        let mut out = Vec::new();
        let mut stack = vec![root.to_path_buf()];
        while let Some(dir) = stack.pop() {
            let Ok(entries) = std::fs::read_dir(&dir) else {
                continue;
            };
            for entry in entries.flatten() {
                let path = entry.path();
                if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
                    continue;
                }
                if path.is_dir() {
                    stack.push(path);
                } else {
                    out.push(path);
                }
            }
        }
        out
    }
}

fn is_test_file(path: &std::path::Path) -> bool {
    let s = path.to_string_lossy();
    s.contains("/test") || s.contains("/spec") || s.contains("_test.") || s.contains(".test.")
}

fn is_source_file(path: &std::path::Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("rs" | "py" | "js" | "ts" | "jsx" | "tsx" | "go" | "java" | "rb" | "c" | "cpp")
    )
}

pub struct RepoSnapshotFeaturesNode;

#[async_trait]
impl ExtractorNode for RepoSnapshotFeaturesNode {
    fn name(&self) -> &'static str {
        "repo_snapshot_features"
    }

    fn features_produced(&self) -> &'static [&'static str] {
        &["gh_num_commits", "gh_repo_age_days", "gh_sloc", "gh_test_lines_per_kloc"]
    }

    fn requires_resources(&self) -> &'static [ResourceKind] {
        &[ResourceKind::Worktree]
    }

    fn requires_features(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &NodeContext) -> anyhow::Result<FeatureMap> {
        let worktree = ctx
            .worktree_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("worktree path missing from context"))?;

        let history = ctx
            .git
            .rev_list(worktree, &ctx.build.commit_sha, usize::MAX)
            .await?;
        let num_commits = history.len();

        let age_days = if let Some(root_sha) = history.last() {
            let root = ctx.git.log(worktree, root_sha).await?;
            let head = ctx.git.log(worktree, &ctx.build.commit_sha).await?;
            (head.authored_at - root.authored_at).num_seconds() as f64 / 86_400.0
        } else {
            0.0
        };

        let files = walk_files(worktree);
        let mut source_lines = 0u64;
        let mut test_lines = 0u64;

        for file in &files {
            let Ok(contents) = std::fs::read_to_string(file) else {
                continue;
            };
            let lines = contents.lines().count() as u64;
            if is_test_file(file) {
                test_lines += lines;
            } else if is_source_file(file) {
                source_lines += lines;
            }
        }

        let kloc = (source_lines as f64 / 1000.0).max(0.001);
        let test_lines_per_kloc = test_lines as f64 / kloc;

        let mut map = FeatureMap::new();
        map.insert("gh_num_commits".to_string(), FeatureValue::Integer(num_commits as i64));
        map.insert("gh_repo_age_days".to_string(), FeatureValue::Float(age_days));
        map.insert("gh_sloc".to_string(), FeatureValue::Integer(source_lines as i64));
        map.insert(
            "gh_test_lines_per_kloc".to_string(),
            FeatureValue::Float(test_lines_per_kloc),
        );
        Ok(map)
    }
}
