//! Sums `diff --numstat` over parent→commit, classifying files by extension
//! and path heuristics into source/test/doc/other (§4.6).

use async_trait::async_trait;
use buildrisk_domain::{FeatureMap, FeatureValue, ResourceKind};
use regex::Regex;
use std::sync::LazyLock;

use crate::node::{ExtractorNode, NodeContext};

static TEST_PATH_HINT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)(^|/)(test|tests|spec|specs|__tests__)(/|_|$)").unwrap());
static DOC_EXTENSIONS: &[&str] = &["md", "rst", "txt", "adoc"];
static SOURCE_EXTENSIONS: &[&str] = &[
    "rs", "py", "js", "ts", "jsx", "tsx", "go", "java", "rb", "c", "cpp", "h", "hpp",
];

#[derive(Default)]
struct Churn {
    added: i64,
    removed: i64,
    files_added: i64,
}

fn classify(path: &str) -> &'static str {
    if TEST_PATH_HINT.is_match(path) {
        return "test";
    }
    let ext = path.rsplit('.').next().unwrap_or("");
    if DOC_EXTENSIONS.contains(&ext) {
        "doc"
    } else if SOURCE_EXTENSIONS.contains(&ext) {
        "source"
    } else {
        "other"
    }
}

pub struct GitDiffFeaturesNode;

#[async_trait]
impl ExtractorNode for GitDiffFeaturesNode {
    fn name(&self) -> &'static str {
        "git_diff_features"
    }

    fn features_produced(&self) -> &'static [&'static str] {
        &["gh_diff_src_churn", "gh_diff_test_churn", "gh_diff_files_added"]
    }

    fn requires_resources(&self) -> &'static [ResourceKind] {
        &[ResourceKind::BareRepo, ResourceKind::Worktree]
    }

    fn requires_features(&self) -> &'static [&'static str] {
        &["git_prev_built_commit"]
    }

    async fn execute(&self, ctx: &NodeContext) -> anyhow::Result<FeatureMap> {
        let bare_repo = ctx
            .bare_repo_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("bare repo path missing from context"))?;

        let prev_sha = match ctx.feature("git_prev_built_commit") {
            Some(FeatureValue::Text(sha)) => sha.clone(),
            _ => {
                let mut map = FeatureMap::new();
                map.insert("gh_diff_src_churn".to_string(), FeatureValue::Integer(0));
                map.insert("gh_diff_test_churn".to_string(), FeatureValue::Integer(0));
                map.insert("gh_diff_files_added".to_string(), FeatureValue::Integer(0));
                return Ok(map);
            }
        };

        let entries = ctx
            .git
            .numstat(bare_repo, &prev_sha, &ctx.build.commit_sha)
            .await?;

        let mut source = Churn::default();
        let mut test = Churn::default();

        for entry in entries {
            let bucket = classify(&entry.path);
            let target = match bucket {
                "source" => &mut source,
                "test" => &mut test,
                _ => continue,
            };
            target.added += entry.added.unwrap_or(0) as i64;
            target.removed += entry.removed.unwrap_or(0) as i64;
            target.files_added += 1;
        }

        let mut map = FeatureMap::new();
        map.insert(
            "gh_diff_src_churn".to_string(),
            FeatureValue::Integer(source.added + source.removed),
        );
        map.insert(
            "gh_diff_test_churn".to_string(),
            FeatureValue::Integer(test.added + test.removed),
        );
        map.insert(
            "gh_diff_files_added".to_string(),
            FeatureValue::Integer(source.files_added + test.files_added),
        );
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_test_paths_by_directory_hint() {
        assert_eq!(classify("src/lib.rs"), "source");
        assert_eq!(classify("tests/foo_test.rs"), "test");
        assert_eq!(classify("README.md"), "doc");
        assert_eq!(classify("Dockerfile"), "other");
    }
}
