//! Walks commits backward from the build SHA looking for the previous
//! built commit (§4.6).

use async_trait::async_trait;
use buildrisk_domain::{FeatureMap, FeatureValue, ResourceKind};

use crate::node::{ExtractorNode, NodeContext};

const MAX_WALK: usize = 1000;

pub struct GitCommitInfoNode;

#[async_trait]
impl ExtractorNode for GitCommitInfoNode {
    fn name(&self) -> &'static str {
        "git_commit_info"
    }

    fn features_produced(&self) -> &'static [&'static str] {
        &[
            "git_all_built_commits",
            "git_num_all_built_commits",
            "git_prev_built_commit",
            "git_prev_commit_resolution_status",
            "tr_prev_build",
        ]
    }

    fn requires_resources(&self) -> &'static [ResourceKind] {
        &[ResourceKind::BareRepo, ResourceKind::BuildRun, ResourceKind::RawBuildRuns]
    }

    fn requires_features(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &NodeContext) -> anyhow::Result<FeatureMap> {
        let bare_repo = ctx
            .bare_repo_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("bare repo path missing from context"))?;

        let history = ctx
            .git
            .rev_list(bare_repo, &ctx.build.commit_sha, MAX_WALK)
            .await?;

        let already_built: std::collections::HashSet<&str> = ctx
            .previous_build_run_ids
            .iter()
            .map(|(sha, _)| sha.as_str())
            .collect();

        let mut walked = Vec::new();
        let mut resolution = "no_previous_build";
        let mut prev_sha: Option<String> = None;
        let mut prev_build_number: Option<u64> = None;

        for sha in &history {
            walked.push(sha.clone());
            if let Some((_, number)) = ctx
                .previous_build_run_ids
                .iter()
                .find(|(s, _)| s == sha)
            {
                resolution = "build_found";
                prev_sha = Some(sha.clone());
                prev_build_number = Some(*number);
                break;
            }
            let info = ctx.git.log(bare_repo, sha).await?;
            if info.parents.len() > 1 {
                resolution = "merge_found";
                break;
            }
        }
        let _ = already_built;

        let mut map = FeatureMap::new();
        map.insert(
            "git_num_all_built_commits".to_string(),
            FeatureValue::Integer(walked.len() as i64),
        );
        map.insert(
            "git_all_built_commits".to_string(),
            FeatureValue::List(walked.into_iter().map(FeatureValue::Text).collect()),
        );
        map.insert(
            "git_prev_built_commit".to_string(),
            prev_sha.map(FeatureValue::Text).unwrap_or(FeatureValue::Null),
        );
        map.insert(
            "git_prev_commit_resolution_status".to_string(),
            FeatureValue::Text(resolution.to_string()),
        );
        map.insert(
            "tr_prev_build".to_string(),
            prev_build_number
                .map(|n| FeatureValue::Integer(n as i64))
                .unwrap_or(FeatureValue::Null),
        );
        Ok(map)
    }
}
