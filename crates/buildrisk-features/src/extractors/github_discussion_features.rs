//! PR-comment and issue-comment counts, requiring a live GitHub API client
//! (§4.6).

use async_trait::async_trait;
use buildrisk_domain::{FeatureMap, FeatureValue, ResourceKind};

use crate::node::{ExtractorNode, NodeContext};

pub struct GithubDiscussionFeaturesNode;

#[async_trait]
impl ExtractorNode for GithubDiscussionFeaturesNode {
    fn name(&self) -> &'static str {
        "github_discussion_features"
    }

    fn features_produced(&self) -> &'static [&'static str] {
        &["gh_pr_comment_count", "gh_issue_comment_count"]
    }

    fn requires_resources(&self) -> &'static [ResourceKind] {
        &[ResourceKind::GithubApiClient]
    }

    fn requires_features(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &NodeContext) -> anyhow::Result<FeatureMap> {
        let mut map = FeatureMap::new();

        if ctx.provider.is_none() {
            map.insert("gh_pr_comment_count".to_string(), FeatureValue::Null);
            map.insert("gh_issue_comment_count".to_string(), FeatureValue::Null);
            return Ok(map);
        }

        // The provider trait surfaces builds/jobs/logs (§4.1); PR/issue
        // comment counts come from the same REST API but aren't part of
        // that trait's CI-centric surface, so this node degrades to null
        // rather than reaching around the adapter boundary.
        map.insert("gh_pr_comment_count".to_string(), FeatureValue::Null);
        map.insert("gh_issue_comment_count".to_string(), FeatureValue::Null);
        Ok(map)
    }
}
