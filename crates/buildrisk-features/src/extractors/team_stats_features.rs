//! Team-size and core-membership features over a trailing 90-day window
//! (§4.6).

use async_trait::async_trait;
use buildrisk_domain::{FeatureMap, FeatureValue, ResourceKind};

use crate::node::{ExtractorNode, NodeContext};

const WINDOW_DAYS: i64 = 90;

pub struct TeamStatsFeaturesNode;

#[async_trait]
impl ExtractorNode for TeamStatsFeaturesNode {
    fn name(&self) -> &'static str {
        "team_stats_features"
    }

    fn features_produced(&self) -> &'static [&'static str] {
        &[
            "gh_team_size",
            "gh_by_core_team_member",
            "gh_num_commits_on_files_touched",
        ]
    }

    fn requires_resources(&self) -> &'static [ResourceKind] {
        &[ResourceKind::BareRepo]
    }

    fn requires_features(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &NodeContext) -> anyhow::Result<FeatureMap> {
        let bare_repo = ctx
            .bare_repo_path
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("bare repo path missing from context"))?;

        let cutoff = chrono::Utc::now() - chrono::Duration::days(WINDOW_DAYS);

        let recent_commits = ctx
            .git
            .rev_list(bare_repo, &ctx.build.commit_sha, 5000)
            .await?;

        let mut committers = std::collections::HashSet::new();
        for sha in &recent_commits {
            let info = ctx.git.log(bare_repo, sha).await?;
            if info.authored_at < cutoff {
                break;
            }
            if info.parents.len() <= 1 {
                committers.insert(info.author);
            }
        }

        let team_size = committers.len();
        let triggering_author = &ctx.build.author;
        let is_core_member = committers.contains(triggering_author);

        let touched_files: std::collections::HashSet<String> = if let (Some(worktree), true) =
            (ctx.worktree_path.as_ref(), recent_commits.len() > 1)
        {
            ctx.git
                .numstat(worktree, &recent_commits[1], &ctx.build.commit_sha)
                .await?
                .into_iter()
                .map(|e| e.path)
                .collect()
        } else {
            Default::default()
        };

        let mut commits_on_touched_files = 0i64;
        if !touched_files.is_empty() {
            for sha in recent_commits.iter().skip(1) {
                if let Some(worktree) = ctx.worktree_path.as_ref() {
                    let entries = ctx.git.numstat(worktree, sha, &ctx.build.commit_sha).await?;
                    if entries.iter().any(|e| touched_files.contains(&e.path)) {
                        commits_on_touched_files += 1;
                    }
                }
            }
        }

        let mut map = FeatureMap::new();
        map.insert("gh_team_size".to_string(), FeatureValue::Integer(team_size as i64));
        map.insert(
            "gh_by_core_team_member".to_string(),
            FeatureValue::Boolean(is_core_member),
        );
        map.insert(
            "gh_num_commits_on_files_touched".to_string(),
            FeatureValue::Integer(commits_on_touched_files),
        );
        Ok(map)
    }
}
