//! The extractor node contract (§4.5).

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use buildrisk_domain::{FeatureMap, RawBuildRun, ResourceKind};
use buildrisk_providers::CiProviderAdapter;
use buildrisk_resources::GitBackend;

/// Everything a node may read: the resources the acquirer prepared plus
/// feature values already produced by nodes in earlier DAG levels.
pub struct NodeContext {
    pub build: RawBuildRun,
    pub repo_full_name: String,
    pub bare_repo_path: Option<PathBuf>,
    pub worktree_path: Option<PathBuf>,
    pub effective_sha: Option<String>,
    pub log_texts: Vec<(String, String)>,
    pub available_resources: HashSet<ResourceKind>,
    pub produced_features: FeatureMap,
    pub git: Arc<dyn GitBackend>,
    pub provider: Option<Arc<dyn CiProviderAdapter>>,
    pub previous_build_run_ids: Vec<(String, u64)>,
}

impl NodeContext {
    pub fn has_resource(&self, kind: ResourceKind) -> bool {
        self.available_resources.contains(&kind)
    }

    pub fn feature(&self, name: &str) -> Option<&buildrisk_domain::FeatureValue> {
        self.produced_features.get(name)
    }
}

#[async_trait]
pub trait ExtractorNode: Send + Sync {
    fn name(&self) -> &'static str;
    fn features_produced(&self) -> &'static [&'static str];
    fn requires_resources(&self) -> &'static [ResourceKind];
    fn requires_features(&self) -> &'static [&'static str];

    async fn execute(&self, ctx: &NodeContext) -> anyhow::Result<FeatureMap>;
}
