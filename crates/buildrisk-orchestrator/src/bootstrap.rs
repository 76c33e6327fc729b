//! Wires the default production `Orchestrator` from environment variables.
//! Shared by `buildrisk-cli` and `buildriskd` so the two binaries can't drift
//! on how adapters/nodes get constructed.

use std::sync::Arc;

use buildrisk_features::extractors::{
    BuildLogFeaturesNode, GitCommitInfoNode, GitDiffFeaturesNode, GithubDiscussionFeaturesNode,
    RepoSnapshotFeaturesNode, ScanTool, ScanToolConfig, SonarQubeClient, SonarScanFeaturesNode,
    TeamStatsFeaturesNode, TrivyClient, TrivyScanFeaturesNode,
};
use buildrisk_features::{ExtractorNode, FeatureDagRuntime};
use buildrisk_providers::{CircleCiAdapter, GitHubAdapter, GitLabAdapter, JenkinsAdapter, ProviderRegistry, TravisAdapter};
use buildrisk_resources::{InMemoryLockStore, ResourceAcquirer, SubprocessGitBackend};
use buildrisk_state::{StateStore, SurrealStateStore};
use buildrisk_tokenpool::TokenPool;
use buildrisk_domain::CiProvider;

use crate::config::OrchestratorConfig;
use crate::error::Result;
use crate::orchestrator::Orchestrator;

/// Every node that runs in the production DAG, in the order `plan_for_features`
/// will topologically sort them regardless of this list's order.
fn default_nodes() -> Vec<Arc<dyn ExtractorNode>> {
    let sonar_client: Arc<dyn ScanTool> = Arc::new(SonarQubeClient::new(ScanToolConfig::from_env(
        "SONARQUBE_URL",
        "SONARQUBE_TOKEN",
        "https://sonarcloud.io",
    )));
    let trivy_client: Arc<dyn ScanTool> = Arc::new(TrivyClient::new(ScanToolConfig::from_env(
            "TRIVY_SERVER_URL",
            "TRIVY_TOKEN",
            "http://localhost:4954",
        )));
    let project_key = std::env::var("SCAN_PROJECT_KEY").unwrap_or_else(|_| "default".to_string());

    vec![
        Arc::new(GitCommitInfoNode),
        Arc::new(GitDiffFeaturesNode),
        Arc::new(RepoSnapshotFeaturesNode),
        Arc::new(BuildLogFeaturesNode),
        Arc::new(TeamStatsFeaturesNode),
        Arc::new(GithubDiscussionFeaturesNode),
        Arc::new(SonarScanFeaturesNode { client: sonar_client, project_key: project_key.clone() }),
        Arc::new(TrivyScanFeaturesNode { client: trivy_client, project_key }),
    ]
}

/// Registers every `CiProviderAdapter` this system speaks to. GitHub alone
/// draws from the shared `TokenPool` (§4.2); the other four authenticate
/// with a single configured token each, per their adapters' constructors.
fn default_providers(token_pool: Arc<TokenPool>) -> Arc<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();
    registry.register(CiProvider::GitHub, Arc::new(GitHubAdapter::new(token_pool)));
    registry.register(CiProvider::GitLab, Arc::new(GitLabAdapter::new(env_token("GITLAB_TOKEN"))));
    registry.register(CiProvider::CircleCi, Arc::new(CircleCiAdapter::new(env_token("CIRCLECI_TOKEN"))));
    registry.register(
        CiProvider::Jenkins,
        Arc::new(JenkinsAdapter::new(
            std::env::var("JENKINS_BASE_URL").unwrap_or_default(),
            std::env::var("JENKINS_USER").unwrap_or_default(),
            env_token("JENKINS_TOKEN"),
        )),
    );
    registry.register(CiProvider::Travis, Arc::new(TravisAdapter::new(env_token("TRAVIS_TOKEN"))));
    Arc::new(registry)
}

fn env_token(var: &str) -> String {
    std::env::var(var).unwrap_or_default()
}

/// Builds a `SurrealStateStore` and seeds the `TokenPool` from `GITHUB_TOKENS`
/// (comma-separated, §6), then assembles the full `Orchestrator`.
///
/// The state store is the embedded in-memory SurrealDB engine — the only
/// engine `buildrisk-state::SurrealStateStore` wires up today. A remote
/// `protocol-ws` connection is a matter of swapping `setup_db` for a
/// `Surreal::new::<Ws>` dial; not built here since nothing in this workspace
/// exercises it yet.
pub async fn build_default(config: OrchestratorConfig) -> Result<Orchestrator> {
    let state: Arc<dyn StateStore> = Arc::new(SurrealStateStore::setup_db().await?);

    let token_pool = Arc::new(TokenPool::new());
    let github_tokens = std::env::var("GITHUB_TOKENS").unwrap_or_default();
    let tokens: Vec<String> = github_tokens
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();
    token_pool.seed(tokens).await;

    let providers = default_providers(token_pool.clone());

    let git: Arc<dyn buildrisk_resources::GitBackend> = Arc::new(SubprocessGitBackend::new());
    let locks = Arc::new(InMemoryLockStore::new());
    let acquirer = Arc::new(ResourceAcquirer::new(git.clone(), locks, config.repos_dir.clone()));

    let dag = Arc::new(FeatureDagRuntime::new(default_nodes()));

    Ok(Orchestrator::new(state, providers, acquirer, git, dag, token_pool, config))
}
