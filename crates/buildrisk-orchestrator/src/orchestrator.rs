//! The `Orchestrator`: holds every dependency the chord engine needs and
//! exposes the §4.3 pipeline plus the §6/§10.4 operator surface. Workers are
//! stateless — every method recovers entirely from `state`; nothing but
//! `config` lives only in memory.

use std::sync::Arc;

use buildrisk_features::FeatureDagRuntime;
use buildrisk_providers::ProviderRegistry;
use buildrisk_resources::{GitBackend, ResourceAcquirer};
use buildrisk_state::StateStore;
use buildrisk_tokenpool::TokenPool;

use crate::config::OrchestratorConfig;

pub struct Orchestrator {
    pub(crate) state: Arc<dyn StateStore>,
    pub(crate) providers: Arc<ProviderRegistry>,
    pub(crate) acquirer: Arc<ResourceAcquirer>,
    pub(crate) git: Arc<dyn GitBackend>,
    pub(crate) dag: Arc<FeatureDagRuntime>,
    pub(crate) token_pool: Arc<TokenPool>,
    pub(crate) config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        state: Arc<dyn StateStore>,
        providers: Arc<ProviderRegistry>,
        acquirer: Arc<ResourceAcquirer>,
        git: Arc<dyn GitBackend>,
        dag: Arc<FeatureDagRuntime>,
        token_pool: Arc<TokenPool>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            state,
            providers,
            acquirer,
            git,
            dag,
            token_pool,
            config,
        }
    }
}

/// `https://{host}/{full_name}.git` for the repo's CI provider. All five
/// providers in this system CI-wrap a repo hosted on GitHub or GitLab; the
/// clone host is derived from the provider rather than stored separately,
/// since `RawRepository` has no independent VCS-host field (recorded as an
/// open-question resolution in DESIGN.md).
pub(crate) fn clone_url(repo: &buildrisk_domain::RawRepository) -> String {
    use buildrisk_domain::CiProvider;
    let host = match repo.provider {
        CiProvider::GitLab => "gitlab.com",
        CiProvider::GitHub | CiProvider::Jenkins | CiProvider::CircleCi | CiProvider::Travis => "github.com",
    };
    format!("https://{host}/{}.git", repo.full_name)
}

/// Shared by this crate's `#[cfg(test)]` modules: an `Orchestrator` over a
/// fresh `MemoryStateStore` with no registered providers or DAG nodes, for
/// tests that only exercise state-store-backed read/write logic.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use buildrisk_resources::{InMemoryLockStore, SubprocessGitBackend};
    use buildrisk_state::MemoryStateStore;

    pub fn test_orchestrator() -> Orchestrator {
        let state: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());
        let git: Arc<dyn GitBackend> = Arc::new(SubprocessGitBackend::new());
        let locks = Arc::new(InMemoryLockStore::new());
        let acquirer = Arc::new(ResourceAcquirer::new(git.clone(), locks, "./target/test-repos"));
        let dag = Arc::new(FeatureDagRuntime::new(vec![]));
        Orchestrator::new(
            state,
            Arc::new(ProviderRegistry::new()),
            acquirer,
            git,
            dag,
            Arc::new(TokenPool::new()),
            OrchestratorConfig::default(),
        )
    }
}
