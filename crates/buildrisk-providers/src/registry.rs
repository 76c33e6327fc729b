//! Maps `CiProvider` to its adapter instance (§9: "registry construction is
//! compile-time or init-time, never implicit import side-effects").

use std::collections::HashMap;
use std::sync::Arc;

use buildrisk_domain::CiProvider;

use crate::adapter::CiProviderAdapter;

#[derive(Default)]
pub struct ProviderRegistry {
    adapters: HashMap<CiProvider, Arc<dyn CiProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: CiProvider, adapter: Arc<dyn CiProviderAdapter>) -> &mut Self {
        self.adapters.insert(provider, adapter);
        self
    }

    pub fn get(&self, provider: CiProvider) -> Option<Arc<dyn CiProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::models::{BuildsPage, FetchBuildsParams, JobInfo, LogObject, NormalizedBuild};
    use async_trait::async_trait;

    struct StubAdapter;

    #[async_trait]
    impl CiProviderAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            "stub"
        }
        async fn fetch_builds(&self, _: &str, _: FetchBuildsParams) -> Result<BuildsPage> {
            Ok(BuildsPage {
                builds: vec![],
                aborted_on_log_unavailability: false,
            })
        }
        async fn fetch_build_details(&self, _: &str, _: &str) -> Result<Option<NormalizedBuild>> {
            Ok(None)
        }
        async fn fetch_build_jobs(&self, _: &str, _: &str) -> Result<Vec<JobInfo>> {
            Ok(vec![])
        }
        async fn fetch_build_logs(&self, _: &str, _: &str, _: Option<&str>) -> Result<Vec<LogObject>> {
            Ok(vec![])
        }
    }

    #[test]
    fn unregistered_provider_resolves_to_none() {
        let registry = ProviderRegistry::new();
        assert!(registry.get(CiProvider::Jenkins).is_none());
    }

    #[test]
    fn registered_provider_resolves_by_enum_key() {
        let mut registry = ProviderRegistry::new();
        registry.register(CiProvider::GitHub, Arc::new(StubAdapter));
        assert!(registry.get(CiProvider::GitHub).is_some());
    }
}
