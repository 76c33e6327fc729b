//! The uniform interface every CI provider is presented behind (§4.1).

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{BuildsPage, FetchBuildsParams, JobInfo, LogObject, NormalizedBuild};

#[async_trait]
pub trait CiProviderAdapter: Send + Sync {
    /// Distinct label for logging/registry lookup (`"github"`, `"gitlab"`, …).
    fn name(&self) -> &'static str;

    async fn fetch_builds(
        &self,
        repo_full_name: &str,
        params: FetchBuildsParams,
    ) -> Result<BuildsPage>;

    async fn fetch_build_details(
        &self,
        repo_full_name: &str,
        provider_build_id: &str,
    ) -> Result<Option<NormalizedBuild>>;

    async fn fetch_build_jobs(
        &self,
        repo_full_name: &str,
        provider_build_id: &str,
    ) -> Result<Vec<JobInfo>>;

    async fn fetch_build_logs(
        &self,
        repo_full_name: &str,
        provider_build_id: &str,
        job_id: Option<&str>,
    ) -> Result<Vec<LogObject>>;

    /// Self-pacing hook for providers without a shared token pool. GitHub's
    /// adapter relies on `buildrisk-tokenpool` instead and leaves this a
    /// no-op; CircleCI/Travis/Jenkins sleep a fixed interval here.
    async fn wait_rate_limit(&self) {}
}
