//! The daemon's background tick: since HTTP webhooks are the caller's
//! concern (§6 lists the webhook as an external interface, not a core
//! subsystem), continuous operation here means periodically walking every
//! known `RepoConfig` and redispatching whichever stage its status implies.
//! Every dispatch call is idempotent (§8 property 3), so re-ticking a config
//! that has nothing new to do is a cheap no-op.

use buildrisk_domain::RepoConfigStatus;
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Default, Clone, Copy)]
pub struct TickSummary {
    pub configs_seen: usize,
    pub ingestion_dispatched: usize,
    pub processing_dispatched: usize,
    pub errors: usize,
}

impl Orchestrator {
    /// One pass over every repo config. Call this on a
    /// `scan_batch_delay_seconds`-paced interval from the daemon's main loop.
    #[instrument(skip(self))]
    pub async fn run_background_tick(&self) -> Result<TickSummary> {
        let configs = self.state.list_all_repo_configs().await?;
        let mut summary = TickSummary { configs_seen: configs.len(), ..TickSummary::default() };

        for config in configs {
            let result = match config.status {
                RepoConfigStatus::Ingesting => {
                    summary.ingestion_dispatched += 1;
                    self.dispatch_ingestion(&config.id).await.map(|_| ())
                }
                RepoConfigStatus::IngestionComplete | RepoConfigStatus::IngestionPartial | RepoConfigStatus::Processing => {
                    summary.processing_dispatched += 1;
                    self.dispatch_processing(&config.id).await.map(|_| ())
                }
                RepoConfigStatus::Queued | RepoConfigStatus::Processed | RepoConfigStatus::Failed => Ok(()),
            };

            if let Err(err) = result {
                summary.errors += 1;
                warn!(config_id = %config.id, error = %err, "background tick dispatch failed");
            }
        }

        info!(
            configs_seen = summary.configs_seen,
            ingestion_dispatched = summary.ingestion_dispatched,
            processing_dispatched = summary.processing_dispatched,
            errors = summary.errors,
            "background tick complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::test_support::test_orchestrator;
    use buildrisk_domain::ids::RawRepositoryId;
    use buildrisk_domain::{CiProvider, RepoConfig};
    use buildrisk_state::StateStore;

    async fn seeded_config(orch: &Orchestrator, status: RepoConfigStatus) -> RepoConfig {
        let mut config = RepoConfig::new(RawRepositoryId::new(), CiProvider::GitHub);
        config.status = status;
        orch.state.create_repo_config(config).await.unwrap()
    }

    #[tokio::test]
    async fn queued_processed_and_failed_configs_are_left_alone() {
        let orch = test_orchestrator();
        seeded_config(&orch, RepoConfigStatus::Queued).await;
        seeded_config(&orch, RepoConfigStatus::Processed).await;
        seeded_config(&orch, RepoConfigStatus::Failed).await;

        let summary = orch.run_background_tick().await.unwrap();

        assert_eq!(summary.configs_seen, 3);
        assert_eq!(summary.ingestion_dispatched, 0);
        assert_eq!(summary.processing_dispatched, 0);
    }

    #[tokio::test]
    async fn ingestion_complete_config_is_redispatched_to_processing() {
        let orch = test_orchestrator();
        seeded_config(&orch, RepoConfigStatus::IngestionComplete).await;

        let summary = orch.run_background_tick().await.unwrap();

        assert_eq!(summary.configs_seen, 1);
        assert_eq!(summary.processing_dispatched, 1);
        assert_eq!(summary.ingestion_dispatched, 0);
    }
}
