//! `DataQualityReport` (§11): a computed summary over a `RepoConfig`'s
//! accumulated `TrainingBuild`/`FeatureAuditLog` rows. No new write path —
//! pure aggregation of already-persisted state, recomputed on every call.

use std::collections::HashMap;

use buildrisk_domain::ids::RepoConfigId;
use buildrisk_domain::ExtractionStatus;
use buildrisk_features::FEATURE_REGISTRY;
use tracing::instrument;

use crate::error::Result;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone)]
pub struct DataQualityReport {
    pub repo_config_id: RepoConfigId,
    pub total_builds: u64,
    pub completed_builds: u64,
    pub partial_builds: u64,
    pub failed_builds: u64,
    /// Fraction of non-failed builds where every requested feature came back
    /// non-null, in `[0.0, 1.0]`. `None` when there are no non-failed builds
    /// to score.
    pub completeness_ratio: Option<f64>,
    /// Per-feature fraction of non-failed builds where that feature was
    /// present and non-null.
    pub feature_presence_ratio: HashMap<String, f64>,
    pub avg_retry_count: f64,
}

impl Orchestrator {
    #[instrument(skip(self))]
    pub async fn get_data_quality_report(&self, config_id: &RepoConfigId) -> Result<DataQualityReport> {
        let config = self.state.get_repo_config(config_id).await?;
        let builds = self.state.list_training_builds_for_config(config_id).await?;

        let requested: Vec<String> = if config.requested_features.is_empty() {
            FEATURE_REGISTRY.keys().map(|k| k.to_string()).collect()
        } else {
            config.requested_features.clone()
        };

        let total_builds = builds.len() as u64;
        let completed_builds = builds
            .iter()
            .filter(|b| b.extraction_status == ExtractionStatus::Completed)
            .count() as u64;
        let partial_builds = builds
            .iter()
            .filter(|b| b.extraction_status == ExtractionStatus::Partial)
            .count() as u64;
        let failed_builds = builds
            .iter()
            .filter(|b| b.extraction_status == ExtractionStatus::Failed)
            .count() as u64;

        let scorable: Vec<_> = builds
            .iter()
            .filter(|b| b.extraction_status != ExtractionStatus::Failed)
            .collect();

        let mut feature_presence_ratio = HashMap::new();
        for feature in &requested {
            let present = scorable
                .iter()
                .filter(|b| !matches!(b.features.get(feature), None | Some(buildrisk_domain::FeatureValue::Null)))
                .count();
            let ratio = if scorable.is_empty() { 0.0 } else { present as f64 / scorable.len() as f64 };
            feature_presence_ratio.insert(feature.clone(), ratio);
        }

        let completeness_ratio = if scorable.is_empty() {
            None
        } else {
            let fully_complete = scorable
                .iter()
                .filter(|b| requested.iter().all(|f| !matches!(b.features.get(f), None | Some(buildrisk_domain::FeatureValue::Null))))
                .count();
            Some(fully_complete as f64 / scorable.len() as f64)
        };

        let mut retry_counts = Vec::new();
        for build in &builds {
            if let Some(log) = self.state.get_audit_log_for_build(&build.raw_build_run_id).await? {
                retry_counts.push(log.retry_count as f64);
            }
        }
        let avg_retry_count = if retry_counts.is_empty() {
            0.0
        } else {
            retry_counts.iter().sum::<f64>() / retry_counts.len() as f64
        };

        Ok(DataQualityReport {
            repo_config_id: config_id.clone(),
            total_builds,
            completed_builds,
            partial_builds,
            failed_builds,
            completeness_ratio,
            feature_presence_ratio,
            avg_retry_count,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::test_support::test_orchestrator;
    use buildrisk_domain::ids::{RawBuildRunId, RawRepositoryId};
    use buildrisk_domain::{CiProvider, FeatureValue, RepoConfig, TrainingBuild};
    use buildrisk_state::StateStore;

    #[tokio::test]
    async fn report_over_empty_config_has_no_scorable_ratio() {
        let orch = test_orchestrator();
        let config = orch
            .state
            .create_repo_config(RepoConfig::new(RawRepositoryId::new(), CiProvider::GitHub))
            .await
            .unwrap();

        let report = orch.get_data_quality_report(&config.id).await.unwrap();
        assert_eq!(report.total_builds, 0);
        assert!(report.completeness_ratio.is_none());
        assert_eq!(report.avg_retry_count, 0.0);
    }

    #[tokio::test]
    async fn report_computes_completeness_and_presence_ratios() {
        let orch = test_orchestrator();
        let mut config = RepoConfig::new(RawRepositoryId::new(), CiProvider::GitHub);
        config.requested_features = vec!["feat_a".to_string(), "feat_b".to_string()];
        let config = orch.state.create_repo_config(config).await.unwrap();

        let mut complete = TrainingBuild::new(RawBuildRunId::new(), config.id.clone());
        complete.extraction_status = ExtractionStatus::Completed;
        complete.features.insert("feat_a".to_string(), FeatureValue::Integer(1));
        complete.features.insert("feat_b".to_string(), FeatureValue::Integer(2));
        orch.state.upsert_training_build(complete).await.unwrap();

        let mut partial = TrainingBuild::new(RawBuildRunId::new(), config.id.clone());
        partial.extraction_status = ExtractionStatus::Partial;
        partial.features.insert("feat_a".to_string(), FeatureValue::Integer(1));
        orch.state.upsert_training_build(partial).await.unwrap();

        let mut failed = TrainingBuild::new(RawBuildRunId::new(), config.id.clone());
        failed.extraction_status = ExtractionStatus::Failed;
        orch.state.upsert_training_build(failed).await.unwrap();

        let report = orch.get_data_quality_report(&config.id).await.unwrap();
        assert_eq!(report.total_builds, 3);
        assert_eq!(report.completed_builds, 1);
        assert_eq!(report.partial_builds, 1);
        assert_eq!(report.failed_builds, 1);
        // Failed builds are excluded from scoring; 1 of 2 scorable builds is fully complete.
        assert_eq!(report.completeness_ratio, Some(0.5));
        assert_eq!(report.feature_presence_ratio["feat_a"], 1.0);
        assert_eq!(report.feature_presence_ratio["feat_b"], 0.5);
    }
}
