//! Feature-extraction results and their audit trail (§3, §4.5, §8).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::ids::{FeatureAuditLogId, RawBuildRunId, RepoConfigId, TrainingBuildId};

/// A single feature's value. Lists carry their own serialization hint at the
/// registry level (comma vs hash separator); the in-memory representation
/// here is always a native list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FeatureValue {
    Integer(i64),
    Float(f64),
    Text(String),
    Boolean(bool),
    Datetime(DateTime<Utc>),
    List(Vec<FeatureValue>),
    /// Explicit null sentinel — nullable features always emit this key
    /// rather than omitting it (§4.5's numeric/serialization semantics).
    Null,
}

pub type FeatureMap = HashMap<String, FeatureValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStatus {
    Pending,
    Completed,
    Partial,
    Failed,
}

impl ExtractionStatus {
    /// §4.5's graceful-degradation rule: Partial iff something was missing
    /// *and* at least one feature was produced; Failed iff nothing was
    /// produced; Completed iff every selected feature was produced.
    pub fn from_outcome(selected: usize, produced: usize, any_missing_or_failed: bool) -> Self {
        if produced == 0 {
            ExtractionStatus::Failed
        } else if any_missing_or_failed || produced < selected {
            ExtractionStatus::Partial
        } else {
            ExtractionStatus::Completed
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingBuild {
    pub id: TrainingBuildId,
    pub raw_build_run_id: RawBuildRunId,
    pub repo_config_id: RepoConfigId,
    pub extraction_status: ExtractionStatus,
    pub features: FeatureMap,
    pub missing_resources: Vec<String>,
    pub skipped_features: Vec<String>,
    pub extraction_error: Option<String>,
    pub predicted_label: Option<String>,
    pub predicted_confidence: Option<f64>,
    pub predicted_uncertainty: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl TrainingBuild {
    pub fn new(raw_build_run_id: RawBuildRunId, repo_config_id: RepoConfigId) -> Self {
        Self {
            id: TrainingBuildId::new(),
            raw_build_run_id,
            repo_config_id,
            extraction_status: ExtractionStatus::Pending,
            features: FeatureMap::new(),
            missing_resources: Vec::new(),
            skipped_features: Vec::new(),
            extraction_error: None,
            predicted_label: None,
            predicted_confidence: None,
            predicted_uncertainty: None,
            created_at: Utc::now(),
        }
    }

    /// Number of non-null feature-map entries, per §3's invariant that
    /// `feature_count` equals this, not `features.len()`.
    pub fn feature_count(&self) -> usize {
        self.features
            .values()
            .filter(|v| !matches!(v, FeatureValue::Null))
            .count()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeAuditEntry {
    pub name: String,
    pub status: NodeStatus,
    pub duration_ms: u64,
    pub features_extracted: Vec<String>,
    pub resources_used: Vec<String>,
    pub resources_missing: Vec<String>,
    pub error: Option<String>,
    pub skip_reason: Option<String>,
    pub retry_count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureAuditLog {
    pub id: FeatureAuditLogId,
    pub correlation_id: String,
    pub raw_build_run_id: RawBuildRunId,
    pub node_results: Vec<NodeAuditEntry>,
    pub succeeded_count: u32,
    pub failed_count: u32,
    pub skipped_count: u32,
    pub retry_count: u32,
    pub final_status: ExtractionStatus,
    pub created_at: DateTime<Utc>,
}

impl FeatureAuditLog {
    pub fn from_node_results(
        correlation_id: impl Into<String>,
        raw_build_run_id: RawBuildRunId,
        node_results: Vec<NodeAuditEntry>,
        final_status: ExtractionStatus,
    ) -> Self {
        let succeeded_count = node_results
            .iter()
            .filter(|n| n.status == NodeStatus::Success)
            .count() as u32;
        let failed_count = node_results
            .iter()
            .filter(|n| n.status == NodeStatus::Failed)
            .count() as u32;
        let skipped_count = node_results
            .iter()
            .filter(|n| n.status == NodeStatus::Skipped)
            .count() as u32;
        let retry_count = node_results.iter().map(|n| n.retry_count).sum();
        Self {
            id: FeatureAuditLogId::new(),
            correlation_id: correlation_id.into(),
            raw_build_run_id,
            node_results,
            succeeded_count,
            failed_count,
            skipped_count,
            retry_count,
            final_status,
            created_at: Utc::now(),
        }
    }

    /// The feature names this log claims to have extracted, across all
    /// successful nodes — used by §8 property 7's round-trip audit check.
    pub fn features_extracted(&self) -> Vec<String> {
        self.node_results
            .iter()
            .filter(|n| n.status == NodeStatus::Success)
            .flat_map(|n| n.features_extracted.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_status_follows_degradation_rule() {
        assert_eq!(
            ExtractionStatus::from_outcome(2, 0, true),
            ExtractionStatus::Failed
        );
        assert_eq!(
            ExtractionStatus::from_outcome(2, 1, true),
            ExtractionStatus::Partial
        );
        assert_eq!(
            ExtractionStatus::from_outcome(2, 2, false),
            ExtractionStatus::Completed
        );
    }

    #[test]
    fn feature_count_excludes_null_sentinels() {
        let mut build = TrainingBuild::new(RawBuildRunId::new(), RepoConfigId::new());
        build
            .features
            .insert("a".to_string(), FeatureValue::Integer(3));
        build.features.insert("b".to_string(), FeatureValue::Null);
        assert_eq!(build.feature_count(), 1);
    }

    #[test]
    fn audit_log_aggregates_counts_from_node_results() {
        let nodes = vec![
            NodeAuditEntry {
                name: "a".into(),
                status: NodeStatus::Success,
                duration_ms: 10,
                features_extracted: vec!["f1".into()],
                resources_used: vec![],
                resources_missing: vec![],
                error: None,
                skip_reason: None,
                retry_count: 0,
            },
            NodeAuditEntry {
                name: "b".into(),
                status: NodeStatus::Skipped,
                duration_ms: 0,
                features_extracted: vec![],
                resources_used: vec![],
                resources_missing: vec!["build_logs".into()],
                error: None,
                skip_reason: Some("missing resource: build_logs".into()),
                retry_count: 0,
            },
        ];
        let log = FeatureAuditLog::from_node_results(
            "corr-1",
            RawBuildRunId::new(),
            nodes,
            ExtractionStatus::Partial,
        );
        assert_eq!(log.succeeded_count, 1);
        assert_eq!(log.skipped_count, 1);
        assert_eq!(log.features_extracted(), vec!["f1".to_string()]);
    }
}
