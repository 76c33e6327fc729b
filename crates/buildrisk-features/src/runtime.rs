//! Executes a selected DAG level-by-level, records audit entries, and
//! rolls the outcome up into `ExtractionStatus` per §4.5's degradation rule.

use std::time::Instant;

use buildrisk_domain::{
    ExtractionStatus, FeatureAuditLog, FeatureMap, NodeAuditEntry, NodeStatus, RawBuildRunId,
};
use tracing::{debug, instrument, warn};

use crate::dag::plan_for_features;
use crate::error::Result;
use crate::node::{ExtractorNode, NodeContext};

const MAX_NODE_RETRIES: u32 = 2;
const NODE_RETRY_BACKOFF_MS: u64 = 100;

pub struct DagOutcome {
    pub features: FeatureMap,
    pub audit_log: FeatureAuditLog,
    pub extraction_status: ExtractionStatus,
}

pub struct FeatureDagRuntime {
    nodes: Vec<std::sync::Arc<dyn ExtractorNode>>,
}

impl FeatureDagRuntime {
    pub fn new(nodes: Vec<std::sync::Arc<dyn ExtractorNode>>) -> Self {
        Self { nodes }
    }

    /// Resources §4.5 step 2 requires the caller acquire *before* `run`: the
    /// plan is computed first so the resource acquirer knows what to fetch.
    pub fn required_resources(
        &self,
        requested_features: &[String],
    ) -> Result<std::collections::HashSet<buildrisk_domain::ResourceKind>> {
        Ok(plan_for_features(requested_features, &self.nodes)?.required_resources)
    }

    #[instrument(skip(self, ctx))]
    pub async fn run(
        &self,
        requested_features: &[String],
        correlation_id: &str,
        raw_build_run_id: RawBuildRunId,
        mut ctx: NodeContext,
    ) -> Result<DagOutcome> {
        let plan = plan_for_features(requested_features, &self.nodes)?;

        let mut node_results = Vec::new();
        let mut features = FeatureMap::new();

        for level in plan.levels {
            // Nodes within a level are mutually independent; running them
            // sequentially here keeps the runtime single-threaded per build
            // (per §5: "the parallelism unit is the task", not the node) while
            // still respecting the DAG's level ordering.
            for node in level {
                let missing: Vec<String> = node
                    .requires_resources()
                    .iter()
                    .filter(|kind| !ctx.has_resource(**kind))
                    .map(|k| format!("{k:?}"))
                    .collect();

                if !missing.is_empty() {
                    debug!(node = node.name(), ?missing, "skipping node: missing resource");
                    node_results.push(NodeAuditEntry {
                        name: node.name().to_string(),
                        status: NodeStatus::Skipped,
                        duration_ms: 0,
                        features_extracted: vec![],
                        resources_used: vec![],
                        resources_missing: missing.clone(),
                        error: None,
                        skip_reason: Some(format!("missing resource: {}", missing.join(", "))),
                        retry_count: 0,
                    });
                    continue;
                }

                let started = Instant::now();
                let mut retry_count = 0u32;
                let mut last_error = None;
                let mut produced: Option<FeatureMap> = None;

                loop {
                    match node.execute(&ctx).await {
                        Ok(map) => {
                            produced = Some(map);
                            break;
                        }
                        Err(e) => {
                            last_error = Some(e.to_string());
                            if retry_count >= MAX_NODE_RETRIES {
                                break;
                            }
                            retry_count += 1;
                            warn!(node = node.name(), retry_count, error = %last_error.as_ref().unwrap(), "node failed, retrying");
                            tokio::time::sleep(std::time::Duration::from_millis(
                                NODE_RETRY_BACKOFF_MS * retry_count as u64,
                            ))
                            .await;
                        }
                    }
                }

                let duration_ms = started.elapsed().as_millis() as u64;

                match produced {
                    Some(map) => {
                        let names: Vec<String> = map.keys().cloned().collect();
                        for (k, v) in map.iter() {
                            features.insert(k.clone(), v.clone());
                            ctx.produced_features.insert(k.clone(), v.clone());
                        }
                        node_results.push(NodeAuditEntry {
                            name: node.name().to_string(),
                            status: NodeStatus::Success,
                            duration_ms,
                            features_extracted: names,
                            resources_used: node
                                .requires_resources()
                                .iter()
                                .map(|k| format!("{k:?}"))
                                .collect(),
                            resources_missing: vec![],
                            error: None,
                            skip_reason: None,
                            retry_count,
                        });
                    }
                    None => {
                        node_results.push(NodeAuditEntry {
                            name: node.name().to_string(),
                            status: NodeStatus::Failed,
                            duration_ms,
                            features_extracted: vec![],
                            resources_used: vec![],
                            resources_missing: vec![],
                            error: last_error,
                            skip_reason: None,
                            retry_count,
                        });
                    }
                }
            }
        }

        let any_missing_or_failed = node_results
            .iter()
            .any(|n| n.status != NodeStatus::Success);
        let selected_feature_count = requested_features.len();
        let produced_count = features
            .values()
            .filter(|v| !matches!(v, buildrisk_domain::FeatureValue::Null))
            .count();

        let extraction_status = ExtractionStatus::from_outcome(
            selected_feature_count,
            produced_count,
            any_missing_or_failed,
        );

        let audit_log = FeatureAuditLog::from_node_results(
            correlation_id,
            raw_build_run_id,
            node_results,
            extraction_status,
        );

        Ok(DagOutcome {
            features,
            audit_log,
            extraction_status,
        })
    }
}
