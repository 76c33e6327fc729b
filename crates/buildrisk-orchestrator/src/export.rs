//! `ExportJob` (§11): streams completed `TrainingBuild`s for one or more
//! `RepoConfig`s to CSV or JSON, respecting each feature's registry-declared
//! list separator and explicit null sentinel. A thin consumer of already
//! persisted state, not a new subsystem.

use std::io::Write;

use buildrisk_domain::ids::RepoConfigId;
use buildrisk_domain::{ExtractionStatus, FeatureValue, TrainingBuild};
use buildrisk_features::{ListSeparator, FEATURE_REGISTRY};
use tracing::instrument;

use crate::error::Result;
use crate::orchestrator::Orchestrator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

pub struct ExportJobRequest {
    pub repo_config_ids: Vec<RepoConfigId>,
    /// Feature names to include as columns, in order. Empty means "every
    /// feature currently in the registry".
    pub features: Vec<String>,
    pub format: ExportFormat,
    /// Only successfully-extracted builds are ever exported; `Partial`
    /// inclusion is the operator's call since a partial row still has some
    /// usable columns.
    pub include_partial: bool,
}

impl Orchestrator {
    #[instrument(skip(self, sink))]
    pub async fn run_export_job(&self, req: ExportJobRequest, sink: impl Write) -> Result<u64> {
        let columns = if req.features.is_empty() {
            FEATURE_REGISTRY.keys().map(|k| k.to_string()).collect::<Vec<_>>()
        } else {
            req.features
        };

        let mut builds = Vec::new();
        for config_id in &req.repo_config_ids {
            let mut config_builds = self.state.list_training_builds_for_config(config_id).await?;
            config_builds.retain(|b| {
                b.extraction_status == ExtractionStatus::Completed
                    || (req.include_partial && b.extraction_status == ExtractionStatus::Partial)
            });
            builds.extend(config_builds);
        }

        let written = match req.format {
            ExportFormat::Csv => write_csv(sink, &columns, &builds)?,
            ExportFormat::Json => write_json(sink, &columns, &builds)?,
        };
        Ok(written)
    }
}

fn write_csv(sink: impl Write, columns: &[String], builds: &[TrainingBuild]) -> Result<u64> {
    let mut writer = csv::Writer::from_writer(sink);
    writer.write_record(columns)?;
    for build in builds {
        let row: Vec<String> = columns.iter().map(|c| render_csv_cell(build, c)).collect();
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(builds.len() as u64)
}

/// `None` (missing key) and `FeatureValue::Null` both render as the empty
/// string; a present-but-null key is the registry's explicit null sentinel,
/// an absent key means the node never ran for this build.
fn render_csv_cell(build: &TrainingBuild, column: &str) -> String {
    match build.features.get(column) {
        None | Some(FeatureValue::Null) => String::new(),
        Some(value) => render_csv_value(value, column),
    }
}

fn render_csv_value(value: &FeatureValue, column: &str) -> String {
    match value {
        FeatureValue::Integer(n) => n.to_string(),
        FeatureValue::Float(f) => f.to_string(),
        FeatureValue::Text(s) => s.clone(),
        FeatureValue::Boolean(b) => b.to_string(),
        FeatureValue::Datetime(dt) => dt.to_rfc3339(),
        FeatureValue::Null => String::new(),
        FeatureValue::List(items) => {
            let separator = FEATURE_REGISTRY
                .get(column)
                .and_then(|spec| spec.list_separator)
                .unwrap_or(ListSeparator::Comma);
            let sep = match separator {
                ListSeparator::Comma => ",",
                ListSeparator::Hash => "#",
            };
            items
                .iter()
                .map(|i| render_csv_value(i, column))
                .collect::<Vec<_>>()
                .join(sep)
        }
    }
}

fn write_json(mut sink: impl Write, columns: &[String], builds: &[TrainingBuild]) -> Result<u64> {
    let mut rows = Vec::with_capacity(builds.len());
    for build in builds {
        let mut row = serde_json::Map::new();
        for column in columns {
            let value = build.features.get(column).cloned().unwrap_or(FeatureValue::Null);
            row.insert(column.clone(), feature_value_to_json(&value));
        }
        rows.push(serde_json::Value::Object(row));
    }
    let body = serde_json::to_vec_pretty(&serde_json::Value::Array(rows))?;
    sink.write_all(&body)?;
    Ok(builds.len() as u64)
}

fn feature_value_to_json(value: &FeatureValue) -> serde_json::Value {
    match value {
        FeatureValue::Integer(n) => serde_json::Value::from(*n),
        FeatureValue::Float(f) => serde_json::Value::from(*f),
        FeatureValue::Text(s) => serde_json::Value::from(s.clone()),
        FeatureValue::Boolean(b) => serde_json::Value::from(*b),
        FeatureValue::Datetime(dt) => serde_json::Value::from(dt.to_rfc3339()),
        FeatureValue::Null => serde_json::Value::Null,
        FeatureValue::List(items) => serde_json::Value::Array(items.iter().map(feature_value_to_json).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use buildrisk_domain::ids::RawBuildRunId;

    fn build_with(status: ExtractionStatus, features: Vec<(&str, FeatureValue)>) -> TrainingBuild {
        let mut build = TrainingBuild::new(RawBuildRunId::new(), RepoConfigId::new());
        build.extraction_status = status;
        for (k, v) in features {
            build.features.insert(k.to_string(), v);
        }
        build
    }

    #[test]
    fn render_csv_cell_treats_missing_and_null_identically() {
        let build = build_with(ExtractionStatus::Completed, vec![("present", FeatureValue::Integer(3))]);
        assert_eq!(render_csv_cell(&build, "present"), "3");
        assert_eq!(render_csv_cell(&build, "absent"), "");

        let build = build_with(ExtractionStatus::Completed, vec![("null_col", FeatureValue::Null)]);
        assert_eq!(render_csv_cell(&build, "null_col"), "");
    }

    #[test]
    fn render_csv_value_joins_lists_with_comma_by_default() {
        let list = FeatureValue::List(vec![FeatureValue::Text("a".into()), FeatureValue::Text("b".into())]);
        assert_eq!(render_csv_value(&list, "unregistered_column"), "a,b");
    }

    #[test]
    fn write_csv_emits_header_then_one_row_per_build() {
        let builds = vec![
            build_with(ExtractionStatus::Completed, vec![("x", FeatureValue::Integer(1))]),
            build_with(ExtractionStatus::Completed, vec![("x", FeatureValue::Integer(2))]),
        ];
        let mut out = Vec::new();
        let written = write_csv(&mut out, &["x".to_string()], &builds).unwrap();
        assert_eq!(written, 2);
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "x\n1\n2\n");
    }

    #[test]
    fn write_json_uses_null_for_missing_features() {
        let builds = vec![build_with(ExtractionStatus::Completed, vec![("x", FeatureValue::Integer(1))])];
        let mut out = Vec::new();
        write_json(&mut out, &["x".to_string(), "y".to_string()], &builds).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(parsed[0]["x"], serde_json::json!(1));
        assert_eq!(parsed[0]["y"], serde_json::Value::Null);
    }
}
