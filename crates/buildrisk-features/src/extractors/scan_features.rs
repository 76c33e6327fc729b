//! SonarQube/Trivy static-analysis scan integrations. Not part of the
//! original spec's illustrative extractor list; supplements it with the
//! `ScanReport` resource so a requested `sonar_*`/`trivy_*` feature degrades
//! to null rather than erroring when no scan ran for a build.

use async_trait::async_trait;
use buildrisk_domain::{FeatureMap, FeatureValue, ResourceKind};
use serde::Deserialize;

use crate::node::{ExtractorNode, NodeContext};

/// A scan tool's client, keyed by name in a small registry so new tools can
/// be added without touching the DAG runtime.
#[async_trait]
pub trait ScanTool: Send + Sync {
    fn name(&self) -> &'static str;
    async fn fetch_report(&self, project_key: &str, commit_sha: &str) -> anyhow::Result<serde_json::Value>;
}

#[derive(Debug, Clone)]
pub struct ScanToolConfig {
    pub server_url: String,
    pub token: Option<String>,
}

impl ScanToolConfig {
    pub fn from_env(url_var: &str, token_var: &str, default_url: &str) -> Self {
        Self {
            server_url: std::env::var(url_var).unwrap_or_else(|_| default_url.to_string()),
            token: std::env::var(token_var).ok(),
        }
    }
}

pub struct SonarQubeClient {
    config: ScanToolConfig,
    http: reqwest::Client,
}

impl SonarQubeClient {
    pub fn new(config: ScanToolConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::builder()
                .user_agent("buildrisk-features/0.1")
                .build()
                .expect("failed to build reqwest client"),
        }
    }
}

#[derive(Deserialize)]
struct SonarMeasuresResponse {
    component: SonarComponent,
}

#[derive(Deserialize)]
struct SonarComponent {
    measures: Vec<SonarMeasure>,
}

#[derive(Deserialize)]
struct SonarMeasure {
    metric: String,
    value: String,
}

#[async_trait]
impl ScanTool for SonarQubeClient {
    fn name(&self) -> &'static str {
        "sonarqube"
    }

    async fn fetch_report(&self, project_key: &str, _commit_sha: &str) -> anyhow::Result<serde_json::Value> {
        let url = format!(
            "{}/api/measures/component?component={project_key}&metricKeys=bugs,code_smells",
            self.config.server_url
        );
        let mut request = self.http.get(&url);
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        let response: SonarMeasuresResponse = request.send().await?.json().await?;
        let mut measures = serde_json::Map::new();
        for measure in response.component.measures {
            measures.insert(measure.metric, serde_json::Value::String(measure.value));
        }
        Ok(serde_json::Value::Object(measures))
    }
}

pub struct TrivyClient {
    config: ScanToolConfig,
    http: reqwest::Client,
}

impl TrivyClient {
    pub fn new(config: ScanToolConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::builder()
                .user_agent("buildrisk-features/0.1")
                .build()
                .expect("failed to build reqwest client"),
        }
    }
}

#[derive(Deserialize)]
struct TrivyReport {
    #[serde(rename = "Results", default)]
    results: Vec<TrivyResult>,
}

#[derive(Deserialize)]
struct TrivyResult {
    #[serde(rename = "Vulnerabilities", default)]
    vulnerabilities: Vec<TrivyVulnerability>,
}

#[derive(Deserialize)]
struct TrivyVulnerability {
    #[serde(rename = "Severity")]
    severity: String,
}

#[async_trait]
impl ScanTool for TrivyClient {
    fn name(&self) -> &'static str {
        "trivy"
    }

    async fn fetch_report(&self, project_key: &str, commit_sha: &str) -> anyhow::Result<serde_json::Value> {
        let url = format!("{}/reports/{project_key}/{commit_sha}.json", self.config.server_url);
        let report: TrivyReport = self.http.get(&url).send().await?.json().await?;
        let counts = serde_json::json!({
            "critical": count_severity(&report, "CRITICAL"),
            "high": count_severity(&report, "HIGH"),
        });
        Ok(counts)
    }
}

fn count_severity(report: &TrivyReport, severity: &str) -> u64 {
    report
        .results
        .iter()
        .flat_map(|r| &r.vulnerabilities)
        .filter(|v| v.severity == severity)
        .count() as u64
}

pub struct SonarScanFeaturesNode {
    pub client: std::sync::Arc<dyn ScanTool>,
    pub project_key: String,
}

#[async_trait]
impl ExtractorNode for SonarScanFeaturesNode {
    fn name(&self) -> &'static str {
        "sonar_scan_features"
    }

    fn features_produced(&self) -> &'static [&'static str] {
        &["sonar_bugs", "sonar_code_smells"]
    }

    fn requires_resources(&self) -> &'static [ResourceKind] {
        &[ResourceKind::ScanReport]
    }

    fn requires_features(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &NodeContext) -> anyhow::Result<FeatureMap> {
        let report = self
            .client
            .fetch_report(&self.project_key, &ctx.build.commit_sha)
            .await?;

        let mut map = FeatureMap::new();
        map.insert(
            "sonar_bugs".to_string(),
            integer_or_null(&report, "bugs"),
        );
        map.insert(
            "sonar_code_smells".to_string(),
            integer_or_null(&report, "code_smells"),
        );
        Ok(map)
    }
}

pub struct TrivyScanFeaturesNode {
    pub client: std::sync::Arc<dyn ScanTool>,
    pub project_key: String,
}

#[async_trait]
impl ExtractorNode for TrivyScanFeaturesNode {
    fn name(&self) -> &'static str {
        "trivy_scan_features"
    }

    fn features_produced(&self) -> &'static [&'static str] {
        &["trivy_vulnerabilities_critical", "trivy_vulnerabilities_high"]
    }

    fn requires_resources(&self) -> &'static [ResourceKind] {
        &[ResourceKind::ScanReport]
    }

    fn requires_features(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &NodeContext) -> anyhow::Result<FeatureMap> {
        let report = self
            .client
            .fetch_report(&self.project_key, &ctx.build.commit_sha)
            .await?;

        let mut map = FeatureMap::new();
        map.insert(
            "trivy_vulnerabilities_critical".to_string(),
            integer_or_null(&report, "critical"),
        );
        map.insert(
            "trivy_vulnerabilities_high".to_string(),
            integer_or_null(&report, "high"),
        );
        Ok(map)
    }
}

fn integer_or_null(value: &serde_json::Value, key: &str) -> FeatureValue {
    match value.get(key) {
        Some(serde_json::Value::String(s)) => s
            .parse::<i64>()
            .map(FeatureValue::Integer)
            .unwrap_or(FeatureValue::Null),
        Some(serde_json::Value::Number(n)) => n
            .as_i64()
            .map(FeatureValue::Integer)
            .unwrap_or(FeatureValue::Null),
        _ => FeatureValue::Null,
    }
}
