//! Parses CI build logs with a small registry of per-framework test-result
//! parsers, keyed on detected framework (§4.6).

use async_trait::async_trait;
use buildrisk_domain::{FeatureMap, FeatureValue, ResourceKind};
use regex::Regex;
use std::sync::LazyLock;

use crate::node::{ExtractorNode, NodeContext};

#[derive(Default, Debug, Clone, Copy)]
struct LogTotals {
    ran: u64,
    failed: u64,
    skipped: u64,
    duration_seconds: f64,
}

impl LogTotals {
    fn merge(&mut self, other: LogTotals) {
        self.ran += other.ran;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.duration_seconds += other.duration_seconds;
    }
}

static PYTEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"=+ .*?(\d+) passed(?:, (\d+) failed)?(?:, (\d+) skipped)?.*? in ([\d.]+)s").unwrap()
});
static JEST_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"Tests:\s+(?:(\d+) failed, )?(?:(\d+) skipped, )?(\d+) passed, (\d+) total").unwrap()
});
static GOTEST_SUMMARY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--- (PASS|FAIL): \S+ \(([\d.]+)s\)").unwrap());
static JUNIT_SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"tests="(\d+)" failures="(\d+)".*?skipped="(\d+)".*?time="([\d.]+)""#).unwrap()
});

fn parse_pytest(text: &str) -> Option<LogTotals> {
    let caps = PYTEST_SUMMARY.captures(text)?;
    let passed: u64 = caps.get(1)?.as_str().parse().ok()?;
    let failed: u64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let skipped: u64 = caps.get(3).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let duration: f64 = caps.get(4)?.as_str().parse().ok()?;
    Some(LogTotals {
        ran: passed + failed + skipped,
        failed,
        skipped,
        duration_seconds: duration,
    })
}

fn parse_jest(text: &str) -> Option<LogTotals> {
    let caps = JEST_SUMMARY.captures(text)?;
    let failed: u64 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let skipped: u64 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
    let total: u64 = caps.get(4)?.as_str().parse().ok()?;
    Some(LogTotals {
        ran: total,
        failed,
        skipped,
        duration_seconds: 0.0,
    })
}

fn parse_gotest(text: &str) -> Option<LogTotals> {
    let mut totals = LogTotals::default();
    let mut found = false;
    for caps in GOTEST_SUMMARY.captures_iter(text) {
        found = true;
        totals.ran += 1;
        if &caps[1] == "FAIL" {
            totals.failed += 1;
        }
        totals.duration_seconds += caps[2].parse::<f64>().unwrap_or(0.0);
    }
    found.then_some(totals)
}

fn parse_junit(text: &str) -> Option<LogTotals> {
    let caps = JUNIT_SUMMARY.captures(text)?;
    let total: u64 = caps.get(1)?.as_str().parse().ok()?;
    let failures: u64 = caps.get(2)?.as_str().parse().ok()?;
    let skipped: u64 = caps.get(3)?.as_str().parse().ok()?;
    let duration: f64 = caps.get(4)?.as_str().parse().ok()?;
    Some(LogTotals {
        ran: total,
        failed: failures,
        skipped,
        duration_seconds: duration,
    })
}

const PARSERS: &[fn(&str) -> Option<LogTotals>] = &[parse_pytest, parse_jest, parse_gotest, parse_junit];

pub struct BuildLogFeaturesNode;

#[async_trait]
impl ExtractorNode for BuildLogFeaturesNode {
    fn name(&self) -> &'static str {
        "build_log_features"
    }

    fn features_produced(&self) -> &'static [&'static str] {
        &["tests_ran", "tests_failed", "tests_fail_rate", "tests_duration_seconds"]
    }

    fn requires_resources(&self) -> &'static [ResourceKind] {
        &[ResourceKind::BuildLogs]
    }

    fn requires_features(&self) -> &'static [&'static str] {
        &[]
    }

    async fn execute(&self, ctx: &NodeContext) -> anyhow::Result<FeatureMap> {
        let mut totals = LogTotals::default();
        for (_job_name, text) in &ctx.log_texts {
            for parser in PARSERS {
                if let Some(parsed) = parser(text) {
                    totals.merge(parsed);
                    break;
                }
            }
        }

        let fail_rate = if totals.ran > 0 {
            totals.failed as f64 / totals.ran as f64
        } else {
            0.0
        };

        let mut map = FeatureMap::new();
        map.insert("tests_ran".to_string(), FeatureValue::Integer(totals.ran as i64));
        map.insert("tests_failed".to_string(), FeatureValue::Integer(totals.failed as i64));
        map.insert("tests_fail_rate".to_string(), FeatureValue::Float(fail_rate));
        map.insert(
            "tests_duration_seconds".to_string(),
            FeatureValue::Float(totals.duration_seconds),
        );
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pytest_summary_line() {
        let log = "===== 8 passed, 2 failed, 1 skipped in 3.21s =====";
        let totals = parse_pytest(log).unwrap();
        assert_eq!(totals.ran, 11);
        assert_eq!(totals.failed, 2);
        assert_eq!(totals.skipped, 1);
    }

    #[test]
    fn parses_gotest_pass_fail_lines() {
        let log = "--- PASS: TestFoo (0.01s)\n--- FAIL: TestBar (0.02s)\n";
        let totals = parse_gotest(log).unwrap();
        assert_eq!(totals.ran, 2);
        assert_eq!(totals.failed, 1);
    }
}
