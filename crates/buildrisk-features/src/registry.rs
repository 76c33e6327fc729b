//! Static feature registry (§4.5): "the only place feature metadata lives;
//! the DAG is derived from it."

use std::collections::HashMap;
use std::sync::LazyLock;

use buildrisk_domain::ResourceKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureDataType {
    Integer,
    Float,
    Text,
    Boolean,
    Datetime,
    ListOf(&'static FeatureDataType),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListSeparator {
    Comma,
    Hash,
}

#[derive(Debug, Clone, Copy)]
pub struct ValidRange {
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone)]
pub struct FeatureSpec {
    pub name: &'static str,
    pub display_name: &'static str,
    pub category: &'static str,
    pub data_type: FeatureDataType,
    pub producing_node: &'static str,
    pub feature_deps: &'static [&'static str],
    pub resource_deps: &'static [ResourceKind],
    pub valid_range: Option<ValidRange>,
    pub valid_values: Option<&'static [&'static str]>,
    pub nullable: bool,
    pub list_separator: Option<ListSeparator>,
}

macro_rules! feature_spec {
    ($name:expr, $display:expr, $category:expr, $data_type:expr, $node:expr, $feature_deps:expr, $resource_deps:expr, $nullable:expr) => {
        FeatureSpec {
            name: $name,
            display_name: $display,
            category: $category,
            data_type: $data_type,
            producing_node: $node,
            feature_deps: $feature_deps,
            resource_deps: $resource_deps,
            valid_range: None,
            valid_values: None,
            nullable: $nullable,
            list_separator: None,
        }
    };
}

pub static FEATURE_REGISTRY: LazyLock<HashMap<&'static str, FeatureSpec>> = LazyLock::new(|| {
    use FeatureDataType::*;
    use ResourceKind::*;

    let specs = vec![
        {
            let mut spec = feature_spec!(
                "git_all_built_commits",
                "All previously built commits",
                "git_history",
                ListOf(&Text),
                "git_commit_info",
                &[],
                &[BareRepo, BuildRun, RawBuildRuns],
                false
            );
            // TravisTorrent's gh_all_built_commits convention: "#"-joined, since
            // commit subjects themselves may contain commas.
            spec.list_separator = Some(ListSeparator::Hash);
            spec
        },
        feature_spec!(
            "git_num_all_built_commits",
            "Count of previously built commits",
            "git_history",
            Integer,
            "git_commit_info",
            &["git_all_built_commits"],
            &[BareRepo, BuildRun, RawBuildRuns],
            false
        ),
        feature_spec!(
            "git_prev_built_commit",
            "Previous built commit SHA",
            "git_history",
            Text,
            "git_commit_info",
            &[],
            &[BareRepo, BuildRun, RawBuildRuns],
            true
        ),
        feature_spec!(
            "git_prev_commit_resolution_status",
            "How the previous build was resolved",
            "git_history",
            Text,
            "git_commit_info",
            &[],
            &[BareRepo, BuildRun, RawBuildRuns],
            false
        ),
        feature_spec!(
            "tr_prev_build",
            "Previous build number",
            "git_history",
            Integer,
            "git_commit_info",
            &[],
            &[BareRepo, BuildRun, RawBuildRuns],
            true
        ),
        feature_spec!(
            "gh_diff_src_churn",
            "Lines changed in source files",
            "diff",
            Integer,
            "git_diff_features",
            &["git_prev_built_commit"],
            &[BareRepo, Worktree],
            false
        ),
        feature_spec!(
            "gh_diff_test_churn",
            "Lines changed in test files",
            "diff",
            Integer,
            "git_diff_features",
            &["git_prev_built_commit"],
            &[BareRepo, Worktree],
            false
        ),
        feature_spec!(
            "gh_diff_files_added",
            "Files added in the diff",
            "diff",
            Integer,
            "git_diff_features",
            &["git_prev_built_commit"],
            &[BareRepo, Worktree],
            false
        ),
        feature_spec!(
            "gh_num_commits",
            "Total commits in the repo at build time",
            "snapshot",
            Integer,
            "repo_snapshot_features",
            &[],
            &[Worktree],
            false
        ),
        feature_spec!(
            "gh_repo_age_days",
            "Days since the repo's first commit",
            "snapshot",
            Float,
            "repo_snapshot_features",
            &[],
            &[Worktree],
            false
        ),
        feature_spec!(
            "gh_sloc",
            "Source lines of code",
            "snapshot",
            Integer,
            "repo_snapshot_features",
            &[],
            &[Worktree],
            false
        ),
        feature_spec!(
            "gh_test_lines_per_kloc",
            "Test lines per 1000 source lines",
            "snapshot",
            Float,
            "repo_snapshot_features",
            &["gh_sloc"],
            &[Worktree],
            false
        ),
        feature_spec!(
            "gh_team_size",
            "Distinct committers + PR-mergers in the last 90 days",
            "team",
            Integer,
            "team_stats_features",
            &[],
            &[BareRepo],
            false
        ),
        feature_spec!(
            "gh_by_core_team_member",
            "Whether the triggering author is a core team member",
            "team",
            Boolean,
            "team_stats_features",
            &["gh_team_size"],
            &[BareRepo, BuildRun],
            false
        ),
        feature_spec!(
            "gh_num_commits_on_files_touched",
            "Commits on touched files in the last 90 days",
            "team",
            Integer,
            "team_stats_features",
            &[],
            &[BareRepo, Worktree],
            false
        ),
        feature_spec!(
            "tests_ran",
            "Total test cases executed",
            "build_log",
            Integer,
            "build_log_features",
            &[],
            &[BuildLogs],
            false
        ),
        feature_spec!(
            "tests_failed",
            "Total test cases failed",
            "build_log",
            Integer,
            "build_log_features",
            &["tests_ran"],
            &[BuildLogs],
            false
        ),
        feature_spec!(
            "tests_fail_rate",
            "tests_failed / tests_ran",
            "build_log",
            Float,
            "build_log_features",
            &["tests_ran", "tests_failed"],
            &[BuildLogs],
            false
        ),
        feature_spec!(
            "tests_duration_seconds",
            "Total reported test duration",
            "build_log",
            Float,
            "build_log_features",
            &[],
            &[BuildLogs],
            false
        ),
        feature_spec!(
            "gh_pr_comment_count",
            "PR comments on the triggering pull request",
            "discussion",
            Integer,
            "github_discussion_features",
            &[],
            &[GithubApiClient],
            true
        ),
        feature_spec!(
            "gh_issue_comment_count",
            "Issue comments linked to the triggering commit",
            "discussion",
            Integer,
            "github_discussion_features",
            &[],
            &[GithubApiClient],
            true
        ),
        feature_spec!(
            "sonar_bugs",
            "Open bugs reported by SonarQube at build time",
            "static_analysis",
            Integer,
            "sonar_scan_features",
            &[],
            &[ScanReport],
            true
        ),
        feature_spec!(
            "sonar_code_smells",
            "Open code smells reported by SonarQube",
            "static_analysis",
            Integer,
            "sonar_scan_features",
            &[],
            &[ScanReport],
            true
        ),
        feature_spec!(
            "trivy_vulnerabilities_critical",
            "Critical-severity vulnerabilities reported by Trivy",
            "static_analysis",
            Integer,
            "trivy_scan_features",
            &[],
            &[ScanReport],
            true
        ),
        feature_spec!(
            "trivy_vulnerabilities_high",
            "High-severity vulnerabilities reported by Trivy",
            "static_analysis",
            Integer,
            "trivy_scan_features",
            &[],
            &[ScanReport],
            true
        ),
    ];

    specs.into_iter().map(|s| (s.name, s)).collect()
});

pub fn lookup(name: &str) -> Option<&'static FeatureSpec> {
    FEATURE_REGISTRY.get(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_keys_match_spec_names() {
        for (key, spec) in FEATURE_REGISTRY.iter() {
            assert_eq!(*key, spec.name);
        }
    }

    #[test]
    fn every_feature_dep_resolves_to_a_registered_feature() {
        for spec in FEATURE_REGISTRY.values() {
            for dep in spec.feature_deps {
                assert!(
                    FEATURE_REGISTRY.contains_key(dep),
                    "{} depends on unregistered feature {}",
                    spec.name,
                    dep
                );
            }
        }
    }
}
