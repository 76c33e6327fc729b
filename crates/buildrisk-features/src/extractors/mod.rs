//! Concrete extractor nodes (§4.6).

pub mod build_log_features;
pub mod git_commit_info;
pub mod git_diff_features;
pub mod github_discussion_features;
pub mod repo_snapshot_features;
pub mod scan_features;
pub mod team_stats_features;

pub use build_log_features::BuildLogFeaturesNode;
pub use git_commit_info::GitCommitInfoNode;
pub use git_diff_features::GitDiffFeaturesNode;
pub use github_discussion_features::GithubDiscussionFeaturesNode;
pub use repo_snapshot_features::RepoSnapshotFeaturesNode;
pub use scan_features::{ScanTool, ScanToolConfig, SonarQubeClient, SonarScanFeaturesNode, TrivyClient, TrivyScanFeaturesNode};
pub use team_stats_features::TeamStatsFeaturesNode;
