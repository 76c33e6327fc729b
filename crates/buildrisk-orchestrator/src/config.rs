//! Process-level tunables the orchestrator reads (§6 "Configuration", §10.3).
//!
//! Plain struct with sane defaults, reading environment variables inline
//! rather than through a dedicated config crate. The `clap::Parser` structs
//! in `buildrisk-cli`/`buildriskd` build one of these from flags/env and
//! hand it to `Orchestrator::new`.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub ingestion_builds_per_page: u32,
    pub processing_builds_per_batch: usize,
    pub log_unavailable_threshold: u32,
    pub repos_dir: PathBuf,
    pub worktrees_dir: PathBuf,
    pub max_concurrent_ingestion: usize,
    pub max_concurrent_processing: usize,
    /// Soft deadline for one `dispatch_processing` batch; builds not yet
    /// processed when it elapses are marked Failed with "timeout" (§5).
    pub processing_soft_deadline: Duration,
    pub processing_hard_deadline: Duration,
    pub scan_builds_per_query: u32,
    pub scan_commits_per_batch: u32,
    pub scan_batch_delay_seconds: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            ingestion_builds_per_page: 50,
            processing_builds_per_batch: 50,
            log_unavailable_threshold: 5,
            repos_dir: PathBuf::from("./data/repos"),
            worktrees_dir: PathBuf::from("./data/worktrees"),
            max_concurrent_ingestion: 8,
            max_concurrent_processing: 8,
            processing_soft_deadline: Duration::from_secs(30 * 60),
            processing_hard_deadline: Duration::from_secs(35 * 60),
            scan_builds_per_query: 20,
            scan_commits_per_batch: 10,
            scan_batch_delay_seconds: 5,
        }
    }
}

impl OrchestratorConfig {
    /// Reads each key with a fallback to the struct default rather than
    /// failing hard.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ingestion_builds_per_page: env_or("INGESTION_BUILDS_PER_PAGE", defaults.ingestion_builds_per_page),
            processing_builds_per_batch: env_or(
                "PROCESSING_BUILDS_PER_BATCH",
                defaults.processing_builds_per_batch as u64,
            ) as usize,
            log_unavailable_threshold: env_or("LOG_UNAVAILABLE_THRESHOLD", defaults.log_unavailable_threshold),
            repos_dir: std::env::var("REPOS_DIR").map(PathBuf::from).unwrap_or(defaults.repos_dir),
            worktrees_dir: std::env::var("WORKTREES_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.worktrees_dir),
            scan_builds_per_query: env_or("SCAN_BUILDS_PER_QUERY", defaults.scan_builds_per_query),
            scan_commits_per_batch: env_or("SCAN_COMMITS_PER_BATCH", defaults.scan_commits_per_batch),
            scan_batch_delay_seconds: env_or("SCAN_BATCH_DELAY_SECONDS", defaults.scan_batch_delay_seconds),
            ..defaults
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
