//! `buildriskd` - the ingestion daemon. Runs `Orchestrator::run_background_tick`
//! on a fixed interval so every known `RepoConfig` keeps moving through
//! ingestion/processing without an operator driving the CLI by hand. The
//! HTTP surface that would front this (webhook receiver, dashboard API) is
//! explicitly out of scope; `verify-webhook` below is an operator utility
//! for testing a secret rotation offline, not a server.

use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::{error, info, Level};

use buildrisk_orchestrator::{build_default, webhook::verify_signature, OrchestratorConfig};

#[derive(Parser)]
#[command(name = "buildriskd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "buildrisk ingestion daemon", long_about = None)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon's background tick loop until interrupted
    Run {
        #[command(flatten)]
        config: DaemonConfigArgs,
    },

    /// Check a request body against a GitHub webhook signature, offline
    VerifyWebhook {
        #[arg(long, env = "GITHUB_WEBHOOK_SECRET")]
        secret: String,
        /// Path to the raw request body
        #[arg(long)]
        body_file: std::path::PathBuf,
        /// The `X-Hub-Signature-256` header value
        #[arg(long)]
        signature: String,
    },
}

/// Every §6 configuration key, as CLI flags with matching env fallbacks.
#[derive(Args)]
struct DaemonConfigArgs {
    #[arg(long, env = "INGESTION_BUILDS_PER_PAGE", default_value_t = 50)]
    ingestion_builds_per_page: u32,

    #[arg(long, env = "PROCESSING_BUILDS_PER_BATCH", default_value_t = 50)]
    processing_builds_per_batch: usize,

    #[arg(long, env = "LOG_UNAVAILABLE_THRESHOLD", default_value_t = 5)]
    log_unavailable_threshold: u32,

    #[arg(long, env = "REPOS_DIR", default_value = "./data/repos")]
    repos_dir: std::path::PathBuf,

    #[arg(long, env = "WORKTREES_DIR", default_value = "./data/worktrees")]
    worktrees_dir: std::path::PathBuf,

    #[arg(long, env = "SCAN_BUILDS_PER_QUERY", default_value_t = 20)]
    scan_builds_per_query: u32,

    #[arg(long, env = "SCAN_COMMITS_PER_BATCH", default_value_t = 10)]
    scan_commits_per_batch: u32,

    /// Also doubles as the background tick's poll interval.
    #[arg(long, env = "SCAN_BATCH_DELAY_SECONDS", default_value_t = 5)]
    scan_batch_delay_seconds: u64,

    /// Comma-separated GitHub API tokens (consumed directly by
    /// `buildrisk_orchestrator::build_default`, not threaded through here).
    #[arg(long, env = "GITHUB_TOKENS", hide_env_values = true, default_value = "")]
    github_tokens: String,
}

impl From<DaemonConfigArgs> for OrchestratorConfig {
    fn from(args: DaemonConfigArgs) -> Self {
        let defaults = OrchestratorConfig::default();
        Self {
            ingestion_builds_per_page: args.ingestion_builds_per_page,
            processing_builds_per_batch: args.processing_builds_per_batch,
            log_unavailable_threshold: args.log_unavailable_threshold,
            repos_dir: args.repos_dir,
            worktrees_dir: args.worktrees_dir,
            scan_builds_per_query: args.scan_builds_per_query,
            scan_commits_per_batch: args.scan_commits_per_batch,
            scan_batch_delay_seconds: args.scan_batch_delay_seconds,
            ..defaults
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Run { config } => run_daemon(config).await,
        Commands::VerifyWebhook { secret, body_file, signature } => {
            let body = std::fs::read(&body_file).with_context(|| format!("failed to read {body_file:?}"))?;
            if verify_signature(secret.as_bytes(), &body, &signature) {
                println!("signature OK");
                Ok(())
            } else {
                anyhow::bail!("signature mismatch")
            }
        }
    }
}

async fn run_daemon(args: DaemonConfigArgs) -> Result<()> {
    let tick_interval = Duration::from_secs(args.scan_batch_delay_seconds.max(1));
    let config: OrchestratorConfig = args.into();

    let orchestrator = build_default(config)
        .await
        .context("failed to assemble orchestrator")?;

    info!(tick_interval_secs = tick_interval.as_secs(), "buildriskd starting");

    let mut interval = tokio::time::interval(tick_interval);
    loop {
        interval.tick().await;
        if let Err(err) = orchestrator.run_background_tick().await {
            error!(error = %err, "background tick failed");
        }
    }
}

fn init_tracing(json: bool, level: Level) {
    let subscriber = tracing_subscriber::fmt().with_max_level(level);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn daemon_config_args_map_onto_orchestrator_config() {
        let args = DaemonConfigArgs {
            ingestion_builds_per_page: 10,
            processing_builds_per_batch: 20,
            log_unavailable_threshold: 3,
            repos_dir: "./r".into(),
            worktrees_dir: "./w".into(),
            scan_builds_per_query: 1,
            scan_commits_per_batch: 2,
            scan_batch_delay_seconds: 7,
            github_tokens: String::new(),
        };
        let config: OrchestratorConfig = args.into();
        assert_eq!(config.ingestion_builds_per_page, 10);
        assert_eq!(config.scan_batch_delay_seconds, 7);
    }
}
