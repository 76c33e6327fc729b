//! `buildrisk` - operator CLI for the CI build-risk ingestion pipeline.
//!
//! Every subcommand builds a fresh `Orchestrator` against an embedded
//! SurrealDB instance (see `buildrisk_orchestrator::build_default`), runs
//! one operation, and exits. Long-lived ingestion belongs to `buildriskd`.

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::Level;
use uuid::Uuid;

use buildrisk_domain::ids::RepoConfigId;
use buildrisk_domain::{CiProvider, ImportConstraints};
use buildrisk_orchestrator::export::{ExportFormat, ExportJobRequest};
use buildrisk_orchestrator::operations::ImportRepositoryRequest;
use buildrisk_orchestrator::{build_default, Orchestrator, OrchestratorConfig};

#[derive(Parser)]
#[command(name = "buildrisk")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "CI build-risk feature ingestion pipeline", long_about = None)]
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
    /// Register a repository and start its initial ingestion
    Import {
        /// `owner/repo`
        full_name: String,
        /// The CI provider's own identifier for this repository
        #[arg(long)]
        provider_repo_id: String,
        /// CI provider: github, gitlab, jenkins, circleci, travis
        #[arg(long)]
        provider: String,
        #[arg(long, default_value = "main")]
        default_branch: String,
        /// Stop after this many builds (unbounded if omitted)
        #[arg(long)]
        max_builds: Option<u64>,
        /// Only import builds from the last N days
        #[arg(long)]
        since_days: Option<u32>,
        /// Skip builds with no downloadable logs
        #[arg(long)]
        only_with_logs: bool,
        /// Comma-separated feature names to extract (all registered features if omitted)
        #[arg(long)]
        features: Option<String>,
    },

    /// Re-run `ImportRepository`'s fetch-pages loop against an existing config
    Sync {
        config_id: String,
    },

    /// Extract features for every `Ingested` build not yet processed
    Process {
        config_id: String,
    },

    /// Reset `Failed` ingestion builds to `Pending` and redispatch them
    RetryIngestion {
        config_id: String,
    },

    /// Reset `Failed` training builds to `Pending` and re-extract them
    RetryProcessing {
        config_id: String,
    },

    /// Cascade-delete a repo config and everything it owns
    Delete {
        config_id: String,
    },

    /// Show ingestion/processing counters for a repo config
    Progress {
        config_id: String,
    },

    /// Export completed (and optionally partial) training builds
    Export {
        /// One or more repo config IDs to export
        #[arg(required = true)]
        config_ids: Vec<String>,
        /// Comma-separated feature columns (all registered features if omitted)
        #[arg(long)]
        features: Option<String>,
        #[arg(long, value_enum, default_value = "csv")]
        format: ExportFormatArg,
        /// Include builds with Partial extraction status
        #[arg(long)]
        include_partial: bool,
        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Show the data-quality report for a repo config
    Quality {
        config_id: String,
    },
}

#[derive(Clone, clap::ValueEnum)]
enum ExportFormatArg {
    Csv,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    init_tracing(cli.json, level);

    let orchestrator = build_default(OrchestratorConfig::from_env())
        .await
        .context("failed to assemble orchestrator")?;

    match cli.command {
        Commands::Import {
            full_name,
            provider_repo_id,
            provider,
            default_branch,
            max_builds,
            since_days,
            only_with_logs,
            features,
        } => {
            let provider = parse_provider(&provider)?;
            let requested_features = features
                .map(|f| f.split(',').map(str::trim).map(String::from).collect())
                .unwrap_or_default();
            let constraints = ImportConstraints {
                max_builds,
                since_days,
                only_with_logs,
                ..ImportConstraints::default()
            };
            let config = orchestrator
                .import_repository(ImportRepositoryRequest {
                    full_name,
                    provider_repo_id,
                    provider,
                    default_branch,
                    constraints,
                    requested_features,
                })
                .await?;
            println!("{}", serde_json::to_string_pretty(&config.status)?);
            println!("repo config: {}", config.id);
        }
        Commands::Sync { config_id } => {
            let config = orchestrator.sync_repository(&parse_config_id(&config_id)?).await?;
            println!("{:?}", config.status);
        }
        Commands::Process { config_id } => {
            let status = orchestrator.dispatch_processing(&parse_config_id(&config_id)?).await?;
            println!("{:?}", status);
        }
        Commands::RetryIngestion { config_id } => {
            let config = orchestrator.retry_failed_ingestion(&parse_config_id(&config_id)?).await?;
            println!("{:?}", config.status);
        }
        Commands::RetryProcessing { config_id } => {
            let config = orchestrator.retry_failed_processing(&parse_config_id(&config_id)?).await?;
            println!("{:?}", config.status);
        }
        Commands::Delete { config_id } => {
            orchestrator.delete_repository(&parse_config_id(&config_id)?).await?;
            println!("deleted {config_id}");
        }
        Commands::Progress { config_id } => {
            let progress = orchestrator.get_import_progress(&parse_config_id(&config_id)?).await?;
            print_progress(&progress);
        }
        Commands::Export { config_ids, features, format, include_partial, output } => {
            run_export(&orchestrator, config_ids, features, format, include_partial, output).await?;
        }
        Commands::Quality { config_id } => {
            let report = orchestrator.get_data_quality_report(&parse_config_id(&config_id)?).await?;
            print_quality_report(&report);
        }
    }

    Ok(())
}

fn init_tracing(json: bool, level: Level) {
    let subscriber = tracing_subscriber::fmt().with_max_level(level);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

fn parse_provider(s: &str) -> Result<CiProvider> {
    match s.to_lowercase().as_str() {
        "github" => Ok(CiProvider::GitHub),
        "gitlab" => Ok(CiProvider::GitLab),
        "jenkins" => Ok(CiProvider::Jenkins),
        "circleci" => Ok(CiProvider::CircleCi),
        "travis" => Ok(CiProvider::Travis),
        other => bail!("unknown provider: {other} (expected github, gitlab, jenkins, circleci, or travis)"),
    }
}

fn parse_config_id(s: &str) -> Result<RepoConfigId> {
    Ok(RepoConfigId(Uuid::from_str(s).context("invalid repo config id")?))
}

async fn run_export(
    orchestrator: &Orchestrator,
    config_ids: Vec<String>,
    features: Option<String>,
    format: ExportFormatArg,
    include_partial: bool,
    output: Option<PathBuf>,
) -> Result<()> {
    let repo_config_ids = config_ids
        .iter()
        .map(|s| parse_config_id(s))
        .collect::<Result<Vec<_>>>()?;
    let features = features
        .map(|f| f.split(',').map(str::trim).map(String::from).collect())
        .unwrap_or_default();
    let format = match format {
        ExportFormatArg::Csv => ExportFormat::Csv,
        ExportFormatArg::Json => ExportFormat::Json,
    };
    let req = ExportJobRequest { repo_config_ids, features, format, include_partial };

    let rows = match output {
        Some(path) => {
            let file = std::fs::File::create(&path).with_context(|| format!("failed to create {path:?}"))?;
            orchestrator.run_export_job(req, file).await?
        }
        None => orchestrator.run_export_job(req, std::io::stdout()).await?,
    };
    eprintln!("exported {rows} builds");
    Ok(())
}

fn print_progress(progress: &buildrisk_orchestrator::operations::ImportProgress) {
    println!("status: {:?}", progress.status);
    println!("builds fetched/completed/failed: {}/{}/{}", progress.builds_fetched, progress.builds_completed, progress.builds_failed);
    println!(
        "ingestion pending/ingested/missing_resource/failed: {}/{}/{}/{}",
        progress.ingestion_builds_pending,
        progress.ingestion_builds_ingested,
        progress.ingestion_builds_missing_resource,
        progress.ingestion_builds_failed,
    );
    println!(
        "training completed/partial/failed: {}/{}/{}",
        progress.training_builds_completed, progress.training_builds_partial, progress.training_builds_failed,
    );
}

fn print_quality_report(report: &buildrisk_orchestrator::data_quality::DataQualityReport) {
    println!("repo config: {}", report.repo_config_id);
    println!("total builds: {}", report.total_builds);
    println!("completed/partial/failed: {}/{}/{}", report.completed_builds, report.partial_builds, report.failed_builds);
    match report.completeness_ratio {
        Some(ratio) => println!("completeness ratio: {ratio:.3}"),
        None => println!("completeness ratio: n/a (no scorable builds)"),
    }
    println!("avg retry count: {:.2}", report.avg_retry_count);
    println!("feature presence:");
    let mut features: Vec<_> = report.feature_presence_ratio.iter().collect();
    features.sort_by(|a, b| a.0.cmp(b.0));
    for (feature, ratio) in features {
        println!("  {feature}: {ratio:.3}");
    }
}
