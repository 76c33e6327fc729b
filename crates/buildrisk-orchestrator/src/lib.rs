//! Chord-structured orchestration core for the build-risk ingestion
//! pipeline: §4.3's ingest -> process stages plus the §6/§10.4 operator
//! surface, all built on the `chord` fan-out/fan-in primitive.

pub mod bootstrap;
pub mod chord;
pub mod config;
pub mod data_quality;
pub mod error;
pub mod export;
pub mod ingest;
pub mod operations;
pub mod orchestrator;
pub mod process;
pub mod tick;
pub mod webhook;

pub use bootstrap::build_default;
pub use config::OrchestratorConfig;
pub use data_quality::DataQualityReport;
pub use error::{OrchestratorError, Result};
pub use export::{ExportFormat, ExportJobRequest};
pub use operations::{ImportProgress, ImportRepositoryRequest};
pub use orchestrator::Orchestrator;
pub use tick::TickSummary;
pub use webhook::WebhookOutcome;
