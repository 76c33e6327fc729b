//! Shared domain entities for the build-risk ingestion pipeline.
//!
//! These types are storage-agnostic; `buildrisk-state` persists them.

pub mod build;
pub mod digest;
pub mod error;
pub mod ids;
pub mod ingestion;
pub mod repo;
pub mod training;

pub use build::{CiConclusion, CiStatus, RawBuildRun};
pub use digest::ContentDigest;
pub use error::{DomainError, Result};
pub use ingestion::{
    ImportConstraints, IngestionBuild, IngestionStatus, RepoConfig, RepoConfigStatus,
    ResourceKind, ResourceOutcome, ResourceState,
};
pub use repo::{CiProvider, RawRepository};
pub use training::{
    ExtractionStatus, FeatureAuditLog, FeatureMap, FeatureValue, NodeAuditEntry, NodeStatus,
    TrainingBuild,
};
