//! Persistence layer: backend-agnostic traits plus a SurrealDB implementation
//! and in-memory fakes for tests.

pub mod error;
pub mod fakes;
pub mod storage_traits;
pub mod surreal;

pub use error::{Result, StateError};
pub use fakes::MemoryStateStore;
pub use storage_traits::{
    AuditLogStore, BuildRunCatalog, IngestionLedger, RepoConfigStore, RepositoryCatalog,
    StateStore, TrainingStore,
};
pub use surreal::SurrealStateStore;
