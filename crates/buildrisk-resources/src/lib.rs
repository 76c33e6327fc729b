//! Turns repo/build identities into on-disk resources for extractors (§4.4).

pub mod acquirer;
pub mod error;
pub mod git;
pub mod lock;

pub use acquirer::{CloneAuth, ResourceAcquirer};
pub use error::{ResourceError, Result};
pub use git::{CommitInfo, GitBackend, NumstatEntry, SubprocessGitBackend};
pub use lock::{InMemoryLockStore, LockGuard, LockStore};
