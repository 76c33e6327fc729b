//! Distributed-lock abstraction (§4.4: "clone:{repo_id}", "worktree:{repo_id}:{short_sha}").
//!
//! Production deployments back this with a Redis-equivalent coordination
//! store; the in-memory implementation here gives a single process the same
//! TTL semantics for tests and single-node operation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{ResourceError, Result};

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Blocks up to `wait_timeout` trying to acquire `key` for `lease`. Returns
    /// a guard that releases on drop via `release`.
    async fn acquire(&self, key: &str, lease: StdDuration, wait_timeout: StdDuration) -> Result<()>;

    async fn release(&self, key: &str);
}

#[derive(Default)]
pub struct InMemoryLockStore {
    held: Mutex<HashMap<String, Instant>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn acquire(&self, key: &str, lease: StdDuration, wait_timeout: StdDuration) -> Result<()> {
        let deadline = Instant::now() + wait_timeout;
        loop {
            {
                let mut held = self.held.lock().await;
                let now = Instant::now();
                let expired = held.get(key).map(|until| *until <= now).unwrap_or(true);
                if expired {
                    held.insert(key.to_string(), now + lease);
                    return Ok(());
                }
            }
            if Instant::now() >= deadline {
                return Err(ResourceError::LockTimeout(key.to_string()));
            }
            tokio::time::sleep(StdDuration::from_millis(25)).await;
        }
    }

    async fn release(&self, key: &str) {
        self.held.lock().await.remove(key);
    }
}

/// RAII handle releasing its lock key when dropped-via-explicit-`release`.
/// Callers must call `release` explicitly (the store is behind `Arc<dyn
/// LockStore>`, so a real `Drop` impl would need to block in an async
/// context); this mirrors the acquire/release pairing the orchestrator
/// actually uses around bare-clone and worktree sections.
pub struct LockGuard {
    pub key: String,
    pub store: Arc<dyn LockStore>,
}

impl LockGuard {
    pub async fn acquire(
        store: Arc<dyn LockStore>,
        key: impl Into<String>,
        lease: StdDuration,
        wait_timeout: StdDuration,
    ) -> Result<Self> {
        let key = key.into();
        store.acquire(&key, lease, wait_timeout).await?;
        Ok(Self { key, store })
    }

    pub async fn release(self) {
        self.store.release(&self.key).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_blocks_until_release() {
        let store = Arc::new(InMemoryLockStore::new());
        let guard = LockGuard::acquire(
            store.clone(),
            "clone:repo-1",
            StdDuration::from_secs(60),
            StdDuration::from_millis(50),
        )
        .await
        .unwrap();

        let err = store
            .acquire(
                "clone:repo-1",
                StdDuration::from_secs(60),
                StdDuration::from_millis(50),
            )
            .await;
        assert!(err.is_err());

        guard.release().await;
        store
            .acquire(
                "clone:repo-1",
                StdDuration::from_secs(60),
                StdDuration::from_millis(50),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn lock_expires_after_lease() {
        let store = InMemoryLockStore::new();
        store
            .acquire("worktree:r:abc123", StdDuration::from_millis(10), StdDuration::from_millis(10))
            .await
            .unwrap();
        tokio::time::sleep(StdDuration::from_millis(30)).await;
        store
            .acquire("worktree:r:abc123", StdDuration::from_secs(60), StdDuration::from_millis(10))
            .await
            .unwrap();
    }
}
