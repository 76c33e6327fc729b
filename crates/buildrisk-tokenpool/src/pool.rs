//! Atomic round-robin token selection with rate-limit cooldown (§4.2).
//!
//! The acquire protocol must be a single atomic transaction. In-process this
//! is a `tokio::sync::Mutex` guarding the whole priority list, serializing
//! mutation of shared state through one lock rather than field-level locks.
//! A multi-process deployment would swap the in-memory list for a
//! coordination store (Redis) and execute steps 1-3 of `acquire` as a single
//! Lua script;
//! the trait boundary below (`TokenPool`) is where that swap happens.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use crate::error::{Result, TokenPoolError};
use crate::token::{hash_secret, RateLimitInfo, TokenRecord, TokenStatus};

/// Minimum cooldown applied after a secondary (abuse-detection) rate limit,
/// per SPEC_FULL.md/DESIGN.md's resolution of the "exact backoff parameters"
/// open question.
pub const SECONDARY_RATE_LIMIT_FLOOR: StdDuration = StdDuration::from_secs(60);

/// A token handed out by `acquire`; callers use `secret` for the API call
/// and report back via `record_success`/`record_secondary_rate_limit` using
/// `hash` to identify which token to update.
#[derive(Debug, Clone)]
pub struct AcquiredToken {
    pub hash: String,
    pub secret: String,
}

struct PoolState {
    tokens: Vec<TokenRecord>,
    secrets: HashMap<String, String>,
}

/// Shared, rate-limit-aware selector over a set of GitHub API tokens.
pub struct TokenPool {
    state: Arc<Mutex<PoolState>>,
}

impl TokenPool {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PoolState {
                tokens: Vec::new(),
                secrets: HashMap::new(),
            })),
        }
    }

    /// Seed the pool from configured secrets (`GITHUB_TOKENS`, §6).
    pub async fn seed(&self, secrets: impl IntoIterator<Item = String>) {
        let mut state = self.state.lock().await;
        for (i, secret) in secrets.into_iter().enumerate() {
            let hash = hash_secret(&secret);
            state.secrets.insert(hash.clone(), secret);
            state
                .tokens
                .push(TokenRecord::new(hash, format!("seed-{i}")));
        }
    }

    /// Steps 1-4 of the acquire protocol (§4.2), executed under one lock so
    /// no two concurrent callers can observe and claim the same token.
    #[instrument(skip(self))]
    pub async fn acquire(&self) -> Result<AcquiredToken> {
        let mut state = self.state.lock().await;
        if state.tokens.is_empty() {
            return Err(TokenPoolError::PoolEmpty);
        }

        let now = Utc::now();

        // Drop cooldowns that have already expired (step 2's "else delete it").
        for token in state.tokens.iter_mut() {
            if let Some(until) = token.cooldown_until {
                if until <= now {
                    token.cooldown_until = None;
                    if token.status == TokenStatus::RateLimited {
                        token.status = TokenStatus::Active;
                    }
                }
            }
        }

        // Highest remaining quota first (priority-sorted, step 1).
        state
            .tokens
            .sort_by(|a, b| b.priority.cmp(&a.priority));

        let mut earliest_reset: Option<DateTime<Utc>> = None;
        let mut selected_index: Option<usize> = None;

        for (i, token) in state.tokens.iter().enumerate() {
            if token.status == TokenStatus::Invalid || token.status == TokenStatus::Disabled {
                continue;
            }
            if let Some(until) = token.cooldown_until {
                if until > now {
                    earliest_reset = Some(match earliest_reset {
                        Some(existing) if existing <= until => existing,
                        _ => until,
                    });
                    continue;
                }
            }
            selected_index = Some(i);
            break;
        }

        let Some(index) = selected_index else {
            let retry_at = earliest_reset.ok_or(TokenPoolError::PoolEmpty)?;
            warn!(%retry_at, "all tokens rate-limited");
            return Err(TokenPoolError::AllRateLimited { retry_at });
        };

        let token = &mut state.tokens[index];
        token.request_count += 1;
        token.last_used_at = Some(now);
        let hash = token.hash.clone();
        let secret = state
            .secrets
            .get(&hash)
            .cloned()
            .ok_or_else(|| TokenPoolError::UnknownToken { hash: hash.clone() })?;

        Ok(AcquiredToken { hash, secret })
    }

    /// Update protocol: record an observed `X-RateLimit-*` response (§4.2).
    #[instrument(skip(self))]
    pub async fn record_response(
        &self,
        hash: &str,
        remaining: i64,
        limit: i64,
        reset_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let token = state
            .tokens
            .iter_mut()
            .find(|t| t.hash == hash)
            .ok_or_else(|| TokenPoolError::UnknownToken {
                hash: hash.to_string(),
            })?;

        token.priority = remaining;
        token.rate_limit = Some(RateLimitInfo {
            remaining,
            limit,
            reset_at,
        });

        if remaining == 0 {
            token.cooldown_until = Some(reset_at + Duration::seconds(5));
            token.status = TokenStatus::RateLimited;
        }
        Ok(())
    }

    /// Abuse-detection backoff: HTTP 403 body contains "secondary rate limit".
    #[instrument(skip(self))]
    pub async fn record_secondary_rate_limit(
        &self,
        hash: &str,
        retry_after: Option<StdDuration>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let token = state
            .tokens
            .iter_mut()
            .find(|t| t.hash == hash)
            .ok_or_else(|| TokenPoolError::UnknownToken {
                hash: hash.to_string(),
            })?;

        let cooldown = retry_after
            .unwrap_or(SECONDARY_RATE_LIMIT_FLOOR)
            .max(SECONDARY_RATE_LIMIT_FLOOR);
        token.cooldown_until = Some(Utc::now() + Duration::from_std(cooldown).unwrap());
        token.status = TokenStatus::RateLimited;
        info!(hash, cooldown_secs = cooldown.as_secs(), "secondary rate limit cooldown applied");
        Ok(())
    }

    /// HTTP 401: token is permanently excluded until an operator re-seeds it.
    #[instrument(skip(self))]
    pub async fn mark_invalid(&self, hash: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let token = state
            .tokens
            .iter_mut()
            .find(|t| t.hash == hash)
            .ok_or_else(|| TokenPoolError::UnknownToken {
                hash: hash.to_string(),
            })?;
        token.status = TokenStatus::Invalid;
        Ok(())
    }

    pub async fn snapshot(&self) -> Vec<TokenRecord> {
        self.state.lock().await.tokens.clone()
    }
}

impl Default for TokenPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prefers_token_with_highest_remaining_quota() {
        let pool = TokenPool::new();
        pool.seed(["token-a".to_string(), "token-b".to_string()]).await;

        let hash_a = hash_secret("token-a");
        let hash_b = hash_secret("token-b");
        pool.record_response(&hash_a, 10, 5000, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        pool.record_response(&hash_b, 4000, 5000, Utc::now() + Duration::hours(1))
            .await
            .unwrap();

        let acquired = pool.acquire().await.unwrap();
        assert_eq!(acquired.hash, hash_b);
    }

    #[tokio::test]
    async fn all_rate_limited_carries_earliest_reset() {
        let pool = TokenPool::new();
        pool.seed(["token-a".to_string(), "token-b".to_string()]).await;
        let hash_a = hash_secret("token-a");
        let hash_b = hash_secret("token-b");

        let now = Utc::now();
        pool.record_response(&hash_a, 0, 5000, now + Duration::seconds(30))
            .await
            .unwrap();
        pool.record_response(&hash_b, 0, 5000, now + Duration::seconds(120))
            .await
            .unwrap();

        let err = pool.acquire().await.unwrap_err();
        match err {
            TokenPoolError::AllRateLimited { retry_at } => {
                assert!(retry_at <= now + Duration::seconds(35));
            }
            other => panic!("expected AllRateLimited, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn secondary_rate_limit_floor_is_sixty_seconds() {
        let pool = TokenPool::new();
        pool.seed(["token-a".to_string()]).await;
        let hash_a = hash_secret("token-a");

        let before = Utc::now();
        pool.record_secondary_rate_limit(&hash_a, Some(StdDuration::from_secs(5)))
            .await
            .unwrap();

        let snapshot = pool.snapshot().await;
        let token = snapshot.iter().find(|t| t.hash == hash_a).unwrap();
        let until = token.cooldown_until.unwrap();
        assert!(until >= before + Duration::seconds(59));
    }

    #[tokio::test]
    async fn invalid_token_is_never_selected() {
        let pool = TokenPool::new();
        pool.seed(["token-a".to_string(), "token-b".to_string()]).await;
        let hash_a = hash_secret("token-a");
        pool.mark_invalid(&hash_a).await.unwrap();

        let acquired = pool.acquire().await.unwrap();
        assert_eq!(acquired.hash, hash_secret("token-b"));
    }

    #[tokio::test]
    async fn expired_cooldown_is_cleared_and_token_becomes_selectable_again() {
        let pool = TokenPool::new();
        pool.seed(["token-a".to_string()]).await;
        let hash_a = hash_secret("token-a");

        pool.record_response(&hash_a, 0, 5000, Utc::now() - Duration::seconds(10))
            .await
            .unwrap();

        // reset_at + 5s cooldown already in the past: acquire should clear it.
        let acquired = pool.acquire().await.unwrap();
        assert_eq!(acquired.hash, hash_a);
    }
}
