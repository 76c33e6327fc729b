//! Token record shape (§3's "Token record (in-pool)").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenStatus {
    Active,
    RateLimited,
    Invalid,
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitInfo {
    pub remaining: i64,
    pub limit: i64,
    pub reset_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    pub hash: String,
    pub label: String,
    /// Equals `rate_limit.remaining` after the first observed response;
    /// defaults to `i64::MAX` so unused tokens sort first (§3 invariant:
    /// "Token priority equals last-observed rate_limit_remaining").
    pub priority: i64,
    pub rate_limit: Option<RateLimitInfo>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub status: TokenStatus,
    pub request_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl TokenRecord {
    pub fn new(hash: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            label: label.into(),
            priority: i64::MAX,
            rate_limit: None,
            cooldown_until: None,
            status: TokenStatus::Active,
            request_count: 0,
            last_used_at: None,
        }
    }

    pub fn is_on_cooldown(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.map(|until| until > now).unwrap_or(false)
    }

    pub fn is_selectable(&self, now: DateTime<Utc>) -> bool {
        matches!(self.status, TokenStatus::Active | TokenStatus::RateLimited) && !self.is_on_cooldown(now)
    }
}

pub fn hash_secret(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_and_hides_the_secret() {
        let h1 = hash_secret("ghp_example");
        let h2 = hash_secret("ghp_example");
        assert_eq!(h1, h2);
        assert_ne!(h1, "ghp_example");
    }

    #[test]
    fn fresh_token_has_no_cooldown() {
        let token = TokenRecord::new("abc", "seed-1");
        assert!(!token.is_on_cooldown(Utc::now()));
        assert!(token.is_selectable(Utc::now()));
    }
}
