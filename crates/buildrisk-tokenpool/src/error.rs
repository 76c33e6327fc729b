use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TokenPoolError {
    /// Every token is on cooldown. Carries the earliest reset time so the
    /// orchestrator can back off to it instead of busy-polling (§4.2, §5).
    #[error("all tokens rate-limited, earliest reset at {retry_at}")]
    AllRateLimited { retry_at: DateTime<Utc> },

    #[error("token pool is empty, no tokens configured")]
    PoolEmpty,

    #[error("unknown token hash: {hash}")]
    UnknownToken { hash: String },
}

pub type Result<T> = std::result::Result<T, TokenPoolError>;
