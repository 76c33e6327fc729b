use chrono::{DateTime, Utc};
use thiserror::Error;

/// Mirrors §7's error-kind taxonomy at the provider boundary; the
/// orchestrator matches on these variants rather than on HTTP status codes.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("retryable provider error: {0}")]
    Retryable(String),

    #[error("primary rate limit exhausted, reset at {reset_at}")]
    RateLimitedPrimary { reset_at: DateTime<Utc> },

    #[error("secondary rate limit (abuse detection), retry after {retry_after_secs}s")]
    RateLimitedSecondary { retry_after_secs: u64 },

    #[error("resource not found")]
    NotFound,

    #[error("permanent provider error: {0}")]
    Permanent(String),
}

pub type Result<T> = std::result::Result<T, ProviderError>;
