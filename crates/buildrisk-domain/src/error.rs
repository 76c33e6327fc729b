use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("invalid content digest: {value}")]
    InvalidDigest { value: String },

    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, DomainError>;
