use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("lock '{0}' not acquired before timeout")]
    LockTimeout(String),

    #[error("git command failed: {0}")]
    Git(String),

    #[error("resource missing: {0}")]
    MissingResource(String),

    #[error("provider error: {0}")]
    Provider(#[from] buildrisk_providers::ProviderError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ResourceError>;
