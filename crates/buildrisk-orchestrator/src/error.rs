use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("illegal status transition: {0}")]
    IllegalTransition(String),

    #[error("repo config {0} not found")]
    RepoConfigNotFound(String),

    #[error("no provider adapter registered for {0:?}")]
    UnregisteredProvider(buildrisk_domain::CiProvider),

    #[error("chord '{0}' failed catastrophically: {1}")]
    ChordFailed(String, String),

    #[error("state error: {0}")]
    State(#[from] buildrisk_state::StateError),

    #[error("token pool error: {0}")]
    TokenPool(#[from] buildrisk_tokenpool::TokenPoolError),

    #[error("provider error: {0}")]
    Provider(#[from] buildrisk_providers::ProviderError),

    #[error("resource error: {0}")]
    Resource(#[from] buildrisk_resources::ResourceError),

    #[error("feature error: {0}")]
    Feature(#[from] buildrisk_features::FeatureError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
