use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("unknown feature requested: {0}")]
    UnknownFeature(String),

    #[error("dependency cycle among extractor nodes: {0:?}")]
    DependencyCycle(Vec<String>),

    #[error("node '{0}' raised: {1}")]
    NodeFailed(String, String),

    #[error("resource error: {0}")]
    Resource(#[from] buildrisk_resources::ResourceError),
}

pub type Result<T> = std::result::Result<T, FeatureError>;
