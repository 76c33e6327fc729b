use thiserror::Error;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("repo config not found: {id}")]
    RepoConfigNotFound { id: String },

    #[error("raw repository not found: {id}")]
    RepositoryNotFound { id: String },

    #[error("ingestion build not found: {id}")]
    IngestionBuildNotFound { id: String },

    #[error("training build not found: {id}")]
    TrainingBuildNotFound { id: String },

    #[error("illegal state transition: {0}")]
    IllegalTransition(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<surrealdb::Error> for StateError {
    fn from(value: surrealdb::Error) -> Self {
        StateError::Database(value.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StateError>;
