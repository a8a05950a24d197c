use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("mapping already registered for this key")]
    AlreadyRegistered,
    #[error("storage engine error: {0}")]
    Storage(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),
}
