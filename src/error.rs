//! Error taxonomy shared by the pipelines and their collaborators.
use std::time::Duration;
use thiserror::Error;

pub type Result<T, E = SyncError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Network or remote hiccup. Never aborts a batch.
    #[error("transient remote failure: {0}")]
    Transient(String),
    /// Token acquisition failed. Fatal to the whole run.
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The beatmap broke a business rule; the submission is dropped, not retried.
    #[error("beatmap {id} failed validation: {reason}")]
    Validation { id: i64, reason: String },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("collection build failed: {0}")]
    Build(String),
    #[error("queue {queue} rejected task: {reason}")]
    Scheduling { queue: &'static str, reason: String },
    #[error("task exceeded {0:?}")]
    Timeout(Duration),
}

impl SyncError {
    pub fn is_validation(&self) -> bool {
        matches!(self, SyncError::Validation { .. })
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transient(err.to_string())
    }
}
