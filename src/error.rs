//! Error type for the progress core

use thiserror::Error;

/// Errors surfaced by the store, configuration and tracker layers
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    ConfigWrite(#[from] toml::ser::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid interval table: {0}")]
    InvalidIntervals(String),

    #[error("unknown profile: {0}")]
    ProfileNotFound(String),

    #[error("unknown study item: {0}")]
    ItemNotFound(String),

    #[error("could not locate a data directory")]
    NoDataDir,

    #[error("background task failed: {0}")]
    Task(String),

    #[error("snapshot cache is no longer running")]
    CacheClosed,
}

impl From<tokio::task::JoinError> for ProgressError {
    fn from(e: tokio::task::JoinError) -> Self {
        ProgressError::Task(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ProgressError>;
