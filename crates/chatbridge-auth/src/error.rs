use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("session credential unavailable after waiting {0:?}")]
    Unavailable(Duration),

    #[error("session acquisition failed: {0}")]
    AcquisitionFailed(String),

    #[error("acquired session is missing the `{0}` cookie")]
    MissingAuthMarker(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AuthError>;
