//! Upstream error types

use chatbridge_auth::AuthError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The upstream refused the session credential (401/403).
    #[error("upstream rejected the session credential with status {status}")]
    AuthRejected { status: u16 },

    #[error("upstream returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("invalid upstream response: {0}")]
    InvalidResponse(String),

    #[error("invalid request header: {0}")]
    InvalidHeader(String),
}

impl UpstreamError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::AuthRejected { status } | Self::Status { status, .. } => Some(*status),
            Self::Network(e) => e.status().map(|s| s.as_u16()),
            Self::InvalidResponse(_) | Self::InvalidHeader(_) => None,
        }
    }
}

/// Failure to open a relayed chat or model listing.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error(transparent)]
    Credential(#[from] AuthError),

    /// The credential obtained by a forced refresh was rejected as well.
    #[error("upstream rejected a freshly acquired session with status {status}")]
    RejectedAfterRefresh { status: u16 },

    #[error(transparent)]
    Upstream(#[from] UpstreamError),
}

/// A line of the upstream body that could not be interpreted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameParseError {
    #[error("line has no type separator")]
    MissingSeparator,

    #[error("line has an empty type")]
    EmptyType,
}

/// Why an image job produced no image.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageJobError {
    #[error("image job failed: {0}")]
    Failed(String),

    #[error("image job still pending after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("image job not found in {consecutive} consecutive status checks")]
    NotFound { consecutive: u32 },

    #[error("image status rejected the session with status {status}")]
    AuthRejected { status: u16 },
}
