//! Error types for the download engine

use crate::store::{DownloadId, DownloadStatus};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = DownloadError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("HTTP error: {0}")]
    HttpStatus(reqwest::StatusCode),

    #[error("Incomplete transfer: received {received} of {expected} bytes")]
    Incomplete { received: u64, expected: u64 },

    #[error("Timed out waiting for the server")]
    Timeout,

    #[error("Server ignored the range request for a segment")]
    RangeIgnored,

    #[error("Merge failed: {0}")]
    Merge(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Could not persist download list: {0}")]
    Persist(#[from] serde_json::Error),

    #[error("Download {0} not found")]
    NotFound(DownloadId),

    #[error("Cannot {action} a download that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: DownloadStatus,
    },

    #[error("Destination {} is already used by another download", .0.display())]
    DestinationInUse(PathBuf),

    #[error("Download engine is not running")]
    EngineClosed,
}

impl DownloadError {
    /// Whether the scheduler may spend a retry on this failure.
    ///
    /// Merge failures are final: the segment files may already be gone.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::HttpStatus(_)
                | Self::Timeout
                | Self::Incomplete { .. }
                | Self::RangeIgnored
                | Self::Io(_)
        )
    }
}
