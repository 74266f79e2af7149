use std::time::Duration;

use thiserror::Error;

/// Failures at the fetcher and resolver boundary.
///
/// None of these reach the UI: callers convert them into fallback values.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("network error: {0}")]
    Network(String),

    #[error("upstream returned status {0}")]
    Status(u16),

    #[error("request abandoned after {0:?}")]
    Timeout(Duration),

    #[error("malformed payload: {0}")]
    Parse(String),
}

impl From<ureq::Error> for SyncError {
    fn from(err: ureq::Error) -> Self {
        match err {
            ureq::Error::Status(code, _) => SyncError::Status(code),
            ureq::Error::Transport(transport) => SyncError::Network(transport.to_string()),
        }
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        // ureq surfaces body decoding failures as io errors
        if err.kind() == std::io::ErrorKind::InvalidData {
            SyncError::Parse(err.to_string())
        } else {
            SyncError::Network(err.to_string())
        }
    }
}
