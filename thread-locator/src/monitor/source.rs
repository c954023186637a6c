//! Network side of candidate monitoring.
//!
//! Monitors see fetches as plain [`FetchOutcome`] values. Failures are data
//! here, never errors, so a monitor can decide on each one without unwinding.

use async_trait::async_trait;
use bytes::Bytes;
use imageboard_api::{Client, ThreadId, ThreadResponse};

/// Result of one conditional fetch of a candidate thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// New content, with the freshness token to send next time.
    Fresh {
        body: Bytes,
        last_modified: Option<String>,
    },
    /// Unchanged since the token that was sent.
    NotModified,
    Failed(FetchFailure),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchFailure {
    #[error("request timed out")]
    Timeout,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("HTTP status {0}")]
    Status(u16),
}

impl FetchFailure {
    /// The thread does not exist (anymore).
    pub fn is_not_found(&self) -> bool {
        matches!(self, FetchFailure::Status(404))
    }
}

impl From<&imageboard_api::Error> for FetchFailure {
    fn from(err: &imageboard_api::Error) -> Self {
        if err.is_timeout() {
            FetchFailure::Timeout
        } else if let Some(status) = err.status() {
            FetchFailure::Status(status.as_u16())
        } else {
            FetchFailure::Transport(err.to_string())
        }
    }
}

/// Fetches candidate threads for the monitors.
///
/// Implementations should be cancel safe: dropping the future aborts the
/// request.
#[async_trait]
pub trait ThreadSource: Send + Sync + 'static {
    async fn fetch(&self, id: ThreadId, if_modified_since: Option<&str>) -> FetchOutcome;
}

#[async_trait]
impl ThreadSource for Client {
    async fn fetch(&self, id: ThreadId, if_modified_since: Option<&str>) -> FetchOutcome {
        match self.fetch_thread(id, if_modified_since).await {
            Ok(ThreadResponse::Fresh {
                body,
                last_modified,
            }) => FetchOutcome::Fresh {
                body,
                last_modified,
            },
            Ok(ThreadResponse::NotModified) => FetchOutcome::NotModified,
            Err(e) => FetchOutcome::Failed(FetchFailure::from(&e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use imageboard_api::StatusCode;

    #[test]
    fn test_failure_from_status() {
        let failure = FetchFailure::from(&imageboard_api::Error::Status(StatusCode::NOT_FOUND));
        assert_eq!(failure, FetchFailure::Status(404));
        assert!(failure.is_not_found());

        let failure = FetchFailure::from(&imageboard_api::Error::Status(
            StatusCode::SERVICE_UNAVAILABLE,
        ));
        assert!(!failure.is_not_found());
    }

    #[test]
    fn test_failure_from_other_errors() {
        let err = imageboard_api::Error::InvalidThreadId("x".into());
        assert!(matches!(FetchFailure::from(&err), FetchFailure::Transport(_)));
    }
}
