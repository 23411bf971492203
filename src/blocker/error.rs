//! Error types for the blocking loop

use crate::api::ApiError;
use crate::queue::QueueError;
use thiserror::Error;

/// Errors that can stop or interrupt the blocking loop
#[derive(Debug, Error)]
pub enum BlockerError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),
}

impl BlockerError {
    /// Whether the loop cannot continue after this error
    ///
    /// Credentials that cannot be refreshed and an unreachable store are
    /// fatal; everything else only costs the current topic or entity.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Api(e) => e.is_fatal(),
            Self::Queue(e) => e.is_fatal(),
            Self::Config(_) => true,
        }
    }

    /// Whether shutdown interrupted an API wait
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Api(e) if e.is_cancelled())
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}

/// Result type for blocking operations
pub type BlockerResult<T> = Result<T, BlockerError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Disposition;
    use crate::queue::StoreError;

    #[test]
    fn test_fatality() {
        assert!(BlockerError::from(ApiError::Auth("rejected".to_string())).is_fatal());
        assert!(
            !BlockerError::from(ApiError::NotFound {
                endpoint: "blocks/create".to_string()
            })
            .is_fatal()
        );
        assert!(
            BlockerError::from(QueueError::from(StoreError::Connection(
                "refused".to_string()
            )))
            .is_fatal()
        );
        assert!(
            !BlockerError::from(QueueError::ConflictingDisposition {
                id: "1".to_string(),
                existing: Disposition::Clean,
            })
            .is_fatal()
        );
        assert!(!BlockerError::from(ApiError::Forbidden(Box::default())).is_fatal());
    }

    #[test]
    fn test_cancelled() {
        let error = BlockerError::from(ApiError::Cancelled {
            endpoint: "blocks/create".to_string(),
        });
        assert!(error.is_cancelled());
        assert!(!error.is_fatal());
        assert!(!BlockerError::config("x").is_cancelled());
    }

    #[test]
    fn test_error_display() {
        let error = BlockerError::config("rules.json: missing `rules`");
        assert_eq!(
            error.to_string(),
            "Configuration error: rules.json: missing `rules`"
        );
    }
}
