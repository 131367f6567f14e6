//! Sync error handling
//!
//! Provides typed errors for the live-reference engine. Configuration errors
//! are raised synchronously at the call site; delivery errors travel through
//! the readiness future to whoever awaits `ready()`.

use thiserror::Error;

/// Errors that can occur while resolving, observing, or fetching a source
///
/// The type is `Clone` because a single failure is shared by every caller
/// awaiting the same readiness episode.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Parameters were replaced with something that is not a key-value object
    #[error("Invalid parameters: expected an object, got {found}")]
    InvalidParameter { found: String },

    /// A refined reference was required but the query hook produced none
    #[error("No query defined for '{path}': provide an 'id' param or override query()")]
    MissingQuery { path: String },

    /// An operation needed an addressable location but none is resolvable
    #[error("No reference defined: cannot address a remote location for {operation}")]
    MissingReference { operation: String },

    /// The live channel reported an error
    #[error("Snapshot error on '{path}': {message}")]
    Snapshot { path: String, message: String },

    /// The remote client failed a read or write
    #[error("Remote store error: {0}")]
    Remote(String),

    /// The pre-sync hook failed
    #[error("beforeSync hook failed: {0}")]
    Hook(String),

    /// A record sync method cannot be applied to the resolved target
    #[error("Unsupported sync method: {0}")]
    UnsupportedMethod(String),
}

impl SyncError {
    /// Create a remote error from any displayable failure
    pub fn remote(error: impl std::fmt::Display) -> Self {
        SyncError::Remote(error.to_string())
    }

    /// Check if this error is a fail-fast configuration error
    ///
    /// These are raised synchronously and never reach the readiness future
    /// except through a deferred parameter batch.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            SyncError::InvalidParameter { .. }
                | SyncError::MissingQuery { .. }
                | SyncError::MissingReference { .. }
        )
    }

    /// Check if this error came from snapshot delivery
    pub fn is_delivery_error(&self) -> bool {
        matches!(
            self,
            SyncError::Snapshot { .. } | SyncError::Remote(_) | SyncError::Hook(_)
        )
    }
}

/// Result type for sync operations
pub type SyncResult<T> = Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_classification() {
        let err = SyncError::MissingQuery {
            path: "users".to_string(),
        };
        assert!(err.is_configuration_error());
        assert!(!err.is_delivery_error());

        let err = SyncError::InvalidParameter {
            found: "null".to_string(),
        };
        assert!(err.is_configuration_error());
    }

    #[test]
    fn test_delivery_classification() {
        let err = SyncError::Snapshot {
            path: "users".to_string(),
            message: "permission denied".to_string(),
        };
        assert!(err.is_delivery_error());
        assert!(!err.is_configuration_error());
        assert!(SyncError::remote("timeout").is_delivery_error());
    }

    #[test]
    fn test_error_display() {
        let err = SyncError::Snapshot {
            path: "rooms/a/messages".to_string(),
            message: "permission denied".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("rooms/a/messages"));
        assert!(msg.contains("permission denied"));

        let msg = SyncError::MissingQuery {
            path: "users".to_string(),
        }
        .to_string();
        assert!(msg.contains("users"));
        assert!(msg.contains("query()"));
    }
}
