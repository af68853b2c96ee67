//! Errors returned by the engine's public operations.

use crate::application::ports::StoreError;
use crate::domain::event::IntakeError;
use crate::domain::notification::{NotificationId, UserId};
use std::time::Duration;

/// Failure of an engine operation.
#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    /// The inbound event was malformed and has been dropped.
    #[error("malformed event: {0}")]
    Intake(#[from] IntakeError),
    #[error("notification {0} not found")]
    NotFound(NotificationId),
    /// The caller does not own the record. Nothing was changed.
    #[error("user {actor} may not modify notification {id}")]
    PermissionDenied { id: NotificationId, actor: UserId },
    /// The store did not answer in time. The call may be retried.
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },
    #[error("storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl NotificationError {
    /// Whether the caller may retry the same operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            NotificationError::Timeout { .. } => true,
            NotificationError::Storage(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Stable error code for clients.
    pub fn code(&self) -> &'static str {
        match self {
            NotificationError::Intake(_) => "NOTIF_001",
            NotificationError::NotFound(_) => "NOTIF_002",
            NotificationError::PermissionDenied { .. } => "NOTIF_003",
            NotificationError::Timeout { .. } => "NOTIF_004",
            NotificationError::Storage(StoreError::InvalidPatch(_))
            | NotificationError::Storage(StoreError::InvalidRecord(_)) => "NOTIF_006",
            NotificationError::Storage(_) => "NOTIF_005",
        }
    }
}

impl From<StoreError> for NotificationError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(id) => NotificationError::NotFound(id),
            other => NotificationError::Storage(other),
        }
    }
}
