//! Notification records and their identifiers.
//!
//! A [`Notification`] is the durable entity of the engine. It always belongs to
//! exactly one user; events that concern several people fan out into one record
//! per recipient.

use crate::domain::dedup::DedupKey;
use crate::domain::event::SourceModule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Identifier of the user owning a notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for UserId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Server-assigned notification identifier (UUID v4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl NotificationId {
    /// Generate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for NotificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for NotificationId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Delivery and ordering priority. Declaration order is the ranking order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Low,
        Priority::Medium,
        Priority::High,
        Priority::Urgent,
    ];

    /// Numeric rank, higher is more important.
    pub fn rank(self) -> u8 {
        match self {
            Priority::Low => 0,
            Priority::Medium => 1,
            Priority::High => 2,
            Priority::Urgent => 3,
        }
    }

    pub fn from_rank(rank: u8) -> Option<Self> {
        Self::ALL.get(rank as usize).copied()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Visual treatment, independent from [`Priority`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Success => "success",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub user_id: UserId,
    pub notification_type: SourceModule,
    pub event_kind: String,
    pub subject_id: String,
    pub title: String,
    pub message: String,
    pub priority: Priority,
    pub severity: Severity,
    pub is_read: bool,
    pub is_actionable: bool,
    pub action_url: Option<String>,
    pub metadata: Map<String, Value>,
    pub occurrence_count: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    /// Aggregation identity; internal, never part of the client-facing record.
    #[serde(skip)]
    pub(crate) dedup_key: Option<DedupKey>,
}

impl Notification {
    /// Whether the record is past its expiry at `now`.
    ///
    /// Expired records are invisible to reads even before the sweep removes them.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires| now > expires)
    }

    pub fn dedup_key(&self) -> Option<DedupKey> {
        self.dedup_key
    }

    /// Mark as read. Returns `false` when the record was already read.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.is_read {
            return false;
        }
        self.is_read = true;
        self.touch(now);
        true
    }

    /// Apply a partial update, enforcing the record invariants.
    pub fn apply_patch(
        &mut self,
        patch: NotificationPatch,
        now: DateTime<Utc>,
    ) -> Result<(), PatchError> {
        if let Some(false) = patch.is_read {
            if self.is_read {
                return Err(PatchError::ReadStateRegression);
            }
        }
        if let Some(0) = patch.occurrence_count {
            return Err(PatchError::ZeroOccurrenceCount);
        }
        if let Some(expires_at) = patch.expires_at {
            if expires_at < self.created_at {
                return Err(PatchError::ExpiryBeforeCreation);
            }
        }

        if let Some(is_read) = patch.is_read {
            self.is_read = is_read;
        }
        if let Some(message) = patch.message {
            self.message = message;
        }
        if let Some(count) = patch.occurrence_count {
            self.occurrence_count = count;
        }
        if let Some(metadata) = patch.metadata {
            self.metadata.extend(metadata);
        }
        if let Some(expires_at) = patch.expires_at {
            self.expires_at = Some(expires_at);
        }
        self.touch(now);
        Ok(())
    }

    pub(crate) fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }
}

/// Partial update applied through the persistence gateway.
///
/// Identity fields (`id`, `user_id`, `created_at`) are not patchable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NotificationPatch {
    pub is_read: Option<bool>,
    pub message: Option<String>,
    pub occurrence_count: Option<u32>,
    /// Keys merged into the existing metadata document.
    pub metadata: Option<Map<String, Value>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl NotificationPatch {
    pub fn mark_read() -> Self {
        Self {
            is_read: Some(true),
            ..Self::default()
        }
    }
}

/// A patch that would break a record invariant.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PatchError {
    #[error("a read notification cannot be marked unread")]
    ReadStateRegression,
    #[error("occurrence count must be at least 1")]
    ZeroOccurrenceCount,
    #[error("expiry cannot precede creation")]
    ExpiryBeforeCreation,
}

/// Change published to live subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationEventKind {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub kind: NotificationEventKind,
    pub notification: Notification,
}

impl NotificationEvent {
    pub fn created(notification: Notification) -> Self {
        Self {
            kind: NotificationEventKind::Created,
            notification,
        }
    }

    pub fn updated(notification: Notification) -> Self {
        Self {
            kind: NotificationEventKind::Updated,
            notification,
        }
    }

    pub fn deleted(notification: Notification) -> Self {
        Self {
            kind: NotificationEventKind::Deleted,
            notification,
        }
    }

    pub fn user_id(&self) -> &UserId {
        &self.notification.user_id
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn notification(user: &str, priority: Priority, created_at: DateTime<Utc>) -> Notification {
        Notification {
            id: NotificationId::new(),
            user_id: UserId::new(user),
            notification_type: SourceModule::Transaction,
            event_kind: "transaction.large_amount".to_string(),
            subject_id: "acct-1".to_string(),
            title: "Large transaction detected".to_string(),
            message: "A large transaction was recorded.".to_string(),
            priority,
            severity: Severity::Warning,
            is_read: false,
            is_actionable: false,
            action_url: None,
            metadata: Map::new(),
            occurrence_count: 1,
            created_at,
            updated_at: created_at,
            expires_at: None,
            dedup_key: None,
        }
    }
}
