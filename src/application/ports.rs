//! Ports (interfaces) for the application layer.
//!
//! Infrastructure adapters implement these traits; the application layer only
//! talks to them through the traits.

use crate::domain::admission::{AdmitOutcome, AdmitRequest};
use crate::domain::listing::{ListQuery, Page};
use crate::domain::notification::{
    Notification, NotificationEvent, NotificationId, NotificationPatch, PatchError, UserId,
};
use crate::domain::rules::MilestoneMark;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

/// Port for obtaining the current wall-clock time.
///
/// Infrastructure provides `SystemClock`; tests use `MockClock`.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Port for concurrent in-process key-value state.
pub trait Storage<K, V>: Send + Sync + Debug
where
    K: Hash + Eq + Clone + Send + Sync,
    V: Send + Sync,
{
    /// Run `accessor` with mutable access to the entry for `key`, creating it
    /// with `factory` first if needed. The entry stays locked for the call.
    fn with_entry_mut<F, R>(&self, key: K, factory: impl FnOnce() -> V, accessor: F) -> R
    where
        F: FnOnce(&mut V) -> R;

    /// Run `reader` against an existing entry.
    fn read<F, R>(&self, key: &K, reader: F) -> Option<R>
    where
        F: FnOnce(&V) -> R;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool;

    fn clear(&self);

    /// Remove entries for which the predicate returns false.
    fn retain<F>(&self, f: F)
    where
        F: FnMut(&K, &mut V) -> bool;
}

/// Failure reported by a notification store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("notification {0} not found")]
    NotFound(NotificationId),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("notification {0} was modified concurrently")]
    Conflict(NotificationId),
    #[error("record serialization failed: {0}")]
    Serialization(String),
    #[error("invalid patch: {0}")]
    InvalidPatch(#[from] PatchError),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl StoreError {
    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Conflict(_))
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Durable storage of notification records.
///
/// Every method is a single store operation: a caller dropping the future
/// never leaves a half-applied change behind. Reads that take `now` hide
/// records past their expiry.
#[async_trait]
pub trait NotificationStore: Send + Sync + Debug {
    /// Insert a new record. Fails with `Conflict` if the id already exists.
    async fn create(
        &self,
        notification: Notification,
        now: DateTime<Utc>,
    ) -> Result<Notification, StoreError>;

    /// Atomically merge into the live record sharing the request's dedup key,
    /// or insert the request's record when there is none.
    async fn upsert_aggregate(
        &self,
        request: AdmitRequest,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, StoreError>;

    /// Fetch a record regardless of owner or expiry.
    async fn get(&self, id: NotificationId) -> Result<Option<Notification>, StoreError>;

    /// Apply a partial update.
    async fn update(
        &self,
        id: NotificationId,
        patch: NotificationPatch,
        now: DateTime<Utc>,
    ) -> Result<Notification, StoreError>;

    async fn list(
        &self,
        user: &UserId,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page, StoreError>;

    async fn count_unread(&self, user: &UserId, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Mark every live unread record of `user` as read, returning the changed records.
    async fn mark_all_read(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError>;

    /// Remove a record, returning it if it existed.
    async fn delete(&self, id: NotificationId) -> Result<Option<Notification>, StoreError>;

    /// Delete every record with `now > expires_at`. Returns how many went.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Take the system-wide sweep lease for `ttl` unless another holder has it.
    async fn try_acquire_sweep_lease(
        &self,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Give the lease back if `holder` still owns it.
    async fn release_sweep_lease(&self, holder: &str) -> Result<(), StoreError>;

    /// Record `mark` unless a live copy exists. Returns whether this call
    /// recorded it; of two concurrent claims exactly one wins.
    ///
    /// The mark is forgotten after `mark.retain_until()`.
    async fn claim_milestone(
        &self,
        mark: &MilestoneMark,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Forget a claimed mark whose notification could not be stored.
    async fn release_milestone(&self, mark: &MilestoneMark) -> Result<(), StoreError>;
}

#[async_trait]
impl<T> NotificationStore for Arc<T>
where
    T: NotificationStore + ?Sized,
{
    async fn create(
        &self,
        notification: Notification,
        now: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        (**self).create(notification, now).await
    }

    async fn upsert_aggregate(
        &self,
        request: AdmitRequest,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, StoreError> {
        (**self).upsert_aggregate(request, now).await
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        (**self).get(id).await
    }

    async fn update(
        &self,
        id: NotificationId,
        patch: NotificationPatch,
        now: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        (**self).update(id, patch, now).await
    }

    async fn list(
        &self,
        user: &UserId,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page, StoreError> {
        (**self).list(user, query, now).await
    }

    async fn count_unread(&self, user: &UserId, now: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).count_unread(user, now).await
    }

    async fn mark_all_read(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        (**self).mark_all_read(user, now).await
    }

    async fn delete(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        (**self).delete(id).await
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        (**self).sweep_expired(now).await
    }

    async fn try_acquire_sweep_lease(
        &self,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).try_acquire_sweep_lease(holder, ttl, now).await
    }

    async fn release_sweep_lease(&self, holder: &str) -> Result<(), StoreError> {
        (**self).release_sweep_lease(holder).await
    }

    async fn claim_milestone(
        &self,
        mark: &MilestoneMark,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        (**self).claim_milestone(mark, now).await
    }

    async fn release_milestone(&self, mark: &MilestoneMark) -> Result<(), StoreError> {
        (**self).release_milestone(mark).await
    }
}

/// Failure reported by a delivery sink.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("delivery through {sink} failed: {reason}")]
pub struct SinkError {
    pub sink: String,
    pub reason: String,
}

/// Abstract push transport fed with every published change.
///
/// Each sink is drained by its own task from a bounded queue, so a slow
/// `deliver` only delays that sink. A sink that falls behind loses the
/// oldest queued changes.
#[async_trait]
pub trait DeliverySink: Send + Sync + Debug {
    fn name(&self) -> &str;

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), SinkError>;
}
