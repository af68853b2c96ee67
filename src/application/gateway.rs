//! Persistence gateway: every store call, bounded by a timeout.

use crate::application::error::NotificationError;
use crate::application::metrics::Metrics;
use crate::application::ports::{NotificationStore, StoreError};
use crate::domain::admission::{AdmitOutcome, AdmitRequest};
use crate::domain::listing::{ListQuery, Page};
use crate::domain::notification::{Notification, NotificationId, NotificationPatch, UserId};
use crate::domain::rules::MilestoneMark;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Wraps a [`NotificationStore`] so that no call waits longer than the timeout.
///
/// A call that times out is dropped. Each store method is a single atomic
/// operation, so a dropped call leaves either the old or the new state.
#[derive(Debug, Clone)]
pub struct PersistenceGateway {
    store: Arc<dyn NotificationStore>,
    timeout: Duration,
    metrics: Metrics,
}

impl PersistenceGateway {
    pub fn new(store: Arc<dyn NotificationStore>, timeout: Duration, metrics: Metrics) -> Self {
        Self {
            store,
            timeout,
            metrics,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn call<T, F>(&self, operation: &'static str, fut: F) -> Result<T, NotificationError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(result) => result.map_err(NotificationError::from),
            Err(_) => {
                self.metrics.record_timeout();
                tracing::warn!(operation, timeout = ?self.timeout, "store call timed out");
                Err(NotificationError::Timeout {
                    operation,
                    timeout: self.timeout,
                })
            }
        }
    }

    pub async fn create(
        &self,
        notification: Notification,
        now: DateTime<Utc>,
    ) -> Result<Notification, NotificationError> {
        self.call("create", self.store.create(notification, now))
            .await
    }

    pub async fn admit(
        &self,
        request: AdmitRequest,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, NotificationError> {
        self.call("upsert_aggregate", self.store.upsert_aggregate(request, now))
            .await
    }

    pub async fn get(&self, id: NotificationId) -> Result<Option<Notification>, NotificationError> {
        self.call("get", self.store.get(id)).await
    }

    pub async fn update(
        &self,
        id: NotificationId,
        patch: NotificationPatch,
        now: DateTime<Utc>,
    ) -> Result<Notification, NotificationError> {
        self.call("update", self.store.update(id, patch, now)).await
    }

    pub async fn list(
        &self,
        user: &UserId,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page, NotificationError> {
        self.call("list", self.store.list(user, query, now)).await
    }

    pub async fn count_unread(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<u64, NotificationError> {
        self.call("count_unread", self.store.count_unread(user, now))
            .await
    }

    pub async fn mark_all_read(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, NotificationError> {
        self.call("mark_all_read", self.store.mark_all_read(user, now))
            .await
    }

    pub async fn delete(&self, id: NotificationId) -> Result<Option<Notification>, NotificationError> {
        self.call("delete", self.store.delete(id)).await
    }

    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, NotificationError> {
        self.call("sweep_expired", self.store.sweep_expired(now))
            .await
    }

    pub async fn try_acquire_sweep_lease(
        &self,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, NotificationError> {
        self.call(
            "try_acquire_sweep_lease",
            self.store.try_acquire_sweep_lease(holder, ttl, now),
        )
        .await
    }

    pub async fn release_sweep_lease(&self, holder: &str) -> Result<(), NotificationError> {
        self.call("release_sweep_lease", self.store.release_sweep_lease(holder))
            .await
    }

    pub async fn claim_milestone(
        &self,
        mark: &MilestoneMark,
        now: DateTime<Utc>,
    ) -> Result<bool, NotificationError> {
        self.call("claim_milestone", self.store.claim_milestone(mark, now))
            .await
    }

    pub async fn release_milestone(&self, mark: &MilestoneMark) -> Result<(), NotificationError> {
        self.call("release_milestone", self.store.release_milestone(mark))
            .await
    }
}
