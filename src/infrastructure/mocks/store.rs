//! Store wrapper that injects failures and delays.

use crate::application::ports::{NotificationStore, StoreError};
use crate::domain::admission::{AdmitOutcome, AdmitRequest};
use crate::domain::listing::{ListQuery, Page};
use crate::domain::notification::{Notification, NotificationId, NotificationPatch, UserId};
use crate::domain::rules::MilestoneMark;
use crate::infrastructure::memory_store::MemoryStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Delegates to an inner store unless told to stall or fail.
///
/// A stalled call sleeps for an hour before delegating, so it only ever
/// finishes by being timed out. A delayed admit is applied by the inner
/// store first and only returns after the delay.
#[derive(Debug)]
pub struct FaultyStore {
    inner: Arc<dyn NotificationStore>,
    stall: AtomicBool,
    fail: AtomicBool,
    /// Admits allowed through before `fail` kicks in.
    admits_before_failure: AtomicUsize,
    admit_delay_ms: AtomicU64,
    delayed_admits: AtomicUsize,
    calls: AtomicUsize,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn NotificationStore>) -> Self {
        Self {
            inner,
            stall: AtomicBool::new(false),
            fail: AtomicBool::new(false),
            admits_before_failure: AtomicUsize::new(0),
            admit_delay_ms: AtomicU64::new(0),
            delayed_admits: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn set_stalled(&self, stalled: bool) {
        self.stall.store(stalled, Ordering::SeqCst);
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail.store(failing, Ordering::SeqCst);
    }

    /// Let `n` more admits succeed, then fail every call.
    pub fn fail_after_admits(&self, n: usize) {
        self.admits_before_failure.store(n, Ordering::SeqCst);
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Hold back the result of the next `times` admits by `delay`.
    pub fn delay_admits(&self, delay: Duration, times: usize) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.admit_delay_ms.store(millis, Ordering::SeqCst);
        self.delayed_admits.store(times, Ordering::SeqCst);
    }

    /// Calls seen so far, including failed ones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn gate(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stall.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("injected failure".to_string()));
        }
        Ok(())
    }

    async fn admit_gate(&self) -> Result<(), StoreError> {
        let spared = self
            .admits_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if spared {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }
        self.gate().await
    }

    async fn admit_delay(&self) {
        let delayed = self
            .delayed_admits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if delayed {
            let millis = self.admit_delay_ms.load(Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

#[async_trait]
impl NotificationStore for FaultyStore {
    async fn create(
        &self,
        notification: Notification,
        now: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        self.gate().await?;
        self.inner.create(notification, now).await
    }

    async fn upsert_aggregate(
        &self,
        request: AdmitRequest,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, StoreError> {
        self.admit_gate().await?;
        let outcome = self.inner.upsert_aggregate(request, now).await;
        self.admit_delay().await;
        outcome
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        self.gate().await?;
        self.inner.get(id).await
    }

    async fn update(
        &self,
        id: NotificationId,
        patch: NotificationPatch,
        now: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        self.gate().await?;
        self.inner.update(id, patch, now).await
    }

    async fn list(
        &self,
        user: &UserId,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page, StoreError> {
        self.gate().await?;
        self.inner.list(user, query, now).await
    }

    async fn count_unread(&self, user: &UserId, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.gate().await?;
        self.inner.count_unread(user, now).await
    }

    async fn mark_all_read(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        self.gate().await?;
        self.inner.mark_all_read(user, now).await
    }

    async fn delete(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        self.gate().await?;
        self.inner.delete(id).await
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        self.gate().await?;
        self.inner.sweep_expired(now).await
    }

    async fn try_acquire_sweep_lease(
        &self,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.gate().await?;
        self.inner.try_acquire_sweep_lease(holder, ttl, now).await
    }

    async fn release_sweep_lease(&self, holder: &str) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner.release_sweep_lease(holder).await
    }

    async fn claim_milestone(
        &self,
        mark: &MilestoneMark,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.gate().await?;
        self.inner.claim_milestone(mark, now).await
    }

    async fn release_milestone(&self, mark: &MilestoneMark) -> Result<(), StoreError> {
        self.gate().await?;
        self.inner.release_milestone(mark).await
    }
}
