//! In-memory notification store.
//!
//! Records live in a sharded map keyed by id, with a secondary index from
//! dedup key to the record currently collecting occurrences. The admit holds
//! the index entry lock while it inspects and updates the record, so two
//! concurrent admits with the same key always serialize.
//!
//! Lock order is index entry, then record. No method takes them the other
//! way round.
//!
//! Claimed milestone marks live in their own map; a claim is decided under
//! the mark's entry lock.

use crate::application::ports::{NotificationStore, StoreError};
use crate::domain::admission::{AdmitOutcome, AdmitRequest};
use crate::domain::dedup::DedupKey;
use crate::domain::listing::{paginate, ListQuery, Page};
use crate::domain::notification::{Notification, NotificationId, NotificationPatch, UserId};
use crate::domain::rules::MilestoneMark;
use crate::infrastructure::storage::ShardedStorage;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Lease {
    holder: String,
    until: DateTime<Utc>,
}

/// DashMap-backed [`NotificationStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: ShardedStorage<NotificationId, Notification>,
    by_dedup: ShardedStorage<DedupKey, NotificationId>,
    /// Claimed marks and when each may be forgotten.
    marks: ShardedStorage<MilestoneMark, Option<DateTime<Utc>>>,
    lease: Mutex<Option<Lease>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records, expired ones included.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn owned_by(&self, user: &UserId) -> Vec<Notification> {
        self.records
            .iter()
            .filter(|entry| &entry.value().user_id == user)
            .map(|entry| entry.value().clone())
            .collect()
    }

    fn unindex(&self, notification: &Notification) {
        if let Some(key) = notification.dedup_key {
            self.by_dedup
                .remove_if(&key, |_, id| *id == notification.id);
        }
    }

    fn admit(&self, request: AdmitRequest, now: DateTime<Utc>) -> Result<AdmitOutcome, StoreError> {
        let Some(key) = request.dedup_key() else {
            return self.insert_new(request.notification).map(AdmitOutcome::Created);
        };

        match self.by_dedup.entry(key) {
            Entry::Occupied(mut slot) => {
                let existing_id = *slot.get();
                if let Some(mut existing) = self.records.get_mut(&existing_id) {
                    if request.can_merge_into(&existing, now) {
                        request.merge_into(&mut existing, now);
                        return Ok(AdmitOutcome::Merged(existing.clone()));
                    }
                }
                // The indexed record expired or is gone: start a new one.
                let created = self.insert_new(request.notification)?;
                slot.insert(created.id);
                Ok(AdmitOutcome::Created(created))
            }
            Entry::Vacant(slot) => {
                let created = self.insert_new(request.notification)?;
                slot.insert(created.id);
                Ok(AdmitOutcome::Created(created))
            }
        }
    }

    fn insert_new(&self, notification: Notification) -> Result<Notification, StoreError> {
        if notification.user_id.is_empty() {
            return Err(StoreError::InvalidRecord(
                "notification has no owner".to_string(),
            ));
        }
        match self.records.entry(notification.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict(notification.id)),
            Entry::Vacant(slot) => {
                slot.insert(notification.clone());
                Ok(notification)
            }
        }
    }

    fn claim(&self, mark: &MilestoneMark, now: DateTime<Utc>) -> bool {
        let until = mark.retain_until();
        match self.marks.entry(mark.clone()) {
            Entry::Occupied(mut slot) => {
                let lapsed = slot.get().is_some_and(|at| at <= now);
                if lapsed {
                    slot.insert(until);
                }
                lapsed
            }
            Entry::Vacant(slot) => {
                slot.insert(until);
                true
            }
        }
    }

    fn acquire(&self, holder: &str, ttl: Duration, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| StoreError::Unavailable(format!("invalid lease ttl: {}", e)))?;
        let mut lease = self
            .lease
            .lock()
            .map_err(|_| StoreError::Unavailable("sweep lease lock poisoned".to_string()))?;

        let free = match lease.as_ref() {
            None => true,
            Some(current) => current.holder == holder || current.until <= now,
        };
        if free {
            *lease = Some(Lease {
                holder: holder.to_string(),
                until: now + ttl,
            });
        }
        Ok(free)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn create(
        &self,
        notification: Notification,
        _now: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        let created = self.insert_new(notification)?;
        if let Some(key) = created.dedup_key {
            self.by_dedup.insert(key, created.id);
        }
        Ok(created)
    }

    async fn upsert_aggregate(
        &self,
        request: AdmitRequest,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, StoreError> {
        self.admit(request, now)
    }

    async fn get(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        Ok(self.records.get(&id).map(|entry| entry.value().clone()))
    }

    async fn update(
        &self,
        id: NotificationId,
        patch: NotificationPatch,
        now: DateTime<Utc>,
    ) -> Result<Notification, StoreError> {
        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        record.apply_patch(patch, now)?;
        Ok(record.clone())
    }

    async fn list(
        &self,
        user: &UserId,
        query: &ListQuery,
        now: DateTime<Utc>,
    ) -> Result<Page, StoreError> {
        Ok(paginate(self.owned_by(user), query, now))
    }

    async fn count_unread(&self, user: &UserId, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let count = self
            .records
            .iter()
            .filter(|entry| {
                let n = entry.value();
                &n.user_id == user && !n.is_read && !n.is_expired(now)
            })
            .count();
        Ok(count as u64)
    }

    async fn mark_all_read(
        &self,
        user: &UserId,
        now: DateTime<Utc>,
    ) -> Result<Vec<Notification>, StoreError> {
        let ids: Vec<NotificationId> = self
            .records
            .iter()
            .filter(|entry| {
                let n = entry.value();
                &n.user_id == user && !n.is_read && !n.is_expired(now)
            })
            .map(|entry| *entry.key())
            .collect();

        let mut changed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(mut record) = self.records.get_mut(&id) {
                if record.mark_read(now) {
                    changed.push(record.clone());
                }
            }
        }
        Ok(changed)
    }

    async fn delete(&self, id: NotificationId) -> Result<Option<Notification>, StoreError> {
        let removed = self.records.remove(&id).map(|(_, n)| n);
        if let Some(n) = &removed {
            self.unindex(n);
        }
        Ok(removed)
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut expired = Vec::new();
        self.records.retain(|_, n| {
            if n.is_expired(now) {
                expired.push(n.clone());
                false
            } else {
                true
            }
        });
        for n in &expired {
            self.unindex(n);
        }
        self.marks
            .retain(|_, until| until.map_or(true, |at| at > now));
        Ok(expired.len() as u64)
    }

    async fn try_acquire_sweep_lease(
        &self,
        holder: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        self.acquire(holder, ttl, now)
    }

    async fn release_sweep_lease(&self, holder: &str) -> Result<(), StoreError> {
        let mut lease = self
            .lease
            .lock()
            .map_err(|_| StoreError::Unavailable("sweep lease lock poisoned".to_string()))?;
        if lease.as_ref().is_some_and(|l| l.holder == holder) {
            *lease = None;
        }
        Ok(())
    }

    async fn claim_milestone(
        &self,
        mark: &MilestoneMark,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        Ok(self.claim(mark, now))
    }

    async fn release_milestone(&self, mark: &MilestoneMark) -> Result<(), StoreError> {
        self.marks.remove(mark);
        Ok(())
    }
}
