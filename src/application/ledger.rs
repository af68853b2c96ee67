//! Milestone ledger: thresholds already notified, per user.
//!
//! The ledger feeds [`RuleContext`] so that a budget threshold or goal
//! milestone fires once per period even when later events still satisfy it.
//!
//! The store is the authority on which marks exist. The ledger is this
//! process's cache of them: rules consult it to skip known marks, and every
//! mark a candidate carries is claimed through the store before the
//! candidate is admitted. A claim that loses to another producer, in this
//! process or another one, means the milestone was already notified.

use crate::application::error::NotificationError;
use crate::application::gateway::PersistenceGateway;
use crate::application::ports::Storage;
use crate::domain::event::CanonicalEvent;
use crate::domain::notification::UserId;
use crate::domain::rules::{MilestoneMark, RuleContext};
use crate::infrastructure::storage::ShardedStorage;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

/// Marks recorded for one user.
pub type MarkSet = HashSet<MilestoneMark>;

/// Ledger of notified milestones.
///
/// Generic over the storage implementation; the default is an in-memory
/// sharded map.
#[derive(Debug, Clone)]
pub struct MilestoneLedger<S = Arc<ShardedStorage<UserId, MarkSet>>>
where
    S: Storage<UserId, MarkSet> + Clone,
{
    storage: S,
}

impl MilestoneLedger {
    /// An empty in-memory ledger.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(ShardedStorage::new()))
    }
}

impl Default for MilestoneLedger {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl<S> MilestoneLedger<S>
where
    S: Storage<UserId, MarkSet> + Clone,
{
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Marks relevant to `event`: every mark of every recipient.
    pub fn context_for(&self, event: &CanonicalEvent) -> RuleContext {
        let mut context = RuleContext::new();
        for user in &event.user_ids {
            if let Some(marks) = self.storage.read(user, |marks| marks.clone()) {
                context.extend(marks);
            }
        }
        context
    }

    /// Claim `marks` through the store and return those this call won.
    ///
    /// Lost marks are cached too, since they are known to exist. If a store
    /// call fails, marks won so far are released before the error returns.
    pub async fn claim(
        &self,
        gateway: &PersistenceGateway,
        marks: &[MilestoneMark],
        now: DateTime<Utc>,
    ) -> Result<Vec<MilestoneMark>, NotificationError> {
        let mut won = Vec::with_capacity(marks.len());
        for mark in marks {
            match gateway.claim_milestone(mark, now).await {
                Ok(true) => won.push(mark.clone()),
                Ok(false) => {
                    tracing::debug!(
                        user_id = %mark.user_id,
                        subject_id = %mark.subject_id,
                        marker = %mark.marker,
                        "milestone already claimed"
                    );
                }
                Err(error) => {
                    self.release(gateway, &won).await;
                    return Err(error);
                }
            }
        }
        self.record(marks.iter().cloned());
        Ok(won)
    }

    /// Give back marks whose notification was never stored. Best effort:
    /// a failed release is logged and the mark stays claimed.
    pub async fn release(&self, gateway: &PersistenceGateway, marks: &[MilestoneMark]) {
        for mark in marks {
            self.storage
                .with_entry_mut(mark.user_id.clone(), MarkSet::new, |set| set.remove(mark));
            if let Err(error) = gateway.release_milestone(mark).await {
                tracing::warn!(
                    %error,
                    user_id = %mark.user_id,
                    marker = %mark.marker,
                    "failed to release milestone"
                );
            }
        }
    }

    /// Cache marks known to be recorded in the store.
    pub fn record(&self, marks: impl IntoIterator<Item = MilestoneMark>) {
        for mark in marks {
            self.storage
                .with_entry_mut(mark.user_id.clone(), MarkSet::new, |set| {
                    set.insert(mark);
                });
        }
    }

    pub fn contains(&self, mark: &MilestoneMark) -> bool {
        self.storage
            .read(&mark.user_id, |marks| marks.contains(mark))
            .unwrap_or(false)
    }

    /// Drop marks of monthly periods older than the previous month.
    ///
    /// Periods that are not `YYYY-MM` (such as goal lifetimes) are kept.
    pub fn prune_before(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.storage.retain(|_, marks| {
            let before = marks.len();
            marks.retain(|mark| mark.retain_until().map_or(true, |until| now < until));
            removed += before - marks.len();
            !marks.is_empty()
        });
        removed
    }

    /// Number of users with at least one mark.
    pub fn len(&self) -> usize {
        self.storage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.is_empty()
    }

    pub fn clear(&self) {
        self.storage.clear();
    }
}
