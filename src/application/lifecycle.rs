//! Read state, deletion and expiry of persisted notifications.

use crate::application::error::NotificationError;
use crate::application::gateway::PersistenceGateway;
use crate::application::hub::BroadcastHub;
use crate::application::ledger::MilestoneLedger;
use crate::application::metrics::Metrics;
use crate::application::ports::Clock;
use crate::application::sequencer::UserTurn;
use crate::domain::notification::{
    Notification, NotificationEvent, NotificationId, NotificationPatch, UserId,
};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SWEEP_LEASE: Duration = Duration::from_secs(300);

/// Result of one sweep attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// This instance held the lease and removed `deleted` records.
    Completed { deleted: u64 },
    /// Another instance is sweeping.
    LeaseHeld,
}

/// Owner-checked state transitions on stored records.
#[derive(Debug, Clone)]
pub struct LifecycleManager {
    gateway: PersistenceGateway,
    hub: Option<Arc<BroadcastHub>>,
    clock: Arc<dyn Clock>,
    ledger: MilestoneLedger,
    metrics: Metrics,
    lease_ttl: Duration,
    holder: String,
}

impl LifecycleManager {
    pub fn new(
        gateway: PersistenceGateway,
        hub: Option<Arc<BroadcastHub>>,
        clock: Arc<dyn Clock>,
        ledger: MilestoneLedger,
        metrics: Metrics,
    ) -> Self {
        Self {
            gateway,
            hub,
            clock,
            ledger,
            metrics,
            lease_ttl: DEFAULT_SWEEP_LEASE,
            holder: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    /// Name under which this instance takes the sweep lease.
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    fn publish(&self, event: NotificationEvent) {
        if let Some(hub) = &self.hub {
            hub.publish(event);
        }
    }

    /// Hold `user`'s write turn so that changes publish in write order.
    async fn turn(&self, user: &UserId) -> Option<UserTurn> {
        match &self.hub {
            Some(hub) => Some(hub.turn(user).await),
            None => None,
        }
    }

    /// Fetch a live record owned by `user`.
    ///
    /// Records of other users are reported as missing.
    pub async fn get(
        &self,
        user: &UserId,
        id: NotificationId,
    ) -> Result<Notification, NotificationError> {
        let now = self.clock.now();
        match self.gateway.get(id).await? {
            Some(n) if &n.user_id == user && !n.is_expired(now) => Ok(n),
            _ => Err(NotificationError::NotFound(id)),
        }
    }

    /// Fetch a live record for mutation, checking ownership.
    async fn owned(
        &self,
        user: &UserId,
        id: NotificationId,
    ) -> Result<Notification, NotificationError> {
        let now = self.clock.now();
        match self.gateway.get(id).await? {
            Some(n) if n.is_expired(now) => Err(NotificationError::NotFound(id)),
            Some(n) if &n.user_id != user => {
                tracing::warn!(
                    user_id = %user,
                    notification_id = %id,
                    "rejected change to another user's notification"
                );
                Err(NotificationError::PermissionDenied {
                    id,
                    actor: user.clone(),
                })
            }
            Some(n) => Ok(n),
            None => Err(NotificationError::NotFound(id)),
        }
    }

    /// Mark one record read. Already-read records are returned unchanged.
    pub async fn mark_read(
        &self,
        user: &UserId,
        id: NotificationId,
    ) -> Result<Notification, NotificationError> {
        let _turn = self.turn(user).await;
        let current = self.owned(user, id).await?;
        if current.is_read {
            return Ok(current);
        }

        let updated = self
            .gateway
            .update(id, NotificationPatch::mark_read(), self.clock.now())
            .await?;
        tracing::debug!(user_id = %user, notification_id = %id, "notification read");
        self.publish(NotificationEvent::updated(updated.clone()));
        Ok(updated)
    }

    /// Mark every live unread record of `user` read. Returns how many changed.
    pub async fn mark_all_read(&self, user: &UserId) -> Result<u64, NotificationError> {
        let _turn = self.turn(user).await;
        let changed = self.gateway.mark_all_read(user, self.clock.now()).await?;
        let count = changed.len() as u64;
        for n in changed {
            self.publish(NotificationEvent::updated(n));
        }
        tracing::debug!(user_id = %user, count, "notifications marked read");
        Ok(count)
    }

    pub async fn delete(&self, user: &UserId, id: NotificationId) -> Result<(), NotificationError> {
        let _turn = self.turn(user).await;
        self.owned(user, id).await?;
        match self.gateway.delete(id).await? {
            Some(removed) => {
                tracing::debug!(user_id = %user, notification_id = %id, "notification deleted");
                self.publish(NotificationEvent::deleted(removed));
                Ok(())
            }
            // Swept or deleted by another session in between.
            None => Err(NotificationError::NotFound(id)),
        }
    }

    /// Delete expired records if no other instance is sweeping.
    ///
    /// Also forgets monthly milestone marks that can no longer matter.
    pub async fn sweep_expired(&self) -> Result<SweepOutcome, NotificationError> {
        let now = self.clock.now();
        if !self
            .gateway
            .try_acquire_sweep_lease(&self.holder, self.lease_ttl, now)
            .await?
        {
            tracing::debug!(holder = %self.holder, "sweep lease held elsewhere");
            return Ok(SweepOutcome::LeaseHeld);
        }

        let swept = self.gateway.sweep_expired(now).await;
        if let Err(error) = self.gateway.release_sweep_lease(&self.holder).await {
            tracing::warn!(%error, "failed to release sweep lease");
        }
        let deleted = swept?;

        let pruned = self.ledger.prune_before(now);
        self.metrics.record_swept(deleted);
        tracing::info!(deleted, pruned_marks = pruned, "expired notifications swept");
        Ok(SweepOutcome::Completed { deleted })
    }
}
