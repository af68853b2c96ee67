//! Deduplication and aggregation of candidates.
//!
//! The window and expiry tables decide what a candidate becomes; the store's
//! atomic upsert decides whether it merges. Nothing here holds a lock.

use crate::application::error::NotificationError;
use crate::application::gateway::PersistenceGateway;
use crate::domain::admission::{AdmitOutcome, AdmitRequest};
use crate::domain::policy::{AggregationPolicy, ExpiryPolicy};
use crate::domain::rules::NotificationCandidate;
use chrono::{DateTime, Utc};

/// Turns candidates into admitted records.
#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    aggregation: AggregationPolicy,
    expiry: ExpiryPolicy,
}

impl Aggregator {
    pub fn new(aggregation: AggregationPolicy, expiry: ExpiryPolicy) -> Self {
        Self {
            aggregation,
            expiry,
        }
    }

    pub fn aggregation(&self) -> &AggregationPolicy {
        &self.aggregation
    }

    pub fn expiry(&self) -> &ExpiryPolicy {
        &self.expiry
    }

    /// Build the admit request for `candidate` without touching the store.
    pub fn prepare(&self, candidate: &NotificationCandidate, now: DateTime<Utc>) -> AdmitRequest {
        AdmitRequest::from_candidate(candidate, &self.aggregation, &self.expiry, now)
    }

    /// Create the candidate's record or merge it into the live one.
    pub async fn admit(
        &self,
        gateway: &PersistenceGateway,
        candidate: &NotificationCandidate,
        now: DateTime<Utc>,
    ) -> Result<AdmitOutcome, NotificationError> {
        let request = self.prepare(candidate, now);
        let outcome = gateway.admit(request, now).await?;

        match &outcome {
            AdmitOutcome::Created(n) => tracing::info!(
                user_id = %n.user_id,
                notification_id = %n.id,
                event_kind = %n.event_kind,
                priority = %n.priority,
                "notification created"
            ),
            AdmitOutcome::Merged(n) => tracing::info!(
                user_id = %n.user_id,
                notification_id = %n.id,
                event_kind = %n.event_kind,
                occurrence_count = n.occurrence_count,
                "notification merged"
            ),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::metrics::Metrics;
    use crate::domain::event::SourceModule;
    use crate::domain::notification::{Priority, Severity, UserId};
    use crate::domain::rules::fixtures;
    use crate::infrastructure::memory_store::MemoryStore;
    use chrono::Duration;
    use std::sync::Arc;

    fn candidate(priority: Priority) -> NotificationCandidate {
        NotificationCandidate {
            user_id: UserId::new("alice"),
            source_module: SourceModule::Transaction,
            event_kind: "transaction.large_amount".to_string(),
            subject_id: "acct-1".to_string(),
            title: "Large transaction".to_string(),
            message: "A transaction of ₱12,000.00 was recorded.".to_string(),
            priority,
            severity: Severity::Warning,
            is_actionable: false,
            action_url: None,
            metadata: Default::default(),
            occurred_at: fixtures::now(),
            aggregate_label: Some("large transactions".to_string()),
            milestones: Vec::new(),
        }
    }

    fn gateway() -> PersistenceGateway {
        PersistenceGateway::new(
            Arc::new(MemoryStore::new()),
            std::time::Duration::from_secs(1),
            Metrics::new(),
        )
    }

    #[test]
    fn test_prepare_uses_priority_tables() {
        let aggregator = Aggregator::default();
        let now = fixtures::now();

        let low = aggregator.prepare(&candidate(Priority::Medium), now);
        assert!(low.dedup_key().is_some());
        assert_eq!(low.notification.expires_at, Some(now + Duration::days(14)));

        let urgent = aggregator.prepare(&candidate(Priority::Urgent), now);
        assert!(urgent.dedup_key().is_none());
        assert_eq!(urgent.notification.expires_at, Some(now + Duration::days(30)));
    }

    #[tokio::test]
    async fn test_admit_merges_second_occurrence() {
        let aggregator = Aggregator::default();
        let gateway = gateway();
        let now = fixtures::now();

        let first = aggregator
            .admit(&gateway, &candidate(Priority::Medium), now)
            .await
            .unwrap();
        let second = aggregator
            .admit(&gateway, &candidate(Priority::Medium), now + Duration::minutes(5))
            .await
            .unwrap();

        assert!(first.is_created());
        assert!(!second.is_created());
        assert_eq!(second.notification().id, first.notification().id);
        assert_eq!(second.notification().occurrence_count, 2);
        assert_eq!(second.notification().message, "2 large transactions today");
    }

    #[tokio::test]
    async fn test_admit_without_window_always_creates() {
        let aggregator = Aggregator::default();
        let gateway = gateway();
        let now = fixtures::now();

        let a = aggregator
            .admit(&gateway, &candidate(Priority::High), now)
            .await
            .unwrap();
        let b = aggregator
            .admit(&gateway, &candidate(Priority::High), now)
            .await
            .unwrap();
        assert!(a.is_created() && b.is_created());
        assert_ne!(a.notification().id, b.notification().id);
    }
}
