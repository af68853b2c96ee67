//! Turning candidates into records and merging near-duplicates.
//!
//! The store performs the atomic lookup; this module holds the pure parts
//! of the upsert: preparing the record to create and rewriting the existing
//! record when a candidate lands in the same window.

use crate::domain::dedup::DedupKey;
use crate::domain::notification::{Notification, NotificationId};
use crate::domain::policy::{AggregationPolicy, ExpiryPolicy, WindowBucket};
use crate::domain::rules::NotificationCandidate;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// How the aggregate message of a merged record is worded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AggregateTemplate {
    /// Plural noun for the occurrences ("large transactions").
    pub label: Option<String>,
    /// Window phrase ("today").
    pub phrase: String,
}

impl AggregateTemplate {
    /// Render the message for `count` occurrences.
    ///
    /// Without a label the candidate's own message is kept and suffixed.
    pub fn render(&self, base_message: &str, count: u32) -> String {
        match &self.label {
            Some(label) => format!("{} {} {}", count, label, self.phrase),
            None => format!("{} ({} times {})", base_message, count, self.phrase),
        }
    }
}

/// A prepared record plus what the store needs to aggregate it.
#[derive(Debug, Clone, PartialEq)]
pub struct AdmitRequest {
    /// Record to insert when no mergeable record exists.
    pub notification: Notification,
    /// Window the record belongs to; `None` disables aggregation.
    pub bucket: Option<WindowBucket>,
    pub aggregate: AggregateTemplate,
}

impl AdmitRequest {
    /// Build the record for a candidate at `now`.
    pub fn from_candidate(
        candidate: &NotificationCandidate,
        aggregation: &AggregationPolicy,
        expiry: &ExpiryPolicy,
        now: DateTime<Utc>,
    ) -> Self {
        let window = aggregation.window_for(candidate.priority);
        let bucket = window.bucket(candidate.occurred_at);
        let dedup_key = bucket.map(|bucket| {
            DedupKey::new(
                candidate.source_module,
                &candidate.event_kind,
                &candidate.subject_id,
                &candidate.user_id,
                bucket.start,
            )
        });

        let notification = Notification {
            id: NotificationId::new(),
            user_id: candidate.user_id.clone(),
            notification_type: candidate.source_module,
            event_kind: candidate.event_kind.clone(),
            subject_id: candidate.subject_id.clone(),
            title: candidate.title.clone(),
            message: candidate.message.clone(),
            priority: candidate.priority,
            severity: candidate.severity,
            is_read: false,
            is_actionable: candidate.is_actionable,
            action_url: candidate.action_url.clone(),
            metadata: candidate.metadata.clone(),
            occurrence_count: 1,
            created_at: now,
            updated_at: now,
            expires_at: expiry.expires_at(candidate.priority, now),
            dedup_key,
        };

        Self {
            notification,
            bucket,
            aggregate: AggregateTemplate {
                label: candidate.aggregate_label.clone(),
                phrase: window.phrase(),
            },
        }
    }

    pub fn dedup_key(&self) -> Option<DedupKey> {
        self.notification.dedup_key
    }

    /// Whether `existing` is the live record this request should merge into.
    pub fn can_merge_into(&self, existing: &Notification, now: DateTime<Utc>) -> bool {
        self.bucket.is_some()
            && self.notification.dedup_key.is_some()
            && existing.dedup_key == self.notification.dedup_key
            && existing.user_id == self.notification.user_id
            && !existing.is_expired(now)
    }

    /// Fold this occurrence into `existing`.
    ///
    /// Bumps the counter, rewrites the message to its aggregate form and
    /// flips the record back to unread. Metadata takes the latest
    /// occurrence's values. Identity and creation time are kept.
    pub fn merge_into(&self, existing: &mut Notification, now: DateTime<Utc>) {
        existing.occurrence_count = existing.occurrence_count.saturating_add(1);
        existing.message = self
            .aggregate
            .render(&self.notification.message, existing.occurrence_count);
        existing.is_read = false;
        for (key, value) in &self.notification.metadata {
            existing.metadata.insert(key.clone(), value.clone());
        }
        existing.metadata.insert(
            "lastOccurredAt".to_string(),
            Value::String(self.notification.created_at.to_rfc3339()),
        );
        existing.touch(now);
    }
}

/// Result of admitting a candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum AdmitOutcome {
    Created(Notification),
    Merged(Notification),
}

impl AdmitOutcome {
    pub fn notification(&self) -> &Notification {
        match self {
            AdmitOutcome::Created(n) | AdmitOutcome::Merged(n) => n,
        }
    }

    pub fn into_notification(self) -> Notification {
        match self {
            AdmitOutcome::Created(n) | AdmitOutcome::Merged(n) => n,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, AdmitOutcome::Created(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::SourceModule;
    use crate::domain::notification::{Priority, Severity, UserId};
    use crate::domain::policy::AggregationWindow;
    use chrono::{Duration, TimeZone};
    use serde_json::Map;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 18, hour, 0, 0).unwrap()
    }

    fn candidate(priority: Priority) -> NotificationCandidate {
        NotificationCandidate {
            user_id: UserId::new("alice"),
            source_module: SourceModule::Transaction,
            event_kind: "transaction.large_amount".into(),
            subject_id: "acct-1".into(),
            title: "Large transaction".into(),
            message: "₱12,000.00 spent at Store".into(),
            priority,
            severity: Severity::Warning,
            is_actionable: false,
            action_url: None,
            metadata: Map::new(),
            occurred_at: at(9),
            aggregate_label: Some("large transactions".into()),
            milestones: Vec::new(),
        }
    }

    fn request(priority: Priority, now: DateTime<Utc>) -> AdmitRequest {
        AdmitRequest::from_candidate(
            &candidate(priority),
            &AggregationPolicy::default(),
            &ExpiryPolicy::default(),
            now,
        )
    }

    #[test]
    fn test_prepared_record() {
        let req = request(Priority::Medium, at(10));
        let n = &req.notification;
        assert_eq!(n.occurrence_count, 1);
        assert!(!n.is_read);
        assert_eq!(n.created_at, at(10));
        assert_eq!(n.expires_at, Some(at(10) + Duration::days(14)));
        assert!(req.dedup_key().is_some());
        assert_eq!(req.aggregate.phrase, "today");
    }

    #[test]
    fn test_high_priority_is_not_aggregated() {
        let req = request(Priority::High, at(10));
        assert!(req.bucket.is_none());
        assert!(req.dedup_key().is_none());

        let other = request(Priority::High, at(11));
        assert!(!other.can_merge_into(&req.notification, at(11)));
    }

    #[test]
    fn test_merge_rewrites_message_and_unreads() {
        let first = request(Priority::Medium, at(10));
        let mut existing = first.notification.clone();
        existing.is_read = true;

        let second = request(Priority::Medium, at(11));
        assert_eq!(second.dedup_key(), first.dedup_key());
        assert!(second.can_merge_into(&existing, at(11)));

        second.merge_into(&mut existing, at(11));
        assert_eq!(existing.occurrence_count, 2);
        assert_eq!(existing.message, "2 large transactions today");
        assert!(!existing.is_read);
        assert_eq!(existing.updated_at, at(11));
        assert_eq!(existing.created_at, at(10));
        assert_eq!(existing.id, first.notification.id);
    }

    #[test]
    fn test_merge_takes_latest_metadata() {
        let mut quarter = candidate(Priority::Medium);
        quarter.metadata.insert("milestone".into(), 25.into());
        quarter.metadata.insert("goalName".into(), "Trip".into());
        let mut half = candidate(Priority::Medium);
        half.metadata.insert("milestone".into(), 50.into());

        let policy = AggregationPolicy::default();
        let expiry = ExpiryPolicy::default();
        let first = AdmitRequest::from_candidate(&quarter, &policy, &expiry, at(10));
        let second = AdmitRequest::from_candidate(&half, &policy, &expiry, at(11));
        let mut existing = first.notification.clone();

        second.merge_into(&mut existing, at(11));
        assert_eq!(existing.metadata["milestone"], 50);
        assert_eq!(existing.metadata["goalName"], "Trip");
    }

    #[test]
    fn test_unlabelled_aggregate_keeps_base_message() {
        let template = AggregateTemplate {
            label: None,
            phrase: "today".into(),
        };
        assert_eq!(template.render("Budget reminder", 3), "Budget reminder (3 times today)");
    }

    #[test]
    fn test_expired_record_is_not_merged() {
        let first = request(Priority::Low, at(10));
        let mut existing = first.notification.clone();
        existing.expires_at = Some(at(10));
        let second = request(Priority::Low, at(11));
        assert!(!second.can_merge_into(&existing, at(11)));
    }

    #[test]
    fn test_rolling_window_bucket_follows_occurrence_time() {
        let policy = AggregationPolicy {
            medium: AggregationWindow::Rolling { seconds: 3_600 },
            ..AggregationPolicy::default()
        };
        let mut late = candidate(Priority::Medium);
        late.occurred_at = at(12);

        let a = AdmitRequest::from_candidate(
            &candidate(Priority::Medium),
            &policy,
            &ExpiryPolicy::never(),
            at(12),
        );
        let b = AdmitRequest::from_candidate(&late, &policy, &ExpiryPolicy::never(), at(12));
        assert_ne!(a.dedup_key(), b.dedup_key());
        assert_eq!(a.aggregate.phrase, "in the last hour");
        assert_eq!(a.notification.expires_at, None);
    }
}
