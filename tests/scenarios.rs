//! End-to-end behavior of the engine on realistic household events.

use chrono::{DateTime, Duration, TimeZone, Utc};
use notification_engine::infrastructure::mocks::MockClock;
use notification_engine::{
    ListFilter, NotificationEngine, NotificationPatch, Priority, RawEvent, Severity, SourceModule,
    SweepOutcome, UserId,
};
use std::sync::Arc;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap()
}

fn engine(clock: &MockClock) -> NotificationEngine {
    NotificationEngine::builder()
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap()
}

fn budget_change(previous: f64, current: f64) -> RawEvent {
    RawEvent::new("budget", "budget.utilization_changed")
        .subject("budget-groceries")
        .user("alice")
        .with("budgetName", "Groceries")
        .with("previousUtilization", previous)
        .with("utilization", current)
}

fn goal_contribution(previous: f64, current: f64) -> RawEvent {
    RawEvent::new("goal", "goal.contribution")
        .subject("goal-7")
        .user("alice")
        .with("goalName", "Emergency fund")
        .with("previousProgress", previous)
        .with("progress", current)
}

fn uncategorized(subject: &str, amount: f64) -> RawEvent {
    RawEvent::new("transaction", "transaction.created")
        .subject(subject)
        .user("alice")
        .with("accountId", "acct-1")
        .with("amount", amount)
}

#[tokio::test]
async fn test_budget_crossing_eighty_percent_alerts_once() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);
    let alice = UserId::new("alice");

    let report = engine.ingest(budget_change(78.0, 83.0)).await.unwrap();
    let created: Vec<_> = report.created().collect();
    assert_eq!(created.len(), 1);
    let alert = created[0];
    assert_eq!(alert.priority, Priority::High);
    assert_eq!(alert.severity, Severity::Warning);
    assert_eq!(alert.notification_type, SourceModule::Budget);
    assert!(alert.message.contains("80%"), "{}", alert.message);
    assert!(!alert.is_read);

    // Spending keeps climbing inside the same period without reaching 100%.
    clock.advance(Duration::hours(2));
    let report = engine.ingest(budget_change(83.0, 91.0)).await.unwrap();
    assert!(report.is_empty());

    let page = engine.list(&alice, ListFilter::default(), None, 20).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, alert.id);
    assert_eq!(page.items[0].updated_at, start());
}

#[tokio::test]
async fn test_replayed_budget_event_does_not_refire() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);

    assert!(!engine.ingest(budget_change(78.0, 83.0)).await.unwrap().is_empty());
    clock.advance(Duration::minutes(5));
    assert!(engine.ingest(budget_change(78.0, 83.0)).await.unwrap().is_empty());
    assert_eq!(engine.unread_count(&UserId::new("alice")).await.unwrap(), 1);
}

#[tokio::test]
async fn test_budget_jumping_past_every_threshold_is_urgent() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);

    let report = engine.ingest(budget_change(50.0, 120.0)).await.unwrap();
    let created: Vec<_> = report.created().collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].priority, Priority::Urgent);
    assert_eq!(created[0].severity, Severity::Error);
    assert!(created[0].message.contains("100%"));

    // 80% was marked together with 100%, so a dip and rise stays quiet.
    assert!(engine.ingest(budget_change(70.0, 85.0)).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_goal_crossing_half_way_is_medium_info() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);

    let report = engine.ingest(goal_contribution(48.0, 52.0)).await.unwrap();
    let created: Vec<_> = report.created().collect();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].priority, Priority::Medium);
    assert_eq!(created[0].severity, Severity::Info);
    assert!(created[0].message.contains("50%"), "{}", created[0].message);
    assert_eq!(created[0].notification_type, SourceModule::Goal);
}

#[tokio::test]
async fn test_same_day_goal_milestones_merge_with_latest_milestone() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);

    engine.ingest(goal_contribution(20.0, 30.0)).await.unwrap();
    clock.advance(Duration::hours(2));
    let report = engine.ingest(goal_contribution(45.0, 55.0)).await.unwrap();

    let merged = report.merged().next().unwrap();
    assert_eq!(merged.occurrence_count, 2);
    assert_eq!(merged.message, "2 goal milestones reached today");
    assert_eq!(merged.metadata["milestone"], 50);
    assert_eq!(merged.metadata["progress"], 55.0);
}

#[tokio::test]
async fn test_sweep_removes_exactly_the_expired_record() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);
    let alice = UserId::new("alice");

    let low = engine
        .ingest(uncategorized("txn-1", 250.0))
        .await
        .unwrap()
        .accepted
        .remove(0)
        .into_notification();
    let urgent = engine
        .ingest(budget_change(90.0, 104.0))
        .await
        .unwrap()
        .accepted
        .remove(0)
        .into_notification();
    assert_eq!(low.priority, Priority::Low);
    assert_eq!(urgent.priority, Priority::Urgent);

    let low_expiry = low.expires_at.unwrap();
    assert!(urgent.expires_at.unwrap() > low_expiry);

    clock.set(low_expiry + Duration::seconds(1));
    assert_eq!(
        engine.sweep_expired().await.unwrap(),
        SweepOutcome::Completed { deleted: 1 }
    );

    let page = engine.list(&alice, ListFilter::default(), None, 20).await.unwrap();
    let ids: Vec<_> = page.items.iter().map(|n| n.id).collect();
    assert_eq!(ids, vec![urgent.id]);
    assert_eq!(engine.metrics().notifications_swept(), 1);
}

#[tokio::test]
async fn test_expired_record_is_hidden_before_the_sweep() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);
    let alice = UserId::new("alice");

    let report = engine.ingest(uncategorized("txn-1", 250.0)).await.unwrap();
    let record = report.created().next().unwrap().clone();

    clock.set(record.expires_at.unwrap() + Duration::seconds(1));
    assert_eq!(engine.unread_count(&alice).await.unwrap(), 0);
    assert!(engine.get(&alice, record.id).await.is_err());
}

#[tokio::test]
async fn test_repeated_low_priority_events_merge() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);
    let alice = UserId::new("alice");

    let first = engine.ingest(uncategorized("txn-1", 250.0)).await.unwrap();
    assert_eq!(first.created().count(), 1);

    clock.advance(Duration::hours(3));
    let second = engine.ingest(uncategorized("txn-2", 75.5)).await.unwrap();
    let merged: Vec<_> = second.merged().collect();
    assert_eq!(merged.len(), 1);
    assert_eq!(merged[0].occurrence_count, 2);
    assert_eq!(merged[0].message, "2 uncategorized transactions today");
    assert_eq!(merged[0].updated_at, start() + Duration::hours(3));

    let page = engine.list(&alice, ListFilter::default(), None, 20).await.unwrap();
    assert_eq!(page.items.len(), 1);
    assert_eq!(engine.metrics().notifications_merged(), 1);
}

#[tokio::test]
async fn test_merge_does_not_cross_the_day_boundary() {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 23, 50, 0).unwrap());
    let engine = engine(&clock);

    engine.ingest(uncategorized("txn-1", 40.0)).await.unwrap();
    clock.advance(Duration::minutes(20));
    let report = engine.ingest(uncategorized("txn-2", 40.0)).await.unwrap();
    assert_eq!(report.created().count(), 1);
    assert_eq!(
        engine.unread_count(&UserId::new("alice")).await.unwrap(),
        2
    );
}

#[tokio::test]
async fn test_merge_brings_a_read_record_back_as_unread() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);
    let alice = UserId::new("alice");

    let report = engine.ingest(uncategorized("txn-1", 250.0)).await.unwrap();
    let id = report.created().next().unwrap().id;
    engine.mark_read(&alice, id).await.unwrap();
    assert_eq!(engine.unread_count(&alice).await.unwrap(), 0);

    clock.advance(Duration::minutes(30));
    engine.ingest(uncategorized("txn-2", 20.0)).await.unwrap();

    let record = engine.get(&alice, id).await.unwrap();
    assert!(!record.is_read);
    assert_eq!(record.occurrence_count, 2);
    assert_eq!(engine.unread_count(&alice).await.unwrap(), 1);
}

#[tokio::test]
async fn test_listing_orders_by_priority_then_recency() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);
    let alice = UserId::new("alice");

    engine.ingest(uncategorized("txn-1", 250.0)).await.unwrap();
    clock.advance(Duration::minutes(1));
    engine.ingest(budget_change(78.0, 105.0)).await.unwrap();
    clock.advance(Duration::minutes(1));
    engine.ingest(goal_contribution(48.0, 52.0)).await.unwrap();

    let page = engine.list(&alice, ListFilter::default(), None, 20).await.unwrap();
    let priorities: Vec<_> = page.items.iter().map(|n| n.priority).collect();
    assert_eq!(
        priorities,
        vec![Priority::Urgent, Priority::Medium, Priority::Low]
    );
    assert!(page.next_cursor.is_none());

    let only_goals = engine
        .list(
            &alice,
            ListFilter::default().with_types([SourceModule::Goal]),
            None,
            20,
        )
        .await
        .unwrap();
    assert_eq!(only_goals.items.len(), 1);
}

#[tokio::test]
async fn test_cursor_pages_through_everything() {
    let clock = MockClock::new(start());
    let engine = NotificationEngine::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_aggregation_policy(notification_engine::AggregationPolicy::disabled())
        .build()
        .unwrap();
    let alice = UserId::new("alice");

    for i in 0..5 {
        engine
            .ingest(uncategorized(&format!("txn-{i}"), 10.0))
            .await
            .unwrap();
        clock.advance(Duration::seconds(10));
    }

    let mut seen = Vec::new();
    let mut cursor = None;
    loop {
        let page = engine
            .list(&alice, ListFilter::default(), cursor, 2)
            .await
            .unwrap();
        seen.extend(page.items.iter().map(|n| n.id));
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), 5);
}

#[tokio::test]
async fn test_mark_all_read_is_idempotent() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);
    let alice = UserId::new("alice");

    engine.ingest(uncategorized("txn-1", 250.0)).await.unwrap();
    engine.ingest(goal_contribution(20.0, 30.0)).await.unwrap();
    engine.ingest(budget_change(78.0, 83.0)).await.unwrap();
    assert_eq!(engine.unread_count(&alice).await.unwrap(), 3);

    assert_eq!(engine.mark_all_read(&alice).await.unwrap(), 3);
    assert_eq!(engine.mark_all_read(&alice).await.unwrap(), 0);
    assert_eq!(engine.unread_count(&alice).await.unwrap(), 0);

    let unread = engine.list(&alice, ListFilter::unread(), None, 20).await.unwrap();
    assert!(unread.items.is_empty());
}

#[tokio::test]
async fn test_created_record_reads_back_unchanged() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);
    let alice = UserId::new("alice");

    let report = engine.ingest(goal_contribution(70.0, 76.0)).await.unwrap();
    let created = report.created().next().unwrap().clone();
    let fetched = engine.get(&alice, created.id).await.unwrap();
    assert_eq!(fetched, created);
    assert_eq!(fetched.user_id, alice);
    assert_eq!(fetched.created_at, start());
    assert_eq!(fetched.occurrence_count, 1);
}

#[tokio::test]
async fn test_mark_read_keeps_owner_and_creation_time() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);
    let alice = UserId::new("alice");

    let report = engine.ingest(goal_contribution(70.0, 76.0)).await.unwrap();
    let created = report.created().next().unwrap().clone();

    clock.advance(Duration::minutes(10));
    let read = engine.mark_read(&alice, created.id).await.unwrap();
    assert!(read.is_read);
    assert_eq!(read.user_id, created.user_id);
    assert_eq!(read.created_at, created.created_at);
    assert_eq!(read.updated_at, start() + Duration::minutes(10));

    // A patch carries only mutable fields.
    let patch = NotificationPatch::mark_read();
    assert_eq!(patch.is_read, Some(true));
}

#[tokio::test]
async fn test_family_event_notifies_every_member_but_the_actor() {
    let clock = MockClock::new(start());
    let engine = engine(&clock);

    let report = engine
        .ingest(
            RawEvent::new("family", "family.member_joined")
                .subject("family-1")
                .user("alice")
                .user("bob")
                .user("carol")
                .with("familyName", "The Reyes")
                .with("actorUserId", "alice")
                .with("targetUserId", "carol")
                .with("targetName", "Carol"),
        )
        .await
        .unwrap();

    let mut recipients: Vec<_> = report
        .created()
        .map(|n| (n.user_id.as_str().to_string(), n.priority))
        .collect();
    recipients.sort();
    assert_eq!(
        recipients,
        vec![
            ("bob".to_string(), Priority::Medium),
            ("carol".to_string(), Priority::High),
        ]
    );
}
