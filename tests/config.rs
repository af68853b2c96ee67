//! Engines built from TOML configuration.

use chrono::{TimeZone, Utc};
use notification_engine::infrastructure::mocks::MockClock;
use notification_engine::{
    BuildError, ConfigError, EngineConfig, NotificationEngine, Priority, RawEvent, UserId,
};
use std::sync::Arc;

const HOUSEHOLD: &str = r#"
store_timeout_secs = 2
broadcast_capacity = 16
sweep_interval_secs = 600
instance_id = "worker-1"

[aggregation]
low = "disabled"

[expiry]
low_days = 3

[rules]
budget_thresholds = [50, 90, 100]
large_transaction_amount = 500.0
currency_symbol = "$"
"#;

fn engine(config: &EngineConfig) -> NotificationEngine {
    let clock = MockClock::new(Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap());
    NotificationEngine::builder()
        .with_config(config)
        .with_clock(Arc::new(clock))
        .build()
        .unwrap()
}

fn purchase(subject: &str, amount: f64) -> RawEvent {
    RawEvent::new("transaction", "transaction.created")
        .subject(subject)
        .user("alice")
        .with("accountId", "acct-1")
        .with("amount", amount)
        .with("category", "Groceries")
}

#[tokio::test]
async fn test_policies_from_toml_drive_the_rules() {
    let config = EngineConfig::from_toml_str(HOUSEHOLD).unwrap();
    let engine = engine(&config);

    let report = engine
        .ingest(
            RawEvent::new("budget", "budget.utilization_changed")
                .subject("budget-fun")
                .user("alice")
                .with("previousUtilization", 40.0)
                .with("utilization", 55.0),
        )
        .await
        .unwrap();
    let alert = report.created().next().unwrap();
    assert_eq!(alert.priority, Priority::High);
    assert!(alert.message.contains("50%"));

    let report = engine.ingest(purchase("txn-1", 640.0)).await.unwrap();
    let large = report.created().next().unwrap();
    assert!(large.message.contains("$640.00"), "{}", large.message);
}

#[tokio::test]
async fn test_disabled_window_keeps_every_occurrence() {
    let config = EngineConfig::from_toml_str(HOUSEHOLD).unwrap();
    let engine = engine(&config);
    let alice = UserId::new("alice");

    for n in 0..3 {
        engine
            .ingest(
                RawEvent::new("transaction", "transaction.created")
                    .subject(format!("txn-{n}"))
                    .user("alice")
                    .with("accountId", "acct-1")
                    .with("amount", 5.0),
            )
            .await
            .unwrap();
    }
    assert_eq!(engine.unread_count(&alice).await.unwrap(), 3);

    let page = engine
        .list(&alice, Default::default(), None, 10)
        .await
        .unwrap();
    let created = page.items[0].created_at;
    assert_eq!(page.items[0].expires_at, Some(created + chrono::Duration::days(3)));
}

#[test]
fn test_load_from_file() {
    let path = std::env::temp_dir().join(format!(
        "notification-engine-config-{}.toml",
        std::process::id()
    ));
    std::fs::write(&path, HOUSEHOLD).unwrap();
    let loaded = EngineConfig::load_from_file(&path);
    std::fs::remove_file(&path).unwrap();

    let config = loaded.unwrap();
    assert_eq!(config.instance_id.as_deref(), Some("worker-1"));
    assert_eq!(config.store_timeout(), std::time::Duration::from_secs(2));
    assert_eq!(config.rules.budget_thresholds, vec![50, 90, 100]);
}

#[test]
fn test_missing_file_is_io_error() {
    let result = EngineConfig::load_from_file("/nonexistent/notification-engine.toml");
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_invalid_policy_fails_the_build() {
    let config = EngineConfig {
        broadcast_capacity: 0,
        ..EngineConfig::default()
    };
    assert!(matches!(
        NotificationEngine::from_config(&config),
        Err(BuildError::ZeroBroadcastCapacity)
    ));
}
