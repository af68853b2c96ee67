//! # notification-engine
//!
//! Event-driven notifications for a household finance application.
//!
//! Domain services (budgets, goals, family groups, transactions) report what
//! happened; the engine decides what users should hear about, stores it once
//! per user, collapses repeats, and pushes every change to the user's live
//! sessions.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notification_engine::{ListFilter, NotificationEngine, RawEvent, UserId};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = NotificationEngine::builder().build()?;
//! let sweeper = engine.start_sweeper();
//!
//! engine
//!     .ingest(
//!         RawEvent::new("goal", "goal.contribution")
//!             .subject("goal-7")
//!             .user("alice")
//!             .with("goalName", "Emergency fund")
//!             .with("progress", 52.0)
//!             .with("previousProgress", 48.0),
//!     )
//!     .await?;
//!
//! let alice = UserId::new("alice");
//! let page = engine.list(&alice, ListFilter::unread(), None, 20).await?;
//! for n in &page.items {
//!     println!("[{}] {}: {}", n.priority, n.title, n.message);
//! }
//!
//! sweeper.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Pipeline
//!
//! 1. **Intake** validates a [`RawEvent`] into a [`CanonicalEvent`]. Malformed
//!    events are dropped with a WARN log and [`NotificationError::Intake`].
//! 2. **Rules** ([`RuleRegistry`]) map the event to candidates, one pass per
//!    recipient. Thresholds already notified are read from the
//!    [`MilestoneLedger`], and each new one is claimed in the store before
//!    its alert is admitted, so it fires once per period even across
//!    concurrent producers and instances.
//! 3. **Aggregation** computes a dedup key from module, kind, subject, user and
//!    time bucket. Low and medium priority candidates in the same UTC day
//!    merge into one record ("3 large transactions today").
//! 4. **Persistence** goes through a [`NotificationStore`]; every call is
//!    bounded by a timeout (5s by default).
//! 5. **Broadcast** fans each change out to the owner's live sessions over a
//!    bounded channel, in the order the writes completed. A slow session
//!    loses its oldest events, nobody else does. Delivery sinks are drained
//!    from their own queues and never hold up a producer.
//!
//! ## Configuration
//!
//! Every threshold and window is a policy value. Load them from TOML with
//! [`EngineConfig::from_toml_str`] and apply with
//! [`NotificationEngineBuilder::with_config`].
//!
//! ## Storage
//!
//! [`MemoryStore`] is the default. With the `redis-storage` feature,
//! `RedisStore` lets several instances share records; only one of them sweeps
//! at a time thanks to the sweep lease.
//!
//! ## Testing
//!
//! The `test-helpers` feature exports `MockClock`, `LogCapture` and
//! `FaultyStore` under [`infrastructure::mocks`].

// Domain layer - pure business logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    admission::AdmitOutcome,
    dedup::DedupKey,
    event::{ingest, CanonicalEvent, IntakeError, RawEvent, SourceModule},
    listing::{ListFilter, Page, PageCursor},
    notification::{
        Notification, NotificationEvent, NotificationEventKind, NotificationId,
        NotificationPatch, PatchError, Priority, Severity, UserId,
    },
    policy::{AggregationPolicy, AggregationWindow, ExpiryPolicy, PolicyError, RulePolicy},
    rules::{MilestoneMark, NotificationCandidate, RuleContext, RuleInput, RuleRegistry},
};

pub use application::{
    config::{ConfigError, EngineConfig},
    engine::{BuildError, IngestReport, NotificationEngine, NotificationEngineBuilder},
    error::NotificationError,
    hub::Subscription,
    ledger::MilestoneLedger,
    lifecycle::SweepOutcome,
    metrics::{Metrics, MetricsSnapshot},
    ports::{Clock, DeliverySink, NotificationStore, SinkError, StoreError},
    sweeper::{ShutdownError, SweeperHandle},
};

pub use infrastructure::{clock::SystemClock, memory_store::MemoryStore, storage::ShardedStorage};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_store::{RedisStore, RedisStoreConfig};
