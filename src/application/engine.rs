//! The engine facade: event intake in, notifications and live updates out.

use crate::application::aggregator::Aggregator;
use crate::application::config::EngineConfig;
use crate::application::error::NotificationError;
use crate::application::gateway::{PersistenceGateway, DEFAULT_STORE_TIMEOUT};
use crate::application::hub::{
    BroadcastHub, Subscription, DEFAULT_BROADCAST_CAPACITY, DEFAULT_SINK_CAPACITY,
};
use crate::application::ledger::MilestoneLedger;
use crate::application::lifecycle::{LifecycleManager, SweepOutcome, DEFAULT_SWEEP_LEASE};
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, DeliverySink, NotificationStore};
use crate::application::sweeper::{
    Sweeper, SweeperConfig, SweeperConfigError, SweeperHandle, DEFAULT_SWEEP_INTERVAL,
};
use crate::domain::admission::AdmitOutcome;
use crate::domain::event::{ingest, RawEvent};
use crate::domain::listing::{ListFilter, ListQuery, Page, PageCursor};
use crate::domain::notification::{Notification, NotificationEvent, NotificationId, UserId};
use crate::domain::policy::{AggregationPolicy, ExpiryPolicy, PolicyError, RulePolicy};
use crate::domain::rules::{RuleContext, RuleRegistry};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::memory_store::MemoryStore;
use std::sync::Arc;
use std::time::Duration;

/// Error returned when building a [`NotificationEngine`] fails.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BuildError {
    #[error("store timeout must be greater than 0")]
    ZeroStoreTimeout,
    #[error("broadcast capacity must be greater than 0")]
    ZeroBroadcastCapacity,
    #[error("sink queue capacity must be greater than 0")]
    ZeroSinkCapacity,
    #[error("sweep lease must be greater than 0")]
    ZeroLeaseTtl,
    #[error("invalid rule policy: {0}")]
    Policy(#[from] PolicyError),
    #[error("sweeper configuration error: {0}")]
    Sweeper(#[from] SweeperConfigError),
}

/// Notifications admitted for one inbound event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub accepted: Vec<AdmitOutcome>,
}

impl IngestReport {
    pub fn created(&self) -> impl Iterator<Item = &Notification> {
        self.accepted
            .iter()
            .filter(|o| o.is_created())
            .map(AdmitOutcome::notification)
    }

    pub fn merged(&self) -> impl Iterator<Item = &Notification> {
        self.accepted
            .iter()
            .filter(|o| !o.is_created())
            .map(AdmitOutcome::notification)
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty()
    }
}

/// Builder for [`NotificationEngine`].
pub struct NotificationEngineBuilder {
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn NotificationStore>>,
    rule_policy: RulePolicy,
    rules: Option<RuleRegistry>,
    aggregation: AggregationPolicy,
    expiry: ExpiryPolicy,
    store_timeout: Duration,
    broadcast_capacity: usize,
    broadcast_enabled: bool,
    sinks: Vec<Arc<dyn DeliverySink>>,
    sink_capacity: usize,
    sweep_interval: Duration,
    sweep_lease: Duration,
    instance_id: Option<String>,
    ledger: Option<MilestoneLedger>,
}

impl NotificationEngineBuilder {
    fn new() -> Self {
        Self {
            clock: None,
            store: None,
            rule_policy: RulePolicy::default(),
            rules: None,
            aggregation: AggregationPolicy::default(),
            expiry: ExpiryPolicy::default(),
            store_timeout: DEFAULT_STORE_TIMEOUT,
            broadcast_capacity: DEFAULT_BROADCAST_CAPACITY,
            broadcast_enabled: true,
            sinks: Vec::new(),
            sink_capacity: DEFAULT_SINK_CAPACITY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            sweep_lease: DEFAULT_SWEEP_LEASE,
            instance_id: None,
            ledger: None,
        }
    }

    /// Apply every value of a loaded configuration.
    pub fn with_config(mut self, config: &EngineConfig) -> Self {
        self.store_timeout = config.store_timeout();
        self.broadcast_capacity = config.broadcast_capacity;
        self.broadcast_enabled = config.broadcast_enabled;
        self.sink_capacity = config.sink_capacity;
        self.sweep_interval = config.sweep_interval();
        self.sweep_lease = config.sweep_lease();
        self.instance_id = config.instance_id.clone();
        self.aggregation = config.aggregation;
        self.expiry = config.expiry;
        self.rule_policy = config.rules.clone();
        self
    }

    /// Use a custom clock. Tests pass a `MockClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Persist through `store` instead of the in-memory default.
    pub fn with_store(mut self, store: Arc<dyn NotificationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Thresholds for the built-in rules. Ignored when `with_rules` is used.
    pub fn with_rule_policy(mut self, policy: RulePolicy) -> Self {
        self.rule_policy = policy;
        self
    }

    /// Replace the rule table, for example one with extra rules registered.
    pub fn with_rules(mut self, rules: RuleRegistry) -> Self {
        self.rules = Some(rules);
        self
    }

    pub fn with_aggregation_policy(mut self, policy: AggregationPolicy) -> Self {
        self.aggregation = policy;
        self
    }

    pub fn with_expiry_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.expiry = policy;
        self
    }

    /// Upper bound on every store call.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Events each live session may fall behind before losing the oldest.
    pub fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Run without live fan-out; `subscribe` then returns `None`.
    pub fn without_broadcast(mut self) -> Self {
        self.broadcast_enabled = false;
        self
    }

    /// Feed every published change to `sink` as well.
    pub fn with_delivery_sink(mut self, sink: Arc<dyn DeliverySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Changes each sink may fall behind before losing the oldest.
    pub fn with_sink_capacity(mut self, capacity: usize) -> Self {
        self.sink_capacity = capacity;
        self
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    pub fn with_sweep_lease(mut self, ttl: Duration) -> Self {
        self.sweep_lease = ttl;
        self
    }

    /// Name under which this instance takes the sweep lease.
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Share a milestone ledger between engines of the same process.
    pub fn with_ledger(mut self, ledger: MilestoneLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    /// # Errors
    /// Returns `BuildError` if the configuration is invalid.
    pub fn build(self) -> Result<NotificationEngine, BuildError> {
        if self.store_timeout.is_zero() {
            return Err(BuildError::ZeroStoreTimeout);
        }
        if self.broadcast_enabled && self.broadcast_capacity == 0 {
            return Err(BuildError::ZeroBroadcastCapacity);
        }
        if self.broadcast_enabled && !self.sinks.is_empty() && self.sink_capacity == 0 {
            return Err(BuildError::ZeroSinkCapacity);
        }
        if self.sweep_lease.is_zero() {
            return Err(BuildError::ZeroLeaseTtl);
        }
        let sweeper = SweeperConfig::new(self.sweep_interval)?;
        let rules = match self.rules {
            Some(rules) => rules,
            None => RuleRegistry::with_defaults(self.rule_policy),
        };
        rules.policy().validate()?;

        let metrics = Metrics::new();
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let gateway = PersistenceGateway::new(store, self.store_timeout, metrics.clone());
        let hub = self.broadcast_enabled.then(|| {
            Arc::new(
                BroadcastHub::new(self.broadcast_capacity, metrics.clone())
                    .with_sinks(self.sinks, self.sink_capacity),
            )
        });
        let ledger = self.ledger.unwrap_or_default();

        let mut lifecycle = LifecycleManager::new(
            gateway.clone(),
            hub.clone(),
            Arc::clone(&clock),
            ledger.clone(),
            metrics.clone(),
        )
        .with_lease_ttl(self.sweep_lease);
        if let Some(id) = self.instance_id {
            lifecycle = lifecycle.with_holder(id);
        }

        Ok(NotificationEngine {
            inner: Arc::new(EngineInner {
                clock,
                rules,
                aggregator: Aggregator::new(self.aggregation, self.expiry),
                gateway,
                hub,
                lifecycle,
                ledger,
                metrics,
                sweeper,
            }),
        })
    }
}

#[derive(Debug)]
struct EngineInner {
    clock: Arc<dyn Clock>,
    rules: RuleRegistry,
    aggregator: Aggregator,
    gateway: PersistenceGateway,
    hub: Option<Arc<BroadcastHub>>,
    lifecycle: LifecycleManager,
    ledger: MilestoneLedger,
    metrics: Metrics,
    sweeper: SweeperConfig,
}

/// Turns domain events into persisted, deduplicated notifications and
/// fans changes out to live sessions.
///
/// Clones share the same state.
///
/// ```no_run
/// use notification_engine::{NotificationEngine, RawEvent, UserId};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let engine = NotificationEngine::builder().build()?;
/// let alice = UserId::new("alice");
/// let mut live = engine.subscribe(&alice);
///
/// engine
///     .ingest(
///         RawEvent::new("budget", "budget.utilization_changed")
///             .subject("groceries")
///             .user("alice")
///             .with("budgetName", "Groceries")
///             .with("utilization", 83.0)
///             .with("previousUtilization", 78.0),
///     )
///     .await?;
///
/// assert_eq!(engine.unread_count(&alice).await?, 1);
/// if let Some(session) = live.as_mut() {
///     let change = session.recv().await;
///     assert!(change.is_some());
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NotificationEngine {
    inner: Arc<EngineInner>,
}

impl NotificationEngine {
    /// Defaults: in-memory store, system clock, built-in rules, 5s store
    /// timeout, 64-event session queues, hourly sweep.
    pub fn builder() -> NotificationEngineBuilder {
        NotificationEngineBuilder::new()
    }

    /// Build an engine from a loaded configuration and otherwise defaults.
    pub fn from_config(config: &EngineConfig) -> Result<Self, BuildError> {
        Self::builder().with_config(config).build()
    }

    /// Trigger: evaluate an event with only the engine's own milestone ledger.
    pub async fn ingest(&self, raw: RawEvent) -> Result<IngestReport, NotificationError> {
        self.ingest_with_context(raw, RuleContext::new()).await
    }

    /// Trigger with extra caller-supplied milestone marks.
    ///
    /// Candidates are admitted one by one. A candidate carrying milestone
    /// marks is admitted only if it wins at least one of them in the store;
    /// otherwise another producer already notified it. If a store call
    /// fails, records admitted before it stay and the error is returned.
    #[tracing::instrument(
        skip_all,
        fields(source_module = ?raw.source_module, event_kind = ?raw.event_kind)
    )]
    pub async fn ingest_with_context(
        &self,
        raw: RawEvent,
        mut context: RuleContext,
    ) -> Result<IngestReport, NotificationError> {
        let inner = &self.inner;
        let now = inner.clock.now();

        let event = match ingest(raw, now) {
            Ok(event) => event,
            Err(error) => {
                inner.metrics.record_rejected();
                tracing::warn!(%error, "dropping malformed event");
                return Err(error.into());
            }
        };
        inner.metrics.record_ingested();

        context.extend(inner.ledger.context_for(&event).iter().cloned());
        let candidates = inner.rules.evaluate(&event, &context);
        if candidates.is_empty() {
            tracing::debug!(subject_id = %event.subject_id, "no rule fired");
            return Ok(IngestReport::default());
        }

        let mut report = IngestReport {
            accepted: Vec::with_capacity(candidates.len()),
        };
        for candidate in candidates {
            let claimed = inner
                .ledger
                .claim(&inner.gateway, &candidate.milestones, now)
                .await?;
            if !candidate.milestones.is_empty() && claimed.is_empty() {
                inner.metrics.record_suppressed();
                tracing::debug!(
                    user_id = %candidate.user_id,
                    event_kind = %candidate.event_kind,
                    "milestone already notified"
                );
                continue;
            }

            let turn = match &inner.hub {
                Some(hub) => Some(hub.turn(&candidate.user_id).await),
                None => None,
            };
            let outcome = match inner.aggregator.admit(&inner.gateway, &candidate, now).await {
                Ok(outcome) => outcome,
                Err(error) => {
                    drop(turn);
                    inner.ledger.release(&inner.gateway, &claimed).await;
                    return Err(error);
                }
            };

            let change = match &outcome {
                AdmitOutcome::Created(n) => {
                    inner.metrics.record_created();
                    NotificationEvent::created(n.clone())
                }
                AdmitOutcome::Merged(n) => {
                    inner.metrics.record_merged();
                    NotificationEvent::updated(n.clone())
                }
            };
            if let Some(hub) = &inner.hub {
                hub.publish(change);
            }
            drop(turn);
            report.accepted.push(outcome);
        }
        Ok(report)
    }

    /// One page of `user`'s live notifications, most important first.
    #[tracing::instrument(skip(self, filter, cursor), fields(user_id = %user))]
    pub async fn list(
        &self,
        user: &UserId,
        filter: ListFilter,
        cursor: Option<PageCursor>,
        limit: usize,
    ) -> Result<Page, NotificationError> {
        let query = ListQuery::new(filter, cursor, limit);
        self.inner
            .gateway
            .list(user, &query, self.inner.clock.now())
            .await
    }

    /// Unread badge, always derived from the store.
    pub async fn unread_count(&self, user: &UserId) -> Result<u64, NotificationError> {
        self.inner
            .gateway
            .count_unread(user, self.inner.clock.now())
            .await
    }

    pub async fn get(
        &self,
        user: &UserId,
        id: NotificationId,
    ) -> Result<Notification, NotificationError> {
        self.inner.lifecycle.get(user, id).await
    }

    #[tracing::instrument(skip(self), fields(user_id = %user, notification_id = %id))]
    pub async fn mark_read(
        &self,
        user: &UserId,
        id: NotificationId,
    ) -> Result<Notification, NotificationError> {
        self.inner.lifecycle.mark_read(user, id).await
    }

    /// Returns how many records changed.
    #[tracing::instrument(skip(self), fields(user_id = %user))]
    pub async fn mark_all_read(&self, user: &UserId) -> Result<u64, NotificationError> {
        self.inner.lifecycle.mark_all_read(user).await
    }

    #[tracing::instrument(skip(self), fields(user_id = %user, notification_id = %id))]
    pub async fn delete(&self, user: &UserId, id: NotificationId) -> Result<(), NotificationError> {
        self.inner.lifecycle.delete(user, id).await
    }

    /// Open a live session. `None` when the engine runs without broadcast.
    pub fn subscribe(&self, user: &UserId) -> Option<Subscription> {
        self.inner.hub.as_ref().map(|hub| hub.subscribe(user))
    }

    /// Run one expiry sweep now.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_expired(&self) -> Result<SweepOutcome, NotificationError> {
        self.inner.lifecycle.sweep_expired().await
    }

    /// Spawn the periodic sweeper. Must be called inside a tokio runtime.
    pub fn start_sweeper(&self) -> SweeperHandle {
        Sweeper::new(self.inner.lifecycle.clone(), self.inner.sweeper.clone()).start()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }

    pub fn rules(&self) -> &RuleRegistry {
        &self.inner.rules
    }

    pub fn ledger(&self) -> &MilestoneLedger {
        &self.inner.ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;
    use chrono::{TimeZone, Utc};

    fn engine() -> NotificationEngine {
        let clock = Arc::new(MockClock::new(
            Utc.with_ymd_and_hms(2026, 10, 18, 9, 0, 0).unwrap(),
        ));
        NotificationEngine::builder()
            .with_clock(clock)
            .build()
            .unwrap()
    }

    #[derive(Debug)]
    struct NullSink;

    #[async_trait::async_trait]
    impl DeliverySink for NullSink {
        fn name(&self) -> &str {
            "null"
        }

        async fn deliver(
            &self,
            _event: &NotificationEvent,
        ) -> Result<(), crate::application::ports::SinkError> {
            Ok(())
        }
    }

    #[test]
    fn test_build_rejects_invalid_values() {
        assert_eq!(
            NotificationEngine::builder()
                .with_store_timeout(Duration::ZERO)
                .build()
                .unwrap_err(),
            BuildError::ZeroStoreTimeout
        );
        assert_eq!(
            NotificationEngine::builder()
                .with_broadcast_capacity(0)
                .build()
                .unwrap_err(),
            BuildError::ZeroBroadcastCapacity
        );
        assert!(NotificationEngine::builder()
            .with_broadcast_capacity(0)
            .without_broadcast()
            .build()
            .is_ok());
        assert_eq!(
            NotificationEngine::builder()
                .with_delivery_sink(Arc::new(NullSink))
                .with_sink_capacity(0)
                .build()
                .unwrap_err(),
            BuildError::ZeroSinkCapacity
        );
        assert_eq!(
            NotificationEngine::builder()
                .with_sweep_interval(Duration::ZERO)
                .build()
                .unwrap_err(),
            BuildError::Sweeper(SweeperConfigError::ZeroInterval)
        );
        let policy = RulePolicy {
            goal_milestones: Vec::new(),
            ..RulePolicy::default()
        };
        assert!(matches!(
            NotificationEngine::builder()
                .with_rule_policy(policy)
                .build()
                .unwrap_err(),
            BuildError::Policy(_)
        ));
    }

    #[tokio::test]
    async fn test_malformed_event_is_counted_and_rejected() {
        let engine = engine();
        let err = engine
            .ingest(RawEvent::new("budget", "budget.utilization_changed").subject("b-1"))
            .await
            .unwrap_err();

        assert!(matches!(err, NotificationError::Intake(_)));
        assert_eq!(err.code(), "NOTIF_001");
        assert_eq!(engine.metrics().events_rejected(), 1);
        assert_eq!(engine.metrics().events_ingested(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_event_produces_empty_report() {
        let engine = engine();
        let report = engine
            .ingest(RawEvent::new("goal", "goal.renamed").subject("g-1").user("alice"))
            .await
            .unwrap();
        assert!(report.is_empty());
        assert_eq!(engine.metrics().events_ingested(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_disabled_without_broadcast() {
        let engine = NotificationEngine::builder()
            .without_broadcast()
            .build()
            .unwrap();
        assert!(engine.subscribe(&UserId::new("alice")).is_none());
    }
}
