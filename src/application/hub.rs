//! Per-user fan-out of notification changes to live sessions.
//!
//! Each user with at least one live session owns a bounded
//! `tokio::sync::broadcast` channel. Publishing never blocks: when a session
//! falls behind, it loses the oldest events it had not read yet and keeps
//! going. Other sessions are unaffected.
//!
//! Delivery sinks get the same treatment: every sink has its own bounded
//! queue drained by a spawned task, so a slow transport never holds up the
//! producer that published.
//!
//! Writers take the owner's [`UserTurn`] before their store write and
//! publish before releasing it, which keeps each user's stream in write
//! order.

use crate::application::metrics::Metrics;
use crate::application::ports::DeliverySink;
use crate::application::sequencer::{UserSequencer, UserTurn};
use crate::domain::notification::{NotificationEvent, UserId};
use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

pub const DEFAULT_BROADCAST_CAPACITY: usize = 64;
pub const DEFAULT_SINK_CAPACITY: usize = 256;

/// Registry of per-user broadcast channels plus optional push sinks.
#[derive(Debug)]
pub struct BroadcastHub {
    channels: DashMap<UserId, broadcast::Sender<NotificationEvent>, RandomState>,
    capacity: usize,
    sinks: Vec<SinkQueue>,
    sequencer: UserSequencer,
    metrics: Metrics,
}

impl BroadcastHub {
    /// Create a hub whose per-user queues hold `capacity` events.
    ///
    /// A zero capacity is raised to 1.
    pub fn new(capacity: usize, metrics: Metrics) -> Self {
        Self {
            channels: DashMap::with_hasher(RandomState::new()),
            capacity: capacity.max(1),
            sinks: Vec::new(),
            sequencer: UserSequencer::new(),
            metrics,
        }
    }

    /// Attach push sinks, each with a queue of `queue_capacity` changes.
    pub fn with_sinks(mut self, sinks: Vec<Arc<dyn DeliverySink>>, queue_capacity: usize) -> Self {
        self.sinks = sinks
            .into_iter()
            .map(|sink| SinkQueue::new(sink, queue_capacity))
            .collect();
        self
    }

    /// Wait until no other writer is between store write and publish for
    /// `user`.
    pub async fn turn(&self, user: &UserId) -> UserTurn {
        self.sequencer.turn(user).await
    }

    /// Open a live session for `user`.
    pub fn subscribe(&self, user: &UserId) -> Subscription {
        let receiver = self
            .channels
            .entry(user.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        tracing::debug!(user_id = %user, "session subscribed");

        Subscription {
            user: user.clone(),
            receiver,
            metrics: self.metrics.clone(),
        }
    }

    /// Deliver a change to every live session of its owner and to every sink.
    ///
    /// Returns the number of sessions that received it.
    pub fn publish(&self, event: NotificationEvent) -> usize {
        for queue in &self.sinks {
            queue.push(&event, &self.metrics);
        }

        let user = event.user_id().clone();
        let sent = match self.channels.get(&user) {
            Some(sender) => sender.send(event).ok(),
            None => return 0,
        };

        match sent {
            Some(receivers) => {
                tracing::debug!(user_id = %user, receivers, "change fanned out");
                receivers
            }
            None => {
                // Every session of this user is gone.
                self.channels
                    .remove_if(&user, |_, sender| sender.receiver_count() == 0);
                0
            }
        }
    }

    /// Number of live sessions of `user`.
    pub fn session_count(&self, user: &UserId) -> usize {
        self.channels
            .get(user)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Number of users with a channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Drop channels whose sessions have all closed.
    pub fn prune(&self) {
        self.channels.retain(|_, sender| sender.receiver_count() > 0);
    }
}

/// Bounded queue in front of one delivery sink.
///
/// The drain task starts on the first publish, which always runs inside a
/// tokio runtime, and stops once the hub is dropped and the queue is empty.
#[derive(Debug)]
struct SinkQueue {
    name: String,
    sender: broadcast::Sender<NotificationEvent>,
    started: AtomicBool,
    idle: Mutex<Option<(Arc<dyn DeliverySink>, broadcast::Receiver<NotificationEvent>)>>,
}

impl SinkQueue {
    fn new(sink: Arc<dyn DeliverySink>, capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel(capacity.max(1));
        Self {
            name: sink.name().to_string(),
            sender,
            started: AtomicBool::new(false),
            idle: Mutex::new(Some((sink, receiver))),
        }
    }

    fn push(&self, event: &NotificationEvent, metrics: &Metrics) {
        if !self.started.load(Ordering::Acquire) {
            self.start(metrics);
        }
        if self.sender.send(event.clone()).is_err() {
            tracing::debug!(sink = %self.name, "delivery sink is gone, change not queued");
        }
    }

    fn start(&self, metrics: &Metrics) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            // Changes stay queued until a publish happens inside a runtime.
            return;
        };
        let Ok(mut idle) = self.idle.lock() else {
            return;
        };
        if let Some((sink, receiver)) = idle.take() {
            runtime.spawn(drain(sink, receiver, metrics.clone()));
            self.started.store(true, Ordering::Release);
        }
    }
}

async fn drain(
    sink: Arc<dyn DeliverySink>,
    mut queue: broadcast::Receiver<NotificationEvent>,
    metrics: Metrics,
) {
    loop {
        match queue.recv().await {
            Ok(event) => {
                if let Err(error) = sink.deliver(&event).await {
                    tracing::warn!(
                        sink = sink.name(),
                        notification_id = %event.notification.id,
                        %error,
                        "delivery sink failed"
                    );
                }
            }
            Err(RecvError::Lagged(missed)) => {
                metrics.record_sink_dropped(missed);
                tracing::warn!(
                    sink = sink.name(),
                    missed,
                    "delivery sink fell behind, oldest changes dropped"
                );
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::debug!(sink = sink.name(), "delivery sink stopped");
}

/// One live session's stream of changes.
#[derive(Debug)]
pub struct Subscription {
    user: UserId,
    receiver: broadcast::Receiver<NotificationEvent>,
    metrics: Metrics,
}

impl Subscription {
    pub fn user(&self) -> &UserId {
        &self.user
    }

    /// Wait for the next change. Returns `None` once the hub is gone.
    ///
    /// Events dropped because this session lagged are counted and skipped.
    pub async fn recv(&mut self) -> Option<NotificationEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(RecvError::Lagged(missed)) => self.lagged(missed),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next change if one is queued.
    pub fn try_recv(&mut self) -> Option<NotificationEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(missed)) => self.lagged(missed),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    fn lagged(&self, missed: u64) {
        self.metrics.record_lagged(missed);
        tracing::debug!(user_id = %self.user, missed, "session lagged, oldest events dropped");
    }
}
