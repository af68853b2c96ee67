//! Background task that periodically deletes expired notifications.

use crate::application::lifecycle::LifecycleManager;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(3600);
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Error returned when sweeper configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SweeperConfigError {
    #[error("sweep interval must be greater than 0")]
    ZeroInterval,
}

/// Configuration for the expiry sweeper.
#[derive(Debug, Clone)]
pub struct SweeperConfig {
    /// How often to sweep.
    pub interval: Duration,
    /// How long `shutdown` waits for an in-flight sweep.
    pub shutdown_timeout: Duration,
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_SWEEP_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }
}

impl SweeperConfig {
    /// # Errors
    /// Returns `SweeperConfigError::ZeroInterval` if `interval` is zero.
    pub fn new(interval: Duration) -> Result<Self, SweeperConfigError> {
        if interval.is_zero() {
            return Err(SweeperConfigError::ZeroInterval);
        }
        Ok(Self {
            interval,
            ..Self::default()
        })
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Error returned by [`SweeperHandle::shutdown`].
#[derive(Debug, thiserror::Error)]
pub enum ShutdownError {
    #[error("sweeper did not stop within {0:?}")]
    Timeout(Duration),
    #[error("sweeper task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Runs [`LifecycleManager::sweep_expired`] on an interval.
#[derive(Debug)]
pub struct Sweeper {
    lifecycle: LifecycleManager,
    config: SweeperConfig,
}

impl Sweeper {
    pub fn new(lifecycle: LifecycleManager, config: SweeperConfig) -> Self {
        Self { lifecycle, config }
    }

    pub fn config(&self) -> &SweeperConfig {
        &self.config
    }

    /// Spawn the sweep loop. The first sweep runs immediately.
    ///
    /// Must be called from within a tokio runtime. The task keeps running
    /// until [`SweeperHandle::shutdown`] is called; dropping the handle does
    /// not stop it.
    pub fn start(self) -> SweeperHandle {
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let shutdown_timeout = self.config.shutdown_timeout;

        let task = tokio::spawn(async move {
            let mut ticker = interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => {
                        if let Err(error) = self.lifecycle.sweep_expired().await {
                            tracing::warn!(%error, "expiry sweep failed, retrying next tick");
                        }
                    }
                }
            }
            tracing::debug!("sweeper stopped");
        });

        SweeperHandle {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
            shutdown_timeout,
        }
    }
}

/// Handle to a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl SweeperHandle {
    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the loop, waiting for an in-flight sweep to finish.
    pub async fn shutdown(mut self) -> Result<(), ShutdownError> {
        if let Some(tx) = self.shutdown_tx.take() {
            // The task may already have exited.
            let _ = tx.send(());
        }
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        match tokio::time::timeout(self.shutdown_timeout, task).await {
            Ok(joined) => joined.map_err(ShutdownError::from),
            Err(_) => Err(ShutdownError::Timeout(self.shutdown_timeout)),
        }
    }
}
