//! Periodic background tasks.
//!
//! Sweeping and count refreshing run on their own fixed intervals,
//! independent of request handling. Each is a [`Tick`] implementation;
//! [`PeriodicTask`] drives it until stopped, and tests call
//! [`Tick::tick`] directly instead of waiting on timers.

use crate::store::StoreError;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// One unit of periodic background work.
#[async_trait]
pub trait Tick: Send + Sync + 'static {
    /// Task name, for logs.
    fn name(&self) -> &'static str;

    /// Run a single pass.
    ///
    /// A failed pass leaves shared state unchanged; the next tick retries.
    async fn tick(&self) -> Result<(), StoreError>;
}

/// A running periodic task.
///
/// Ticks never overlap: a tick that overruns its period causes the missed
/// ticks to be skipped rather than queued.
pub struct PeriodicTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl PeriodicTask {
    /// Spawn `task` on the current runtime, ticking every `period`.
    ///
    /// The first tick runs immediately.
    #[must_use]
    pub fn spawn<T: Tick + ?Sized>(task: Arc<T>, period: Duration) -> Self {
        let name = task.name();
        let cancel = CancellationToken::new();
        let stopped = cancel.clone();
        let period = period.max(Duration::from_millis(1));

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = stopped.cancelled() => break,

                    _ = interval.tick() => {
                        if let Err(e) = task.tick().await {
                            warn!(task = name, error = %e, "Background tick failed");
                        }
                    }
                }
            }

            debug!(task = name, "Background task stopped");
        });

        info!(task = name, period_ms = period.as_millis() as u64, "Background task started");

        Self {
            name,
            cancel,
            handle,
        }
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Whether the task has exited.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task, waiting for an in-flight tick to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            error!(task = self.name, error = %e, "Background task ended abnormally");
        }
    }
}
