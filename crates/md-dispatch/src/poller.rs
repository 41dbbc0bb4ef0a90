//! Message Poller
//!
//! Lifecycle controller for the recurring dispatch cycle. One cycle runs
//! immediately on `start()`, then once per poll interval until `stop()`.
//! `stop()` cancels the timer wait and waits for an in-flight cycle to finish.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::{DispatchError, Result};

/// One unit of recurring work driven by the poller
#[async_trait]
pub trait DispatchCycle: Send + Sync {
    /// Run a full cycle. Failures are handled and logged by the implementation.
    async fn run(&self);
}

struct PollerTask {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

pub struct MessagePoller {
    cycle: Arc<dyn DispatchCycle>,
    poll_interval: Duration,
    /// Mirror of `task.is_some()` so status reads never wait on the lock
    running: AtomicBool,
    task: Mutex<Option<PollerTask>>,
}

impl MessagePoller {
    pub fn new(cycle: Arc<dyn DispatchCycle>, poll_interval: Duration) -> Self {
        Self {
            cycle,
            poll_interval,
            running: AtomicBool::new(false),
            task: Mutex::new(None),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Start polling. Calling this while already running does nothing.
    pub async fn start(&self) -> Result<()> {
        if self.poll_interval.is_zero() {
            return Err(DispatchError::Config("poll interval must be greater than zero".to_string()));
        }

        let mut task = self.task.lock().await;
        match task.as_ref() {
            Some(existing) if existing.handle.is_finished() => {
                warn!("Message poller loop had exited, restarting");
                *task = None;
            }
            Some(_) => {
                debug!("Message poller already running");
                return Ok(());
            }
            None => {}
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(poll_loop(self.cycle.clone(), self.poll_interval, shutdown_rx));

        *task = Some(PollerTask { shutdown_tx, handle });
        self.running.store(true, Ordering::SeqCst);

        info!(poll_interval_secs = self.poll_interval.as_secs(), "Message poller started");
        Ok(())
    }

    /// Stop polling and wait until any in-flight cycle has completed.
    /// Returns `false` when the poller was already stopped.
    pub async fn stop(&self) -> bool {
        let mut task = self.task.lock().await;
        let Some(PollerTask { shutdown_tx, handle }) = task.take() else {
            debug!("Message poller not running");
            return false;
        };

        self.running.store(false, Ordering::SeqCst);
        let _ = shutdown_tx.send(true);

        if let Err(e) = handle.await {
            error!(error = %e, "Message poller task ended abnormally");
        }

        info!("Message poller stopped");
        true
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn poll_loop(
    cycle: Arc<dyn DispatchCycle>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    run_isolated(&cycle).await;

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            // Also resolves when the sender is dropped
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => run_isolated(&cycle).await,
        }
    }

    debug!("Message poller loop exited");
}

/// Run one cycle on its own task so a panic ends that cycle, not the timer
async fn run_isolated(cycle: &Arc<dyn DispatchCycle>) {
    let cycle = cycle.clone();
    if let Err(e) = tokio::spawn(async move { cycle.run().await }).await {
        error!(error = %e, "Dispatch cycle panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingCycle {
        runs: AtomicU32,
    }

    #[async_trait]
    impl DispatchCycle for CountingCycle {
        async fn run(&self) {
            self.runs.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_zero_interval_rejected() {
        let cycle = Arc::new(CountingCycle { runs: AtomicU32::new(0) });
        let poller = MessagePoller::new(cycle, Duration::ZERO);

        assert!(matches!(poller.start().await, Err(DispatchError::Config(_))));
        assert!(!poller.is_running());
    }

    #[tokio::test]
    async fn test_stop_reports_whether_running() {
        let cycle = Arc::new(CountingCycle { runs: AtomicU32::new(0) });
        let poller = MessagePoller::new(cycle, Duration::from_secs(120));

        assert!(!poller.stop().await);
        poller.start().await.unwrap();
        assert!(poller.stop().await);
        assert!(!poller.stop().await);
    }

    #[tokio::test]
    async fn test_initial_state() {
        let cycle = Arc::new(CountingCycle { runs: AtomicU32::new(0) });
        let poller = MessagePoller::new(cycle, Duration::from_secs(120));
        assert!(!poller.is_running());
        assert_eq!(poller.poll_interval(), Duration::from_secs(120));
    }
}
