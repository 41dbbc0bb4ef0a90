//! MessagePoller Lifecycle Tests
//!
//! Tests for:
//! - Immediate first cycle on start
//! - Idempotent start/stop
//! - Stop waiting for the in-flight cycle
//! - Stop cancelling the timer wait
//! - Restart after stop
//! - Surviving a panicking cycle

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use md_common::MessageStatus;
use md_dispatch::{
    DeliveryGateway, DeliveryReceipt, DispatchCycle, DispatchOrchestrator, InMemoryIdempotencyCache,
    InMemoryMessageStore, MessagePoller, OrchestratorConfig, Result,
};
use tokio::time::Instant;

const INTERVAL: Duration = Duration::from_secs(120);

/// Cycle that counts runs and optionally takes a while to finish
struct MockCycle {
    started: AtomicU32,
    completed: AtomicU32,
    in_flight: AtomicBool,
    duration: Duration,
}

impl MockCycle {
    fn new() -> Self {
        Self::with_duration(Duration::ZERO)
    }

    fn with_duration(duration: Duration) -> Self {
        Self {
            started: AtomicU32::new(0),
            completed: AtomicU32::new(0),
            in_flight: AtomicBool::new(false),
            duration,
        }
    }

    fn completed(&self) -> u32 {
        self.completed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DispatchCycle for MockCycle {
    async fn run(&self) {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.in_flight.store(true, Ordering::SeqCst);
        if !self.duration.is_zero() {
            tokio::time::sleep(self.duration).await;
        }
        self.in_flight.store(false, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Let spawned tasks make progress without crossing a tick
async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test(start_paused = true)]
async fn test_start_runs_first_cycle_immediately() {
    let cycle = Arc::new(MockCycle::new());
    let poller = MessagePoller::new(cycle.clone(), INTERVAL);

    poller.start().await.unwrap();
    settle().await;

    assert!(poller.is_running());
    assert_eq!(cycle.completed(), 1);

    poller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_cycles_repeat_on_interval() {
    let cycle = Arc::new(MockCycle::new());
    let poller = MessagePoller::new(cycle.clone(), INTERVAL);

    poller.start().await.unwrap();
    tokio::time::sleep(INTERVAL * 2 + INTERVAL / 2).await;

    assert_eq!(cycle.completed(), 3);
    poller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_double_start_yields_one_timer() {
    let cycle = Arc::new(MockCycle::new());
    let poller = MessagePoller::new(cycle.clone(), INTERVAL);

    poller.start().await.unwrap();
    poller.start().await.unwrap();
    tokio::time::sleep(INTERVAL * 3 + INTERVAL / 2).await;

    // One immediate cycle plus three ticks
    assert_eq!(cycle.completed(), 4);
    poller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_yield_one_timer() {
    let cycle = Arc::new(MockCycle::new());
    let poller = Arc::new(MessagePoller::new(cycle.clone(), INTERVAL));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let poller = poller.clone();
            tokio::spawn(async move { poller.start().await })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    tokio::time::sleep(INTERVAL + INTERVAL / 2).await;

    assert_eq!(cycle.completed(), 2);
    poller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_double_stop_is_noop() {
    let cycle = Arc::new(MockCycle::new());
    let poller = MessagePoller::new(cycle.clone(), INTERVAL);

    poller.start().await.unwrap();
    settle().await;

    assert!(poller.stop().await);
    assert!(!poller.is_running());

    assert!(!poller.stop().await);
    assert!(!poller.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stop_when_never_started() {
    let cycle = Arc::new(MockCycle::new());
    let poller = MessagePoller::new(cycle.clone(), INTERVAL);

    poller.stop().await;

    assert!(!poller.is_running());
    assert_eq!(cycle.completed(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_in_flight_cycle() {
    let cycle = Arc::new(MockCycle::with_duration(Duration::from_secs(30)));
    let poller = MessagePoller::new(cycle.clone(), INTERVAL);

    poller.start().await.unwrap();
    settle().await;
    assert!(cycle.in_flight.load(Ordering::SeqCst));
    assert_eq!(cycle.completed(), 0);

    poller.stop().await;

    assert!(!cycle.in_flight.load(Ordering::SeqCst));
    assert_eq!(cycle.completed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_cancels_timer_wait() {
    let cycle = Arc::new(MockCycle::new());
    let poller = MessagePoller::new(cycle.clone(), INTERVAL);

    poller.start().await.unwrap();
    settle().await;

    let before = Instant::now();
    poller.stop().await;
    assert!(before.elapsed() < Duration::from_secs(1));

    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(cycle.completed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let cycle = Arc::new(MockCycle::new());
    let poller = MessagePoller::new(cycle.clone(), INTERVAL);

    poller.start().await.unwrap();
    settle().await;
    poller.stop().await;

    poller.start().await.unwrap();
    settle().await;

    assert!(poller.is_running());
    assert_eq!(cycle.completed(), 2);
    poller.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_is_running_does_not_block_during_stop() {
    let cycle = Arc::new(MockCycle::with_duration(Duration::from_secs(30)));
    let poller = Arc::new(MessagePoller::new(cycle.clone(), INTERVAL));

    poller.start().await.unwrap();
    settle().await;

    let stopping = {
        let poller = poller.clone();
        tokio::spawn(async move { poller.stop().await })
    };
    settle().await;

    // stop() is parked on the in-flight cycle; status reads still answer
    assert!(!poller.is_running());
    assert!(cycle.in_flight.load(Ordering::SeqCst));

    stopping.await.unwrap();
    assert_eq!(cycle.completed(), 1);
}

/// Cycle whose first run panics
struct PanicOnceCycle {
    runs: AtomicU32,
}

#[async_trait]
impl DispatchCycle for PanicOnceCycle {
    async fn run(&self) {
        if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("store driver bug");
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_panicking_cycle_does_not_stall_poller() {
    let cycle = Arc::new(PanicOnceCycle { runs: AtomicU32::new(0) });
    let poller = MessagePoller::new(cycle.clone(), INTERVAL);

    poller.start().await.unwrap();
    tokio::time::sleep(INTERVAL * 2 + INTERVAL / 2).await;

    // Panicked first cycle, then two more on schedule
    assert!(poller.is_running());
    assert_eq!(cycle.runs.load(Ordering::SeqCst), 3);

    assert!(poller.stop().await);
    assert!(!poller.is_running());
}

struct InstantGateway;

#[async_trait]
impl DeliveryGateway for InstantGateway {
    async fn send(&self, recipient: &str, _content: &str) -> Result<DeliveryReceipt> {
        Ok(DeliveryReceipt::accepted(format!("prov-{}", recipient)))
    }
}

#[tokio::test(start_paused = true)]
async fn test_poller_drives_orchestrator() {
    let store = Arc::new(InMemoryMessageStore::new());
    let id = store.insert_pending("+1001", "hello");

    let orchestrator = Arc::new(DispatchOrchestrator::new(
        store.clone(),
        Arc::new(InMemoryIdempotencyCache::new()),
        Arc::new(InstantGateway),
        OrchestratorConfig::default(),
    ));
    let poller = MessagePoller::new(orchestrator, INTERVAL);

    poller.start().await.unwrap();
    settle().await;
    assert_eq!(store.get(id).unwrap().status, MessageStatus::Sent);

    let later = store.insert_pending("+1002", "later");
    tokio::time::sleep(INTERVAL).await;
    assert_eq!(store.get(later).unwrap().status, MessageStatus::Sent);

    poller.stop().await;
}
