//! Fixed-interval cycle scheduler.
//!
//! Runs one cycle immediately at startup, then one per tick. The
//! [`CycleGuard`] is a two-state machine (idle / running) with an atomic
//! transition: a tick that fires while a cycle is still running is logged
//! and dropped, never queued, so at most one cycle is ever active. A
//! cycle-fatal error is logged and the process keeps scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{error, warn};

use crate::sync::Synchronizer;

/// Idle/running flag with atomic transitions.
#[derive(Debug, Default)]
pub struct CycleGuard {
    running: AtomicBool,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt the idle → running transition. Returns false when a cycle
    /// is already active.
    pub fn try_begin(&self) -> bool {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Running → idle. Called exactly once per started cycle, on success
    /// and on failure alike.
    pub fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Run the synchronizer once, then on every tick until the task is
/// cancelled.
pub async fn run(sync: Arc<Synchronizer>, period: Duration) {
    let guard = Arc::new(CycleGuard::new());

    // process immediately after start
    if let Err(e) = sync.run_cycle().await {
        error!(error = %e, "startup scan cycle aborted");
    }

    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if !guard.try_begin() {
            warn!("skipping scan cycle - previous cycle is still active");
            continue;
        }

        let sync = Arc::clone(&sync);
        let guard = Arc::clone(&guard);
        tokio::spawn(async move {
            if let Err(e) = sync.run_cycle().await {
                error!(error = %e, "scan cycle aborted");
            }
            guard.finish();
        });
    }
}
