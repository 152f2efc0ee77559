//! Background timing: debounced re-analysis and periodic maintenance
//!
//! Both need a tokio runtime. Callers outside a runtime get a skipped
//! schedule (debounce) or a `RuntimeUnavailable` error (maintenance) instead
//! of a panic.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::errors::{ExperimentError, Result};

struct PendingTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

/// Per-key trailing-edge debounce
///
/// Each `schedule` aborts the key's pending timer and starts a new one, so
/// only the last call of a burst runs its task.
pub struct Debouncer {
    delay: Duration,
    timers: Mutex<HashMap<String, PendingTimer>>,
    next_generation: AtomicU64,
    fired: AtomicU64,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            timers: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
            fired: AtomicU64::new(0),
        })
    }

    /// Schedule `task` to run once `delay` passes without another call for `key`
    ///
    /// Returns false when no tokio runtime is available.
    pub fn schedule<F>(self: &Arc<Self>, key: &str, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let Ok(runtime) = Handle::try_current() else {
            debug!(key, "No tokio runtime, debounced task not scheduled");
            return false;
        };

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let debouncer = Arc::downgrade(self);
        let delay = self.delay;
        let owned_key = key.to_string();

        let mut timers = self.timers.lock();
        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(debouncer) = debouncer.upgrade() {
                debouncer.finish(&owned_key, generation);
            }
            task();
        });

        if let Some(previous) = timers.insert(key.to_string(), PendingTimer { generation, handle }) {
            previous.handle.abort();
        }
        true
    }

    fn finish(&self, key: &str, generation: u64) {
        let mut timers = self.timers.lock();
        if timers.get(key).is_some_and(|t| t.generation == generation) {
            timers.remove(key);
        }
        self.fired.fetch_add(1, Ordering::Relaxed);
    }

    /// Abort the pending timer for `key`
    pub fn cancel(&self, key: &str) -> bool {
        match self.timers.lock().remove(key) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, timer) in self.timers.lock().drain() {
            timer.handle.abort();
        }
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.timers.lock().contains_key(key)
    }

    pub fn pending(&self) -> usize {
        self.timers.lock().len()
    }

    /// Timers that ran to completion
    pub fn fired(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Counts from one retention sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Ledger events older than the cutoff
    pub events_removed: usize,
    /// Assignments of finished or missing experiments, or assigned before the cutoff
    pub assignments_removed: usize,
    /// Events trimmed from surviving assignments
    pub participant_events_trimmed: usize,
}

impl SweepReport {
    pub fn total(&self) -> usize {
        self.events_removed + self.assignments_removed + self.participant_events_trimmed
    }
}

/// Handle to a periodic maintenance task; stops it on `shutdown` or drop
#[derive(Debug)]
pub struct MaintenanceHandle {
    handle: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub fn shutdown(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// Run `tick` every `period` against a weakly held target
///
/// The first tick happens one full period after the call. The loop ends once
/// the target has been dropped.
pub fn spawn_periodic<T, F>(period: Duration, target: Weak<T>, mut tick: F) -> Result<MaintenanceHandle>
where
    T: Send + Sync + 'static,
    F: FnMut(&T) + Send + 'static,
{
    let runtime = Handle::try_current().map_err(|e| {
        ExperimentError::RuntimeUnavailable(format!("maintenance needs a tokio runtime: {e}"))
    })?;

    let handle = runtime.spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately
        interval.tick().await;

        loop {
            interval.tick().await;
            let Some(strong) = target.upgrade() else {
                debug!("Maintenance target dropped, stopping");
                break;
            };
            tick(strong.as_ref());
        }
    });

    Ok(MaintenanceHandle {
        handle: Some(handle),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_runs_task_once() {
        let debouncer = Debouncer::new(Duration::from_secs(10));
        let runs = Arc::new(AtomicUsize::new(0));

        for _ in 0..5 {
            let runs = Arc::clone(&runs);
            assert!(debouncer.schedule("exp", move || {
                runs.fetch_add(1, Ordering::SeqCst);
            }));
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert!(debouncer.is_pending("exp"));

        tokio::time::sleep(Duration::from_secs(9)).await;
        settle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(debouncer.fired(), 1);
        assert_eq!(debouncer.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));

        for key in ["a", "b"] {
            let runs = Arc::clone(&runs);
            debouncer.schedule(key, move || {
                runs.fetch_add(1, Ordering::SeqCst);
            });
        }

        tokio::time::sleep(Duration::from_millis(150)).await;
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_prevents_run() {
        let debouncer = Debouncer::new(Duration::from_millis(100));
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&runs);
        debouncer.schedule("exp", move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(debouncer.cancel("exp"));
        assert!(!debouncer.cancel("exp"));

        tokio::time::sleep(Duration::from_millis(500)).await;
        settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(debouncer.fired(), 0);
    }

    #[test]
    fn test_schedule_without_runtime_is_skipped() {
        let debouncer = Debouncer::new(Duration::from_millis(1));
        assert!(!debouncer.schedule("exp", || {}));
        assert_eq!(debouncer.pending(), 0);
    }

    #[test]
    fn test_periodic_without_runtime_errors() {
        let target = Arc::new(());
        let result = spawn_periodic(Duration::from_secs(1), Arc::downgrade(&target), |_| {});
        assert!(matches!(result, Err(ExperimentError::RuntimeUnavailable(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_ticks_and_stops() {
        let target = Arc::new(AtomicUsize::new(0));
        let handle = spawn_periodic(Duration::from_secs(60), Arc::downgrade(&target), |t| {
            t.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        settle().await;
        assert_eq!(target.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(181)).await;
        settle().await;
        assert_eq!(target.load(Ordering::SeqCst), 3);

        handle.shutdown();
        tokio::time::sleep(Duration::from_secs(120)).await;
        settle().await;
        assert_eq!(target.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_sweep_report_total() {
        let report = SweepReport {
            events_removed: 2,
            assignments_removed: 3,
            participant_events_trimmed: 4,
        };
        assert_eq!(report.total(), 9);
    }
}
