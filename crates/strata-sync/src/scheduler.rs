//! # Sync Scheduling
//!
//! The two background timers that trigger sync passes.
//!
//! ## Timers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Sync Triggers                                   │
//! │                                                                         │
//! │  Periodic (adapter auto-sync, manager periodic strategy)               │
//! │  ────────                                                              │
//! │    start ──► [period] ──► job ──► [period] ──► job ──► ...             │
//! │    • one loop per owner; start() replaces any running loop             │
//! │    • the job runs inline, so a slow pass delays the next tick          │
//! │    • the loop ends on its own once the owner is gone                   │
//! │                                                                         │
//! │  Debouncer (manager realtime strategy)                                 │
//! │  ─────────                                                             │
//! │    write ──► arm ─┐                                                    │
//! │    write ──► re-arm (previous timer cancelled)                         │
//! │    write ──► re-arm ──► [delay] ──► job spawned                        │
//! │    • N writes inside the delay produce one job                         │
//! │    • the job runs detached: re-arming never cancels a running pass    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Both timers abort their task on `stop`/`cancel` and on drop, so no
//! callback fires after the owner has been torn down.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Delay between the last qualifying write and the sync it triggers.
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(1);

// =============================================================================
// Periodic
// =============================================================================

/// A cancellable recurring job. At most one loop runs per instance.
#[derive(Debug)]
pub struct Periodic {
    name: &'static str,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Periodic {
    pub fn new(name: &'static str) -> Self {
        Periodic {
            name,
            handle: Mutex::new(None),
        }
    }

    /// Runs `job` every `period`, first after one full period.
    ///
    /// `job` returns `None` when its owner no longer exists; the loop then
    /// ends. Any loop started earlier is cancelled first.
    pub fn start<F, Fut>(&self, period: Duration, job: F)
    where
        F: Fn() -> Option<Fut> + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            warn!(timer = self.name, "Refusing to start a timer with a zero period");
            return;
        }

        let mut slot = self.handle.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        let name = self.name;
        *slot = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                match job() {
                    Some(run) => run.await,
                    None => {
                        debug!(timer = name, "Timer owner dropped, stopping");
                        break;
                    }
                }
            }
        }));

        debug!(timer = name, period_ms = period.as_millis() as u64, "Timer started");
    }

    /// Cancels the loop. A no-op when nothing is running.
    pub fn stop(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.abort();
            debug!(timer = self.name, "Timer stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Drop for Periodic {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.get_mut().take() {
            handle.abort();
        }
    }
}

// =============================================================================
// Debouncer
// =============================================================================

/// Coalesces bursts of triggers into a single job.
#[derive(Debug)]
pub struct Debouncer {
    delay: Duration,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new(delay: Duration) -> Self {
        Debouncer {
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Arms the timer, cancelling any timer armed earlier that has not
    /// fired yet.
    pub fn schedule<F, Fut>(&self, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let delay = self.delay;
        let mut slot = self.pending.lock();
        if let Some(previous) = slot.take() {
            previous.abort();
        }

        *slot = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tokio::spawn(job());
        }));
    }

    /// Disarms the timer. A job that already fired keeps running.
    pub fn cancel(&self) {
        if let Some(handle) = self.pending.lock().take() {
            handle.abort();
        }
    }

    /// True while a timer is armed and has not fired.
    pub fn is_armed(&self) -> bool {
        self.pending
            .lock()
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Debouncer::new(DEFAULT_DEBOUNCE)
    }
}

impl Drop for Debouncer {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.get_mut().take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_periodic_waits_one_period_then_repeats() {
        let runs = Arc::new(AtomicU32::new(0));
        let timer = Periodic::new("test");

        let counter = runs.clone();
        timer.start(Duration::from_secs(10), move || {
            let counter = counter.clone();
            Some(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(26)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_keeps_a_single_loop() {
        let runs = Arc::new(AtomicU32::new(0));
        let timer = Periodic::new("test");

        for _ in 0..3 {
            let counter = runs.clone();
            timer.start(Duration::from_secs(10), move || {
                let counter = counter.clone();
                Some(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            });
        }

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prevents_further_runs() {
        let runs = Arc::new(AtomicU32::new(0));
        let timer = Periodic::new("test");

        let counter = runs.clone();
        timer.start(Duration::from_secs(1), move || {
            let counter = counter.clone();
            Some(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        timer.stop();
        timer.stop();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_ends_when_owner_is_gone() {
        let timer = Periodic::new("test");
        timer.start(Duration::from_secs(1), || None::<std::future::Ready<()>>);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_coalesces_a_burst() {
        let runs = Arc::new(AtomicU32::new(0));
        let debouncer = Debouncer::default();

        for _ in 0..10 {
            let counter = runs.clone();
            debouncer.schedule(move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
            });
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(debouncer.is_armed());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(!debouncer.is_armed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_debounce_never_fires() {
        let runs = Arc::new(AtomicU32::new(0));
        let debouncer = Debouncer::new(Duration::from_millis(500));

        let counter = runs.clone();
        debouncer.schedule(move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        debouncer.cancel();

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }
}
