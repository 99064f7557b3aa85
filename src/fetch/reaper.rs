//! Background sweeper that closes connections left idle for too long.
//!
//! The [`IdleReaper`] runs as a Tokio task: every `sweep_interval` it asks the pool to
//! close idle connections older than `max_idle_age`. [`IdleReaper::stop`] signals the
//! task and waits for it to exit, so once it returns no sweep is running or will run.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use super::constants::{DEFAULT_IDLE_SWEEP_INTERVAL, DEFAULT_MAX_IDLE_AGE};
use super::pool::{ConnectionPool, Connector};

/// Something whose idle connections can be swept.
pub trait IdleSweep: Send + Sync + 'static {
    /// Closes idle connections unused for at least `max_idle_age`; returns how many.
    fn sweep_idle(&self, max_idle_age: Duration) -> usize;
}

impl<C: Connector> IdleSweep for ConnectionPool<C> {
    fn sweep_idle(&self, max_idle_age: Duration) -> usize {
        ConnectionPool::sweep_idle(self, max_idle_age)
    }
}

/// Reaper timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleReaperSettings {
    /// Delay between sweeps.
    pub sweep_interval: Duration,
    /// Idle connections at least this old are closed.
    pub max_idle_age: Duration,
}

impl Default for IdleReaperSettings {
    fn default() -> Self {
        Self {
            sweep_interval: DEFAULT_IDLE_SWEEP_INTERVAL,
            max_idle_age: DEFAULT_MAX_IDLE_AGE,
        }
    }
}

/// Handle on the background sweep task.
///
/// Dropping the handle without calling [`stop`](Self::stop) signals the task and
/// aborts it.
#[derive(Debug)]
pub struct IdleReaper {
    stop_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    settings: IdleReaperSettings,
}

impl IdleReaper {
    /// Spawns the sweep loop for `target` on `runtime`.
    ///
    /// The first sweep happens one `sweep_interval` after start.
    pub fn start<P: IdleSweep>(
        runtime: &Handle,
        target: Arc<P>,
        settings: IdleReaperSettings,
    ) -> Self {
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let sweep_interval = settings.sweep_interval.max(Duration::from_millis(1));

        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + sweep_interval,
                sweep_interval,
            );
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        let closed = target.sweep_idle(settings.max_idle_age);
                        if closed > 0 {
                            debug!(closed, "idle reaper closed stale connections");
                        }
                    }
                }
            }
            debug!("idle reaper stopped");
        });

        debug!(
            sweep_interval_ms = sweep_interval.as_millis(),
            max_idle_age_ms = settings.max_idle_age.as_millis(),
            "idle reaper started"
        );

        Self {
            stop_tx,
            task: Mutex::new(Some(task)),
            settings,
        }
    }

    /// Returns the reaper's timing.
    #[must_use]
    pub fn settings(&self) -> IdleReaperSettings {
        self.settings
    }

    /// Returns true while the sweep task has not been stopped.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Stops the sweep loop and waits for the task to exit.
    ///
    /// Returns `true` when this call stopped the task, `false` when it was already stopped.
    pub async fn stop(&self) -> bool {
        self.stop_tx.send_replace(true);
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(task) = task else {
            return false;
        };
        if let Err(error) = task.await {
            if error.is_panic() {
                warn!(error = %error, "idle reaper task panicked");
            }
        }
        true
    }
}

impl Drop for IdleReaper {
    fn drop(&mut self) {
        self.stop_tx.send_replace(true);
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingSweep {
        sweeps: AtomicUsize,
    }

    impl IdleSweep for CountingSweep {
        fn sweep_idle(&self, _max_idle_age: Duration) -> usize {
            self.sweeps.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    fn settings(interval_secs: u64) -> IdleReaperSettings {
        IdleReaperSettings {
            sweep_interval: Duration::from_secs(interval_secs),
            max_idle_age: Duration::from_secs(30),
        }
    }

    #[test]
    fn test_idle_reaper_settings_defaults() {
        let settings = IdleReaperSettings::default();
        assert_eq!(settings.sweep_interval, Duration::from_secs(5));
        assert_eq!(settings.max_idle_age, Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_sweeps_each_interval() {
        let target = Arc::new(CountingSweep::default());
        let reaper = IdleReaper::start(&Handle::current(), Arc::clone(&target), settings(5));

        tokio::time::sleep(Duration::from_millis(10_500)).await;

        assert_eq!(target.sweeps.load(Ordering::SeqCst), 2);
        assert!(reaper.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_stop_prevents_further_sweeps() {
        let target = Arc::new(CountingSweep::default());
        let reaper = IdleReaper::start(&Handle::current(), Arc::clone(&target), settings(5));
        tokio::time::sleep(Duration::from_millis(5_500)).await;

        assert!(reaper.stop().await);
        assert!(!reaper.is_running());
        let after_stop = target.sweeps.load(Ordering::SeqCst);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(target.sweeps.load(Ordering::SeqCst), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_stop_twice_returns_false() {
        let target = Arc::new(CountingSweep::default());
        let reaper = IdleReaper::start(&Handle::current(), target, settings(5));

        assert!(reaper.is_running());
        assert!(reaper.stop().await);
        assert!(!reaper.stop().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reaper_drop_stops_task() {
        let target = Arc::new(CountingSweep::default());
        let reaper = IdleReaper::start(&Handle::current(), Arc::clone(&target), settings(5));
        drop(reaper);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(target.sweeps.load(Ordering::SeqCst), 0);
    }
}
