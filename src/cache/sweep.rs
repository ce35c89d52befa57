//! Periodic background sweeps with an explicit start/stop lifecycle.

use futures::future::BoxFuture;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::traits::Tier;

/// A factory producing one sweep pass; resolves to the number of entries removed
pub type SweepFn = Box<dyn Fn() -> BoxFuture<'static, usize> + Send + Sync>;

/// Runs one tier's sweep on a fixed interval until stopped or dropped.
pub struct Sweeper {
  tier: Tier,
  task: Mutex<Option<JoinHandle<()>>>,
}

impl Sweeper {
  pub fn new(tier: Tier) -> Self {
    Self {
      tier,
      task: Mutex::new(None),
    }
  }

  /// Start sweeping every `interval`. Replaces a sweep that is already running.
  /// A zero interval is refused and leaves the sweeper stopped.
  ///
  /// Must be called from within a tokio runtime.
  pub fn start(&self, interval: Duration, sweep: SweepFn) {
    let tier = self.tier;
    if interval.is_zero() {
      warn!(%tier, "refusing to start sweep with a zero interval");
      self.stop();
      return;
    }
    let task = tokio::spawn(async move {
      let mut ticker = tokio::time::interval(interval);
      ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
      // The first tick completes immediately
      ticker.tick().await;
      loop {
        ticker.tick().await;
        let removed = sweep().await;
        if removed > 0 {
          debug!(%tier, removed, "sweep removed expired entries");
        }
      }
    });

    if let Some(previous) = self.slot().replace(task) {
      previous.abort();
    }
  }

  /// Stop the sweep. A pass already in progress is cancelled at its next await.
  pub fn stop(&self) {
    if let Some(task) = self.slot().take() {
      task.abort();
    }
  }

  pub fn is_running(&self) -> bool {
    self
      .slot()
      .as_ref()
      .is_some_and(|task| !task.is_finished())
  }

  fn slot(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
    self.task.lock().unwrap_or_else(|e| e.into_inner())
  }
}

impl Drop for Sweeper {
  fn drop(&mut self) {
    self.stop();
  }
}
