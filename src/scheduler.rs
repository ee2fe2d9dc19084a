//! Task scheduling for the station runtime
//!
//! Each periodic loop is its own tokio task. All of them watch one shutdown
//! flag, so stopping the station is a single `send(true)` followed by joining
//! every handle.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};

pub type ShutdownSignal = watch::Receiver<bool>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub tasks_spawned: u32,
    pub tasks_joined: u32,
    pub tasks_failed: u32,
}

pub struct TaskSet {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
    stats: SchedulerStats,
}

impl TaskSet {
    pub fn new() -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            shutdown_tx,
            tasks: Vec::new(),
            stats: SchedulerStats::default(),
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a long-running task that is handed the shutdown signal
    pub fn spawn<F, Fut>(&mut self, name: &'static str, task: F)
    where
        F: FnOnce(ShutdownSignal) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(task(self.shutdown_signal()));
        self.tasks.push((name, handle));
        self.stats.tasks_spawned += 1;
        debug!(task = name, "task spawned");
    }

    /// Spawn a loop running `tick` once per `period` until shutdown.
    ///
    /// The first tick fires immediately. A slow tick delays the next one
    /// rather than triggering a burst of catch-up ticks.
    pub fn spawn_periodic<F, Fut>(&mut self, name: &'static str, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn(name, move |mut shutdown| async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => tick().await,
                    _ = wait_for_shutdown(&mut shutdown) => break,
                }
            }
            debug!(task = name, "periodic task stopped");
        });
        info!(task = name, period_ms = period.as_millis() as u64, "periodic task started");
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn get_stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Signal every task and wait for all of them to finish
    pub async fn shutdown(mut self) -> SchedulerStats {
        let _ = self.shutdown_tx.send(true);
        for (name, handle) in self.tasks.drain(..) {
            match handle.await {
                Ok(()) => self.stats.tasks_joined += 1,
                Err(e) => {
                    self.stats.tasks_failed += 1;
                    warn!(task = name, error = %e, "task ended abnormally");
                }
            }
        }
        info!(joined = self.stats.tasks_joined, "all tasks stopped");
        self.stats
    }
}

impl Default for TaskSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolves once shutdown is requested or the task set is gone
pub async fn wait_for_shutdown(signal: &mut ShutdownSignal) {
    while !*signal.borrow_and_update() {
        if signal.changed().await.is_err() {
            return;
        }
    }
}
