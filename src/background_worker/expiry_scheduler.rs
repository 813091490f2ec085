use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::application::context::TaskContext;
use crate::application::usecases::expiry_notifications::ExpiryNotificationUseCase;

/// Work run once per scheduler tick.
#[async_trait]
pub trait PeriodicJob: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()>;
}

#[async_trait]
impl PeriodicJob for ExpiryNotificationUseCase {
    fn name(&self) -> &'static str {
        "expiry_notifications"
    }

    async fn run(&self, ctx: &TaskContext) -> anyhow::Result<()> {
        self.check_and_notify(ctx).await?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Ticking,
    Stopped,
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("scheduler is already running")]
    AlreadyRunning,
    #[error("scheduler has been stopped")]
    Stopped,
    #[error("scheduler interval must be greater than zero")]
    InvalidInterval,
}

struct RunningLoop {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Runs a [`PeriodicJob`] on a fixed interval, one tick at a time.
///
/// The job is awaited inside the loop, so a slow tick delays the next one
/// instead of overlapping it; firings missed meanwhile are skipped.
pub struct ExpiryScheduler {
    job: Arc<dyn PeriodicJob>,
    state_tx: Arc<watch::Sender<SchedulerState>>,
    running: Mutex<Option<RunningLoop>>,
}

impl ExpiryScheduler {
    pub fn new(job: Arc<dyn PeriodicJob>) -> Self {
        let (state_tx, _) = watch::channel(SchedulerState::Idle);
        Self {
            job,
            state_tx: Arc::new(state_tx),
            running: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *self.state_tx.borrow()
    }

    /// Spawns the tick loop. The first tick fires one full `interval` from now.
    pub fn start(&self, interval: Duration) -> Result<(), SchedulerError> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if self.state() == SchedulerState::Stopped {
            return Err(SchedulerError::Stopped);
        }
        if running.is_some() {
            return Err(SchedulerError::AlreadyRunning);
        }
        if interval.is_zero() {
            return Err(SchedulerError::InvalidInterval);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run_loop(
            Arc::clone(&self.job),
            Arc::clone(&self.state_tx),
            interval,
            shutdown_rx,
        ));
        *running = Some(RunningLoop {
            shutdown_tx,
            handle,
        });

        info!(job = self.job.name(), ?interval, "expiry_scheduler: started");
        Ok(())
    }

    /// Stops the loop, waiting for a tick in progress to finish.
    pub async fn stop(&self) {
        let running = self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(RunningLoop {
            shutdown_tx,
            handle,
        }) = running
        {
            let _ = shutdown_tx.send(true);
            if let Err(err) = handle.await {
                if err.is_panic() {
                    error!(job = self.job.name(), error = %err, "expiry_scheduler: loop panicked");
                }
            }
            info!(job = self.job.name(), "expiry_scheduler: stopped");
        }

        self.state_tx.send_replace(SchedulerState::Stopped);
    }
}

async fn run_loop(
    job: Arc<dyn PeriodicJob>,
    state_tx: Arc<watch::Sender<SchedulerState>>,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.changed() => break,
            _ = ticker.tick() => {
                state_tx.send_replace(SchedulerState::Ticking);
                let started = Instant::now();
                let ctx = TaskContext::new();

                match job.run(&ctx).await {
                    Ok(()) => info!(
                        job = job.name(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "expiry_scheduler: tick completed"
                    ),
                    Err(err) => error!(
                        job = job.name(),
                        error = ?err,
                        "expiry_scheduler: tick failed"
                    ),
                }

                if started.elapsed() > interval {
                    warn!(
                        job = job.name(),
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        ?interval,
                        "expiry_scheduler: tick outlasted its interval; skipping missed firings"
                    );
                }
                state_tx.send_replace(SchedulerState::Idle);
            }
        }
    }
}
