//! Self-rescheduling periodic worker.
//!
//! A [`Worker`] owns one [`Job`] and runs it on the tokio runtime, once per
//! interval, forever: whatever a cycle does (succeed, fail, panic) the next one
//! is scheduled. Stopping a worker only cancels the *pending* run; a cycle
//! that is already running is allowed to finish.

use crate::error::Result;
use async_trait::async_trait;
use derive_more::Display;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Outcome of a single successful cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Something was done; run again after the regular interval.
    Worked,
    /// Nothing to do (or no capacity to do it); wait this much longer than
    /// the regular interval before the next run.
    Backoff(Duration),
}

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Not started, or stopped and the loop has ended.
    Idle,
    /// Waiting for the next run.
    Scheduled,
    /// A cycle is in progress.
    Running,
}

/// A unit of periodic work.
#[async_trait]
pub trait Job: Send + 'static {
    /// Name used in log events.
    fn name(&self) -> &str;

    /// Perform one cycle.
    async fn run(&mut self) -> Result<Cycle>;
}

/// Drives a [`Job`] at a fixed interval.
///
/// The first run happens one interval after [`start`](Self::start).
pub struct Worker<J: Job> {
    name: String,
    interval: Duration,
    state: Arc<watch::Sender<WorkerState>>,
    job: Option<J>,
    cancel: Option<CancellationToken>,
    handle: Option<JoinHandle<J>>,
}

impl<J: Job> Worker<J> {
    pub fn new(job: J, interval: Duration) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            name: job.name().to_string(),
            interval,
            state: Arc::new(state),
            job: Some(job),
            cancel: None,
            handle: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.state.subscribe()
    }

    /// Whether the loop has been started and not yet joined.
    pub fn is_started(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawn the loop. Calling this on a started worker does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self) {
        if self.handle.is_some() {
            tracing::debug!(worker = %self.name, "Already running, ignoring start");
            return;
        }
        let Some(job) = self.job.take() else {
            tracing::warn!(worker = %self.name, "Job was lost by a previous run; cannot start");
            return;
        };
        tracing::debug!(worker = %self.name, interval = ?self.interval, "Starting worker");
        let cancel = CancellationToken::new();
        self.state.send_replace(WorkerState::Scheduled);
        self.handle = Some(tokio::spawn(run_loop(
            job,
            self.name.clone(),
            self.interval,
            Arc::clone(&self.state),
            cancel.clone(),
        )));
        self.cancel = Some(cancel);
    }

    /// Cancel the pending run. A running cycle completes, after which the
    /// loop ends and the worker returns to [`WorkerState::Idle`].
    pub fn stop(&self) {
        if let Some(cancel) = &self.cancel {
            tracing::debug!(worker = %self.name, "Stopping worker");
            cancel.cancel();
        }
    }

    /// Wait for the loop to end. Only returns once [`stop`](Self::stop) has
    /// been called (or the runtime shuts down). The worker can be started
    /// again afterwards.
    pub async fn join(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.cancel = None;
        match handle.await {
            Ok(job) => self.job = Some(job),
            Err(err) => {
                tracing::error!(worker = %self.name, error = %err, "Worker loop did not finish cleanly");
                self.state.send_replace(WorkerState::Idle);
            },
        }
    }

    /// [`stop`](Self::stop), then [`join`](Self::join).
    pub async fn shutdown(&mut self) {
        self.stop();
        self.join().await;
    }
}

async fn run_loop<J: Job>(
    mut job: J,
    name: String,
    interval: Duration,
    state: Arc<watch::Sender<WorkerState>>,
    cancel: CancellationToken,
) -> J {
    let mut delay = interval;
    loop {
        state.send_replace(WorkerState::Scheduled);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(delay) => {},
        }
        state.send_replace(WorkerState::Running);
        delay = match AssertUnwindSafe(job.run()).catch_unwind().await {
            Ok(Ok(Cycle::Worked)) => interval,
            Ok(Ok(Cycle::Backoff(extra))) => {
                tracing::trace!(worker = %name, backoff = ?extra, "Backing off");
                interval + extra
            },
            Ok(Err(err)) => {
                tracing::error!(worker = %name, error = ?err, "Cycle failed");
                interval
            },
            Err(panic) => {
                tracing::error!(worker = %name, panic = panic_message(&*panic), "Cycle panicked");
                interval
            },
        };
    }
    state.send_replace(WorkerState::Idle);
    tracing::debug!(worker = %name, "Worker stopped");
    job
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}
