//! Background Worker
//!
//! One long-lived thread that runs flush and compaction tasks fed through a
//! channel, so the same thread is reused instead of spawning per task.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};

use crate::error::Result;

/// Name of the background thread.
const WORKER_THREAD_NAME: &str = "strata-maintenance";

/// The kinds of tasks the worker can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskKind {
    /// Flush frozen memtables, then compact if a trigger fires.
    Flush,

    /// Compact while a trigger fires.
    Compaction,

    /// Shut down the background thread.
    Terminate,
}

impl TaskKind {
    /// The task that covers both `self` and `other` (a flush also compacts)
    fn combine(self, other: TaskKind) -> TaskKind {
        if self == TaskKind::Flush || other == TaskKind::Flush {
            TaskKind::Flush
        } else {
            TaskKind::Compaction
        }
    }
}

/// Work the background thread performs on behalf of the engine.
pub(crate) trait Maintenance: Send + Sync + 'static {
    /// Run one task. Must be idempotent: a failed task is retried as is.
    fn run_task(&self, task: TaskKind) -> Result<()>;

    /// Delay before retry number `attempt` (0-based)
    fn retry_delay(&self, attempt: u32) -> Duration;
}

/// Handle to the background thread
pub(crate) struct BackgroundWorker {
    /// Join handle used to wait for the thread during shutdown
    handle: Option<JoinHandle<()>>,

    /// Sender end of the task channel
    sender: Sender<TaskKind>,
}

impl BackgroundWorker {
    /// Start the background thread consuming `receiver`
    pub fn spawn<M: Maintenance>(
        target: std::sync::Arc<M>,
        sender: Sender<TaskKind>,
        receiver: Receiver<TaskKind>,
    ) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || Self::run(target.as_ref(), receiver))?;

        tracing::info!(thread = WORKER_THREAD_NAME, "Background worker started");

        Ok(Self {
            handle: Some(handle),
            sender,
        })
    }

    /// Stop the thread and wait for the task in progress to finish
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        // The receiver may already be gone if the thread exited on its own
        let _ = self.sender.send(TaskKind::Terminate);
        if handle.join().is_err() {
            tracing::error!("Background worker panicked");
        }
        tracing::info!("Background worker stopped");
    }

    fn run<M: Maintenance>(target: &M, receiver: Receiver<TaskKind>) {
        // Failed task waiting for its retry, with the delay to wait
        let mut retry: Option<(TaskKind, Duration)> = None;
        let mut attempt: u32 = 0;

        loop {
            let received = match retry {
                Some((_, delay)) => receiver.recv_timeout(delay),
                None => receiver.recv().map_err(|_| RecvTimeoutError::Disconnected),
            };

            let task = match received {
                Ok(TaskKind::Terminate) | Err(RecvTimeoutError::Disconnected) => break,
                Ok(task) => match retry.take() {
                    Some((pending, _)) => pending.combine(task),
                    None => task,
                },
                Err(RecvTimeoutError::Timeout) => match retry.take() {
                    Some((pending, _)) => pending,
                    None => continue,
                },
            };

            match target.run_task(task) {
                Ok(()) => attempt = 0,
                Err(e) => {
                    let delay = target.retry_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tracing::error!(
                        task = ?task,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "Background task failed"
                    );
                    retry = Some((task, delay));
                }
            }
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
