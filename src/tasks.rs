//! Concurrent task runner.
//!
//! Runs independent units of work in parallel and returns as soon as all of
//! them succeed or the first one fails. Tasks still running after a failure
//! are detached: they run to completion and their results are discarded.

use crate::error::{Result, SyncError};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use tokio::sync::mpsc;

type Task = Pin<Box<dyn Future<Output = Result<()>> + Send + 'static>>;

/// A batch of tasks run with first-error semantics.
///
/// Result ordering is up to the caller: tasks that produce values usually
/// write them into a pre-sized `Arc<Mutex<Vec<_>>>` at their own index.
#[derive(Default)]
pub struct ConcurrentTasks {
    tasks: Vec<Task>,
}

impl ConcurrentTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tasks: Vec::with_capacity(capacity),
        }
    }

    /// Register a unit of work. Nothing runs until [`run`](Self::run).
    pub fn add<F>(&mut self, task: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.tasks.push(Box::pin(task));
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Launch every task and wait for all of them, or for the first error.
    ///
    /// Must be called inside a tokio runtime. A panicking task is reported as
    /// [`SyncError::TaskPanicked`].
    pub async fn run(self) -> Result<()> {
        let total = self.tasks.len();
        if total == 0 {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel::<Result<()>>(total);
        for task in self.tasks {
            let tx = tx.clone();
            tokio::spawn(async move {
                let outcome = match AssertUnwindSafe(task).catch_unwind().await {
                    Ok(result) => result,
                    Err(panic) => Err(SyncError::TaskPanicked(panic_message(panic.as_ref()))),
                };
                // Receiver is gone once run() returned early
                let _ = tx.send(outcome).await;
            });
        }
        drop(tx);

        let mut finished = 0;
        while let Some(outcome) = rx.recv().await {
            outcome?;
            finished += 1;
            if finished == total {
                break;
            }
        }
        tracing::debug!("All {} tasks completed", total);
        Ok(())
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
