//! Single-use completion handle handed to every dispatched task.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

use super::queue::Queue;

/// Signals that a task has finished and frees its worker slot.
///
/// Clones share one guard: across all clones, exactly one call to
/// [`done`](Self::done) or [`done_with`](Self::done_with) succeeds. Any
/// further call returns [`Error::AlreadyCompleted`] and leaves the queue
/// untouched.
#[derive(Clone)]
pub struct Completion {
    shared: Arc<Shared>,
}

struct Shared {
    queue: Queue,
    task: String,
    meta: Value,
    started: Instant,
    fired: AtomicBool,
}

impl Completion {
    pub(crate) fn new(queue: Queue, task: String, meta: Value) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue,
                task,
                meta,
                started: Instant::now(),
                fired: AtomicBool::new(false),
            }),
        }
    }

    /// Name of the task this handle completes.
    pub fn task(&self) -> &str {
        &self.shared.task
    }

    /// Name of the queue the task runs on.
    pub fn queue(&self) -> &str {
        self.shared.queue.name()
    }

    /// Complete the task with no result arguments.
    pub fn done(&self) -> Result<()> {
        self.done_with(Vec::new())
    }

    /// Complete the task. `args` are forwarded into the `done` event as-is;
    /// the engine does not treat any of them as an error.
    pub fn done_with(&self, args: Vec<Value>) -> Result<()> {
        let shared = &self.shared;
        if shared.fired.swap(true, Ordering::AcqRel) {
            warn!(queue = %shared.queue.name(), task = %shared.task, "completion called twice");
            return Err(Error::AlreadyCompleted {
                queue: shared.queue.name().to_string(),
                task: shared.task.clone(),
            });
        }
        shared.queue.finish(
            shared.task.clone(),
            shared.meta.clone(),
            args,
            shared.started,
        );
        Ok(())
    }

    pub fn is_done(&self) -> bool {
        self.shared.fired.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Completion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("queue", &self.queue())
            .field("task", &self.task())
            .field("done", &self.is_done())
            .finish()
    }
}
