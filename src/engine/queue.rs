//! Single queue engine: admission, concurrency-limited dispatch, completion
//! bookkeeping.
//!
//! `Queue` is a cheap handle over state guarded by a mutex. The lock is never
//! held while a listener or a task's work runs, so work may complete
//! synchronously, or push more work, without deadlocking.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use opentelemetry::KeyValue;
use serde_json::{Value, json};
use tracing::{debug, error, info};

use crate::config::QueueConfig;
use crate::event::EventKind;
use crate::model::{NewTask, Task};
use crate::telemetry::metrics;
use crate::telemetry::task::{record_state_transition, start_task_span};

use super::completion::Completion;

/// Receives every event a queue emits, synchronously.
pub type QueueListener = Arc<dyn Fn(&EventKind) + Send + Sync + 'static>;

/// Point-in-time view of a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueStats {
    pub name: String,
    pub concurrency: usize,
    pub pending: usize,
    pub in_flight: usize,
    pub paused: bool,
}

/// A named backlog of tasks with a bounded pool of worker slots.
#[derive(Clone)]
pub struct Queue {
    inner: Arc<Inner>,
}

struct Inner {
    name: String,
    state: Mutex<QueueState>,
    listener: Option<QueueListener>,
}

struct QueueState {
    pending: VecDeque<Task>,
    in_flight: usize,
    paused: bool,
    concurrency: usize,
}

impl QueueState {
    fn available_workers(&self) -> usize {
        self.concurrency.saturating_sub(self.in_flight)
    }
}

impl Queue {
    /// Create a standalone queue whose events go nowhere.
    pub fn new(name: impl Into<String>, config: QueueConfig) -> Self {
        Self::build(name.into(), config, None)
    }

    /// Create a queue that reports every event to `listener`.
    pub fn with_listener<F>(name: impl Into<String>, config: QueueConfig, listener: F) -> Self
    where
        F: Fn(&EventKind) + Send + Sync + 'static,
    {
        Self::build(name.into(), config, Some(Arc::new(listener)))
    }

    fn build(name: String, config: QueueConfig, listener: Option<QueueListener>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    in_flight: 0,
                    paused: false,
                    concurrency: config.concurrency.max(1),
                }),
                listener,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Submit a task. Returns false if it was rejected as a duplicate.
    ///
    /// Dedup is decided by the `unique` flag of the task already pending,
    /// not by the flag of the incoming one.
    pub fn push(&self, new: NewTask) -> bool {
        let task = new.build();
        let name = task.name.clone();
        let meta = task.meta.clone();

        let queued = {
            let mut state = self.lock();
            if state
                .pending
                .iter()
                .any(|pending| pending.unique && pending.name == task.name)
            {
                drop(state);
                debug!(queue = %self.inner.name, task = %name, "duplicate task rejected");
                self.count_submission("duplicate");
                self.emit(EventKind::Duplicate {
                    queue: self.inner.name.clone(),
                    task: name,
                    meta,
                });
                return false;
            }
            state.pending.push_back(task);
            state.available_workers() == 0
        };

        self.count_submission("accepted");
        if queued {
            debug!(queue = %self.inner.name, task = %name, "task waiting for a slot");
            self.emit(EventKind::Queue {
                queue: self.inner.name.clone(),
                task: name,
                meta,
            });
        }

        self.dispatch();
        true
    }

    /// Resume a paused queue. No-op returning false if it is not paused.
    pub fn start(&self) -> bool {
        {
            let mut state = self.lock();
            if !state.paused {
                return false;
            }
            state.paused = false;
        }
        info!(queue = %self.inner.name, "queue started");
        self.count_operation("start");
        self.dispatch();
        self.emit(EventKind::Start {
            queue: self.inner.name.clone(),
        });
        true
    }

    /// Pause dispatch. In-flight tasks keep running.
    pub fn stop(&self) -> bool {
        {
            let mut state = self.lock();
            if state.paused {
                return false;
            }
            state.paused = true;
        }
        info!(queue = %self.inner.name, "queue stopped");
        self.count_operation("stop");
        self.emit(EventKind::Stop {
            queue: self.inner.name.clone(),
        });
        true
    }

    /// Drop every pending task. In-flight tasks are unaffected.
    pub fn empty(&self) -> bool {
        let dropped = {
            let mut state = self.lock();
            if state.pending.is_empty() {
                return false;
            }
            std::mem::take(&mut state.pending).len()
        };
        info!(queue = %self.inner.name, dropped, "queue emptied");
        self.count_operation("empty");
        self.emit(EventKind::Empty {
            queue: self.inner.name.clone(),
        });
        true
    }

    /// Remove the first pending task with this name.
    pub fn remove(&self, name: &str) -> bool {
        let removed = {
            let mut state = self.lock();
            match state.pending.iter().position(|t| t.name == name) {
                Some(idx) => state.pending.remove(idx).is_some(),
                None => false,
            }
        };
        if removed {
            debug!(queue = %self.inner.name, task = name, "pending task removed");
            self.count_operation("remove");
        }
        removed
    }

    /// Change the slot count, clamped to at least 1.
    ///
    /// Takes effect on the next dispatch attempt. Lowering it below the
    /// in-flight count does not evict running tasks.
    pub fn set_concurrency(&self, n: usize) {
        let n = n.max(1);
        let mut state = self.lock();
        if state.concurrency == n {
            return;
        }
        debug!(queue = %self.inner.name, from = state.concurrency, to = n, "concurrency changed");
        state.concurrency = n;
    }

    pub fn concurrency(&self) -> usize {
        self.lock().concurrency
    }

    pub fn available_workers(&self) -> usize {
        self.lock().available_workers()
    }

    /// Pending plus in-flight tasks.
    pub fn len(&self) -> usize {
        let state = self.lock();
        state.pending.len() + state.in_flight
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.lock();
        QueueStats {
            name: self.inner.name.clone(),
            concurrency: state.concurrency,
            pending: state.pending.len(),
            in_flight: state.in_flight,
            paused: state.paused,
        }
    }

    /// Move as many head-of-backlog tasks as there are free slots into the
    /// running state, then kick off their work.
    fn dispatch(&self) {
        let batch: Vec<Task> = {
            let mut state = self.lock();
            let slots = state.available_workers();
            if state.paused || slots == 0 || state.pending.is_empty() {
                return;
            }
            let n = slots.min(state.pending.len());
            state.in_flight += n;
            state.pending.drain(..n).collect()
        };

        debug!(queue = %self.inner.name, count = batch.len(), "dispatching tasks");
        metrics::tasks_dispatched().add(
            batch.len() as u64,
            &[KeyValue::new("queue", self.inner.name.clone())],
        );

        for task in batch {
            let Task {
                name, meta, work, ..
            } = task;

            let span = start_task_span(&self.inner.name, &name);
            record_state_transition(&span, "pending", "running");

            self.emit(EventKind::Run {
                queue: self.inner.name.clone(),
                task: name.clone(),
                meta: meta.clone(),
            });

            let completion = Completion::new(self.clone(), name.clone(), meta);
            let guard = completion.clone();
            let outcome =
                span.in_scope(|| panic::catch_unwind(AssertUnwindSafe(|| work(completion))));

            // A panicking task still has to give its slot back, or the rest
            // of the backlog would wait on it forever.
            if let Err(payload) = outcome {
                let message = panic_message(payload.as_ref());
                error!(queue = %self.inner.name, task = %name, panic = %message, "task work panicked");
                record_state_transition(&span, "running", "failed");
                if !guard.is_done() {
                    let _ = guard.done_with(vec![json!({ "panic": message })]);
                }
            }
        }
    }

    /// Release the slot held by a finished task. Called once per task by its
    /// completion handle.
    pub(crate) fn finish(&self, task: String, meta: Value, args: Vec<Value>, started: Instant) {
        let drained = {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.pending.is_empty()
        };

        let labels = [KeyValue::new("queue", self.inner.name.clone())];
        metrics::tasks_completed().add(1, &labels);
        metrics::task_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &labels);
        debug!(queue = %self.inner.name, task = %task, "task done");

        self.emit(EventKind::Done {
            args,
            queue: self.inner.name.clone(),
            task,
            meta,
        });

        if drained {
            self.emit(EventKind::Empty {
                queue: self.inner.name.clone(),
            });
        } else {
            self.dispatch();
        }
    }

    fn emit(&self, event: EventKind) {
        if let Some(ref listener) = self.inner.listener {
            listener(&event);
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn count_submission(&self, result: &'static str) {
        metrics::tasks_submitted().add(
            1,
            &[
                KeyValue::new("queue", self.inner.name.clone()),
                KeyValue::new("result", result),
            ],
        );
    }

    fn count_operation(&self, operation: &'static str) {
        metrics::queue_operations().add(
            1,
            &[
                KeyValue::new("queue", self.inner.name.clone()),
                KeyValue::new("operation", operation),
            ],
        );
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Queue").field(&self.stats()).finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
