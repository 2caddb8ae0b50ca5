//! Core data model.
//!
//! A task is a named unit of work waiting in a queue's backlog. It carries an
//! optional uniqueness constraint and opaque metadata that the engine threads
//! through every event about it.

use std::fmt;

use serde_json::{Value, json};
use tokio::runtime::Handle;
use uuid::Uuid;

use crate::engine::Completion;

/// The callable body of a task. Invoked at most once, with the completion
/// handle the task uses to signal that it has finished.
pub type Work = Box<dyn FnOnce(Completion) + Send + 'static>;

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A task sitting in a queue's pending backlog.
pub struct Task {
    /// Identity used for dedup and removal. Not used for ordering.
    pub name: String,

    /// When set, later submissions with the same name are rejected while
    /// this task is still pending.
    pub unique: bool,

    /// Caller payload. The engine doesn't interpret this.
    pub meta: Value,

    pub(crate) work: Work,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

/// Generate a task name for submissions that did not supply one.
///
/// Names are random rather than counter-based so that independent queues and
/// registries never share mutable state.
pub fn generate_task_name() -> String {
    format!("task-{}", Uuid::new_v4().simple())
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

/// Builder for submitting work. The public API for describing a task.
pub struct NewTask {
    pub(crate) name: Option<String>,
    pub(crate) unique: bool,
    pub(crate) meta: Value,
    pub(crate) work: Work,
}

impl NewTask {
    pub fn new<F>(work: F) -> Self
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        Self {
            name: None,
            unique: false,
            meta: Value::Null,
            work: Box::new(work),
        }
    }

    /// Build a task whose work is a future. The future is spawned on the
    /// current tokio runtime when the task is dispatched, and its output is
    /// passed through as the `done` arguments.
    ///
    /// Dispatched outside a runtime, the future is dropped unpolled and the
    /// task completes at once with an `{"error": ...}` argument.
    pub fn from_future<Fut>(fut: Fut) -> Self
    where
        Fut: Future<Output = Vec<Value>> + Send + 'static,
    {
        Self::new(move |done: Completion| match Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let args = fut.await;
                    if let Err(e) = done.done_with(args) {
                        tracing::warn!(error = %e, "future task completed twice");
                    }
                });
            }
            Err(e) => {
                tracing::warn!(queue = %done.queue(), task = %done.task(), error = %e, "no runtime for future task");
                if let Err(e) = done.done_with(vec![json!({ "error": e.to_string() })]) {
                    tracing::warn!(error = %e, "future task completed twice");
                }
            }
        })
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn meta(mut self, meta: Value) -> Self {
        self.meta = meta;
        self
    }

    /// Resolve into a task, generating a name if none was given.
    pub(crate) fn build(self) -> Task {
        Task {
            name: self.name.unwrap_or_else(generate_task_name),
            unique: self.unique,
            meta: self.meta,
            work: self.work,
        }
    }
}

impl fmt::Debug for NewTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewTask")
            .field("name", &self.name)
            .field("unique", &self.unique)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_names_are_distinct() {
        let a = NewTask::new(|_| {}).build();
        let b = NewTask::new(|_| {}).build();
        assert!(a.name.starts_with("task-"));
        assert_ne!(a.name, b.name);
    }

    #[test]
    fn builder_keeps_explicit_fields() {
        let task = NewTask::new(|_| {})
            .name("resize")
            .unique(true)
            .meta(serde_json::json!({"id": 7}))
            .build();
        assert_eq!(task.name, "resize");
        assert!(task.unique);
        assert_eq!(task.meta["id"], 7);
    }
}
