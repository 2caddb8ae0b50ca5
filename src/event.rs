//! Structured events emitted by queues on every lifecycle change.
//!
//! A queue emits bare [`EventKind`]s to its listener. The registry stamps
//! them into [`Event`]s and republishes them, deferred, on one stream.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A registry-stamped event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Monotonic sequence number across all queues of a registry.
    pub seq: u64,
    /// When this event was emitted.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// A paused queue resumed.
    Start { queue: String },
    /// A running queue was paused.
    Stop { queue: String },
    /// The backlog was cleared, or drained by a completion.
    Empty { queue: String },
    /// A task entered the backlog while no slot was free.
    Queue {
        queue: String,
        task: String,
        meta: Value,
    },
    /// A task began execution.
    Run {
        queue: String,
        task: String,
        meta: Value,
    },
    /// A task's completion handle fired. `args` are passed through untouched.
    Done {
        args: Vec<Value>,
        queue: String,
        task: String,
        meta: Value,
    },
    /// A submission was rejected because a unique task of the same name is pending.
    Duplicate {
        queue: String,
        task: String,
        meta: Value,
    },
}

impl EventKind {
    /// The short event name (`start`, `run`, `done`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::Start { .. } => "start",
            EventKind::Stop { .. } => "stop",
            EventKind::Empty { .. } => "empty",
            EventKind::Queue { .. } => "queue",
            EventKind::Run { .. } => "run",
            EventKind::Done { .. } => "done",
            EventKind::Duplicate { .. } => "duplicate",
        }
    }

    /// The queue that emitted this event.
    pub fn queue(&self) -> &str {
        match self {
            EventKind::Start { queue }
            | EventKind::Stop { queue }
            | EventKind::Empty { queue }
            | EventKind::Queue { queue, .. }
            | EventKind::Run { queue, .. }
            | EventKind::Done { queue, .. }
            | EventKind::Duplicate { queue, .. } => queue,
        }
    }

    /// The task this event concerns, if any.
    pub fn task(&self) -> Option<&str> {
        match self {
            EventKind::Queue { task, .. }
            | EventKind::Run { task, .. }
            | EventKind::Done { task, .. }
            | EventKind::Duplicate { task, .. } => Some(task),
            EventKind::Start { .. } | EventKind::Stop { .. } | EventKind::Empty { .. } => None,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.task() {
            Some(task) => write!(f, "{} {}/{}", self.name(), self.queue(), task),
            None => write!(f, "{} {}", self.name(), self.queue()),
        }
    }
}
