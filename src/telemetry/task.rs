//! Task execution span helpers.

use tracing::Span;

/// Start a span covering the invocation of a task's work.
///
/// The `task.state` field is declared empty and can be updated via
/// [`record_state_transition`].
pub fn start_task_span(queue: &str, task: &str) -> Span {
    tracing::info_span!(
        "task.execute",
        "task.queue" = queue,
        "task.name" = task,
        "task.state" = tracing::field::Empty,
    )
}

/// Record a state transition on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("task.state", to);
    span.in_scope(|| {
        tracing::debug!(from = from, to = to, "state_transition");
    });
}
