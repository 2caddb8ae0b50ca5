//! Metric instrument factories for taskq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without a registered provider every instrument is a no-op.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("taskq")
}

/// Counter: task submissions.
/// Labels: `queue`, `result` ("accepted" | "duplicate").
pub fn tasks_submitted() -> Counter<u64> {
    meter()
        .u64_counter("taskq.task.submitted")
        .with_description("Number of tasks submitted")
        .build()
}

/// Counter: tasks moved from the backlog into a worker slot.
/// Labels: `queue`.
pub fn tasks_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("taskq.task.dispatched")
        .with_description("Number of tasks dispatched")
        .build()
}

/// Counter: completion handles fired.
/// Labels: `queue`.
pub fn tasks_completed() -> Counter<u64> {
    meter()
        .u64_counter("taskq.task.completed")
        .with_description("Number of tasks completed")
        .build()
}

/// Counter: control operations (start, stop, empty, remove).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("taskq.queue.operations")
        .with_description("Number of queue control operations")
        .build()
}

/// Histogram: time from dispatch to completion in milliseconds.
/// Labels: `queue`.
pub fn task_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("taskq.task.duration_ms")
        .with_description("Task run time from dispatch to completion")
        .with_unit("ms")
        .build()
}
