//! # taskq
//!
//! In-memory, concurrency-bounded task queues.
//!
//! Each [`Queue`](engine::Queue) admits at most `concurrency` tasks at once and
//! keeps the rest in FIFO order. A [`Registry`](engine::Registry) routes work to
//! named queues and merges their events into one deferred stream.

pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod telemetry;

pub use engine::{Completion, DEFAULT_QUEUE, Queue, Registry};
pub use error::{Error, Result};
pub use event::{Event, EventKind};
pub use model::NewTask;
