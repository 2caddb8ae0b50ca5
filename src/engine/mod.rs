//! Scheduling engine: the single-queue dispatcher and the multi-queue registry.

pub mod completion;
mod emitter;
pub mod queue;
pub mod registry;

pub use completion::Completion;
pub use emitter::Listener;
pub use queue::{Queue, QueueListener, QueueStats};
pub use registry::{DEFAULT_QUEUE, Registry};
