//! Deferred event delivery.
//!
//! Events are stamped and pushed onto a channel at emission time, then
//! delivered to listeners by a task on the tokio runtime. The runtime must be
//! current-thread: the delivery task only runs once the emitting call returns
//! and the caller yields, so listeners attached right after a call still see
//! its events. A panicking listener never unwinds into the engine.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::Utc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::event::{Event, EventKind};

/// Callback registered on a registry's event stream.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync + 'static>;

#[derive(Default)]
struct Sinks {
    listeners: Vec<Listener>,
    subscribers: Vec<mpsc::UnboundedSender<Event>>,
}

pub(crate) struct DeferredEmitter {
    /// Sequence counter and sender share a lock so that seq order is channel order.
    outbox: Mutex<Outbox>,
    sinks: Arc<RwLock<Sinks>>,
}

struct Outbox {
    next_seq: u64,
    tx: mpsc::UnboundedSender<Event>,
}

impl DeferredEmitter {
    /// Spawn the delivery task on `handle`.
    pub(crate) fn spawn(handle: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sinks = Arc::new(RwLock::new(Sinks::default()));
        handle.spawn(deliver(rx, Arc::clone(&sinks)));
        Self {
            outbox: Mutex::new(Outbox { next_seq: 1, tx }),
            sinks,
        }
    }

    pub(crate) fn emit(&self, kind: EventKind) {
        let mut outbox = self.outbox.lock().unwrap_or_else(PoisonError::into_inner);
        let event = Event {
            seq: outbox.next_seq,
            timestamp: Utc::now(),
            kind,
        };
        outbox.next_seq += 1;
        if outbox.tx.send(event).is_err() {
            debug!("event delivery task has stopped, dropping event");
        }
    }

    pub(crate) fn add_listener(&self, listener: Listener) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .listeners
            .push(listener);
    }

    pub(crate) fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .subscribers
            .push(tx);
        rx
    }
}

async fn deliver(mut rx: mpsc::UnboundedReceiver<Event>, sinks: Arc<RwLock<Sinks>>) {
    while let Some(event) = rx.recv().await {
        let listeners = {
            let mut sinks = sinks.write().unwrap_or_else(PoisonError::into_inner);
            sinks.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
            sinks.listeners.clone()
        };

        for listener in listeners {
            if panic::catch_unwind(AssertUnwindSafe(|| listener(&event))).is_err() {
                error!(seq = event.seq, event = %event.kind, "event listener panicked");
            }
        }
    }
    debug!("event stream closed");
}
