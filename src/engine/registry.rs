//! Multi-queue registry.
//!
//! Routes work to named queues, forwards control operations by name, and
//! republishes every queue's events on one deferred stream.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::config::{QueueConfig, QueueDefinitions, QueueOptions};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::model::NewTask;

use super::emitter::{DeferredEmitter, Listener};
use super::queue::{Queue, QueueStats};

/// Key of the queue used when no key is given. Created with the registry.
pub const DEFAULT_QUEUE: &str = "__main__";

/// Owns a set of named queues and their unified event stream.
pub struct Registry {
    queues: RwLock<HashMap<String, Queue>>,
    defaults: QueueConfig,
    emitter: Arc<DeferredEmitter>,
}

impl Registry {
    /// Create a registry whose queues default to a concurrency of 1.
    ///
    /// Must be called from within a current-thread tokio runtime; events are
    /// delivered by a task spawned on it. Worker threads would run that task
    /// while the triggering call is still in progress, so a multi-thread
    /// runtime is rejected with [`Error::Runtime`].
    pub fn new() -> Result<Self> {
        Self::with_defaults(QueueConfig::default())
    }

    /// Create a registry with the given per-queue defaults.
    pub fn with_defaults(defaults: QueueConfig) -> Result<Self> {
        let handle = Handle::try_current().map_err(|e| Error::Runtime(e.to_string()))?;
        if handle.runtime_flavor() != RuntimeFlavor::CurrentThread {
            return Err(Error::Runtime(format!(
                "registry requires a current-thread runtime, found {:?}",
                handle.runtime_flavor()
            )));
        }
        let registry = Self {
            queues: RwLock::new(HashMap::new()),
            defaults,
            emitter: Arc::new(DeferredEmitter::spawn(&handle)),
        };
        registry.create(DEFAULT_QUEUE, QueueOptions::default());
        Ok(registry)
    }

    /// Create a queue under `key` unless one already exists.
    ///
    /// Returns true only if a new queue was created.
    pub fn create(&self, key: &str, opts: QueueOptions) -> bool {
        let mut queues = self.queues.write().unwrap_or_else(PoisonError::into_inner);
        if queues.contains_key(key) {
            return false;
        }

        let config = self.defaults.merge(&opts);
        let emitter = Arc::clone(&self.emitter);
        let queue = Queue::with_listener(key, config, move |event| emitter.emit(event.clone()));
        queues.insert(key.to_string(), queue);

        info!(queue = key, concurrency = config.concurrency, "queue created");
        true
    }

    /// Create every queue in `defs`, resolved against this registry's defaults.
    /// Returns how many were newly created.
    pub fn create_all(&self, defs: &QueueDefinitions) -> usize {
        let mut created = 0;
        for (key, config) in defs.resolve(&self.defaults) {
            if self.create(&key, QueueOptions::concurrency(config.concurrency)) {
                created += 1;
            }
        }
        created
    }

    /// Submit a task to the queue under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueNotFound`] if no queue was created under `key`.
    /// A duplicate rejection is not an error; it returns `Ok(false)`.
    pub fn push(&self, key: &str, task: NewTask) -> Result<bool> {
        let queue = self
            .queue(key)
            .ok_or_else(|| Error::QueueNotFound(key.to_string()))?;
        Ok(queue.push(task))
    }

    /// Submit a task to the default queue.
    pub fn push_default(&self, task: NewTask) -> Result<bool> {
        self.push(DEFAULT_QUEUE, task)
    }

    pub fn start(&self, key: &str) -> bool {
        self.queue(key).is_some_and(|q| q.start())
    }

    pub fn stop(&self, key: &str) -> bool {
        self.queue(key).is_some_and(|q| q.stop())
    }

    pub fn empty(&self, key: &str) -> bool {
        self.queue(key).is_some_and(|q| q.empty())
    }

    /// Remove a pending task by name. False if the queue or task is absent.
    pub fn remove_task(&self, key: &str, name: &str) -> bool {
        self.queue(key).is_some_and(|q| q.remove(name))
    }

    /// Returns false if the queue does not exist.
    pub fn set_concurrency(&self, key: &str, n: usize) -> bool {
        match self.queue(key) {
            Some(q) => {
                q.set_concurrency(n);
                true
            }
            None => false,
        }
    }

    pub fn stats(&self, key: &str) -> Option<QueueStats> {
        self.queue(key).map(|q| q.stats())
    }

    /// Names of all queues, sorted.
    pub fn queue_names(&self) -> Vec<String> {
        let queues = self.queues.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = queues.keys().cloned().collect();
        names.sort();
        names
    }

    /// Register a callback for every event of every queue.
    ///
    /// Callbacks run on the delivery task, after the call that triggered
    /// the event has returned. A panic in one is logged and swallowed.
    pub fn on<F>(&self, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        self.emitter.add_listener(listener);
    }

    /// Receive every event of every queue on a channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<Event> {
        debug!("event subscriber added");
        self.emitter.subscribe()
    }

    /// Clone the handle out so the map lock is released before delegating;
    /// work invoked by the queue may call back into the registry.
    fn queue(&self, key: &str) -> Option<Queue> {
        self.queues
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("queues", &self.queue_names())
            .field("defaults", &self.defaults)
            .finish()
    }
}
