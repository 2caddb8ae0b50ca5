//! Queue configuration and TOML queue definitions.
//!
//! A queue definitions file looks like:
//!
//! ```toml
//! [defaults]
//! concurrency = 2
//!
//! [queues.ingest]
//! concurrency = 4
//!
//! [queues.mail]
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

/// Concurrency used when nothing else is configured.
pub const DEFAULT_CONCURRENCY: usize = 1;

/// Resolved configuration for a single queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of tasks running at once. Never below 1.
    pub concurrency: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

impl QueueConfig {
    pub fn with_concurrency(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Apply per-queue overrides on top of this config. Explicit options win.
    pub fn merge(&self, opts: &QueueOptions) -> QueueConfig {
        QueueConfig::with_concurrency(opts.concurrency.unwrap_or(self.concurrency))
    }
}

/// Partial queue configuration, as supplied at creation time or in a file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueOptions {
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl QueueOptions {
    pub fn concurrency(n: usize) -> Self {
        Self {
            concurrency: Some(n),
        }
    }
}

/// A set of named queues loaded from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueDefinitions {
    #[serde(default)]
    pub defaults: QueueOptions,
    #[serde(default)]
    pub queues: BTreeMap<String, QueueOptions>,
}

impl QueueDefinitions {
    /// Load definitions from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read queue file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad queue file {}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let defs: QueueDefinitions =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        if defs.defaults.concurrency == Some(0) {
            return Err(Error::Config("defaults.concurrency must be at least 1".into()));
        }
        if let Some(name) = defs
            .queues
            .iter()
            .find(|(_, opts)| opts.concurrency == Some(0))
            .map(|(name, _)| name)
        {
            return Err(Error::Config(format!(
                "queues.{name}.concurrency must be at least 1"
            )));
        }

        Ok(defs)
    }

    /// Resolve every queue against `base` and the file's own defaults.
    pub fn resolve(&self, base: &QueueConfig) -> Vec<(String, QueueConfig)> {
        let defaults = base.merge(&self.defaults);
        self.queues
            .iter()
            .map(|(name, opts)| (name.clone(), defaults.merge(opts)))
            .collect()
    }
}
