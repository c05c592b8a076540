//! Configuration store abstraction.
//!
//! Configurations are property sets identified by a PID. A configuration
//! exists from its first [`Configuration::update`] (even with an empty map)
//! until it is deleted. Subscribers see `Created`, `Updated` and `Deleted`
//! events in order for each PID. Every event carries the store revision of
//! the change it reports, so a listener can tell a replay that was overtaken
//! by a newer event.

mod memory;

pub use memory::MemoryConfigurationStore;

use crate::error::Result;
use crate::properties::Properties;
use std::fmt;
use std::sync::Arc;

/// Handle of a store subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigurationEvent {
    Created {
        pid: String,
        properties: Properties,
        revision: u64,
    },
    Updated {
        pid: String,
        properties: Properties,
        revision: u64,
    },
    Deleted {
        pid: String,
        revision: u64,
    },
}

impl ConfigurationEvent {
    pub fn pid(&self) -> &str {
        match self {
            ConfigurationEvent::Created { pid, .. }
            | ConfigurationEvent::Updated { pid, .. }
            | ConfigurationEvent::Deleted { pid, .. } => pid,
        }
    }

    /// Revisions increase with every committed change in a store.
    pub fn revision(&self) -> u64 {
        match self {
            ConfigurationEvent::Created { revision, .. }
            | ConfigurationEvent::Updated { revision, .. }
            | ConfigurationEvent::Deleted { revision, .. } => *revision,
        }
    }

    /// The properties carried by the event; `None` for a deletion.
    pub fn properties(&self) -> Option<&Properties> {
        match self {
            ConfigurationEvent::Created { properties, .. }
            | ConfigurationEvent::Updated { properties, .. } => Some(properties),
            ConfigurationEvent::Deleted { .. } => None,
        }
    }
}

pub type ConfigurationListener = Arc<dyn Fn(&ConfigurationEvent) + Send + Sync>;

/// Source of configuration objects keyed by PID.
///
/// Like the service directory, implementations must not hold internal locks
/// while calling listeners.
pub trait ConfigurationStore: Send + Sync {
    /// Handle for `pid`; the configuration need not exist yet.
    fn get_configuration(&self, pid: &str) -> Configuration;

    /// Current properties of `pid`, if it exists.
    fn properties(&self, pid: &str) -> Option<Properties>;

    /// Create or replace the properties of `pid`.
    fn update(&self, pid: &str, properties: Properties) -> Result<()>;

    /// Delete `pid`. Returns `false` if it did not exist.
    fn delete(&self, pid: &str) -> Result<bool>;

    /// Observe `pid`. If it exists, a `Created` event is delivered to
    /// `listener` before this returns. Events committed after the
    /// subscription may reach the listener before that replay on another
    /// thread; they carry a higher revision.
    fn subscribe(&self, pid: &str, listener: ConfigurationListener) -> Result<SubscriptionId>;

    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// PIDs of existing configurations, sorted.
    fn pids(&self) -> Vec<String>;
}

/// A handle on one configuration in a store.
#[derive(Clone)]
pub struct Configuration {
    pid: String,
    store: Arc<dyn ConfigurationStore>,
}

impl Configuration {
    pub fn new(store: Arc<dyn ConfigurationStore>, pid: impl Into<String>) -> Self {
        Self {
            pid: pid.into(),
            store,
        }
    }

    pub fn pid(&self) -> &str {
        &self.pid
    }

    pub fn properties(&self) -> Option<Properties> {
        self.store.properties(&self.pid)
    }

    pub fn exists(&self) -> bool {
        self.properties().is_some()
    }

    pub fn update(&self, properties: Properties) -> Result<()> {
        self.store.update(&self.pid, properties)
    }

    pub fn delete(&self) -> Result<bool> {
        self.store.delete(&self.pid)
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("pid", &self.pid)
            .finish()
    }
}
