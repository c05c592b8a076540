//! In-memory configuration store.

use super::{
    Configuration, ConfigurationEvent, ConfigurationListener, ConfigurationStore, SubscriptionId,
};
use crate::error::Result;
use crate::executor::SerialExecutor;
use crate::properties::{Properties, SERVICE_PID};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

type Delivery = (Vec<ConfigurationListener>, ConfigurationEvent);

#[derive(Default)]
struct State {
    /// Properties and the revision that last wrote them.
    configs: HashMap<String, (Properties, u64)>,
    subscriptions: BTreeMap<u64, (String, ConfigurationListener)>,
    /// Per-PID delivery queues; events for one PID reach listeners in the
    /// order they were committed, even when a listener updates re-entrantly.
    /// A queue lives while its PID exists, is observed or is draining.
    queues: HashMap<String, Arc<SerialExecutor<Delivery>>>,
    revision: u64,
    next_subscription: u64,
}

impl State {
    fn listeners_for(&self, pid: &str) -> Vec<ConfigurationListener> {
        self.subscriptions
            .values()
            .filter(|(p, _)| p == pid)
            .map(|(_, l)| l.clone())
            .collect()
    }

    fn queue(&mut self, pid: &str) -> Arc<SerialExecutor<Delivery>> {
        self.queues
            .entry(pid.to_string())
            .or_insert_with(|| Arc::new(SerialExecutor::new()))
            .clone()
    }

    fn next_revision(&mut self) -> u64 {
        self.revision += 1;
        self.revision
    }

    /// Forget the queue of a PID nobody needs any more.
    fn prune(&mut self, pid: &str) {
        let idle = self
            .queues
            .get(pid)
            .is_some_and(|q| !q.is_running() && q.pending() == 0);
        let observed = self.subscriptions.values().any(|(p, _)| p == pid);
        if idle && !observed && !self.configs.contains_key(pid) {
            self.queues.remove(pid);
        }
    }
}

/// Thread-safe in-memory [`ConfigurationStore`]. Cloning yields another
/// handle to the same store. Stored property sets carry `service.pid`.
#[derive(Clone, Default)]
pub struct MemoryConfigurationStore {
    state: Arc<RwLock<State>>,
}

impl MemoryConfigurationStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Commit an event under the state lock, deliver it outside.
    fn publish(&self, pid: &str, commit: impl FnOnce(&mut State) -> Option<ConfigurationEvent>) {
        let pending = {
            let mut state = self.write();
            match commit(&mut state) {
                Some(event) => {
                    let listeners = state.listeners_for(pid);
                    let queue = state.queue(pid);
                    let run = queue.enqueue((listeners, event));
                    run.then_some(queue)
                }
                None => None,
            }
        };
        if let Some(queue) = pending {
            queue.drain(|(listeners, event)| {
                for listener in listeners {
                    listener(&event);
                }
            });
            self.write().prune(pid);
        }
    }

    /// Number of PIDs with a delivery queue.
    pub fn queue_count(&self) -> usize {
        self.read().queues.len()
    }
}

impl ConfigurationStore for MemoryConfigurationStore {
    fn get_configuration(&self, pid: &str) -> Configuration {
        Configuration::new(Arc::new(self.clone()), pid)
    }

    fn properties(&self, pid: &str) -> Option<Properties> {
        self.read().configs.get(pid).map(|(p, _)| p.clone())
    }

    fn update(&self, pid: &str, mut properties: Properties) -> Result<()> {
        properties.insert(SERVICE_PID.to_string(), Value::from(pid));
        self.publish(pid, |state| {
            let revision = state.next_revision();
            let created = state
                .configs
                .insert(pid.to_string(), (properties.clone(), revision))
                .is_none();
            let pid = pid.to_string();
            Some(if created {
                ConfigurationEvent::Created {
                    pid,
                    properties,
                    revision,
                }
            } else {
                ConfigurationEvent::Updated {
                    pid,
                    properties,
                    revision,
                }
            })
        });
        debug!(pid = %pid, "Configuration updated");
        Ok(())
    }

    fn delete(&self, pid: &str) -> Result<bool> {
        let mut existed = false;
        self.publish(pid, |state| {
            existed = state.configs.remove(pid).is_some();
            existed.then(|| ConfigurationEvent::Deleted {
                pid: pid.to_string(),
                revision: state.next_revision(),
            })
        });
        if existed {
            debug!(pid = %pid, "Configuration deleted");
        }
        Ok(existed)
    }

    fn subscribe(&self, pid: &str, listener: ConfigurationListener) -> Result<SubscriptionId> {
        let (id, replay) = {
            let mut state = self.write();
            state.next_subscription += 1;
            let id = SubscriptionId(state.next_subscription);
            state
                .subscriptions
                .insert(id.0, (pid.to_string(), listener.clone()));
            let replay = state.configs.get(pid).map(|(properties, revision)| {
                ConfigurationEvent::Created {
                    pid: pid.to_string(),
                    properties: properties.clone(),
                    revision: *revision,
                }
            });
            (id, replay)
        };
        // replayed here rather than through the PID queue, which may be busy
        if let Some(event) = replay {
            listener(&event);
        }
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut state = self.write();
        match state.subscriptions.remove(&id.0) {
            Some((pid, _)) => {
                state.prune(&pid);
                true
            }
            None => false,
        }
    }

    fn pids(&self) -> Vec<String> {
        let mut pids: Vec<_> = self.read().configs.keys().cloned().collect();
        pids.sort();
        pids
    }
}
