//! Dependency on a configuration object in a [`ConfigurationStore`].

use super::{Dependency, DependencyCallbacks, DependencyKind, DependencySlot, DependencyValue};
use crate::callback::Instance;
use crate::component::DependencyOwner;
use crate::error::{DepmanError, Result};
use crate::store::{ConfigurationEvent, ConfigurationListener, ConfigurationStore, SubscriptionId};
use std::sync::{Arc, Mutex, MutexGuard};

const UPDATED: &str = "updated";

#[derive(Default)]
struct Subscription {
    generation: u64,
    id: Option<SubscriptionId>,
    /// Revision of the last event passed on; older ones are stale.
    revision: u64,
}

struct Shared {
    slot: DependencySlot,
    subscription: Mutex<Subscription>,
}

impl Shared {
    fn subscription(&self) -> MutexGuard<'_, Subscription> {
        self.subscription.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, generation: u64, event: &ConfigurationEvent) {
        let delivery = {
            let mut subscription = self.subscription();
            if subscription.generation != generation || event.revision() <= subscription.revision
            {
                return;
            }
            subscription.revision = event.revision();
            let value = event
                .properties()
                .map(|props| DependencyValue::Configuration(props.clone()));
            self.slot.post(value)
        };
        delivery.complete();
    }
}

/// Requires the configuration identified by a PID.
///
/// Available from the configuration's creation (its first update, even
/// with no properties) until it is deleted; updates in between are value
/// updates. Required by default. Values are delivered to the `updated`
/// callback, which receives `None` if an optional configuration is deleted
/// while the component is instantiated.
pub struct ConfigurationDependency {
    store: Arc<dyn ConfigurationStore>,
    pid: String,
    required: bool,
    propagate: bool,
    callbacks: DependencyCallbacks,
    shared: Arc<Shared>,
}

impl ConfigurationDependency {
    pub fn new(store: Arc<dyn ConfigurationStore>, pid: impl Into<String>) -> Self {
        Self {
            store,
            pid: pid.into(),
            required: true,
            propagate: false,
            callbacks: DependencyCallbacks::defaults(UPDATED, UPDATED, UPDATED),
            shared: Arc::new(Shared {
                slot: DependencySlot::new(),
                subscription: Mutex::new(Subscription::default()),
            }),
        }
    }

    pub fn pid(mut self, pid: impl Into<String>) -> Self {
        self.pid = pid.into();
        self
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }

    /// Deliver updates to `method` instead of `updated`.
    pub fn callback(mut self, method: &str) -> Self {
        self.callbacks.added = Some(method.to_string());
        self.callbacks.changed = Some(method.to_string());
        self.callbacks.removed = Some(method.to_string());
        self.callbacks.explicit = true;
        self
    }

    /// Deliver updates to `method` on a separate callback instance.
    pub fn callback_instance(self, instance: Instance, method: &str) -> Self {
        let mut dep = self.callback(method);
        dep.callbacks.instance = Some(instance);
        dep
    }

    pub fn get_pid(&self) -> &str {
        &self.pid
    }
}

impl Dependency for ConfigurationDependency {
    fn kind(&self) -> DependencyKind {
        DependencyKind::Configuration
    }

    fn describe(&self) -> String {
        format!("configuration {}", self.pid)
    }

    fn is_required(&self) -> bool {
        self.required
    }

    fn is_propagate(&self) -> bool {
        self.propagate
    }

    fn callbacks(&self) -> &DependencyCallbacks {
        &self.callbacks
    }

    fn slot(&self) -> &DependencySlot {
        &self.shared.slot
    }

    fn start(&self, owner: DependencyOwner) -> Result<()> {
        let generation = {
            let mut subscription = self.shared.subscription();
            subscription.generation += 1;
            subscription.revision = 0;
            subscription.generation
        };
        self.shared.slot.attach(owner);

        let shared = self.shared.clone();
        let listener: ConfigurationListener =
            Arc::new(move |event: &ConfigurationEvent| shared.handle(generation, event));

        match self.store.subscribe(&self.pid, listener) {
            Ok(id) => {
                self.shared.subscription().id = Some(id);
                Ok(())
            }
            Err(e) => {
                self.shared.slot.detach();
                Err(DepmanError::DependencyStart(format!(
                    "configuration {}: {}",
                    self.pid, e
                )))
            }
        }
    }

    fn stop(&self) {
        let id = {
            let mut subscription = self.shared.subscription();
            subscription.generation += 1;
            subscription.id.take()
        };
        if let Some(id) = id {
            self.store.unsubscribe(id);
        }
        self.shared.slot.detach();
    }
}
