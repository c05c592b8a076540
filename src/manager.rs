//! The dependency manager: entry point that owns components and the
//! collaborators they share.

use crate::callback::CallbackInvoker;
use crate::component::{Component, ComponentId, ComponentInfo, Env};
use crate::config::{Config, EngineConfig};
use crate::dependency::{ConfigurationDependency, ServiceDependency};
use crate::ranking::RankedMap;
use crate::registry::{ServiceDirectory, ServiceRegistry};
use crate::store::{ConfigurationStore, MemoryConfigurationStore};
use crate::utils::metrics::EngineMetrics;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

struct ManagerInner {
    directory: Arc<dyn ServiceDirectory>,
    store: Arc<dyn ConfigurationStore>,
    metrics: Arc<EngineMetrics>,
    env: Arc<Env>,
    /// Registered components in add order.
    components: Mutex<RankedMap<ComponentId, Component>>,
    next_seq: AtomicU64,
}

/// Owns a set of components and the service directory and configuration
/// store they depend on.
///
/// `add` and `remove` never fail: whatever goes wrong inside a component is
/// logged and kept in that component's error channel.
#[derive(Clone)]
pub struct DependencyManager {
    inner: Arc<ManagerInner>,
}

impl DependencyManager {
    /// A manager over a fresh in-memory directory and store, tuned by the
    /// global settings.
    pub fn new() -> Self {
        let config = Config::global().engine;
        Self::with_collaborators(
            Arc::new(ServiceRegistry::new()),
            Arc::new(MemoryConfigurationStore::new()),
            config,
        )
    }

    pub fn with_collaborators(
        directory: Arc<dyn ServiceDirectory>,
        store: Arc<dyn ConfigurationStore>,
        config: EngineConfig,
    ) -> Self {
        let metrics = Arc::new(EngineMetrics::new());
        let env = Arc::new(Env {
            directory: directory.clone(),
            invoker: CallbackInvoker::new(metrics.clone()),
            metrics: metrics.clone(),
            config,
        });
        Self {
            inner: Arc::new(ManagerInner {
                directory,
                store,
                metrics,
                env,
                components: Mutex::new(RankedMap::new()),
                next_seq: AtomicU64::new(1),
            }),
        }
    }

    fn components_lock(&self) -> MutexGuard<'_, RankedMap<ComponentId, Component>> {
        self.inner
            .components
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Factories
    // ------------------------------------------------------------------

    /// A new, unregistered component bound to this manager's collaborators.
    pub fn create_component(&self) -> Component {
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        Component::new(format!("component-{}", seq), self.inner.env.clone())
    }

    /// A required dependency on `interface` in this manager's directory.
    pub fn service_dependency(&self, interface: &str) -> ServiceDependency {
        ServiceDependency::new(self.inner.directory.clone(), interface)
    }

    /// A required dependency on configuration `pid` in this manager's store.
    pub fn configuration_dependency(&self, pid: &str) -> ConfigurationDependency {
        ConfigurationDependency::new(self.inner.store.clone(), pid)
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register `component` and start evaluating it. Adding a component that
    /// is already registered does nothing.
    pub fn add(&self, component: &Component) {
        {
            let mut components = self.components_lock();
            if components.contains(&component.id()) {
                debug!(component = %component.name(), "Component already added");
                return;
            }
            let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
            components.insert(component.id(), 0, seq, component.clone());
        }
        info!(component = %component.name(), "Adding component");
        component.enable();
    }

    /// Tear `component` down to `Inactive` and forget it. Unknown or already
    /// removed components are ignored.
    pub fn remove(&self, component: &Component) {
        let removed = self.components_lock().take(&component.id());
        let Some(component) = removed else {
            return;
        };
        info!(component = %component.name(), "Removing component");
        component.disable();
    }

    /// Remove every component, the most recently added first unless
    /// `engine.reverse_shutdown` is off.
    pub fn shutdown(&self) {
        let mut components = self.components();
        if self.inner.env.config.reverse_shutdown {
            components.reverse();
        }
        info!(count = components.len(), "Shutting down dependency manager");
        for component in &components {
            self.remove(component);
        }
        debug!("{}", self.inner.metrics.summary());
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    /// Registered components in add order.
    pub fn components(&self) -> Vec<Component> {
        self.components_lock().values()
    }

    pub fn component(&self, id: ComponentId) -> Option<Component> {
        self.components_lock().get(&id).cloned()
    }

    /// Serializable view of every registered component.
    pub fn snapshot(&self) -> Vec<ComponentInfo> {
        self.components().iter().map(Component::info).collect()
    }

    pub fn services(&self) -> Arc<dyn ServiceDirectory> {
        self.inner.directory.clone()
    }

    pub fn configurations(&self) -> Arc<dyn ConfigurationStore> {
        self.inner.store.clone()
    }

    pub fn metrics(&self) -> Arc<EngineMetrics> {
        self.inner.metrics.clone()
    }
}

impl Default for DependencyManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::LifecycleState;

    fn manager() -> DependencyManager {
        DependencyManager::with_collaborators(
            Arc::new(ServiceRegistry::new()),
            Arc::new(MemoryConfigurationStore::new()),
            EngineConfig::default(),
        )
    }

    #[test]
    fn test_add_without_dependencies_activates() {
        let dm = manager();
        let c = dm.create_component();
        dm.add(&c);
        assert_eq!(c.state(), LifecycleState::Active);
        assert_eq!(dm.components().len(), 1);
    }

    #[test]
    fn test_add_twice_is_noop() {
        let dm = manager();
        let c = dm.create_component();
        dm.add(&c);
        dm.add(&c);
        assert_eq!(dm.components().len(), 1);
        assert_eq!(dm.metrics().transition_count("inactive", "waiting_for_required"), 1);
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let dm = manager();
        let c = dm.create_component();
        dm.remove(&c);
        dm.add(&c);
        dm.remove(&c);
        dm.remove(&c);
        assert_eq!(c.state(), LifecycleState::Inactive);
        assert!(dm.components().is_empty());
    }

    #[test]
    fn test_traced_transitions_settle_the_same() {
        let dm = DependencyManager::with_collaborators(
            Arc::new(ServiceRegistry::new()),
            Arc::new(MemoryConfigurationStore::new()),
            EngineConfig {
                trace_transitions: true,
                ..Default::default()
            },
        );
        let c = dm.create_component().add(dm.configuration_dependency("P"));
        dm.add(&c);
        dm.configurations()
            .get_configuration("P")
            .update(Default::default())
            .unwrap();
        assert_eq!(c.state(), LifecycleState::Active);
        dm.shutdown();
        assert_eq!(c.state(), LifecycleState::Inactive);
    }

    #[test]
    fn test_component_names_are_unique() {
        let dm = manager();
        let a = dm.create_component();
        let b = dm.create_component();
        assert_ne!(a.name(), b.name());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_snapshot_serializes() {
        let dm = manager();
        let c = dm.create_component().set_name("svc");
        dm.add(&c);
        let json = serde_json::to_value(dm.snapshot()).unwrap();
        assert_eq!(json[0]["name"], "svc");
        assert_eq!(json[0]["state"], "active");
    }
}
