use super::{Component, ComponentId, LifecycleState};
use crate::dependency::{Dependency, DependencyId, DependencyInfo, DependencyValue};
use crate::properties::{Properties, SERVICE_PID};
use crate::registry::{ServiceId, ServiceRef};
use serde::Serialize;
use std::sync::Arc;

/// What a callback sees of its component: the committed dependency values
/// at the time of the call, and the properties the component publishes.
///
/// Callbacks change the component through [`ComponentContext::component`];
/// those changes take effect once the callback returns.
pub struct ComponentContext {
    component: Component,
    dependencies: Vec<(DependencyId, String, Option<DependencyValue>)>,
    properties: Properties,
}

impl ComponentContext {
    pub(crate) fn new(
        component: Component,
        dependencies: Vec<(DependencyId, String, Option<DependencyValue>)>,
        properties: Properties,
    ) -> Self {
        Self {
            component,
            dependencies,
            properties,
        }
    }

    pub fn component(&self) -> &Component {
        &self.component
    }

    pub fn name(&self) -> String {
        self.component.name()
    }

    pub fn id(&self) -> ComponentId {
        self.component.id()
    }

    /// Current value of one dependency.
    pub fn value(&self, id: DependencyId) -> Option<&DependencyValue> {
        self.dependencies
            .iter()
            .find(|(dep, _, _)| *dep == id)
            .and_then(|(_, _, value)| value.as_ref())
    }

    /// All present values, in dependency order.
    pub fn values(&self) -> impl Iterator<Item = &DependencyValue> {
        self.dependencies.iter().filter_map(|(_, _, v)| v.as_ref())
    }

    /// First injected service published under `interface`.
    pub fn service(&self, interface: &str) -> Option<&ServiceRef> {
        self.values()
            .filter_map(DependencyValue::as_service)
            .find(|svc| svc.interfaces().iter().any(|i| i == interface))
    }

    /// Injected configuration with the given PID.
    pub fn configuration(&self, pid: &str) -> Option<&Properties> {
        self.values()
            .filter_map(DependencyValue::as_configuration)
            .find(|props| props.get(SERVICE_PID).and_then(|v| v.as_str()) == Some(pid))
    }

    /// Add a dependency to this component.
    pub fn add_dependency(&self, dependency: Arc<dyn Dependency>) -> DependencyId {
        self.component.add_dependency(dependency)
    }

    pub fn remove_dependency(&self, id: DependencyId) {
        self.component.remove_dependency(id)
    }

    /// Properties the component publishes, including propagated ones.
    pub fn properties(&self) -> &Properties {
        &self.properties
    }
}

impl std::fmt::Debug for ComponentContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentContext")
            .field("component", &self.component.name())
            .field(
                "dependencies",
                &self
                    .dependencies
                    .iter()
                    .map(|(_, d, v)| (d.as_str(), v.is_some()))
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Serializable snapshot of a component.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentInfo {
    pub id: ComponentId,
    pub name: String,
    pub state: LifecycleState,
    pub interfaces: Vec<String>,
    pub service_id: Option<ServiceId>,
    pub properties: Option<Properties>,
    pub dependencies: Vec<DependencyInfo>,
    pub errors: usize,
}
