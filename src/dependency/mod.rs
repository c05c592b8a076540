//! Dependencies: declared prerequisites of a component.
//!
//! Every kind implements [`Dependency`]. A dependency observes some external
//! source and reports changes through its [`DependencySlot`], which queues a
//! notification on the owning component. The component commits the change
//! inside its serialized section, so `is_available`/`current_value` always
//! reflect what the component has actually seen. New kinds plug in by
//! implementing the trait; the component's state machine never changes.

mod configuration;
mod service;

pub use configuration::ConfigurationDependency;
pub use service::ServiceDependency;

use crate::callback::{Instance, Payload};
use crate::component::{Component, DependencyOwner};
use crate::error::Result;
use crate::properties::Properties;
use crate::registry::ServiceRef;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

static NEXT_DEPENDENCY_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique dependency identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct DependencyId(pub u64);

impl DependencyId {
    pub(crate) fn next() -> Self {
        DependencyId(NEXT_DEPENDENCY_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for DependencyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dep-{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyKind {
    Service,
    Configuration,
    /// Any kind defined outside this crate.
    Other,
}

/// What a dependency injects.
#[derive(Debug, Clone)]
pub enum DependencyValue {
    Service(ServiceRef),
    Configuration(Properties),
}

impl DependencyValue {
    /// Properties of the value; what propagation merges.
    pub fn properties(&self) -> &Properties {
        match self {
            DependencyValue::Service(svc) => svc.properties(),
            DependencyValue::Configuration(props) => props,
        }
    }

    pub fn as_service(&self) -> Option<&ServiceRef> {
        match self {
            DependencyValue::Service(svc) => Some(svc),
            DependencyValue::Configuration(_) => None,
        }
    }

    pub fn as_configuration(&self) -> Option<&Properties> {
        match self {
            DependencyValue::Configuration(props) => Some(props),
            DependencyValue::Service(_) => None,
        }
    }

    /// Arguments for an `added`/`changed` callback.
    pub(crate) fn inject_payload(&self) -> Payload<'_> {
        match self {
            DependencyValue::Service(svc) => Payload::Service(svc),
            DependencyValue::Configuration(props) => Payload::Properties(Some(props)),
        }
    }

    /// Arguments for a `removed` callback: a service is handed back one last
    /// time, a configuration reports its absence.
    pub(crate) fn retract_payload(&self) -> Payload<'_> {
        match self {
            DependencyValue::Service(svc) => Payload::Service(svc),
            DependencyValue::Configuration(_) => Payload::Properties(None),
        }
    }
}

/// Where and under which names a dependency delivers its value.
#[derive(Debug, Clone, Default)]
pub struct DependencyCallbacks {
    pub added: Option<String>,
    pub changed: Option<String>,
    pub removed: Option<String>,
    /// Target for the callbacks; the component's own instance if unset.
    pub instance: Option<Instance>,
    /// Names were chosen by the user rather than defaulted; a name that
    /// cannot be resolved is then reported.
    pub explicit: bool,
}

impl DependencyCallbacks {
    pub(crate) fn defaults(added: &str, changed: &str, removed: &str) -> Self {
        Self {
            added: Some(added.to_string()),
            changed: Some(changed.to_string()),
            removed: Some(removed.to_string()),
            instance: None,
            explicit: false,
        }
    }
}

/// A declared prerequisite of a component.
pub trait Dependency: Send + Sync {
    fn kind(&self) -> DependencyKind;

    /// Human-readable label used in logs and snapshots.
    fn describe(&self) -> String;

    fn is_required(&self) -> bool;

    /// Whether the value's properties are merged into the owner's published
    /// properties.
    fn is_propagate(&self) -> bool;

    fn callbacks(&self) -> &DependencyCallbacks;

    /// Committed state and owner binding.
    fn slot(&self) -> &DependencySlot;

    /// Attach to the external source. Implementations bind the slot to
    /// `owner` first, then post any value that is already present, so the
    /// owner sees it before readiness is next evaluated.
    fn start(&self, owner: DependencyOwner) -> Result<()>;

    /// Detach from the external source and unbind the slot. Idempotent.
    fn stop(&self);

    /// Report a change of the external source: `Some` while a value is
    /// present, `None` once it is gone.
    fn on_external_change(&self, value: Option<DependencyValue>) {
        self.slot().post(value).complete();
    }

    fn is_available(&self) -> bool {
        self.slot().is_available()
    }

    fn current_value(&self) -> Option<DependencyValue> {
        self.slot().current_value()
    }
}

/// Serializable view of one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct DependencyInfo {
    pub id: DependencyId,
    pub kind: DependencyKind,
    pub description: String,
    pub required: bool,
    pub available: bool,
    pub propagate: bool,
}

// ============================================================================
// Slot
// ============================================================================

#[derive(Default)]
struct Committed {
    available: bool,
    value: Option<DependencyValue>,
}

/// How a committed notification changed a dependency.
#[derive(Debug, Clone)]
pub(crate) enum Change {
    Added(DependencyValue),
    Changed {
        value: DependencyValue,
        previous: Option<DependencyValue>,
    },
    /// Carries the last value; the slot keeps it until the owner's teardown
    /// is done.
    Removed(DependencyValue),
    Unchanged,
}

/// Per-dependency state shared between the dependency and its owner.
#[derive(Default)]
pub struct DependencySlot {
    owner: Mutex<Option<DependencyOwner>>,
    committed: Mutex<Committed>,
}

impl DependencySlot {
    pub fn new() -> Self {
        Self::default()
    }

    fn owner(&self) -> MutexGuard<'_, Option<DependencyOwner>> {
        self.owner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn committed(&self) -> MutexGuard<'_, Committed> {
        self.committed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Bind the slot to the component that will receive notifications.
    pub fn attach(&self, owner: DependencyOwner) {
        *self.owner() = Some(owner);
    }

    /// Unbind. Once this returns, [`DependencySlot::post`] delivers nothing.
    pub fn detach(&self) -> bool {
        self.owner().take().is_some()
    }

    pub fn is_attached(&self) -> bool {
        self.owner().is_some()
    }

    /// Queue a change notification on the owner. The returned [`Delivery`]
    /// must be completed after releasing any lock the caller holds.
    pub fn post(&self, value: Option<DependencyValue>) -> Delivery {
        let owner = self.owner();
        Delivery(owner.as_ref().and_then(|o| o.post(value)))
    }

    pub fn is_available(&self) -> bool {
        self.committed().available
    }

    pub fn current_value(&self) -> Option<DependencyValue> {
        self.committed().value.clone()
    }

    pub(crate) fn commit(&self, value: Option<DependencyValue>) -> Change {
        let mut c = self.committed();
        match value {
            Some(v) => {
                let was = c.available;
                c.available = true;
                let previous = c.value.replace(v.clone());
                if was {
                    Change::Changed { value: v, previous }
                } else {
                    Change::Added(v)
                }
            }
            None if c.available => {
                c.available = false;
                match c.value.clone() {
                    Some(last) => Change::Removed(last),
                    None => Change::Unchanged,
                }
            }
            None => Change::Unchanged,
        }
    }

    /// Put back the value a rejected update replaced.
    pub(crate) fn restore(&self, previous: DependencyValue) {
        let mut c = self.committed();
        if c.available {
            c.value = Some(previous);
        }
    }

    /// Drop the value of an unavailable dependency.
    pub(crate) fn clear_departed(&self) {
        let mut c = self.committed();
        if !c.available {
            c.value = None;
        }
    }

    pub(crate) fn reset(&self) {
        *self.committed() = Committed::default();
    }
}

impl fmt::Debug for DependencySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let c = self.committed();
        f.debug_struct("DependencySlot")
            .field("available", &c.available)
            .field("has_value", &c.value.is_some())
            .finish()
    }
}

/// A queued notification that may still need to be run on this thread.
#[must_use = "complete the delivery once no locks are held"]
pub struct Delivery(Option<Component>);

impl Delivery {
    /// Run the owning component's queue if this thread became its runner.
    pub fn complete(self) {
        if let Some(component) = self.0 {
            component.run_pending();
        }
    }
}
