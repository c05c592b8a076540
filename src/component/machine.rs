//! The lifecycle state machine.
//!
//! Everything here runs inside the component's serialized section: the
//! caller holds the runner role and the machine lock. Callbacks see the
//! machine only through a [`ComponentContext`] snapshot, so anything they do
//! to the component comes back as a queued [`Task`].

use super::{
    Component, ComponentContext, DependencyOwner, Implementation, LifecycleCallbacks,
    LifecycleState, Publication, View,
};
use crate::callback::{guarded, Args, Instance, Invoked};
use crate::dependency::{Change, Dependency, DependencyId, DependencyInfo, DependencyValue};
use crate::error::{ComponentError, DepmanError};
use crate::properties::Properties;
use crate::propagate;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};
use LifecycleState::*;

/// Work for a component's serial executor.
pub(crate) enum Task {
    Configure(Box<dyn FnOnce(&mut Machine) + Send>),
    Enable,
    Disable,
    Changed {
        id: DependencyId,
        epoch: u64,
        value: Option<DependencyValue>,
    },
    AddDependency {
        id: DependencyId,
        dependency: Arc<dyn Dependency>,
    },
    RemoveDependency(DependencyId),
}

struct Entry {
    id: DependencyId,
    dependency: Arc<dyn Dependency>,
    /// Start epoch while started; notifications from other epochs are stale.
    epoch: Option<u64>,
    /// The value has been handed to the instance.
    injected: bool,
    /// Added while an instance existed and before it became active. Such a
    /// dependency holds the component in `Instantiated` rather than tearing
    /// it down, and is dropped together with the instance.
    instance_bound: bool,
}

#[derive(Default)]
pub(crate) struct Machine {
    pub(super) implementation: Option<Implementation>,
    pub(super) callbacks: LifecycleCallbacks,
    pub(super) interfaces: Vec<String>,
    pub(super) properties: Properties,
    entries: Vec<Entry>,
    instance: Option<Instance>,
    enabled: bool,
    /// A forward transition failed; stay down until something changes.
    blocked: bool,
    start_failed: bool,
    epoch: u64,
}

impl Machine {
    fn position(&self, id: DependencyId) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    fn required_available(&self, instance_bound: bool) -> bool {
        self.entries
            .iter()
            .filter(|e| e.instance_bound == instance_bound && e.dependency.is_required())
            .all(|e| e.epoch.is_some() && e.dependency.is_available())
    }

    fn target(&self) -> LifecycleState {
        if !self.enabled {
            Inactive
        } else if self.blocked || !self.required_available(false) {
            WaitingForRequired
        } else if !self.required_available(true) {
            Instantiated
        } else {
            Active
        }
    }

    fn effective_properties(&self) -> Properties {
        propagate::merge(
            &self.properties,
            self.entries.iter().map(|e| e.dependency.as_ref()),
        )
    }
}

#[derive(Clone, Copy)]
enum Notify {
    Added,
    Changed,
    Removed,
}

impl Component {
    /// Apply one task, then walk the state machine until it is settled.
    pub(super) fn process(&self, m: &mut Machine, task: Task) {
        self.apply(m, task);
        self.settle(m);
        for entry in &m.entries {
            entry.dependency.slot().clear_departed();
        }
        self.refresh_view(m);
    }

    fn settle(&self, m: &mut Machine) {
        loop {
            if let Some(task) = self.pop_local() {
                self.apply(m, task);
                continue;
            }
            let state = self.state();
            let target = m.target();
            if target != state {
                self.step(m, state, target);
                continue;
            }
            if state == Active && self.republish(m) {
                continue;
            }
            break;
        }
    }

    fn step(&self, m: &mut Machine, state: LifecycleState, target: LifecycleState) {
        match (state, target > state) {
            (Inactive, _) => self.start_dependencies(m),
            (WaitingForRequired, true) => self.instantiate(m),
            (WaitingForRequired, false) => self.stop_dependencies(m),
            (Instantiated, true) => self.activate(m),
            (Instantiated, false) => self.release(m),
            (Active, _) => self.deactivate(m),
        }
    }

    // ------------------------------------------------------------------
    // Tasks
    // ------------------------------------------------------------------

    fn apply(&self, m: &mut Machine, task: Task) {
        match task {
            Task::Configure(configure) => configure(m),
            Task::Enable => {
                m.enabled = true;
                m.blocked = false;
            }
            Task::Disable => m.enabled = false,
            Task::Changed { id, epoch, value } => self.dependency_changed(m, id, epoch, value),
            Task::AddDependency { id, dependency } => {
                let state = self.state();
                m.entries.push(Entry {
                    id,
                    dependency,
                    epoch: None,
                    injected: false,
                    instance_bound: m.instance.is_some() && state < Active,
                });
                m.blocked = false;
                if m.enabled && state != Inactive {
                    let pos = m.entries.len() - 1;
                    self.start_entry(m, pos);
                }
            }
            Task::RemoveDependency(id) => {
                let Some(pos) = m.position(id) else {
                    return;
                };
                self.remove_entry(m, pos);
                m.blocked = false;
            }
        }
    }

    fn dependency_changed(
        &self,
        m: &mut Machine,
        id: DependencyId,
        epoch: u64,
        value: Option<DependencyValue>,
    ) {
        let Some(pos) = m
            .entries
            .iter()
            .position(|e| e.id == id && e.epoch == Some(epoch))
        else {
            return;
        };
        self.env().metrics.record_notification();

        let dependency = m.entries[pos].dependency.clone();
        let change = dependency.slot().commit(value);
        let required = dependency.is_required();
        if required && matches!(change, Change::Added(_) | Change::Removed(_)) {
            m.blocked = false;
        }

        if self.env().config.trace_transitions {
            let transition = match &change {
                Change::Added(_) => "available",
                Change::Changed { .. } => "updated",
                Change::Removed(_) => "unavailable",
                Change::Unchanged => "unchanged",
            };
            debug!(
                component = %self.name(),
                dependency = %dependency.describe(),
                transition,
                "Dependency changed"
            );
        }

        if m.instance.is_none() {
            return;
        }
        match change {
            Change::Added(value) => {
                self.notify(m, pos, Notify::Added, &value);
                m.entries[pos].injected = true;
            }
            Change::Changed { value, previous } => {
                if !m.entries[pos].injected {
                    self.notify(m, pos, Notify::Added, &value);
                    m.entries[pos].injected = true;
                } else if !self.notify(m, pos, Notify::Changed, &value) {
                    if let Some(previous) = previous {
                        warn!(
                            component = %self.name(),
                            dependency = %dependency.describe(),
                            "Update rejected, keeping the previous value"
                        );
                        dependency.slot().restore(previous);
                    }
                }
            }
            // a required dependency is retracted by the teardown it triggers
            Change::Removed(last) if !required => {
                if m.entries[pos].injected {
                    self.notify(m, pos, Notify::Removed, &last);
                    m.entries[pos].injected = false;
                }
            }
            Change::Removed(_) | Change::Unchanged => {}
        }
    }

    fn start_entry(&self, m: &mut Machine, pos: usize) {
        m.epoch += 1;
        let epoch = m.epoch;
        let entry = &mut m.entries[pos];
        entry.epoch = Some(epoch);
        let owner = DependencyOwner::new(self, entry.id, epoch);
        if let Err(e) = entry.dependency.start(owner) {
            entry.epoch = None;
            let origin = entry.dependency.describe();
            error!(component = %self.name(), dependency = %origin, error = %e, "Dependency failed to start");
            self.push_error(ComponentError::from_error(origin, &e));
        }
    }

    fn stop_entry(&self, m: &mut Machine, pos: usize) {
        let entry = &mut m.entries[pos];
        if entry.epoch.take().is_some() {
            entry.dependency.stop();
        }
        entry.dependency.slot().reset();
        entry.injected = false;
    }

    fn remove_entry(&self, m: &mut Machine, pos: usize) {
        if m.entries[pos].injected {
            if let Some(value) = m.entries[pos].dependency.current_value() {
                self.notify(m, pos, Notify::Removed, &value);
            }
        }
        self.stop_entry(m, pos);
        m.entries.remove(pos);
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    /// Inactive → WaitingForRequired
    fn start_dependencies(&self, m: &mut Machine) {
        self.set_state(m, WaitingForRequired);
        for pos in 0..m.entries.len() {
            if m.entries[pos].epoch.is_none() {
                self.start_entry(m, pos);
            }
        }
    }

    /// WaitingForRequired → Inactive
    fn stop_dependencies(&self, m: &mut Machine) {
        for pos in (0..m.entries.len()).rev() {
            self.stop_entry(m, pos);
        }
        self.set_state(m, Inactive);
    }

    /// WaitingForRequired → Instantiated
    fn instantiate(&self, m: &mut Machine) {
        let instance = match &m.implementation {
            None => Instance::new(()),
            Some(Implementation::Instance(instance)) => instance.clone(),
            Some(Implementation::Factory(factory)) => match guarded("factory", || factory()) {
                Ok(instance) => instance,
                Err(e) => {
                    error!(component = %self.name(), error = %e, "Failed to create instance");
                    self.push_error(ComponentError::from_error("factory", &DepmanError::from(e)));
                    m.blocked = true;
                    return;
                }
            },
        };
        m.instance = Some(instance);
        m.start_failed = false;
        self.set_state(m, Instantiated);

        for pos in 0..m.entries.len() {
            let entry = &m.entries[pos];
            if entry.epoch.is_none() || !entry.dependency.is_available() {
                continue;
            }
            if let Some(value) = entry.dependency.current_value() {
                self.notify(m, pos, Notify::Added, &value);
                m.entries[pos].injected = true;
            }
        }

        let init = m.callbacks.init.clone();
        if !self.lifecycle(m, init.as_deref()) {
            m.blocked = true;
        }
    }

    /// Instantiated → Active
    fn activate(&self, m: &mut Machine) {
        if !m.interfaces.is_empty() {
            if let Some(instance) = &m.instance {
                let properties = m.effective_properties();
                let registration = self.env().directory.register(
                    &m.interfaces,
                    instance.object().clone(),
                    properties.clone(),
                );
                self.set_publication(Some(Publication {
                    registration,
                    properties,
                }));
            }
        }
        self.set_state(m, Active);

        let start = m.callbacks.start.clone();
        if !self.lifecycle(m, start.as_deref()) {
            m.start_failed = true;
            m.blocked = true;
        }
    }

    /// Active → Instantiated
    fn deactivate(&self, m: &mut Machine) {
        if !m.start_failed {
            let stop = m.callbacks.stop.clone();
            self.lifecycle(m, stop.as_deref());
        }
        if let Some(publication) = self.set_publication(None) {
            self.env().directory.unregister(publication.registration);
        }
        // the instance survives; retract what left under it
        for pos in (0..m.entries.len()).rev() {
            let entry = &m.entries[pos];
            if !entry.injected || entry.dependency.is_available() {
                continue;
            }
            if let Some(value) = entry.dependency.current_value() {
                self.notify(m, pos, Notify::Removed, &value);
            }
            m.entries[pos].injected = false;
        }
        self.set_state(m, Instantiated);
    }

    /// Instantiated → WaitingForRequired
    fn release(&self, m: &mut Machine) {
        for pos in (0..m.entries.len()).rev() {
            if !m.entries[pos].injected {
                continue;
            }
            if let Some(value) = m.entries[pos].dependency.current_value() {
                self.notify(m, pos, Notify::Removed, &value);
            }
            m.entries[pos].injected = false;
        }

        let destroy = m.callbacks.destroy.clone();
        self.lifecycle(m, destroy.as_deref());
        m.instance = None;

        for pos in (0..m.entries.len()).rev() {
            if m.entries[pos].instance_bound {
                self.stop_entry(m, pos);
                m.entries.remove(pos);
            }
        }
        self.set_state(m, WaitingForRequired);
    }

    /// Push changed properties to the published registration.
    fn republish(&self, m: &Machine) -> bool {
        let Some(publication) = self.publication() else {
            return false;
        };
        let properties = m.effective_properties();
        if properties == publication.properties {
            return false;
        }
        debug!(component = %self.name(), service = %publication.registration, "Republishing properties");
        self.set_publication(Some(Publication {
            registration: publication.registration,
            properties: properties.clone(),
        }));
        self.env()
            .directory
            .set_properties(publication.registration, properties);
        true
    }

    fn set_state(&self, m: &Machine, to: LifecycleState) {
        let from = self.state();
        self.store_state(to);
        self.env()
            .metrics
            .record_transition(from.as_str(), to.as_str());
        crate::log_component!(
            info,
            self.name(),
            "Component state changed",
            from = from.as_str(),
            to = to.as_str()
        );
        if self.env().config.trace_transitions {
            for entry in &m.entries {
                crate::log_component!(
                    info,
                    self.name(),
                    "Dependency at transition",
                    dependency = entry.dependency.describe().as_str(),
                    required = entry.dependency.is_required(),
                    available = entry.dependency.is_available(),
                    injected = entry.injected
                );
            }
        }

        for listener in self.listeners() {
            if catch_unwind(AssertUnwindSafe(|| listener(self, from, to))).is_err() {
                warn!(component = %self.name(), "State listener panicked");
            }
        }
    }

    fn refresh_view(&self, m: &Machine) {
        let dependencies = m
            .entries
            .iter()
            .map(|e| DependencyInfo {
                id: e.id,
                kind: e.dependency.kind(),
                description: e.dependency.describe(),
                required: e.dependency.is_required(),
                available: e.dependency.is_available(),
                propagate: e.dependency.is_propagate(),
            })
            .collect();
        self.set_view(View {
            interfaces: m.interfaces.clone(),
            dependencies,
        });
    }

    // ------------------------------------------------------------------
    // Callbacks
    // ------------------------------------------------------------------

    fn context(&self, m: &Machine) -> ComponentContext {
        let dependencies = m
            .entries
            .iter()
            .map(|e| (e.id, e.dependency.describe(), e.dependency.current_value()))
            .collect();
        ComponentContext::new(self.clone(), dependencies, m.effective_properties())
    }

    /// Run a lifecycle callback. Returns `false` if it failed.
    fn lifecycle(&self, m: &Machine, method: Option<&str>) -> bool {
        let Some(method) = method else {
            return true;
        };
        let (target, label) = match (&m.callbacks.instance, &m.instance) {
            (Some(instance), _) => (instance, "callback instance"),
            (None, Some(instance)) => (instance, "component instance"),
            (None, None) => return true,
        };
        let ctx = self.context(m);
        self.call(
            target,
            label,
            method,
            m.callbacks.explicit,
            Args::lifecycle(&ctx),
        )
    }

    /// Hand a dependency value to its added/changed/removed callback.
    fn notify(&self, m: &Machine, pos: usize, kind: Notify, value: &DependencyValue) -> bool {
        let callbacks = m.entries[pos].dependency.callbacks();
        let method = match kind {
            Notify::Added => &callbacks.added,
            Notify::Changed => &callbacks.changed,
            Notify::Removed => &callbacks.removed,
        };
        let Some(method) = method.as_deref() else {
            return true;
        };
        let (target, label) = match (&callbacks.instance, &m.instance) {
            (Some(instance), _) => (instance, "callback instance"),
            (None, Some(instance)) => (instance, "component instance"),
            (None, None) => return true,
        };
        let payload = match kind {
            Notify::Removed => value.retract_payload(),
            Notify::Added | Notify::Changed => value.inject_payload(),
        };
        let ctx = self.context(m);
        self.call(
            target,
            label,
            method,
            callbacks.explicit,
            Args::with_payload(&ctx, payload),
        )
    }

    fn call(
        &self,
        target: &Instance,
        label: &str,
        method: &str,
        explicit: bool,
        args: Args<'_>,
    ) -> bool {
        match self.env().invoker.invoke(target, method, args) {
            Ok(Invoked::Called) => true,
            Ok(Invoked::Absent) => {
                if explicit {
                    let err = DepmanError::Resolution {
                        method: method.to_string(),
                        target: label.to_string(),
                    };
                    warn!(component = %self.name(), method, "{}", err);
                    self.push_error(ComponentError::from_error(method, &err));
                }
                true
            }
            Err(e) => {
                error!(component = %self.name(), method, error = %e.message, "Callback failed");
                self.push_error(ComponentError::from_error(method, &DepmanError::from(e)));
                false
            }
        }
    }
}
