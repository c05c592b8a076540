//! Dependency on a service published in a [`ServiceDirectory`].

use super::{Dependency, DependencyCallbacks, DependencyKind, DependencySlot, DependencyValue};
use crate::callback::Instance;
use crate::component::DependencyOwner;
use crate::error::Result;
use crate::filter::Filter;
use crate::ranking::RankedMap;
use crate::registry::{
    ListenerId, ServiceDirectory, ServiceEvent, ServiceId, ServiceListener, ServiceRef,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::trace;

/// Candidate bookkeeping for one started dependency.
#[derive(Default)]
struct Tracker {
    /// Bumped on every start/stop; events from an earlier listener are ignored.
    generation: u64,
    listener: Option<ListenerId>,
    candidates: RankedMap<ServiceId, ServiceRef>,
    /// Latest revision seen per service; `None` once it unregistered.
    /// Service ids are never reused, so a late event for a gone service is
    /// recognised and dropped.
    seen: HashMap<ServiceId, Option<u64>>,
    /// Candidate last posted to the owner, as (id, revision).
    delivered: Option<(ServiceId, u64)>,
}

impl Tracker {
    fn is_stale(&self, id: ServiceId, revision: u64) -> bool {
        match self.seen.get(&id) {
            Some(None) => true,
            Some(Some(latest)) => *latest > revision,
            None => false,
        }
    }

    /// Apply an event to the candidate set. Returns `false` for stale events.
    fn apply(&mut self, event: &ServiceEvent) -> bool {
        let svc = event.service();
        let id = svc.id();
        match event {
            ServiceEvent::Registered(_) | ServiceEvent::Modified(_) => {
                if self.is_stale(id, svc.revision()) {
                    return false;
                }
                self.seen.insert(id, Some(svc.revision()));
                self.candidates.insert(id, svc.ranking(), id.0, svc.clone());
            }
            ServiceEvent::ModifiedEndMatch(_) => {
                if self.is_stale(id, svc.revision()) {
                    return false;
                }
                self.seen.insert(id, Some(svc.revision()));
                self.candidates.remove(&id);
            }
            ServiceEvent::Unregistering(_) => {
                self.seen.insert(id, None);
                self.candidates.remove(&id);
            }
        }
        true
    }

    fn reset(&mut self) {
        self.generation += 1;
        self.candidates = RankedMap::new();
        self.seen.clear();
        self.delivered = None;
    }
}

struct Shared {
    slot: DependencySlot,
    tracker: Mutex<Tracker>,
}

impl Shared {
    fn tracker(&self) -> MutexGuard<'_, Tracker> {
        self.tracker.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn handle(&self, generation: u64, event: &ServiceEvent) {
        let delivery = {
            let mut tracker = self.tracker();
            if tracker.generation != generation || !tracker.apply(event) {
                return;
            }
            let best = tracker.candidates.first().map(|(_, svc)| svc.clone());
            let key = best.as_ref().map(|svc| (svc.id(), svc.revision()));
            if key == tracker.delivered {
                return;
            }
            tracker.delivered = key;
            trace!(candidate = ?key, "Best service candidate changed");
            self.slot.post(best.map(DependencyValue::Service))
        };
        delivery.complete();
    }
}

/// Requires (or optionally uses) the best-ranked service published under an
/// interface and matching an optional filter.
///
/// Among several candidates the highest `service.ranking` wins, then the
/// earliest registration. When the chosen service goes away the next best
/// one is delivered as a value update; a property change on the chosen
/// service is a value update too.
pub struct ServiceDependency {
    directory: Arc<dyn ServiceDirectory>,
    interface: String,
    filter: Option<Filter>,
    required: bool,
    propagate: bool,
    callbacks: DependencyCallbacks,
    shared: Arc<Shared>,
}

impl ServiceDependency {
    /// A required dependency on `interface` with the default callback names
    /// `added`, `changed` and `removed`.
    pub fn new(directory: Arc<dyn ServiceDirectory>, interface: impl Into<String>) -> Self {
        Self {
            directory,
            interface: interface.into(),
            filter: None,
            required: true,
            propagate: false,
            callbacks: DependencyCallbacks::defaults("added", "changed", "removed"),
            shared: Arc::new(Shared {
                slot: DependencySlot::new(),
                tracker: Mutex::new(Tracker::default()),
            }),
        }
    }

    /// Switch to another interface.
    pub fn service(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// Only accept services whose properties match `expr`.
    pub fn filter(mut self, expr: &str) -> Result<Self> {
        self.filter = Some(Filter::parse(expr)?);
        Ok(self)
    }

    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    pub fn propagate(mut self, propagate: bool) -> Self {
        self.propagate = propagate;
        self
    }

    /// Rename the callbacks; `None` disables one.
    pub fn callbacks(
        mut self,
        added: Option<&str>,
        changed: Option<&str>,
        removed: Option<&str>,
    ) -> Self {
        self.callbacks.added = added.map(str::to_string);
        self.callbacks.changed = changed.map(str::to_string);
        self.callbacks.removed = removed.map(str::to_string);
        self.callbacks.explicit = true;
        self
    }

    /// Deliver callbacks to `instance` instead of the component's instance.
    pub fn callback_instance(mut self, instance: Instance) -> Self {
        self.callbacks.instance = Some(instance);
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }
}

impl Dependency for ServiceDependency {
    fn kind(&self) -> DependencyKind {
        DependencyKind::Service
    }

    fn describe(&self) -> String {
        match &self.filter {
            Some(filter) => format!("service {} {}", self.interface, filter),
            None => format!("service {}", self.interface),
        }
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
            let mut tracker = self.shared.tracker();
            tracker.reset();
            tracker.generation
        };
        self.shared.slot.attach(owner);

        let shared = self.shared.clone();
        let listener: ServiceListener =
            Arc::new(move |event: &ServiceEvent| shared.handle(generation, event));
        let id = self
            .directory
            .add_listener(&self.interface, self.filter.clone(), listener);

        let mut tracker = self.shared.tracker();
        if tracker.generation == generation {
            tracker.listener = Some(id);
        } else {
            drop(tracker);
            self.directory.remove_listener(id);
        }
        Ok(())
    }

    fn stop(&self) {
        let listener = {
            let mut tracker = self.shared.tracker();
            let listener = tracker.listener.take();
            tracker.reset();
            listener
        };
        if let Some(id) = listener {
            self.directory.remove_listener(id);
        }
        self.shared.slot.detach();
    }
}
