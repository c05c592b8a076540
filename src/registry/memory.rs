//! In-memory service registry.

use super::{ListenerId, ServiceDirectory, ServiceEvent, ServiceId, ServiceListener, ServiceRef};
use crate::callback::ServiceObject;
use crate::filter::Filter;
use crate::properties::{self, Properties, OBJECT_CLASS, SERVICE_ID};
use crate::ranking::RankedMap;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

struct Registration {
    interfaces: Arc<[String]>,
    object: ServiceObject,
    properties: Arc<Properties>,
    revision: u64,
}

impl Registration {
    fn to_ref(&self, id: ServiceId) -> ServiceRef {
        ServiceRef::new(
            id,
            self.revision,
            self.interfaces.clone(),
            self.object.clone(),
            self.properties.clone(),
        )
    }

    fn provides(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }
}

struct ListenerEntry {
    interface: String,
    filter: Option<Filter>,
    listener: ServiceListener,
}

impl ListenerEntry {
    fn matches(&self, props: &Properties) -> bool {
        self.filter.as_ref().map_or(true, |f| f.matches(props))
    }
}

#[derive(Default)]
struct State {
    services: HashMap<ServiceId, Registration>,
    listeners: BTreeMap<u64, ListenerEntry>,
    next_service: u64,
    next_listener: u64,
}

/// Thread-safe in-memory [`ServiceDirectory`]. Cloning yields another handle
/// to the same registry.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    state: Arc<RwLock<State>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of registered services.
    pub fn len(&self) -> usize {
        self.read().services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a single registration by id.
    pub fn get(&self, id: ServiceId) -> Option<ServiceRef> {
        self.read().services.get(&id).map(|r| r.to_ref(id))
    }

    fn dispatch(deliveries: Vec<(ServiceListener, ServiceEvent)>) {
        for (listener, event) in deliveries {
            listener(&event);
        }
    }
}

fn stamp(id: ServiceId, interfaces: &[String], mut props: Properties) -> Properties {
    props.insert(SERVICE_ID.to_string(), Value::from(id.0));
    props.insert(
        OBJECT_CLASS.to_string(),
        Value::Array(interfaces.iter().cloned().map(Value::String).collect()),
    );
    props
}

impl ServiceDirectory for ServiceRegistry {
    fn register(
        &self,
        interfaces: &[String],
        object: ServiceObject,
        properties: Properties,
    ) -> ServiceId {
        let (id, deliveries) = {
            let mut state = self.write();
            state.next_service += 1;
            let id = ServiceId(state.next_service);
            let registration = Registration {
                interfaces: interfaces.to_vec().into(),
                object,
                properties: Arc::new(stamp(id, interfaces, properties)),
                revision: 0,
            };
            let service = registration.to_ref(id);
            let deliveries: Vec<_> = state
                .listeners
                .values()
                .filter(|l| registration.provides(&l.interface) && l.matches(&registration.properties))
                .map(|l| (l.listener.clone(), ServiceEvent::Registered(service.clone())))
                .collect();
            state.services.insert(id, registration);
            (id, deliveries)
        };

        debug!(service = %id, interfaces = ?interfaces, "Registered service");
        Self::dispatch(deliveries);
        id
    }

    fn unregister(&self, id: ServiceId) -> bool {
        let deliveries = {
            let mut state = self.write();
            let Some(registration) = state.services.remove(&id) else {
                return false;
            };
            let service = registration.to_ref(id);
            state
                .listeners
                .values()
                .filter(|l| registration.provides(&l.interface) && l.matches(&registration.properties))
                .map(|l| (l.listener.clone(), ServiceEvent::Unregistering(service.clone())))
                .collect::<Vec<_>>()
        };

        debug!(service = %id, "Unregistered service");
        Self::dispatch(deliveries);
        true
    }

    fn set_properties(&self, id: ServiceId, properties: Properties) -> bool {
        let deliveries = {
            let mut state = self.write();
            let State {
                services,
                listeners,
                ..
            } = &mut *state;
            let Some(registration) = services.get_mut(&id) else {
                return false;
            };
            let old = registration.properties.clone();
            registration.properties = Arc::new(stamp(id, &registration.interfaces, properties));
            registration.revision += 1;
            let service = registration.to_ref(id);

            let mut deliveries = Vec::new();
            for l in listeners.values() {
                if !registration.provides(&l.interface) {
                    continue;
                }
                let was = l.matches(&old);
                let now = l.matches(&registration.properties);
                if now {
                    deliveries.push((l.listener.clone(), ServiceEvent::Modified(service.clone())));
                } else if was {
                    deliveries.push((
                        l.listener.clone(),
                        ServiceEvent::ModifiedEndMatch(service.clone()),
                    ));
                }
            }
            deliveries
        };

        debug!(service = %id, "Modified service properties");
        Self::dispatch(deliveries);
        true
    }

    fn add_listener(
        &self,
        interface: &str,
        filter: Option<Filter>,
        listener: ServiceListener,
    ) -> ListenerId {
        let (id, replay) = {
            let mut state = self.write();
            state.next_listener += 1;
            let id = state.next_listener;
            let entry = ListenerEntry {
                interface: interface.to_string(),
                filter,
                listener: listener.clone(),
            };
            let mut current: Vec<_> = state
                .services
                .iter()
                .filter(|(_, r)| r.provides(interface) && entry.matches(&r.properties))
                .map(|(sid, r)| r.to_ref(*sid))
                .collect();
            current.sort_by_key(|s| s.id());
            state.listeners.insert(id, entry);
            (ListenerId(id), current)
        };

        for service in replay {
            listener(&ServiceEvent::Registered(service));
        }
        id
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.write().listeners.remove(&id.0).is_some()
    }

    fn lookup(&self, interface: &str, filter: Option<&Filter>) -> Vec<ServiceRef> {
        let state = self.read();
        let mut ranked = RankedMap::new();
        for (id, r) in &state.services {
            if r.provides(interface) && filter.map_or(true, |f| f.matches(&r.properties)) {
                ranked.insert(*id, properties::ranking(&r.properties), id.0, r.to_ref(*id));
            }
        }
        ranked.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{props, SERVICE_RANKING};
    use std::sync::Mutex;

    fn ifaces(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn collecting() -> (Arc<Mutex<Vec<String>>>, ServiceListener) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let listener: ServiceListener = Arc::new(move |event: &ServiceEvent| {
            let tag = match event {
                ServiceEvent::Registered(_) => "registered",
                ServiceEvent::Modified(_) => "modified",
                ServiceEvent::ModifiedEndMatch(_) => "end-match",
                ServiceEvent::Unregistering(_) => "unregistering",
            };
            sink.lock()
                .unwrap()
                .push(format!("{}:{}", tag, event.service().id()));
        });
        (log, listener)
    }

    #[test]
    fn test_register_stamps_properties() {
        let registry = ServiceRegistry::new();
        let id = registry.register(&ifaces(&["Runnable"]), Arc::new(()), props([("k", "v")]));
        let svc = registry.get(id).unwrap();
        assert_eq!(svc.property(SERVICE_ID), Some(&Value::from(id.0)));
        assert_eq!(svc.property(OBJECT_CLASS), Some(&serde_json::json!(["Runnable"])));
        assert_eq!(svc.property("k"), Some(&Value::from("v")));
    }

    #[test]
    fn test_listener_replay_and_events() {
        let registry = ServiceRegistry::new();
        let first = registry.register(&ifaces(&["Runnable"]), Arc::new(()), Properties::new());
        let (log, listener) = collecting();
        registry.add_listener("Runnable", None, listener);

        let second = registry.register(&ifaces(&["Runnable"]), Arc::new(()), Properties::new());
        registry.register(&ifaces(&["Other"]), Arc::new(()), Properties::new());
        registry.unregister(first);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                format!("registered:{}", first),
                format!("registered:{}", second),
                format!("unregistering:{}", first),
            ]
        );
    }

    #[test]
    fn test_filtered_listener_sees_match_transitions() {
        let registry = ServiceRegistry::new();
        let (log, listener) = collecting();
        let filter = Filter::parse("(testkey=testvalue)").unwrap();
        registry.add_listener("Runnable", Some(filter), listener);

        let id = registry.register(&ifaces(&["Runnable"]), Arc::new(()), Properties::new());
        registry.set_properties(id, props([("testkey", "testvalue")]));
        registry.set_properties(id, props([("testkey", "testvalue"), ("x", "y")]));
        registry.set_properties(id, Properties::new());
        registry.unregister(id);

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                format!("modified:{}", id),
                format!("modified:{}", id),
                format!("end-match:{}", id),
            ]
        );
    }

    #[test]
    fn test_lookup_orders_by_ranking_then_id() {
        let registry = ServiceRegistry::new();
        let low = registry.register(&ifaces(&["S"]), Arc::new(()), Properties::new());
        let high = registry.register(&ifaces(&["S"]), Arc::new(()), props([(SERVICE_RANKING, 10)]));
        let low2 = registry.register(&ifaces(&["S"]), Arc::new(()), Properties::new());

        let ids: Vec<_> = registry.lookup("S", None).iter().map(|s| s.id()).collect();
        assert_eq!(ids, vec![high, low, low2]);
    }

    #[test]
    fn test_unknown_ids() {
        let registry = ServiceRegistry::new();
        assert!(!registry.unregister(ServiceId(99)));
        assert!(!registry.set_properties(ServiceId(99), Properties::new()));
        assert!(!registry.remove_listener(ListenerId(99)));
    }

    #[test]
    fn test_listener_may_register_reentrantly() {
        let registry = ServiceRegistry::new();
        let inner = registry.clone();
        let listener: ServiceListener = Arc::new(move |event: &ServiceEvent| {
            if let ServiceEvent::Registered(_) = event {
                inner.register(&["Echo".to_string()], Arc::new(()), Properties::new());
            }
        });
        registry.add_listener("Ping", None, listener);
        registry.register(&ifaces(&["Ping"]), Arc::new(()), Properties::new());

        assert_eq!(registry.lookup("Echo", None).len(), 1);
    }
}
