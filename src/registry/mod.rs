//! Service directory abstraction.
//!
//! Components publish their interfaces here and service dependencies
//! discover candidates through listeners. The engine only talks to the
//! [`ServiceDirectory`] trait; [`ServiceRegistry`] is the in-memory
//! implementation used by the manager by default.

mod memory;

pub use memory::ServiceRegistry;

use crate::callback::ServiceObject;
use crate::filter::Filter;
use crate::properties::{self, Properties};
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Registry-assigned service identifier. Identifiers are never reused, so
/// they double as registration sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ServiceId(pub u64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Handle of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// A reference to a registered service: the object and the property map it
/// was registered with at a given revision.
#[derive(Clone)]
pub struct ServiceRef {
    id: ServiceId,
    revision: u64,
    interfaces: Arc<[String]>,
    object: ServiceObject,
    properties: Arc<Properties>,
}

impl ServiceRef {
    pub(crate) fn new(
        id: ServiceId,
        revision: u64,
        interfaces: Arc<[String]>,
        object: ServiceObject,
        properties: Arc<Properties>,
    ) -> Self {
        Self {
            id,
            revision,
            interfaces,
            object,
            properties,
        }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    /// Bumped every time the service's properties change.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn interfaces(&self) -> &[String] {
        &self.interfaces
    }

    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    pub fn property(&self, key: &str) -> Option<&serde_json::Value> {
        self.properties.get(key)
    }

    pub fn ranking(&self) -> i64 {
        properties::ranking(&self.properties)
    }

    pub fn object(&self) -> &ServiceObject {
        &self.object
    }

    /// Borrow the service object as `T`.
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    /// Same registration at the same revision.
    pub fn same_as(&self, other: &ServiceRef) -> bool {
        self.id == other.id && self.revision == other.revision
    }
}

impl fmt::Debug for ServiceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRef")
            .field("id", &self.id)
            .field("revision", &self.revision)
            .field("interfaces", &self.interfaces)
            .field("properties", &self.properties)
            .finish()
    }
}

/// A change observed by a listener.
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// A matching service appeared (also used to replay existing services).
    Registered(ServiceRef),
    /// A matching service changed its properties and still matches, or now
    /// matches for the first time.
    Modified(ServiceRef),
    /// A service's properties changed so that it no longer matches.
    ModifiedEndMatch(ServiceRef),
    /// A matching service is going away.
    Unregistering(ServiceRef),
}

impl ServiceEvent {
    pub fn service(&self) -> &ServiceRef {
        match self {
            ServiceEvent::Registered(s)
            | ServiceEvent::Modified(s)
            | ServiceEvent::ModifiedEndMatch(s)
            | ServiceEvent::Unregistering(s) => s,
        }
    }
}

pub type ServiceListener = Arc<dyn Fn(&ServiceEvent) + Send + Sync>;

/// Discovery and publication of services.
///
/// Implementations must never call a listener while holding an internal
/// lock: listeners run component transitions, which may register or
/// unregister services in turn.
pub trait ServiceDirectory: Send + Sync {
    /// Publish `object` under `interfaces`. `service.id` and `objectClass`
    /// are added to the stored properties.
    fn register(&self, interfaces: &[String], object: ServiceObject, properties: Properties)
        -> ServiceId;

    /// Withdraw a service. Returns `false` if it was not registered.
    fn unregister(&self, id: ServiceId) -> bool;

    /// Replace a service's properties. Returns `false` if it was not registered.
    fn set_properties(&self, id: ServiceId, properties: Properties) -> bool;

    /// Listen for services published under `interface` and matching `filter`.
    /// Services already registered are replayed as `Registered` before this
    /// returns.
    fn add_listener(
        &self,
        interface: &str,
        filter: Option<Filter>,
        listener: ServiceListener,
    ) -> ListenerId;

    fn remove_listener(&self, id: ListenerId) -> bool;

    /// Currently registered services for `interface`, best ranked first.
    fn lookup(&self, interface: &str, filter: Option<&Filter>) -> Vec<ServiceRef>;
}
