//! depman - dynamic dependency manager and component lifecycle engine
//!
//! Components declare the services and configurations they need; the
//! [`DependencyManager`] instantiates, starts, publishes, stops and destroys
//! them as those dependencies come and go.
//!
//! ```
//! use depman::{DependencyManager, Instance, LifecycleState};
//!
//! let dm = DependencyManager::new();
//! let consumer = dm
//!     .create_component()
//!     .set_implementation(Instance::new(()))
//!     .add(dm.configuration_dependency("P"));
//! dm.add(&consumer);
//! assert_eq!(consumer.state(), LifecycleState::WaitingForRequired);
//!
//! dm.configurations()
//!     .get_configuration("P")
//!     .update(Default::default())
//!     .unwrap();
//! assert_eq!(consumer.state(), LifecycleState::Active);
//! ```

pub mod callback;
pub mod component;
pub mod config;
pub mod dependency;
pub mod error;
pub mod executor;
pub mod filter;
pub mod manager;
pub mod properties;
pub mod propagate;
pub mod ranking;
pub mod registry;
pub mod store;
pub mod utils;

pub use callback::{CallbackInvoker, Instance, Invoked, MethodTable, Overload};
pub use component::{
    Component, ComponentContext, ComponentId, ComponentInfo, Implementation, LifecycleState,
};
pub use config::Config;
pub use dependency::{
    ConfigurationDependency, Dependency, DependencyId, DependencyKind, DependencyValue,
    ServiceDependency,
};
pub use error::{CallbackError, ComponentError, DepmanError, ErrorKind, Result};
pub use filter::Filter;
pub use manager::DependencyManager;
pub use properties::{props, Properties};
pub use registry::{ServiceDirectory, ServiceEvent, ServiceId, ServiceRef, ServiceRegistry};
pub use store::{Configuration, ConfigurationStore, MemoryConfigurationStore};
