//! Components: managed units whose lifecycle follows their dependencies.
//!
//! A [`Component`] is a cheap, cloneable handle. Configuration calls,
//! dependency changes and manager add/remove all become tasks on the
//! component's [`SerialExecutor`]; the thread that finds the executor idle
//! runs them one at a time, walking the lifecycle state machine
//! (`Inactive → WaitingForRequired → Instantiated → Active` and back).
//! Tasks queued by the running thread itself (a dependency added from `init`,
//! a service registered by a callback that this component depends on) are
//! folded into the evaluation that is already in progress.

mod context;
mod machine;

pub use context::{ComponentContext, ComponentInfo};

pub(crate) use machine::{Machine, Task};

use crate::callback::{CallbackInvoker, Instance};
use crate::config::EngineConfig;
use crate::dependency::{Dependency, DependencyId, DependencyInfo, DependencyValue};
use crate::error::{ComponentError, DepmanError, Result};
use crate::executor::SerialExecutor;
use crate::properties::Properties;
use crate::registry::{ServiceDirectory, ServiceId};
use crate::utils::metrics::EngineMetrics;
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::thread::{self, ThreadId};
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

// ============================================================================
// Identity & state
// ============================================================================

/// Stable identity of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct ComponentId(Uuid);

impl ComponentId {
    fn new() -> Self {
        ComponentId(Uuid::new_v4())
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states, in activation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Inactive = 0,
    WaitingForRequired = 1,
    Instantiated = 2,
    Active = 3,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Inactive => "inactive",
            LifecycleState::WaitingForRequired => "waiting_for_required",
            LifecycleState::Instantiated => "instantiated",
            LifecycleState::Active => "active",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => LifecycleState::WaitingForRequired,
            2 => LifecycleState::Instantiated,
            3 => LifecycleState::Active,
            _ => LifecycleState::Inactive,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Configuration types
// ============================================================================

/// Builds a fresh instance for every instantiation.
pub type Factory = Arc<dyn Fn() -> anyhow::Result<Instance> + Send + Sync>;

/// What a component instantiates.
#[derive(Clone)]
pub enum Implementation {
    /// One instance, reused across instantiations.
    Instance(Instance),
    /// A new instance per instantiation, dropped on release.
    Factory(Factory),
}

impl From<Instance> for Implementation {
    fn from(instance: Instance) -> Self {
        Implementation::Instance(instance)
    }
}

/// Lifecycle method names and their target.
#[derive(Debug, Clone)]
pub(crate) struct LifecycleCallbacks {
    pub(crate) init: Option<String>,
    pub(crate) start: Option<String>,
    pub(crate) stop: Option<String>,
    pub(crate) destroy: Option<String>,
    pub(crate) instance: Option<Instance>,
    pub(crate) explicit: bool,
}

impl Default for LifecycleCallbacks {
    fn default() -> Self {
        Self {
            init: Some("init".to_string()),
            start: Some("start".to_string()),
            stop: Some("stop".to_string()),
            destroy: Some("destroy".to_string()),
            instance: None,
            explicit: false,
        }
    }
}

/// Called after every state change with the old and the new state, inside
/// the component's serialized section.
pub type StateListener = Arc<dyn Fn(&Component, LifecycleState, LifecycleState) + Send + Sync>;

/// Services shared by every component of one manager.
pub(crate) struct Env {
    pub(crate) directory: Arc<dyn ServiceDirectory>,
    pub(crate) invoker: CallbackInvoker,
    pub(crate) metrics: Arc<EngineMetrics>,
    pub(crate) config: EngineConfig,
}

/// What the component currently publishes.
#[derive(Debug, Clone)]
pub(crate) struct Publication {
    pub(crate) registration: ServiceId,
    pub(crate) properties: Properties,
}

/// Read-mostly copy of machine data for callers outside the serialized
/// section.
#[derive(Debug, Clone, Default)]
pub(crate) struct View {
    pub(crate) interfaces: Vec<String>,
    pub(crate) dependencies: Vec<DependencyInfo>,
}

// ============================================================================
// Component
// ============================================================================

pub(crate) struct ComponentInner {
    id: ComponentId,
    name: RwLock<String>,
    env: Arc<Env>,
    executor: SerialExecutor<Task>,
    /// Tasks queued by the runner thread while it is processing.
    local: Mutex<VecDeque<Task>>,
    runner: Mutex<Option<ThreadId>>,
    machine: Mutex<Machine>,
    state: AtomicU8,
    state_tx: watch::Sender<LifecycleState>,
    published: RwLock<Option<Publication>>,
    view: RwLock<View>,
    errors: Mutex<VecDeque<ComponentError>>,
    listeners: RwLock<Vec<StateListener>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn read<T>(l: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    l.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(l: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    l.write().unwrap_or_else(|e| e.into_inner())
}

/// Handle on a managed component.
#[derive(Clone)]
pub struct Component(Arc<ComponentInner>);

impl Component {
    pub(crate) fn new(name: String, env: Arc<Env>) -> Self {
        let (state_tx, _) = watch::channel(LifecycleState::Inactive);
        Component(Arc::new(ComponentInner {
            id: ComponentId::new(),
            name: RwLock::new(name),
            env,
            executor: SerialExecutor::new(),
            local: Mutex::new(VecDeque::new()),
            runner: Mutex::new(None),
            machine: Mutex::new(Machine::default()),
            state: AtomicU8::new(LifecycleState::Inactive as u8),
            state_tx,
            published: RwLock::new(None),
            view: RwLock::new(View::default()),
            errors: Mutex::new(VecDeque::new()),
            listeners: RwLock::new(Vec::new()),
        }))
    }

    pub fn id(&self) -> ComponentId {
        self.0.id
    }

    pub fn name(&self) -> String {
        read(&self.0.name).clone()
    }

    pub fn state(&self) -> LifecycleState {
        LifecycleState::from_u8(self.0.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    // ------------------------------------------------------------------
    // Builder-style configuration
    // ------------------------------------------------------------------

    pub fn set_name(self, name: impl Into<String>) -> Self {
        *write(&self.0.name) = name.into();
        self
    }

    pub fn set_implementation(self, implementation: impl Into<Implementation>) -> Self {
        let implementation = implementation.into();
        self.configure(move |m| m.implementation = Some(implementation));
        self
    }

    /// Build a fresh instance on every instantiation.
    pub fn set_factory<F>(self, factory: F) -> Self
    where
        F: Fn() -> anyhow::Result<Instance> + Send + Sync + 'static,
    {
        self.set_implementation(Implementation::Factory(Arc::new(factory)))
    }

    /// Publish the instance under `interface` while active.
    pub fn set_interface(self, interface: &str, properties: Option<Properties>) -> Self {
        self.set_interfaces(&[interface], properties)
    }

    pub fn set_interfaces(self, interfaces: &[&str], properties: Option<Properties>) -> Self {
        let interfaces: Vec<String> = interfaces.iter().map(|s| s.to_string()).collect();
        self.configure(move |m| {
            m.interfaces = interfaces;
            if let Some(props) = properties {
                m.properties = props;
            }
        });
        self
    }

    /// Rename the lifecycle callbacks; `None` disables one.
    pub fn set_callbacks(
        self,
        init: Option<&str>,
        start: Option<&str>,
        stop: Option<&str>,
        destroy: Option<&str>,
    ) -> Self {
        let names = [init, start, stop, destroy].map(|n| n.map(str::to_string));
        self.configure(move |m| {
            let [init, start, stop, destroy] = names;
            m.callbacks.init = init;
            m.callbacks.start = start;
            m.callbacks.stop = stop;
            m.callbacks.destroy = destroy;
            m.callbacks.explicit = true;
        });
        self
    }

    /// Invoke lifecycle callbacks on `instance` instead of the component's
    /// own instance.
    pub fn set_callback_instance(self, instance: Instance) -> Self {
        self.configure(move |m| m.callbacks.instance = Some(instance));
        self
    }

    /// Add a dependency, builder style.
    pub fn add<D: Dependency + 'static>(self, dependency: D) -> Self {
        self.add_dependency(Arc::new(dependency));
        self
    }

    // ------------------------------------------------------------------
    // Runtime API
    // ------------------------------------------------------------------

    /// Add a dependency at any time. If the component is running, the
    /// dependency is started and readiness re-evaluated; when called from one
    /// of this component's callbacks, that happens before the current
    /// transition finishes.
    pub fn add_dependency(&self, dependency: Arc<dyn Dependency>) -> DependencyId {
        let id = DependencyId::next();
        self.schedule(Task::AddDependency { id, dependency });
        id
    }

    /// Remove a dependency. Unknown ids are ignored.
    pub fn remove_dependency(&self, id: DependencyId) {
        self.schedule(Task::RemoveDependency(id));
    }

    pub fn add_state_listener<F>(&self, listener: F)
    where
        F: Fn(&Component, LifecycleState, LifecycleState) + Send + Sync + 'static,
    {
        write(&self.0.listeners).push(Arc::new(listener));
    }

    /// Watch the lifecycle state.
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.0.state_tx.subscribe()
    }

    /// Wait until the component reaches `state`, giving up after `timeout`.
    /// The engine itself never waits; this is for harnesses and tests.
    ///
    /// ```
    /// use depman::{DependencyManager, LifecycleState};
    /// use std::time::Duration;
    ///
    /// let dm = DependencyManager::new();
    /// let component = dm.create_component();
    /// dm.add(&component);
    /// tokio_test::block_on(component.wait_for_state(
    ///     LifecycleState::Active,
    ///     Duration::from_secs(1),
    /// ))
    /// .unwrap();
    /// ```
    pub async fn wait_for_state(&self, state: LifecycleState, timeout: Duration) -> Result<()> {
        let mut rx = self.subscribe();
        let outcome = tokio::time::timeout(timeout, rx.wait_for(|s| *s == state))
            .await
            .map(|reached| reached.map(|_| ()));
        match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(DepmanError::NotFound(format!("component {}", self.name()))),
            Err(_) => Err(DepmanError::Timeout(format!(
                "component {} to become {}",
                self.name(),
                state
            ))),
        }
    }

    /// Properties the component is currently published with, if active and
    /// publishing an interface.
    pub fn published_properties(&self) -> Option<Properties> {
        read(&self.0.published).as_ref().map(|p| p.properties.clone())
    }

    /// Registration of the published service, if any.
    pub fn service_id(&self) -> Option<ServiceId> {
        read(&self.0.published).as_ref().map(|p| p.registration)
    }

    /// Recorded failures, oldest first.
    pub fn errors(&self) -> Vec<ComponentError> {
        lock(&self.0.errors).iter().cloned().collect()
    }

    /// Serializable snapshot of the component.
    pub fn info(&self) -> ComponentInfo {
        let view = read(&self.0.view).clone();
        ComponentInfo {
            id: self.id(),
            name: self.name(),
            state: self.state(),
            interfaces: view.interfaces,
            service_id: self.service_id(),
            properties: self.published_properties(),
            dependencies: view.dependencies,
            errors: lock(&self.0.errors).len(),
        }
    }

    // ------------------------------------------------------------------
    // Task plumbing
    // ------------------------------------------------------------------

    fn configure(&self, f: impl FnOnce(&mut Machine) + Send + 'static) {
        self.schedule(Task::Configure(Box::new(f)));
    }

    pub(crate) fn enable(&self) {
        self.schedule(Task::Enable);
    }

    pub(crate) fn disable(&self) {
        self.schedule(Task::Disable);
    }

    fn is_runner_thread(&self) -> bool {
        *lock(&self.0.runner) == Some(thread::current().id())
    }

    /// Queue a task. Returns `true` if the caller must run the queue.
    pub(crate) fn submit(&self, task: Task) -> bool {
        if self.is_runner_thread() {
            lock(&self.0.local).push_back(task);
            return false;
        }
        self.0.executor.enqueue(task)
    }

    fn schedule(&self, task: Task) {
        if self.submit(task) {
            self.run_pending();
        }
    }

    /// Drain the executor on this thread.
    pub(crate) fn run_pending(&self) {
        self.0.executor.drain(|task| {
            let _runner = RunnerGuard::enter(&self.0.runner);
            let mut machine = lock(&self.0.machine);
            self.process(&mut machine, task);
        });
    }

    pub(crate) fn pop_local(&self) -> Option<Task> {
        lock(&self.0.local).pop_front()
    }

    pub(crate) fn env(&self) -> &Env {
        &self.0.env
    }

    pub(crate) fn downgrade(&self) -> Weak<ComponentInner> {
        Arc::downgrade(&self.0)
    }

    pub(crate) fn store_state(&self, state: LifecycleState) {
        self.0.state.store(state as u8, Ordering::SeqCst);
        self.0.state_tx.send_replace(state);
    }

    pub(crate) fn listeners(&self) -> Vec<StateListener> {
        read(&self.0.listeners).clone()
    }

    pub(crate) fn set_publication(&self, publication: Option<Publication>) -> Option<Publication> {
        std::mem::replace(&mut *write(&self.0.published), publication)
    }

    pub(crate) fn publication(&self) -> Option<Publication> {
        read(&self.0.published).clone()
    }

    pub(crate) fn set_view(&self, view: View) {
        *write(&self.0.view) = view;
    }

    pub(crate) fn push_error(&self, error: ComponentError) {
        let limit = self.0.env.config.error_history;
        if limit == 0 {
            return;
        }
        let mut errors = lock(&self.0.errors);
        while errors.len() >= limit {
            errors.pop_front();
        }
        errors.push_back(error);
    }
}

impl PartialEq for Component {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Component {}

impl fmt::Debug for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("state", &self.state())
            .finish()
    }
}

/// Marks the current thread as the component's runner for one task.
struct RunnerGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> RunnerGuard<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock(slot) = Some(thread::current().id());
        RunnerGuard(slot)
    }
}

impl Drop for RunnerGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

// ============================================================================
// Dependency owner binding
// ============================================================================

/// The link a started dependency uses to notify its component.
#[derive(Clone)]
pub struct DependencyOwner {
    component: Weak<ComponentInner>,
    id: DependencyId,
    epoch: u64,
}

impl DependencyOwner {
    pub(crate) fn new(component: &Component, id: DependencyId, epoch: u64) -> Self {
        Self {
            component: component.downgrade(),
            id,
            epoch,
        }
    }

    /// An owner that discards every notification.
    pub fn detached() -> Self {
        Self {
            component: Weak::new(),
            id: DependencyId(0),
            epoch: 0,
        }
    }

    pub fn dependency_id(&self) -> DependencyId {
        self.id
    }

    /// Queue a change on the component. Returns the component if the caller
    /// became its runner.
    pub(crate) fn post(&self, value: Option<DependencyValue>) -> Option<Component> {
        let component = Component(self.component.upgrade()?);
        let must_run = component.submit(Task::Changed {
            id: self.id,
            epoch: self.epoch,
            value,
        });
        must_run.then_some(component)
    }
}

impl fmt::Debug for DependencyOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyOwner")
            .field("dependency", &self.id)
            .field("epoch", &self.epoch)
            .finish()
    }
}
