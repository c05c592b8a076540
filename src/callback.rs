//! Callback resolution and invocation.
//!
//! A component's behaviour is bound explicitly: every lifecycle or update
//! method is a closure registered by name on a [`MethodTable`], possibly
//! several times with different argument shapes ([`Overload`]). The
//! [`CallbackInvoker`] picks the most specific overload that accepts the
//! arguments at hand, runs it, and turns errors and panics into
//! [`CallbackError`]s. A name with no binding at all is simply skipped.

use crate::component::ComponentContext;
use crate::error::CallbackError;
use crate::properties::Properties;
use crate::registry::ServiceRef;
use crate::utils::metrics::EngineMetrics;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

/// A published service object.
pub type ServiceObject = Arc<dyn Any + Send + Sync>;

type ContextAndServiceFn = dyn Fn(&ComponentContext, &ServiceRef) -> anyhow::Result<()> + Send + Sync;
type ServiceFn = dyn Fn(&ServiceRef) -> anyhow::Result<()> + Send + Sync;
type PropertiesFn = dyn Fn(Option<&Properties>) -> anyhow::Result<()> + Send + Sync;
type ContextFn = dyn Fn(&ComponentContext) -> anyhow::Result<()> + Send + Sync;
type NoArgsFn = dyn Fn() -> anyhow::Result<()> + Send + Sync;

/// One argument shape a method can be bound with, from most to least specific.
#[derive(Clone)]
pub enum Overload {
    ContextAndService(Arc<ContextAndServiceFn>),
    Service(Arc<ServiceFn>),
    /// Receives a configuration's properties (`None` once it is deleted), or
    /// the property map of a service.
    Properties(Arc<PropertiesFn>),
    Context(Arc<ContextFn>),
    NoArgs(Arc<NoArgsFn>),
}

impl Overload {
    pub fn context_and_service<F>(f: F) -> Self
    where
        F: Fn(&ComponentContext, &ServiceRef) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Overload::ContextAndService(Arc::new(f))
    }

    pub fn service<F>(f: F) -> Self
    where
        F: Fn(&ServiceRef) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Overload::Service(Arc::new(f))
    }

    pub fn properties<F>(f: F) -> Self
    where
        F: Fn(Option<&Properties>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Overload::Properties(Arc::new(f))
    }

    pub fn context<F>(f: F) -> Self
    where
        F: Fn(&ComponentContext) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Overload::Context(Arc::new(f))
    }

    pub fn no_args<F>(f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Overload::NoArgs(Arc::new(f))
    }

    fn specificity(&self) -> u8 {
        match self {
            Overload::ContextAndService(_) => 4,
            Overload::Service(_) => 3,
            Overload::Properties(_) => 2,
            Overload::Context(_) => 1,
            Overload::NoArgs(_) => 0,
        }
    }

    fn accepts(&self, args: &Args<'_>) -> bool {
        match self {
            Overload::ContextAndService(_) => {
                args.context.is_some() && matches!(args.payload, Payload::Service(_))
            }
            Overload::Service(_) => matches!(args.payload, Payload::Service(_)),
            Overload::Properties(_) => {
                matches!(args.payload, Payload::Service(_) | Payload::Properties(_))
            }
            Overload::Context(_) => args.context.is_some(),
            Overload::NoArgs(_) => true,
        }
    }

    fn call(&self, args: &Args<'_>) -> anyhow::Result<()> {
        match (self, args.payload) {
            (Overload::ContextAndService(f), Payload::Service(svc)) => match args.context {
                Some(ctx) => f(ctx, svc),
                None => Ok(()),
            },
            (Overload::Service(f), Payload::Service(svc)) => f(svc),
            (Overload::Properties(f), Payload::Service(svc)) => f(Some(svc.properties())),
            (Overload::Properties(f), Payload::Properties(props)) => f(props),
            (Overload::Context(f), _) => match args.context {
                Some(ctx) => f(ctx),
                None => Ok(()),
            },
            (Overload::NoArgs(f), _) => f(),
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Overload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shape = match self {
            Overload::ContextAndService(_) => "ContextAndService",
            Overload::Service(_) => "Service",
            Overload::Properties(_) => "Properties",
            Overload::Context(_) => "Context",
            Overload::NoArgs(_) => "NoArgs",
        };
        f.write_str(shape)
    }
}

/// Named method bindings of one callback target.
#[derive(Clone, Default, Debug)]
pub struct MethodTable {
    methods: HashMap<String, Vec<Overload>>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `overload` under `name`. Binding the same shape twice replaces
    /// the earlier binding.
    pub fn bind(mut self, name: impl Into<String>, overload: Overload) -> Self {
        let overloads = self.methods.entry(name.into()).or_default();
        overloads.retain(|o| o.specificity() != overload.specificity());
        overloads.push(overload);
        overloads.sort_by_key(|o| std::cmp::Reverse(o.specificity()));
        self
    }

    pub fn has(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    /// Most specific overload of `name` accepting `args`.
    fn resolve(&self, name: &str, args: &Args<'_>) -> Option<&Overload> {
        self.methods.get(name)?.iter().find(|o| o.accepts(args))
    }
}

/// A callback target: the object a component publishes, and the methods
/// the engine can call on it.
#[derive(Clone)]
pub struct Instance {
    object: ServiceObject,
    methods: Arc<MethodTable>,
}

impl Instance {
    /// Wrap a value as the service object, with no methods bound yet.
    pub fn new<T: Any + Send + Sync>(object: T) -> Self {
        Self::from_arc(Arc::new(object))
    }

    pub fn from_arc(object: ServiceObject) -> Self {
        Self {
            object,
            methods: Arc::new(MethodTable::new()),
        }
    }

    /// An instance with methods but no meaningful service object; used for
    /// separate callback instances.
    pub fn callbacks(methods: MethodTable) -> Self {
        Self::new(()).with_methods(methods)
    }

    pub fn with_methods(mut self, methods: MethodTable) -> Self {
        self.methods = Arc::new(methods);
        self
    }

    pub fn object(&self) -> &ServiceObject {
        &self.object
    }

    pub fn downcast<T: Any>(&self) -> Option<&T> {
        self.object.downcast_ref::<T>()
    }

    pub fn methods(&self) -> &MethodTable {
        &self.methods
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("methods", &self.methods.methods.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// What a callback is being handed.
#[derive(Clone, Copy)]
pub enum Payload<'a> {
    None,
    Service(&'a ServiceRef),
    Properties(Option<&'a Properties>),
}

/// Arguments for one invocation.
#[derive(Clone, Copy)]
pub struct Args<'a> {
    pub context: Option<&'a ComponentContext>,
    pub payload: Payload<'a>,
}

impl<'a> Args<'a> {
    pub fn lifecycle(context: &'a ComponentContext) -> Self {
        Self {
            context: Some(context),
            payload: Payload::None,
        }
    }

    pub fn with_payload(context: &'a ComponentContext, payload: Payload<'a>) -> Self {
        Self {
            context: Some(context),
            payload,
        }
    }
}

/// Whether a bound method ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invoked {
    Called,
    Absent,
}

/// Resolves and runs callbacks, recording timing in the engine metrics.
#[derive(Debug, Clone, Default)]
pub struct CallbackInvoker {
    metrics: Option<Arc<EngineMetrics>>,
}

impl CallbackInvoker {
    pub fn new(metrics: Arc<EngineMetrics>) -> Self {
        Self {
            metrics: Some(metrics),
        }
    }

    /// Invoke `method` on `target`.
    ///
    /// Returns `Ok(Invoked::Absent)` when no overload of that name accepts
    /// `args`; a bound method that fails or panics yields a [`CallbackError`].
    pub fn invoke(
        &self,
        target: &Instance,
        method: &str,
        args: Args<'_>,
    ) -> Result<Invoked, CallbackError> {
        let Some(overload) = target.methods.resolve(method, &args) else {
            return Ok(Invoked::Absent);
        };

        let started = Instant::now();
        let result = guarded(method, || overload.call(&args)).map(|()| Invoked::Called);

        if let Some(metrics) = &self.metrics {
            metrics.record_callback(method, started.elapsed(), result.is_ok());
        }
        result
    }
}

/// Run user code, turning an error or a panic into a [`CallbackError`]
/// attributed to `method`.
pub(crate) fn guarded<T>(
    method: &str,
    f: impl FnOnce() -> anyhow::Result<T>,
) -> Result<T, CallbackError> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(CallbackError::new(method, format!("{:#}", e))),
        Err(panic) => Err(CallbackError::new(
            method,
            format!("panicked: {}", panic_message(panic.as_ref())),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
