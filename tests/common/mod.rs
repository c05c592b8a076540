//! Shared helpers for integration tests.

#![allow(dead_code)]

use depman::component::DependencyOwner;
use depman::config::{LogFormat, LoggingConfig};
use depman::dependency::{
    Dependency, DependencyCallbacks, DependencyKind, DependencySlot, DependencyValue,
};
use depman::{Instance, MethodTable, Overload, Properties};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Route engine logs to the test output; `RUST_LOG` overrides the level.
pub fn init_logging() {
    let cfg = LoggingConfig {
        format: LogFormat::Component,
        level: "depman=debug".to_string(),
        file: None,
    };
    depman::utils::logging::init_logging(&cfg).expect("stderr logging");
}

// ============================================================================
// Step sequencer
// ============================================================================

/// Asserts that numbered steps happen in order, possibly across threads.
#[derive(Default)]
pub struct Ensure {
    step: Mutex<u32>,
    violations: Mutex<Vec<String>>,
    cond: Condvar,
}

impl Ensure {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark step `n`, which must directly follow the previous one.
    pub fn step(&self, n: u32) {
        let mut step = self.step.lock().unwrap();
        if *step + 1 != n {
            self.violations
                .lock()
                .unwrap()
                .push(format!("step {} reached after step {}", n, *step));
            return;
        }
        *step = n;
        self.cond.notify_all();
    }

    /// Mark the next step, whatever its number.
    pub fn next(&self) {
        let mut step = self.step.lock().unwrap();
        *step += 1;
        self.cond.notify_all();
    }

    pub fn current(&self) -> u32 {
        *self.step.lock().unwrap()
    }

    /// Block until step `n` is reached. Returns `false` on timeout.
    pub fn wait_for_step(&self, n: u32, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut step = self.step.lock().unwrap();
        while *step < n {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            step = self.cond.wait_timeout(step, deadline - now).unwrap().0;
        }
        true
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.lock().unwrap().clone()
    }
}

// ============================================================================
// Event log
// ============================================================================

#[derive(Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }

    pub fn count(&self, event: &str) -> usize {
        self.0.lock().unwrap().iter().filter(|e| *e == event).count()
    }
}

/// An instance that logs every lifecycle call and every dependency
/// notification (`added:`, `changed:`, `removed:` followed by the value's
/// `name` property, or `-` if it has none).
pub fn recording_instance(log: &EventLog) -> Instance {
    let mut methods = MethodTable::new();
    for name in ["init", "start", "stop", "destroy"] {
        let log = log.clone();
        methods = methods.bind(
            name,
            Overload::no_args(move || {
                log.push(name);
                Ok(())
            }),
        );
    }
    for name in ["added", "changed", "removed"] {
        let log = log.clone();
        methods = methods.bind(
            name,
            Overload::properties(move |props| {
                let label = props
                    .and_then(|p| p.get("name"))
                    .and_then(|v| v.as_str())
                    .unwrap_or("-");
                log.push(format!("{}:{}", name, label));
                Ok(())
            }),
        );
    }
    Instance::new(()).with_methods(methods)
}

// ============================================================================
// A dependency kind driven by the test
// ============================================================================

/// A dependency whose availability the test switches by hand.
pub struct ToggleDependency {
    required: bool,
    propagate: bool,
    callbacks: DependencyCallbacks,
    slot: DependencySlot,
    source: Mutex<Option<Properties>>,
    started: AtomicBool,
}

impl ToggleDependency {
    fn build(required: bool, propagate: bool) -> Arc<Self> {
        Arc::new(Self {
            required,
            propagate,
            callbacks: DependencyCallbacks {
                added: Some("added".into()),
                changed: Some("changed".into()),
                removed: Some("removed".into()),
                instance: None,
                explicit: false,
            },
            slot: DependencySlot::new(),
            source: Mutex::new(None),
            started: AtomicBool::new(false),
        })
    }

    pub fn required() -> Arc<Self> {
        Self::build(true, false)
    }

    pub fn optional() -> Arc<Self> {
        Self::build(false, false)
    }

    pub fn propagating() -> Arc<Self> {
        Self::build(true, true)
    }

    /// Make the source present with `props`, or absent with `None`.
    pub fn set(&self, props: Option<Properties>) {
        *self.source.lock().unwrap() = props.clone();
        if self.started.load(Ordering::SeqCst) {
            self.on_external_change(props.map(DependencyValue::Configuration));
        }
    }

    pub fn as_dyn(self: &Arc<Self>) -> Arc<dyn Dependency> {
        self.clone()
    }
}

impl Dependency for ToggleDependency {
    fn kind(&self) -> DependencyKind {
        DependencyKind::Other
    }

    fn describe(&self) -> String {
        "toggle".to_string()
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
        &self.slot
    }

    fn start(&self, owner: DependencyOwner) -> depman::Result<()> {
        self.slot.attach(owner);
        self.started.store(true, Ordering::SeqCst);
        let current = self.source.lock().unwrap().clone();
        if let Some(props) = current {
            self.slot
                .post(Some(DependencyValue::Configuration(props)))
                .complete();
        }
        Ok(())
    }

    fn stop(&self) {
        self.started.store(false, Ordering::SeqCst);
        self.slot.detach();
    }
}
