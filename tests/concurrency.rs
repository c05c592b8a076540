//! Notifications from many threads are applied one at a time per component.

mod common;

use common::ToggleDependency;
use depman::{
    props, Dependency, DependencyManager, Instance, LifecycleState, MethodTable, Overload,
};
use depman::store::{ConfigurationEvent, ConfigurationListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

const THREADS: usize = 8;
const ROUNDS: usize = 200;

/// Callback that flags any overlap with another callback of the same
/// component.
fn exclusive(busy: &Arc<AtomicBool>, overlaps: &Arc<AtomicUsize>) -> Overload {
    let (busy, overlaps) = (busy.clone(), overlaps.clone());
    Overload::no_args(move || {
        if busy.swap(true, Ordering::SeqCst) {
            overlaps.fetch_add(1, Ordering::SeqCst);
        }
        thread::yield_now();
        busy.store(false, Ordering::SeqCst);
        Ok(())
    })
}

#[test]
fn test_concurrent_notifications_never_overlap() {
    let dm = DependencyManager::new();
    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));

    let mut methods = MethodTable::new();
    for name in ["init", "start", "stop", "destroy", "added", "changed", "removed"] {
        methods = methods.bind(name, exclusive(&busy, &overlaps));
    }
    let c = dm
        .create_component()
        .set_implementation(Instance::new(()).with_methods(methods));

    let required = ToggleDependency::required();
    let optionals: Vec<_> = (0..THREADS).map(|_| ToggleDependency::optional()).collect();
    c.add_dependency(required.as_dyn());
    for dep in &optionals {
        c.add_dependency(dep.as_dyn());
    }
    dm.add(&c);

    let barrier = Arc::new(Barrier::new(THREADS + 1));
    let mut handles = Vec::new();
    for (i, dep) in optionals.iter().enumerate() {
        let dep = dep.clone();
        let barrier = barrier.clone();
        handles.push(thread::spawn(move || {
            barrier.wait();
            for round in 0..ROUNDS {
                if round % 3 == 2 {
                    dep.set(None);
                } else {
                    dep.set(Some(props([("thread", i), ("round", round)])));
                }
            }
            // leave every optional present
            dep.set(Some(props([("thread", i)])));
        }));
    }
    let toggler = {
        let required = required.clone();
        let barrier = barrier.clone();
        thread::spawn(move || {
            barrier.wait();
            for round in 0..ROUNDS {
                if round % 2 == 0 {
                    required.set(Some(props([("round", round)])));
                } else {
                    required.set(None);
                }
            }
            required.set(Some(props([("round", "final")])));
        })
    };
    for handle in handles {
        handle.join().unwrap();
    }
    toggler.join().unwrap();

    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(c.state(), LifecycleState::Active);
    assert!(c.errors().is_empty());
    assert!(optionals.iter().all(|d| d.is_available()));
    assert_eq!(
        required.current_value().unwrap().properties()["round"],
        "final"
    );
}

#[test]
fn test_concurrent_service_churn_settles() {
    let dm = DependencyManager::new();
    let c = dm.create_component().add(dm.service_dependency("S"));
    dm.add(&c);

    let barrier = Arc::new(Barrier::new(THREADS));
    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let directory = dm.services();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..ROUNDS / 4 {
                    let id = directory.register(
                        &["S".to_string()],
                        Arc::new(i),
                        Default::default(),
                    );
                    directory.unregister(id);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(c.state(), LifecycleState::WaitingForRequired);

    dm.services()
        .register(&["S".to_string()], Arc::new(()), Default::default());
    assert_eq!(c.state(), LifecycleState::Active);
}

#[test]
fn test_parallel_add_and_remove_of_many_components() {
    let dm = DependencyManager::new();
    let components: Vec<_> = (0..THREADS * 4)
        .map(|_| dm.create_component().set_interface("Worker", None))
        .collect();

    thread::scope(|scope| {
        for chunk in components.chunks(4) {
            let dm = &dm;
            scope.spawn(move || {
                for c in chunk {
                    dm.add(c);
                }
            });
        }
    });
    assert_eq!(dm.components().len(), THREADS * 4);
    assert_eq!(dm.services().lookup("Worker", None).len(), THREADS * 4);

    thread::scope(|scope| {
        for chunk in components.chunks(4) {
            let dm = &dm;
            scope.spawn(move || {
                for c in chunk {
                    dm.remove(c);
                    dm.remove(c);
                }
            });
        }
    });
    assert!(dm.components().is_empty());
    assert!(dm.services().lookup("Worker", None).is_empty());
    assert!(components
        .iter()
        .all(|c| c.state() == LifecycleState::Inactive));
}

#[test]
fn test_existing_configuration_reaches_component_while_store_is_busy() {
    let dm = DependencyManager::new();
    let store = dm.configurations();
    store.update("P", props([("v", 1)])).unwrap();

    // another thread is stuck delivering an update for P
    let entered = Arc::new(Barrier::new(2));
    let (release, parked) = mpsc::channel::<()>();
    let parked = Mutex::new(parked);
    let gate = entered.clone();
    let slow: ConfigurationListener = Arc::new(move |event: &ConfigurationEvent| {
        if matches!(event, ConfigurationEvent::Updated { .. }) {
            gate.wait();
            let _ = parked.lock().unwrap().recv();
        }
    });
    store.subscribe("P", slow).unwrap();
    let writer = {
        let store = store.clone();
        thread::spawn(move || store.update("P", props([("v", 2)])).unwrap())
    };
    entered.wait();

    let c = dm.create_component().add(dm.configuration_dependency("P"));
    dm.add(&c);
    assert_eq!(c.state(), LifecycleState::Active);
    assert_eq!(c.info().dependencies.len(), 1);

    release.send(()).unwrap();
    writer.join().unwrap();
    assert_eq!(c.state(), LifecycleState::Active);
    assert!(c.errors().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_wait_for_state_observes_change_from_another_thread() {
    let dm = DependencyManager::new();
    let toggle = ToggleDependency::required();
    let c = dm.create_component();
    c.add_dependency(toggle.as_dyn());
    dm.add(&c);

    let setter = toggle.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        setter.set(Some(Default::default()));
    });

    c.wait_for_state(LifecycleState::Active, Duration::from_secs(5))
        .await
        .unwrap();
    handle.join().unwrap();

    let mut rx = c.subscribe();
    assert_eq!(*rx.borrow_and_update(), LifecycleState::Active);
}
