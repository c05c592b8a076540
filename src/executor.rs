//! Serial task executor without a thread of its own.
//!
//! Any thread may enqueue. The first thread to enqueue into an idle executor
//! becomes the runner and drains the queue; threads arriving while a runner
//! is active only enqueue and return. Tasks therefore run one at a time, in
//! arrival order, on whichever thread happened to deliver the first of them.
//! A task enqueued by the runner itself (re-entrantly) is picked up by the
//! same drain loop instead of recursing.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

struct Queue<T> {
    tasks: VecDeque<T>,
    running: bool,
}

pub struct SerialExecutor<T> {
    queue: Mutex<Queue<T>>,
}

impl<T> SerialExecutor<T> {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                tasks: VecDeque::new(),
                running: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Queue<T>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Queue `task`. Returns `true` if the caller became the runner and must
    /// call [`SerialExecutor::drain`].
    pub fn enqueue(&self, task: T) -> bool {
        let mut queue = self.lock();
        queue.tasks.push_back(task);
        if queue.running {
            false
        } else {
            queue.running = true;
            true
        }
    }

    /// Pop the next task, or give up the runner role if the queue is empty.
    fn next(&self) -> Option<T> {
        let mut queue = self.lock();
        match queue.tasks.pop_front() {
            Some(task) => Some(task),
            None => {
                queue.running = false;
                None
            }
        }
    }

    /// Run `f` on every queued task until the queue is empty, then release
    /// the runner role. If `f` unwinds, the role is released as well so the
    /// next enqueue can take over.
    pub fn drain(&self, mut f: impl FnMut(T)) {
        let guard = ReleaseOnUnwind(self);
        while let Some(task) = guard.0.next() {
            f(task);
        }
        std::mem::forget(guard);
    }

    pub fn pending(&self) -> usize {
        self.lock().tasks.len()
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }
}

impl<T> Default for SerialExecutor<T> {
    fn default() -> Self {
        Self::new()
    }
}

struct ReleaseOnUnwind<'a, T>(&'a SerialExecutor<T>);

impl<T> Drop for ReleaseOnUnwind<'_, T> {
    fn drop(&mut self) {
        self.0.lock().running = false;
    }
}
