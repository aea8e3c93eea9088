//! # Task Queue
//!
//! A bounded FIFO handing tiles (or any other unit of work) from a
//! producer to a pool of consumer threads. One mutex, two condition
//! variables: `not_empty` wakes consumers, `not_full` wakes producers and
//! completion waiters.
//!
//! Semantics:
//!
//! - `submit` blocks while the queue is full; `try_submit` returns false
//!   instead.
//! - `fill` drains a supplier into free slots until the queue fills or the
//!   supplier runs dry, waking all consumers once — cheaper than N
//!   individual submits when several workers are idle.
//! - `process` consumes until `shutdown()` has been called *and* the queue
//!   is empty, so no accepted task is ever dropped.
//! - `await_completion` blocks until the queue is empty.
//! - `minimum_remaining_capacity` is a lower-bound snapshot: with no
//!   concurrent producers the true capacity can only be higher. It takes
//!   the lock; the value is otherwise torn on platforms where the fields
//!   are not atomic.

use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};

struct Inner<T> {
    queue: VecDeque<T>,
    running: bool,
}

pub struct TaskQueue<T> {
    inner: Mutex<Inner<T>>,
    capacity: usize,
    not_empty: Condvar,
    not_full: Condvar,
}

/// Consumer context: `process` calls this for every task taken.
pub trait TaskContext<T> {
    fn process_task(&self, task: T);
}

impl<T> TaskQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "task queue capacity must be positive");
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::with_capacity(capacity),
                running: true,
            }),
            capacity,
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues a task, blocking while the queue is full.
    pub fn submit(&self, task: T) {
        let mut inner = self.inner.lock();
        while inner.queue.len() == self.capacity {
            self.not_full.wait(&mut inner);
        }
        inner.queue.push_back(task);
        self.not_empty.notify_one();
    }

    /// Non-blocking enqueue; false when the queue is full.
    pub fn try_submit(&self, task: T) -> bool {
        let mut inner = self.inner.lock();
        if inner.queue.len() == self.capacity {
            return false;
        }
        inner.queue.push_back(task);
        self.not_empty.notify_one();
        true
    }

    /// Drains `supplier` into free slots until the queue is full or the
    /// supplier returns `None`. Returns true when the queue filled up
    /// (more tasks may remain in the supplier).
    pub fn fill(&self, mut supplier: impl FnMut() -> Option<T>) -> bool {
        let mut inner = self.inner.lock();
        let mut added = 0;
        while inner.queue.len() < self.capacity {
            match supplier() {
                Some(task) => {
                    inner.queue.push_back(task);
                    added += 1;
                }
                None => break,
            }
        }
        let full = inner.queue.len() == self.capacity;
        drop(inner);
        if added > 0 {
            self.not_empty.notify_all();
        }
        full
    }

    /// Lower bound on free slots at the time of the call.
    pub fn minimum_remaining_capacity(&self) -> usize {
        let inner = self.inner.lock();
        self.capacity - inner.queue.len()
    }

    /// Consumes tasks until shutdown *and* drained. Multiple threads may
    /// run `process` against the same queue.
    pub fn process<C: TaskContext<T>>(&self, ctx: &C) {
        loop {
            let task = {
                let mut inner = self.inner.lock();
                loop {
                    if let Some(task) = inner.queue.pop_front() {
                        self.not_full.notify_all();
                        break task;
                    }
                    if !inner.running {
                        return;
                    }
                    self.not_empty.wait(&mut inner);
                }
            };
            ctx.process_task(task);
        }
    }

    /// Blocks until the queue is empty. Tasks already handed to consumers
    /// may still be in flight.
    pub fn await_completion(&self) {
        let mut inner = self.inner.lock();
        while !inner.queue.is_empty() {
            self.not_full.wait(&mut inner);
        }
    }

    /// Stops consumers once the queue drains and wakes everyone waiting.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock();
        inner.running = false;
        drop(inner);
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }
}
