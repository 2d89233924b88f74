//! Serialized task queue (FIFO async mutex)
//!
//! A [`TaskQueue`] owns one piece of shared state. Tasks submitted to the
//! queue get exclusive access to that state one at a time, in the order they
//! were submitted. It backs connection bookkeeping, every cache type and the
//! schema cache.
//!
//! Fairness comes from `tokio::sync::Mutex`, which hands the lock out in
//! FIFO order. The queue is not reentrant: a task holding a slot must not
//! submit to the same queue.

use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard};

/// Exclusive access to a queue's state for the duration of one task.
pub type QueueSlot<'a, S> = MutexGuard<'a, S>;

/// Named FIFO queue guarding a value of type `S`.
#[derive(Debug)]
pub struct TaskQueue<S = ()> {
    name: String,
    state: Mutex<S>,
    completed: AtomicU64,
}

impl<S> TaskQueue<S> {
    pub fn new(name: impl Into<String>, state: S) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(state),
            completed: AtomicU64::new(0),
        }
    }

    /// Queue name, used in log fields.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of tasks that have been granted a slot so far.
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Wait for this task's turn and take exclusive access to the state.
    ///
    /// The slot is held until the returned guard is dropped, so an async
    /// critical section can span any number of await points.
    pub async fn enter(&self) -> QueueSlot<'_, S> {
        let slot = self.state.lock().await;
        self.completed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(queue = %self.name, "task entered");
        slot
    }

    /// Submit a synchronous task against the state and return its result.
    pub async fn run<T>(&self, task: impl FnOnce(&mut S) -> T) -> T {
        let mut slot = self.enter().await;
        task(&mut slot)
    }
}
