// SPDX-License-Identifier: GPL-3.0-only

//! Cooperative main queue
//!
//! Backend threads never touch consumer-visible state directly. They post
//! closures here, and the consumer drains them on its own control thread,
//! either once per frame with [`MainQueue::run_pending`] or from an async task
//! with [`MainQueue::next_cycle`].
//!
//! Each drain runs only the tasks that were queued when it started. Tasks
//! posted while draining (for example a handler that schedules the
//! destruction of its own capture) run on the following cycle.

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};
use tracing::trace;

/// A unit of deferred work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Cloneable sending side of the main queue
#[derive(Clone)]
pub struct QueueHandle {
    sender: UnboundedSender<Task>,
}

impl QueueHandle {
    /// Post a task. Returns false if the queue no longer exists.
    pub fn dispatch<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(task)).is_ok()
    }
}

impl std::fmt::Debug for QueueHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueHandle")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

/// Single-consumer task queue drained on the consumer's control thread
pub struct MainQueue {
    sender: UnboundedSender<Task>,
    receiver: tokio::sync::Mutex<UnboundedReceiver<Task>>,
}

impl MainQueue {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded_channel();
        Self {
            sender,
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    pub fn handle(&self) -> QueueHandle {
        QueueHandle {
            sender: self.sender.clone(),
        }
    }

    pub fn dispatch<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.sender.send(Box::new(task)).is_ok()
    }

    /// Run the tasks queued so far without waiting.
    ///
    /// Returns the number of tasks executed. Returns 0 if another drain is in
    /// progress (a task calling `run_pending` re-entrantly, or a concurrent
    /// [`next_cycle`](Self::next_cycle)).
    pub fn run_pending(&self) -> usize {
        let Ok(mut receiver) = self.receiver.try_lock() else {
            return 0;
        };
        let mut batch = Vec::new();
        while let Ok(task) = receiver.try_recv() {
            batch.push(task);
        }
        drop(receiver);

        Self::run_batch(batch)
    }

    /// Wait until at least one task is queued, then run every queued task.
    pub async fn next_cycle(&self) -> usize {
        let mut receiver = self.receiver.lock().await;
        let Some(first) = receiver.recv().await else {
            return 0;
        };
        let mut batch = vec![first];
        while let Ok(task) = receiver.try_recv() {
            batch.push(task);
        }
        drop(receiver);

        Self::run_batch(batch)
    }

    fn run_batch(batch: Vec<Task>) -> usize {
        let count = batch.len();
        if count > 0 {
            trace!(count, "Running queued tasks");
        }
        for task in batch {
            task();
        }
        count
    }
}

impl Default for MainQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MainQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainQueue").finish_non_exhaustive()
    }
}
