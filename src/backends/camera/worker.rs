// SPDX-License-Identifier: GPL-3.0-only
//! Background worker threads
//!
//! Backends deliver events and samples from their own threads. This module
//! gives those threads one lifecycle: named spawn, cooperative stop and a
//! join on drop, so that releasing the owner never leaves a thread calling
//! into a destroyed session.

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Returned by a worker iteration to keep going or finish
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    Continue,
    Stop,
}

/// A named thread running one closure repeatedly until stopped
pub struct WorkerLoop {
    handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl WorkerLoop {
    /// Spawn `name` and call `step` until it returns [`LoopAction::Stop`] or
    /// [`stop`](Self::stop) is called.
    ///
    /// `step` should return regularly (block with a timeout rather than
    /// forever) so a stop request is noticed.
    pub fn spawn<F>(name: &str, step: F) -> io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::spawn_with_signal(name, Arc::new(AtomicBool::new(false)), step)
    }

    fn spawn_with_signal<F>(name: &str, stop_signal: Arc<AtomicBool>, mut step: F) -> io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        let handle = thread::Builder::new().name(name.to_string()).spawn(move || {
            debug!(worker = %thread_name, "Worker started");
            while !thread_stop.load(Ordering::Acquire) {
                if step() == LoopAction::Stop {
                    break;
                }
            }
            debug!(worker = %thread_name, "Worker exiting");
        })?;

        Ok(Self {
            handle: Some(handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Spawn a worker that calls `tick` once per `interval`.
    ///
    /// The sleep is sliced so a stop request is honored within a few
    /// milliseconds even for long intervals.
    pub fn spawn_paced<F>(name: &str, interval: Duration, mut tick: F) -> io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let pace_stop = Arc::clone(&stop_signal);
        Self::spawn_with_signal(name, stop_signal, move || {
            let deadline = Instant::now() + interval;
            let action = tick();
            while action == LoopAction::Continue && !pace_stop.load(Ordering::Acquire) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                thread::sleep((deadline - now).min(Duration::from_millis(5)));
            }
            action
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the worker to finish after its current iteration
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::Release);
    }

    /// Request a stop and wait for the thread
    pub fn stop(&mut self) {
        self.request_stop();
        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            // Stopped from inside its own step; the loop exits on return
            return;
        }
        if handle.join().is_err() {
            warn!(worker = %self.name, "Worker thread panicked");
        }
    }
}

impl Drop for WorkerLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for WorkerLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLoop")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .finish()
    }
}
