// SPDX-License-Identifier: GPL-3.0-only

//! Device arrival and removal watching

use super::CaptureBackend;
use super::registry::DeviceRegistry;
use super::worker::{LoopAction, WorkerLoop};
use crate::constants::{HOTPLUG_POLL_INTERVAL, HOTPLUG_WORKER_NAME};
use crate::errors::{BackendError, BackendResult};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use tracing::{debug, info};

/// A device arrival or removal notification from the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceChange {
    Arrival,
    Removal,
}

/// Channel a backend sends [`DeviceChange`]s into
pub type DeviceChangeSink = mpsc::Sender<DeviceChange>;

/// Background worker that re-diffs the device list on every notification
///
/// Dropping the watcher stops the worker.
#[derive(Debug)]
pub struct HotplugWatcher {
    worker: WorkerLoop,
}

impl HotplugWatcher {
    /// Subscribe to `backend` notifications and start diffing `registry`
    pub fn start(
        backend: &Arc<dyn CaptureBackend>,
        registry: Arc<DeviceRegistry>,
    ) -> BackendResult<Self> {
        let (sink, notifications) = mpsc::channel();
        backend.watch_devices(sink)?;

        // Seed the snapshot so the first notification diffs against reality
        registry.list_devices(false);

        let worker = WorkerLoop::spawn(HOTPLUG_WORKER_NAME, move || {
            match notifications.recv_timeout(HOTPLUG_POLL_INTERVAL) {
                Ok(change) => {
                    debug!(?change, "Device change notification");
                    // Coalesce a burst of notifications into one diff
                    while notifications.try_recv().is_ok() {}
                    registry.diff_and_notify();
                    LoopAction::Continue
                }
                Err(RecvTimeoutError::Timeout) => LoopAction::Continue,
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Backend dropped its device change sink");
                    LoopAction::Stop
                }
            }
        })
        .map_err(|e| BackendError::Other(format!("failed to spawn hot-plug worker: {e}")))?;

        info!("Watching for capture device changes");
        Ok(Self { worker })
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_running()
    }

    pub fn stop(mut self) {
        self.worker.stop();
    }
}
