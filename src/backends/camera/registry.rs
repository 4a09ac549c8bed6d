// SPDX-License-Identifier: GPL-3.0-only

//! Device enumeration cache and change detection

use super::CaptureBackend;
use super::types::{DeviceCategory, DeviceDescriptor, DeviceProfile};
use crate::dispatch::QueueHandle;
use crate::signal::Signal;
use arc_swap::ArcSwap;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Devices that appeared or disappeared between two enumerations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceChanges {
    pub added: Vec<DeviceDescriptor>,
    pub removed: Vec<DeviceDescriptor>,
}

impl DeviceChanges {
    /// Compare two snapshots by descriptor equality
    pub fn between(previous: &[DeviceDescriptor], current: &[DeviceDescriptor]) -> Self {
        Self {
            added: current
                .iter()
                .filter(|d| !previous.contains(d))
                .cloned()
                .collect(),
            removed: previous
                .iter()
                .filter(|d| !current.contains(d))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Cached list of capture devices
///
/// Readers always see a complete snapshot: refreshes build a new list and
/// swap it in.
pub struct DeviceRegistry {
    backend: Arc<dyn CaptureBackend>,
    devices: ArcSwap<Vec<DeviceDescriptor>>,
    /// Last snapshot reported through the added/removed signals. Lookup
    /// refreshes never touch it, so they cannot hide a change from the diff.
    notified: Mutex<Option<Arc<Vec<DeviceDescriptor>>>>,
    /// Serializes refreshes so two diffs never compare against the same snapshot
    refresh_lock: Mutex<()>,
    queue: QueueHandle,
    device_added: Arc<Signal<DeviceDescriptor>>,
    device_removed: Arc<Signal<DeviceDescriptor>>,
}

impl DeviceRegistry {
    pub fn new(backend: Arc<dyn CaptureBackend>, queue: QueueHandle) -> Self {
        Self {
            backend,
            devices: ArcSwap::from_pointee(Vec::new()),
            notified: Mutex::new(None),
            refresh_lock: Mutex::new(()),
            queue,
            device_added: Arc::new(Signal::new()),
            device_removed: Arc::new(Signal::new()),
        }
    }

    /// Raised on the main queue for each device that appeared
    pub fn on_device_added(&self) -> &Signal<DeviceDescriptor> {
        &self.device_added
    }

    /// Raised on the main queue for each device that disappeared
    pub fn on_device_removed(&self) -> &Signal<DeviceDescriptor> {
        &self.device_removed
    }

    /// The cached device list, enumerating first if it is empty or `refresh`
    /// is set.
    ///
    /// A failed enumeration is logged and leaves the cache untouched.
    pub fn list_devices(&self, refresh: bool) -> Vec<DeviceDescriptor> {
        let cached = self.devices.load_full();
        if !refresh && !cached.is_empty() {
            return cached.as_ref().clone();
        }

        let _guard = self.refresh_lock.lock();
        self.refresh()
            .unwrap_or_else(|| self.devices.load_full())
            .as_ref()
            .clone()
    }

    /// Snapshot without enumerating
    pub fn cached_devices(&self) -> Arc<Vec<DeviceDescriptor>> {
        self.devices.load_full()
    }

    /// Enumerate into the lookup cache. The first successful enumeration
    /// also becomes the baseline for change detection.
    ///
    /// Caller holds `refresh_lock`. Returns `None` if enumeration failed.
    fn refresh(&self) -> Option<Arc<Vec<DeviceDescriptor>>> {
        match self.backend.enumerate_devices(DeviceCategory::VideoCapture) {
            Ok(devices) => {
                debug!(count = devices.len(), "Enumerated capture devices");
                let devices = Arc::new(devices);
                self.devices.store(Arc::clone(&devices));
                let mut notified = self.notified.lock();
                if notified.is_none() {
                    *notified = Some(Arc::clone(&devices));
                }
                Some(devices)
            }
            Err(e) => {
                warn!(error = %e, "Device enumeration failed");
                None
            }
        }
    }

    /// Look a device up by id, refreshing once if the cache misses
    pub fn find(&self, id: &str) -> Option<DeviceDescriptor> {
        let lookup = |devices: &[DeviceDescriptor]| devices.iter().find(|d| d.id == id).cloned();

        if let Some(found) = lookup(&self.devices.load()) {
            return Some(found);
        }
        lookup(&self.list_devices(true))
    }

    /// Supported profiles of `device`, empty if it is not present or the
    /// query fails
    pub fn list_profiles(&self, device: &DeviceDescriptor) -> Vec<DeviceProfile> {
        if self.find(&device.id).is_none() {
            debug!(device = %device, "Profiles requested for unknown device");
            return Vec::new();
        }
        match self.backend.enumerate_profiles(device) {
            Ok(profiles) => profiles,
            Err(e) => {
                warn!(device = %device, error = %e, "Profile enumeration failed");
                Vec::new()
            }
        }
    }

    /// Re-enumerate, compare with the last notified snapshot and post
    /// `DeviceRemoved`/`DeviceAdded` notifications to the main queue.
    ///
    /// Safe to call from any thread. Returns the differences found; a failed
    /// enumeration reports none and keeps the baseline.
    pub fn diff_and_notify(&self) -> DeviceChanges {
        let _guard = self.refresh_lock.lock();
        let previous = self.notified.lock().clone().unwrap_or_default();
        let Some(current) = self.refresh() else {
            return DeviceChanges::default();
        };
        *self.notified.lock() = Some(Arc::clone(&current));
        let changes = DeviceChanges::between(&previous, &current);

        for device in &changes.removed {
            info!(device = %device, "Capture device removed");
            let signal = Arc::clone(&self.device_removed);
            let device = device.clone();
            self.queue.dispatch(move || signal.emit(&device));
        }
        for device in &changes.added {
            info!(device = %device, "Capture device added");
            let signal = Arc::clone(&self.device_added);
            let device = device.clone();
            self.queue.dispatch(move || signal.emit(&device));
        }

        changes
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("devices", &self.devices.load_full())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(name: &str) -> DeviceDescriptor {
        DeviceDescriptor::new(name, format!("id-{name}"))
    }

    #[test]
    fn test_changes_between_snapshots() {
        let changes = DeviceChanges::between(&[d("A"), d("B")], &[d("B"), d("C")]);
        assert_eq!(changes.added, vec![d("C")]);
        assert_eq!(changes.removed, vec![d("A")]);
    }

    #[test]
    fn test_no_changes() {
        let changes = DeviceChanges::between(&[d("A")], &[d("A")]);
        assert!(changes.is_empty());
    }

    #[test]
    fn test_same_name_different_id_is_a_change() {
        let old = DeviceDescriptor::new("Cam", "1");
        let new = DeviceDescriptor::new("Cam", "2");
        let changes = DeviceChanges::between(&[old.clone()], &[new.clone()]);
        assert_eq!(changes.added, vec![new]);
        assert_eq!(changes.removed, vec![old]);
    }
}
