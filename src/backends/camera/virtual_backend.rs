// SPDX-License-Identifier: GPL-3.0-only

//! In-process capture backend
//!
//! Devices, profiles and properties are plain data configured by the caller.
//! Every engine the backend creates is also reachable through an
//! [`EngineProbe`], which scripts what a platform engine would do on its own
//! threads: report initialization, deliver samples, fail, or lose the device.
//!
//! ```
//! use camera_session::backends::camera::virtual_backend::VirtualBackend;
//! use camera_session::backends::camera::{CaptureBackend, DeviceCategory};
//!
//! let backend = VirtualBackend::new();
//! let device = backend.add_device("Desk Camera");
//! let devices = backend.enumerate_devices(DeviceCategory::VideoCapture).unwrap();
//! assert_eq!(devices, vec![device]);
//! ```

use super::hotplug::{DeviceChange, DeviceChangeSink};
use super::types::{
    DeviceCategory, DeviceDescriptor, DeviceProfile, EngineConfig, EngineEvent, FrameSize,
    Framerate, OcclusionState, PropertyKey, PropertyRange, StreamConfig,
};
use super::worker::{LoopAction, WorkerLoop};
use super::{CaptureBackend, CaptureEngine, CaptureSample, DeviceHandle, EngineCallbacks};
use crate::constants::status;
use crate::errors::{BackendError, BackendResult};
use crate::gpu::NativeTextureHandle;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

/// A simulated device property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualProperty {
    pub range: PropertyRange,
    pub default: i32,
    pub value: i32,
    /// Clamp and round writes into the range, as most hardware does
    pub clamp: bool,
}

impl VirtualProperty {
    pub fn new(range: PropertyRange, default: i32) -> Self {
        Self {
            range,
            default,
            value: default,
            clamp: false,
        }
    }

    pub fn clamped(mut self) -> Self {
        self.clamp = true;
        self
    }

    fn write(&mut self, value: i32) {
        self.value = if self.clamp {
            let clamped = value.clamp(self.range.min, self.range.max);
            let step = self.range.step.max(1);
            self.range.min + (clamped - self.range.min) / step * step
        } else {
            value
        };
    }
}

type PropertyMap = Arc<Mutex<HashMap<PropertyKey, VirtualProperty>>>;

struct VirtualDevice {
    descriptor: DeviceDescriptor,
    profiles: Vec<DeviceProfile>,
    properties: PropertyMap,
}

struct BackendState {
    devices: Vec<VirtualDevice>,
    engines: Vec<EngineProbe>,
    watchers: Vec<DeviceChangeSink>,
    fail_enumeration: bool,
    fail_engine_creation: Option<i32>,
    occlusion_sensor: bool,
    initialize_on_create: bool,
}

/// Virtual implementation of [`CaptureBackend`]
pub struct VirtualBackend {
    state: Mutex<BackendState>,
}

impl VirtualBackend {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(BackendState {
                devices: Vec::new(),
                engines: Vec::new(),
                watchers: Vec::new(),
                fail_enumeration: false,
                fail_engine_creation: None,
                occlusion_sensor: false,
                initialize_on_create: false,
            }),
        }
    }

    /// Profiles given to devices added with [`add_device`](Self::add_device)
    pub fn default_profiles() -> Vec<DeviceProfile> {
        [(640, 480), (1280, 720), (1920, 1080)]
            .into_iter()
            .map(|(w, h)| DeviceProfile::new(FrameSize::new(w, h), Framerate::from_int(30)))
            .collect()
    }

    /// Plug in a device with a generated id and the default profiles
    pub fn add_device(&self, name: &str) -> DeviceDescriptor {
        let descriptor = DeviceDescriptor::new(name, format!("virtual://{}", Uuid::new_v4()));
        self.add_device_with(descriptor, Self::default_profiles())
    }

    /// Plug in a device with an explicit descriptor and profiles
    pub fn add_device_with(
        &self,
        descriptor: DeviceDescriptor,
        profiles: Vec<DeviceProfile>,
    ) -> DeviceDescriptor {
        let mut state = self.state.lock();
        info!(device = %descriptor, "Virtual device plugged in");
        state.devices.push(VirtualDevice {
            descriptor: descriptor.clone(),
            profiles,
            properties: Arc::new(Mutex::new(HashMap::new())),
        });
        Self::notify(&mut state, DeviceChange::Arrival);
        descriptor
    }

    /// Unplug a device. Open handles keep working on their own copy.
    pub fn remove_device(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        let before = state.devices.len();
        state.devices.retain(|d| d.descriptor.id != id);
        let removed = state.devices.len() != before;
        if removed {
            info!(device_id = id, "Virtual device unplugged");
            Self::notify(&mut state, DeviceChange::Removal);
        }
        removed
    }

    fn notify(state: &mut BackendState, change: DeviceChange) {
        state.watchers.retain(|sink| sink.send(change).is_ok());
    }

    /// Define or replace a property on a device
    pub fn set_property(&self, id: &str, key: PropertyKey, property: VirtualProperty) -> bool {
        let state = self.state.lock();
        let Some(device) = state.devices.iter().find(|d| d.descriptor.id == id) else {
            return false;
        };
        device.properties.lock().insert(key, property);
        true
    }

    pub fn property(&self, id: &str, key: PropertyKey) -> Option<VirtualProperty> {
        let state = self.state.lock();
        let device = state.devices.iter().find(|d| d.descriptor.id == id)?;
        let value = device.properties.lock().get(&key).copied();
        value
    }

    /// Change a property as another application would, without notifying
    pub fn change_property_externally(&self, id: &str, key: PropertyKey, value: i32) -> bool {
        let state = self.state.lock();
        let Some(device) = state.devices.iter().find(|d| d.descriptor.id == id) else {
            return false;
        };
        let mut properties = device.properties.lock();
        match properties.get_mut(&key) {
            Some(property) => {
                property.write(value);
                true
            }
            None => false,
        }
    }

    pub fn fail_enumeration(&self, fail: bool) {
        self.state.lock().fail_enumeration = fail;
    }

    /// Make engine creation fail with `status`, or succeed again with `None`
    pub fn fail_engine_creation(&self, status: Option<i32>) {
        self.state.lock().fail_engine_creation = status;
    }

    /// Whether new engines can monitor a camera cover
    pub fn set_occlusion_sensor(&self, present: bool) {
        self.state.lock().occlusion_sensor = present;
    }

    /// Report [`EngineEvent::Initialized`] from inside `create_engine`,
    /// before the caller has the engine
    pub fn set_initialize_on_create(&self, enabled: bool) {
        self.state.lock().initialize_on_create = enabled;
    }

    /// Probes for every engine created so far, oldest first
    pub fn engines(&self) -> Vec<EngineProbe> {
        self.state.lock().engines.clone()
    }

    pub fn last_engine(&self) -> Option<EngineProbe> {
        self.state.lock().engines.last().cloned()
    }
}

impl Default for VirtualBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureBackend for VirtualBackend {
    fn enumerate_devices(&self, _category: DeviceCategory) -> BackendResult<Vec<DeviceDescriptor>> {
        let state = self.state.lock();
        if state.fail_enumeration {
            return Err(BackendError::status("enumerate devices", status::FAIL));
        }
        Ok(state.devices.iter().map(|d| d.descriptor.clone()).collect())
    }

    fn enumerate_profiles(&self, device: &DeviceDescriptor) -> BackendResult<Vec<DeviceProfile>> {
        let state = self.state.lock();
        state
            .devices
            .iter()
            .find(|d| d.descriptor.id == device.id)
            .map(|d| d.profiles.clone())
            .ok_or_else(|| BackendError::DeviceNotFound(device.id.clone()))
    }

    fn open_device(&self, id: &str) -> BackendResult<Arc<dyn DeviceHandle>> {
        let state = self.state.lock();
        let device = state
            .devices
            .iter()
            .find(|d| d.descriptor.id == id)
            .ok_or_else(|| BackendError::DeviceNotFound(id.to_string()))?;
        debug!(device = %device.descriptor, "Opening virtual device");
        Ok(Arc::new(VirtualDeviceHandle {
            descriptor: device.descriptor.clone(),
            properties: Arc::clone(&device.properties),
        }))
    }

    fn create_engine(
        &self,
        callbacks: Arc<dyn EngineCallbacks>,
        config: &EngineConfig,
        device: &Arc<dyn DeviceHandle>,
    ) -> BackendResult<Box<dyn CaptureEngine>> {
        let (probe, initialize) = {
            let mut state = self.state.lock();
            if let Some(code) = state.fail_engine_creation {
                return Err(BackendError::status("create capture engine", code));
            }
            let shared = Arc::new(EngineShared {
                device: device.descriptor().clone(),
                config: *config,
                callbacks,
                occlusion_sensor: state.occlusion_sensor,
                stream: Mutex::new(None),
                previewing: AtomicBool::new(false),
                released: AtomicBool::new(false),
                monitoring_occlusion: AtomicBool::new(false),
                fail_configure: AtomicBool::new(false),
                fail_start: Mutex::new(None),
                start_calls: AtomicUsize::new(0),
                stop_calls: AtomicUsize::new(0),
                samples: AtomicU64::new(0),
                streamer: Mutex::new(None),
            });
            let probe = EngineProbe { shared };
            state.engines.push(probe.clone());
            (probe, state.initialize_on_create)
        };

        debug!(device = %probe.shared.device, ?config, "Virtual capture engine created");
        if initialize {
            probe.initialize();
        }
        Ok(Box::new(VirtualEngine {
            shared: Arc::clone(&probe.shared),
        }))
    }

    fn watch_devices(&self, sink: DeviceChangeSink) -> BackendResult<()> {
        self.state.lock().watchers.push(sink);
        Ok(())
    }
}

struct VirtualDeviceHandle {
    descriptor: DeviceDescriptor,
    properties: PropertyMap,
}

impl VirtualDeviceHandle {
    fn unsupported(key: PropertyKey) -> BackendError {
        BackendError::Property {
            set: key.set,
            id: key.id,
            reason: "not supported by device".into(),
        }
    }

    fn with_property<T>(
        &self,
        key: PropertyKey,
        f: impl FnOnce(&mut VirtualProperty) -> T,
    ) -> BackendResult<T> {
        let mut properties = self.properties.lock();
        let property = properties
            .get_mut(&key)
            .ok_or_else(|| Self::unsupported(key))?;
        Ok(f(property))
    }
}

impl DeviceHandle for VirtualDeviceHandle {
    fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    fn property_range(&self, key: PropertyKey) -> BackendResult<PropertyRange> {
        self.with_property(key, |p| p.range)
    }

    fn property_default(&self, key: PropertyKey) -> BackendResult<i32> {
        self.with_property(key, |p| p.default)
    }

    fn get_property(&self, key: PropertyKey) -> BackendResult<i32> {
        self.with_property(key, |p| p.value)
    }

    fn set_property(&self, key: PropertyKey, value: i32) -> BackendResult<()> {
        self.with_property(key, |p| p.write(value))
    }
}

struct EngineShared {
    device: DeviceDescriptor,
    config: EngineConfig,
    callbacks: Arc<dyn EngineCallbacks>,
    occlusion_sensor: bool,
    stream: Mutex<Option<StreamConfig>>,
    previewing: AtomicBool,
    released: AtomicBool,
    monitoring_occlusion: AtomicBool,
    fail_configure: AtomicBool,
    fail_start: Mutex<Option<i32>>,
    start_calls: AtomicUsize,
    stop_calls: AtomicUsize,
    samples: AtomicU64,
    streamer: Mutex<Option<WorkerLoop>>,
}

impl EngineShared {
    fn is_live(&self) -> bool {
        !self.released.load(Ordering::Acquire)
    }

    fn can_deliver(&self) -> bool {
        self.is_live() && self.previewing.load(Ordering::Acquire) && self.stream.lock().is_some()
    }

    fn deliver(&self, sample: &VirtualSample<'_>) -> bool {
        if !self.can_deliver() {
            return false;
        }
        self.samples.fetch_add(1, Ordering::Relaxed);
        self.callbacks.on_sample(sample);
        true
    }
}

/// Engine handed to the session; dropping it releases the engine
struct VirtualEngine {
    shared: Arc<EngineShared>,
}

impl CaptureEngine for VirtualEngine {
    fn configure_preview(&self, stream: &StreamConfig) -> BackendResult<()> {
        if self.shared.fail_configure.load(Ordering::Acquire) {
            return Err(BackendError::status("get preview sink", status::FAIL));
        }
        debug!(size = %stream.size, fps = %stream.framerate, "Virtual preview configured");
        *self.shared.stream.lock() = Some(*stream);
        Ok(())
    }

    fn start_preview(&self) -> BackendResult<()> {
        self.shared.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(code) = *self.shared.fail_start.lock() {
            return Err(BackendError::status("start preview", code));
        }
        self.shared.previewing.store(true, Ordering::Release);
        self.shared.callbacks.on_event(EngineEvent::PreviewStarted);
        Ok(())
    }

    fn stop_preview(&self) -> BackendResult<()> {
        self.shared.stop_calls.fetch_add(1, Ordering::SeqCst);
        self.shared.previewing.store(false, Ordering::Release);
        self.shared.callbacks.on_event(EngineEvent::PreviewStopped);
        Ok(())
    }

    fn monitor_occlusion(&self) -> BackendResult<()> {
        if !self.shared.occlusion_sensor {
            return Err(BackendError::NotAvailable("occlusion sensor".into()));
        }
        self.shared.monitoring_occlusion.store(true, Ordering::Release);
        Ok(())
    }
}

impl Drop for VirtualEngine {
    fn drop(&mut self) {
        self.shared.released.store(true, Ordering::Release);
        self.shared.previewing.store(false, Ordering::Release);
        let streamer = self.shared.streamer.lock().take();
        drop(streamer);
        debug!(device = %self.shared.device, "Virtual capture engine released");
    }
}

struct VirtualSample<'a> {
    bytes: Option<&'a [u8]>,
    texture: Option<NativeTextureHandle>,
}

impl CaptureSample for VirtualSample<'_> {
    fn gpu_texture(&self) -> Option<NativeTextureHandle> {
        self.texture
    }

    fn contiguous_bytes(&self) -> BackendResult<&[u8]> {
        self.bytes
            .ok_or_else(|| BackendError::Other("sample has no contiguous buffer".into()))
    }
}

/// Test handle onto one virtual engine
///
/// Calls made through the probe run on the calling thread, which stands in
/// for the platform's engine thread. They do nothing once the engine was
/// released by its session.
#[derive(Clone)]
pub struct EngineProbe {
    shared: Arc<EngineShared>,
}

impl EngineProbe {
    pub fn device(&self) -> &DeviceDescriptor {
        &self.shared.device
    }

    pub fn config(&self) -> EngineConfig {
        self.shared.config
    }

    /// Stream configuration applied by the session, once initialized
    pub fn stream_config(&self) -> Option<StreamConfig> {
        *self.shared.stream.lock()
    }

    pub fn is_previewing(&self) -> bool {
        self.shared.previewing.load(Ordering::Acquire)
    }

    pub fn is_released(&self) -> bool {
        !self.shared.is_live()
    }

    pub fn is_monitoring_occlusion(&self) -> bool {
        self.shared.monitoring_occlusion.load(Ordering::Acquire)
    }

    pub fn start_calls(&self) -> usize {
        self.shared.start_calls.load(Ordering::SeqCst)
    }

    pub fn stop_calls(&self) -> usize {
        self.shared.stop_calls.load(Ordering::SeqCst)
    }

    /// Samples handed to the session so far
    pub fn samples_delivered(&self) -> u64 {
        self.shared.samples.load(Ordering::Relaxed)
    }

    pub fn fail_configure(&self, fail: bool) {
        self.shared.fail_configure.store(fail, Ordering::Release);
    }

    pub fn fail_start(&self, status: Option<i32>) {
        *self.shared.fail_start.lock() = status;
    }

    /// Deliver an arbitrary engine event
    pub fn send_event(&self, event: EngineEvent) -> bool {
        if !self.shared.is_live() {
            return false;
        }
        self.shared.callbacks.on_event(event);
        true
    }

    /// Report that the engine finished initializing
    pub fn initialize(&self) -> bool {
        self.send_event(EngineEvent::Initialized)
    }

    pub fn report_error(&self, status: i32) -> bool {
        self.send_event(EngineEvent::Error { status })
    }

    /// Simulate the device being unplugged or claimed elsewhere
    pub fn invalidate_device(&self) -> bool {
        self.shared.previewing.store(false, Ordering::Release);
        self.report_error(status::DEVICE_INVALIDATED)
    }

    /// Report a cover change; only reaches the session while it monitors
    pub fn set_occlusion(&self, occlusion: OcclusionState) -> bool {
        if !self.is_monitoring_occlusion() {
            return false;
        }
        self.send_event(EngineEvent::Occlusion(occlusion))
    }

    pub fn notify_control_changed(&self, key: PropertyKey) -> bool {
        if !self.shared.is_live() {
            return false;
        }
        self.shared.callbacks.on_control_changed(key);
        true
    }

    pub fn report_control_error(&self, status: i32) -> bool {
        if !self.shared.is_live() {
            return false;
        }
        self.shared.callbacks.on_control_error(status);
        true
    }

    /// Deliver a CPU frame. Returns false unless the engine is previewing.
    pub fn deliver_frame(&self, bytes: &[u8]) -> bool {
        self.shared.deliver(&VirtualSample {
            bytes: Some(bytes),
            texture: None,
        })
    }

    /// Deliver a frame decoded into `texture` on the GPU
    pub fn deliver_gpu_frame(&self, texture: NativeTextureHandle) -> bool {
        self.shared.deliver(&VirtualSample {
            bytes: None,
            texture: Some(texture),
        })
    }

    /// Deliver a sample that carries neither a GPU texture nor a buffer
    pub fn deliver_empty_sample(&self) -> bool {
        self.shared.deliver(&VirtualSample {
            bytes: None,
            texture: None,
        })
    }

    /// Deliver `frame(n)` every `interval` from a background thread while
    /// previewing, until stopped or the engine is released.
    pub fn start_streaming<F>(&self, interval: Duration, mut frame: F) -> BackendResult<()>
    where
        F: FnMut(u64) -> Vec<u8> + Send + 'static,
    {
        let shared: Weak<EngineShared> = Arc::downgrade(&self.shared);
        let mut sequence = 0u64;
        let worker = WorkerLoop::spawn_paced("virtual-capture", interval, move || {
            let Some(shared) = shared.upgrade() else {
                return LoopAction::Stop;
            };
            if !shared.is_live() {
                return LoopAction::Stop;
            }
            if shared.can_deliver() {
                let bytes = frame(sequence);
                sequence += 1;
                shared.deliver(&VirtualSample {
                    bytes: Some(&bytes),
                    texture: None,
                });
            }
            LoopAction::Continue
        })
        .map_err(|e| BackendError::Other(format!("failed to spawn streaming worker: {e}")))?;

        let previous = self.shared.streamer.lock().replace(worker);
        drop(previous);
        Ok(())
    }

    pub fn stop_streaming(&self) {
        let streamer = self.shared.streamer.lock().take();
        drop(streamer);
    }
}

impl std::fmt::Debug for EngineProbe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineProbe")
            .field("device", &self.shared.device)
            .field("previewing", &self.is_previewing())
            .field("released", &self.is_released())
            .finish()
    }
}
