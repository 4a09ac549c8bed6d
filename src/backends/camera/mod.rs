// SPDX-License-Identifier: GPL-3.0-only

//! Capture backend abstraction
//!
//! The session layer talks to the platform capture stack only through the
//! traits in this module, so the same session logic runs against a real
//! platform backend or the in-process [`virtual_backend`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  Capture (facade)   │  ← Consumer thread: frames, controls, signals
//! └──────────┬──────────┘
//!            │
//!            ▼
//! ┌─────────────────────┐
//! │   CaptureSession    │  ← State machine, double buffers
//! └──────────┬──────────┘
//!            │ EngineCallbacks (backend threads)
//!            ▼
//! ┌─────────────────────┐
//! │ CaptureBackend Trait│  ← Devices, properties, engines
//! └──────────┬──────────┘
//!            │
//!       ┌────┴─────┐
//!       │ Platform │ Virtual
//!       └──────────┘
//! ```

pub mod controls;
pub mod hotplug;
pub mod registry;
pub mod types;
pub mod virtual_backend;
pub mod worker;

pub use controls::{Control, ControlKind};
pub use hotplug::{DeviceChange, DeviceChangeSink, HotplugWatcher};
pub use registry::{DeviceChanges, DeviceRegistry};
pub use types::*;

use crate::errors::{BackendError, BackendResult};
use crate::gpu::NativeTextureHandle;
use std::sync::Arc;

/// Platform capture stack
///
/// Implementations must be callable from any thread.
pub trait CaptureBackend: Send + Sync {
    // ===== Enumeration =====

    /// List devices of `category` in the platform's enumeration order
    fn enumerate_devices(&self, category: DeviceCategory) -> BackendResult<Vec<DeviceDescriptor>>;

    /// List the (resolution, frame rate) pairs a device offers
    fn enumerate_profiles(&self, device: &DeviceDescriptor) -> BackendResult<Vec<DeviceProfile>>;

    // ===== Sessions =====

    /// Open the device with identifier `id`
    fn open_device(&self, id: &str) -> BackendResult<Arc<dyn DeviceHandle>>;

    /// Create a capture engine for an opened device.
    ///
    /// The engine reports progress through `callbacks`, usually from its own
    /// threads, starting with [`EngineEvent::Initialized`]. It may do so
    /// before this call returns.
    fn create_engine(
        &self,
        callbacks: Arc<dyn EngineCallbacks>,
        config: &EngineConfig,
        device: &Arc<dyn DeviceHandle>,
    ) -> BackendResult<Box<dyn CaptureEngine>>;

    // ===== Hot-plug =====

    /// Send a [`DeviceChange`] to `sink` whenever a device arrives or leaves.
    ///
    /// Backends without arrival notifications keep the default.
    fn watch_devices(&self, sink: DeviceChangeSink) -> BackendResult<()> {
        drop(sink);
        Err(BackendError::NotAvailable(
            "device arrival notifications".into(),
        ))
    }
}

/// An opened capture device
pub trait DeviceHandle: Send + Sync {
    fn descriptor(&self) -> &DeviceDescriptor;

    /// "Basic support" query: bounds and stepping of a property.
    /// An error means the device does not support it.
    fn property_range(&self, key: PropertyKey) -> BackendResult<PropertyRange>;

    fn property_default(&self, key: PropertyKey) -> BackendResult<i32>;

    fn get_property(&self, key: PropertyKey) -> BackendResult<i32>;

    /// Write a property. The device may clamp or round the value.
    fn set_property(&self, key: PropertyKey, value: i32) -> BackendResult<()>;
}

/// A running capture engine bound to one device
///
/// Dropping the engine releases it. Implementations stop delivering
/// callbacks before their drop returns.
pub trait CaptureEngine: Send + Sync {
    /// Set the preview stream's media type and register the engine's
    /// callbacks as the sample sink. Samples are only delivered afterwards.
    fn configure_preview(&self, stream: &StreamConfig) -> BackendResult<()>;

    /// Begin streaming. Completion is confirmed by [`EngineEvent::PreviewStarted`].
    fn start_preview(&self) -> BackendResult<()>;

    /// Stop streaming. Completion is confirmed by [`EngineEvent::PreviewStopped`].
    fn stop_preview(&self) -> BackendResult<()>;

    /// Begin reporting [`EngineEvent::Occlusion`] changes.
    ///
    /// Cameras without a cover sensor keep the default.
    fn monitor_occlusion(&self) -> BackendResult<()> {
        Err(BackendError::NotAvailable("occlusion sensor".into()))
    }
}

/// Receiver of engine notifications, invoked on backend threads
pub trait EngineCallbacks: Send + Sync {
    fn on_event(&self, event: EngineEvent);

    /// One decoded preview frame. The sample is only valid during the call.
    fn on_sample(&self, sample: &dyn CaptureSample);

    /// A device property changed outside this process
    fn on_control_changed(&self, key: PropertyKey);

    /// The backend's property-change channel itself failed
    fn on_control_error(&self, status: i32);
}

/// A decoded frame as delivered by the engine
pub trait CaptureSample {
    /// GPU texture holding the frame (hardware engines only)
    fn gpu_texture(&self) -> Option<NativeTextureHandle>;

    /// The frame's bytes as one contiguous BGRA buffer
    fn contiguous_bytes(&self) -> BackendResult<&[u8]>;
}
