// SPDX-License-Identifier: GPL-3.0-only

//! Public capture API
//!
//! [`CaptureContext`] holds what every session shares: the backends, the
//! device registry, the GPU interop context and the main queue.
//! [`Capture`] is the handle the consumer keeps for one camera.
//!
//! All signals are emitted from [`CaptureContext::run_pending`] (or
//! [`MainQueue::next_cycle`]) on the consumer's control thread.

use crate::backends::camera::types::{
    Bounds, DeviceDescriptor, DeviceProfile, Format, FrameSize, OcclusionState, PixelSurface,
};
use crate::backends::camera::{CaptureBackend, Control, DeviceRegistry, HotplugWatcher};
use crate::dispatch::MainQueue;
use crate::errors::{BackendResult, SessionError};
use crate::gpu::{FrameLease, GpuInteropBackend, InteropContext};
use crate::session::{CaptureSession, FrameStats, SessionState};
use crate::signal::Signal;
use std::sync::Arc;
use tracing::info;

/// Shared state for all capture sessions of one consumer
pub struct CaptureContext {
    backend: Arc<dyn CaptureBackend>,
    registry: Arc<DeviceRegistry>,
    interop: Arc<InteropContext>,
    queue: MainQueue,
}

impl CaptureContext {
    pub fn new(backend: Arc<dyn CaptureBackend>, gpu: Arc<dyn GpuInteropBackend>) -> Self {
        let queue = MainQueue::new();
        let registry = Arc::new(DeviceRegistry::new(Arc::clone(&backend), queue.handle()));
        Self {
            backend,
            registry,
            interop: InteropContext::new(gpu),
            queue,
        }
    }

    pub fn backend(&self) -> &Arc<dyn CaptureBackend> {
        &self.backend
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn interop(&self) -> &Arc<InteropContext> {
        &self.interop
    }

    pub fn queue(&self) -> &MainQueue {
        &self.queue
    }

    /// Cached devices; enumerates when the cache is empty or `refresh` is set
    pub fn list_devices(&self, refresh: bool) -> Vec<DeviceDescriptor> {
        self.registry.list_devices(refresh)
    }

    pub fn list_profiles(&self, device: &DeviceDescriptor) -> Vec<DeviceProfile> {
        self.registry.list_profiles(device)
    }

    pub fn on_device_added(&self) -> &Signal<DeviceDescriptor> {
        self.registry.on_device_added()
    }

    pub fn on_device_removed(&self) -> &Signal<DeviceDescriptor> {
        self.registry.on_device_removed()
    }

    /// Start re-enumerating whenever the backend reports a device change
    pub fn watch_devices(&self) -> BackendResult<HotplugWatcher> {
        HotplugWatcher::start(&self.backend, Arc::clone(&self.registry))
    }

    /// Run queued notifications. Call once per frame on the control thread.
    pub fn run_pending(&self) -> usize {
        self.queue.run_pending()
    }
}

impl std::fmt::Debug for CaptureContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureContext")
            .field("registry", &self.registry)
            .field("interop", &self.interop)
            .finish_non_exhaustive()
    }
}

/// A camera capture
///
/// Frames are polled: check [`check_new_frame`](Self::check_new_frame) each
/// frame, then take the newest one with [`get_surface`](Self::get_surface)
/// (software) or [`get_texture`](Self::get_texture) (hardware). Neither call
/// blocks.
#[derive(Debug)]
pub struct Capture {
    session: CaptureSession,
}

impl Capture {
    /// Open a capture. An unset device picks the first enumerated one.
    ///
    /// The handle is returned even if construction failed; check
    /// [`is_valid`](Self::is_valid).
    pub fn new(context: &CaptureContext, mut format: Format) -> Self {
        if format.device.is_unset()
            && let Some(first) = context.list_devices(true).into_iter().next()
        {
            info!(device = %first, "No device requested, using first device");
            format.device = first;
        }
        Self {
            session: CaptureSession::open(context, format),
        }
    }

    /// Open a capture, or `None` if it could not be constructed
    pub fn create(context: &CaptureContext, format: Format) -> Option<Self> {
        let capture = Self::new(context, format);
        capture.is_valid().then_some(capture)
    }

    pub fn is_valid(&self) -> bool {
        self.session.is_valid()
    }

    pub fn construction_error(&self) -> Option<&SessionError> {
        self.session.error()
    }

    pub fn format(&self) -> &Format {
        self.session.format()
    }

    pub fn size(&self) -> FrameSize {
        self.format().size
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from(self.size())
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.format().device
    }

    pub fn is_hardware_accelerated(&self) -> bool {
        self.format().hardware_accelerated
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn start(&self) {
        self.session.start();
    }

    pub fn stop(&self) {
        self.session.stop();
    }

    pub fn is_started(&self) -> bool {
        self.session.is_started()
    }

    pub fn is_stopped(&self) -> bool {
        self.session.is_stopped()
    }

    /// A frame arrived since the last `get_surface`/`get_texture`
    pub fn check_new_frame(&self) -> bool {
        self.session.check_new_frame()
    }

    /// Newest CPU frame (software captures). Clears the new-frame flag.
    pub fn get_surface(&self) -> Option<Arc<PixelSurface>> {
        self.session.surface()
    }

    /// Newest GPU frame, locked for rendering while the lease lives
    /// (hardware captures). Clears the new-frame flag.
    pub fn get_texture(&self) -> FrameLease<'_> {
        self.session.texture()
    }

    /// Controls the device supports
    pub fn controls(&self) -> &[Arc<Control>] {
        self.session.controls()
    }

    /// Look a control up by display name
    pub fn control(&self, name: &str) -> Option<&Arc<Control>> {
        self.controls().iter().find(|c| c.name() == name)
    }

    pub fn frame_stats(&self) -> FrameStats {
        self.session.frame_stats()
    }

    // ===== Signals =====

    /// The engine initialized and the preview stream is configured
    pub fn on_initialize(&self) -> &Signal<()> {
        &self.session.signals().initialize
    }

    pub fn on_start(&self) -> &Signal<()> {
        &self.session.signals().start
    }

    pub fn on_stop(&self) -> &Signal<()> {
        &self.session.signals().stop
    }

    /// The device was unplugged or claimed elsewhere. The capture can only
    /// be dropped after this; do so from a later queue cycle.
    pub fn on_device_lost(&self) -> &Signal<()> {
        &self.session.signals().device_lost
    }

    /// A backend failure status
    pub fn on_error(&self) -> &Signal<i32> {
        &self.session.signals().error
    }

    /// A control's value changed on the device
    pub fn on_control_changed(&self) -> &Signal<Arc<Control>> {
        &self.session.signals().control_changed
    }

    pub fn on_occlusion_changed(&self) -> &Signal<OcclusionState> {
        &self.session.signals().occlusion_changed
    }
}
