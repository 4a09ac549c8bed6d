// SPDX-License-Identifier: GPL-3.0-only

//! GPU interop for hardware-accelerated capture
//!
//! Hardware sessions decode into textures owned by a capture-side GPU device
//! and expose them to the consumer's renderer through an interop handle.
//! [`InteropContext`] owns that shared device state. It is created lazily by
//! the first hardware session, shared by every session of a
//! [`CaptureContext`](crate::CaptureContext), and torn down when the last
//! session (hardware or software) goes away.

mod texture;
pub mod virtual_gpu;

pub use texture::{FrameLease, SharedTexture};

use crate::backends::camera::types::{FrameSize, Format};
use crate::errors::{InteropError, InteropResult};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info};

macro_rules! gpu_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub struct $name(pub u64);
    };
}

gpu_handle!(
    /// Capture-side GPU device
    GpuDeviceHandle
);
gpu_handle!(
    /// Device manager that lets the capture engine decode on [`GpuDeviceHandle`]
    DeviceManagerHandle
);
gpu_handle!(
    /// Open interop channel between the capture device and the renderer
    InteropHandle
);
gpu_handle!(
    /// Texture created on the capture-side device
    NativeTextureHandle
);
gpu_handle!(
    /// Texture name in the consumer's render context
    RenderTextureHandle
);
gpu_handle!(
    /// Registration of a native texture with the renderer
    ShareHandle
);

/// Pixel format of shared textures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum TextureFormat {
    /// 8-bit B G R with an unused alpha byte
    #[default]
    Bgrx8,
}

/// Platform GPU and interop operations used by capture sessions
///
/// Handles are opaque to the session. Release methods are infallible; a
/// backend that fails to release logs it itself.
pub trait GpuInteropBackend: Send + Sync {
    /// Create a device manager for the capture engine
    fn create_device_manager(&self) -> InteropResult<DeviceManagerHandle>;

    /// Create a hardware GPU device with video support
    fn create_device(&self) -> InteropResult<GpuDeviceHandle>;

    /// Make the device safe to use from the engine's threads
    fn set_multithread_protected(&self, device: GpuDeviceHandle) -> InteropResult<()>;

    /// Bind the device to the manager
    fn reset_device_manager(
        &self,
        manager: DeviceManagerHandle,
        device: GpuDeviceHandle,
    ) -> InteropResult<()>;

    /// Open the render-side interop channel for the device
    fn open_interop(&self, device: GpuDeviceHandle) -> InteropResult<InteropHandle>;

    fn close_interop(&self, interop: InteropHandle);

    fn release_device_manager(&self, manager: DeviceManagerHandle);

    fn release_device(&self, device: GpuDeviceHandle);

    /// Debug-only diagnostic listing GPU objects still alive on `device`
    fn report_live_objects(&self, device: GpuDeviceHandle);

    fn create_native_texture(
        &self,
        device: GpuDeviceHandle,
        size: FrameSize,
        format: TextureFormat,
    ) -> InteropResult<NativeTextureHandle>;

    fn create_render_texture(&self, size: FrameSize) -> InteropResult<RenderTextureHandle>;

    /// Register a native texture so it can be sampled as `render`
    fn register_texture(
        &self,
        interop: InteropHandle,
        native: NativeTextureHandle,
        render: RenderTextureHandle,
    ) -> InteropResult<ShareHandle>;

    fn unregister_texture(&self, interop: InteropHandle, share: ShareHandle);

    fn release_native_texture(&self, texture: NativeTextureHandle);

    fn release_render_texture(&self, texture: RenderTextureHandle);

    /// Hand the texture to the renderer. Returns false on failure.
    fn lock_texture(&self, interop: InteropHandle, share: ShareHandle) -> bool;

    /// Give the texture back to the capture device. Returns false on failure.
    fn unlock_texture(&self, interop: InteropHandle, share: ShareHandle) -> bool;

    /// GPU copy of a whole texture on the capture device
    fn copy_texture(
        &self,
        device: GpuDeviceHandle,
        dst: NativeTextureHandle,
        src: NativeTextureHandle,
    ) -> InteropResult<()>;

    /// Whether a render context is current on the calling thread
    fn has_render_context(&self) -> bool;
}

#[derive(Debug, Clone, Copy)]
struct InteropResources {
    device: GpuDeviceHandle,
    manager: DeviceManagerHandle,
    interop: InteropHandle,
}

#[derive(Debug, Default)]
struct InteropState {
    sessions: usize,
    resources: Option<InteropResources>,
    /// Failure from the last initialization attempt, kept until teardown
    failure: Option<InteropError>,
}

/// Shared GPU device, device manager and interop handle
pub struct InteropContext {
    backend: Arc<dyn GpuInteropBackend>,
    state: Mutex<InteropState>,
}

impl InteropContext {
    pub fn new(backend: Arc<dyn GpuInteropBackend>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            state: Mutex::new(InteropState::default()),
        })
    }

    pub fn backend(&self) -> &Arc<dyn GpuInteropBackend> {
        &self.backend
    }

    /// Count a new session. The returned guard releases the count on drop.
    pub fn register_session(self: &Arc<Self>) -> InteropSession {
        let mut state = self.state.lock();
        state.sessions += 1;
        debug!(sessions = state.sessions, "Interop session registered");
        InteropSession {
            context: Arc::clone(self),
        }
    }

    /// Number of live sessions
    pub fn session_count(&self) -> usize {
        self.state.lock().sessions
    }

    /// Create the shared GPU state if it does not exist yet.
    ///
    /// Repeated calls return the cached outcome, success or failure, until
    /// the context is torn down by the last session going away.
    pub fn initialize(&self, format: &Format) -> InteropResult<()> {
        let mut state = self.state.lock();
        if state.resources.is_some() {
            return Ok(());
        }
        if let Some(failure) = &state.failure {
            return Err(failure.clone());
        }

        info!(format = %format, "Creating GPU interop context");
        match self.create_resources() {
            Ok(resources) => {
                state.resources = Some(resources);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "GPU interop context is invalid");
                state.failure = Some(e.clone());
                Err(e)
            }
        }
    }

    fn create_resources(&self) -> InteropResult<InteropResources> {
        let backend = &self.backend;

        let manager = backend.create_device_manager()?;
        let device = match backend.create_device() {
            Ok(device) => device,
            Err(e) => {
                backend.release_device_manager(manager);
                return Err(e);
            }
        };

        let bound = backend
            .set_multithread_protected(device)
            .and_then(|()| backend.reset_device_manager(manager, device))
            .and_then(|()| backend.open_interop(device));

        match bound {
            Ok(interop) => {
                debug!(?device, ?manager, ?interop, "GPU interop resources created");
                Ok(InteropResources {
                    device,
                    manager,
                    interop,
                })
            }
            Err(e) => {
                backend.release_device_manager(manager);
                backend.release_device(device);
                Err(e)
            }
        }
    }

    /// True once [`initialize`](Self::initialize) succeeded and until teardown
    pub fn is_valid(&self) -> bool {
        self.state.lock().resources.is_some()
    }

    /// Device manager to hand to hardware capture engines
    pub fn device_manager(&self) -> Option<DeviceManagerHandle> {
        self.state.lock().resources.map(|r| r.manager)
    }

    /// Allocate one shared texture on the capture device
    pub fn create_shared_texture(&self, size: FrameSize) -> InteropResult<SharedTexture> {
        let resources = self
            .state
            .lock()
            .resources
            .ok_or(InteropError::NotInitialized)?;
        SharedTexture::allocate(
            Arc::clone(&self.backend),
            resources.device,
            resources.interop,
            size,
        )
    }

    fn release_session(&self) {
        let mut state = self.state.lock();
        state.sessions = state.sessions.saturating_sub(1);
        debug!(sessions = state.sessions, "Interop session released");
        if state.sessions > 0 {
            return;
        }

        state.failure = None;
        let Some(resources) = state.resources.take() else {
            return;
        };
        drop(state);

        info!("Tearing down GPU interop context");
        self.backend.close_interop(resources.interop);
        self.backend.release_device_manager(resources.manager);
        if cfg!(debug_assertions) {
            self.backend.report_live_objects(resources.device);
        }
        self.backend.release_device(resources.device);
    }
}

impl std::fmt::Debug for InteropContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("InteropContext")
            .field("sessions", &state.sessions)
            .field("valid", &state.resources.is_some())
            .finish()
    }
}

/// Keeps the interop context alive for one session
pub struct InteropSession {
    context: Arc<InteropContext>,
}

impl InteropSession {
    pub fn context(&self) -> &Arc<InteropContext> {
        &self.context
    }
}

impl Drop for InteropSession {
    fn drop(&mut self) {
        self.context.release_session();
    }
}

impl std::fmt::Debug for InteropSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InteropSession").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::virtual_gpu::VirtualGpu;
    use super::*;

    fn context() -> (Arc<VirtualGpu>, Arc<InteropContext>) {
        let gpu = Arc::new(VirtualGpu::new());
        let ctx = InteropContext::new(gpu.clone());
        (gpu, ctx)
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let (gpu, ctx) = context();
        let _session = ctx.register_session();

        ctx.initialize(&Format::default()).unwrap();
        ctx.initialize(&Format::default()).unwrap();

        assert!(ctx.is_valid());
        assert_eq!(gpu.live_devices(), 1);
        assert_eq!(gpu.open_interops(), 1);
    }

    #[test]
    fn test_teardown_on_last_session() {
        let (gpu, ctx) = context();
        let first = ctx.register_session();
        let second = ctx.register_session();
        ctx.initialize(&Format::default()).unwrap();

        drop(first);
        assert!(ctx.is_valid());
        assert_eq!(gpu.live_devices(), 1);

        drop(second);
        assert!(!ctx.is_valid());
        assert_eq!(gpu.live_devices(), 0);
        assert_eq!(gpu.open_interops(), 0);
        assert_eq!(gpu.live_device_managers(), 0);
    }

    #[test]
    fn test_failure_is_cached_until_teardown() {
        let (gpu, ctx) = context();
        gpu.fail_interop(true);
        let session = ctx.register_session();

        assert!(ctx.initialize(&Format::default()).is_err());
        gpu.fail_interop(false);
        assert!(ctx.initialize(&Format::default()).is_err());
        // Partially created objects were released
        assert_eq!(gpu.live_devices(), 0);
        assert_eq!(gpu.live_device_managers(), 0);

        drop(session);
        let _session = ctx.register_session();
        assert!(ctx.initialize(&Format::default()).is_ok());
    }

    #[test]
    fn test_device_is_multithread_protected() {
        let (gpu, ctx) = context();
        let _session = ctx.register_session();
        ctx.initialize(&Format::default()).unwrap();
        assert!(gpu.all_devices_protected());
    }

    #[test]
    fn test_texture_requires_initialization() {
        let (_gpu, ctx) = context();
        let _session = ctx.register_session();
        assert!(matches!(
            ctx.create_shared_texture(FrameSize::new(64, 64)),
            Err(InteropError::NotInitialized)
        ));
    }
}
