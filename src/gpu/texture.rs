// SPDX-License-Identifier: GPL-3.0-only

//! Textures shared between the capture device and the renderer
//!
//! A texture is either owned by the capture side (writable by GPU copies) or
//! locked for the renderer. The two never overlap: the writer skips a frame
//! rather than copy into a locked texture, and the renderer only locks a
//! texture that holds a complete frame.

use super::{
    GpuDeviceHandle, GpuInteropBackend, InteropHandle, NativeTextureHandle, RenderTextureHandle,
    ShareHandle, TextureFormat,
};
use crate::backends::camera::types::FrameSize;
use crate::errors::InteropResult;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Default)]
struct TextureState {
    /// Locked for the renderer
    locked: bool,
    /// Holds at least one complete frame
    written: bool,
}

/// A native capture texture registered as a render texture
pub struct SharedTexture {
    backend: Arc<dyn GpuInteropBackend>,
    device: GpuDeviceHandle,
    interop: InteropHandle,
    size: FrameSize,
    native: NativeTextureHandle,
    render: RenderTextureHandle,
    share: ShareHandle,
    state: Mutex<TextureState>,
}

impl SharedTexture {
    pub(crate) fn allocate(
        backend: Arc<dyn GpuInteropBackend>,
        device: GpuDeviceHandle,
        interop: InteropHandle,
        size: FrameSize,
    ) -> InteropResult<Self> {
        let native = backend.create_native_texture(device, size, TextureFormat::Bgrx8)?;
        let render = match backend.create_render_texture(size) {
            Ok(render) => render,
            Err(e) => {
                backend.release_native_texture(native);
                return Err(e);
            }
        };
        let share = match backend.register_texture(interop, native, render) {
            Ok(share) => share,
            Err(e) => {
                backend.release_render_texture(render);
                backend.release_native_texture(native);
                return Err(e);
            }
        };

        debug!(%size, ?native, ?render, "Shared texture allocated");
        Ok(Self {
            backend,
            device,
            interop,
            size,
            native,
            render,
            share,
            state: Mutex::new(TextureState::default()),
        })
    }

    pub fn size(&self) -> FrameSize {
        self.size
    }

    pub fn native(&self) -> NativeTextureHandle {
        self.native
    }

    /// Texture name to bind in the consumer's render context
    pub fn render_texture(&self) -> RenderTextureHandle {
        self.render
    }

    pub fn is_locked(&self) -> bool {
        self.state.lock().locked
    }

    /// Copy `src` into this texture on the capture device.
    ///
    /// Never blocks: returns false without copying if the renderer holds the
    /// texture or the state is momentarily contended.
    pub(crate) fn write_from(&self, src: NativeTextureHandle) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        if state.locked {
            trace!(native = ?self.native, "Texture locked by renderer, skipping frame");
            return false;
        }
        if let Err(e) = self.backend.copy_texture(self.device, self.native, src) {
            warn!(error = %e, "GPU frame copy failed");
            return false;
        }
        state.written = true;
        true
    }

    /// Lock for the renderer without blocking.
    ///
    /// Fails when the texture is being written, is already locked, or has
    /// never received a frame.
    pub(crate) fn try_lock_for_render(&self) -> bool {
        let Some(mut state) = self.state.try_lock() else {
            return false;
        };
        if state.locked || !state.written {
            return false;
        }
        if !self.backend.lock_texture(self.interop, self.share) {
            warn!(render = ?self.render, "Failed to lock shared texture");
            return false;
        }
        state.locked = true;
        true
    }

    pub(crate) fn unlock_from_render(&self) {
        let mut state = self.state.lock();
        if !state.locked {
            return;
        }
        if !self.backend.unlock_texture(self.interop, self.share) {
            warn!(render = ?self.render, "Failed to unlock shared texture");
        }
        state.locked = false;
    }
}

impl Drop for SharedTexture {
    fn drop(&mut self) {
        // Render-side objects can only be released with a render context current
        if self.backend.has_render_context() {
            if self.state.get_mut().locked {
                self.backend.unlock_texture(self.interop, self.share);
            }
            self.backend.unregister_texture(self.interop, self.share);
            self.backend.release_render_texture(self.render);
        } else {
            debug!(render = ?self.render, "No render context, leaving render texture to its context");
        }
        self.backend.release_native_texture(self.native);
    }
}

impl std::fmt::Debug for SharedTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedTexture")
            .field("size", &self.size)
            .field("native", &self.native)
            .field("render", &self.render)
            .field("locked", &self.is_locked())
            .finish()
    }
}

/// Scoped renderer access to the newest texture
///
/// Holds the texture locked for as long as the lease lives and unlocks it on
/// drop. An invalid lease (no frame yet, or the slot was busy) carries no
/// texture.
pub struct FrameLease<'a> {
    texture: Option<&'a SharedTexture>,
}

impl<'a> FrameLease<'a> {
    pub(crate) fn acquire(texture: &'a SharedTexture) -> Self {
        Self {
            texture: texture.try_lock_for_render().then_some(texture),
        }
    }

    /// A lease that holds nothing
    pub fn invalid() -> Self {
        Self { texture: None }
    }

    pub fn is_valid(&self) -> bool {
        self.texture.is_some()
    }

    pub fn texture(&self) -> Option<RenderTextureHandle> {
        self.texture.map(SharedTexture::render_texture)
    }

    pub fn size(&self) -> Option<FrameSize> {
        self.texture.map(SharedTexture::size)
    }
}

impl Drop for FrameLease<'_> {
    fn drop(&mut self) {
        if let Some(texture) = self.texture.take() {
            texture.unlock_from_render();
        }
    }
}

impl std::fmt::Debug for FrameLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameLease")
            .field("texture", &self.texture())
            .finish()
    }
}
