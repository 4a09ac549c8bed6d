// SPDX-License-Identifier: GPL-3.0-only

//! In-process GPU interop backend
//!
//! Hands out numbered handles and tracks every live object so tests can
//! check that sessions release what they create. Each native texture carries
//! a content tag; [`GpuInteropBackend::copy_texture`] copies the tag, which
//! lets a test follow a frame from the capture engine to the render texture.

use super::{
    DeviceManagerHandle, GpuDeviceHandle, GpuInteropBackend, InteropHandle, NativeTextureHandle,
    RenderTextureHandle, ShareHandle, TextureFormat,
};
use crate::backends::camera::types::FrameSize;
use crate::errors::{InteropError, InteropResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug)]
struct Registration {
    native: NativeTextureHandle,
    render: RenderTextureHandle,
    locked: bool,
}

#[derive(Debug)]
struct GpuState {
    next_handle: u64,
    devices: HashSet<GpuDeviceHandle>,
    protected: HashSet<GpuDeviceHandle>,
    managers: HashSet<DeviceManagerHandle>,
    interops: HashSet<InteropHandle>,
    /// Native texture -> content tag
    natives: HashMap<NativeTextureHandle, u64>,
    renders: HashSet<RenderTextureHandle>,
    registrations: HashMap<ShareHandle, Registration>,
    copies: usize,
    live_reports: usize,
    render_context: bool,
    fail_device: bool,
    fail_interop: bool,
    /// Remaining native textures that may be created, `None` for unlimited
    texture_budget: Option<usize>,
}

impl GpuState {
    fn next(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }
}

/// Virtual implementation of [`GpuInteropBackend`]
#[derive(Debug)]
pub struct VirtualGpu {
    state: Mutex<GpuState>,
}

impl VirtualGpu {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(GpuState {
                next_handle: 0,
                devices: HashSet::new(),
                protected: HashSet::new(),
                managers: HashSet::new(),
                interops: HashSet::new(),
                natives: HashMap::new(),
                renders: HashSet::new(),
                registrations: HashMap::new(),
                copies: 0,
                live_reports: 0,
                render_context: true,
                fail_device: false,
                fail_interop: false,
                texture_budget: None,
            }),
        }
    }

    /// Make device creation fail
    pub fn fail_device_creation(&self, fail: bool) {
        self.state.lock().fail_device = fail;
    }

    /// Make the render-side interop channel unavailable
    pub fn fail_interop(&self, fail: bool) {
        self.state.lock().fail_interop = fail;
    }

    /// Allow only `count` more native textures
    pub fn limit_textures(&self, count: Option<usize>) {
        self.state.lock().texture_budget = count;
    }

    /// Simulate whether the calling thread has a render context current
    pub fn set_render_context(&self, present: bool) {
        self.state.lock().render_context = present;
    }

    /// Create a decoder-side texture tagged with `content`, as a capture
    /// engine would hand to the session with each sample
    pub fn create_source_texture(&self, content: u64) -> NativeTextureHandle {
        let mut state = self.state.lock();
        let handle = NativeTextureHandle(state.next());
        state.natives.insert(handle, content);
        handle
    }

    /// Content currently visible through a render texture
    pub fn render_content(&self, render: RenderTextureHandle) -> Option<u64> {
        let state = self.state.lock();
        let registration = state
            .registrations
            .values()
            .find(|r| r.render == render)?;
        state.natives.get(&registration.native).copied()
    }

    pub fn native_content(&self, texture: NativeTextureHandle) -> Option<u64> {
        self.state.lock().natives.get(&texture).copied()
    }

    pub fn live_devices(&self) -> usize {
        self.state.lock().devices.len()
    }

    pub fn all_devices_protected(&self) -> bool {
        let state = self.state.lock();
        state.devices.iter().all(|d| state.protected.contains(d))
    }

    pub fn live_device_managers(&self) -> usize {
        self.state.lock().managers.len()
    }

    pub fn open_interops(&self) -> usize {
        self.state.lock().interops.len()
    }

    /// Native textures alive, including source textures made by tests
    pub fn live_native_textures(&self) -> usize {
        self.state.lock().natives.len()
    }

    pub fn live_render_textures(&self) -> usize {
        self.state.lock().renders.len()
    }

    pub fn registered_textures(&self) -> usize {
        self.state.lock().registrations.len()
    }

    pub fn locked_textures(&self) -> usize {
        self.state
            .lock()
            .registrations
            .values()
            .filter(|r| r.locked)
            .count()
    }

    pub fn copy_count(&self) -> usize {
        self.state.lock().copies
    }

    /// How many times live objects were reported at teardown
    pub fn live_object_reports(&self) -> usize {
        self.state.lock().live_reports
    }
}

impl Default for VirtualGpu {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuInteropBackend for VirtualGpu {
    fn create_device_manager(&self) -> InteropResult<DeviceManagerHandle> {
        let mut state = self.state.lock();
        let manager = DeviceManagerHandle(state.next());
        state.managers.insert(manager);
        Ok(manager)
    }

    fn create_device(&self) -> InteropResult<GpuDeviceHandle> {
        let mut state = self.state.lock();
        if state.fail_device {
            return Err(InteropError::DeviceCreation("virtual device disabled".into()));
        }
        let device = GpuDeviceHandle(state.next());
        state.devices.insert(device);
        Ok(device)
    }

    fn set_multithread_protected(&self, device: GpuDeviceHandle) -> InteropResult<()> {
        self.state.lock().protected.insert(device);
        Ok(())
    }

    fn reset_device_manager(
        &self,
        manager: DeviceManagerHandle,
        device: GpuDeviceHandle,
    ) -> InteropResult<()> {
        let state = self.state.lock();
        if state.managers.contains(&manager) && state.devices.contains(&device) {
            Ok(())
        } else {
            Err(InteropError::DeviceManager("unknown device or manager".into()))
        }
    }

    fn open_interop(&self, _device: GpuDeviceHandle) -> InteropResult<InteropHandle> {
        let mut state = self.state.lock();
        if state.fail_interop {
            return Err(InteropError::InteropUnavailable(
                "render context does not support interop".into(),
            ));
        }
        let interop = InteropHandle(state.next());
        state.interops.insert(interop);
        Ok(interop)
    }

    fn close_interop(&self, interop: InteropHandle) {
        self.state.lock().interops.remove(&interop);
    }

    fn release_device_manager(&self, manager: DeviceManagerHandle) {
        self.state.lock().managers.remove(&manager);
    }

    fn release_device(&self, device: GpuDeviceHandle) {
        let mut state = self.state.lock();
        state.devices.remove(&device);
        state.protected.remove(&device);
    }

    fn report_live_objects(&self, device: GpuDeviceHandle) {
        let mut state = self.state.lock();
        state.live_reports += 1;
        debug!(
            ?device,
            natives = state.natives.len(),
            renders = state.renders.len(),
            "Live GPU objects"
        );
    }

    fn create_native_texture(
        &self,
        device: GpuDeviceHandle,
        _size: FrameSize,
        _format: TextureFormat,
    ) -> InteropResult<NativeTextureHandle> {
        let mut state = self.state.lock();
        if !state.devices.contains(&device) {
            return Err(InteropError::Texture("unknown device".into()));
        }
        if let Some(remaining) = state.texture_budget.as_mut() {
            if *remaining == 0 {
                return Err(InteropError::Texture("out of video memory".into()));
            }
            *remaining -= 1;
        }
        let texture = NativeTextureHandle(state.next());
        state.natives.insert(texture, 0);
        Ok(texture)
    }

    fn create_render_texture(&self, _size: FrameSize) -> InteropResult<RenderTextureHandle> {
        let mut state = self.state.lock();
        let texture = RenderTextureHandle(state.next());
        state.renders.insert(texture);
        Ok(texture)
    }

    fn register_texture(
        &self,
        interop: InteropHandle,
        native: NativeTextureHandle,
        render: RenderTextureHandle,
    ) -> InteropResult<ShareHandle> {
        let mut state = self.state.lock();
        if !state.interops.contains(&interop) {
            return Err(InteropError::Texture("interop handle is closed".into()));
        }
        let share = ShareHandle(state.next());
        state.registrations.insert(
            share,
            Registration {
                native,
                render,
                locked: false,
            },
        );
        Ok(share)
    }

    fn unregister_texture(&self, _interop: InteropHandle, share: ShareHandle) {
        self.state.lock().registrations.remove(&share);
    }

    fn release_native_texture(&self, texture: NativeTextureHandle) {
        self.state.lock().natives.remove(&texture);
    }

    fn release_render_texture(&self, texture: RenderTextureHandle) {
        self.state.lock().renders.remove(&texture);
    }

    fn lock_texture(&self, _interop: InteropHandle, share: ShareHandle) -> bool {
        match self.state.lock().registrations.get_mut(&share) {
            Some(registration) if !registration.locked => {
                registration.locked = true;
                true
            }
            _ => false,
        }
    }

    fn unlock_texture(&self, _interop: InteropHandle, share: ShareHandle) -> bool {
        match self.state.lock().registrations.get_mut(&share) {
            Some(registration) if registration.locked => {
                registration.locked = false;
                true
            }
            _ => false,
        }
    }

    fn copy_texture(
        &self,
        _device: GpuDeviceHandle,
        dst: NativeTextureHandle,
        src: NativeTextureHandle,
    ) -> InteropResult<()> {
        let mut state = self.state.lock();
        let content = *state
            .natives
            .get(&src)
            .ok_or_else(|| InteropError::Copy(format!("unknown source {src:?}")))?;
        let target = state
            .natives
            .get_mut(&dst)
            .ok_or_else(|| InteropError::Copy(format!("unknown destination {dst:?}")))?;
        *target = content;
        state.copies += 1;
        Ok(())
    }

    fn has_render_context(&self) -> bool {
        self.state.lock().render_context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_copy_moves_content_tag() {
        let gpu = VirtualGpu::new();
        let device = gpu.create_device().unwrap();
        let dst = gpu
            .create_native_texture(device, FrameSize::new(8, 8), TextureFormat::Bgrx8)
            .unwrap();
        let src = gpu.create_source_texture(42);

        gpu.copy_texture(device, dst, src).unwrap();
        assert_eq!(gpu.native_content(dst), Some(42));
        assert_eq!(gpu.copy_count(), 1);
    }

    #[test]
    fn test_texture_budget() {
        let gpu = VirtualGpu::new();
        let device = gpu.create_device().unwrap();
        gpu.limit_textures(Some(1));

        let size = FrameSize::new(8, 8);
        assert!(gpu.create_native_texture(device, size, TextureFormat::Bgrx8).is_ok());
        assert!(gpu.create_native_texture(device, size, TextureFormat::Bgrx8).is_err());
    }

    #[test]
    fn test_lock_is_exclusive() {
        let gpu = VirtualGpu::new();
        let device = gpu.create_device().unwrap();
        let interop = gpu.open_interop(device).unwrap();
        let native = gpu
            .create_native_texture(device, FrameSize::new(8, 8), TextureFormat::Bgrx8)
            .unwrap();
        let render = gpu.create_render_texture(FrameSize::new(8, 8)).unwrap();
        let share = gpu.register_texture(interop, native, render).unwrap();

        assert!(gpu.lock_texture(interop, share));
        assert!(!gpu.lock_texture(interop, share));
        assert!(gpu.unlock_texture(interop, share));
        assert!(!gpu.unlock_texture(interop, share));
    }
}
