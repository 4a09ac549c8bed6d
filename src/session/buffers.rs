// SPDX-License-Identifier: GPL-3.0-only

//! Double-buffered frame slots
//!
//! One delivery thread writes, one consumer thread reads. The writer fills
//! the slot the reader is not pointing at, then publishes it by flipping the
//! read index. Neither side ever waits on the other.

use crate::backends::camera::types::{FrameSize, PixelSurface};
use crate::constants::SLOT_COUNT;
use crate::gpu::{FrameLease, NativeTextureHandle, SharedTexture};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Read/write slot selection. The write slot is always the other one.
#[derive(Debug, Default)]
struct SlotIndex {
    read: AtomicUsize,
}

impl SlotIndex {
    fn read(&self) -> usize {
        self.read.load(Ordering::Acquire)
    }

    fn write(&self) -> usize {
        1 - self.read()
    }

    fn publish(&self, slot: usize) {
        self.read.store(slot, Ordering::Release);
    }
}

/// CPU surfaces for software sessions
///
/// The consumer receives an `Arc` to the published surface. While it holds
/// one, the writer allocates a fresh surface for that slot instead of
/// overwriting the one being read.
#[derive(Debug)]
pub(crate) struct SurfaceSlots {
    size: FrameSize,
    slots: [ArcSwapOption<PixelSurface>; SLOT_COUNT],
    index: SlotIndex,
    /// Set after the first publish; from then on the read slot is never empty
    published: AtomicBool,
}

impl SurfaceSlots {
    pub(crate) fn new(size: FrameSize) -> Self {
        Self {
            size,
            slots: [ArcSwapOption::empty(), ArcSwapOption::empty()],
            index: SlotIndex::default(),
            published: AtomicBool::new(false),
        }
    }

    /// Copy a frame into the write slot and publish it.
    ///
    /// Only the delivery thread calls this.
    pub(crate) fn write(&self, bytes: &[u8]) {
        let slot = self.index.write();
        let mut surface = match self.slots[slot].swap(None).map(Arc::try_unwrap) {
            Some(Ok(surface)) => surface,
            // Still held by the consumer, or never allocated
            Some(Err(_)) | None => PixelSurface::new(self.size),
        };
        surface.copy_from(bytes);
        self.slots[slot].store(Some(Arc::new(surface)));
        self.index.publish(slot);
        self.published.store(true, Ordering::Release);
    }

    /// The most recently published surface, `None` only before the first
    /// write
    pub(crate) fn read(&self) -> Option<Arc<PixelSurface>> {
        if !self.published.load(Ordering::Acquire) {
            return None;
        }
        loop {
            // A stale index can point at the slot the writer has just taken.
            // Each retry reloads the index, which only moves on a publish.
            if let Some(surface) = self.slots[self.index.read()].load_full() {
                return Some(surface);
            }
            std::hint::spin_loop();
        }
    }
}

/// GPU textures for hardware sessions
#[derive(Debug)]
pub(crate) struct TextureSlots {
    textures: [SharedTexture; SLOT_COUNT],
    index: SlotIndex,
}

impl TextureSlots {
    pub(crate) fn new(textures: [SharedTexture; SLOT_COUNT]) -> Self {
        Self {
            textures,
            index: SlotIndex::default(),
        }
    }

    /// GPU-copy `src` into the write slot and publish it.
    ///
    /// Returns false, leaving the previous frame published, when the write
    /// slot is locked by the renderer or the copy fails.
    pub(crate) fn write(&self, src: NativeTextureHandle) -> bool {
        let slot = self.index.write();
        if !self.textures[slot].write_from(src) {
            return false;
        }
        self.index.publish(slot);
        true
    }

    /// Lock the most recently published texture for rendering
    pub(crate) fn lease(&self) -> FrameLease<'_> {
        for _ in 0..SLOT_COUNT {
            let lease = FrameLease::acquire(&self.textures[self.index.read()]);
            if lease.is_valid() {
                return lease;
            }
        }
        FrameLease::invalid()
    }
}
