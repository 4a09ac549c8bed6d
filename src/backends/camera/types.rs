// SPDX-License-Identifier: GPL-3.0-only
// Shared types for camera backend abstraction

//! Shared types for capture backends and sessions

use crate::constants::{
    BYTES_PER_PIXEL, DEFAULT_FPS_DENOM, DEFAULT_FPS_NUM, DEFAULT_HEIGHT, DEFAULT_WIDTH,
};
use crate::gpu::DeviceManagerHandle;
use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// Device category passed to enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DeviceCategory {
    /// Video capture sources (webcams, capture cards)
    #[default]
    VideoCapture,
}

/// Identifies a capture device
///
/// The `id` is opaque and platform-assigned (a symbolic link on Windows, a
/// node path elsewhere). Ordering compares `name` first, then `id`.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct DeviceDescriptor {
    pub name: String,
    pub id: String,
}

impl DeviceDescriptor {
    pub fn new(name: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: id.into(),
        }
    }

    /// True when no device was chosen (the session picks the first enumerated one)
    pub fn is_unset(&self) -> bool {
        self.id.is_empty()
    }
}

impl std::fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Width and height in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Bytes needed for one 32-bit frame of this size
    pub fn frame_bytes(&self) -> usize {
        self.width as usize * self.height as usize * BYTES_PER_PIXEL
    }
}

impl Default for FrameSize {
    fn default() -> Self {
        Self::new(DEFAULT_WIDTH, DEFAULT_HEIGHT)
    }
}

impl std::fmt::Display for FrameSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Pixel rectangle of a frame, origin at the top left
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl From<FrameSize> for Bounds {
    fn from(size: FrameSize) -> Self {
        Self {
            x: 0,
            y: 0,
            width: size.width,
            height: size.height,
        }
    }
}

/// Framerate as a fraction (numerator/denominator)
/// Stores exact framerate to handle NTSC rates like 59.94fps (60000/1001)
///
/// A zero denominator is read as 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "RawFramerate")]
pub struct Framerate {
    pub num: u32,
    pub denom: u32,
}

#[derive(Deserialize)]
struct RawFramerate {
    num: u32,
    denom: u32,
}

impl From<RawFramerate> for Framerate {
    fn from(raw: RawFramerate) -> Self {
        Self::new(raw.num, raw.denom)
    }
}

impl Framerate {
    /// Create a new framerate from numerator and denominator
    pub fn new(num: u32, denom: u32) -> Self {
        Self {
            num,
            denom: if denom == 0 { 1 } else { denom },
        }
    }

    /// Create a framerate from an integer (e.g., 30 becomes 30/1)
    pub fn from_int(fps: u32) -> Self {
        Self { num: fps, denom: 1 }
    }

    pub fn as_f64(&self) -> f64 {
        self.num as f64 / self.divisor() as f64
    }

    /// Truncated integer framerate
    pub fn as_int(&self) -> u32 {
        self.num / self.divisor()
    }

    // Zero-safe denominator for literals built without `new`
    fn divisor(&self) -> u32 {
        self.denom.max(1)
    }
}

impl std::fmt::Display for Framerate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show decimal for non-integer framerates (NTSC)
        if self.num % self.divisor() != 0 {
            write!(f, "{:.2}", self.as_f64())
        } else {
            write!(f, "{}", self.as_int())
        }
    }
}

impl Default for Framerate {
    fn default() -> Self {
        Self::new(DEFAULT_FPS_NUM, DEFAULT_FPS_DENOM)
    }
}

/// A (resolution, frame rate) pair supported by a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceProfile {
    pub size: FrameSize,
    pub framerate: Framerate,
}

impl DeviceProfile {
    pub fn new(size: FrameSize, framerate: Framerate) -> Self {
        Self { size, framerate }
    }

    /// Stable display key, e.g. `1280x720@60` or `1920x1080@29.97`
    pub fn key(&self) -> String {
        format!("{}@{}", self.size, self.framerate)
    }
}

impl std::fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} @ {}fps", self.size, self.framerate)
    }
}

/// Clockwise rotation applied to the preview stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Rotation {
    #[default]
    R0,
    R90,
    R180,
    R270,
}

impl Rotation {
    /// Create rotation from an integer degree value (normalised to 0-360).
    ///
    /// Values that are not a multiple of 90 yield `None`.
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Rotation::R0),
            90 => Some(Rotation::R90),
            180 => Some(Rotation::R180),
            270 => Some(Rotation::R270),
            _ => None,
        }
    }

    pub fn degrees(&self) -> u32 {
        match self {
            Rotation::R0 => 0,
            Rotation::R90 => 90,
            Rotation::R180 => 180,
            Rotation::R270 => 270,
        }
    }

    /// Check if rotation swaps width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(self, Rotation::R90 | Rotation::R270)
    }
}

impl std::fmt::Display for Rotation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// Requested capture configuration
///
/// Built with chained setters before the session is created:
///
/// ```
/// use camera_session::{Format, Rotation};
///
/// let format = Format::new()
///     .size(1280, 720)
///     .fps(60)
///     .rotation(Rotation::R90)
///     .hardware_accelerated(false);
/// assert_eq!(format.size.width, 1280);
/// assert_eq!(format.framerate.as_int(), 60);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Format {
    pub size: FrameSize,
    pub framerate: Framerate,
    /// Device to open; unset picks the first enumerated device
    pub device: DeviceDescriptor,
    /// Profile the size and frame rate were taken from, if any
    pub profile: Option<DeviceProfile>,
    pub hardware_accelerated: bool,
    pub rotation: Rotation,
    pub auto_start: bool,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            size: FrameSize::default(),
            framerate: Framerate::default(),
            device: DeviceDescriptor::default(),
            profile: None,
            hardware_accelerated: true,
            rotation: Rotation::R0,
            auto_start: true,
        }
    }
}

impl Format {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn size(mut self, width: u32, height: u32) -> Self {
        self.size = FrameSize::new(width, height);
        self
    }

    /// Integer frame rate (`fps/1`)
    pub fn fps(mut self, fps: u32) -> Self {
        self.framerate = Framerate::from_int(fps);
        self
    }

    pub fn fps_ratio(mut self, num: u32, denom: u32) -> Self {
        self.framerate = Framerate::new(num, denom);
        self
    }

    pub fn device(mut self, device: DeviceDescriptor) -> Self {
        self.device = device;
        self
    }

    /// Take size and frame rate from a device profile
    pub fn profile(mut self, profile: DeviceProfile) -> Self {
        self.size = profile.size;
        self.framerate = profile.framerate;
        self.profile = Some(profile);
        self
    }

    pub fn hardware_accelerated(mut self, accelerated: bool) -> Self {
        self.hardware_accelerated = accelerated;
        self
    }

    pub fn rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} @ {}fps {} {}",
            self.size,
            self.framerate,
            self.rotation,
            if self.hardware_accelerated { "GPU" } else { "CPU" }
        )
    }
}

/// Pixel layout of the preview stream requested from the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum StreamPixelFormat {
    /// 32-bit B G R A/X byte order
    #[default]
    Bgra32,
}

/// Preview stream configuration applied once the engine is initialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamConfig {
    pub pixel_format: StreamPixelFormat,
    pub framerate: Framerate,
    pub size: FrameSize,
    pub rotation: Rotation,
}

impl From<&Format> for StreamConfig {
    fn from(format: &Format) -> Self {
        Self {
            pixel_format: StreamPixelFormat::Bgra32,
            framerate: format.framerate,
            size: format.size,
            rotation: format.rotation,
        }
    }
}

/// Attributes passed to the backend when creating a capture engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineConfig {
    /// Open the video stream only (no audio endpoint)
    pub use_video_device_only: bool,
    /// Keep the pipeline on the CPU (software mode)
    pub disable_hardware_transforms: bool,
    /// GPU device manager the engine decodes into (hardware mode)
    pub device_manager: Option<DeviceManagerHandle>,
}

/// Physical camera cover state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OcclusionState {
    #[default]
    Open,
    OccludedBySoftCover,
    OccludedByHardware,
}

/// Asynchronous events delivered by a capture engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The engine finished initializing and can be configured
    Initialized,
    /// Preview streaming started
    PreviewStarted,
    /// Preview streaming stopped
    PreviewStopped,
    /// A failure with the backend's status code
    Error { status: i32 },
    /// Camera cover state changed
    Occlusion(OcclusionState),
    /// An extended event this crate does not interpret
    Unhandled(String),
}

/// Property set a camera property belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertySet {
    /// Image processing amplifier (brightness, contrast, ...)
    VideoProcAmp,
    /// Lens and sensor controls (zoom, focus, ...)
    CameraControl,
}

/// A backend property address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyKey {
    pub set: PropertySet,
    pub id: u32,
}

impl PropertyKey {
    pub const fn new(set: PropertySet, id: u32) -> Self {
        Self { set, id }
    }
}

/// Bounds and stepping reported by a "basic support" query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyRange {
    pub min: i32,
    pub max: i32,
    pub step: i32,
}

/// One BGRA pixel
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Pod, Zeroable)]
pub struct Bgra8 {
    pub b: u8,
    pub g: u8,
    pub r: u8,
    pub a: u8,
}

/// CPU-addressable frame storage (BGRA, 4 bytes per pixel)
///
/// The backing allocation is kept across frames and only grows when an
/// incoming frame is larger than anything seen before.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelSurface {
    width: u32,
    height: u32,
    row_bytes: usize,
    data: Vec<u8>,
    /// Bytes written by the most recent frame
    len: usize,
}

impl PixelSurface {
    /// Zeroed surface for `size`
    pub fn new(size: FrameSize) -> Self {
        let bytes = size.frame_bytes();
        Self {
            width: size.width,
            height: size.height,
            row_bytes: size.width as usize * BYTES_PER_PIXEL,
            data: vec![0; bytes],
            len: bytes,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    pub fn row_bytes(&self) -> usize {
        self.row_bytes
    }

    /// Bytes the surface can hold without reallocating
    pub fn capacity_bytes(&self) -> usize {
        self.data.len()
    }

    /// Bytes of the current frame
    pub fn data(&self) -> &[u8] {
        &self.data[..self.len]
    }

    /// One row of the current frame, if it lies within the written bytes
    pub fn row(&self, y: u32) -> Option<&[u8]> {
        let start = y as usize * self.row_bytes;
        self.data().get(start..start + self.row_bytes)
    }

    /// The current frame as typed pixels
    pub fn pixels(&self) -> &[Bgra8] {
        let whole = self.len - self.len % BYTES_PER_PIXEL;
        bytemuck::cast_slice(&self.data[..whole])
    }

    /// Copy a frame in, growing the allocation only when it is too small.
    ///
    /// Returns true when the allocation had to grow.
    pub fn copy_from(&mut self, bytes: &[u8]) -> bool {
        let grew = self.data.len() < bytes.len();
        if grew {
            self.data.resize(bytes.len(), 0);
        }
        self.data[..bytes.len()].copy_from_slice(bytes);
        self.len = bytes.len();
        grew
    }
}

impl std::fmt::Debug for PixelSurface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelSurface")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("row_bytes", &self.row_bytes)
            .field("len", &self.len)
            .field("capacity", &self.data.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_ordering_uses_name_then_id() {
        let a = DeviceDescriptor::new("Alpha", "z");
        let b = DeviceDescriptor::new("Beta", "a");
        let a2 = DeviceDescriptor::new("Alpha", "y");
        assert!(a < b);
        assert!(a2 < a);
        assert_eq!(a.to_string(), "Alpha (z)");
    }

    #[test]
    fn test_profile_key() {
        let hd = DeviceProfile::new(FrameSize::new(1280, 720), Framerate::from_int(60));
        let ntsc = DeviceProfile::new(FrameSize::new(1920, 1080), Framerate::new(30000, 1001));
        assert_eq!(hd.key(), "1280x720@60");
        assert_eq!(ntsc.key(), "1920x1080@29.97");
    }

    #[test]
    fn test_framerate_zero_denominator() {
        assert_eq!(Framerate::new(30, 0), Framerate::from_int(30));

        let literal = Framerate { num: 30, denom: 0 };
        assert_eq!(literal.as_int(), 30);
        assert_eq!(literal.to_string(), "30");
        let profile = DeviceProfile::new(FrameSize::new(640, 480), literal);
        assert_eq!(profile.key(), "640x480@30");
    }

    #[test]
    fn test_framerate_deserialize_normalizes_denominator() {
        let rate: Framerate = serde_json::from_str(r#"{"num":30,"denom":0}"#).unwrap();
        assert_eq!(rate, Framerate::from_int(30));

        let ntsc: Framerate = serde_json::from_str(r#"{"num":60000,"denom":1001}"#).unwrap();
        assert_eq!(ntsc, Framerate::new(60000, 1001));
    }

    #[test]
    fn test_rotation_from_degrees() {
        assert_eq!(Rotation::from_degrees(90), Some(Rotation::R90));
        assert_eq!(Rotation::from_degrees(-90), Some(Rotation::R270));
        assert_eq!(Rotation::from_degrees(450), Some(Rotation::R90));
        assert_eq!(Rotation::from_degrees(45), None);
        assert!(Rotation::R270.swaps_dimensions());
    }

    #[test]
    fn test_format_defaults_and_profile() {
        let format = Format::default();
        assert_eq!(format.size, FrameSize::new(640, 480));
        assert!(format.hardware_accelerated);
        assert!(format.auto_start);
        assert!(format.device.is_unset());

        let profile = DeviceProfile::new(FrameSize::new(1920, 1080), Framerate::new(60000, 1001));
        let format = Format::new().profile(profile);
        assert_eq!(format.size, profile.size);
        assert_eq!(format.framerate, profile.framerate);
        assert_eq!(format.profile, Some(profile));
    }

    #[test]
    fn test_surface_reuses_allocation() {
        let mut surface = PixelSurface::new(FrameSize::new(4, 2));
        assert_eq!(surface.capacity_bytes(), 32);

        assert!(!surface.copy_from(&[7; 32]));
        assert!(!surface.copy_from(&[8; 16]));
        assert_eq!(surface.data().len(), 16);
        assert_eq!(surface.capacity_bytes(), 32);

        assert!(surface.copy_from(&[9; 40]));
        assert_eq!(surface.capacity_bytes(), 40);
    }

    #[test]
    fn test_surface_pixels_and_rows() {
        let mut surface = PixelSurface::new(FrameSize::new(2, 2));
        let bytes: Vec<u8> = (0..16).collect();
        surface.copy_from(&bytes);

        assert_eq!(surface.pixels().len(), 4);
        assert_eq!(surface.pixels()[1], Bgra8 { b: 4, g: 5, r: 6, a: 7 });
        assert_eq!(surface.row(1), Some(&bytes[8..16]));
        assert_eq!(surface.row(2), None);
    }
}
