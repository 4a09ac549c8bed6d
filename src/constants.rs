// SPDX-License-Identifier: GPL-3.0-only

//! Crate-wide constants

use std::time::Duration;

/// Default capture width when a format does not specify one
pub const DEFAULT_WIDTH: u32 = 640;
/// Default capture height when a format does not specify one
pub const DEFAULT_HEIGHT: u32 = 480;
/// Default frame rate numerator
pub const DEFAULT_FPS_NUM: u32 = 30;
/// Default frame rate denominator
pub const DEFAULT_FPS_DENOM: u32 = 1;

/// Bytes per pixel of the preview stream (32-bit BGRA / BGRX)
pub const BYTES_PER_PIXEL: usize = 4;

/// Number of frame slots per representation (read + write)
pub const SLOT_COUNT: usize = 2;

/// Name shown for devices whose friendly name cannot be read
pub const UNKNOWN_DEVICE_NAME: &str = "<Unknown Device>";

/// Name of the background worker that handles device arrival/removal
pub const HOTPLUG_WORKER_NAME: &str = "camera-hotplug";

/// How long the hot-plug worker waits for a notification before re-checking its stop signal
pub const HOTPLUG_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Directory name used under the platform configuration directory
pub const CONFIG_DIR_NAME: &str = "camera-session";
/// Configuration file name
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Default `tracing` filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Backend status codes understood by the session.
///
/// Backends translate their native failures into these values; anything else
/// is forwarded untouched through the `Error` signal.
pub mod status {
    /// The capture device was unplugged or claimed by another process
    pub const DEVICE_INVALIDATED: i32 = 0xC00D_4E23_u32 as i32;
    /// Generic unspecified failure
    pub const FAIL: i32 = 0x8000_4005_u32 as i32;
    /// The hardware is busy (commonly: camera in use elsewhere)
    pub const HARDWARE_BUSY: i32 = 0xC00D_3EA2_u32 as i32;
}
