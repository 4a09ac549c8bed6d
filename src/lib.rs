// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture sessions
//!
//! This library opens video capture devices, keeps the newest decoded frame
//! in a lock-free double buffer (CPU surfaces) or in a pair of textures shared
//! with the renderer (GPU path), and reports device and stream events as
//! signals on the consumer's control thread.
//!
//! # Architecture
//!
//! - [`backends`]: Capture backend abstraction, device registry, controls and hot-plug
//! - [`gpu`]: GPU interop context and shared textures
//! - [`session`]: Per-device capture state machine and frame buffers
//! - [`capture`]: Public facade ([`CaptureContext`], [`Capture`])
//! - [`config`]: Persisted capture defaults
//!
//! # Example
//!
//! ```
//! use camera_session::backends::camera::virtual_backend::VirtualBackend;
//! use camera_session::gpu::virtual_gpu::VirtualGpu;
//! use camera_session::{Capture, CaptureContext, Format};
//! use std::sync::Arc;
//!
//! let backend = Arc::new(VirtualBackend::new());
//! backend.add_device("Front Camera");
//! let context = CaptureContext::new(backend, Arc::new(VirtualGpu::new()));
//!
//! let capture = Capture::new(&context, Format::new().hardware_accelerated(false));
//! assert!(capture.is_valid());
//! ```

pub mod backends;
pub mod capture;
pub mod config;
pub mod constants;
pub mod dispatch;
pub mod errors;
pub mod gpu;
pub mod logging;
pub mod session;
pub mod signal;

// Re-export commonly used types
pub use backends::camera::types::{
    Bgra8, Bounds, DeviceDescriptor, DeviceProfile, Format, FrameSize, Framerate, OcclusionState,
    PixelSurface, Rotation,
};
pub use backends::camera::{Control, ControlKind};
pub use capture::{Capture, CaptureContext};
pub use config::CaptureConfig;
pub use dispatch::MainQueue;
pub use errors::{BackendError, ConfigError, InteropError, SessionError};
pub use gpu::FrameLease;
pub use logging::init_logging;
pub use session::{FrameStats, SessionState};
pub use signal::{Connection, Signal};

/// Crate version with the git revision it was built from
pub fn version() -> &'static str {
    env!("CAMERA_SESSION_GIT_VERSION")
}
