// SPDX-License-Identifier: GPL-3.0-only

//! Error types for capture sessions
//!
//! None of these ever cross into the consumer's frame loop: construction
//! failures are recorded on the session and queried through
//! [`Capture::construction_error`](crate::Capture::construction_error), while
//! runtime failures arrive as signals.

use thiserror::Error;

/// Result type for capture backend calls
pub type BackendResult<T> = Result<T, BackendError>;

/// Result type for GPU interop calls
pub type InteropResult<T> = Result<T, InteropError>;

/// Failures reported by a [`CaptureBackend`](crate::backends::camera::CaptureBackend)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// The backend (or one of its optional capabilities) is not available
    #[error("Backend not available: {0}")]
    NotAvailable(String),
    /// No device matches the requested identifier
    #[error("Device not found: {0}")]
    DeviceNotFound(String),
    /// The platform returned a failure status
    #[error("Backend call failed with status {status:#010x}: {context}")]
    Status { context: String, status: i32 },
    /// A camera property could not be read or written
    #[error("Property {set:?}/{id} failed: {reason}")]
    Property {
        set: crate::backends::camera::PropertySet,
        id: u32,
        reason: String,
    },
    /// The engine object was already released
    #[error("Capture engine released")]
    EngineReleased,
    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Convenience constructor for status failures
    pub fn status(context: impl Into<String>, status: i32) -> Self {
        BackendError::Status {
            context: context.into(),
            status,
        }
    }

    /// Status code to report through the `Error` signal
    pub fn status_code(&self) -> i32 {
        match self {
            BackendError::Status { status, .. } => *status,
            _ => crate::constants::status::FAIL,
        }
    }
}

/// Failures from a [`GpuInteropBackend`](crate::gpu::GpuInteropBackend)
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InteropError {
    /// GPU device creation failed
    #[error("Failed to create GPU device: {0}")]
    DeviceCreation(String),
    /// The device manager could not be created or bound to the device
    #[error("Failed to create device manager: {0}")]
    DeviceManager(String),
    /// The render-side interop handle could not be opened
    #[error("Failed to open interop handle: {0}")]
    InteropUnavailable(String),
    /// Texture creation or registration failed
    #[error("Texture allocation failed: {0}")]
    Texture(String),
    /// A GPU copy failed
    #[error("GPU copy failed: {0}")]
    Copy(String),
    /// The context was used before a successful initialization
    #[error("Interop context is not initialized")]
    NotInitialized,
}

/// Reasons a capture session failed to construct
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The requested device is not present
    #[error("Capture device not found: {0}")]
    DeviceNotFound(String),
    /// No capture devices are present at all
    #[error("No capture devices available")]
    NoDevices,
    /// Opening the device failed
    #[error("Failed to open capture device: {0}")]
    DeviceOpen(#[source] BackendError),
    /// The backend refused to create a capture engine
    #[error("Failed to create capture engine: {0}")]
    EngineCreation(#[source] BackendError),
    /// Hardware acceleration was requested but the interop context is invalid
    #[error("GPU interop unavailable: {0}")]
    Interop(#[source] InteropError),
    /// One of the two shared textures could not be allocated
    #[error("Failed to allocate shared textures for {width}x{height}")]
    TextureAllocation { width: u32, height: u32 },
}

/// Configuration loading and saving failures
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No per-user configuration directory exists on this platform
    #[error("No configuration directory available")]
    NoConfigDir,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Json(#[from] serde_json::Error),
    /// A stored value is outside the accepted domain
    #[error("Invalid value for {field}: {value}")]
    InvalidValue { field: &'static str, value: String },
}
