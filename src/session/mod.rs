// SPDX-License-Identifier: GPL-3.0-only

//! Capture session state machine
//!
//! A session binds one device to one capture engine and owns the double
//! buffer the engine's samples land in. Engine callbacks arrive on backend
//! threads; anything consumer-visible they cause (signals, state resets after
//! a device loss) is posted to the main queue instead of being done in place.
//!
//! ```text
//! Constructing ──engine created──▶ Initializing ──Initialized──▶ Ready
//!                                                                 │
//!                     ┌────────────── start() ◀──────────────────┘
//!                     ▼
//!                  Started ◀──start()── Stopped
//!                     └──────stop()──────▶ ┘
//!
//! Ready | Started | Stopped ──device lost──▶ Invalidated
//! any ──drop──▶ Destroyed
//! ```

mod buffers;
mod callbacks;

use crate::backends::camera::controls::discover_controls;
use crate::backends::camera::types::{
    EngineConfig, EngineEvent, Format, OcclusionState, PixelSurface, PropertyKey, StreamConfig,
};
use crate::backends::camera::{
    CaptureEngine, CaptureSample, Control, DeviceHandle, EngineCallbacks,
};
use crate::capture::CaptureContext;
use crate::constants::status::DEVICE_INVALIDATED;
use crate::dispatch::QueueHandle;
use crate::errors::{BackendError, BackendResult, InteropError, SessionError};
use crate::gpu::{FrameLease, InteropSession};
use crate::signal::Signal;
use buffers::{SurfaceSlots, TextureSlots};
use callbacks::SessionCallbacks;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Not yet bound to an engine (also the state of a failed construction)
    Constructing,
    /// Waiting for the engine to report initialization
    Initializing,
    /// Initialized and configured, not streaming
    Ready,
    Started,
    Stopped,
    /// The device went away; only destruction remains
    Invalidated,
    Destroyed,
}

/// Notifications a session raises on the main queue
#[derive(Default)]
pub(crate) struct CaptureSignals {
    pub(crate) initialize: Signal<()>,
    pub(crate) start: Signal<()>,
    pub(crate) stop: Signal<()>,
    pub(crate) device_lost: Signal<()>,
    pub(crate) error: Signal<i32>,
    pub(crate) control_changed: Signal<Arc<Control>>,
    pub(crate) occlusion_changed: Signal<OcclusionState>,
}

/// Frame counters since construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameStats {
    /// Samples copied into a slot and published
    pub written: u64,
    /// Samples dropped (renderer held the slot, no usable buffer)
    pub skipped: u64,
}

#[derive(Debug)]
enum FrameStore {
    Cpu(SurfaceSlots),
    Gpu(TextureSlots),
    Empty,
}

/// Resources acquired before the engine exists
struct Prepared {
    device: Arc<dyn DeviceHandle>,
    controls: Vec<Arc<Control>>,
    frames: FrameStore,
    engine_config: EngineConfig,
}

pub(crate) struct SessionInner {
    format: Format,
    state: Mutex<SessionState>,
    initialized: AtomicBool,
    started: AtomicBool,
    /// Set on the backend thread as soon as the device is lost
    invalidated: AtomicBool,
    destroyed: AtomicBool,
    has_new_frame: AtomicBool,
    /// `Initialized` arrived before the engine was stored
    init_pending: AtomicBool,
    engine: Mutex<Option<Box<dyn CaptureEngine>>>,
    frames_written: AtomicU64,
    frames_skipped: AtomicU64,
    signals: CaptureSignals,
    queue: QueueHandle,
    controls: Vec<Arc<Control>>,
    // Drop order: frame slots, then the device, then the interop count
    frames: FrameStore,
    device: Option<Arc<dyn DeviceHandle>>,
    _interop: InteropSession,
}

impl SessionInner {
    fn new(
        format: Format,
        prepared: Option<Prepared>,
        queue: QueueHandle,
        interop: InteropSession,
    ) -> Self {
        let (device, controls, frames) = match prepared {
            Some(p) => (Some(p.device), p.controls, p.frames),
            None => (None, Vec::new(), FrameStore::Empty),
        };
        Self {
            format,
            state: Mutex::new(SessionState::Constructing),
            initialized: AtomicBool::new(false),
            started: AtomicBool::new(false),
            invalidated: AtomicBool::new(false),
            destroyed: AtomicBool::new(false),
            has_new_frame: AtomicBool::new(false),
            init_pending: AtomicBool::new(false),
            engine: Mutex::new(None),
            frames_written: AtomicU64::new(0),
            frames_skipped: AtomicU64::new(0),
            signals: CaptureSignals::default(),
            queue,
            controls,
            frames,
            device,
            _interop: interop,
        }
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    fn set_state(&self, next: SessionState) {
        let mut state = self.state.lock();
        if *state != SessionState::Destroyed {
            *state = next;
        }
    }

    fn with_engine<T>(
        &self,
        f: impl FnOnce(&dyn CaptureEngine) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let engine = self.engine.lock();
        match engine.as_deref() {
            Some(engine) => f(engine),
            None => Err(BackendError::EngineReleased),
        }
    }

    /// Run `f` on the main queue if the session still exists then
    fn post<F>(self: &Arc<Self>, f: F)
    where
        F: FnOnce(&SessionInner) + Send + 'static,
    {
        let session = Arc::downgrade(self);
        self.queue.dispatch(move || {
            let Some(session) = session.upgrade() else {
                return;
            };
            if !session.is_destroyed() {
                f(&session);
            }
        });
    }

    fn install_engine(self: &Arc<Self>, engine: Box<dyn CaptureEngine>) {
        {
            let mut slot = self.engine.lock();
            *slot = Some(engine);
            self.set_state(SessionState::Initializing);
        }
        if self.init_pending.swap(false, Ordering::AcqRel) {
            debug!("Engine initialized before it was stored, handling now");
            self.handle_initialized();
        }
    }

    // ===== Consumer thread =====

    fn start(&self) {
        if self.invalidated.load(Ordering::Acquire) {
            debug!("Start ignored, device was lost");
            return;
        }
        if !self.initialized.load(Ordering::Acquire) {
            debug!("Start ignored, engine not initialized");
            return;
        }
        if self.started.swap(true, Ordering::AcqRel) {
            return;
        }

        match self.with_engine(|engine| engine.start_preview()) {
            Ok(()) => {
                info!(device = %self.format.device, "Preview start requested");
                self.set_state(SessionState::Started);
            }
            Err(e) => {
                warn!(error = %e, "Failed to start preview");
                self.started.store(false, Ordering::Release);
            }
        }
    }

    fn stop(&self) {
        if self.invalidated.load(Ordering::Acquire) {
            debug!("Stop ignored, device was lost");
            return;
        }
        if !self.started.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Err(e) = self.with_engine(|engine| engine.stop_preview()) {
            warn!(error = %e, "Failed to stop preview");
        }
        info!(device = %self.format.device, "Preview stop requested");
        self.set_state(SessionState::Stopped);
    }

    fn destroy(&self) {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        *self.state.lock() = SessionState::Destroyed;

        let was_streaming = self.started.swap(false, Ordering::AcqRel)
            && !self.invalidated.load(Ordering::Acquire);
        self.initialized.store(false, Ordering::Release);
        self.has_new_frame.store(false, Ordering::Release);

        let engine = self.engine.lock().take();
        if let Some(engine) = engine {
            if was_streaming && let Err(e) = engine.stop_preview() {
                debug!(error = %e, "Failed to stop preview during teardown");
            }
            // Dropped outside the lock; the engine joins its own threads
            drop(engine);
        }
        debug!(device = %self.format.device, "Capture session destroyed");
    }

    // ===== Backend threads =====

    fn handle_event(self: &Arc<Self>, event: EngineEvent) {
        match event {
            EngineEvent::Initialized => self.handle_initialized(),
            EngineEvent::PreviewStarted => {
                debug!("Preview started");
                self.post(|session| session.signals.start.emit(&()));
            }
            EngineEvent::PreviewStopped => {
                debug!("Preview stopped");
                self.post(|session| session.signals.stop.emit(&()));
            }
            EngineEvent::Error { status } if status == DEVICE_INVALIDATED => {
                self.handle_device_lost();
            }
            EngineEvent::Error { status } => {
                warn!(status = format_args!("{status:#010x}"), "Capture engine error");
                self.post(move |session| session.signals.error.emit(&status));
            }
            EngineEvent::Occlusion(occlusion) => {
                debug!(?occlusion, "Camera occlusion changed");
                self.post(move |session| session.signals.occlusion_changed.emit(&occlusion));
            }
            EngineEvent::Unhandled(name) => {
                debug!(event = %name, "Unhandled capture engine event");
            }
        }
    }

    fn handle_initialized(self: &Arc<Self>) {
        if self.is_destroyed() || self.invalidated.load(Ordering::Acquire) {
            return;
        }

        let configured = {
            let engine = self.engine.lock();
            let Some(engine) = engine.as_deref() else {
                // Set under the engine lock so install_engine cannot miss it
                self.init_pending.store(true, Ordering::Release);
                return;
            };
            engine.configure_preview(&StreamConfig::from(&self.format))
        };

        if let Err(e) = configured {
            warn!(error = %e, "Failed to configure preview stream");
            let status = e.status_code();
            self.post(move |session| session.signals.error.emit(&status));
            return;
        }

        self.initialized.store(true, Ordering::Release);
        self.set_state(SessionState::Ready);
        info!(device = %self.format.device, format = %self.format, "Capture engine initialized");
        self.post(|session| session.signals.initialize.emit(&()));

        if self.format.auto_start {
            self.start();
        }
    }

    fn handle_device_lost(self: &Arc<Self>) {
        // Latched here so a stop() racing the queued reset is already a no-op
        if self.invalidated.swap(true, Ordering::AcqRel) {
            return;
        }
        warn!(device = %self.format.device, "Capture device lost");

        self.post(|session| {
            session.initialized.store(false, Ordering::Release);
            session.started.store(false, Ordering::Release);
            session.set_state(SessionState::Invalidated);
            session.signals.device_lost.emit(&());
        });
    }

    fn handle_sample(&self, sample: &dyn CaptureSample) {
        if self.is_destroyed() {
            return;
        }

        let written = match &self.frames {
            FrameStore::Gpu(slots) => match sample.gpu_texture() {
                Some(texture) => slots.write(texture),
                None => {
                    trace!("Sample has no GPU buffer, skipping");
                    false
                }
            },
            FrameStore::Cpu(slots) => match sample.contiguous_bytes() {
                Ok(bytes) => {
                    slots.write(bytes);
                    true
                }
                Err(e) => {
                    trace!(error = %e, "Sample buffer unavailable, skipping");
                    false
                }
            },
            FrameStore::Empty => false,
        };

        if written {
            self.frames_written.fetch_add(1, Ordering::Relaxed);
            self.has_new_frame.store(true, Ordering::Release);
        } else {
            self.frames_skipped.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn handle_control_changed(self: &Arc<Self>, key: PropertyKey) {
        let Some(control) = self.controls.iter().find(|c| c.key() == key).cloned() else {
            debug!(?key, "Change notification for an untracked property");
            return;
        };
        let value = control.load_value();
        debug!(control = %control.name(), value, "Control changed on device");
        self.post(move |session| session.signals.control_changed.emit(&control));
    }

    fn handle_control_error(self: &Arc<Self>, status: i32) {
        warn!(status = format_args!("{status:#010x}"), "Control notification error");
        self.post(move |session| session.signals.error.emit(&status));
    }
}

/// One device bound to one capture engine
///
/// Dropping the session releases the engine first, then the frame slots,
/// then its hold on the shared interop context.
pub struct CaptureSession {
    inner: Arc<SessionInner>,
    error: Option<SessionError>,
}

impl CaptureSession {
    /// Open `format.device` and create its engine.
    ///
    /// Never fails outright: a session that could not be constructed is
    /// returned invalid, with the reason in [`error`](Self::error).
    pub(crate) fn open(context: &CaptureContext, format: Format) -> Self {
        let interop = context.interop().register_session();
        info!(device = %format.device, format = %format, "Opening capture session");

        let (prepared, mut error) = match Self::prepare(context, &format) {
            Ok(prepared) => (Some(prepared), None),
            Err(e) => (None, Some(e)),
        };
        let engine_config = prepared.as_ref().map(|p| p.engine_config);
        let inner = Arc::new(SessionInner::new(
            format,
            prepared,
            context.queue().handle(),
            interop,
        ));

        if let (Some(config), Some(device)) = (engine_config, inner.device.as_ref()) {
            let callbacks: Arc<dyn EngineCallbacks> =
                Arc::new(SessionCallbacks::new(Arc::downgrade(&inner)));
            match context.backend().create_engine(callbacks, &config, device) {
                Ok(engine) => {
                    if let Err(e) = engine.monitor_occlusion() {
                        debug!(error = %e, "Occlusion monitoring unavailable");
                    }
                    inner.install_engine(engine);
                }
                Err(e) => error = Some(SessionError::EngineCreation(e)),
            }
        }

        if let Some(e) = &error {
            error!(device = %inner.format.device, error = %e, "Capture session is invalid");
        }
        Self { inner, error }
    }

    fn prepare(context: &CaptureContext, format: &Format) -> Result<Prepared, SessionError> {
        if format.device.is_unset() {
            return Err(SessionError::NoDevices);
        }
        if context.registry().find(&format.device.id).is_none() {
            return Err(SessionError::DeviceNotFound(format.device.id.clone()));
        }

        let device = context
            .backend()
            .open_device(&format.device.id)
            .map_err(SessionError::DeviceOpen)?;
        let controls = discover_controls(&device);

        let (frames, device_manager) = if format.hardware_accelerated {
            let interop = context.interop();
            interop.initialize(format).map_err(SessionError::Interop)?;

            let allocation_failed = |e: InteropError| {
                warn!(error = %e, size = %format.size, "Shared texture allocation failed");
                SessionError::TextureAllocation {
                    width: format.size.width,
                    height: format.size.height,
                }
            };
            let first = interop
                .create_shared_texture(format.size)
                .map_err(allocation_failed)?;
            let second = interop
                .create_shared_texture(format.size)
                .map_err(allocation_failed)?;

            (
                FrameStore::Gpu(TextureSlots::new([first, second])),
                interop.device_manager(),
            )
        } else {
            (FrameStore::Cpu(SurfaceSlots::new(format.size)), None)
        };

        Ok(Prepared {
            device,
            controls,
            frames,
            engine_config: EngineConfig {
                use_video_device_only: true,
                disable_hardware_transforms: !format.hardware_accelerated,
                device_manager,
            },
        })
    }

    pub fn is_valid(&self) -> bool {
        self.error.is_none()
    }

    /// Why construction failed, if it did
    pub fn error(&self) -> Option<&SessionError> {
        self.error.as_ref()
    }

    pub fn format(&self) -> &Format {
        &self.inner.format
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn is_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        !self.is_started()
    }

    /// Request streaming. Ignored unless initialized, not started and the
    /// device is still present.
    pub fn start(&self) {
        self.inner.start();
    }

    /// Request the stream to stop. Ignored unless started.
    pub fn stop(&self) {
        self.inner.stop();
    }

    pub fn check_new_frame(&self) -> bool {
        self.inner.has_new_frame.load(Ordering::Acquire)
    }

    /// Clear the new-frame flag and return the newest CPU frame
    pub fn surface(&self) -> Option<Arc<PixelSurface>> {
        self.inner.has_new_frame.swap(false, Ordering::AcqRel);
        match &self.inner.frames {
            FrameStore::Cpu(slots) => slots.read(),
            _ => None,
        }
    }

    /// Clear the new-frame flag and lock the newest GPU frame for rendering
    pub fn texture(&self) -> FrameLease<'_> {
        self.inner.has_new_frame.swap(false, Ordering::AcqRel);
        match &self.inner.frames {
            FrameStore::Gpu(slots) => slots.lease(),
            _ => FrameLease::invalid(),
        }
    }

    pub fn controls(&self) -> &[Arc<Control>] {
        &self.inner.controls
    }

    pub fn frame_stats(&self) -> FrameStats {
        FrameStats {
            written: self.inner.frames_written.load(Ordering::Relaxed),
            skipped: self.inner.frames_skipped.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn signals(&self) -> &CaptureSignals {
        &self.inner.signals
    }
}

impl Drop for CaptureSession {
    fn drop(&mut self) {
        self.inner.destroy();
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("format", &self.inner.format)
            .field("state", &self.state())
            .field("error", &self.error)
            .field("frames", &self.inner.frames)
            .finish()
    }
}
