// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for capture sessions against the virtual backends

use camera_session::backends::camera::PropertyRange;
use camera_session::backends::camera::virtual_backend::{EngineProbe, VirtualBackend, VirtualProperty};
use camera_session::constants::status;
use camera_session::gpu::virtual_gpu::VirtualGpu;
use camera_session::{
    BackendError, Bounds, Capture, CaptureContext, ControlKind, DeviceDescriptor, Format,
    OcclusionState, SessionError, SessionState, Signal,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

struct Rig {
    backend: Arc<VirtualBackend>,
    gpu: Arc<VirtualGpu>,
    context: CaptureContext,
    device: DeviceDescriptor,
}

fn rig() -> Rig {
    let backend = Arc::new(VirtualBackend::new());
    let gpu = Arc::new(VirtualGpu::new());
    let device = backend.add_device("Integrated Camera");
    let context = CaptureContext::new(backend.clone(), gpu.clone());
    Rig {
        backend,
        gpu,
        context,
        device,
    }
}

impl Rig {
    fn software(&self) -> Format {
        Format::new()
            .device(self.device.clone())
            .hardware_accelerated(false)
    }

    fn hardware(&self) -> Format {
        Format::new().device(self.device.clone())
    }

    fn probe(&self) -> EngineProbe {
        self.backend.last_engine().expect("an engine was created")
    }
}

fn count<T: 'static>(signal: &Signal<T>) -> Arc<AtomicUsize> {
    let counter = Arc::new(AtomicUsize::new(0));
    let c = Arc::clone(&counter);
    signal.connect(move |_| {
        c.fetch_add(1, Ordering::SeqCst);
    });
    counter
}

fn record<T: Clone + Send + 'static>(signal: &Signal<T>) -> Arc<Mutex<Vec<T>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&seen);
    signal.connect(move |value: &T| s.lock().unwrap().push(value.clone()));
    seen
}

#[test]
fn test_hardware_capture_auto_starts_and_shares_frames() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.hardware().size(1280, 720).fps(60));
    assert!(capture.is_valid(), "{:?}", capture.construction_error());
    assert_eq!(capture.state(), SessionState::Initializing);
    assert_eq!(capture.bounds(), Bounds { x: 0, y: 0, width: 1280, height: 720 });

    let probe = rig.probe();
    let config = probe.config();
    assert!(config.use_video_device_only);
    assert!(!config.disable_hardware_transforms);
    assert!(config.device_manager.is_some(), "Hardware engines decode into the shared device");
    assert!(rig.gpu.all_devices_protected());

    let initialized = count(capture.on_initialize());
    let started = count(capture.on_start());

    probe.initialize();
    assert_eq!(capture.state(), SessionState::Started);
    assert!(probe.is_previewing());
    assert_eq!(initialized.load(Ordering::SeqCst), 0, "Signals wait for the main queue");
    let stream = probe.stream_config().unwrap();
    assert_eq!((stream.size.width, stream.size.height), (1280, 720));
    assert_eq!((stream.framerate.num, stream.framerate.denom), (60, 1));

    rig.context.run_pending();
    assert_eq!(initialized.load(Ordering::SeqCst), 1);
    assert_eq!(started.load(Ordering::SeqCst), 1);

    let source = rig.gpu.create_source_texture(42);
    assert!(probe.deliver_gpu_frame(source));
    assert!(capture.check_new_frame());

    let lease = capture.get_texture();
    assert!(lease.is_valid());
    assert!(!capture.check_new_frame(), "Taking the texture clears the flag");
    let render = lease.texture().expect("valid lease carries a texture");
    assert_eq!(rig.gpu.render_content(render), Some(42));
    assert_eq!(rig.gpu.locked_textures(), 1);
    drop(lease);
    assert_eq!(rig.gpu.locked_textures(), 0);
}

#[test]
fn test_texture_held_by_renderer_is_not_overwritten() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.hardware());
    let probe = rig.probe();
    probe.initialize();

    probe.deliver_gpu_frame(rig.gpu.create_source_texture(1));
    let lease = capture.get_texture();
    let held = lease.texture().unwrap();

    // The other slot takes the next frame, after which both are busy
    probe.deliver_gpu_frame(rig.gpu.create_source_texture(2));
    probe.deliver_gpu_frame(rig.gpu.create_source_texture(3));
    assert_eq!(rig.gpu.render_content(held), Some(1));
    assert_eq!(capture.frame_stats().written, 2);
    assert_eq!(capture.frame_stats().skipped, 1);

    drop(lease);
    let lease = capture.get_texture();
    assert_eq!(rig.gpu.render_content(lease.texture().unwrap()), Some(2));
}

#[test]
fn test_texture_before_first_frame_is_invalid() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.hardware());
    rig.probe().initialize();

    let lease = capture.get_texture();
    assert!(!lease.is_valid());
    assert!(lease.texture().is_none());
}

#[test]
fn test_software_capture_delivers_surfaces() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software().size(1280, 720));
    assert!(capture.is_valid());

    let probe = rig.probe();
    assert!(probe.config().disable_hardware_transforms);
    assert_eq!(probe.config().device_manager, None);
    assert_eq!(rig.gpu.live_devices(), 0, "Software sessions never touch the GPU");

    probe.initialize();
    let stream = probe.stream_config().expect("configured on initialize");
    assert_eq!((stream.size.width, stream.size.height), (1280, 720));

    assert!(probe.deliver_frame(&vec![7u8; 1280 * 720 * 4]));
    assert!(capture.check_new_frame());

    let surface = capture.get_surface().expect("a frame was delivered");
    assert_eq!((surface.width(), surface.height()), (1280, 720));
    assert!(surface.data().iter().all(|&b| b == 7));
    assert!(!capture.get_texture().is_valid(), "Software captures have no textures");
}

#[test]
fn test_new_frame_flag_clears_on_read() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software().size(4, 4));
    let probe = rig.probe();
    probe.initialize();

    assert!(!capture.check_new_frame());
    assert!(capture.get_surface().is_none());

    probe.deliver_frame(&[9; 64]);
    assert!(capture.check_new_frame());
    let first = capture.get_surface().unwrap();
    assert!(!capture.check_new_frame());

    // Reading again without a new frame returns the same content
    let again = capture.get_surface().unwrap();
    assert_eq!(first.data(), again.data());
    assert!(!capture.check_new_frame());
}

#[test]
fn test_samples_without_a_buffer_are_skipped() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software().size(4, 4));
    let probe = rig.probe();
    probe.initialize();

    assert!(probe.deliver_empty_sample());
    assert!(!capture.check_new_frame());
    assert_eq!(capture.frame_stats().skipped, 1);
    assert_eq!(capture.frame_stats().written, 0);
}

#[test]
fn test_start_and_stop_are_idempotent() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software().auto_start(false));
    let probe = rig.probe();

    capture.start();
    assert_eq!(probe.start_calls(), 0, "Start before initialization is ignored");

    probe.initialize();
    assert_eq!(capture.state(), SessionState::Ready);
    assert!(capture.is_stopped());

    capture.start();
    capture.start();
    assert_eq!(probe.start_calls(), 1);
    assert!(capture.is_started());

    capture.stop();
    capture.stop();
    assert_eq!(probe.stop_calls(), 1);
    assert_eq!(capture.state(), SessionState::Stopped);

    capture.start();
    assert_eq!(probe.start_calls(), 2);
    assert_eq!(capture.state(), SessionState::Started);
}

#[test]
fn test_failed_start_can_be_retried() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software().auto_start(false));
    let probe = rig.probe();
    probe.initialize();

    probe.fail_start(Some(status::HARDWARE_BUSY));
    capture.start();
    assert!(capture.is_stopped());

    probe.fail_start(None);
    capture.start();
    assert!(capture.is_started());
    assert_eq!(probe.start_calls(), 2);
}

#[test]
fn test_device_lost_while_started() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software());
    let probe = rig.probe();
    probe.initialize();
    rig.context.run_pending();

    let lost = count(capture.on_device_lost());
    let stopped = count(capture.on_stop());
    probe.invalidate_device();

    // Before the queued reset runs, stop must already be a no-op
    capture.stop();
    assert_eq!(probe.stop_calls(), 0);
    assert_eq!(lost.load(Ordering::SeqCst), 0);

    rig.context.run_pending();
    assert_eq!(lost.load(Ordering::SeqCst), 1);
    assert_eq!(capture.state(), SessionState::Invalidated);
    assert!(capture.is_stopped());
    assert_eq!(stopped.load(Ordering::SeqCst), 0, "No Stop after a lost device");

    capture.start();
    assert_eq!(probe.start_calls(), 1, "Invalidated sessions cannot restart");

    // Repeated loss notifications are reported once
    probe.invalidate_device();
    rig.context.run_pending();
    assert_eq!(lost.load(Ordering::SeqCst), 1);
}

#[test]
fn test_device_lost_handler_can_drop_capture_next_cycle() {
    let rig = rig();
    let slot = Arc::new(Mutex::new(Some(Capture::new(&rig.context, rig.software()))));
    let probe = rig.probe();
    probe.initialize();

    let queue = rig.context.queue().handle();
    let target = Arc::clone(&slot);
    slot.lock().unwrap().as_ref().unwrap().on_device_lost().connect(move |_| {
        let target = Arc::clone(&target);
        queue.dispatch(move || {
            target.lock().unwrap().take();
        });
    });

    probe.invalidate_device();
    rig.context.run_pending();
    assert!(slot.lock().unwrap().is_some(), "Teardown waits for the next cycle");
    assert!(!probe.is_released());

    rig.context.run_pending();
    assert!(slot.lock().unwrap().is_none());
    assert!(probe.is_released());
    assert_eq!(probe.stop_calls(), 0, "Dropping a lost capture must not stop the engine");
}

#[test]
fn test_handler_may_drop_its_capture() {
    let rig = rig();
    let slot = Arc::new(Mutex::new(Some(Capture::new(&rig.context, rig.software()))));
    let probe = rig.probe();

    let target = Arc::clone(&slot);
    slot.lock().unwrap().as_ref().unwrap().on_error().connect(move |_| {
        target.lock().unwrap().take();
    });

    probe.report_error(status::HARDWARE_BUSY);
    probe.report_error(status::FAIL);
    rig.context.run_pending();

    assert!(slot.lock().unwrap().is_none());
    assert!(probe.is_released());
}

#[test]
fn test_notifications_after_drop_are_discarded() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software());
    let probe = rig.probe();
    let errors = count(capture.on_error());

    probe.initialize();
    probe.report_error(status::HARDWARE_BUSY);
    drop(capture);

    assert!(probe.is_released());
    rig.context.run_pending();
    assert_eq!(errors.load(Ordering::SeqCst), 0);
    assert!(!probe.report_error(status::FAIL), "Released engines go quiet");
}

#[test]
fn test_drop_stops_streaming_capture() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software());
    let probe = rig.probe();
    probe.initialize();
    assert!(probe.is_previewing());

    drop(capture);
    assert_eq!(probe.stop_calls(), 1);
    assert!(probe.is_released());
    assert!(!probe.is_previewing());
}

#[test]
fn test_initialized_during_engine_creation() {
    let rig = rig();
    rig.backend.set_initialize_on_create(true);

    let capture = Capture::new(&rig.context, rig.software());
    let initialized = count(capture.on_initialize());
    assert_eq!(capture.state(), SessionState::Started);
    assert!(rig.probe().stream_config().is_some());

    rig.context.run_pending();
    assert_eq!(initialized.load(Ordering::SeqCst), 1);
}

#[test]
fn test_configure_failure_reports_error() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software());
    let probe = rig.probe();
    let errors = record(capture.on_error());
    let initialized = count(capture.on_initialize());

    probe.fail_configure(true);
    probe.initialize();
    rig.context.run_pending();

    assert_eq!(*errors.lock().unwrap(), vec![status::FAIL]);
    assert_eq!(initialized.load(Ordering::SeqCst), 0);
    assert_eq!(capture.state(), SessionState::Initializing);
    capture.start();
    assert_eq!(probe.start_calls(), 0);
}

#[test]
fn test_engine_errors_are_forwarded() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software());
    let probe = rig.probe();
    let errors = record(capture.on_error());

    probe.report_error(status::HARDWARE_BUSY);
    probe.report_control_error(status::FAIL);
    rig.context.run_pending();

    assert_eq!(*errors.lock().unwrap(), vec![status::HARDWARE_BUSY, status::FAIL]);
    assert_ne!(capture.state(), SessionState::Invalidated);
}

#[test]
fn test_occlusion_changes_need_a_sensor() {
    let rig = rig();
    let plain = Capture::new(&rig.context, rig.software());
    let plain_probe = rig.probe();
    assert!(!plain_probe.is_monitoring_occlusion());
    assert!(!plain_probe.set_occlusion(OcclusionState::OccludedByHardware));

    rig.backend.set_occlusion_sensor(true);
    let covered = Capture::new(&rig.context, rig.software());
    let probe = rig.probe();
    assert!(probe.is_monitoring_occlusion());

    let seen = record(covered.on_occlusion_changed());
    let plain_seen = record(plain.on_occlusion_changed());
    probe.set_occlusion(OcclusionState::OccludedBySoftCover);
    probe.set_occlusion(OcclusionState::Open);
    rig.context.run_pending();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![OcclusionState::OccludedBySoftCover, OcclusionState::Open]
    );
    assert!(plain_seen.lock().unwrap().is_empty());
}

#[test]
fn test_controls_exclude_unsupported_properties() {
    let rig = rig();
    let range = PropertyRange { min: 0, max: 255, step: 1 };
    rig.backend.set_property(
        &rig.device.id,
        ControlKind::Brightness.key(),
        VirtualProperty::new(range, 128),
    );
    rig.backend.set_property(
        &rig.device.id,
        ControlKind::Zoom.key(),
        VirtualProperty::new(PropertyRange { min: 100, max: 400, step: 10 }, 100),
    );

    let capture = Capture::new(&rig.context, rig.software());
    let names: Vec<_> = capture.controls().iter().map(|c| c.name()).collect();
    assert_eq!(names, vec!["Brightness", "Zoom"]);
    assert!(capture.control("Hue").is_none());

    let brightness = capture.control("Brightness").unwrap();
    assert_eq!(brightness.value(), 128);
    assert_eq!(brightness.set_value(200), Ok(200));
    assert_eq!(
        rig.backend.property(&rig.device.id, ControlKind::Brightness.key()).unwrap().value,
        200
    );
}

#[test]
fn test_external_control_change_is_signalled() {
    let rig = rig();
    let key = ControlKind::Focus.key();
    rig.backend.set_property(
        &rig.device.id,
        key,
        VirtualProperty::new(PropertyRange { min: 0, max: 1023, step: 1 }, 0),
    );
    let capture = Capture::new(&rig.context, rig.software());
    let probe = rig.probe();

    let changed = Arc::new(Mutex::new(Vec::new()));
    let c = Arc::clone(&changed);
    capture.on_control_changed().connect(move |control| {
        c.lock().unwrap().push((control.kind(), control.value()));
    });

    rig.backend.change_property_externally(&rig.device.id, key, 512);
    probe.notify_control_changed(key);
    probe.notify_control_changed(ControlKind::Gamma.key());
    rig.context.run_pending();

    assert_eq!(*changed.lock().unwrap(), vec![(ControlKind::Focus, 512)]);
}

#[test]
fn test_streaming_frames_are_never_torn() {
    let rig = rig();
    let capture = Capture::new(&rig.context, rig.software().size(64, 48));
    let probe = rig.probe();
    probe.initialize();

    let frame_bytes = 64 * 48 * 4;
    probe
        .start_streaming(Duration::from_millis(1), move |n| {
            vec![(n % 251) as u8; frame_bytes]
        })
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    let mut frames_seen = 0;
    while frames_seen < 50 && Instant::now() < deadline {
        if capture.check_new_frame() {
            let surface = capture.get_surface().unwrap();
            let data = surface.data();
            assert_eq!(data.len(), frame_bytes);
            assert!(
                data.iter().all(|&b| b == data[0]),
                "Frame mixes bytes from two deliveries"
            );
            frames_seen += 1;
        }
        std::thread::sleep(Duration::from_micros(500));
    }
    probe.stop_streaming();

    assert!(frames_seen > 0, "No frames arrived from the streaming thread");
    assert!(probe.samples_delivered() >= frames_seen as u64);
}

#[test]
fn test_capture_without_devices_is_invalid() {
    let backend = Arc::new(VirtualBackend::new());
    let gpu = Arc::new(VirtualGpu::new());
    let context = CaptureContext::new(backend.clone(), gpu.clone());

    let capture = Capture::new(&context, Format::new());
    assert!(!capture.is_valid());
    assert_eq!(capture.construction_error(), Some(&SessionError::NoDevices));
    assert_eq!(capture.state(), SessionState::Constructing);
    assert!(backend.engines().is_empty());
    drop(capture);

    assert!(Capture::create(&context, Format::new()).is_none());
    assert_eq!(context.interop().session_count(), 0);
}

#[test]
fn test_unset_device_picks_first() {
    let rig = rig();
    rig.backend.add_device("External Camera");

    let capture = Capture::new(&rig.context, Format::new().hardware_accelerated(false));
    assert!(capture.is_valid());
    assert_eq!(capture.device(), &rig.device);
}

#[test]
fn test_unknown_device_is_not_found() {
    let rig = rig();
    let ghost = DeviceDescriptor::new("Ghost", "virtual://ghost");
    let capture = Capture::new(&rig.context, rig.software().device(ghost));
    assert_eq!(
        capture.construction_error(),
        Some(&SessionError::DeviceNotFound("virtual://ghost".into()))
    );
}

#[test]
fn test_texture_allocation_failure() {
    let rig = rig();
    rig.gpu.limit_textures(Some(1));

    let capture = Capture::new(&rig.context, rig.hardware());
    assert_eq!(
        capture.construction_error(),
        Some(&SessionError::TextureAllocation { width: 640, height: 480 })
    );
    assert!(rig.backend.engines().is_empty(), "No engine without both textures");
    assert_eq!(rig.gpu.live_native_textures(), 0, "The first texture is released");

    drop(capture);
    assert_eq!(rig.gpu.live_devices(), 0);
}

#[test]
fn test_engine_creation_failure() {
    let rig = rig();
    rig.backend.fail_engine_creation(Some(status::HARDWARE_BUSY));

    let capture = Capture::new(&rig.context, rig.software());
    assert!(matches!(
        capture.construction_error(),
        Some(SessionError::EngineCreation(BackendError::Status { status: code, .. }))
            if *code == status::HARDWARE_BUSY
    ));
    capture.start();
    assert_eq!(capture.state(), SessionState::Constructing);
}

#[test]
fn test_interop_failure_only_affects_hardware() {
    let rig = rig();
    rig.gpu.fail_interop(true);

    let hardware = Capture::new(&rig.context, rig.hardware());
    assert!(matches!(
        hardware.construction_error(),
        Some(SessionError::Interop(_))
    ));
    assert_eq!(rig.gpu.live_devices(), 0, "Partial interop state is released");

    let software = Capture::new(&rig.context, rig.software());
    assert!(software.is_valid());
}

#[test]
fn test_interop_context_lives_until_last_session() {
    let rig = rig();
    let hardware = Capture::new(&rig.context, rig.hardware());
    let second = Capture::new(&rig.context, rig.hardware());
    let software = Capture::new(&rig.context, rig.software());
    assert_eq!(rig.context.interop().session_count(), 3);
    assert_eq!(rig.gpu.live_devices(), 1, "Sessions share one GPU device");
    assert_eq!(rig.gpu.live_native_textures(), 4);

    drop(hardware);
    drop(second);
    assert_eq!(rig.gpu.live_native_textures(), 0);
    assert_eq!(rig.gpu.live_render_textures(), 0);
    assert_eq!(rig.gpu.live_devices(), 1, "The software session still holds the context");

    drop(software);
    assert_eq!(rig.context.interop().session_count(), 0);
    assert_eq!(rig.gpu.live_devices(), 0);
    assert_eq!(rig.gpu.live_device_managers(), 0);
    assert_eq!(rig.gpu.open_interops(), 0);
    assert_eq!(
        rig.gpu.live_object_reports(),
        usize::from(cfg!(debug_assertions))
    );
}
