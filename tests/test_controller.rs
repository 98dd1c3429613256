mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::*;
use edgeview::capture::device::{StreamCapability, SupportedSizes};
use edgeview::capture::{Facing, Pattern, PixelFormat, SyntheticCamera};
use edgeview::pipeline::{ControllerOptions, HandoffReader};
use edgeview::{
    CameraError, ErrorKind, PipelineController, ProcessingMode, SessionState, TransformedImage,
};

fn controller(camera: &ScriptedCamera) -> PipelineController {
    PipelineController::new(Arc::new(camera.clone()), ControllerOptions::default())
}

fn next_image(reader: &mut HandoffReader, mode: ProcessingMode) -> Option<TransformedImage> {
    let mut found = None;
    wait_for(|| match reader.try_consume() {
        Some(image) if image.mode() == mode => {
            found = Some(image);
            true
        }
        _ => false,
    });
    found
}

#[test]
fn stop_twice_leaves_idle() {
    let camera = ScriptedCamera::new(Pattern::Uniform(128));
    let controller = controller(&camera);

    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);

    controller.start(geometry(64, 48)).unwrap();
    assert!(wait_for(|| controller.state() == SessionState::Streaming));
    controller.stop();
    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);
    assert_eq!(controller.geometry(), None);
}

#[test]
fn nothing_is_published_after_stop() {
    let camera = ScriptedCamera::new(Pattern::MovingBars);
    let controller = controller(&camera);
    controller.start(geometry(64, 48)).unwrap();
    assert!(wait_for(|| controller.stats().frames_published > 3));

    controller.stop();
    let handoff = controller.handoff();
    let published = handoff.latest_sequence();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(handoff.latest_sequence(), published);
    assert!(controller.reader().try_consume().is_none());
}

#[test]
fn restart_with_same_geometry_keeps_session() {
    let camera = ScriptedCamera::new(Pattern::Uniform(90));
    let controller = controller(&camera);
    controller.start(geometry(64, 48)).unwrap();
    controller.start(geometry(64, 48)).unwrap();
    assert_eq!(camera.opened.lock().unwrap().len(), 1);
}

#[test]
fn new_geometry_reopens_the_camera() {
    let camera = ScriptedCamera::new(Pattern::Uniform(90));
    let controller = controller(&camera);
    let mut reader = controller.reader();

    controller.start(geometry(64, 48)).unwrap();
    assert!(wait_for(|| controller.state() == SessionState::Streaming));
    controller.start(geometry(32, 16)).unwrap();

    assert_eq!(controller.geometry(), Some(geometry(32, 16)));
    let opened = camera.opened.lock().unwrap().clone();
    assert_eq!(opened.len(), 2);
    assert_eq!(opened[1].1, geometry(32, 16));

    let image = next_image(&mut reader, ProcessingMode::Raw).unwrap();
    assert_eq!((image.width(), image.height()), (32, 16));
    assert_eq!(image.len(), 32 * 16 * 4);
}

#[test]
fn no_camera_is_reported() {
    let camera = ScriptedCamera::new(Pattern::Uniform(0)).with_devices(Vec::new());
    let controller = controller(&camera);
    let errors = controller.subscribe_errors();

    let err = controller.start(geometry(64, 48)).unwrap_err();
    assert_eq!(err, CameraError::NoDeviceAvailable);
    assert_eq!(controller.state(), SessionState::Failed);

    let notice = errors.try_recv().unwrap();
    assert_eq!(notice.kind, ErrorKind::NoCamera);
    assert_eq!(notice.message, "No camera found on this device");
}

#[test]
fn configuration_failure_then_retry() {
    let camera = ScriptedCamera::new(Pattern::Uniform(128));
    camera.fail_next_open(CameraError::ConfigurationFailed {
        reason: "sensor rejected stream".into(),
    });
    let controller = controller(&camera);
    let errors = controller.subscribe_errors();

    let err = controller.start(geometry(64, 48)).unwrap_err();
    assert!(matches!(err, CameraError::ConfigurationFailed { .. }));
    assert_eq!(controller.state(), SessionState::Failed);
    assert_eq!(errors.try_recv().unwrap().kind, ErrorKind::ConfigurationFailed);

    controller.start(geometry(64, 48)).unwrap();
    assert!(wait_for(|| controller.state() == SessionState::Streaming));
}

#[test]
fn unsupported_resolution_fails_configuration() {
    let mut device = SyntheticCamera::descriptor("fixed", Facing::Back);
    device.capabilities = vec![StreamCapability {
        format: PixelFormat::Nv21,
        sizes: SupportedSizes::Discrete(vec![geometry(640, 480)]),
    }];
    let camera = ScriptedCamera::new(Pattern::Uniform(128)).with_devices(vec![device]);
    let controller = controller(&camera);

    let err = controller.start(geometry(64, 48)).unwrap_err();
    assert!(matches!(err, CameraError::ConfigurationFailed { .. }));
    assert_eq!(controller.state(), SessionState::Failed);
    assert!(camera.opened.lock().unwrap().is_empty());
}

#[test]
fn busy_device_is_reported() {
    let camera = ScriptedCamera::new(Pattern::Uniform(128));
    camera.fail_next_open(CameraError::DeviceBusy {
        device: "scripted:back".into(),
    });
    let controller = controller(&camera);
    let errors = controller.subscribe_errors();

    assert!(controller.start(geometry(64, 48)).is_err());
    assert_eq!(controller.state(), SessionState::Failed);
    let notice = errors.try_recv().unwrap();
    assert_eq!(notice.kind, ErrorKind::DeviceBusy);
    assert!(notice.to_string().contains("scripted:back"));
}

#[test]
fn disconnect_fails_session_until_restarted() {
    let camera = ScriptedCamera::new(Pattern::Uniform(128));
    camera.fail_stream_after(
        5,
        CameraError::Disconnected {
            device: "scripted:back".into(),
        },
    );
    let controller = controller(&camera);
    let errors = controller.subscribe_errors();

    controller.start(geometry(64, 48)).unwrap();
    assert!(wait_for(|| controller.state() == SessionState::Failed));
    assert!(wait_for(|| errors
        .try_iter()
        .any(|n| n.kind == ErrorKind::FatalDevice)));

    controller.stop();
    assert_eq!(controller.state(), SessionState::Idle);

    controller.start(geometry(64, 48)).unwrap();
    assert!(wait_for(|| controller.state() == SessionState::Streaming));
}

#[test]
fn mode_change_applies_mid_stream() {
    let camera = ScriptedCamera::new(Pattern::MovingBars);
    let controller = controller(&camera);
    let mut reader = controller.reader();
    controller.start(geometry(64, 48)).unwrap();

    let raw = next_image(&mut reader, ProcessingMode::Raw).unwrap();
    let tinted = (0..48)
        .flat_map(|y| (0..64).map(move |x| (x, y)))
        .any(|(x, y)| {
            let [r, g, b, _] = raw.pixel(x, y);
            r != g || g != b
        });
    assert!(tinted);

    controller.set_mode(ProcessingMode::Grayscale);
    let gray = next_image(&mut reader, ProcessingMode::Grayscale).unwrap();
    assert!(gray
        .as_bytes()
        .chunks_exact(4)
        .all(|px| px[0] == px[1] && px[1] == px[2] && px[3] == 255));

    controller.set_mode(ProcessingMode::Edge);
    let edges = next_image(&mut reader, ProcessingMode::Edge).unwrap();
    assert!(edges
        .as_bytes()
        .chunks_exact(4)
        .all(|px| px == [0, 0, 0, 255] || px == [255, 255, 255, 255]));
}

#[test]
fn inverted_thresholds_stay_ordered() {
    let camera = ScriptedCamera::new(Pattern::Checkerboard { cell: 4 });
    let controller = controller(&camera);
    controller.set_mode(ProcessingMode::Edge);
    controller.start(geometry(64, 48)).unwrap();

    controller.set_edge_thresholds(200.0, 50.0);
    let edge = controller.edge_parameters();
    assert!(edge.low() < edge.high());
    assert_eq!((edge.low(), edge.high()), (49.0, 50.0));

    let published = controller.stats().frames_published;
    assert!(wait_for(|| controller.stats().frames_published > published + 2));
    assert_eq!(controller.stats().frames_failed, 0);
    assert_eq!(controller.state(), SessionState::Streaming);
}

#[test]
fn bad_frames_are_dropped_and_streaming_continues() {
    let camera = ScriptedCamera::new(Pattern::Uniform(128));
    camera.misreport_first(4);
    let controller = controller(&camera);
    let mut reader = controller.reader();
    controller.start(geometry(64, 48)).unwrap();

    assert!(wait_for(|| controller.state() == SessionState::Streaming));
    let stats = controller.stats();
    assert_eq!(stats.frames_failed, 4);
    assert!(stats.frames_captured > stats.frames_failed);

    let image = next_image(&mut reader, ProcessingMode::Raw).unwrap();
    assert_eq!((image.width(), image.height()), (64, 48));
    assert!(image.frame_sequence() > 4);

    let published = controller.stats().frames_published;
    assert!(wait_for(|| controller.stats().frames_published > published + 2));
    assert_eq!(controller.stats().frames_failed, 4);
}
