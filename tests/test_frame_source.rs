mod common;

use std::sync::{Arc, Mutex};

use common::*;
use edgeview::capture::{Delivery, Facing, Frame, FrameSource, OpenRequest, Pattern, SyntheticCamera};
use edgeview::pipeline::{PipelineStats, StateCell};
use edgeview::SessionState;

#[test]
fn held_frames_make_the_source_drop() {
    let camera = ScriptedCamera::new(Pattern::Uniform(100));
    let stats = Arc::new(PipelineStats::default());
    let held: Arc<Mutex<Vec<Frame>>> = Arc::default();
    let sink = {
        let held = Arc::clone(&held);
        move |frame: Frame| {
            held.lock().unwrap().push(frame);
            Delivery::Accepted
        }
    };

    let mut request = OpenRequest::new(geometry(16, 16));
    request.buffer_count = 2;
    let mut source =
        FrameSource::open(&camera, request, StateCell::new(), Arc::clone(&stats), sink).unwrap();

    assert!(wait_for(|| stats.snapshot().frames_dropped >= 3));
    assert_eq!(held.lock().unwrap().len(), 2);
    assert_eq!(source.free_slots(), 0);

    // Releasing a frame hands its slot back to the source.
    held.lock().unwrap().pop().unwrap().release();
    assert!(wait_for(|| held.lock().unwrap().len() == 2));

    source.close();
    let counts = stats.snapshot();
    assert_eq!(counts.frames_captured, counts.frames_dropped + 3);
}

#[test]
fn reaches_streaming_and_closes_idempotently() {
    let camera = ScriptedCamera::new(Pattern::Uniform(100));
    let state = StateCell::new();
    let mut source = FrameSource::open(
        &camera,
        OpenRequest::new(geometry(16, 16)),
        state.clone(),
        Arc::new(PipelineStats::default()),
        |frame: Frame| {
            frame.release();
            Delivery::Accepted
        },
    )
    .unwrap();

    assert!(wait_for(|| state.get() == SessionState::Streaming));
    source.close();
    assert_eq!(source.state(), SessionState::Idle);
    source.close();
    assert_eq!(state.get(), SessionState::Idle);
}

#[test]
fn dropped_deliveries_do_not_start_streaming() {
    let camera = ScriptedCamera::new(Pattern::Uniform(100));
    let state = StateCell::new();
    let stats = Arc::new(PipelineStats::default());
    let mut source = FrameSource::open(
        &camera,
        OpenRequest::new(geometry(16, 16)),
        state.clone(),
        Arc::clone(&stats),
        |_frame: Frame| Delivery::Dropped,
    )
    .unwrap();

    assert!(wait_for(|| stats.snapshot().frames_captured >= 5));
    assert_eq!(state.get(), SessionState::Opening);
    source.close();
}

#[test]
fn rear_camera_is_preferred() {
    let camera = ScriptedCamera::new(Pattern::Uniform(100)).with_devices(vec![
        SyntheticCamera::descriptor("usb", Facing::External),
        SyntheticCamera::descriptor("selfie", Facing::Front),
        SyntheticCamera::descriptor("main", Facing::Back),
    ]);
    let source = FrameSource::open(
        &camera,
        OpenRequest::new(geometry(16, 16)),
        StateCell::new(),
        Arc::new(PipelineStats::default()),
        |_frame: Frame| Delivery::Dropped,
    )
    .unwrap();
    assert_eq!(source.device_id(), "main");
}

#[test]
fn explicit_device_overrides_policy() {
    let camera = ScriptedCamera::new(Pattern::Uniform(100)).with_devices(vec![
        SyntheticCamera::descriptor("selfie", Facing::Front),
        SyntheticCamera::descriptor("main", Facing::Back),
    ]);
    let mut request = OpenRequest::new(geometry(16, 16));
    request.device = Some("selfie".into());
    let source = FrameSource::open(
        &camera,
        request,
        StateCell::new(),
        Arc::new(PipelineStats::default()),
        |_frame: Frame| Delivery::Dropped,
    )
    .unwrap();
    assert_eq!(source.device_id(), "selfie");
    assert_eq!(camera.opened.lock().unwrap()[0].0, "selfie");
}
