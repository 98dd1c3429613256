mod common;

use std::sync::Arc;
use std::thread;

use common::*;
use edgeview::capture::Pattern;
use edgeview::display::{Presenter, TickOutcome};
use edgeview::pipeline::ControllerOptions;
use edgeview::{PipelineController, ProcessingMode, ResourceError};

fn streaming_controller(pattern: Pattern) -> PipelineController {
    let camera = ScriptedCamera::new(pattern);
    let controller = PipelineController::new(Arc::new(camera), ControllerOptions::default());
    controller.start(geometry(32, 24)).unwrap();
    controller
}

#[test]
fn repeats_last_texture_between_frames() {
    let controller = streaming_controller(Pattern::Uniform(180));
    let mut presenter = Presenter::new(controller.reader(), RecordingBackend::default());
    presenter.on_surface_ready(640, 480).unwrap();

    assert!(wait_for(|| matches!(
        presenter.on_frame_tick(),
        Ok(TickOutcome::Fresh(_))
    )));
    controller.stop();

    // The session is over but the texture is only released at the next tick.
    let outcome = presenter.on_frame_tick().unwrap();
    assert_eq!(outcome, TickOutcome::Blank);
    assert_eq!(presenter.backend().releases, 1);
    assert_eq!(presenter.backend().texture, None);
    assert_eq!(presenter.backend().configured, vec![(640, 480)]);
}

#[test]
fn ticks_account_for_every_draw() {
    let controller = streaming_controller(Pattern::Uniform(180));
    let mut presenter = Presenter::new(controller.reader(), RecordingBackend::default());
    presenter.on_surface_ready(320, 240).unwrap();
    assert!(wait_for(|| presenter.on_frame_tick().unwrap() != TickOutcome::Blank));
    let draws_before = presenter.backend().draws;

    let mut repeats = 0;
    for _ in 0..50 {
        match presenter.on_frame_tick().unwrap() {
            TickOutcome::Repeat => repeats += 1,
            TickOutcome::Fresh(_) => {}
            other => panic!("unexpected {other:?} while streaming"),
        }
    }
    assert_eq!(presenter.repeated(), repeats);
    let backend = presenter.backend();
    assert_eq!(backend.draws, draws_before + 50);
    assert_eq!(backend.uploads.len() as u64, presenter.presented());
    assert_eq!(backend.texture, Some((32, 24)));
}

#[test]
fn uploads_arrive_in_sequence_order() {
    let controller = streaming_controller(Pattern::MovingBars);
    controller.set_mode(ProcessingMode::Grayscale);
    let mut presenter = Presenter::new(controller.reader(), RecordingBackend::default());
    presenter.on_surface_ready(64, 48).unwrap();

    assert!(wait_for(|| {
        let _ = presenter.on_frame_tick();
        presenter.presented() >= 10
    }));
    let sequences: Vec<u64> = presenter.backend().uploads.iter().map(|u| u.0).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn upload_failure_is_surfaced() {
    let controller = streaming_controller(Pattern::Uniform(50));
    let backend = RecordingBackend {
        fail_upload: Some(ResourceError::OutOfMemory),
        ..Default::default()
    };
    let mut presenter = Presenter::new(controller.reader(), backend);
    presenter.on_surface_ready(64, 48).unwrap();

    let mut failure = None;
    assert!(wait_for(|| match presenter.on_frame_tick() {
        Err(err) => {
            failure = Some(err);
            true
        }
        Ok(_) => false,
    }));
    assert_eq!(failure, Some(ResourceError::OutOfMemory));
}

#[test]
fn ticking_from_another_thread_panics() {
    let controller = streaming_controller(Pattern::Uniform(50));
    let mut presenter = Presenter::new(controller.reader(), RecordingBackend::default());
    presenter.on_surface_ready(64, 48).unwrap();

    let result = thread::spawn(move || {
        let _ = presenter.on_frame_tick();
    })
    .join();
    assert!(result.is_err());
}

#[test]
fn surface_loss_pauses_ticks() {
    let controller = streaming_controller(Pattern::Uniform(50));
    let mut presenter = Presenter::new(controller.reader(), RecordingBackend::default());
    presenter.on_surface_ready(64, 48).unwrap();
    presenter.on_surface_destroyed();
    assert_eq!(presenter.on_frame_tick().unwrap(), TickOutcome::NoSurface);

    presenter.on_surface_ready(128, 96).unwrap();
    assert_eq!(presenter.backend().configured, vec![(64, 48), (128, 96)]);
    presenter.teardown();
    assert_eq!(presenter.on_frame_tick().unwrap(), TickOutcome::NoSurface);
}
