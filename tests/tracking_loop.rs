use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use pantilt_tracker::actuator::{ChannelEvent, ChannelLog};
use pantilt_tracker::{
    apply_command, ActuationController, ActuatorCommand, BoundingBox, Camera, CameraStats,
    CommandChannel, CommandReason, DetectorBackend, Emphasis, Frame, FrameStep, LoopExit,
    LoopSettings, PanTiltRig, RawDetection, RecordingChannel, ScriptedBackend, Selection,
    SelectionState, ServoMapping, TrackingLoop,
};

const WIDTH: u32 = 128;
const HEIGHT: u32 = 72;

struct TestCamera {
    index: u64,
    fail_always: bool,
    size: (u32, u32),
    closed: Arc<AtomicBool>,
}

impl TestCamera {
    fn new(fail_always: bool) -> (Self, Arc<AtomicBool>) {
        let closed = Arc::new(AtomicBool::new(false));
        let camera = Self {
            index: 0,
            fail_always,
            size: (WIDTH, HEIGHT),
            closed: Arc::clone(&closed),
        };
        (camera, closed)
    }

    /// A camera that delivers frames of its own size, ignoring the mapping.
    fn with_size(width: u32, height: u32) -> Self {
        let (mut camera, _) = Self::new(false);
        camera.size = (width, height);
        camera
    }
}

impl Camera for TestCamera {
    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn grab(&mut self) -> Result<()> {
        if self.fail_always {
            return Err(anyhow!("no frame"));
        }
        self.index += 1;
        Ok(())
    }

    fn retrieve_frame(&mut self) -> Result<Frame> {
        let (width, height) = self.size;
        Frame::from_rgb(
            vec![0; (width * height * 3) as usize],
            width,
            height,
            self.index,
        )
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            device: "test".to_string(),
            frames_captured: self.index,
            grab_failures: 0,
        }
    }
}

/// Wraps a scripted backend and raises the stop flag after `frames` calls.
struct StopAfter {
    inner: ScriptedBackend,
    frames: u32,
    stop: Arc<AtomicBool>,
}

impl DetectorBackend for StopAfter {
    fn name(&self) -> &'static str {
        "stop-after"
    }

    fn track(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        self.frames = self.frames.saturating_sub(1);
        if self.frames == 0 {
            self.stop.store(true, Ordering::SeqCst);
        }
        self.inner.track(frame)
    }
}

fn mapping() -> ServoMapping {
    ServoMapping {
        frame_width: WIDTH,
        frame_height: HEIGHT,
        ..ServoMapping::default()
    }
}

fn rig() -> Result<(PanTiltRig, ChannelLog, ChannelLog)> {
    let pan = RecordingChannel::new("pan");
    let tilt = RecordingChannel::new("tilt");
    let (pan_log, tilt_log) = (pan.log(), tilt.log());
    let mut rig = PanTiltRig::new(Box::new(pan), Box::new(tilt));
    rig.start(mapping().center())?;
    Ok((rig, pan_log, tilt_log))
}

fn person_and_car() -> Vec<RawDetection> {
    vec![
        RawDetection::new(3, 0, BoundingBox::new(10.0, 10.0, 30.0, 50.0), 0.9),
        RawDetection::new(7, 2, BoundingBox::new(80.0, 20.0, 120.0, 60.0), 0.8),
    ]
}

fn assert_ends_centered(log: &ChannelLog) {
    let events = log.events();
    assert!(events.len() >= 2, "too few events: {:?}", events);
    assert_eq!(
        &events[events.len() - 2..],
        &[ChannelEvent::Duty(7.5), ChannelEvent::Stopped]
    );
}

#[test]
fn unselected_frame_follows_first_allowed_track() -> Result<()> {
    let (camera, _) = TestCamera::new(false);
    let (rig, pan_log, _) = rig()?;
    let mut tracking = TrackingLoop::new(
        Box::new(camera),
        Box::new(ScriptedBackend::new(vec![person_and_car()])),
        rig,
        ActuationController::new(mapping()),
        SelectionState::new(),
        LoopSettings::default(),
    );

    let FrameStep::Processed {
        command,
        reason,
        forwarded,
        ..
    } = tracking.step()?
    else {
        panic!("frame was skipped");
    };
    assert_eq!(forwarded, Some((3, Emphasis::DefaultFollow)));
    assert_eq!(reason, CommandReason::Following);
    let expected = mapping().command_for(&BoundingBox::new(10.0, 10.0, 30.0, 50.0));
    assert_eq!(command, expected);
    assert_eq!(pan_log.last_duty(), Some(expected.pan));
    Ok(())
}

#[test]
fn missing_selected_id_centers_the_rig() -> Result<()> {
    let (camera, _) = TestCamera::new(false);
    let (rig, pan_log, tilt_log) = rig()?;
    let selection = SelectionState::new();
    apply_command(&selection, "7");

    let only_person = vec![RawDetection::new(
        3,
        0,
        BoundingBox::new(10.0, 10.0, 30.0, 50.0),
        0.9,
    )];
    let mut tracking = TrackingLoop::new(
        Box::new(camera),
        Box::new(ScriptedBackend::new(vec![only_person])),
        rig,
        ActuationController::new(mapping()),
        selection,
        LoopSettings::default(),
    );

    let step = tracking.step()?;
    assert_eq!(
        step,
        FrameStep::Processed {
            frame_index: 1,
            command: ActuatorCommand { pan: 7.5, tilt: 7.5 },
            reason: CommandReason::TargetLost,
            forwarded: None,
        }
    );
    assert_eq!(pan_log.last_duty(), Some(7.5));
    assert_eq!(tilt_log.last_duty(), Some(7.5));
    Ok(())
}

#[test]
fn selected_track_is_followed() -> Result<()> {
    let (camera, _) = TestCamera::new(false);
    let (rig, _, _) = rig()?;
    let selection = SelectionState::new();
    apply_command(&selection, " 7 ");
    let mut tracking = TrackingLoop::new(
        Box::new(camera),
        Box::new(ScriptedBackend::new(vec![person_and_car()])),
        rig,
        ActuationController::new(mapping()),
        selection,
        LoopSettings::default(),
    );

    let FrameStep::Processed { forwarded, .. } = tracking.step()? else {
        panic!("frame was skipped");
    };
    assert_eq!(forwarded, Some((7, Emphasis::Selected)));
    Ok(())
}

#[test]
fn stop_signal_centers_before_release() -> Result<()> {
    let (camera, closed) = TestCamera::new(false);
    let (rig, pan_log, tilt_log) = rig()?;
    let stop = Arc::new(AtomicBool::new(false));
    let detector = StopAfter {
        inner: ScriptedBackend::new(vec![person_and_car()]),
        frames: 3,
        stop: Arc::clone(&stop),
    };
    let mut tracking = TrackingLoop::new(
        Box::new(camera),
        Box::new(detector),
        rig,
        ActuationController::new(mapping()),
        SelectionState::new(),
        LoopSettings::default(),
    );

    let summary = tracking.run(&stop)?;
    assert_eq!(summary.exit, LoopExit::Stopped);
    assert_eq!(summary.frames_processed, 3);
    assert!(closed.load(Ordering::SeqCst));

    let following = mapping().command_for(&BoundingBox::new(10.0, 10.0, 30.0, 50.0));
    let pan_events = pan_log.events();
    assert_eq!(
        pan_events[pan_events.len() - 3],
        ChannelEvent::Duty(following.pan)
    );
    assert_ends_centered(&pan_log);
    assert_ends_centered(&tilt_log);
    Ok(())
}

#[test]
fn repeated_grab_failures_are_fatal_but_still_center() -> Result<()> {
    let (camera, closed) = TestCamera::new(true);
    let (rig, pan_log, tilt_log) = rig()?;
    let mut tracking = TrackingLoop::new(
        Box::new(camera),
        Box::new(ScriptedBackend::new(vec![person_and_car()])),
        rig,
        ActuationController::new(mapping()),
        SelectionState::new(),
        LoopSettings {
            max_consecutive_grab_failures: 5,
            ..LoopSettings::default()
        },
    );

    let stop = AtomicBool::new(false);
    let err = tracking.run(&stop).unwrap_err();
    assert!(err.to_string().contains("5 consecutive"));
    assert!(closed.load(Ordering::SeqCst));
    assert_eq!(
        pan_log.events(),
        vec![
            ChannelEvent::Started(7.5),
            ChannelEvent::Duty(7.5),
            ChannelEvent::Stopped
        ]
    );
    assert_ends_centered(&tilt_log);
    Ok(())
}

#[test]
fn grab_failures_retry_forever_by_default() -> Result<()> {
    let (camera, closed) = TestCamera::new(true);
    let (rig, pan_log, _) = rig()?;
    let mut tracking = TrackingLoop::new(
        Box::new(camera),
        Box::new(ScriptedBackend::new(vec![person_and_car()])),
        rig,
        ActuationController::new(mapping()),
        SelectionState::new(),
        LoopSettings::default(),
    );

    for _ in 0..1000 {
        assert_eq!(tracking.step()?, FrameStep::Skipped);
    }
    assert!(!closed.load(Ordering::SeqCst));
    assert_eq!(pan_log.events(), vec![ChannelEvent::Started(7.5)]);
    Ok(())
}

#[test]
fn mapping_follows_delivered_frame_size() -> Result<()> {
    // Camera negotiated 640x360 while the mapping was built for 1280x720.
    let camera = TestCamera::with_size(640, 360);
    let (rig, pan_log, tilt_log) = rig()?;
    let bottom_right = vec![RawDetection::new(
        1,
        0,
        BoundingBox::centered(640.0, 360.0, 20.0, 20.0),
        0.9,
    )];
    let mut tracking = TrackingLoop::new(
        Box::new(camera),
        Box::new(ScriptedBackend::new(vec![bottom_right])),
        rig,
        ActuationController::new(ServoMapping::default()),
        SelectionState::new(),
        LoopSettings::default(),
    );

    let FrameStep::Processed { command, .. } = tracking.step()? else {
        panic!("frame was skipped");
    };
    // Right/bottom edge maps to the top of the band, inverted to 35 degrees.
    let edge = 2.5 + 35.0 / 18.0;
    assert!((command.pan - edge).abs() < 1e-9, "pan {}", command.pan);
    assert!((command.tilt - edge).abs() < 1e-9, "tilt {}", command.tilt);
    assert_eq!(pan_log.last_duty(), Some(command.pan));
    assert_eq!(tilt_log.last_duty(), Some(command.tilt));
    Ok(())
}

#[test]
fn frame_limit_ends_the_loop() -> Result<()> {
    let (camera, _) = TestCamera::new(false);
    let (rig, _, _) = rig()?;
    let mut tracking = TrackingLoop::new(
        Box::new(camera),
        Box::new(ScriptedBackend::new(vec![vec![], person_and_car()])),
        rig,
        ActuationController::new(mapping()),
        SelectionState::new(),
        LoopSettings {
            max_frames: Some(4),
            ..LoopSettings::default()
        },
    );

    let summary = tracking.run(&AtomicBool::new(false))?;
    assert_eq!(summary.exit, LoopExit::FrameLimit);
    assert_eq!(summary.frames_processed, 4);
    assert_eq!(summary.frames_skipped, 0);
    Ok(())
}

#[test]
fn operator_lines_drive_the_loop_selection() -> Result<()> {
    let selection = SelectionState::new();
    let channel = CommandChannel::spawn(Cursor::new("5\nq\n7\n"), selection.clone())?;
    assert_eq!(channel.wait_closed()?, 3);
    assert_eq!(selection.snapshot(), Selection::Target("7".to_string()));

    let (camera, _) = TestCamera::new(false);
    let (rig, _, _) = rig()?;
    let mut tracking = TrackingLoop::new(
        Box::new(camera),
        Box::new(ScriptedBackend::new(vec![person_and_car()])),
        rig,
        ActuationController::new(mapping()),
        selection,
        LoopSettings::default(),
    );
    let FrameStep::Processed { forwarded, .. } = tracking.step()? else {
        panic!("frame was skipped");
    };
    assert_eq!(forwarded, Some((7, Emphasis::Selected)));
    Ok(())
}
