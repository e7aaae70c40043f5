//! The frame loop.
//!
//! One iteration: grab, retrieve, detect, process, command the rig, report, present.
//! The loop runs until the stop flag is raised, a frame limit is reached or the camera
//! keeps failing past the configured threshold. Every exit path goes through
//! [`TrackingLoop::shutdown`], which centers the rig once before releasing anything.

use anyhow::{anyhow, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::actuation::{ActuationController, ActuatorCommand, CommandReason};
use crate::actuator::PanTiltRig;
use crate::config::RuntimeSettings;
use crate::detect::DetectorBackend;
use crate::display::{FrameSink, NullSink};
use crate::ingest::Camera;
use crate::processor::{process_frame, Emphasis};
use crate::registry::RegistryReporter;
use crate::selection::{SelectionState, DESELECT_COMMAND};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Clone, Debug)]
pub struct LoopSettings {
    /// Consecutive failed iterations (grab or detect) before the loop gives up.
    /// Zero retries forever.
    pub max_consecutive_grab_failures: u32,
    pub report_active_objects: bool,
    pub max_frames: Option<u64>,
    pub health_interval: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_consecutive_grab_failures: 0,
            report_active_objects: true,
            max_frames: None,
            health_interval: HEALTH_LOG_INTERVAL,
        }
    }
}

impl From<&RuntimeSettings> for LoopSettings {
    fn from(settings: &RuntimeSettings) -> Self {
        Self {
            max_consecutive_grab_failures: settings.max_consecutive_grab_failures,
            report_active_objects: settings.report_active_objects,
            max_frames: settings.max_frames,
            health_interval: HEALTH_LOG_INTERVAL,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Stopping,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopExit {
    /// The stop flag was raised.
    Stopped,
    /// `max_frames` frames were processed.
    FrameLimit,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoopSummary {
    pub exit: LoopExit,
    pub frames_processed: u64,
    pub frames_skipped: u64,
    pub actuator_errors: u64,
}

/// Result of one loop iteration.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameStep {
    Processed {
        frame_index: u64,
        command: ActuatorCommand,
        reason: CommandReason,
        forwarded: Option<(u64, Emphasis)>,
    },
    Skipped,
}

pub struct TrackingLoop {
    camera: Box<dyn Camera>,
    detector: Box<dyn DetectorBackend>,
    rig: PanTiltRig,
    sink: Box<dyn FrameSink>,
    controller: ActuationController,
    selection: SelectionState,
    reporter: RegistryReporter,
    settings: LoopSettings,
    state: LoopState,
    consecutive_failures: u32,
    frames_processed: u64,
    frames_skipped: u64,
    actuator_errors: u64,
    banner_shown: bool,
    shut_down: bool,
}

impl TrackingLoop {
    /// The camera must already be open and the rig started.
    pub fn new(
        camera: Box<dyn Camera>,
        detector: Box<dyn DetectorBackend>,
        rig: PanTiltRig,
        controller: ActuationController,
        selection: SelectionState,
        settings: LoopSettings,
    ) -> Self {
        Self {
            camera,
            detector,
            rig,
            sink: Box::new(NullSink),
            controller,
            selection,
            reporter: RegistryReporter::new(),
            settings,
            state: LoopState::Running,
            consecutive_failures: 0,
            frames_processed: 0,
            frames_skipped: 0,
            actuator_errors: 0,
            banner_shown: false,
            shut_down: false,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Runs until `stop` is raised or a limit is hit. Shutdown happens before returning,
    /// including when the camera failure threshold turns into an error.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<LoopSummary> {
        let result = self.run_until_exit(stop);
        self.shutdown();
        let exit = result?;
        let summary = self.summary(exit);
        log::info!(
            "tracking loop finished ({:?}): processed={} skipped={} actuator_errors={}",
            summary.exit,
            summary.frames_processed,
            summary.frames_skipped,
            summary.actuator_errors
        );
        Ok(summary)
    }

    fn run_until_exit(&mut self, stop: &AtomicBool) -> Result<LoopExit> {
        let mut last_health_log = Instant::now();
        loop {
            if stop.load(Ordering::SeqCst) {
                log::info!("stop requested");
                return Ok(LoopExit::Stopped);
            }
            if let Some(limit) = self.settings.max_frames {
                if self.frames_processed >= limit {
                    return Ok(LoopExit::FrameLimit);
                }
            }

            self.step()?;

            if last_health_log.elapsed() >= self.settings.health_interval {
                let stats = self.camera.stats();
                log::info!(
                    "health: processed={} skipped={} device={} captured={} grab_failures={}",
                    self.frames_processed,
                    self.frames_skipped,
                    stats.device,
                    stats.frames_captured,
                    stats.grab_failures
                );
                last_health_log = Instant::now();
            }
        }
    }

    /// One iteration. Errors only when consecutive failures reach a non-zero threshold.
    pub fn step(&mut self) -> Result<FrameStep> {
        if self.state == LoopState::Stopping {
            return Err(anyhow!("tracking loop is stopping"));
        }

        let frame = match self.camera.grab().and_then(|_| self.camera.retrieve_frame()) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("frame grab failed: {}", err);
                return self.skip();
            }
        };
        let detections = match self.detector.track(&frame) {
            Ok(detections) => detections,
            Err(err) => {
                log::warn!(
                    "detector {} failed on frame {}: {}",
                    self.detector.name(),
                    frame.index,
                    err
                );
                return self.skip();
            }
        };
        self.consecutive_failures = 0;

        let selection = self.selection.snapshot();
        let outcome = process_frame(&detections, &selection);
        self.controller.set_frame_size(frame.width, frame.height);
        let (command, reason) = self
            .controller
            .command(outcome.forwarded.as_ref(), &selection);
        if let Err(err) = self.rig.apply(command) {
            self.actuator_errors += 1;
            log::warn!("actuator command failed on frame {}: {}", frame.index, err);
        }
        log::debug!(
            "frame {}: {} objects, {:?} pan={:.3}% tilt={:.3}% after {:?}",
            frame.index,
            outcome.registry.len(),
            reason,
            command.pan,
            command.tilt,
            frame.captured_at.elapsed()
        );

        if let Some(table) = self.reporter.observe(&outcome.registry) {
            if self.settings.report_active_objects {
                log::info!("{}", table);
            }
        }

        if let Err(err) = self.sink.present(&frame, &outcome.annotations) {
            log::warn!("display failed on frame {}: {}", frame.index, err);
        }

        self.frames_processed += 1;
        if !self.banner_shown {
            self.banner_shown = true;
            log::info!(
                "tracking started: type an object id and press Enter to follow it, \
                 '{}' to stop following, Ctrl-C to quit",
                DESELECT_COMMAND
            );
        }

        Ok(FrameStep::Processed {
            frame_index: frame.index,
            command,
            reason,
            forwarded: outcome
                .forwarded
                .as_ref()
                .zip(outcome.forwarded_emphasis())
                .map(|(track, emphasis)| (track.id, emphasis)),
        })
    }

    fn skip(&mut self) -> Result<FrameStep> {
        self.frames_skipped += 1;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let limit = self.settings.max_consecutive_grab_failures;
        if limit > 0 && self.consecutive_failures >= limit {
            return Err(anyhow!(
                "camera failed {} consecutive times, giving up",
                self.consecutive_failures
            ));
        }
        Ok(FrameStep::Skipped)
    }

    /// Centers the rig, then releases the camera, display and PWM outputs. Runs once.
    pub fn shutdown(&mut self) {
        if self.shut_down {
            return;
        }
        self.shut_down = true;
        self.state = LoopState::Stopping;

        let center = self.controller.center();
        if let Err(err) = self.rig.apply(center) {
            log::warn!("failed to center rig: {}", err);
        }
        self.camera.close();
        self.sink.close();
        if let Err(err) = self.rig.release() {
            log::warn!("failed to release rig: {}", err);
        }
    }

    fn summary(&self, exit: LoopExit) -> LoopSummary {
        LoopSummary {
            exit,
            frames_processed: self.frames_processed,
            frames_skipped: self.frames_skipped,
            actuator_errors: self.actuator_errors,
        }
    }
}

impl Drop for TrackingLoop {
    fn drop(&mut self) {
        self.shutdown();
    }
}
