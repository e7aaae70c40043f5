//! Pan/tilt object follower.
//!
//! Frames from a camera go through a detector/tracker; the allow-listed tracks (people
//! and road vehicles) are registered and annotated, and one of them is followed by a
//! two-servo pan/tilt rig. The operator picks which track to follow by typing its id.
//!
//! # Data flow
//!
//! ```text
//! Camera -> DetectorBackend -> process_frame -> ActuationController -> PanTiltRig
//!                                  ^
//!                    SelectionState (written by CommandChannel)
//! ```
//!
//! # Module Structure
//!
//! - `track`: classes, boxes, raw detections and allow-listed tracks
//! - `selection` / `command`: the operator's current target and the stdin reader thread
//! - `processor` / `registry`: per-frame filtering, highlighting and the active object table
//! - `actuation` / `actuator`: box-to-duty mapping and the PWM servo drivers
//! - `ingest` / `detect` / `display`: camera sources, detector backends, frame sinks
//! - `runtime`: the frame loop and its shutdown sequence
//! - `config`: file and environment configuration

pub mod actuation;
pub mod actuator;
pub mod command;
pub mod config;
pub mod detect;
pub mod display;
pub mod frame;
pub mod ingest;
pub mod processor;
pub mod registry;
pub mod runtime;
pub mod selection;
pub mod track;

pub use actuation::{ActuationController, ActuatorCommand, CommandReason, ServoMapping};
pub use actuator::{open_rig, PanTiltRig, RecordingChannel, ServoChannel, SysfsPwmChannel};
pub use command::{apply_command, CommandChannel};
pub use config::TrackerConfig;
pub use detect::{open_backend, DetectorBackend, ScriptedBackend};
pub use display::{open_sink, FrameSink, NullSink};
pub use frame::Frame;
pub use ingest::{open_camera, Camera, CameraStats, V4l2Config, V4l2Source};
pub use processor::{process_frame, Annotation, Emphasis, FrameOutcome};
pub use registry::{ActiveObject, ActiveObjectRegistry, RegistryReporter};
pub use runtime::{FrameStep, LoopExit, LoopSettings, LoopState, LoopSummary, TrackingLoop};
pub use selection::{Selection, SelectionState};
pub use track::{BoundingBox, ObjectClass, RawDetection, Track};
