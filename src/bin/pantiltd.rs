//! pantiltd - pan/tilt object follower daemon
//!
//! Wires the configured camera, detector and servo rig into the tracking loop.
//! Operator commands arrive on stdin, one per line: an object id to follow, or `q`
//! to stop following. Ctrl-C centers the rig and exits.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::{BufReader, IsTerminal};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use pantilt_tracker::config::{ActuatorKind, DetectorKind};
use pantilt_tracker::{
    open_backend, open_camera, open_rig, open_sink, ActuationController, Camera, CommandChannel,
    LoopSettings, SelectionState, TrackerConfig, TrackingLoop,
};

#[path = "../ui.rs"]
mod ui;

#[derive(Parser, Debug)]
#[command(name = "pantiltd", version, about = "Follow a detected object with a pan/tilt rig")]
struct Args {
    /// Config file (JSON, or TOML with a .toml extension)
    #[arg(long, env = "PANTILT_CONFIG", value_name = "PATH")]
    config: Option<PathBuf>,

    /// Camera device, e.g. /dev/video0 or stub://camera
    #[arg(long, value_name = "DEVICE")]
    camera: Option<String>,

    /// Detector backend (scripted|tract)
    #[arg(long, value_name = "NAME")]
    detector: Option<DetectorKind>,

    /// ONNX model for the tract detector
    #[arg(long, value_name = "PATH")]
    model: Option<PathBuf>,

    /// Servo backend (recording|sysfs)
    #[arg(long, value_name = "NAME")]
    actuator: Option<ActuatorKind>,

    /// Stop after this many processed frames
    #[arg(long, value_name = "N")]
    frames: Option<u64>,

    /// UI mode for stderr progress
    #[arg(long, value_enum, default_value = "auto", value_name = "MODE")]
    ui: ui::UiMode,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = ui::StartupUi::new(args.ui, std::io::stderr().is_terminal());

    let stage = ui.stage("Load configuration");
    let mut cfg = TrackerConfig::load_from(args.config.as_deref())?;
    if let Some(device) = args.camera {
        cfg.camera.device = device;
    }
    if let Some(backend) = args.detector {
        cfg.detector.backend = backend;
    }
    if let Some(model) = args.model {
        cfg.detector.model_path = Some(model);
    }
    if let Some(backend) = args.actuator {
        cfg.actuator.backend = backend;
    }
    if args.frames.is_some() {
        cfg.runtime.max_frames = args.frames;
    }
    cfg.validate()?;
    stage.done();

    let stage = ui.stage("Load detector");
    let mut detector = open_backend(&cfg.detector, (cfg.camera.width, cfg.camera.height))?;
    detector.warm_up()?;
    stage.done();

    let stage = ui.stage("Open camera");
    let mut camera = open_camera(&cfg.camera)?;
    stage.done();

    let stage = ui.stage("Center servos");
    let controller = ActuationController::new(cfg.mapping.clone())
        .with_hold_frames(cfg.runtime.lost_target_hold_frames);
    let rig = open_rig(&cfg.actuator).and_then(|mut rig| {
        rig.start(controller.center())?;
        Ok(rig)
    });
    let rig = match rig {
        Ok(rig) => rig,
        Err(err) => {
            camera.close();
            return Err(err);
        }
    };
    stage.done();

    let sink = open_sink(&cfg.display)?;

    let selection = SelectionState::new();
    // Detached: the reader blocks on stdin until the process exits.
    let _commands = CommandChannel::spawn(BufReader::new(std::io::stdin()), selection.clone())?;

    let stop = Arc::new(AtomicBool::new(false));
    let handler_stop = Arc::clone(&stop);
    ctrlc::set_handler(move || {
        handler_stop.store(true, Ordering::SeqCst);
    })
    .context("error setting Ctrl-C handler")?;

    log::info!(
        "pantiltd running: camera={} detector={} actuator={:?}",
        cfg.camera.device,
        detector.name(),
        cfg.actuator.backend
    );

    let mut tracking = TrackingLoop::new(
        Box::new(camera),
        detector,
        rig,
        controller,
        selection,
        LoopSettings::from(&cfg.runtime),
    )
    .with_sink(sink);
    tracking.run(&stop)?;
    Ok(())
}
