use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::actuation::ServoMapping;
use crate::actuator::sysfs::DEFAULT_SYSFS_ROOT;
use crate::ingest::V4l2Config;

const DEFAULT_CAMERA_DEVICE: &str = "stub://camera";
const DEFAULT_CAMERA_FPS: u32 = 30;
const DEFAULT_CAMERA_WIDTH: u32 = 1280;
const DEFAULT_CAMERA_HEIGHT: u32 = 720;
const DEFAULT_CONFIDENCE: f32 = 0.25;
const DEFAULT_NMS_IOU: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
// Jetson header pin 32 is pwmchip3/pwm0, pin 33 is pwmchip0/pwm0.
const DEFAULT_PAN_CHIP: u32 = 3;
const DEFAULT_TILT_CHIP: u32 = 0;
const DEFAULT_PWM_FREQUENCY_HZ: f64 = 50.0;
// Zero keeps retrying a failing camera forever.
const DEFAULT_MAX_GRAB_FAILURES: u32 = 0;
const DEFAULT_SNAPSHOT_EVERY: u64 = 30;

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    actuator: Option<ActuatorConfigFile>,
    mapping: Option<MappingConfigFile>,
    runtime: Option<RuntimeConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    script_path: Option<PathBuf>,
    model_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct ActuatorConfigFile {
    backend: Option<String>,
    sysfs_root: Option<PathBuf>,
    pan: Option<PwmChannelConfigFile>,
    tilt: Option<PwmChannelConfigFile>,
    frequency_hz: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
struct PwmChannelConfigFile {
    chip: Option<u32>,
    channel: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct MappingConfigFile {
    angle_min: Option<f64>,
    angle_max: Option<f64>,
    duty_min: Option<f64>,
    duty_max: Option<f64>,
    invert: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
struct RuntimeConfigFile {
    max_consecutive_grab_failures: Option<u32>,
    lost_target_hold_frames: Option<u32>,
    report_active_objects: Option<bool>,
    max_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    snapshot_path: Option<PathBuf>,
    snapshot_every: Option<u64>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DetectorKind {
    Scripted,
    Tract,
}

impl FromStr for DetectorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "scripted" | "stub" => Ok(DetectorKind::Scripted),
            "tract" | "onnx" => Ok(DetectorKind::Tract),
            other => Err(anyhow!("unknown detector backend '{}'", other)),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ActuatorKind {
    Recording,
    Sysfs,
}

impl FromStr for ActuatorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "recording" | "stub" => Ok(ActuatorKind::Recording),
            "sysfs" | "pwm" => Ok(ActuatorKind::Sysfs),
            other => Err(anyhow!("unknown actuator backend '{}'", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub camera: V4l2Config,
    pub detector: DetectorSettings,
    pub actuator: ActuatorSettings,
    pub mapping: ServoMapping,
    pub runtime: RuntimeSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: DetectorKind,
    pub script_path: Option<PathBuf>,
    pub model_path: Option<PathBuf>,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PwmChannelSettings {
    pub chip: u32,
    pub channel: u32,
}

#[derive(Debug, Clone)]
pub struct ActuatorSettings {
    pub backend: ActuatorKind,
    pub sysfs_root: PathBuf,
    pub pan: PwmChannelSettings,
    pub tilt: PwmChannelSettings,
    pub frequency_hz: f64,
}

#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Consecutive failed frames before giving up; zero means never.
    pub max_consecutive_grab_failures: u32,
    pub lost_target_hold_frames: u32,
    pub report_active_objects: bool,
    /// Stop after this many processed frames (dry runs).
    pub max_frames: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_every: u64,
}

impl TrackerConfig {
    /// Defaults, then the file named by `PANTILT_CONFIG` (if any), then env overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("PANTILT_CONFIG").ok().map(PathBuf::from);
        Self::load_from(path.as_deref())
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => read_config_file(path)?,
            None => TrackerConfigFile::default(),
        };
        let mut cfg = Self::from_file(file_cfg)?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: TrackerConfigFile) -> Result<Self> {
        let camera_file = file.camera.unwrap_or_default();
        let camera = V4l2Config {
            device: camera_file
                .device
                .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
            target_fps: camera_file.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
            width: camera_file.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
            height: camera_file.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
        };

        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file
                .backend
                .as_deref()
                .map(DetectorKind::from_str)
                .transpose()?
                .unwrap_or(DetectorKind::Scripted),
            script_path: detector_file.script_path,
            model_path: detector_file.model_path,
            confidence_threshold: detector_file
                .confidence_threshold
                .unwrap_or(DEFAULT_CONFIDENCE),
            iou_threshold: detector_file.iou_threshold.unwrap_or(DEFAULT_NMS_IOU),
            input_size: detector_file.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
        };

        let actuator_file = file.actuator.unwrap_or_default();
        let channel = |cfg: Option<&PwmChannelConfigFile>, default_chip: u32| PwmChannelSettings {
            chip: cfg.and_then(|c| c.chip).unwrap_or(default_chip),
            channel: cfg.and_then(|c| c.channel).unwrap_or(0),
        };
        let actuator = ActuatorSettings {
            backend: actuator_file
                .backend
                .as_deref()
                .map(ActuatorKind::from_str)
                .transpose()?
                .unwrap_or(ActuatorKind::Recording),
            sysfs_root: actuator_file
                .sysfs_root
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SYSFS_ROOT)),
            pan: channel(actuator_file.pan.as_ref(), DEFAULT_PAN_CHIP),
            tilt: channel(actuator_file.tilt.as_ref(), DEFAULT_TILT_CHIP),
            frequency_hz: actuator_file
                .frequency_hz
                .unwrap_or(DEFAULT_PWM_FREQUENCY_HZ),
        };

        let mapping_file = file.mapping.unwrap_or_default();
        let defaults = ServoMapping::default();
        let mapping = ServoMapping {
            frame_width: camera.width,
            frame_height: camera.height,
            angle_min: mapping_file.angle_min.unwrap_or(defaults.angle_min),
            angle_max: mapping_file.angle_max.unwrap_or(defaults.angle_max),
            duty_min: mapping_file.duty_min.unwrap_or(defaults.duty_min),
            duty_max: mapping_file.duty_max.unwrap_or(defaults.duty_max),
            invert: mapping_file.invert.unwrap_or(defaults.invert),
        };

        let runtime_file = file.runtime.unwrap_or_default();
        let runtime = RuntimeSettings {
            max_consecutive_grab_failures: runtime_file
                .max_consecutive_grab_failures
                .unwrap_or(DEFAULT_MAX_GRAB_FAILURES),
            lost_target_hold_frames: runtime_file.lost_target_hold_frames.unwrap_or(0),
            report_active_objects: runtime_file.report_active_objects.unwrap_or(true),
            max_frames: runtime_file.max_frames,
        };

        let display_file = file.display.unwrap_or_default();
        let display = DisplaySettings {
            snapshot_path: display_file.snapshot_path,
            snapshot_every: display_file
                .snapshot_every
                .unwrap_or(DEFAULT_SNAPSHOT_EVERY),
        };

        Ok(Self {
            camera,
            detector,
            actuator,
            mapping,
            runtime,
            display,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = env_value("PANTILT_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(backend) = env_value("PANTILT_DETECTOR_BACKEND") {
            self.detector.backend = backend.parse()?;
        }
        if let Some(path) = env_value("PANTILT_DETECTOR_SCRIPT") {
            self.detector.script_path = Some(PathBuf::from(path));
        }
        if let Some(path) = env_value("PANTILT_DETECTOR_MODEL") {
            self.detector.model_path = Some(PathBuf::from(path));
        }
        if let Some(backend) = env_value("PANTILT_ACTUATOR_BACKEND") {
            self.actuator.backend = backend.parse()?;
        }
        if let Some(limit) = env_value("PANTILT_MAX_GRAB_FAILURES") {
            self.runtime.max_consecutive_grab_failures = limit.parse().map_err(|_| {
                anyhow!("PANTILT_MAX_GRAB_FAILURES must be a non-negative integer")
            })?;
        }
        if let Some(path) = env_value("PANTILT_SNAPSHOT_PATH") {
            self.display.snapshot_path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Checks ranges and re-derives the mapping's frame size from the camera settings.
    pub fn validate(&mut self) -> Result<()> {
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera.device must not be empty"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera resolution must be non-zero"));
        }
        self.mapping.frame_width = self.camera.width;
        self.mapping.frame_height = self.camera.height;

        let m = &self.mapping;
        if !(0.0..=180.0).contains(&m.angle_min)
            || !(0.0..=180.0).contains(&m.angle_max)
            || m.angle_min >= m.angle_max
        {
            return Err(anyhow!(
                "mapping angles must satisfy 0 <= angle_min < angle_max <= 180 (got {}..{})",
                m.angle_min,
                m.angle_max
            ));
        }
        if !(m.duty_min > 0.0 && m.duty_min < m.duty_max && m.duty_max < 100.0) {
            return Err(anyhow!(
                "mapping duty cycle must satisfy 0 < duty_min < duty_max < 100 (got {}..{})",
                m.duty_min,
                m.duty_max
            ));
        }
        if !(self.actuator.frequency_hz.is_finite() && self.actuator.frequency_hz > 0.0) {
            return Err(anyhow!("actuator.frequency_hz must be positive"));
        }
        if self.actuator.backend == ActuatorKind::Sysfs && self.actuator.pan == self.actuator.tilt {
            return Err(anyhow!("pan and tilt must use different PWM channels"));
        }
        if !(0.0..=1.0).contains(&self.detector.confidence_threshold)
            || !(0.0..=1.0).contains(&self.detector.iou_threshold)
        {
            return Err(anyhow!("detector thresholds must lie in 0..=1"));
        }
        if self.detector.input_size == 0 {
            return Err(anyhow!("detector.input_size must be non-zero"));
        }
        if self.display.snapshot_every == 0 {
            return Err(anyhow!("display.snapshot_every must be greater than zero"));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<TrackerConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
