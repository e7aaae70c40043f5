//! Servo drivers for the pan/tilt rig.
//!
//! - `sysfs`: Linux PWM class devices (`/sys/class/pwm/pwmchipN/pwmM`)
//! - `recording`: in-memory channel that keeps every command (tests, dry runs)

mod recording;
pub mod sysfs;

pub use recording::{ChannelEvent, ChannelLog, RecordingChannel};
pub use sysfs::{discover_chips, PwmChipInfo, SysfsPwmChannel};

use anyhow::Result;

use crate::actuation::ActuatorCommand;
use crate::config::{ActuatorKind, ActuatorSettings, PwmChannelSettings};

/// One PWM output driving one servo.
pub trait ServoChannel: Send {
    fn name(&self) -> &str;

    /// Begin pulsing at `duty` percent.
    fn start(&mut self, duty: f64) -> Result<()>;

    fn set_duty(&mut self, duty: f64) -> Result<()>;

    /// Stop pulsing and release the output.
    fn stop(&mut self) -> Result<()>;
}

/// Two servo channels driven as one pan/tilt unit.
pub struct PanTiltRig {
    pan: Box<dyn ServoChannel>,
    tilt: Box<dyn ServoChannel>,
    started: bool,
}

impl PanTiltRig {
    pub fn new(pan: Box<dyn ServoChannel>, tilt: Box<dyn ServoChannel>) -> Self {
        Self {
            pan,
            tilt,
            started: false,
        }
    }

    pub fn start(&mut self, initial: ActuatorCommand) -> Result<()> {
        self.pan.start(initial.pan)?;
        if let Err(err) = self.tilt.start(initial.tilt) {
            let _ = self.pan.stop();
            return Err(err);
        }
        self.started = true;
        log::info!(
            "rig started: pan={} tilt={} duty={:.2}%/{:.2}%",
            self.pan.name(),
            self.tilt.name(),
            initial.pan,
            initial.tilt
        );
        Ok(())
    }

    /// Sends the command to both axes. Both are attempted even if the first fails.
    pub fn apply(&mut self, cmd: ActuatorCommand) -> Result<()> {
        let pan = self.pan.set_duty(cmd.pan);
        let tilt = self.tilt.set_duty(cmd.tilt);
        pan.and(tilt)
    }

    /// Stops both channels. Safe to call when never started.
    pub fn release(&mut self) -> Result<()> {
        if !self.started {
            return Ok(());
        }
        self.started = false;
        let pan = self.pan.stop();
        let tilt = self.tilt.stop();
        log::info!("rig released");
        pan.and(tilt)
    }
}

/// Builds the configured rig. The channels are not started.
pub fn open_rig(settings: &ActuatorSettings) -> Result<PanTiltRig> {
    match settings.backend {
        ActuatorKind::Recording => Ok(PanTiltRig::new(
            Box::new(RecordingChannel::new("pan")),
            Box::new(RecordingChannel::new("tilt")),
        )),
        ActuatorKind::Sysfs => {
            let channel = |pin: &PwmChannelSettings| {
                SysfsPwmChannel::new(
                    &settings.sysfs_root,
                    pin.chip,
                    pin.channel,
                    settings.frequency_hz,
                )
            };
            let pan = channel(&settings.pan)?;
            let tilt = channel(&settings.tilt)?;
            Ok(PanTiltRig::new(Box::new(pan), Box::new(tilt)))
        }
    }
}

impl Drop for PanTiltRig {
    fn drop(&mut self) {
        if let Err(err) = self.release() {
            log::warn!("rig release on drop failed: {}", err);
        }
    }
}
