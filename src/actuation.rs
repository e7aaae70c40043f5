//! Bounding box to pan/tilt command mapping.
//!
//! Pixel centers are mapped linearly onto an angle band (35°..145° by default), inverted
//! for the mounting orientation, clamped to the servo's safe 0°..180° travel and finally
//! interpolated into PWM duty cycle percent.

use crate::selection::Selection;
use crate::track::{BoundingBox, Track};

/// Full mechanical travel of the servos, in degrees.
pub const SAFE_ANGLE_MIN: f64 = 0.0;
pub const SAFE_ANGLE_MAX: f64 = 180.0;

/// Duty cycle command for both axes, in percent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActuatorCommand {
    pub pan: f64,
    pub tilt: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ServoMapping {
    pub frame_width: u32,
    pub frame_height: u32,
    pub angle_min: f64,
    pub angle_max: f64,
    /// Duty cycle at 0°.
    pub duty_min: f64,
    /// Duty cycle at 180°.
    pub duty_max: f64,
    /// Mirror angles (180° - angle) for servos mounted upside down.
    pub invert: bool,
}

impl Default for ServoMapping {
    fn default() -> Self {
        Self {
            frame_width: 1280,
            frame_height: 720,
            angle_min: 35.0,
            angle_max: 145.0,
            duty_min: 2.5,
            duty_max: 12.5,
            invert: true,
        }
    }
}

impl ServoMapping {
    /// Band angles for a pixel position, before inversion or clamping.
    pub fn band_angles(&self, x: f64, y: f64) -> (f64, f64) {
        let span = self.angle_max - self.angle_min;
        (
            self.angle_min + (x / self.frame_width as f64) * span,
            self.angle_min + (y / self.frame_height as f64) * span,
        )
    }

    /// Applies mounting inversion and clamps to the safe travel.
    pub fn servo_angle(&self, band_angle: f64) -> f64 {
        let angle = if self.invert {
            SAFE_ANGLE_MAX - band_angle
        } else {
            band_angle
        };
        angle.clamp(SAFE_ANGLE_MIN, SAFE_ANGLE_MAX)
    }

    pub fn duty_for_angle(&self, angle: f64) -> f64 {
        let angle = angle.clamp(SAFE_ANGLE_MIN, SAFE_ANGLE_MAX);
        self.duty_min + (angle / SAFE_ANGLE_MAX) * (self.duty_max - self.duty_min)
    }

    /// Command that points the rig at the center of `bbox`.
    pub fn command_for(&self, bbox: &BoundingBox) -> ActuatorCommand {
        let (cx, cy) = bbox.center();
        let (pan_band, tilt_band) = self.band_angles(cx as f64, cy as f64);
        ActuatorCommand {
            pan: self.duty_for_angle(self.servo_angle(pan_band)),
            tilt: self.duty_for_angle(self.servo_angle(tilt_band)),
        }
    }

    /// Midpoint of the duty range on both axes (90° on a standard servo).
    pub fn center(&self) -> ActuatorCommand {
        let mid = (self.duty_min + self.duty_max) / 2.0;
        ActuatorCommand {
            pan: mid,
            tilt: mid,
        }
    }
}

/// Why a command was produced, for logging and tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandReason {
    Following,
    Idle,
    TargetLost,
    HoldingLast,
}

/// Turns the frame processor's forwarded track into a command every frame.
#[derive(Debug)]
pub struct ActuationController {
    mapping: ServoMapping,
    hold_frames: u32,
    last: Option<(Selection, ActuatorCommand)>,
    missed: u32,
}

impl ActuationController {
    pub fn new(mapping: ServoMapping) -> Self {
        Self {
            mapping,
            hold_frames: 0,
            last: None,
            missed: 0,
        }
    }

    /// Keep the last command for up to `frames` frames after the selected track disappears.
    pub fn with_hold_frames(mut self, frames: u32) -> Self {
        self.hold_frames = frames;
        self
    }

    pub fn mapping(&self) -> &ServoMapping {
        &self.mapping
    }

    pub fn center(&self) -> ActuatorCommand {
        self.mapping.center()
    }

    /// Maps against the size of the frames actually delivered, which can differ from
    /// the configured resolution when the driver negotiates another mode.
    pub fn set_frame_size(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        if (width, height) != (self.mapping.frame_width, self.mapping.frame_height) {
            log::info!(
                "servo mapping follows {}x{} frames (configured {}x{})",
                width,
                height,
                self.mapping.frame_width,
                self.mapping.frame_height
            );
            self.mapping.frame_width = width;
            self.mapping.frame_height = height;
        }
    }

    pub fn command(
        &mut self,
        forwarded: Option<&Track>,
        selection: &Selection,
    ) -> (ActuatorCommand, CommandReason) {
        if let Some(track) = forwarded {
            let cmd = self.mapping.command_for(&track.bbox);
            self.last = Some((selection.clone(), cmd));
            self.missed = 0;
            return (cmd, CommandReason::Following);
        }

        if selection.is_none() {
            self.last = None;
            return (self.center(), CommandReason::Idle);
        }

        self.missed = self.missed.saturating_add(1);
        if let Some((last_selection, cmd)) = &self.last {
            if last_selection == selection && self.missed <= self.hold_frames {
                return (*cmd, CommandReason::HoldingLast);
            }
        }
        (self.center(), CommandReason::TargetLost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::ObjectClass;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn track_at(id: u64, cx: f32, cy: f32) -> Track {
        Track {
            id,
            class: ObjectClass::Person,
            bbox: BoundingBox::centered(cx, cy, 40.0, 80.0),
            confidence: 0.9,
        }
    }

    #[test]
    fn corners_map_to_band_edges() {
        let m = ServoMapping::default();
        let (x0, y0) = m.band_angles(0.0, 0.0);
        assert!(approx(x0, 35.0) && approx(y0, 35.0));
        let (x1, y1) = m.band_angles(1280.0, 720.0);
        assert!(approx(x1, 145.0) && approx(y1, 145.0));

        for band in [x0, x1] {
            let angle = m.servo_angle(band);
            assert!((0.0..=180.0).contains(&angle));
            let duty = m.duty_for_angle(angle);
            assert!((2.5..=12.5).contains(&duty));
        }
    }

    #[test]
    fn corner_boxes_produce_inverted_duty() {
        let m = ServoMapping::default();
        let top_left = m.command_for(&BoundingBox::new(0.0, 0.0, 0.0, 0.0));
        // 35° inverted is 145° -> 2.5 + 145/180 * 10
        assert!(approx(top_left.pan, 2.5 + 145.0 / 18.0));
        assert!(approx(top_left.tilt, 2.5 + 145.0 / 18.0));

        let bottom_right = m.command_for(&BoundingBox::new(1280.0, 720.0, 1280.0, 720.0));
        assert!(approx(bottom_right.pan, 2.5 + 35.0 / 18.0));
        assert!(approx(bottom_right.tilt, 2.5 + 35.0 / 18.0));
    }

    #[test]
    fn frame_center_maps_to_servo_center() {
        let m = ServoMapping::default();
        let cmd = m.command_for(&BoundingBox::centered(640.0, 360.0, 100.0, 100.0));
        assert!(approx(cmd.pan, 7.5));
        assert!(approx(cmd.tilt, 7.5));
        assert_eq!(m.center(), ActuatorCommand { pan: 7.5, tilt: 7.5 });
    }

    #[test]
    fn wide_band_is_clamped_to_safe_travel() {
        let m = ServoMapping {
            angle_min: 0.0,
            angle_max: 180.0,
            invert: false,
            ..ServoMapping::default()
        };
        // Boxes hanging off the frame push the band past 180°.
        let cmd = m.command_for(&BoundingBox::centered(2000.0, -300.0, 10.0, 10.0));
        assert!(approx(cmd.pan, 12.5));
        assert!(approx(cmd.tilt, 2.5));
    }

    #[test]
    fn controller_centers_when_idle_or_lost() {
        let mut ctl = ActuationController::new(ServoMapping::default());
        let (cmd, reason) = ctl.command(None, &Selection::None);
        assert_eq!(reason, CommandReason::Idle);
        assert_eq!(cmd, ctl.center());

        let target = Selection::Target("7".to_string());
        let (cmd, reason) = ctl.command(None, &target);
        assert_eq!(reason, CommandReason::TargetLost);
        assert_eq!(cmd, ActuatorCommand { pan: 7.5, tilt: 7.5 });
    }

    #[test]
    fn hold_keeps_last_command_for_configured_frames() {
        let mut ctl = ActuationController::new(ServoMapping::default()).with_hold_frames(2);
        let target = Selection::Target("4".to_string());
        let track = track_at(4, 100.0, 100.0);

        let (following, reason) = ctl.command(Some(&track), &target);
        assert_eq!(reason, CommandReason::Following);

        assert_eq!(ctl.command(None, &target), (following, CommandReason::HoldingLast));
        assert_eq!(ctl.command(None, &target), (following, CommandReason::HoldingLast));
        assert_eq!(
            ctl.command(None, &target),
            (ctl.center(), CommandReason::TargetLost)
        );
    }

    #[test]
    fn frame_size_change_rescales_mapping() {
        let mut ctl = ActuationController::new(ServoMapping::default());
        ctl.set_frame_size(640, 360);
        assert_eq!(ctl.mapping().frame_width, 640);
        assert_eq!(ctl.mapping().frame_height, 360);

        let corner = track_at(1, 640.0, 360.0);
        let (cmd, _) = ctl.command(Some(&corner), &Selection::None);
        assert!(approx(cmd.pan, 2.5 + 35.0 / 18.0));
        assert!(approx(cmd.tilt, 2.5 + 35.0 / 18.0));

        ctl.set_frame_size(0, 0);
        assert_eq!(ctl.mapping().frame_width, 640);
    }

    #[test]
    fn hold_does_not_carry_over_to_a_new_target() {
        let mut ctl = ActuationController::new(ServoMapping::default()).with_hold_frames(10);
        let track = track_at(4, 100.0, 100.0);
        ctl.command(Some(&track), &Selection::Target("4".to_string()));

        let (cmd, reason) = ctl.command(None, &Selection::Target("5".to_string()));
        assert_eq!(reason, CommandReason::TargetLost);
        assert_eq!(cmd, ctl.center());
    }
}
