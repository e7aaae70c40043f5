//! Presentation of annotated frames.
//!
//! Nothing here affects what the rig does. Sinks only see frames after the actuator
//! command for that frame has been issued.

use anyhow::Result;

use crate::config::DisplaySettings;
use crate::frame::Frame;
use crate::processor::{Annotation, Emphasis};

pub trait FrameSink {
    fn present(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<()>;

    fn close(&mut self) {}
}

/// Box outline color (RGB) for each emphasis.
pub fn emphasis_color(emphasis: Emphasis) -> [u8; 3] {
    match emphasis {
        Emphasis::Selected => [255, 0, 0],
        Emphasis::DefaultFollow => [255, 200, 0],
        Emphasis::Plain => [0, 255, 0],
    }
}

/// Logs labels at trace level and discards the frame.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn present(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<()> {
        if log::log_enabled!(log::Level::Trace) {
            for a in annotations {
                log::trace!("frame {}: {:?} {}", frame.index, a.emphasis, a.label());
            }
        }
        Ok(())
    }
}

/// Builds the configured sink: snapshots when a path is set, otherwise `NullSink`.
pub fn open_sink(settings: &DisplaySettings) -> Result<Box<dyn FrameSink>> {
    match &settings.snapshot_path {
        None => Ok(Box::new(NullSink)),
        #[cfg(feature = "snapshot")]
        Some(path) => Ok(Box::new(SnapshotSink::new(
            path.clone(),
            settings.snapshot_every,
        ))),
        #[cfg(not(feature = "snapshot"))]
        Some(path) => anyhow::bail!(
            "snapshot output {} requires the snapshot feature",
            path.display()
        ),
    }
}

/// Draws 2 px box outlines into a copy of the frame.
pub fn draw_annotations(frame: &Frame, annotations: &[Annotation]) -> Vec<u8> {
    let mut rgb = frame.pixels().to_vec();
    let (w, h) = (frame.width as i64, frame.height as i64);
    if w == 0 || h == 0 {
        return rgb;
    }
    let mut put = |x: i64, y: i64, color: [u8; 3]| {
        if (0..w).contains(&x) && (0..h).contains(&y) {
            let offset = ((y * w + x) * 3) as usize;
            rgb[offset..offset + 3].copy_from_slice(&color);
        }
    };
    for a in annotations {
        let color = emphasis_color(a.emphasis);
        let b = &a.track.bbox;
        if ![b.x1, b.y1, b.x2, b.y2].iter().all(|v| v.is_finite()) {
            continue;
        }
        // Edges beyond the frame land two pixels outside it, so they are not drawn.
        let clamp_x = |v: f32| (v.round() as i64).clamp(-2, w + 1);
        let clamp_y = |v: f32| (v.round() as i64).clamp(-2, h + 1);
        let (x1, y1) = (clamp_x(b.x1), clamp_y(b.y1));
        let (x2, y2) = (clamp_x(b.x2), clamp_y(b.y2));
        for t in 0..2 {
            for x in x1..=x2 {
                put(x, y1 + t, color);
                put(x, y2 - t, color);
            }
            for y in y1..=y2 {
                put(x1 + t, y, color);
                put(x2 - t, y, color);
            }
        }
    }
    rgb
}

#[cfg(feature = "snapshot")]
pub use snapshot::SnapshotSink;

#[cfg(feature = "snapshot")]
mod snapshot {
    use anyhow::{anyhow, Context, Result};
    use std::path::PathBuf;

    use super::{draw_annotations, FrameSink};
    use crate::frame::Frame;
    use crate::processor::Annotation;

    /// Writes every Nth annotated frame as a JPEG, overwriting the previous snapshot.
    pub struct SnapshotSink {
        path: PathBuf,
        every: u64,
        written: u64,
    }

    impl SnapshotSink {
        pub fn new(path: PathBuf, every: u64) -> Self {
            Self {
                path,
                every: every.max(1),
                written: 0,
            }
        }
    }

    impl FrameSink for SnapshotSink {
        fn present(&mut self, frame: &Frame, annotations: &[Annotation]) -> Result<()> {
            if frame.index % self.every != 0 {
                return Ok(());
            }
            let rgb = draw_annotations(frame, annotations);
            let img = image::RgbImage::from_raw(frame.width, frame.height, rgb)
                .ok_or_else(|| anyhow!("snapshot buffer does not match frame size"))?;
            let tmp = self.path.with_extension("tmp.jpg");
            img.save_with_format(&tmp, image::ImageFormat::Jpeg)
                .with_context(|| format!("write snapshot {}", tmp.display()))?;
            std::fs::rename(&tmp, &self.path)
                .with_context(|| format!("move snapshot to {}", self.path.display()))?;
            self.written += 1;
            Ok(())
        }

        fn close(&mut self) {
            log::info!(
                "snapshot sink wrote {} frames to {}",
                self.written,
                self.path.display()
            );
        }
    }
}
