//! Camera sources.
//!
//! Every source follows the same open / grab / retrieve / close cycle:
//! - `open` fails fast when the device is missing (fatal at startup)
//! - `grab` waits for the next frame, at most about one frame period
//! - `retrieve_frame` hands out the grabbed frame as packed RGB24
//! - `close` releases the device; calling it twice is harmless
//!
//! Sources:
//! - Synthetic (`stub://...` device names), always available
//! - V4L2 devices such as `/dev/video0` (feature: ingest-v4l2)

pub mod normalize;
pub mod v4l2;

pub use normalize::{normalize_to_rgb, PixelFormat};
pub use v4l2::{V4l2Config, V4l2Source};

use anyhow::{Context, Result};

use crate::frame::Frame;

pub trait Camera {
    fn open(&mut self) -> Result<()>;

    fn grab(&mut self) -> Result<()>;

    /// Returns the most recently grabbed frame. Errors if nothing was grabbed since the last call.
    fn retrieve_frame(&mut self) -> Result<Frame>;

    fn close(&mut self);

    fn stats(&self) -> CameraStats;
}

/// Counters reported in the periodic health line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CameraStats {
    pub device: String,
    pub frames_captured: u64,
    pub grab_failures: u64,
}

/// Builds and opens the configured camera. Any failure here is fatal at startup.
pub fn open_camera(config: &V4l2Config) -> Result<V4l2Source> {
    let mut camera = V4l2Source::new(config.clone())
        .with_context(|| format!("failed to open camera {}", config.device))?;
    camera
        .open()
        .with_context(|| format!("failed to open camera {}", config.device))?;
    Ok(camera)
}
