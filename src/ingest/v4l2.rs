//! V4L2 camera source.
//!
//! `V4l2Source` captures from a local device node (e.g. /dev/video0) when built with
//! the `ingest-v4l2` feature, and falls back to a synthetic scene for `stub://` paths.
//!
//! The source is responsible for:
//! - Negotiating the configured resolution (RGB3, then RGBA, then YUYV)
//! - Pacing synthetic frames to the target frame rate
//! - Normalizing captured buffers to RGB24

use anyhow::{anyhow, Result};
#[cfg(feature = "ingest-v4l2")]
use anyhow::Context;
#[cfg(feature = "ingest-v4l2")]
use ouroboros::self_referencing;
use std::time::{Duration, Instant};

#[cfg(feature = "ingest-v4l2")]
use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{Camera, CameraStats};
use crate::frame::Frame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0") or "stub://<name>" for the synthetic scene.
    pub device: String,
    /// Target frame rate. Zero disables pacing of synthetic frames.
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 1280,
            height: 720,
        }
    }
}

/// V4L2 camera with a synthetic fallback for `stub://` paths.
pub struct V4l2Source {
    backend: V4l2Backend,
}

impl std::fmt::Debug for V4l2Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("V4l2Source").finish_non_exhaustive()
    }
}

enum V4l2Backend {
    Synthetic(SyntheticV4l2Source),
    #[cfg(feature = "ingest-v4l2")]
    Device(DeviceV4l2Source),
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Result<Self> {
        if config.width == 0 || config.height == 0 {
            return Err(anyhow!(
                "camera resolution must be non-zero, got {}x{}",
                config.width,
                config.height
            ));
        }
        if config.device.starts_with("stub://") {
            Ok(Self {
                backend: V4l2Backend::Synthetic(SyntheticV4l2Source::new(config)),
            })
        } else {
            #[cfg(feature = "ingest-v4l2")]
            {
                Ok(Self {
                    backend: V4l2Backend::Device(DeviceV4l2Source::new(config)),
                })
            }
            #[cfg(not(feature = "ingest-v4l2"))]
            {
                anyhow::bail!(
                    "camera {} requires the ingest-v4l2 feature",
                    config.device
                )
            }
        }
    }
}

impl Camera for V4l2Source {
    fn open(&mut self) -> Result<()> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.open(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.open(),
        }
    }

    fn grab(&mut self) -> Result<()> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.grab(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.grab(),
        }
    }

    fn retrieve_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.retrieve_frame(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.retrieve_frame(),
        }
    }

    fn close(&mut self) {
        match &mut self.backend {
            V4l2Backend::Synthetic(source) => source.close(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.close(),
        }
    }

    fn stats(&self) -> CameraStats {
        match &self.backend {
            V4l2Backend::Synthetic(source) => source.stats(),
            #[cfg(feature = "ingest-v4l2")]
            V4l2Backend::Device(source) => source.stats(),
        }
    }
}

fn frame_period(target_fps: u32) -> Option<Duration> {
    (target_fps > 0).then(|| Duration::from_secs_f64(1.0 / target_fps as f64))
}

// ----------------------------------------------------------------------------
// Synthetic source (stub://)
// ----------------------------------------------------------------------------

struct SyntheticV4l2Source {
    config: V4l2Config,
    opened: bool,
    frame_count: u64,
    pending: Option<Vec<u8>>,
    next_due: Option<Instant>,
}

impl SyntheticV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            config,
            opened: false,
            frame_count: 0,
            pending: None,
            next_due: None,
        }
    }

    fn open(&mut self) -> Result<()> {
        self.opened = true;
        log::info!(
            "V4l2Source: opened {} ({}x{}, synthetic)",
            self.config.device,
            self.config.width,
            self.config.height
        );
        Ok(())
    }

    fn grab(&mut self) -> Result<()> {
        if !self.opened {
            return Err(anyhow!("{} is not open", self.config.device));
        }
        if let Some(period) = frame_period(self.config.target_fps) {
            let now = Instant::now();
            let due = self.next_due.unwrap_or(now);
            if due > now {
                std::thread::sleep(due - now);
            }
            self.next_due = Some(due.max(now) + period);
        }
        self.frame_count += 1;
        self.pending = Some(self.generate_synthetic_pixels());
        Ok(())
    }

    fn retrieve_frame(&mut self) -> Result<Frame> {
        let pixels = self
            .pending
            .take()
            .ok_or_else(|| anyhow!("retrieve_frame called without a grabbed frame"))?;
        Frame::from_rgb(
            pixels,
            self.config.width,
            self.config.height,
            self.frame_count,
        )
    }

    /// Diagonal gradient that drifts one step per frame.
    fn generate_synthetic_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut pixels = vec![0u8; width * height * 3];
        for (i, px) in pixels.chunks_exact_mut(3).enumerate() {
            let x = i % width;
            let y = i / width;
            let shade = ((x + y) as u64 + self.frame_count) % 256;
            px[0] = shade as u8;
            px[1] = (shade / 2) as u8;
            px[2] = 96;
        }
        pixels
    }

    fn close(&mut self) {
        if self.opened {
            self.opened = false;
            log::info!("V4l2Source: closed {}", self.config.device);
        }
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            device: self.config.device.clone(),
            frames_captured: self.frame_count,
            grab_failures: 0,
        }
    }
}

// ----------------------------------------------------------------------------
// Device source using libv4l
// ----------------------------------------------------------------------------

#[cfg(feature = "ingest-v4l2")]
struct DeviceV4l2Source {
    config: V4l2Config,
    state: Option<DeviceV4l2State>,
    format: PixelFormat,
    active_width: u32,
    active_height: u32,
    frame_count: u64,
    grab_failures: u64,
    pending: Option<Vec<u8>>,
}

#[cfg(feature = "ingest-v4l2")]
#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

#[cfg(feature = "ingest-v4l2")]
impl DeviceV4l2Source {
    fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            format: PixelFormat::Rgb24,
            frame_count: 0,
            grab_failures: 0,
            pending: None,
        }
    }

    fn open(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut negotiated = None;
        for candidate in PixelFormat::NEGOTIATION_ORDER {
            let mut request = device.format().context("read v4l2 format")?;
            request.width = self.config.width;
            request.height = self.config.height;
            request.fourcc = v4l::FourCC::new(&candidate.fourcc());
            match device.set_format(&request) {
                Ok(format)
                    if PixelFormat::from_fourcc(&format.fourcc.repr) == Some(candidate) =>
                {
                    negotiated = Some((format, candidate));
                    break;
                }
                Ok(format) => log::debug!(
                    "V4l2Source: {} offered {} for {}",
                    self.config.device,
                    String::from_utf8_lossy(&format.fourcc.repr),
                    String::from_utf8_lossy(&candidate.fourcc())
                ),
                Err(err) => log::debug!(
                    "V4l2Source: {} rejected {}: {}",
                    self.config.device,
                    String::from_utf8_lossy(&candidate.fourcc()),
                    err
                ),
            }
        }
        let (format, pixel_format) = negotiated.ok_or_else(|| {
            anyhow!(
                "{} supports none of RGB3, AB24 or YUYV",
                self.config.device
            )
        })?;
        self.format = pixel_format;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;
        if (self.active_width, self.active_height) != (self.config.width, self.config.height) {
            log::warn!(
                "V4l2Source: {} delivers {}x{} instead of {}x{}",
                self.config.device,
                self.active_width,
                self.active_height,
                self.config.width,
                self.config.height
            );
        }

        let state = DeviceV4l2StateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);

        log::info!(
            "V4l2Source: opened {} ({}x{} {:?})",
            self.config.device,
            self.active_width,
            self.active_height,
            self.format
        );
        Ok(())
    }

    fn grab(&mut self) -> Result<()> {
        use v4l::io::traits::CaptureStream;

        let state = self.state.as_mut().context("v4l2 device not open")?;
        let grabbed = state.with_mut(|fields| {
            fields
                .stream
                .next()
                .map(|(buf, _meta)| buf.to_vec())
        });
        match grabbed {
            Ok(buf) => {
                self.frame_count += 1;
                self.pending = Some(buf);
                Ok(())
            }
            Err(err) => {
                self.grab_failures += 1;
                Err(anyhow::Error::new(err).context("capture v4l2 frame"))
            }
        }
    }

    fn retrieve_frame(&mut self) -> Result<Frame> {
        let buf = self
            .pending
            .take()
            .context("retrieve_frame called without a grabbed frame")?;
        let expected = self
            .format
            .bytes_per_frame(self.active_width, self.active_height)?;
        // Some drivers report a buffer larger than the image itself.
        let buf = buf.get(..expected).unwrap_or(&buf);
        let rgb = normalize_to_rgb(buf, self.active_width, self.active_height, self.format)?;
        Frame::from_rgb(rgb, self.active_width, self.active_height, self.frame_count)
    }

    fn close(&mut self) {
        if self.state.take().is_some() {
            log::info!("V4l2Source: closed {}", self.config.device);
        }
    }

    fn stats(&self) -> CameraStats {
        CameraStats {
            device: self.config.device.clone(),
            frames_captured: self.frame_count,
            grab_failures: self.grab_failures,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
