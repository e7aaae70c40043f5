use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::Path;

use crate::detect::backend::DetectorBackend;
use crate::frame::Frame;
use crate::track::{BoundingBox, RawDetection};

const PATROL_FRAMES: usize = 300;

#[derive(Debug, Deserialize)]
struct ScriptFile {
    frames: Vec<Vec<RawDetection>>,
    #[serde(default = "default_repeat")]
    repeat: bool,
}

fn default_repeat() -> bool {
    true
}

/// Replays a fixed sequence of per-frame detections, ignoring pixels.
///
/// Used for dry runs without a model and for driving the loop in tests.
pub struct ScriptedBackend {
    frames: Vec<Vec<RawDetection>>,
    repeat: bool,
    cursor: usize,
}

impl ScriptedBackend {
    pub fn new(frames: Vec<Vec<RawDetection>>) -> Self {
        Self {
            frames,
            repeat: true,
            cursor: 0,
        }
    }

    /// Stop emitting detections after the last scripted frame instead of looping.
    pub fn once(mut self) -> Self {
        self.repeat = false;
        self
    }

    /// Loads `{"frames": [[detection, ...], ...], "repeat": bool}` from a JSON file.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read detection script {}", path.display()))?;
        let script: ScriptFile = serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid detection script {}: {}", path.display(), e))?;
        Ok(Self {
            frames: script.frames,
            repeat: script.repeat,
            cursor: 0,
        })
    }

    /// Built-in scene: a person crossing the frame, a parked car, a dog (not
    /// allow-listed) and a second person who shows up halfway through.
    pub fn patrol(width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        let frames = (0..PATROL_FRAMES)
            .map(|i| {
                let t = i as f32 / PATROL_FRAMES as f32;
                let mut dets = vec![
                    RawDetection::new(
                        1,
                        0,
                        BoundingBox::centered(w * (0.1 + 0.8 * t), h * 0.55, w * 0.08, h * 0.45),
                        0.91,
                    ),
                    RawDetection::new(
                        2,
                        2,
                        BoundingBox::centered(w * 0.75, h * 0.7, w * 0.25, h * 0.2),
                        0.88,
                    ),
                    RawDetection::new(
                        3,
                        16,
                        BoundingBox::centered(w * 0.3, h * 0.85, w * 0.1, h * 0.1),
                        0.64,
                    ),
                ];
                if t >= 0.5 {
                    dets.push(RawDetection::new(
                        4,
                        0,
                        BoundingBox::centered(w * (1.2 - t), h * 0.4, w * 0.06, h * 0.3),
                        0.77,
                    ));
                }
                dets
            })
            .collect();
        Self::new(frames)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn track(&mut self, _frame: &Frame) -> Result<Vec<RawDetection>> {
        if self.frames.is_empty() {
            return Ok(Vec::new());
        }
        if self.cursor >= self.frames.len() {
            if !self.repeat {
                return Ok(Vec::new());
            }
            self.cursor = 0;
        }
        let dets = self.frames[self.cursor].clone();
        self.cursor += 1;
        Ok(dets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn frame() -> Frame {
        Frame::from_rgb(vec![0; 12], 2, 2, 1).unwrap()
    }

    #[test]
    fn replays_and_loops() -> Result<()> {
        let a = RawDetection::new(1, 0, BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.5);
        let mut backend = ScriptedBackend::new(vec![vec![a.clone()], vec![]]);
        assert_eq!(backend.track(&frame())?, vec![a.clone()]);
        assert!(backend.track(&frame())?.is_empty());
        assert_eq!(backend.track(&frame())?, vec![a]);
        Ok(())
    }

    #[test]
    fn once_runs_dry() -> Result<()> {
        let a = RawDetection::new(1, 0, BoundingBox::new(0.0, 0.0, 1.0, 1.0), 0.5);
        let mut backend = ScriptedBackend::new(vec![vec![a]]).once();
        assert_eq!(backend.track(&frame())?.len(), 1);
        assert!(backend.track(&frame())?.is_empty());
        assert!(backend.track(&frame())?.is_empty());
        Ok(())
    }

    #[test]
    fn loads_script_file() -> Result<()> {
        let mut file = NamedTempFile::new()?;
        write!(
            file,
            r#"{{
                "repeat": false,
                "frames": [
                    [{{"track_id": 3, "class_id": 0, "confidence": 0.9,
                       "bbox": {{"x1": 10, "y1": 20, "x2": 30, "y2": 60}}}},
                     {{"class_id": 2, "confidence": 0.4,
                       "bbox": {{"x1": 0, "y1": 0, "x2": 5, "y2": 5}}}}]
                ]
            }}"#
        )?;
        let mut backend = ScriptedBackend::from_path(file.path())?;
        let dets = backend.track(&frame())?;
        assert_eq!(dets.len(), 2);
        assert_eq!(dets[0].track_id, Some(3));
        assert_eq!(dets[0].bbox, BoundingBox::new(10.0, 20.0, 30.0, 60.0));
        assert_eq!(dets[1].track_id, None);
        assert!(backend.track(&frame())?.is_empty());
        Ok(())
    }

    #[test]
    fn patrol_scene_stays_in_frame() -> Result<()> {
        let mut backend = ScriptedBackend::patrol(1280, 720);
        assert_eq!(backend.len(), PATROL_FRAMES);
        for _ in 0..PATROL_FRAMES {
            for det in backend.track(&frame())? {
                let (cx, cy) = det.bbox.center();
                assert!((0.0..=1280.0).contains(&cx));
                assert!((0.0..=720.0).contains(&cy));
            }
        }
        Ok(())
    }
}
