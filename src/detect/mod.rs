//! Detector/tracker backends.
//!
//! A backend turns one frame into raw detections carrying tracker ids. Class filtering
//! happens downstream in the frame processor, so backends report every class they see.

mod backend;
pub mod iou_tracker;
pub mod scripted;
#[cfg(feature = "backend-tract")]
pub mod tract;

pub use backend::DetectorBackend;
pub use iou_tracker::{IouTracker, IouTrackerConfig};
pub use scripted::ScriptedBackend;
#[cfg(feature = "backend-tract")]
pub use tract::TractBackend;

use anyhow::{bail, Result};

use crate::config::{DetectorKind, DetectorSettings};

/// Builds the configured backend. `frame_size` is the camera resolution.
pub fn open_backend(
    settings: &DetectorSettings,
    frame_size: (u32, u32),
) -> Result<Box<dyn DetectorBackend>> {
    match settings.backend {
        DetectorKind::Scripted => {
            let backend = match &settings.script_path {
                Some(path) => ScriptedBackend::from_path(path)?,
                None => ScriptedBackend::patrol(frame_size.0, frame_size.1),
            };
            Ok(Box::new(backend))
        }
        DetectorKind::Tract => {
            #[cfg(feature = "backend-tract")]
            {
                let Some(model_path) = &settings.model_path else {
                    bail!("the tract detector needs detector.model_path");
                };
                let backend = TractBackend::new(model_path, settings.input_size)?
                    .with_thresholds(settings.confidence_threshold, settings.iou_threshold);
                Ok(Box::new(backend))
            }
            #[cfg(not(feature = "backend-tract"))]
            {
                bail!("the tract detector requires the backend-tract feature")
            }
        }
    }
}
