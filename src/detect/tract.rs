#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::iou_tracker::IouTracker;
use crate::frame::Frame;
use crate::track::{BoundingBox, RawDetection};

/// Tract-based YOLOv8 detector with IoU tracking.
///
/// Loads a local ONNX export with a square `1x3xSxS` input. Frames are stretched to
/// `S x S` (nearest neighbour), raw predictions are decoded, suppressed per class and
/// handed to an `IouTracker` for ids.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    confidence_threshold: f32,
    nms_threshold: f32,
    tracker: IouTracker,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            confidence_threshold: 0.25,
            nms_threshold: 0.45,
            tracker: IouTracker::default(),
        })
    }

    /// Override the default confidence and NMS IoU thresholds.
    pub fn with_thresholds(mut self, confidence: f32, nms_iou: f32) -> Self {
        self.confidence_threshold = confidence;
        self.nms_threshold = nms_iou;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let side = self.input_size as usize;
        let (fw, fh) = (frame.width as usize, frame.height as usize);
        let pixels = frame.pixels();
        if pixels.len() != fw * fh * 3 {
            return Err(anyhow!(
                "expected {} RGB bytes, received {}",
                fw * fh * 3,
                pixels.len()
            ));
        }

        let input = tract_ndarray::Array4::from_shape_fn((1, 3, side, side), |(_, c, y, x)| {
            let sx = (x * fw / side).min(fw - 1);
            let sy = (y * fh / side).min(fh - 1);
            pixels[(sy * fw + sx) * 3 + c] as f32 / 255.0
        });
        Ok(input.into_tensor())
    }

    /// Decodes `[1, 4 + classes, anchors]` (or its transpose) into frame-space boxes.
    fn decode(&self, outputs: TVec<TValue>, frame: &Frame) -> Result<Vec<RawDetection>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let view = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let shape = view.shape();
        if shape.len() != 3 || shape[0] != 1 {
            return Err(anyhow!("unexpected YOLO output shape {:?}", shape));
        }
        // Exports differ in whether anchors or attributes come last; attributes are fewer.
        let transposed = shape[1] > shape[2];
        let (attrs, anchors) = if transposed {
            (shape[2], shape[1])
        } else {
            (shape[1], shape[2])
        };
        if attrs <= 4 {
            return Err(anyhow!("YOLO output has no class scores: {:?}", shape));
        }
        let at = |attr: usize, anchor: usize| -> f32 {
            if transposed {
                view[[0, anchor, attr]]
            } else {
                view[[0, attr, anchor]]
            }
        };

        let sx = frame.width as f32 / self.input_size as f32;
        let sy = frame.height as f32 / self.input_size as f32;
        let mut candidates = Vec::new();
        for anchor in 0..anchors {
            let (class_id, score) = (4..attrs)
                .map(|attr| (attr - 4, at(attr, anchor)))
                .max_by(|a, b| a.1.total_cmp(&b.1))
                .unwrap_or((0, 0.0));
            if score < self.confidence_threshold {
                continue;
            }
            let bbox = BoundingBox::centered(
                at(0, anchor) * sx,
                at(1, anchor) * sy,
                at(2, anchor) * sx,
                at(3, anchor) * sy,
            );
            candidates.push(RawDetection {
                track_id: None,
                class_id: class_id as u32,
                bbox,
                confidence: score,
            });
        }

        Ok(non_max_suppression(candidates, self.nms_threshold))
    }
}

/// Class-aware greedy NMS. Keeps the highest scoring box of each overlapping group.
fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::new();
    for cand in candidates {
        let suppressed = kept
            .iter()
            .any(|k| k.class_id == cand.class_id && k.bbox.iou(&cand.bbox) > iou_threshold);
        if !suppressed {
            kept.push(cand);
        }
    }
    kept
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn track(&mut self, frame: &Frame) -> Result<Vec<RawDetection>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let detections = self.decode(outputs, frame)?;
        Ok(self.tracker.update(detections))
    }

    fn warm_up(&mut self) -> Result<()> {
        let side = self.input_size as usize;
        let input = Tensor::zero::<f32>(&[1, 3, side, side])?;
        self.model
            .run(tvec!(input.into()))
            .context("ONNX warm-up failed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nms_keeps_best_per_class() {
        let a = RawDetection {
            track_id: None,
            class_id: 0,
            bbox: BoundingBox::new(0.0, 0.0, 100.0, 100.0),
            confidence: 0.9,
        };
        let b = RawDetection {
            confidence: 0.6,
            bbox: BoundingBox::new(5.0, 5.0, 100.0, 100.0),
            ..a.clone()
        };
        let c = RawDetection {
            class_id: 2,
            ..b.clone()
        };
        let kept = non_max_suppression(vec![b, a.clone(), c.clone()], 0.45);
        assert_eq!(kept, vec![a, c]);
    }
}
