//! Per-frame object geometry.
//!
//! The detector/tracker produces `RawDetection`s. Only detections whose class is on the
//! allow-list and that carry a tracker id become `Track`s; everything else is dropped
//! before it reaches any other part of the crate.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Object classes the follower considers. Every other detector class is discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectClass {
    Person,
    Car,
    Motorcycle,
    Bus,
    Truck,
}

impl ObjectClass {
    pub const ALLOW_LIST: [ObjectClass; 5] = [
        ObjectClass::Person,
        ObjectClass::Car,
        ObjectClass::Motorcycle,
        ObjectClass::Bus,
        ObjectClass::Truck,
    ];

    /// Maps a COCO-80 class index to an allow-listed class.
    pub fn from_class_id(class_id: u32) -> Option<Self> {
        match class_id {
            0 => Some(ObjectClass::Person),
            2 => Some(ObjectClass::Car),
            3 => Some(ObjectClass::Motorcycle),
            5 => Some(ObjectClass::Bus),
            7 => Some(ObjectClass::Truck),
            _ => None,
        }
    }

    pub fn class_id(self) -> u32 {
        match self {
            ObjectClass::Person => 0,
            ObjectClass::Car => 2,
            ObjectClass::Motorcycle => 3,
            ObjectClass::Bus => 5,
            ObjectClass::Truck => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ObjectClass::Person => "person",
            ObjectClass::Car => "car",
            ObjectClass::Motorcycle => "motorcycle",
            ObjectClass::Bus => "bus",
            ObjectClass::Truck => "truck",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis-aligned box in pixel coordinates (top-left / bottom-right corners).
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Box of the given size centered on `(cx, cy)`.
    pub fn centered(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self::new(cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (
            (self.x2 - self.x1) / 2.0 + self.x1,
            (self.y2 - self.y1) / 2.0 + self.y1,
        )
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);
        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }
}

/// One detector/tracker output row, before allow-list filtering.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    /// Tracker-assigned id. `None` when the tracker has not confirmed the object yet.
    #[serde(default)]
    pub track_id: Option<u64>,
    pub class_id: u32,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl RawDetection {
    pub fn new(track_id: u64, class_id: u32, bbox: BoundingBox, confidence: f32) -> Self {
        Self {
            track_id: Some(track_id),
            class_id,
            bbox,
            confidence,
        }
    }
}

/// An allow-listed, tracked object in the current frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: u64,
    pub class: ObjectClass,
    pub bbox: BoundingBox,
    pub confidence: f32,
}

impl Track {
    /// Returns `None` for classes off the allow-list and for rows without a positive track id.
    pub fn from_detection(det: &RawDetection) -> Option<Self> {
        let class = ObjectClass::from_class_id(det.class_id)?;
        let id = det.track_id.filter(|id| *id > 0)?;
        Some(Self {
            id,
            class,
            bbox: det.bbox,
            confidence: det.confidence.clamp(0.0, 1.0),
        })
    }

    pub fn label(&self) -> String {
        format!("ID: {} {} ({:.2})", self.id, self.class, self.confidence)
    }
}
