//! Greedy IoU association for detectors that do not assign ids themselves.
//!
//! Each frame, detections are matched (highest confidence first) to the live track of the
//! same class with the largest overlap. Unmatched detections open new tracks; tracks
//! unseen for more than `max_age` frames are dropped and their ids never reused.

use crate::track::{BoundingBox, RawDetection};

#[derive(Clone, Debug)]
pub struct IouTrackerConfig {
    /// Minimum IoU for a detection to continue a track.
    pub match_threshold: f32,
    /// Frames a track survives without a matching detection.
    pub max_age: u32,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.3,
            max_age: 15,
        }
    }
}

#[derive(Clone, Debug)]
struct LiveTrack {
    id: u64,
    class_id: u32,
    bbox: BoundingBox,
    misses: u32,
}

#[derive(Debug)]
pub struct IouTracker {
    config: IouTrackerConfig,
    tracks: Vec<LiveTrack>,
    next_id: u64,
}

impl IouTracker {
    pub fn new(config: IouTrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    pub fn live_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// Assigns a track id to every detection. Output keeps the input order.
    pub fn update(&mut self, mut detections: Vec<RawDetection>) -> Vec<RawDetection> {
        let mut order: Vec<usize> = (0..detections.len()).collect();
        order.sort_by(|&a, &b| {
            detections[b]
                .confidence
                .total_cmp(&detections[a].confidence)
        });

        let mut matched = vec![false; self.tracks.len()];
        for idx in order {
            let det = &detections[idx];
            let best = self
                .tracks
                .iter()
                .enumerate()
                .filter(|(t, track)| !matched[*t] && track.class_id == det.class_id)
                .map(|(t, track)| (t, track.bbox.iou(&det.bbox)))
                .filter(|(_, iou)| *iou >= self.config.match_threshold)
                .max_by(|a, b| a.1.total_cmp(&b.1));

            let id = match best {
                Some((t, _)) => {
                    matched[t] = true;
                    let track = &mut self.tracks[t];
                    track.bbox = det.bbox;
                    track.misses = 0;
                    track.id
                }
                None => {
                    let id = self.next_id;
                    self.next_id += 1;
                    self.tracks.push(LiveTrack {
                        id,
                        class_id: det.class_id,
                        bbox: det.bbox,
                        misses: 0,
                    });
                    matched.push(true);
                    id
                }
            };
            detections[idx].track_id = Some(id);
        }

        for (track, seen) in self.tracks.iter_mut().zip(&matched) {
            if !seen {
                track.misses += 1;
            }
        }
        let max_age = self.config.max_age;
        self.tracks.retain(|track| track.misses <= max_age);

        detections
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(IouTrackerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(class_id: u32, x: f32, conf: f32) -> RawDetection {
        RawDetection {
            track_id: None,
            class_id,
            bbox: BoundingBox::new(x, 0.0, x + 100.0, 100.0),
            confidence: conf,
        }
    }

    fn ids(dets: &[RawDetection]) -> Vec<u64> {
        dets.iter().filter_map(|d| d.track_id).collect()
    }

    #[test]
    fn ids_persist_while_objects_move() {
        let mut tracker = IouTracker::default();
        let first = tracker.update(vec![det(0, 0.0, 0.9), det(2, 500.0, 0.8)]);
        assert_eq!(ids(&first), vec![1, 2]);

        let second = tracker.update(vec![det(2, 510.0, 0.8), det(0, 10.0, 0.9)]);
        assert_eq!(ids(&second), vec![2, 1]);
    }

    #[test]
    fn class_change_opens_new_track() {
        let mut tracker = IouTracker::default();
        tracker.update(vec![det(0, 0.0, 0.9)]);
        let next = tracker.update(vec![det(2, 0.0, 0.9)]);
        assert_eq!(ids(&next), vec![2]);
    }

    #[test]
    fn expired_ids_are_not_reused() {
        let mut tracker = IouTracker::new(IouTrackerConfig {
            match_threshold: 0.3,
            max_age: 1,
        });
        tracker.update(vec![det(0, 0.0, 0.9)]);
        tracker.update(vec![]);
        assert_eq!(tracker.live_tracks(), 1);
        tracker.update(vec![]);
        assert_eq!(tracker.live_tracks(), 0);

        let back = tracker.update(vec![det(0, 0.0, 0.9)]);
        assert_eq!(ids(&back), vec![2]);
    }

    #[test]
    fn higher_confidence_wins_contested_track() {
        let mut tracker = IouTracker::default();
        tracker.update(vec![det(0, 0.0, 0.9)]);
        let next = tracker.update(vec![det(0, 20.0, 0.5), det(0, 5.0, 0.95)]);
        assert_eq!(next[1].track_id, Some(1));
        assert_eq!(next[0].track_id, Some(2));
    }
}
