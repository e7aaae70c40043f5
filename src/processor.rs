//! Per-frame selection decisions.
//!
//! `process_frame` filters raw detector output down to allow-listed tracks, rebuilds the
//! active object registry and decides which single track (if any) drives the actuator.

use crate::registry::ActiveObjectRegistry;
use crate::selection::Selection;
use crate::track::{RawDetection, Track};

/// How a track is drawn.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Emphasis {
    /// The operator-selected track.
    Selected,
    /// Followed because nothing is selected and it came first.
    DefaultFollow,
    Plain,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Annotation {
    pub track: Track,
    pub emphasis: Emphasis,
}

impl Annotation {
    pub fn label(&self) -> String {
        self.track.label()
    }
}

/// Everything the loop needs from one frame of detections.
#[derive(Clone, Debug, Default)]
pub struct FrameOutcome {
    pub registry: ActiveObjectRegistry,
    pub annotations: Vec<Annotation>,
    /// Track handed to the actuation controller.
    pub forwarded: Option<Track>,
}

impl FrameOutcome {
    pub fn selected(&self) -> Option<&Annotation> {
        self.annotations
            .iter()
            .find(|a| a.emphasis == Emphasis::Selected)
    }

    pub fn forwarded_emphasis(&self) -> Option<Emphasis> {
        let forwarded = self.forwarded.as_ref()?;
        self.annotations
            .iter()
            .find(|a| a.track.id == forwarded.id)
            .map(|a| a.emphasis)
    }
}

/// Runs the selection pipeline for one frame against a selection snapshot.
pub fn process_frame(detections: &[RawDetection], selection: &Selection) -> FrameOutcome {
    let mut outcome = FrameOutcome::default();

    for det in detections {
        let Some(track) = Track::from_detection(det) else {
            continue;
        };
        if !outcome.registry.insert(track.id, track.class) {
            log::debug!("dropping repeated track id {} in one frame", track.id);
            continue;
        }

        let emphasis = if outcome.forwarded.is_none() && selection.matches(track.id) {
            outcome.forwarded = Some(track.clone());
            Emphasis::Selected
        } else {
            Emphasis::Plain
        };
        outcome.annotations.push(Annotation { track, emphasis });
    }

    // Nothing selected: follow whatever the detector listed first.
    if selection.is_none() {
        if let Some(first) = outcome.annotations.first_mut() {
            first.emphasis = Emphasis::DefaultFollow;
            outcome.forwarded = Some(first.track.clone());
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{BoundingBox, ObjectClass};

    fn det(id: u64, class_id: u32) -> RawDetection {
        let x = id as f32 * 20.0;
        RawDetection::new(id, class_id, BoundingBox::new(x, 10.0, x + 10.0, 30.0), 0.9)
    }

    #[test]
    fn registry_holds_only_allow_listed_classes() {
        // person, dog, car, bicycle, truck
        let dets = vec![det(1, 0), det(2, 16), det(3, 2), det(4, 1), det(5, 7)];
        let outcome = process_frame(&dets, &Selection::None);

        let ids: Vec<u64> = outcome.registry.entries().iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 3, 5]);
        assert_eq!(outcome.annotations.len(), 3);
        assert_eq!(outcome.registry.entries()[2].class, ObjectClass::Truck);
    }

    #[test]
    fn default_follow_picks_first_allow_listed_track() {
        let dets = vec![det(9, 16), det(3, 0), det(7, 2)];
        let outcome = process_frame(&dets, &Selection::None);

        assert_eq!(outcome.forwarded.as_ref().map(|t| t.id), Some(3));
        assert_eq!(outcome.forwarded_emphasis(), Some(Emphasis::DefaultFollow));
        assert!(outcome.selected().is_none());
    }

    #[test]
    fn selected_track_is_forwarded() {
        let dets = vec![det(3, 0), det(7, 2)];
        let outcome = process_frame(&dets, &Selection::Target("7".to_string()));

        assert_eq!(outcome.forwarded.as_ref().map(|t| t.id), Some(7));
        assert_eq!(outcome.selected().map(|a| a.track.id), Some(7));
        assert_eq!(outcome.annotations[0].emphasis, Emphasis::Plain);
    }

    #[test]
    fn missing_target_forwards_nothing() {
        let dets = vec![det(3, 0)];
        let outcome = process_frame(&dets, &Selection::Target("7".to_string()));

        assert!(outcome.forwarded.is_none());
        assert!(outcome
            .annotations
            .iter()
            .all(|a| a.emphasis == Emphasis::Plain));
    }

    #[test]
    fn unknown_text_selects_nothing() {
        let dets = vec![det(3, 0), det(4, 0)];
        let outcome = process_frame(&dets, &Selection::Target("three".to_string()));
        assert!(outcome.forwarded.is_none());
        assert_eq!(outcome.registry.len(), 2);
    }

    #[test]
    fn repeated_ids_keep_first_occurrence() {
        let mut second = det(3, 2);
        second.bbox = BoundingBox::new(500.0, 500.0, 600.0, 600.0);
        let dets = vec![det(3, 0), second];
        let outcome = process_frame(&dets, &Selection::Target("3".to_string()));

        assert_eq!(outcome.registry.len(), 1);
        assert_eq!(outcome.annotations.len(), 1);
        let forwarded = outcome.forwarded.expect("selected");
        assert_eq!(forwarded.class, ObjectClass::Person);
    }

    #[test]
    fn at_most_one_selected_per_frame() {
        let dets: Vec<RawDetection> = (1..=20).map(|id| det(id, (id % 8) as u32)).collect();
        for target in ["1", "2", "5", "13", "99", "q"] {
            let selection = Selection::from_command(target);
            let outcome = process_frame(&dets, &selection);
            let selected: Vec<&Annotation> = outcome
                .annotations
                .iter()
                .filter(|a| a.emphasis == Emphasis::Selected)
                .collect();
            assert!(selected.len() <= 1);
            for a in &outcome.annotations {
                assert_eq!(
                    a.emphasis == Emphasis::Selected,
                    selection.matches(a.track.id),
                    "track {} with selection {:?}",
                    a.track.id,
                    selection
                );
            }
        }
    }
}
