//! Operator selection shared between the command channel and the frame loop.
//!
//! The command channel is the only writer. The frame loop takes one `snapshot()` per
//! frame so that every decision within a frame sees the same value.

use std::sync::{Arc, Mutex, MutexGuard};

/// Command text that clears the selection.
pub const DESELECT_COMMAND: &str = "q";

/// The track the operator asked to follow.
///
/// Ids are kept as text: whatever the operator typed is compared verbatim against
/// the decimal form of each track id.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Selection {
    #[default]
    None,
    Target(String),
}

impl Selection {
    /// Interprets one operator line. The line is trimmed; `q` deselects.
    pub fn from_command(line: &str) -> Self {
        let line = line.trim();
        if line == DESELECT_COMMAND {
            Selection::None
        } else {
            Selection::Target(line.to_string())
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Selection::None)
    }

    /// True when this selection names the given track id.
    pub fn matches(&self, track_id: u64) -> bool {
        match self {
            Selection::None => false,
            Selection::Target(text) => *text == track_id.to_string(),
        }
    }
}

/// Process-wide selection cell. Cloning shares the same cell.
#[derive(Clone, Debug, Default)]
pub struct SelectionState {
    inner: Arc<Mutex<Selection>>,
}

impl SelectionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the current selection.
    pub fn snapshot(&self) -> Selection {
        self.lock().clone()
    }

    /// Writes a new selection and returns the previous one.
    pub(crate) fn replace(&self, selection: Selection) -> Selection {
        std::mem::replace(&mut *self.lock(), selection)
    }

    // A panicking writer cannot leave a half-written enum behind, so poisoning is ignored.
    fn lock(&self) -> MutexGuard<'_, Selection> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
