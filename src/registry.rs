//! Active object registry and change-triggered reporting.

use std::fmt::Write as _;

use crate::track::ObjectClass;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ActiveObject {
    pub id: u64,
    pub class: ObjectClass,
}

/// Objects visible in the current frame, in detector emission order. Ids are unique.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ActiveObjectRegistry {
    entries: Vec<ActiveObject>,
}

impl ActiveObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an object. Returns false (and leaves the registry untouched) for a repeated id.
    pub fn insert(&mut self, id: u64, class: ObjectClass) -> bool {
        if self.contains(id) {
            return false;
        }
        self.entries.push(ActiveObject { id, class });
        true
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.iter().any(|entry| entry.id == id)
    }

    pub fn entries(&self) -> &[ActiveObject] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Operator-facing table of the active objects.
    pub fn render_table(&self) -> String {
        if self.entries.is_empty() {
            return "No active objects detected.".to_string();
        }
        let mut out = String::from("Active Objects:\n");
        let _ = writeln!(out, "{:<10}{:<15}", "ID", "Type");
        out.push_str(&"-".repeat(25));
        for entry in &self.entries {
            let _ = write!(out, "\n{:<10}{:<15}", entry.id, entry.class.as_str());
        }
        out
    }
}

/// Remembers the previous frame's registry and reports only when it changes.
#[derive(Debug, Default)]
pub struct RegistryReporter {
    previous: ActiveObjectRegistry,
}

impl RegistryReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the rendered table when `current` differs from the last observed registry.
    /// The snapshot is overwritten on every call.
    pub fn observe(&mut self, current: &ActiveObjectRegistry) -> Option<String> {
        let report = (*current != self.previous).then(|| current.render_table());
        self.previous = current.clone();
        report
    }
}
