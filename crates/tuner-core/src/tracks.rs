//! Per-kind view of available tracks and the current selection
//!
//! Populated exactly once per player instance at prepare-completion time;
//! immutable afterwards except for the selected pointer.

use crate::types::{Track, TrackKind, TRACK_KIND_COUNT};

/// Track lists keyed by renderer kind, in slot order
pub type TrackLists = [Vec<Track>; TRACK_KIND_COUNT];

/// Derived registry of selectable tracks for one player instance
#[derive(Debug, Default)]
pub struct TrackRegistry {
    lists: TrackLists,
    selected: [Option<usize>; TRACK_KIND_COUNT],
}

impl TrackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install the track lists produced by the source builder. Resets any
    /// previous selection.
    pub fn populate(&mut self, lists: TrackLists) {
        self.lists = lists;
        self.selected = [None; TRACK_KIND_COUNT];
    }

    /// Drop all tracks and selections (player released)
    pub fn clear(&mut self) {
        self.populate(Default::default());
    }

    /// Tracks of one kind in construction order. Empty, never absent, when a
    /// kind has no tracks.
    pub fn list(&self, kind: TrackKind) -> &[Track] {
        &self.lists[kind.index()]
    }

    /// All tracks across kinds, in slot order
    pub fn all(&self) -> Vec<Track> {
        TrackKind::ALL
            .iter()
            .flat_map(|kind| self.list(*kind).iter().cloned())
            .collect()
    }

    /// Id of the selected track of `kind`, if any
    pub fn selected(&self, kind: TrackKind) -> Option<&str> {
        self.selected[kind.index()]
            .and_then(|idx| self.lists[kind.index()].get(idx))
            .map(|t| t.id.as_str())
    }

    /// Move the selected pointer. `None` always succeeds and clears the
    /// selection; an unknown id leaves the pointer unchanged and reports
    /// `false`.
    pub fn select(&mut self, kind: TrackKind, id: Option<&str>) -> bool {
        match id {
            None => {
                self.selected[kind.index()] = None;
                true
            }
            Some(id) => {
                match self.lists[kind.index()].iter().position(|t| t.id == id) {
                    Some(idx) => {
                        self.selected[kind.index()] = Some(idx);
                        true
                    }
                    None => false,
                }
            }
        }
    }
}
