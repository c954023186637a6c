use imageboard_api::ThreadId;

use crate::page::{ContentUnit, PageState};

/// Running view of the watched thread.
///
/// Built once from the initial page read, then advanced one unit at a time.
/// `qualifies_by_keyword` and `marker_seen` never go back to false.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadSnapshot {
    id: ThreadId,
    images: u32,
    posts: u32,
    qualifies_by_keyword: bool,
    marker_seen: bool,
    image_limit: u32,
}

impl ThreadSnapshot {
    pub fn new(state: &PageState, image_limit: u32) -> Self {
        Self {
            id: state.thread_id,
            images: state.image_count,
            posts: state.post_count,
            qualifies_by_keyword: state.has_keywords,
            marker_seen: state.has_marker,
            image_limit,
        }
    }

    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn images(&self) -> u32 {
        self.images
    }

    pub fn posts(&self) -> u32 {
        self.posts
    }

    pub fn image_limit(&self) -> u32 {
        self.image_limit
    }

    pub fn qualifies_by_keyword(&self) -> bool {
        self.qualifies_by_keyword
    }

    pub fn marker_seen(&self) -> bool {
        self.marker_seen
    }

    pub fn over_threshold(&self) -> bool {
        self.images >= self.image_limit
    }

    /// Whether the engine should run for this thread at all.
    pub fn is_watchable(&self) -> bool {
        self.qualifies_by_keyword || self.marker_seen
    }

    /// Account for one newly appended unit. Returns true if this unit is the
    /// first marker sighting.
    pub fn apply(&mut self, unit: &ContentUnit, marker: &str) -> bool {
        if !unit.is_post {
            return false;
        }
        self.posts += 1;
        if !unit.has_image() {
            return false;
        }
        self.images += 1;
        if !self.marker_seen && unit.carries_marker(marker) {
            self.marker_seen = true;
            return true;
        }
        false
    }
}
