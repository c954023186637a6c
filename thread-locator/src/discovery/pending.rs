use std::collections::BTreeSet;

use imageboard_api::ThreadId;

/// Candidate threads found while nobody is looking for a successor yet.
///
/// Set semantics: pushing a known id is a no-op, and [`drain_all`] hands out
/// every id exactly once.
///
/// [`drain_all`]: PendingLinkCache::drain_all
#[derive(Debug, Default)]
pub struct PendingLinkCache {
    ids: BTreeSet<ThreadId>,
}

impl PendingLinkCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a batch. Returns how many ids were new.
    pub fn push<I>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = ThreadId>,
    {
        ids.into_iter().filter(|id| self.ids.insert(*id)).count()
    }

    pub fn contains(&self, id: ThreadId) -> bool {
        self.ids.contains(&id)
    }

    /// Take everything, leaving the cache empty.
    pub fn drain_all(&mut self) -> Vec<ThreadId> {
        std::mem::take(&mut self.ids).into_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
