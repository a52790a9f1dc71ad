//! Browser-tab sync bookkeeping.
//!
//! Local persistence keeps a monotonically increasing stamp per storage key.
//! A tab remembers the last stamp it has seen (or written itself); when it
//! becomes visible again it reloads only the keys whose stored stamp moved
//! past that mark.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    /// Elements and app state.
    DataState,
    /// Binary files referenced by image elements.
    Files,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TabSync {
    data_state: u64,
    files: u64,
}

impl TabSync {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, key: StorageKey) -> &mut u64 {
        match key {
            StorageKey::DataState => &mut self.data_state,
            StorageKey::Files => &mut self.files,
        }
    }

    /// Last stamp seen for `key`.
    #[must_use]
    pub fn last_seen(&self, key: StorageKey) -> u64 {
        match key {
            StorageKey::DataState => self.data_state,
            StorageKey::Files => self.files,
        }
    }

    /// True when `stored` is newer than anything seen for `key`; records it.
    pub fn is_newer(&mut self, key: StorageKey, stored: u64) -> bool {
        let seen = self.slot(key);
        if stored > *seen {
            *seen = stored;
            true
        } else {
            false
        }
    }

    /// Record a stamp produced by this tab's own write.
    pub fn mark_saved(&mut self, key: StorageKey, stamp: u64) {
        let seen = self.slot(key);
        *seen = (*seen).max(stamp);
    }
}
