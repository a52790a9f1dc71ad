//! The canonical element store.
//!
//! `ElementStore` owns the ordered element sequence a session renders and
//! persists. The order is the draw order. There is no single-element
//! setter: every write is a `replace_all` with reconciler output, and
//! observers only ever see whole sequences.

#[cfg(test)]
#[path = "store_test.rs"]
mod store_test;

use std::collections::HashMap;

use crate::element::{ElementId, SceneElement};

/// In-memory store of scene elements in draw order.
#[derive(Debug, Clone, Default)]
pub struct ElementStore {
    elements: Vec<SceneElement>,
    index: HashMap<ElementId, usize>,
    revision: u64,
}

impl ElementStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding `elements`.
    #[must_use]
    pub fn from_elements(elements: Vec<SceneElement>) -> Self {
        let mut store = Self::new();
        store.replace_all(elements);
        store
    }

    /// Look up an element by id, tombstones included.
    #[must_use]
    pub fn get(&self, id: &ElementId) -> Option<&SceneElement> {
        self.index.get(id).map(|&i| &self.elements[i])
    }

    #[must_use]
    pub fn contains(&self, id: &ElementId) -> bool {
        self.index.contains_key(id)
    }

    /// All elements in draw order, tombstones included.
    #[must_use]
    pub fn all(&self) -> &[SceneElement] {
        &self.elements
    }

    /// Elements that are not tombstoned, in draw order.
    pub fn non_deleted(&self) -> impl Iterator<Item = &SceneElement> {
        self.elements.iter().filter(|e| !e.is_deleted)
    }

    /// Owned copy of the current sequence.
    #[must_use]
    pub fn snapshot(&self) -> Vec<SceneElement> {
        self.elements.clone()
    }

    /// Swap in a new canonical sequence and return the new revision.
    ///
    /// A repeated id keeps the position of its first occurrence and the
    /// record of its last.
    pub fn replace_all(&mut self, elements: Vec<SceneElement>) -> u64 {
        let mut ordered: Vec<SceneElement> = Vec::with_capacity(elements.len());
        let mut index: HashMap<ElementId, usize> = HashMap::with_capacity(elements.len());
        for element in elements {
            if let Some(&pos) = index.get(&element.id) {
                ordered[pos] = element;
            } else {
                index.insert(element.id.clone(), ordered.len());
                ordered.push(element);
            }
        }
        self.elements = ordered;
        self.index = index;
        self.revision += 1;
        self.revision
    }

    /// Number of `replace_all` calls so far. Hosts compare revisions to
    /// decide whether to refresh.
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Number of elements, tombstones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
