//! Scene reconciliation: merge a remote batch into a local snapshot.
//!
//! ALGORITHM
//! =========
//! 1. Index the local snapshot by id.
//! 2. Walk the remote batch. Invalid candidates are dropped. A candidate
//!    replaces the current winner for its id (the local record, or an
//!    earlier candidate from the same batch) unless the comparator says
//!    to discard it. Replacement is wholesale, never field by field.
//! 3. Emit the local sequence in its original order, substituting winners.
//!    Ids only the remote knew are appended in order of first appearance.
//!
//! The function is pure: it reads two slices and returns a new sequence.
//! Replaying a batch that already lost (stale, or already applied) yields
//! an unchanged sequence and an empty `changed` list.

#[cfg(test)]
#[path = "reconcile_test.rs"]
mod reconcile_test;

use std::collections::{HashMap, HashSet};

use serde_json::Value;
use tracing::{debug, warn};

use crate::element::{ElementId, SceneElement, decode_batch};
use crate::store::ElementStore;
use crate::version::{is_invalid, should_discard_remote};

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    /// The merged sequence in draw order.
    pub elements: Vec<SceneElement>,
    /// Ids whose record changed (superseded or newly added), in output order.
    pub changed: Vec<ElementId>,
    /// Remote records dropped as malformed or invalid.
    pub dropped: usize,
}

impl Reconciliation {
    /// True when the merge left the local sequence as it was.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.changed.is_empty()
    }

    /// The records behind `changed`, for rebroadcast to other peers.
    #[must_use]
    pub fn changed_elements(&self) -> Vec<SceneElement> {
        let mut wanted: HashSet<&ElementId> = self.changed.iter().collect();
        self.elements
            .iter()
            .filter(|e| wanted.remove(&e.id))
            .cloned()
            .collect()
    }
}

/// Merge `remote` into `local` and return the new canonical sequence.
#[must_use]
pub fn reconcile(remote: &[SceneElement], local: &[SceneElement]) -> Reconciliation {
    let mut local_index: HashMap<&ElementId, usize> = HashMap::with_capacity(local.len());
    for (i, element) in local.iter().enumerate() {
        local_index.entry(&element.id).or_insert(i);
    }

    let mut winners: HashMap<&ElementId, &SceneElement> = HashMap::new();
    let mut appended: Vec<&ElementId> = Vec::new();
    let mut dropped = 0;

    for candidate in remote {
        if is_invalid(candidate) {
            warn!(id = %candidate.id, version = candidate.version, "dropping invalid remote element");
            dropped += 1;
            continue;
        }

        let current = winners
            .get(&candidate.id)
            .copied()
            .or_else(|| local_index.get(&candidate.id).map(|&i| &local[i]));
        if should_discard_remote(current, candidate) {
            continue;
        }

        if current.is_none() {
            appended.push(&candidate.id);
        }
        winners.insert(&candidate.id, candidate);
    }

    let mut elements = Vec::with_capacity(local.len() + appended.len());
    let mut changed = Vec::new();
    for (i, element) in local.iter().enumerate() {
        if local_index.get(&element.id) != Some(&i) {
            continue;
        }
        match winners.get(&element.id) {
            Some(winner) => {
                changed.push(element.id.clone());
                elements.push((*winner).clone());
            }
            None => elements.push(element.clone()),
        }
    }
    for id in appended {
        if let Some(winner) = winners.get(id) {
            changed.push(id.clone());
            elements.push((*winner).clone());
        }
    }

    debug!(
        remote = remote.len(),
        local = local.len(),
        changed = changed.len(),
        dropped,
        "reconciled scene elements"
    );
    Reconciliation { elements, changed, dropped }
}

/// Decode a raw batch, then reconcile it. Malformed records count as dropped.
#[must_use]
pub fn reconcile_values(remote: &[Value], local: &[SceneElement]) -> Reconciliation {
    let decoded = decode_batch(remote);
    let mut result = reconcile(&decoded.elements, local);
    result.dropped += decoded.errors.len();
    result
}

/// Reconcile `remote` against the store and swap in the result when
/// anything changed. Returns the pass for callers that fan out changes.
pub fn reconcile_into(store: &mut ElementStore, remote: &[SceneElement]) -> Reconciliation {
    let result = reconcile(remote, store.all());
    if !result.is_noop() {
        store.replace_all(result.elements.clone());
    }
    result
}
