//! Local mutation helpers.
//!
//! Every local edit produces a fresh record with `version + 1`, a new
//! random nonce, and the current `updated` time. Records are never edited
//! in place, so a mutated element is simply another candidate for the
//! reconciler to merge into the store.

#[cfg(test)]
#[path = "mutate_test.rs"]
mod mutate_test;

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;
use serde_json::{Map, Value};

use crate::element::{ElementId, SceneElement, is_reserved_key};

/// Current time as milliseconds since Unix epoch.
#[must_use]
pub fn now_ms() -> i64 {
    let Ok(dur) = SystemTime::now().duration_since(UNIX_EPOCH) else {
        return 0;
    };
    i64::try_from(dur.as_millis()).unwrap_or(0)
}

/// Random nonce in `0..i32::MAX`.
#[must_use]
pub fn random_nonce() -> i64 {
    i64::from(rand::rng().random_range(0..i32::MAX))
}

/// Create a new element at version 1. Reserved keys in `props` are dropped.
#[must_use]
pub fn new_element(id: impl Into<ElementId>, mut props: Map<String, Value>) -> SceneElement {
    props.retain(|k, _| !is_reserved_key(k));
    SceneElement {
        id: id.into(),
        version: 1,
        version_nonce: random_nonce(),
        is_deleted: false,
        updated: now_ms(),
        props,
    }
}

/// Produce the next version of `element` with `patch` merged into its props.
/// Null patch values remove keys. Reserved keys are ignored.
#[must_use]
pub fn bump(element: &SceneElement, patch: &Map<String, Value>) -> SceneElement {
    let mut next = element.clone();
    for (k, v) in patch {
        if is_reserved_key(k) {
            continue;
        }
        if v.is_null() {
            next.props.remove(k);
        } else {
            next.props.insert(k.clone(), v.clone());
        }
    }
    next.version = element.version.saturating_add(1);
    next.version_nonce = random_nonce();
    next.updated = now_ms();
    next
}

/// Next version of `element` marked deleted.
#[must_use]
pub fn tombstone(element: &SceneElement) -> SceneElement {
    let mut next = bump(element, &Map::new());
    next.is_deleted = true;
    next
}

/// Next version of `element` with the tombstone cleared.
#[must_use]
pub fn restore(element: &SceneElement) -> SceneElement {
    let mut next = bump(element, &Map::new());
    next.is_deleted = false;
    next
}
