//! Convergence properties of the reconciler.
//!
//! Peers that apply the same batches in different orders must end with the
//! same `(id, version, nonce, deleted)` set; replaying batches changes
//! nothing; no id's version ever goes backwards.

use std::collections::BTreeSet;

use proptest::prelude::*;
use scene::{ElementId, ElementStore, SceneElement, reconcile, reconcile_into};
use serde_json::Map;

type Fingerprint = (String, i64, i64, bool);

/// Same `(id, version, nonce)` always yields the same record, so nonce
/// collisions cannot smuggle in differing content.
fn element(id: u8, version: i64, nonce: i64) -> SceneElement {
    SceneElement {
        id: ElementId::new(format!("e{id}")),
        version,
        version_nonce: nonce,
        is_deleted: (version * 31 + nonce) % 3 == 0,
        updated: 0,
        props: Map::new(),
    }
}

fn element_strategy() -> impl Strategy<Value = SceneElement> {
    (0u8..8, 1i64..6, 0i64..20).prop_map(|(id, version, nonce)| element(id, version, nonce))
}

fn batches_strategy() -> impl Strategy<Value = Vec<Vec<SceneElement>>> {
    proptest::collection::vec(proptest::collection::vec(element_strategy(), 0..8), 1..6)
}

fn start_strategy() -> impl Strategy<Value = Vec<SceneElement>> {
    proptest::collection::vec(element_strategy(), 0..6).prop_map(|elements| {
        let mut store = ElementStore::new();
        store.replace_all(elements);
        store.snapshot()
    })
}

fn apply_all<'a>(start: &[SceneElement], batches: impl Iterator<Item = &'a Vec<SceneElement>>) -> Vec<SceneElement> {
    let mut store = ElementStore::from_elements(start.to_vec());
    for batch in batches {
        reconcile_into(&mut store, batch);
    }
    store.snapshot()
}

fn fingerprints(elements: &[SceneElement]) -> BTreeSet<Fingerprint> {
    elements
        .iter()
        .map(|e| (e.id.to_string(), e.version, e.version_nonce, e.is_deleted))
        .collect()
}

proptest! {
    #[test]
    fn peers_converge_regardless_of_delivery_order(
        start in start_strategy(),
        batches in batches_strategy(),
        rotation in 0usize..6,
    ) {
        let forward = apply_all(&start, batches.iter());
        let backward = apply_all(&start, batches.iter().rev());
        let k = rotation % batches.len();
        let rotated = apply_all(&start, batches[k..].iter().chain(batches[..k].iter()));

        prop_assert_eq!(fingerprints(&forward), fingerprints(&backward));
        prop_assert_eq!(fingerprints(&forward), fingerprints(&rotated));
    }

    #[test]
    fn reapplying_batches_is_a_noop(
        start in start_strategy(),
        batches in batches_strategy(),
    ) {
        let merged = apply_all(&start, batches.iter());
        for batch in &batches {
            let again = reconcile(batch, &merged);
            prop_assert!(again.is_noop());
            prop_assert_eq!(&again.elements, &merged);
        }
    }

    #[test]
    fn versions_never_decrease(
        start in start_strategy(),
        batches in batches_strategy(),
    ) {
        let mut store = ElementStore::from_elements(start);
        for batch in &batches {
            let before = store.snapshot();
            reconcile_into(&mut store, batch);
            for old in &before {
                let now = store.get(&old.id).map(|e| e.version);
                prop_assert!(now.is_some_and(|v| v >= old.version));
            }
        }
    }

    #[test]
    fn ids_stay_unique_and_local_order_is_preserved(
        start in start_strategy(),
        batch in proptest::collection::vec(element_strategy(), 0..10),
    ) {
        let result = reconcile(&batch, &start);
        let ids: Vec<&str> = result.elements.iter().map(|e| e.id.as_str()).collect();
        let unique: BTreeSet<&str> = ids.iter().copied().collect();
        prop_assert_eq!(ids.len(), unique.len());

        let prefix: Vec<&str> = start.iter().map(|e| e.id.as_str()).collect();
        prop_assert_eq!(&ids[..prefix.len()], &prefix[..]);
    }
}
