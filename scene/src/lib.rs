//! Scene model and reconciliation for collaborative boards.
//!
//! This crate is the synchronous core shared by the session client and the
//! server's collaboration rooms. It has no I/O: callers hand it element
//! snapshots and batches, and it hands back merged sequences.
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`element`] | `SceneElement`, wire decoding, and the `Scene` document |
//! | [`store`] | `ElementStore`, the canonical ordered sequence |
//! | [`version`] | Version comparator and tie-break rules |
//! | [`reconcile`] | Merge a remote batch into a local snapshot |
//! | [`mutate`] | Local edits: new versions, tombstones, restores |

pub mod element;
pub mod mutate;
pub mod reconcile;
pub mod store;
pub mod version;

pub use element::{DecodedBatch, ElementError, ElementId, Scene, SceneElement, decode_batch};
pub use reconcile::{Reconciliation, reconcile, reconcile_into, reconcile_values};
pub use store::ElementStore;
pub use version::{Verdict, compare, is_invalid, should_discard_remote};
