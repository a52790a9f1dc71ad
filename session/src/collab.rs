//! Collaborator traits: everything a session talks to but does not own.
//!
//! ARCHITECTURE
//! ============
//! The session core never renders, never touches browser storage and never
//! opens sockets itself. Hosts plug those in through the traits below and
//! bundle them in [`Collaborators`]. All traits are object-safe so a host
//! can hand over `Arc<dyn ...>` values built at runtime.

#[cfg(test)]
#[path = "collab_helpers_test.rs"]
pub mod test_helpers;

use std::sync::Arc;

use async_trait::async_trait;
use scene::{Scene, SceneElement};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::SessionError;
use crate::link::RoomLink;
use crate::tabsync::StorageKey;

// =============================================================================
// DATA
// =============================================================================

/// A cloud board as returned by the board service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardDocument {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(flatten)]
    pub scene: Scene,
}

/// Body of a debounced save-to-cloud.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardUpdate {
    #[serde(skip)]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub elements: Vec<SceneElement>,
    pub files: Map<String, Value>,
}

/// Files returned by [`LocalPersistence::load_files`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedFiles {
    pub loaded: Map<String, Value>,
    pub errored: Vec<String>,
}

/// File ids written or rejected by one [`LocalPersistence::save`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaveReport {
    pub saved_files: Vec<String>,
    pub errored_files: Vec<String>,
}

// =============================================================================
// TRAITS
// =============================================================================

/// The drawing surface.
pub trait Renderer: Send + Sync {
    /// Present a new scene. Called after every store replacement.
    fn update_scene(&self, scene: &Scene);

    /// Whether the document is currently hidden from the user.
    fn is_document_hidden(&self) -> bool;
}

/// Host page controls outside the drawing surface.
pub trait Host: Send + Sync {
    /// Rewrite the address bar without navigating.
    fn replace_history(&self, url: &str);
}

/// Live collaboration transport. Incoming batches are delivered to the
/// scheduler as `SessionEvent::RemoteBatch`.
#[async_trait]
pub trait CollabChannel: Send + Sync {
    /// Join `room` and return the scene the room currently holds, if any.
    async fn start_collaboration(&self, room: &RoomLink) -> Result<Option<Scene>, SessionError>;

    /// Leave the current room. With `keep_remote_state` the scene stays as is.
    async fn stop_collaboration(&self, keep_remote_state: bool);

    fn is_collaborating(&self) -> bool;

    /// Send locally changed elements to the room.
    async fn sync_elements(&self, elements: &[SceneElement]) -> Result<(), SessionError>;
}

/// Per-device storage shared by every tab of the same origin.
#[async_trait]
pub trait LocalPersistence: Send + Sync {
    /// Stored elements and app state. `files` are loaded separately.
    async fn load(&self) -> Result<Scene, SessionError>;

    /// Store the scene and any files not yet written.
    async fn save(&self, scene: &Scene) -> Result<SaveReport, SessionError>;

    /// Write out anything still buffered.
    async fn flush_save(&self) -> Result<(), SessionError>;

    /// Saves are paused while another writer owns storage.
    fn is_save_paused(&self) -> bool;

    /// Current stamp of `key`; bumped on every write from any tab.
    fn stamp(&self, key: StorageKey) -> u64;

    async fn load_files(&self, file_ids: &[String]) -> Result<LoadedFiles, SessionError>;

    /// Drop stored files no element references any more.
    async fn clear_obsolete_files(&self, keep: &[String]) -> Result<(), SessionError>;

    /// True while image files referenced by `elements` are still unsaved.
    fn should_prevent_unload(&self, elements: &[SceneElement]) -> bool;
}

/// Cloud boards owned by the signed-in user.
#[async_trait]
pub trait BoardService: Send + Sync {
    async fn get_board_by_id(&self, board_id: &str) -> Result<Option<BoardDocument>, SessionError>;

    /// Returns true when the server stored the update.
    async fn update_board(&self, update: &BoardUpdate) -> Result<bool, SessionError>;
}

/// Scenes reachable from links rather than boards.
#[async_trait]
pub trait SceneSource: Send + Sync {
    async fn load_shared(&self, id: &str, key: &str) -> Result<Scene, SessionError>;

    async fn fetch_url(&self, url: &str) -> Result<Scene, SessionError>;
}

/// Asks the user whether an incoming scene may replace the local one.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn confirm_override(&self) -> bool;
}

/// Everything the loader and scheduler need, bundled for cheap cloning.
#[derive(Clone)]
pub struct Collaborators {
    pub renderer: Arc<dyn Renderer>,
    pub host: Arc<dyn Host>,
    pub collab: Arc<dyn CollabChannel>,
    pub local: Arc<dyn LocalPersistence>,
    pub boards: Arc<dyn BoardService>,
    pub scenes: Arc<dyn SceneSource>,
    pub prompter: Arc<dyn Prompter>,
}
