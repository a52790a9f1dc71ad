//! Session context: the explicit home of all per-session state.
//!
//! DESIGN
//! ======
//! Board id, theme, language, collaboration room, bootstrap progress, the
//! element store and the opaque app state all live on one value owned by
//! the scheduler task. Nothing is kept in globals, so two sessions in one
//! process never see each other's state.
//!
//! BOOTSTRAP STATES
//! ================
//! ```text
//! Idle -> Loading -> Ready
//!           |
//!           +-> ExternalPromptPending -> Accepted -> Ready
//!                                     -> Declined -> Ready
//!                                                 -> Idle   (deferred while hidden)
//! Ready -> Loading                                          (navigation)
//! ```

#[cfg(test)]
#[path = "context_test.rs"]
mod context_test;

use scene::{ElementStore, Scene};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::collab::LocalPersistence;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::link::RoomLink;
use crate::tabsync::{StorageKey, TabSync};

pub const KEY_THEME: &str = "theme";
pub const KEY_ERROR_MESSAGE: &str = "errorMessage";
pub const KEY_IS_LOADING: &str = "isLoading";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Light => "light",
            Self::Dark => "dark",
        }
    }

    /// Theme stored in an app state map, if it names a known theme.
    #[must_use]
    pub fn from_app_state(app_state: &Map<String, Value>) -> Option<Self> {
        match app_state.get(KEY_THEME).and_then(Value::as_str)? {
            "light" => Some(Self::Light),
            "dark" => Some(Self::Dark),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Idle,
    Loading,
    ExternalPromptPending,
    Accepted,
    Declined,
    Ready,
}

impl BootstrapState {
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use BootstrapState::{Accepted, Declined, ExternalPromptPending, Idle, Loading, Ready};
        matches!(
            (self, next),
            (Idle | Ready, Loading)
                | (Loading, ExternalPromptPending | Ready)
                | (ExternalPromptPending, Accepted | Declined)
                | (Accepted | Declined, Ready)
                | (Declined, Idle)
        )
    }
}

#[derive(Debug)]
pub struct SessionContext {
    /// Cloud board the session edits; empty when not on a board.
    pub board_id: String,
    pub theme: Theme,
    pub lang_code: String,
    pub room: Option<RoomLink>,
    pub store: ElementStore,
    pub app_state: Map<String, Value>,
    pub files: Map<String, Value>,
    pub tabs: TabSync,
    /// Href of a bootstrap postponed while the document was hidden.
    pub deferred_href: Option<String>,
    bootstrap: BootstrapState,
}

impl SessionContext {
    #[must_use]
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            board_id: String::new(),
            theme: Theme::default(),
            lang_code: config.lang_code.clone(),
            room: None,
            store: ElementStore::new(),
            app_state: Map::new(),
            files: Map::new(),
            tabs: TabSync::new(),
            deferred_href: None,
            bootstrap: BootstrapState::Idle,
        }
    }

    /// New context seeded from local persistence: theme from the stored app
    /// state, tab stamps at their current values. Storage failures fall back
    /// to defaults.
    pub async fn start(config: &SessionConfig, local: &dyn LocalPersistence) -> Self {
        let mut ctx = Self::new(config);
        match local.load().await {
            Ok(stored) => {
                if let Some(theme) = Theme::from_app_state(&stored.app_state) {
                    ctx.theme = theme;
                }
            }
            Err(e) => warn!(error = %e, "local scene unavailable at session start"),
        }
        ctx.tabs.mark_saved(StorageKey::DataState, local.stamp(StorageKey::DataState));
        ctx.tabs.mark_saved(StorageKey::Files, local.stamp(StorageKey::Files));
        debug!(theme = ctx.theme.as_str(), "session context started");
        ctx
    }

    #[must_use]
    pub fn bootstrap_state(&self) -> BootstrapState {
        self.bootstrap
    }

    /// Move the bootstrap state machine.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidTransition` for edges outside the graph;
    /// the state is left unchanged.
    pub fn transition(&mut self, next: BootstrapState) -> Result<(), SessionError> {
        let from = self.bootstrap;
        if !from.can_transition_to(next) {
            warn!(?from, to = ?next, "rejected bootstrap transition");
            return Err(SessionError::InvalidTransition { from, to: next });
        }
        debug!(?from, to = ?next, "bootstrap transition");
        self.bootstrap = next;
        Ok(())
    }

    /// Current scene as an owned document.
    #[must_use]
    pub fn scene(&self) -> Scene {
        Scene { elements: self.store.snapshot(), app_state: self.app_state.clone(), files: self.files.clone() }
    }

    /// Replace the session's scene wholesale. Files are merged, not dropped.
    pub fn load_scene(&mut self, scene: Scene) -> u64 {
        let Scene { elements, app_state, files } = scene;
        self.app_state = app_state;
        match Theme::from_app_state(&self.app_state) {
            Some(theme) => self.theme = theme,
            None => {
                self.app_state.insert(KEY_THEME.into(), Value::from(self.theme.as_str()));
            }
        }
        self.files.extend(files);
        self.store.replace_all(elements)
    }

    /// Merge an app state patch from the host.
    pub fn merge_app_state(&mut self, patch: Map<String, Value>) {
        self.app_state.extend(patch);
        if let Some(theme) = Theme::from_app_state(&self.app_state) {
            self.theme = theme;
        }
    }

    pub fn set_loading(&mut self, loading: bool) {
        self.app_state.insert(KEY_IS_LOADING.into(), Value::Bool(loading));
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.app_state.get(KEY_IS_LOADING).and_then(Value::as_bool).unwrap_or(false)
    }

    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.app_state.get(KEY_ERROR_MESSAGE).and_then(Value::as_str)
    }

    pub fn set_error_message(&mut self, message: impl Into<String>) {
        self.app_state.insert(KEY_ERROR_MESSAGE.into(), Value::String(message.into()));
    }

    /// Flush local persistence and hand back the final scene.
    ///
    /// # Errors
    ///
    /// Propagates the flush failure; the scene is lost to the caller then.
    pub async fn end(self, local: &dyn LocalPersistence) -> Result<Scene, SessionError> {
        local.flush_save().await?;
        debug!(elements = self.store.len(), "session context ended");
        Ok(self.scene())
    }
}
