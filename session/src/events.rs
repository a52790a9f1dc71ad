//! Events the scheduler consumes.
//!
//! Hosts translate their own notifications (browser events, window focus,
//! socket messages) into these values. Nothing reacts to the environment
//! except through the scheduler loop.

use scene::SceneElement;
use serde_json::{Map, Value};
use tokio::sync::oneshot;

/// Changes in the surrounding environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnvironmentEvent {
    /// The location changed without a page load (hash change).
    NavigationChanged { href: String },
    VisibilityChanged { visible: bool },
    Focus,
    Blur,
    /// The host is about to close; pending writes must be flushed.
    BeforeExit,
}

#[derive(Debug)]
pub enum SessionEvent {
    Environment(EnvironmentEvent),
    /// Raw element records received from the collaboration channel.
    RemoteBatch(Vec<Value>),
    /// Elements the user just edited, already carrying their new versions.
    LocalEdit(Vec<SceneElement>),
    AppStateChanged(Map<String, Value>),
    /// Flush, then answer whether the host should block unloading.
    UnloadCheck(oneshot::Sender<bool>),
    Shutdown,
}

impl From<EnvironmentEvent> for SessionEvent {
    fn from(event: EnvironmentEvent) -> Self {
        Self::Environment(event)
    }
}

/// What the loop does after handling one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Unsaved data remains; the host should ask before closing.
    PreventUnload,
    Stop,
}
