//! Client session for collaborative boards.
//!
//! A session owns one scene: it bootstraps it from the current location,
//! local storage and the cloud board, then keeps it converging as peers,
//! other tabs and the user change it. Rendering, storage and transport are
//! supplied by the host through the traits in [`collab`].
//!
//! ## Module layout
//!
//! | Module | Role |
//! |--------|------|
//! | [`link`] | Parse share, room, URL and board links |
//! | [`context`] | `SessionContext` and the bootstrap state machine |
//! | [`loader`] | `initialize_scene`: pick the scene a location shows |
//! | [`events`] | Environment and session events |
//! | [`scheduler`] | The event loop, debounced cloud saves and tab sync |
//! | [`tabsync`] | Storage stamps shared between tabs |
//! | [`collab`] | Collaborator traits |
//! | [`memory`] | In-memory local persistence |
//! | [`http`] | `reqwest` board and scene clients |

pub mod collab;
pub mod config;
pub mod context;
pub mod error;
pub mod events;
pub mod http;
pub mod link;
pub mod loader;
pub mod memory;
pub mod scheduler;
pub mod tabsync;

pub use collab::{
    BoardDocument, BoardService, BoardUpdate, CollabChannel, Collaborators, Host, LoadedFiles, LocalPersistence,
    Prompter, Renderer, SaveReport, SceneSource,
};
pub use config::SessionConfig;
pub use context::{BootstrapState, SessionContext, Theme};
pub use error::{ErrorCode, SessionError};
pub use events::{EnvironmentEvent, Flow, SessionEvent};
pub use http::{HttpBoardClient, HttpSceneSource};
pub use link::{Location, RoomLink, SharedLink};
pub use loader::{Bootstrap, ExternalScene, InitialScene, initialize_scene};
pub use memory::MemoryPersistence;
pub use scheduler::{Scheduler, SessionHandle, spawn};
pub use tabsync::{StorageKey, TabSync};
