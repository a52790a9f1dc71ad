//! Scene loader: decides what a session shows when it opens a location.
//!
//! PRIORITY
//! ========
//! 1. The base scene is the local scene merged with the cloud board (the
//!    board's elements reconciled into the local ones).
//! 2. An external scene (`?id=`, `#json=`, `#room=`) replaces the base scene
//!    when the base is empty, when it is a room, or when the user agrees.
//!    A refusal while the document is hidden defers the whole bootstrap.
//! 3. Otherwise a `#url=` link is fetched and offered the same way.
//! 4. A room link joins collaboration; the room's scene is reconciled
//!    against whatever the store already holds, since peers may have sent
//!    updates while the join was in flight.
//!
//! ERROR HANDLING
//! ==============
//! Collaborator failures never abort a bootstrap. They are logged and the
//! user sees `errorMessage` on the resulting scene; the only error returned
//! is an illegal state-machine edge.

#[cfg(test)]
#[path = "loader_test.rs"]
mod loader_test;

use scene::{Scene, reconcile};
use serde_json::Value;
use tracing::{info, warn};

use crate::collab::{BoardDocument, Collaborators};
use crate::context::{BootstrapState, KEY_ERROR_MESSAGE, KEY_IS_LOADING, KEY_THEME, SessionContext};
use crate::error::{ErrorCode, SessionError};
use crate::link::{Location, RoomLink, SharedLink};

pub const INVALID_SCENE_URL: &str = "invalid scene url";
pub const INVALID_SHARED_SCENE: &str = "invalid shared scene";

/// Where an initial scene came from when it was not the local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExternalScene {
    SceneId(String),
    Shared(SharedLink),
    Room(RoomLink),
    Url(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct InitialScene {
    pub scene: Scene,
    pub external: Option<ExternalScene>,
    pub scroll_to_content: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Bootstrap {
    Loaded(InitialScene),
    /// The user declined while the document was hidden; retry on focus.
    Deferred,
}

/// Merge a cloud board into the local scene. Board elements go through the
/// reconciler; board files win over local ones; app state stays local.
#[must_use]
pub fn merge_cloud_board(local: Scene, board: Option<BoardDocument>) -> Scene {
    let Some(board) = board else {
        return local;
    };
    let Scene { elements, app_state, mut files } = local;
    let merged = reconcile(&board.scene.elements, &elements);
    files.extend(board.scene.files);
    Scene { elements: merged.elements, app_state, files }
}

/// Bootstrap the session for `href`.
///
/// # Errors
///
/// Returns `SessionError::InvalidTransition` when called while a bootstrap
/// is already in progress.
pub async fn initialize_scene(
    ctx: &mut SessionContext,
    deps: &Collaborators,
    href: &str,
) -> Result<Bootstrap, SessionError> {
    ctx.transition(BootstrapState::Loading)?;

    let location = Location::parse(href).unwrap_or_else(|e| {
        warn!(error = %e, "unparseable location; loading local scene");
        Location::default()
    });

    if ctx.board_id.is_empty() {
        if let Some(board_id) = &location.board_id {
            ctx.board_id.clone_from(board_id);
        }
    }

    let local = deps.local.load().await.unwrap_or_else(|e| {
        warn!(error = %e, code = e.error_code(), "local scene unavailable");
        Scene::default()
    });
    let local_theme = local.app_state.get(KEY_THEME).cloned();
    let board = fetch_board(ctx, deps).await;
    let mut scene = merge_cloud_board(local, board);

    let mut room = location.room.clone();
    let mut external = None;
    let mut scroll_to_content = false;

    if location.is_external_scene() {
        let accepted = !scene.has_visible_elements() || room.is_some() || confirm_override(ctx, deps).await?;
        if accepted {
            if let Some(shared) = &location.shared {
                match deps.scenes.load_shared(&shared.id, &shared.key).await {
                    Ok(loaded) => {
                        scene = adopt_app_state(loaded, &scene);
                        external = Some(ExternalScene::Shared(shared.clone()));
                    }
                    Err(e) => {
                        warn!(error = %e, code = e.error_code(), id = %shared.id, "shared scene failed to load");
                        scene.app_state.insert(KEY_ERROR_MESSAGE.into(), Value::from(INVALID_SHARED_SCENE));
                    }
                }
            } else if let Some(id) = &location.scene_id {
                external = Some(ExternalScene::SceneId(id.clone()));
            }
            scroll_to_content = true;
            if room.is_none() {
                deps.host.replace_history(&location.origin);
            }
        } else {
            if deps.renderer.is_document_hidden() {
                info!("override declined while hidden; deferring bootstrap");
                ctx.deferred_href = Some(href.to_owned());
                ctx.transition(BootstrapState::Idle)?;
                return Ok(Bootstrap::Deferred);
            }
            room = None;
            deps.host.replace_history(&location.origin);
        }
    } else if let Some(url) = &location.external_url {
        deps.host.replace_history(&location.origin);
        match deps.scenes.fetch_url(url).await {
            Ok(data) => {
                if !scene.has_visible_elements() || confirm_override(ctx, deps).await? {
                    finish(ctx)?;
                    return Ok(Bootstrap::Loaded(InitialScene {
                        scene: data,
                        external: Some(ExternalScene::Url(url.clone())),
                        scroll_to_content: false,
                    }));
                }
            }
            Err(e) => {
                warn!(error = %e, %url, "external scene url failed");
                let mut failed = Scene::default();
                failed.app_state.insert(KEY_ERROR_MESSAGE.into(), Value::from(INVALID_SCENE_URL));
                finish(ctx)?;
                return Ok(Bootstrap::Loaded(InitialScene {
                    scene: failed,
                    external: Some(ExternalScene::Url(url.clone())),
                    scroll_to_content: false,
                }));
            }
        }
    }

    if let Some(room) = room {
        let joined = join_room(ctx, deps, &room, local_theme).await;
        finish(ctx)?;
        return Ok(Bootstrap::Loaded(joined));
    }

    finish(ctx)?;
    Ok(Bootstrap::Loaded(InitialScene { scene, external, scroll_to_content }))
}

async fn fetch_board(ctx: &SessionContext, deps: &Collaborators) -> Option<BoardDocument> {
    if ctx.board_id.is_empty() {
        return None;
    }
    match deps.boards.get_board_by_id(&ctx.board_id).await {
        Ok(board) => board,
        Err(e) => {
            warn!(error = %e, code = e.error_code(), board_id = %ctx.board_id, "cloud board unavailable");
            None
        }
    }
}

/// Run the override prompt through the state machine.
async fn confirm_override(ctx: &mut SessionContext, deps: &Collaborators) -> Result<bool, SessionError> {
    ctx.transition(BootstrapState::ExternalPromptPending)?;
    let accepted = deps.prompter.confirm_override().await;
    ctx.transition(if accepted { BootstrapState::Accepted } else { BootstrapState::Declined })?;
    Ok(accepted)
}

fn finish(ctx: &mut SessionContext) -> Result<(), SessionError> {
    if ctx.bootstrap_state() == BootstrapState::Ready {
        return Ok(());
    }
    ctx.transition(BootstrapState::Ready)
}

/// A loaded scene keeps the base app state for keys it does not set.
fn adopt_app_state(mut loaded: Scene, base: &Scene) -> Scene {
    for (key, value) in &base.app_state {
        loaded.app_state.entry(key.clone()).or_insert_with(|| value.clone());
    }
    loaded
}

async fn join_room(
    ctx: &mut SessionContext,
    deps: &Collaborators,
    room: &RoomLink,
    local_theme: Option<Value>,
) -> InitialScene {
    let fetched = match deps.collab.start_collaboration(room).await {
        Ok(scene) => {
            ctx.room = Some(room.clone());
            scene.unwrap_or_default()
        }
        Err(e) => {
            warn!(error = %e, room_id = %room.room_id, "collaboration failed to start");
            let mut failed = Scene::default();
            failed.app_state.insert(KEY_ERROR_MESSAGE.into(), Value::String(e.to_string()));
            failed
        }
    };

    let Scene { elements, mut app_state, files } = fetched;
    let merged = reconcile(&elements, ctx.store.all());
    if let Some(theme) = local_theme.or_else(|| app_state.get(KEY_THEME).cloned()) {
        app_state.insert(KEY_THEME.into(), theme);
    }
    app_state.insert(KEY_IS_LOADING.into(), Value::Bool(false));

    info!(room_id = %room.room_id, elements = merged.elements.len(), "room scene prepared");
    InitialScene {
        scene: Scene { elements: merged.elements, app_state, files },
        external: ctx.room.clone().map(ExternalScene::Room),
        scroll_to_content: false,
    }
}
