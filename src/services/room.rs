//! Collaboration rooms.
//!
//! DESIGN
//! ======
//! A room is created by its first `join` and evicted with its last `part`.
//! Each room keeps the merged scene of everything its peers have sent, so a
//! late joiner starts from the converged state instead of waiting for a peer
//! to resend it.
//!
//! Every batch goes through the reconciler under the rooms write lock and
//! the store is replaced with its output. Only the elements that actually
//! changed are relayed, so stale or repeated batches produce no traffic.
//!
//! A client that cannot keep up is removed from the room instead of silently
//! missing frames. Dropping its sender closes the client's room channel,
//! and the socket loop answers that by joining again and resending the
//! room scene.

#[cfg(test)]
#[path = "room_test.rs"]
mod tests;

use scene::{SceneElement, reconcile_values};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::frame::{ErrorCode, Frame};
use crate::state::AppState;

const MAX_ROOM_ID_LEN: usize = 128;

#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("invalid room id")]
    InvalidRoomId,
    #[error("not joined to room {0}")]
    NotJoined(String),
    #[error("`elements` must be an array of element records")]
    InvalidBatch,
}

impl ErrorCode for RoomError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::InvalidRoomId => "E_ROOM_INVALID_ID",
            Self::NotJoined(_) => "E_ROOM_NOT_JOINED",
            Self::InvalidBatch => "E_ROOM_INVALID_BATCH",
        }
    }
}

/// Room ids follow the link token alphabet `[A-Za-z0-9_-]`.
#[must_use]
pub fn is_valid_room_id(room_id: &str) -> bool {
    !room_id.is_empty()
        && room_id.len() <= MAX_ROOM_ID_LEN
        && room_id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Add a client to a room, creating the room if needed. Returns the room's
/// current scene.
///
/// # Errors
///
/// Returns `InvalidRoomId` for ids outside the token alphabet.
pub async fn join(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    tx: mpsc::Sender<Frame>,
) -> Result<Vec<SceneElement>, RoomError> {
    if !is_valid_room_id(room_id) {
        return Err(RoomError::InvalidRoomId);
    }
    let mut rooms = state.rooms.write().await;
    let room = rooms.entry(room_id.to_owned()).or_default();
    room.clients.insert(client_id, tx);
    info!(%room_id, %client_id, peers = room.clients.len(), "client joined room");
    Ok(room.store.snapshot())
}

/// Merge a client's batch into the room. Returns the elements that changed,
/// which are what the other peers need to see.
///
/// # Errors
///
/// Returns `NotJoined` when the client is not a member of the room.
pub async fn apply_batch(
    state: &AppState,
    room_id: &str,
    client_id: Uuid,
    batch: &[Value],
) -> Result<Vec<SceneElement>, RoomError> {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id).filter(|room| room.clients.contains_key(&client_id)) else {
        return Err(RoomError::NotJoined(room_id.to_owned()));
    };

    let result = reconcile_values(batch, room.store.all());
    if result.dropped > 0 {
        warn!(%room_id, %client_id, dropped = result.dropped, "room batch had malformed elements");
    }
    if result.is_noop() {
        return Ok(Vec::new());
    }
    let changed = result.changed_elements();
    room.store.replace_all(result.elements);
    debug!(%room_id, %client_id, changed = changed.len(), "room batch merged");
    Ok(changed)
}

/// Remove a client from a room and evict the room once it is empty.
pub async fn part(state: &AppState, room_id: &str, client_id: Uuid) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return;
    };
    room.clients.remove(&client_id);
    info!(%room_id, %client_id, remaining = room.clients.len(), "client left room");

    if room.clients.is_empty() {
        rooms.remove(room_id);
        info!(%room_id, "evicted room");
    }
}

/// Send a frame to every client in a room except `exclude`.
///
/// A client whose buffer is full is removed from the room. The room keeps
/// its scene even when that leaves it empty; the socket loop parts for good
/// when the connection ends.
pub async fn broadcast(state: &AppState, room_id: &str, frame: &Frame, exclude: Option<Uuid>) {
    let mut rooms = state.rooms.write().await;
    let Some(room) = rooms.get_mut(room_id) else {
        return;
    };

    let mut lagging = Vec::new();
    for (client_id, tx) in &room.clients {
        if exclude == Some(*client_id) {
            continue;
        }
        match tx.try_send(frame.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => lagging.push(*client_id),
            Err(TrySendError::Closed(_)) => debug!(%room_id, %client_id, "client channel already closed"),
        }
    }

    for client_id in lagging {
        room.clients.remove(&client_id);
        warn!(%room_id, %client_id, "client buffer full; removed from room until it resyncs");
    }
}
