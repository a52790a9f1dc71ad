//! WebSocket handler for collaboration rooms.
//!
//! DESIGN
//! ======
//! On upgrade, generates a client ID and enters a `select!` loop:
//! - Incoming client frames → parse + dispatch by syscall prefix
//! - Frames broadcast by room peers → forward to client
//!
//! Handlers validate, update room state, and return an `Outcome`. The
//! dispatch layer owns everything outbound: the reply to the sender and the
//! `room:elements` notification to the other peers.
//!
//! LIFECYCLE
//! =========
//! 1. Upgrade → send `session:connected` with `client_id`
//! 2. `room:join` → reply with the room's current elements
//! 3. `room:update` → merge, reply with the change count, relay changes
//! 4. `room:part` or close → leave the room
//!
//! Each join opens a fresh channel for the room's frames. If the room drops
//! a client that fell behind, that channel closes; the loop joins again and
//! sends the whole room scene as one `room:elements` frame.

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::frame::{Data, Frame, Status};
use crate::services::room::{self, RoomError};
use crate::state::AppState;

pub const ANONYMOUS: &str = "anonymous";

// =============================================================================
// OUTCOME
// =============================================================================

/// What a handler wants sent. Handlers never send frames themselves.
enum Outcome {
    /// Send done+data to the sender only.
    Reply(Data),
    /// Send an empty done to the sender only.
    Done,
    /// Reply to the sender and notify the room's other peers.
    ReplyAndBroadcast { reply: Data, broadcast: Data },
}

/// The room a connection is in and the channel its peers' frames arrive on.
struct Membership {
    room_id: String,
    rx: mpsc::Receiver<Frame>,
}

// =============================================================================
// UPGRADE
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default)]
    pub user: Option<String>,
}

pub async fn handle_ws(State(state): State<AppState>, Query(params): Query<WsParams>, ws: WebSocketUpgrade) -> Response {
    let user = params
        .user
        .map(|u| u.trim().to_owned())
        .filter(|u| !u.is_empty())
        .unwrap_or_else(|| ANONYMOUS.to_owned());
    ws.on_upgrade(move |socket| run_ws(socket, state, user))
}

// =============================================================================
// CONNECTION
// =============================================================================

async fn run_ws(mut socket: WebSocket, state: AppState, user: String) {
    let client_id = Uuid::new_v4();

    let welcome = Frame::request("session:connected", Data::new()).with_data("client_id", client_id.to_string());
    if send_frame(&mut socket, &welcome).await.is_err() {
        return;
    }
    info!(%client_id, %user, "ws: client connected");

    let mut membership: Option<Membership> = None;

    loop {
        tokio::select! {
            msg = socket.recv() => {
                let Some(Ok(msg)) = msg else { break };
                match msg {
                    Message::Text(text) => {
                        let replies = process_inbound_text(&state, &mut membership, client_id, &user, &text).await;
                        for frame in replies {
                            if send_frame(&mut socket, &frame).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            relayed = next_room_frame(&mut membership) => {
                let frame = match relayed {
                    Some(frame) => frame,
                    None => match resync_room(&state, &mut membership, client_id, &user).await {
                        Some(snapshot) => snapshot,
                        None => continue,
                    },
                };
                if send_frame(&mut socket, &frame).await.is_err() {
                    break;
                }
            }
        }
    }

    if let Some(membership) = membership {
        room::part(&state, &membership.room_id, client_id).await;
    }
    info!(%client_id, "ws: client disconnected");
}

/// Next frame from the current room. `None` means the room closed the
/// channel; without a room this never resolves.
async fn next_room_frame(membership: &mut Option<Membership>) -> Option<Frame> {
    match membership {
        Some(m) => m.rx.recv().await,
        None => std::future::pending().await,
    }
}

/// Join the current room again after it dropped this client, and build a
/// `room:elements` frame carrying the room's whole scene.
async fn resync_room(state: &AppState, membership: &mut Option<Membership>, client_id: Uuid, user: &str) -> Option<Frame> {
    let room_id = membership.take()?.room_id;
    let (tx, rx) = room_channel(state);
    let elements = match room::join(state, &room_id, client_id, tx).await {
        Ok(elements) => elements,
        Err(e) => {
            warn!(%client_id, %room_id, error = %e, "ws: resync failed");
            return None;
        }
    };
    let value = match serde_json::to_value(&elements) {
        Ok(value) => value,
        Err(e) => {
            warn!(%client_id, %room_id, error = %e, "ws: failed to encode room scene");
            return None;
        }
    };
    warn!(%client_id, %room_id, elements = elements.len(), "ws: resending room scene to lagging client");
    let snapshot = Frame::request("room:elements", Data::new())
        .with_room(room_id.clone())
        .with_from(user)
        .with_data("elements", value);
    *membership = Some(Membership { room_id, rx });
    Some(snapshot)
}

fn room_channel(state: &AppState) -> (mpsc::Sender<Frame>, mpsc::Receiver<Frame>) {
    mpsc::channel(state.client_channel_capacity.max(1))
}

// =============================================================================
// FRAME DISPATCH
// =============================================================================

/// Parse and process one inbound text frame and return frames for the sender.
async fn process_inbound_text(
    state: &AppState,
    membership: &mut Option<Membership>,
    client_id: Uuid,
    user: &str,
    text: &str,
) -> Vec<Frame> {
    let mut req: Frame = match serde_json::from_str(text) {
        Ok(r) => r,
        Err(e) => {
            warn!(%client_id, error = %e, "ws: invalid inbound frame");
            let err = Frame::request("gateway:error", Data::new()).with_data("message", format!("invalid json: {e}"));
            return vec![err];
        }
    };
    req.from = Some(user.to_owned());
    info!(%client_id, id = %req.id, syscall = %req.syscall, "ws: recv frame");

    let result = match req.prefix() {
        "room" => handle_room(state, membership, client_id, &req).await,
        prefix => Err(req.error(format!("unknown prefix: {prefix}"))),
    };

    match result {
        Ok(Outcome::Reply(data)) => vec![req.done_with(data)],
        Ok(Outcome::Done) => vec![req.done()],
        Ok(Outcome::ReplyAndBroadcast { reply, broadcast }) => {
            if let Some(m) = membership.as_ref() {
                let notif = Frame::request("room:elements", broadcast).with_room(m.room_id.as_str()).with_from(user);
                room::broadcast(state, &m.room_id, &notif, Some(client_id)).await;
            }
            vec![req.done_with(reply)]
        }
        Err(err_frame) => vec![err_frame],
    }
}

// =============================================================================
// ROOM HANDLERS
// =============================================================================

fn requested_room(req: &Frame) -> Option<String> {
    req.room
        .clone()
        .or_else(|| req.data.get("room_id").and_then(Value::as_str).map(str::to_owned))
}

async fn handle_room(
    state: &AppState,
    membership: &mut Option<Membership>,
    client_id: Uuid,
    req: &Frame,
) -> Result<Outcome, Frame> {
    match req.op() {
        "join" => {
            let Some(room_id) = requested_room(req) else {
                return Err(req.error("room_id required"));
            };
            if let Some(old) = membership.take() {
                room::part(state, &old.room_id, client_id).await;
            }
            let (tx, rx) = room_channel(state);
            let elements = room::join(state, &room_id, client_id, tx)
                .await
                .map_err(|e| req.error_from(&e))?;
            *membership = Some(Membership { room_id, rx });

            let mut reply = Data::new();
            reply.insert("elements".into(), elements_to_value(req, &elements)?);
            Ok(Outcome::Reply(reply))
        }
        "update" => {
            let Some(room_id) = membership.as_ref().map(|m| m.room_id.as_str()) else {
                return Err(req.error_from(&RoomError::NotJoined(requested_room(req).unwrap_or_default())));
            };
            let Some(batch) = req.data.get("elements").and_then(Value::as_array) else {
                return Err(req.error_from(&RoomError::InvalidBatch));
            };
            let changed = room::apply_batch(state, room_id, client_id, batch)
                .await
                .map_err(|e| req.error_from(&e))?;

            let mut reply = Data::new();
            reply.insert("changed".into(), Value::from(changed.len()));
            if changed.is_empty() {
                return Ok(Outcome::Reply(reply));
            }
            let mut broadcast = Data::new();
            broadcast.insert("elements".into(), elements_to_value(req, &changed)?);
            Ok(Outcome::ReplyAndBroadcast { reply, broadcast })
        }
        "part" => {
            if let Some(old) = membership.take() {
                room::part(state, &old.room_id, client_id).await;
            }
            Ok(Outcome::Done)
        }
        op => Err(req.error(format!("unknown room op: {op}"))),
    }
}

fn elements_to_value(req: &Frame, elements: &[scene::SceneElement]) -> Result<Value, Frame> {
    serde_json::to_value(elements).map_err(|e| req.error(format!("failed to encode elements: {e}")))
}

// =============================================================================
// SEND
// =============================================================================

async fn send_frame(socket: &mut WebSocket, frame: &Frame) -> Result<(), ()> {
    let json = match serde_json::to_string(frame) {
        Ok(j) => j,
        Err(e) => {
            warn!(error = %e, "ws: failed to serialize frame");
            return Err(());
        }
    };
    if frame.status == Status::Error {
        let code = frame.data.get("code").and_then(Value::as_str).unwrap_or("-");
        let message = frame.data.get("message").and_then(Value::as_str).unwrap_or("-");
        warn!(id = %frame.id, syscall = %frame.syscall, code, message, "ws: send frame status=Error");
    }
    socket.send(Message::Text(json.into())).await.map_err(|_| ())
}
