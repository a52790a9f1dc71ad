//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the database pool and the live collaboration rooms. A room is the
//! element store every peer converges on plus the senders of its connected
//! clients. Rooms live only in memory and disappear with their last client.

use std::collections::HashMap;
use std::sync::Arc;

use scene::ElementStore;
use sqlx::PgPool;
use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::frame::Frame;

// =============================================================================
// ROOM STATE
// =============================================================================

#[derive(Default)]
pub struct RoomState {
    /// Merged scene of everything the room's peers have sent.
    pub store: ElementStore,
    /// Connected clients: `client_id` -> sender for outgoing frames.
    pub clients: HashMap<Uuid, mpsc::Sender<Frame>>,
}

// =============================================================================
// APP STATE
// =============================================================================

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub rooms: Arc<RwLock<HashMap<String, RoomState>>>,
    /// Buffer of each client's room channel. A client that fills it is
    /// dropped from the room and resynced.
    pub client_channel_capacity: usize,
}

impl AppState {
    #[must_use]
    pub fn new(pool: PgPool, client_channel_capacity: usize) -> Self {
        Self { pool, rooms: Arc::new(RwLock::new(HashMap::new())), client_channel_capacity }
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================
