//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! Binds the cloud board REST API, share-link scene storage and the
//! collaboration websocket under one Axum router. CORS is open because the
//! drawing client is served from its own origin.

pub mod auth;
pub mod boards;
pub mod share;
pub mod ws;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, patch, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/boards", get(boards::list_boards).post(boards::create_board))
        .route("/api/boards/last", get(boards::last_board))
        .route("/api/boards/{id}", get(boards::get_board).put(boards::save_board))
        .route("/api/boards/{id}/title", patch(boards::change_title))
        .route(
            "/api/boards/{id}/favorite",
            get(boards::is_favorite).put(boards::star).delete(boards::unstar),
        )
        .route("/api/favorites", get(boards::favorites))
        .route("/api/scenes", post(share::store_scene))
        .route("/api/scenes/{id}", get(share::load_scene))
        .route("/api/ws", get(ws::handle_ws))
        .route("/healthz", get(healthz))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn healthz_is_ok() {
        assert_eq!(healthz().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn router_builds_with_lazy_pool() {
        let _router = app(crate::state::test_helpers::test_app_state());
    }
}
