//! Cloud board routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use crate::routes::auth::MaybeUser;
use crate::services::board::{self, Board, BoardError, BoardFilter, BoardSave, BoardSummary};
use crate::state::AppState;

pub(crate) fn board_error_to_status(err: BoardError) -> StatusCode {
    match err {
        BoardError::Unauthorized => StatusCode::UNAUTHORIZED,
        BoardError::NotFound(_) => StatusCode::NOT_FOUND,
        BoardError::Database(e) => {
            tracing::error!(error = %e, "board query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Deserialize)]
pub struct TitleBody {
    pub title: String,
}

/// `GET /api/boards?favorite=bool`
pub async fn list_boards(
    State(state): State<AppState>,
    auth: MaybeUser,
    Query(filter): Query<BoardFilter>,
) -> Result<Json<Vec<BoardSummary>>, StatusCode> {
    let boards = board::get_my_boards(&state.pool, auth.user(), filter)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(boards))
}

/// `POST /api/boards`
pub async fn create_board(State(state): State<AppState>, auth: MaybeUser) -> Result<(StatusCode, Json<Value>), StatusCode> {
    let id = board::create_new_board(&state.pool, auth.user())
        .await
        .map_err(board_error_to_status)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))))
}

/// `GET /api/boards/last`
pub async fn last_board(State(state): State<AppState>, auth: MaybeUser) -> Result<Json<Board>, StatusCode> {
    board::get_last_created_board(&state.pool, auth.user())
        .await
        .map_err(board_error_to_status)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// `GET /api/boards/{id}`
pub async fn get_board(
    State(state): State<AppState>,
    auth: MaybeUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Board>, StatusCode> {
    board::get_board_by_id(&state.pool, auth.user(), board_id)
        .await
        .map_err(board_error_to_status)?
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

/// `PUT /api/boards/{id}`
pub async fn save_board(
    State(state): State<AppState>,
    auth: MaybeUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<BoardSave>,
) -> Result<Json<Value>, StatusCode> {
    let updated = board::save_board(&state.pool, auth.user(), board_id, &body)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(json!({ "updated": updated })))
}

/// `PATCH /api/boards/{id}/title`
pub async fn change_title(
    State(state): State<AppState>,
    auth: MaybeUser,
    Path(board_id): Path<Uuid>,
    Json(body): Json<TitleBody>,
) -> Result<StatusCode, StatusCode> {
    board::change_board_title(&state.pool, auth.user(), board_id, &body.title)
        .await
        .map_err(board_error_to_status)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /api/boards/{id}/favorite`
pub async fn is_favorite(
    State(state): State<AppState>,
    auth: MaybeUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    let favorite = board::is_board_favorite(&state.pool, auth.user(), board_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(json!({ "favorite": favorite })))
}

/// `PUT /api/boards/{id}/favorite`
pub async fn star(
    State(state): State<AppState>,
    auth: MaybeUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    let updated = board::star_board(&state.pool, auth.user(), board_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(json!({ "updated": updated })))
}

/// `DELETE /api/boards/{id}/favorite`
pub async fn unstar(
    State(state): State<AppState>,
    auth: MaybeUser,
    Path(board_id): Path<Uuid>,
) -> Result<Json<Value>, StatusCode> {
    let updated = board::cancel_star_board(&state.pool, auth.user(), board_id)
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(json!({ "updated": updated })))
}

/// `GET /api/favorites`
pub async fn favorites(State(state): State<AppState>, auth: MaybeUser) -> Result<Json<Vec<BoardSummary>>, StatusCode> {
    let boards = board::get_my_favorite_boards(&state.pool, auth.user())
        .await
        .map_err(board_error_to_status)?;
    Ok(Json(boards))
}
