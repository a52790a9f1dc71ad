//! Share-link scene routes.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::Value;

use crate::services::share::{self, ShareError, SharedLink};
use crate::state::AppState;

pub(crate) fn share_error_to_status(err: ShareError) -> StatusCode {
    match err {
        ShareError::NotFound => StatusCode::NOT_FOUND,
        ShareError::InvalidScene => StatusCode::BAD_REQUEST,
        ShareError::Database(e) => {
            tracing::error!(error = %e, "shared scene query failed");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

#[derive(Deserialize)]
pub struct KeyQuery {
    #[serde(default)]
    pub key: String,
}

/// `POST /api/scenes`
pub async fn store_scene(
    State(state): State<AppState>,
    Json(scene): Json<Value>,
) -> Result<(StatusCode, Json<SharedLink>), StatusCode> {
    let link = share::store_scene(&state.pool, &scene)
        .await
        .map_err(share_error_to_status)?;
    Ok((StatusCode::CREATED, Json(link)))
}

/// `GET /api/scenes/{id}?key=...`
pub async fn load_scene(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<KeyQuery>,
) -> Result<Json<Value>, StatusCode> {
    if query.key.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    let scene = share::load_scene(&state.pool, &id, &query.key)
        .await
        .map_err(share_error_to_status)?;
    Ok(Json(scene))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_errors_map_to_statuses() {
        assert_eq!(share_error_to_status(ShareError::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(share_error_to_status(ShareError::InvalidScene), StatusCode::BAD_REQUEST);
        assert_eq!(
            share_error_to_status(ShareError::Database(sqlx::Error::PoolTimedOut)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn missing_key_reads_as_not_found() {
        let state = crate::state::test_helpers::test_app_state();
        let err = load_scene(State(state), Path("abc".into()), Query(KeyQuery { key: String::new() }))
            .await
            .unwrap_err();
        assert_eq!(err, StatusCode::NOT_FOUND);
    }
}
