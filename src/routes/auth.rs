//! Caller identity extractor.

use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::http::header::AUTHORIZATION;
use tracing::error;

use crate::services::session::{self, SessionUser};
use crate::state::AppState;

/// The signed-in user, if the request carries a valid bearer token.
///
/// Missing and invalid tokens both yield `None`; the board service decides
/// that an anonymous caller is `Unauthorized`.
pub struct MaybeUser(pub Option<SessionUser>);

impl MaybeUser {
    #[must_use]
    pub fn user(&self) -> Option<&SessionUser> {
        self.0.as_ref()
    }
}

impl<S> axum::extract::FromRequestParts<S> for MaybeUser
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut axum::http::request::Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(session::bearer_token)
        else {
            return Ok(Self(None));
        };

        let app_state = AppState::from_ref(state);
        let user = session::validate_session(&app_state.pool, token).await.map_err(|e| {
            error!(error = %e, "session validation failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        Ok(Self(user))
    }
}
