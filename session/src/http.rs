//! HTTP clients for the board server and for scenes behind links.
//!
//! Thin `reqwest` wrappers. Response handling lives in pure `parse_*`
//! functions so status mapping can be tested without a server.

#[cfg(test)]
#[path = "http_test.rs"]
mod http_test;

use async_trait::async_trait;
use reqwest::StatusCode;
use scene::Scene;
use serde::Deserialize;
use tracing::debug;

use crate::collab::{BoardDocument, BoardService, BoardUpdate, SceneSource};
use crate::config::SessionConfig;
use crate::error::SessionError;

fn build_http(config: &SessionConfig) -> Result<reqwest::Client, SessionError> {
    Ok(reqwest::Client::builder().timeout(config.http_timeout).build()?)
}

// =============================================================================
// BOARDS
// =============================================================================

pub struct HttpBoardClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpBoardClient {
    /// # Errors
    ///
    /// Returns `SessionError::Http` when the HTTP client cannot be built.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        Ok(Self { http: build_http(config)?, base_url: config.server_url.clone(), token: config.token.clone() })
    }

    fn board_url(&self, board_id: &str) -> String {
        format!("{}/api/boards/{board_id}", self.base_url)
    }

    fn token(&self) -> Result<&str, SessionError> {
        self.token.as_deref().ok_or(SessionError::Unauthorized)
    }
}

#[async_trait]
impl BoardService for HttpBoardClient {
    async fn get_board_by_id(&self, board_id: &str) -> Result<Option<BoardDocument>, SessionError> {
        let response = self.http.get(self.board_url(board_id)).bearer_auth(self.token()?).send().await?;
        let status = response.status();
        let text = response.text().await?;
        debug!(%board_id, status = status.as_u16(), "board fetched");
        parse_board_response(status, &text)
    }

    async fn update_board(&self, update: &BoardUpdate) -> Result<bool, SessionError> {
        let response = self
            .http
            .put(self.board_url(&update.id))
            .bearer_auth(self.token()?)
            .json(update)
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        parse_update_response(status, &text)
    }
}

#[derive(Deserialize)]
struct UpdateResponse {
    updated: bool,
}

fn check_status(status: StatusCode) -> Result<(), SessionError> {
    if status == StatusCode::UNAUTHORIZED {
        return Err(SessionError::Unauthorized);
    }
    if !status.is_success() {
        return Err(SessionError::Status(status.as_u16()));
    }
    Ok(())
}

pub(crate) fn parse_board_response(status: StatusCode, body: &str) -> Result<Option<BoardDocument>, SessionError> {
    if status == StatusCode::NOT_FOUND {
        return Ok(None);
    }
    check_status(status)?;
    Ok(Some(serde_json::from_str(body)?))
}

pub(crate) fn parse_update_response(status: StatusCode, body: &str) -> Result<bool, SessionError> {
    if status == StatusCode::NOT_FOUND {
        return Ok(false);
    }
    check_status(status)?;
    let parsed: UpdateResponse = serde_json::from_str(body)?;
    Ok(parsed.updated)
}

// =============================================================================
// LINKED SCENES
// =============================================================================

pub struct HttpSceneSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpSceneSource {
    /// # Errors
    ///
    /// Returns `SessionError::Http` when the HTTP client cannot be built.
    pub fn new(config: &SessionConfig) -> Result<Self, SessionError> {
        Ok(Self { http: build_http(config)?, base_url: config.server_url.clone() })
    }
}

#[async_trait]
impl SceneSource for HttpSceneSource {
    async fn load_shared(&self, id: &str, key: &str) -> Result<Scene, SessionError> {
        let response = self
            .http
            .get(format!("{}/api/scenes/{id}", self.base_url))
            .query(&[("key", key)])
            .send()
            .await?;
        let status = response.status();
        let text = response.text().await?;
        parse_scene_response(status, &text)
    }

    async fn fetch_url(&self, url: &str) -> Result<Scene, SessionError> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        let text = response.text().await?;
        parse_scene_response(status, &text)
    }
}

pub(crate) fn parse_scene_response(status: StatusCode, body: &str) -> Result<Scene, SessionError> {
    check_status(status)?;
    Ok(serde_json::from_str(body)?)
}
