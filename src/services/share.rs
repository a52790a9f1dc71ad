//! Share-link scenes.
//!
//! A published scene is addressed by `#json=<id>,<key>`. The id names the
//! row; the key is a second random token that only the link holder knows.
//! Only the SHA-256 digest of the key is stored, and a lookup with the wrong
//! key is indistinguishable from a missing scene.

#[cfg(test)]
#[path = "share_test.rs"]
mod tests;

use rand::Rng;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::info;

use crate::frame::ErrorCode;

const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";
pub const ID_LENGTH: usize = 20;
pub const KEY_LENGTH: usize = 22;

#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    #[error("shared scene not found")]
    NotFound,
    #[error("shared scene must be a JSON object")]
    InvalidScene,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for ShareError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound => "E_SHARE_NOT_FOUND",
            Self::InvalidScene => "E_SHARE_INVALID_SCENE",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Link coordinates of a stored scene.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SharedLink {
    pub id: String,
    pub key: String,
}

/// Random token of `len` characters from `[A-Za-z0-9_-]`.
#[must_use]
pub fn generate_token(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(TOKEN_ALPHABET[rng.random_range(0..TOKEN_ALPHABET.len())]))
        .collect()
}

/// Hex SHA-256 of a link key.
#[must_use]
pub fn key_digest(key: &str) -> String {
    Sha256::digest(key.as_bytes()).iter().map(|b| format!("{b:02x}")).collect()
}

/// Store a scene and return the link that opens it.
///
/// # Errors
///
/// Returns `InvalidScene` for non-object payloads, or a database error.
pub async fn store_scene(pool: &PgPool, scene: &Value) -> Result<SharedLink, ShareError> {
    if !scene.is_object() {
        return Err(ShareError::InvalidScene);
    }
    let link = SharedLink { id: generate_token(ID_LENGTH), key: generate_token(KEY_LENGTH) };
    sqlx::query("INSERT INTO shared_scenes (id, key_digest, scene) VALUES ($1, $2, $3)")
        .bind(&link.id)
        .bind(key_digest(&link.key))
        .bind(scene)
        .execute(pool)
        .await?;
    info!(scene_id = %link.id, "shared scene stored");
    Ok(link)
}

/// Load a scene by link coordinates.
///
/// # Errors
///
/// Returns `NotFound` for an unknown id or a wrong key, or a database error.
pub async fn load_scene(pool: &PgPool, id: &str, key: &str) -> Result<Value, ShareError> {
    let scene: Option<Value> = sqlx::query_scalar("SELECT scene FROM shared_scenes WHERE id = $1 AND key_digest = $2")
        .bind(id)
        .bind(key_digest(key))
        .fetch_optional(pool)
        .await?;
    scene.ok_or(ShareError::NotFound)
}
