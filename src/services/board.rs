//! Board service: cloud boards and favorites.
//!
//! DESIGN
//! ======
//! A board is one user's saved scene: a title, the element sequence and the
//! file map, stored as JSONB on a single row. Every operation runs on behalf
//! of a signed-in user and only ever touches that user's boards.
//!
//! Saves do not overwrite blindly. The stored elements are reconciled with
//! the incoming ones under a row lock, so a tab holding an older copy of the
//! board cannot roll newer elements back. Files are merged by id.
//!
//! ERROR HANDLING
//! ==============
//! A missing identity is `Unauthorized`. Boards that do not exist or belong
//! to someone else read as absent (`None` / `false`), so callers cannot
//! probe for other users' board ids. Renaming such a board is `NotFound`.

#[cfg(test)]
#[path = "board_test.rs"]
mod tests;

use scene::{SceneElement, decode_batch, reconcile_values};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use crate::frame::ErrorCode;
use crate::services::session::SessionUser;

pub const DEFAULT_TITLE: &str = "Untitled";

// =============================================================================
// TYPES
// =============================================================================

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("sign-in required")]
    Unauthorized,
    #[error("board not found: {0}")]
    NotFound(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ErrorCode for BoardError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "E_BOARD_UNAUTHORIZED",
            Self::NotFound(_) => "E_BOARD_NOT_FOUND",
            Self::Database(_) => "E_DATABASE",
        }
    }

    fn retryable(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// A full board document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Board {
    pub id: Uuid,
    pub title: String,
    pub elements: Vec<SceneElement>,
    pub files: Map<String, Value>,
    /// Milliseconds since the Unix epoch.
    pub created_at: i64,
    pub updated_at: i64,
}

/// A board listing entry, without its content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSummary {
    pub id: Uuid,
    pub title: String,
    pub is_favorite: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Body of a board save.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardSave {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub elements: Vec<Value>,
    #[serde(default)]
    pub files: Map<String, Value>,
}

/// Listing filter. `favorite = Some(b)` keeps boards whose starred state is `b`.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct BoardFilter {
    #[serde(default)]
    pub favorite: Option<bool>,
}

/// Board content after merging a save into what is stored.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedContent {
    pub elements: Vec<SceneElement>,
    pub files: Map<String, Value>,
    /// Elements the save actually changed.
    pub changed: usize,
    /// Malformed incoming records that were ignored.
    pub dropped: usize,
}

// =============================================================================
// PURE HELPERS
// =============================================================================

/// Identity of the caller, or `Unauthorized`.
///
/// # Errors
///
/// Returns `BoardError::Unauthorized` when no user is signed in.
pub fn require_user(user: Option<&SessionUser>) -> Result<Uuid, BoardError> {
    user.map(|u| u.id).ok_or(BoardError::Unauthorized)
}

/// Trimmed title, or the default when blank.
#[must_use]
pub fn normalize_title(title: &str) -> String {
    let title = title.trim();
    if title.is_empty() { DEFAULT_TITLE.to_owned() } else { title.to_owned() }
}

/// Merge a save into stored content: elements through the reconciler,
/// files by id with the incoming entry winning.
#[must_use]
pub fn merge_content(stored_elements: &[SceneElement], stored_files: &Map<String, Value>, save: &BoardSave) -> MergedContent {
    let result = reconcile_values(&save.elements, stored_elements);
    let mut files = stored_files.clone();
    files.extend(save.files.iter().map(|(k, v)| (k.clone(), v.clone())));
    MergedContent { changed: result.changed.len(), dropped: result.dropped, elements: result.elements, files }
}

fn elements_from_json(value: Value) -> Vec<SceneElement> {
    match value {
        Value::Array(values) => decode_batch(&values).elements,
        _ => Vec::new(),
    }
}

fn files_from_json(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn board_from_row(row: &PgRow) -> Board {
    Board {
        id: row.get("id"),
        title: row.get("title"),
        elements: elements_from_json(row.get("elements")),
        files: files_from_json(row.get("files")),
        created_at: row.get("created_ms"),
        updated_at: row.get("updated_ms"),
    }
}

fn summary_from_row(row: &PgRow) -> BoardSummary {
    BoardSummary {
        id: row.get("id"),
        title: row.get("title"),
        is_favorite: row.get("is_favorite"),
        created_at: row.get("created_ms"),
        updated_at: row.get("updated_ms"),
    }
}

const BOARD_COLUMNS: &str = "id, title, elements, files,
    (EXTRACT(EPOCH FROM created_at) * 1000)::BIGINT AS created_ms,
    (EXTRACT(EPOCH FROM updated_at) * 1000)::BIGINT AS updated_ms";

// =============================================================================
// BOARDS
// =============================================================================

/// Create an empty board for the caller.
///
/// # Errors
///
/// Returns `Unauthorized` without a user, or a database error.
pub async fn create_new_board(pool: &PgPool, user: Option<&SessionUser>) -> Result<Uuid, BoardError> {
    let owner_id = require_user(user)?;
    let id = Uuid::new_v4();
    sqlx::query("INSERT INTO boards (id, owner_id, title) VALUES ($1, $2, $3)")
        .bind(id)
        .bind(owner_id)
        .bind(DEFAULT_TITLE)
        .execute(pool)
        .await?;
    info!(board_id = %id, %owner_id, "board created");
    Ok(id)
}

/// The caller's most recently created board.
///
/// # Errors
///
/// Returns `Unauthorized` without a user, or a database error.
pub async fn get_last_created_board(pool: &PgPool, user: Option<&SessionUser>) -> Result<Option<Board>, BoardError> {
    let owner_id = require_user(user)?;
    let row = sqlx::query(&format!(
        "SELECT {BOARD_COLUMNS} FROM boards WHERE owner_id = $1 ORDER BY created_at DESC LIMIT 1"
    ))
    .bind(owner_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(board_from_row))
}

/// One of the caller's boards.
///
/// # Errors
///
/// Returns `Unauthorized` without a user, or a database error.
pub async fn get_board_by_id(pool: &PgPool, user: Option<&SessionUser>, board_id: Uuid) -> Result<Option<Board>, BoardError> {
    let owner_id = require_user(user)?;
    let row = sqlx::query(&format!("SELECT {BOARD_COLUMNS} FROM boards WHERE id = $1 AND owner_id = $2"))
        .bind(board_id)
        .bind(owner_id)
        .fetch_optional(pool)
        .await?;
    Ok(row.as_ref().map(board_from_row))
}

/// Save a board. Returns `true` when exactly one board row was updated.
///
/// # Errors
///
/// Returns `Unauthorized` without a user, or a database error.
pub async fn save_board(
    pool: &PgPool,
    user: Option<&SessionUser>,
    board_id: Uuid,
    save: &BoardSave,
) -> Result<bool, BoardError> {
    let owner_id = require_user(user)?;
    let mut tx = pool.begin().await?;

    let Some(row) = sqlx::query("SELECT elements, files FROM boards WHERE id = $1 AND owner_id = $2 FOR UPDATE")
        .bind(board_id)
        .bind(owner_id)
        .fetch_optional(&mut *tx)
        .await?
    else {
        return Ok(false);
    };

    let stored_elements = elements_from_json(row.get("elements"));
    let stored_files = files_from_json(row.get("files"));
    let merged = merge_content(&stored_elements, &stored_files, save);

    let result = sqlx::query(
        "UPDATE boards
         SET elements = $3, files = $4, title = COALESCE($5, title), updated_at = now()
         WHERE id = $1 AND owner_id = $2",
    )
    .bind(board_id)
    .bind(owner_id)
    .bind(Json(&merged.elements))
    .bind(Json(&merged.files))
    .bind(save.title.as_deref().map(normalize_title))
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    debug!(%board_id, changed = merged.changed, dropped = merged.dropped, "board saved");
    Ok(result.rows_affected() == 1)
}

/// Rename a board. Blank titles fall back to the default.
///
/// # Errors
///
/// Returns `Unauthorized` without a user, `NotFound` when the caller has no
/// such board, or a database error.
pub async fn change_board_title(
    pool: &PgPool,
    user: Option<&SessionUser>,
    board_id: Uuid,
    title: &str,
) -> Result<(), BoardError> {
    let owner_id = require_user(user)?;
    let result = sqlx::query("UPDATE boards SET title = $3, updated_at = now() WHERE id = $1 AND owner_id = $2")
        .bind(board_id)
        .bind(owner_id)
        .bind(normalize_title(title))
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(BoardError::NotFound(board_id));
    }
    Ok(())
}

/// The caller's boards, newest first.
///
/// # Errors
///
/// Returns `Unauthorized` without a user, or a database error.
pub async fn get_my_boards(pool: &PgPool, user: Option<&SessionUser>, filter: BoardFilter) -> Result<Vec<BoardSummary>, BoardError> {
    let owner_id = require_user(user)?;
    let rows = sqlx::query(
        "SELECT b.id, b.title, (f.board_id IS NOT NULL) AS is_favorite,
                (EXTRACT(EPOCH FROM b.created_at) * 1000)::BIGINT AS created_ms,
                (EXTRACT(EPOCH FROM b.updated_at) * 1000)::BIGINT AS updated_ms
         FROM boards b
         LEFT JOIN board_favorites f ON f.board_id = b.id AND f.user_id = $1
         WHERE b.owner_id = $1 AND ($2::BOOLEAN IS NULL OR (f.board_id IS NOT NULL) = $2)
         ORDER BY b.created_at DESC",
    )
    .bind(owner_id)
    .bind(filter.favorite)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(summary_from_row).collect())
}

// =============================================================================
// FAVORITES
// =============================================================================

/// Star a board. Starring twice is a no-op; returns `false` when the caller
/// has no such board.
///
/// # Errors
///
/// Returns `Unauthorized` without a user, or a database error.
pub async fn star_board(pool: &PgPool, user: Option<&SessionUser>, board_id: Uuid) -> Result<bool, BoardError> {
    let user_id = require_user(user)?;
    let result = sqlx::query(
        "INSERT INTO board_favorites (user_id, board_id)
         SELECT $1, id FROM boards WHERE id = $2 AND owner_id = $1
         ON CONFLICT (user_id, board_id) DO UPDATE SET created_at = board_favorites.created_at",
    )
    .bind(user_id)
    .bind(board_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Remove a star. Returns `false` when the board was not starred.
///
/// # Errors
///
/// Returns `Unauthorized` without a user, or a database error.
pub async fn cancel_star_board(pool: &PgPool, user: Option<&SessionUser>, board_id: Uuid) -> Result<bool, BoardError> {
    let user_id = require_user(user)?;
    let result = sqlx::query("DELETE FROM board_favorites WHERE user_id = $1 AND board_id = $2")
        .bind(user_id)
        .bind(board_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() == 1)
}

/// # Errors
///
/// Returns `Unauthorized` without a user, or a database error.
pub async fn is_board_favorite(pool: &PgPool, user: Option<&SessionUser>, board_id: Uuid) -> Result<bool, BoardError> {
    let user_id = require_user(user)?;
    let starred: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM board_favorites WHERE user_id = $1 AND board_id = $2)")
            .bind(user_id)
            .bind(board_id)
            .fetch_one(pool)
            .await?;
    Ok(starred)
}

/// The caller's starred boards, most recently starred first. Stars whose
/// board no longer exists are skipped.
///
/// # Errors
///
/// Returns `Unauthorized` without a user, or a database error.
pub async fn get_my_favorite_boards(pool: &PgPool, user: Option<&SessionUser>) -> Result<Vec<BoardSummary>, BoardError> {
    let user_id = require_user(user)?;
    let rows = sqlx::query(
        "SELECT b.id, b.title, TRUE AS is_favorite,
                (EXTRACT(EPOCH FROM b.created_at) * 1000)::BIGINT AS created_ms,
                (EXTRACT(EPOCH FROM b.updated_at) * 1000)::BIGINT AS updated_ms
         FROM board_favorites f
         JOIN boards b ON b.id = f.board_id AND b.owner_id = f.user_id
         WHERE f.user_id = $1
         ORDER BY f.created_at DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows.iter().map(summary_from_row).collect())
}
