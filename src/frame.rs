//! Socket envelope shared by every collaboration message.
//!
//! ARCHITECTURE
//! ============
//! A client request names an operation as `prefix:op` (`room:join`,
//! `room:update`). The answer is a `done` or `error` frame whose `parent_id`
//! is the request id. Changes made by one peer reach the others as new
//! `room:elements` request frames that nobody answers.
//!
//! DESIGN
//! ======
//! - `data` is a flat JSON object; room handlers read `elements` from it.
//! - `room` travels on the envelope so a reply stays tied to its room.
//! - Error frames carry `code`, `message` and `retryable` in `data`.

#[cfg(test)]
#[path = "frame_test.rs"]
mod tests;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// `data` key holding a human-readable error.
pub const FRAME_MESSAGE: &str = "message";
/// `data` key holding the stable `E_*` code of a typed error.
pub const FRAME_CODE: &str = "code";
/// `data` key telling the client whether resending may succeed.
pub const FRAME_RETRYABLE: &str = "retryable";

pub type Data = HashMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Request,
    Done,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub id: Uuid,
    /// Request this frame answers. Unset on requests and room notifications.
    #[serde(default)]
    pub parent_id: Option<Uuid>,
    /// Server clock in epoch milliseconds; clients may leave it out.
    #[serde(default)]
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    /// Display name of the sending user, stamped by the server.
    #[serde(default)]
    pub from: Option<String>,
    pub syscall: String,
    pub status: Status,
    #[serde(default)]
    pub data: Data,
}

/// Typed errors that can be reported to a socket client.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

impl Frame {
    pub fn request(syscall: impl Into<String>, data: Data) -> Self {
        Self {
            id: Uuid::new_v4(),
            parent_id: None,
            ts: scene::mutate::now_ms(),
            room: None,
            from: None,
            syscall: syscall.into(),
            status: Status::Request,
            data,
        }
    }

    #[must_use]
    pub fn done(&self) -> Self {
        self.done_with(Data::new())
    }

    #[must_use]
    pub fn done_with(&self, data: Data) -> Self {
        self.answer(Status::Done, data)
    }

    /// Untyped failure: only a message.
    #[must_use]
    pub fn error(&self, message: impl Into<String>) -> Self {
        let data = Data::from([(FRAME_MESSAGE.to_owned(), Value::String(message.into()))]);
        self.answer(Status::Error, data)
    }

    #[must_use]
    pub fn error_from(&self, err: &(impl ErrorCode + ?Sized)) -> Self {
        let data = Data::from([
            (FRAME_CODE.to_owned(), Value::from(err.error_code())),
            (FRAME_MESSAGE.to_owned(), Value::String(err.to_string())),
            (FRAME_RETRYABLE.to_owned(), Value::Bool(err.retryable())),
        ]);
        self.answer(Status::Error, data)
    }

    fn answer(&self, status: Status, data: Data) -> Self {
        Self {
            parent_id: Some(self.id),
            room: self.room.clone(),
            syscall: self.syscall.clone(),
            status,
            ..Self::request(String::new(), data)
        }
    }

    #[must_use]
    pub fn with_room(self, room: impl Into<String>) -> Self {
        Self { room: Some(room.into()), ..self }
    }

    #[must_use]
    pub fn with_from(self, from: impl Into<String>) -> Self {
        Self { from: Some(from.into()), ..self }
    }

    #[must_use]
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// `room` in `room:join`; the whole syscall when there is no ':'.
    #[must_use]
    pub fn prefix(&self) -> &str {
        self.syscall.split_once(':').map_or(self.syscall.as_str(), |(prefix, _)| prefix)
    }

    /// `join` in `room:join`; empty when there is no ':'.
    #[must_use]
    pub fn op(&self) -> &str {
        self.syscall.split_once(':').map_or("", |(_, op)| op)
    }
}
