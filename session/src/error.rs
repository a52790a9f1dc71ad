//! Session error type.
//!
//! Every failure a session can hit is surfaced to the user as the scene's
//! `errorMessage` except `Cancelled`, which the user caused. Nothing here is
//! fatal to the session loop.

use crate::context::BootstrapState;

/// Trait for errors that carry a grepable code and a retry hint.
pub trait ErrorCode: std::fmt::Display {
    /// Machine-readable code, e.g. `E_SESSION_UNAUTHORIZED`.
    fn error_code(&self) -> &'static str;

    /// Whether the client should retry the same operation later.
    fn retryable(&self) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not signed in")]
    Unauthorized,
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("server answered with status {0}")]
    Status(u16),
    #[error("invalid scene data: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid link: {0}")]
    InvalidLink(String),
    #[error("collaboration failed: {0}")]
    Collab(String),
    #[error("local storage failed: {0}")]
    Storage(String),
    #[error("bootstrap cannot move from {from:?} to {to:?}")]
    InvalidTransition { from: BootstrapState, to: BootstrapState },
    #[error("cancelled")]
    Cancelled,
    #[error("session has ended")]
    Closed,
}

impl SessionError {
    /// Errors the user should never see in `errorMessage`.
    #[must_use]
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl ErrorCode for SessionError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "E_SESSION_UNAUTHORIZED",
            Self::Http(_) => "E_SESSION_HTTP",
            Self::Status(_) => "E_SESSION_STATUS",
            Self::Decode(_) => "E_SESSION_DECODE",
            Self::InvalidLink(_) => "E_SESSION_INVALID_LINK",
            Self::Collab(_) => "E_SESSION_COLLAB",
            Self::Storage(_) => "E_SESSION_STORAGE",
            Self::InvalidTransition { .. } => "E_SESSION_INVALID_TRANSITION",
            Self::Cancelled => "E_SESSION_CANCELLED",
            Self::Closed => "E_SESSION_CLOSED",
        }
    }

    fn retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Collab(_) => true,
            Self::Status(code) => *code >= 500,
            _ => false,
        }
    }
}
