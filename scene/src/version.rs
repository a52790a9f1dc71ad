//! Version comparison between a local element and a remote candidate.
//!
//! Ordering is by `version` alone. When two records for the same id carry
//! the same version, the lower `version_nonce` wins; an exact nonce match
//! keeps the local record. The outcome depends only on the two records,
//! never on arrival order, which is what lets peers converge.

#[cfg(test)]
#[path = "version_test.rs"]
mod version_test;

use crate::element::SceneElement;

/// How a remote candidate fared against the local record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// No local record for this id.
    AcceptNew,
    /// Remote version is higher.
    AcceptNewer,
    /// Same version, remote nonce is lower.
    AcceptTieBreak,
    /// Remote version is lower.
    DiscardStale,
    /// Same version, remote nonce is equal or higher.
    DiscardTieBreak,
}

impl Verdict {
    #[must_use]
    pub fn accepts(self) -> bool {
        matches!(self, Self::AcceptNew | Self::AcceptNewer | Self::AcceptTieBreak)
    }
}

/// A candidate that must never win: empty id or non-positive version.
#[must_use]
pub fn is_invalid(candidate: &SceneElement) -> bool {
    candidate.id.is_empty() || candidate.version < 1
}

/// Compare a remote candidate against the local record for the same id.
#[must_use]
pub fn compare(local: Option<&SceneElement>, remote: &SceneElement) -> Verdict {
    let Some(local) = local else {
        return Verdict::AcceptNew;
    };
    if remote.version < local.version {
        Verdict::DiscardStale
    } else if remote.version > local.version {
        Verdict::AcceptNewer
    } else if remote.version_nonce < local.version_nonce {
        Verdict::AcceptTieBreak
    } else {
        Verdict::DiscardTieBreak
    }
}

/// True when the remote candidate should be ignored in favor of `local`.
#[must_use]
pub fn should_discard_remote(local: Option<&SceneElement>, remote: &SceneElement) -> bool {
    !compare(local, remote).accepts()
}
