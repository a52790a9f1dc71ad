//! Location parsing: share links, room links, external URLs, and board ids.
//!
//! A session is pointed at a scene by its location. The forms recognized:
//!
//! | Form | Meaning |
//! |------|---------|
//! | `?id=<id>` | legacy external scene id |
//! | `#json=<id>,<key>` | static scene stored behind a share link |
//! | `#url=<encoded>` | scene JSON fetched from an arbitrary URL |
//! | `#room=<roomId>,<roomKey>` | live collaboration room |
//! | `/board/<id>` | cloud board owned by the signed-in user |
//!
//! Ids and keys in `#json` and `#room` are tokens of `[A-Za-z0-9_-]+`;
//! anything else in the fragment is ignored rather than rejected.

#[cfg(test)]
#[path = "link_test.rs"]
mod link_test;

use percent_encoding::percent_decode_str;
use url::Url;

use crate::error::SessionError;

const FRAGMENT_JSON: &str = "json=";
const FRAGMENT_URL: &str = "url=";
const FRAGMENT_ROOM: &str = "room=";
const BOARD_PATH_PREFIX: &str = "/board/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomLink {
    pub room_id: String,
    pub room_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedLink {
    pub id: String,
    pub key: String,
}

/// Everything a session needs from its current location.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    /// Scheme, host and port, e.g. `https://draw.example.com`.
    pub origin: String,
    pub scene_id: Option<String>,
    pub shared: Option<SharedLink>,
    pub room: Option<RoomLink>,
    pub external_url: Option<String>,
    pub board_id: Option<String>,
}

impl Location {
    /// Parse an absolute href.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::InvalidLink` when `href` is not an absolute URL.
    pub fn parse(href: &str) -> Result<Self, SessionError> {
        let url = Url::parse(href).map_err(|e| SessionError::InvalidLink(format!("{href}: {e}")))?;
        let fragment = url.fragment().unwrap_or_default();

        let scene_id = url
            .query_pairs()
            .find(|(k, _)| k == "id")
            .map(|(_, v)| v.into_owned())
            .filter(|v| !v.is_empty());

        Ok(Self {
            origin: url.origin().ascii_serialization(),
            scene_id,
            shared: fragment
                .strip_prefix(FRAGMENT_JSON)
                .and_then(token_pair)
                .map(|(id, key)| SharedLink { id, key }),
            room: parse_room_fragment(fragment),
            external_url: fragment.strip_prefix(FRAGMENT_URL).and_then(decode_component),
            board_id: board_id_from_path(url.path()),
        })
    }

    /// True for locations that name a scene other than the local one.
    #[must_use]
    pub fn is_external_scene(&self) -> bool {
        self.scene_id.is_some() || self.shared.is_some() || self.room.is_some()
    }
}

/// Room link carried by `href`, if any.
#[must_use]
pub fn parse_room_link(href: &str) -> Option<RoomLink> {
    let url = Url::parse(href).ok()?;
    parse_room_fragment(url.fragment()?)
}

/// True when `href` points into a collaboration room.
#[must_use]
pub fn is_collaboration_link(href: &str) -> bool {
    parse_room_link(href).is_some()
}

/// Fragment for joining `room`, e.g. `#room=abc,def`.
#[must_use]
pub fn room_fragment(room: &RoomLink) -> String {
    format!("#{FRAGMENT_ROOM}{},{}", room.room_id, room.room_key)
}

fn parse_room_fragment(fragment: &str) -> Option<RoomLink> {
    let (room_id, room_key) = fragment.strip_prefix(FRAGMENT_ROOM).and_then(token_pair)?;
    Some(RoomLink { room_id, room_key })
}

fn is_token(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

fn token_pair(rest: &str) -> Option<(String, String)> {
    let (a, b) = rest.split_once(',')?;
    (is_token(a) && is_token(b)).then(|| (a.to_owned(), b.to_owned()))
}

fn decode_component(raw: &str) -> Option<String> {
    let decoded = percent_decode_str(raw).decode_utf8().ok()?;
    let decoded = decoded.trim();
    (!decoded.is_empty()).then(|| decoded.to_owned())
}

fn board_id_from_path(path: &str) -> Option<String> {
    let start = path.rfind(BOARD_PATH_PREFIX)? + BOARD_PATH_PREFIX.len();
    let id = path[start..].split('/').next().unwrap_or_default();
    (!id.is_empty()).then(|| id.to_owned())
}
