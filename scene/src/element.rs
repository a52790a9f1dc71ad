//! Element model: versioned scene elements, wire decoding, and the scene document.
//!
//! A `SceneElement` carries the four fields the reconciler cares about
//! (`id`, `version`, `versionNonce`, `isDeleted`) plus the local `updated`
//! timestamp. Everything else the drawing surface stores on an element
//! (type, geometry, style, file references) rides along in `props` and is
//! flattened back onto the wire unchanged.
//!
//! Data arrives here as raw JSON from three places: the collaboration
//! channel, local persistence, and cloud board documents. Decoding is
//! strict about the versioning fields and lenient about the rest, so a
//! single corrupt record can be dropped without losing the batch.

#[cfg(test)]
#[path = "element_test.rs"]
mod element_test;

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Wire keys owned by `SceneElement`; all other keys land in `props`.
const KEY_ID: &str = "id";
const KEY_VERSION: &str = "version";
const KEY_VERSION_NONCE: &str = "versionNonce";
const KEY_IS_DELETED: &str = "isDeleted";
const KEY_UPDATED: &str = "updated";

/// True for keys `SceneElement` owns. They never live in `props`, since a
/// flattened copy would overwrite the typed field on the wire.
#[must_use]
pub fn is_reserved_key(key: &str) -> bool {
    matches!(key, KEY_ID | KEY_VERSION | KEY_VERSION_NONCE | KEY_IS_DELETED | KEY_UPDATED)
}

/// Opaque, stable element identifier assigned at creation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(String);

impl ElementId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for ElementId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A single drawable element as held in the store and sent on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "Value")]
pub struct SceneElement {
    /// Stable identifier, never reused.
    pub id: ElementId,
    /// Per-id edit counter. Positive and never decreasing within one peer.
    pub version: i64,
    /// Random tie-breaker regenerated on every local content change.
    pub version_nonce: i64,
    /// Tombstone flag. Deleted elements stay in the store.
    pub is_deleted: bool,
    /// Local mutation time in milliseconds since the Unix epoch.
    pub updated: i64,
    /// Remaining element fields, opaque to reconciliation.
    #[serde(flatten)]
    pub props: Map<String, Value>,
}

/// Why a raw element record was rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ElementError {
    #[error("element is not a JSON object")]
    NotAnObject,
    #[error("element has no id")]
    MissingId,
    #[error("element {id}: version is missing or not an integer")]
    BadVersion { id: String },
    #[error("element {id}: version {version} is not positive")]
    NonPositiveVersion { id: String, version: i64 },
    #[error("element {id}: field {field} has the wrong type")]
    BadField { id: String, field: &'static str },
}

impl ElementError {
    /// Grepable code for logs and error payloads.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotAnObject => "E_ELEMENT_NOT_OBJECT",
            Self::MissingId => "E_ELEMENT_MISSING_ID",
            Self::BadVersion { .. } => "E_ELEMENT_BAD_VERSION",
            Self::NonPositiveVersion { .. } => "E_ELEMENT_NON_POSITIVE_VERSION",
            Self::BadField { .. } => "E_ELEMENT_BAD_FIELD",
        }
    }
}

/// Read a JSON number as an integer. Integral floats are accepted because
/// JavaScript peers do not distinguish the two.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss, clippy::float_cmp)]
fn as_integer(value: &Value) -> Option<i64> {
    if let Some(n) = value.as_i64() {
        return Some(n);
    }
    let f = value.as_f64()?;
    if f.is_finite() && f.trunc() == f && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

impl SceneElement {
    /// Decode and validate one raw element record.
    ///
    /// # Errors
    ///
    /// Returns an `ElementError` when the id is missing or empty, the version
    /// is not a positive integer, or a versioning field has the wrong type.
    pub fn from_value(value: &Value) -> Result<Self, ElementError> {
        let obj = value.as_object().ok_or(ElementError::NotAnObject)?;

        let id = obj
            .get(KEY_ID)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or(ElementError::MissingId)?;

        let version = obj
            .get(KEY_VERSION)
            .and_then(as_integer)
            .ok_or_else(|| ElementError::BadVersion { id: id.to_owned() })?;
        if version < 1 {
            return Err(ElementError::NonPositiveVersion { id: id.to_owned(), version });
        }

        let version_nonce = match obj.get(KEY_VERSION_NONCE) {
            None | Some(Value::Null) => 0,
            Some(v) => as_integer(v).ok_or_else(|| ElementError::BadField { id: id.to_owned(), field: KEY_VERSION_NONCE })?,
        };

        let is_deleted = match obj.get(KEY_IS_DELETED) {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => return Err(ElementError::BadField { id: id.to_owned(), field: KEY_IS_DELETED }),
        };

        let updated = match obj.get(KEY_UPDATED) {
            None | Some(Value::Null) => 0,
            Some(v) => as_integer(v).ok_or_else(|| ElementError::BadField { id: id.to_owned(), field: KEY_UPDATED })?,
        };

        let props = obj
            .iter()
            .filter(|(k, _)| !is_reserved_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(Self { id: ElementId::new(id), version, version_nonce, is_deleted, updated, props })
    }

    /// Element type (`"rectangle"`, `"image"`, ...) if present.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.props.get("type").and_then(Value::as_str)
    }

    /// File reference of an initialized image element.
    #[must_use]
    pub fn file_id(&self) -> Option<&str> {
        if self.kind() != Some("image") {
            return None;
        }
        self.props.get("fileId").and_then(Value::as_str)
    }

    /// Save status of an image element (`"pending"`, `"saved"`, `"error"`).
    #[must_use]
    pub fn status(&self) -> Option<&str> {
        self.props.get("status").and_then(Value::as_str)
    }

    /// True for image elements whose file id has been assigned.
    #[must_use]
    pub fn is_initialized_image(&self) -> bool {
        self.file_id().is_some()
    }
}

impl TryFrom<Value> for SceneElement {
    type Error = ElementError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(&value)
    }
}

/// Outcome of decoding a raw batch.
#[derive(Debug, Default)]
pub struct DecodedBatch {
    pub elements: Vec<SceneElement>,
    pub errors: Vec<ElementError>,
}

/// Decode a batch of raw element records, dropping malformed ones.
#[must_use]
pub fn decode_batch(values: &[Value]) -> DecodedBatch {
    let mut batch = DecodedBatch { elements: Vec::with_capacity(values.len()), errors: Vec::new() };
    for value in values {
        match SceneElement::from_value(value) {
            Ok(element) => batch.elements.push(element),
            Err(e) => {
                warn!(error = %e, code = e.error_code(), "dropping malformed element");
                batch.errors.push(e);
            }
        }
    }
    batch
}

fn lenient_elements<'de, D>(deserializer: D) -> Result<Vec<SceneElement>, D::Error>
where
    D: Deserializer<'de>,
{
    let values = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(decode_batch(&values).elements)
}

/// Full drawing state: ordered elements plus opaque app state and files.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    #[serde(default, deserialize_with = "lenient_elements")]
    pub elements: Vec<SceneElement>,
    #[serde(default)]
    pub app_state: Map<String, Value>,
    #[serde(default)]
    pub files: Map<String, Value>,
}

impl Scene {
    #[must_use]
    pub fn new(elements: Vec<SceneElement>) -> Self {
        Self { elements, ..Self::default() }
    }

    /// True when the scene has at least one visible (non-deleted) element.
    #[must_use]
    pub fn has_visible_elements(&self) -> bool {
        self.elements.iter().any(|e| !e.is_deleted)
    }

    /// File ids referenced by initialized image elements, in element order.
    #[must_use]
    pub fn image_file_ids(&self) -> Vec<String> {
        self.elements
            .iter()
            .filter_map(SceneElement::file_id)
            .map(str::to_owned)
            .collect()
    }
}
