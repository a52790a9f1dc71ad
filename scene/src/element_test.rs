use serde_json::json;

use super::*;

// =============================================================
// from_value
// =============================================================

#[test]
fn from_value_reads_versioning_fields() {
    let raw = json!({
        "id": "rect-1",
        "version": 4,
        "versionNonce": 1234,
        "isDeleted": true,
        "updated": 1_700_000_000_000_i64,
        "type": "rectangle",
        "x": 10.5
    });
    let el = SceneElement::from_value(&raw).unwrap();
    assert_eq!(el.id.as_str(), "rect-1");
    assert_eq!(el.version, 4);
    assert_eq!(el.version_nonce, 1234);
    assert!(el.is_deleted);
    assert_eq!(el.updated, 1_700_000_000_000);
    assert_eq!(el.kind(), Some("rectangle"));
    assert_eq!(el.props.get("x"), Some(&json!(10.5)));
    assert!(!el.props.contains_key("version"));
    assert!(!el.props.contains_key("id"));
}

#[test]
fn from_value_defaults_optional_fields() {
    let el = SceneElement::from_value(&json!({"id": "a", "version": 1})).unwrap();
    assert_eq!(el.version_nonce, 0);
    assert!(!el.is_deleted);
    assert_eq!(el.updated, 0);
    assert!(el.props.is_empty());
}

#[test]
fn from_value_accepts_integral_float_version() {
    let el = SceneElement::from_value(&json!({"id": "a", "version": 3.0})).unwrap();
    assert_eq!(el.version, 3);
}

#[test]
fn from_value_rejects_non_object() {
    assert_eq!(SceneElement::from_value(&json!([1, 2])), Err(ElementError::NotAnObject));
}

#[test]
fn from_value_rejects_missing_or_empty_id() {
    assert_eq!(SceneElement::from_value(&json!({"version": 1})), Err(ElementError::MissingId));
    assert_eq!(SceneElement::from_value(&json!({"id": "", "version": 1})), Err(ElementError::MissingId));
    assert_eq!(SceneElement::from_value(&json!({"id": 7, "version": 1})), Err(ElementError::MissingId));
}

#[test]
fn from_value_rejects_non_numeric_version() {
    let err = SceneElement::from_value(&json!({"id": "a", "version": "3"})).unwrap_err();
    assert_eq!(err, ElementError::BadVersion { id: "a".into() });
    assert_eq!(err.error_code(), "E_ELEMENT_BAD_VERSION");
}

#[test]
fn from_value_rejects_fractional_version() {
    let err = SceneElement::from_value(&json!({"id": "a", "version": 2.5})).unwrap_err();
    assert_eq!(err, ElementError::BadVersion { id: "a".into() });
}

#[test]
fn from_value_rejects_zero_and_negative_version() {
    assert_eq!(
        SceneElement::from_value(&json!({"id": "a", "version": 0})),
        Err(ElementError::NonPositiveVersion { id: "a".into(), version: 0 })
    );
    assert_eq!(
        SceneElement::from_value(&json!({"id": "a", "version": -2})),
        Err(ElementError::NonPositiveVersion { id: "a".into(), version: -2 })
    );
}

#[test]
fn from_value_rejects_bad_nonce_and_tombstone_types() {
    assert_eq!(
        SceneElement::from_value(&json!({"id": "a", "version": 1, "versionNonce": "x"})),
        Err(ElementError::BadField { id: "a".into(), field: "versionNonce" })
    );
    assert_eq!(
        SceneElement::from_value(&json!({"id": "a", "version": 1, "isDeleted": 1})),
        Err(ElementError::BadField { id: "a".into(), field: "isDeleted" })
    );
}

// =============================================================
// serde
// =============================================================

#[test]
fn serialize_uses_camel_case_and_flattens_props() {
    let el = SceneElement::from_value(&json!({
        "id": "a", "version": 2, "versionNonce": 9, "type": "ellipse", "strokeColor": "#000"
    }))
    .unwrap();
    let value = serde_json::to_value(&el).unwrap();
    assert_eq!(value["id"], json!("a"));
    assert_eq!(value["version"], json!(2));
    assert_eq!(value["versionNonce"], json!(9));
    assert_eq!(value["isDeleted"], json!(false));
    assert_eq!(value["type"], json!("ellipse"));
    assert_eq!(value["strokeColor"], json!("#000"));
    assert!(value.get("props").is_none());
}

#[test]
fn deserialize_goes_through_validation() {
    let ok: SceneElement = serde_json::from_str(r#"{"id":"a","version":1,"width":3}"#).unwrap();
    assert_eq!(ok.props.get("width"), Some(&json!(3)));

    let bad = serde_json::from_str::<SceneElement>(r#"{"id":"a","version":"nope"}"#);
    assert!(bad.is_err());
}

#[test]
fn unknown_fields_survive_a_wire_trip() {
    let raw = json!({
        "id": "t", "version": 5, "versionNonce": 3, "isDeleted": false, "updated": 1,
        "type": "text", "text": "hello", "boundElements": [{"id": "x", "type": "arrow"}]
    });
    let el = SceneElement::from_value(&raw).unwrap();
    assert_eq!(serde_json::to_value(&el).unwrap(), raw);
}

// =============================================================
// image helpers
// =============================================================

#[test]
fn file_id_only_for_image_elements() {
    let image = SceneElement::from_value(&json!({
        "id": "i", "version": 1, "type": "image", "fileId": "f-1", "status": "pending"
    }))
    .unwrap();
    assert_eq!(image.file_id(), Some("f-1"));
    assert_eq!(image.status(), Some("pending"));
    assert!(image.is_initialized_image());

    let rect = SceneElement::from_value(&json!({"id": "r", "version": 1, "type": "rectangle", "fileId": "f-2"})).unwrap();
    assert_eq!(rect.file_id(), None);

    let pending = SceneElement::from_value(&json!({"id": "p", "version": 1, "type": "image"})).unwrap();
    assert!(!pending.is_initialized_image());
}

// =============================================================
// decode_batch
// =============================================================

#[test]
fn decode_batch_drops_only_malformed_records() {
    let mut values: Vec<Value> = (0..9).map(|i| json!({"id": format!("e{i}"), "version": 1})).collect();
    values.insert(4, json!({"id": "broken", "version": "NaN"}));

    let batch = decode_batch(&values);
    assert_eq!(batch.elements.len(), 9);
    assert_eq!(batch.errors.len(), 1);
    assert!(batch.elements.iter().all(|e| e.id.as_str() != "broken"));
}

// =============================================================
// Scene
// =============================================================

#[test]
fn scene_deserialize_skips_bad_elements() {
    let scene: Scene = serde_json::from_value(json!({
        "elements": [
            {"id": "a", "version": 1},
            {"version": 2},
            {"id": "b", "version": 1, "type": "image", "fileId": "f"}
        ],
        "appState": {"theme": "dark"},
        "files": {"f": {"mimeType": "image/png"}}
    }))
    .unwrap();
    assert_eq!(scene.elements.len(), 2);
    assert_eq!(scene.app_state.get("theme"), Some(&json!("dark")));
    assert_eq!(scene.image_file_ids(), vec!["f".to_owned()]);
}

#[test]
fn scene_deserialize_tolerates_missing_and_null_sections() {
    let scene: Scene = serde_json::from_value(json!({"elements": null})).unwrap();
    assert!(scene.elements.is_empty());
    assert!(scene.app_state.is_empty());
    assert!(scene.files.is_empty());
}

#[test]
fn has_visible_elements_ignores_tombstones() {
    let deleted = SceneElement::from_value(&json!({"id": "a", "version": 2, "isDeleted": true})).unwrap();
    let mut scene = Scene::new(vec![deleted]);
    assert!(!scene.has_visible_elements());

    scene
        .elements
        .push(SceneElement::from_value(&json!({"id": "b", "version": 1})).unwrap());
    assert!(scene.has_visible_elements());
}

#[test]
fn element_id_display_and_conversions() {
    let id = ElementId::from("abc");
    assert_eq!(id.to_string(), "abc");
    assert_eq!(ElementId::from(String::from("abc")), id);
    assert!(!id.is_empty());
    assert!(ElementId::new("").is_empty());
}
