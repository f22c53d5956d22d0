//! Sequential identifier assignment.
//!
//! Every feature gets `id = index + 1`. Identifiers that the source file
//! carried are kept as sidecar attributes:
//!
//! - a top-level feature `id` is copied to `ID_FILE`
//! - an `OBJECTID` attribute is moved to `OBJECTID_FILE`
//!
//! A sidecar column is only kept when at least one feature actually had the
//! original value; features without one get an empty string.

use geojson::feature::Id;
use geojson::{FeatureCollection, GeoJson, JsonObject, JsonValue};
use tracing::debug;

use crate::error::{IngestError, Result};

pub const OBJECTID: &str = "OBJECTID";
pub const ID_FILE: &str = "ID_FILE";
pub const OBJECTID_FILE: &str = "OBJECTID_FILE";

/// Accepts only `FeatureCollection` documents.
pub fn expect_collection(geojson: GeoJson) -> Result<FeatureCollection> {
    match geojson {
        GeoJson::FeatureCollection(fc) => Ok(fc),
        GeoJson::Feature(_) => Err(IngestError::Format(
            "GeoJSON is a single Feature, not a FeatureCollection".to_string(),
        )),
        GeoJson::Geometry(_) => Err(IngestError::Format(
            "GeoJSON is a bare Geometry, not a FeatureCollection".to_string(),
        )),
    }
}

/// Assigns `1..=n` identifiers in place.
pub fn assign_ids(fc: &mut FeatureCollection) {
    let mut any_id = false;
    let mut any_object_id = false;

    // first pass: assign, recording sidecar values
    for (idx, feature) in fc.features.iter_mut().enumerate() {
        let original_id = feature.id.take();
        let props = feature.properties.get_or_insert_with(JsonObject::new);

        let id_file = match original_id {
            Some(id) => {
                any_id = true;
                id_to_json(id)
            }
            None => JsonValue::String(String::new()),
        };

        let object_id_file = match remove_key(props, OBJECTID) {
            Some(value) => {
                any_object_id = true;
                value
            }
            None => JsonValue::String(String::new()),
        };

        props.insert(ID_FILE.to_string(), id_file);
        props.insert(OBJECTID_FILE.to_string(), object_id_file);

        feature.id = Some(Id::Number((idx as u64 + 1).into()));
    }

    // second pass: drop sidecar columns nobody populated
    if !any_id {
        strip_attribute(fc, ID_FILE);
    }
    if !any_object_id {
        strip_attribute(fc, OBJECTID_FILE);
    }

    debug!(
        features = fc.features.len(),
        kept_id_file = any_id,
        kept_objectid_file = any_object_id,
        "assigned feature ids"
    );
}

fn id_to_json(id: Id) -> JsonValue {
    match id {
        Id::String(s) => JsonValue::String(s),
        Id::Number(n) => JsonValue::Number(n),
    }
}

fn strip_attribute(fc: &mut FeatureCollection, key: &str) {
    for feature in &mut fc.features {
        if let Some(props) = feature.properties.as_mut() {
            remove_key(props, key);
        }
    }
}

/// Removes `key` while keeping the order of the remaining attributes.
pub(crate) fn remove_key(props: &mut JsonObject, key: &str) -> Option<JsonValue> {
    if !props.contains_key(key) {
        return None;
    }
    let mut removed = None;
    *props = std::mem::take(props)
        .into_iter()
        .filter_map(|(k, v)| {
            if k == key {
                removed = Some(v);
                None
            } else {
                Some((k, v))
            }
        })
        .collect();
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn collection(value: serde_json::Value) -> FeatureCollection {
        let geojson: GeoJson = value.to_string().parse().unwrap();
        expect_collection(geojson).unwrap()
    }

    fn point(props: serde_json::Value) -> serde_json::Value {
        json!({
            "type": "Feature",
            "properties": props,
            "geometry": { "type": "Point", "coordinates": [1.0, 2.0] }
        })
    }

    #[test]
    fn test_ids_are_sequential_from_one() {
        let mut fc = collection(json!({
            "type": "FeatureCollection",
            "features": [point(json!({})), point(json!({})), point(json!({}))]
        }));
        assign_ids(&mut fc);

        let ids: Vec<_> = fc
            .features
            .iter()
            .map(|f| id_to_json(f.id.clone().unwrap()))
            .collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    }

    #[test]
    fn test_no_native_ids_leaves_no_sidecar_columns() {
        let mut fc = collection(json!({
            "type": "FeatureCollection",
            "features": [point(json!({"name": "a"})), point(json!({"name": "b"}))]
        }));
        assign_ids(&mut fc);

        for f in &fc.features {
            let props = f.properties.as_ref().unwrap();
            assert!(!props.contains_key(ID_FILE));
            assert!(!props.contains_key(OBJECTID_FILE));
            assert_eq!(props.len(), 1);
        }
    }

    #[test]
    fn test_partial_native_ids_fill_with_empty_string() {
        let mut with_id = point(json!({}));
        with_id["id"] = json!("abc");
        let mut fc = collection(json!({
            "type": "FeatureCollection",
            "features": [with_id, point(json!({}))]
        }));
        assign_ids(&mut fc);

        let first = fc.features[0].properties.as_ref().unwrap();
        let second = fc.features[1].properties.as_ref().unwrap();
        assert_eq!(first[ID_FILE], json!("abc"));
        assert_eq!(second[ID_FILE], json!(""));
        assert!(!first.contains_key(OBJECTID_FILE));
    }

    #[test]
    fn test_objectid_attribute_moves_to_sidecar() {
        let mut fc = collection(json!({
            "type": "FeatureCollection",
            "features": [
                point(json!({"OBJECTID": 77, "name": "a", "kind": "x"})),
                point(json!({"name": "b", "kind": "y"}))
            ]
        }));
        assign_ids(&mut fc);

        let first = fc.features[0].properties.as_ref().unwrap();
        assert!(!first.contains_key(OBJECTID));
        assert_eq!(first[OBJECTID_FILE], json!(77));
        let keys: Vec<_> = first.keys().cloned().collect();
        assert_eq!(keys, vec!["name", "kind", OBJECTID_FILE]);

        let second = fc.features[1].properties.as_ref().unwrap();
        assert_eq!(second[OBJECTID_FILE], json!(""));
    }

    #[test]
    fn test_single_feature_is_rejected() {
        let geojson: GeoJson = point(json!({})).to_string().parse().unwrap();
        assert!(matches!(
            expect_collection(geojson),
            Err(IngestError::Format(_))
        ));
    }
}
