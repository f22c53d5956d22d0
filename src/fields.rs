//! Field schema derivation and field name clean-up.

use std::collections::{HashMap, HashSet};

use geojson::{FeatureCollection, JsonObject, JsonValue};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{IngestError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Oid,
    Double,
    String,
}

/// One column of the layer schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

impl FieldDescriptor {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            alias: None,
            field_type,
        }
    }

    /// True when `name` matches either the field name or its display alias.
    pub fn answers_to(&self, name: &str) -> bool {
        self.name == name || self.alias.as_deref() == Some(name)
    }
}

/// Numbers are typed as doubles; everything else, numeric-looking strings
/// included, is a string.
pub fn infer_type(value: &JsonValue) -> FieldType {
    match value {
        JsonValue::Number(_) => FieldType::Double,
        _ => FieldType::String,
    }
}

/// Derives the field schema. Field order is the attribute order of the first
/// feature, followed by keys that only show up in later features in the
/// order they are first seen. Each field takes its type from the first
/// non-null value found for it; fields that never have one are strings.
pub fn infer_fields(fc: &FeatureCollection) -> Result<Vec<FieldDescriptor>> {
    let first = fc.features.first().ok_or(IngestError::EmptyData)?;

    let mut names: Vec<String> = first
        .properties
        .as_ref()
        .map(|props| props.keys().cloned().collect())
        .unwrap_or_default();
    let seeded = names.len();
    let mut resolved: Vec<Option<FieldType>> = vec![None; names.len()];
    let mut index: HashMap<String, usize> = names
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.clone(), idx))
        .collect();

    for props in fc.features.iter().filter_map(|f| f.properties.as_ref()) {
        for (key, value) in props {
            let idx = match index.get(key) {
                Some(&idx) => idx,
                None => {
                    names.push(key.clone());
                    resolved.push(None);
                    index.insert(key.clone(), names.len() - 1);
                    names.len() - 1
                }
            };
            if resolved[idx].is_none() && !value.is_null() {
                resolved[idx] = Some(infer_type(value));
            }
        }
    }

    debug!(
        fields = names.len(),
        late_fields = names.len() - seeded,
        unresolved = resolved.iter().filter(|t| t.is_none()).count(),
        "inferred field types"
    );

    Ok(names
        .into_iter()
        .zip(resolved)
        .map(|(name, ty)| FieldDescriptor::new(name, ty.unwrap_or(FieldType::String)))
        .collect())
}

fn is_invalid_name(name: &str) -> bool {
    name.contains(' ')
}

/// Rewrites invalid field names to unique identifiers, keeping the original
/// as the alias, and renames the matching attribute on every feature.
///
/// A candidate must not clash with any field or with any attribute key on
/// any record, including attributes of fields left out of the schema.
pub fn sanitize_field_names(fc: &mut FeatureCollection, fields: &mut [FieldDescriptor]) {
    let mut taken: HashSet<String> = fields.iter().map(|f| f.name.clone()).collect();
    for props in fc.features.iter().filter_map(|f| f.properties.as_ref()) {
        taken.extend(props.keys().cloned());
    }

    for idx in 0..fields.len() {
        if !is_invalid_name(&fields[idx].name) {
            continue;
        }

        let original = fields[idx].name.clone();
        let mut candidate = original.replace(' ', "_");
        while taken.contains(&candidate) {
            candidate.push('_');
        }
        taken.remove(&original);
        taken.insert(candidate.clone());

        for feature in &mut fc.features {
            if let Some(props) = feature.properties.as_mut() {
                rename_key(props, &original, &candidate);
            }
        }

        debug!(from = %original, to = %candidate, "renamed field");
        fields[idx].alias = Some(original);
        fields[idx].name = candidate;
    }
}

/// Renames `from` to `to` in place, keeping the attribute position.
fn rename_key(props: &mut JsonObject, from: &str, to: &str) {
    if !props.contains_key(from) {
        return;
    }
    *props = std::mem::take(props)
        .into_iter()
        .map(|(k, v)| if k == from { (to.to_string(), v) } else { (k, v) })
        .collect();
}

/// Keeps only fields present in the allow-list.
pub fn retain_listed(fields: &mut Vec<FieldDescriptor>, allowed: &[FieldDescriptor]) {
    fields.retain(|f| allowed.iter().any(|a| a.name == f.name));
}

/// Forces the named coordinate columns to DOUBLE, matching by name or alias.
pub fn promote_coordinate_fields(fields: &mut [FieldDescriptor], coordinate_fields: &[&str]) {
    for field in fields.iter_mut() {
        if coordinate_fields.iter().any(|c| field.answers_to(c)) {
            field.field_type = FieldType::Double;
        }
    }
}

/// Reads the header row of delimited text. All columns are strings; no
/// guessing is done on the values.
pub fn delimited_fields(text: &str, delimiter: u8) -> Result<Vec<FieldDescriptor>> {
    let mut reader = crate::decode::delimited_reader(text, delimiter);

    let headers = reader
        .headers()
        .map_err(|e| IngestError::decode(format!("unreadable header row: {}", e)))?;

    Ok(headers
        .iter()
        .map(|h| FieldDescriptor::new(h, FieldType::String))
        .collect())
}
