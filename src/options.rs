//! Caller-facing options.
//!
//! Keys follow the camelCase layer-config convention so an options object can
//! be read straight from JSON.

use serde::Deserialize;

use crate::error::{IngestError, Result};
use crate::fields::FieldDescriptor;
use crate::projection::SpatialReference;
use crate::renderer::Colour;

/// Options for one ingestion call.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestOptions {
    /// Overrides the collection's CRS.
    pub source_projection: Option<String>,
    /// Required.
    #[serde(rename = "targetSR")]
    pub target_sr: Option<SpatialReference>,
    /// Generated when absent.
    pub layer_id: Option<String>,
    pub colour: Option<Colour>,
    pub field_metadata: Option<FieldMetadata>,
}

impl IngestOptions {
    pub fn new(target_sr: SpatialReference) -> Self {
        Self {
            target_sr: Some(target_sr),
            ..Self::default()
        }
    }

    pub fn target(&self) -> Result<&SpatialReference> {
        self.target_sr
            .as_ref()
            .ok_or_else(|| IngestError::config("missing target spatial reference"))
    }

    /// Allow-list of fields, when `exclusiveFields` is set.
    pub fn field_allow_list(&self) -> Option<&[FieldDescriptor]> {
        self.field_metadata
            .as_ref()
            .filter(|m| m.exclusive_fields)
            .map(|m| m.field_info.as_slice())
    }
}

/// Field restrictions from the layer config.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FieldMetadata {
    pub exclusive_fields: bool,
    pub field_info: Vec<FieldDescriptor>,
}

/// Delimited-text layout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DelimitedOptions {
    pub lat_field: String,
    pub lon_field: String,
    pub delimiter: String,
}

impl Default for DelimitedOptions {
    fn default() -> Self {
        Self {
            lat_field: "Lat".to_string(),
            lon_field: "Long".to_string(),
            delimiter: ",".to_string(),
        }
    }
}

impl DelimitedOptions {
    /// The delimiter as the single byte the reader needs.
    pub fn delimiter_byte(&self) -> Result<u8> {
        match self.delimiter.as_bytes() {
            [b] => Ok(*b),
            _ => Err(IngestError::config(format!(
                "delimiter must be a single byte, got '{}'",
                self.delimiter
            ))),
        }
    }
}
