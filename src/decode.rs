//! Input formats and their translation into a GeoJSON document.
//!
//! Format dispatch happens here, before the pipeline starts; the pipeline
//! itself only ever sees a [`GeoJson`] value.

use std::path::Path;
use std::sync::Arc;

use geojson::{Feature, FeatureCollection, GeoJson, Geometry, JsonObject, JsonValue, Value};
use tracing::debug;

use crate::error::{IngestError, Result};
use crate::options::DelimitedOptions;

/// Supported input formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputFormat {
    GeoJson,
    Delimited(DelimitedOptions),
    ShapefileArchive,
}

/// Raw file contents tagged with their format.
#[derive(Debug, Clone)]
pub struct RawInput {
    pub format: InputFormat,
    pub bytes: Vec<u8>,
}

impl RawInput {
    pub fn new(format: InputFormat, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            format,
            bytes: bytes.into(),
        }
    }
}

/// Translates zipped shapefile archives. No implementation ships with this
/// crate; callers plug one in.
pub trait ArchiveDecoder: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<GeoJson>;
}

/// Reads a file from disk.
pub async fn read_input(path: &Path, format: InputFormat) -> Result<RawInput> {
    let bytes = tokio::fs::read(path).await?;
    debug!(path = %path.display(), bytes = bytes.len(), "read input file");
    Ok(RawInput::new(format, bytes))
}

/// Dispatches on the input format.
pub fn decode(input: &RawInput, archive: Option<&Arc<dyn ArchiveDecoder>>) -> Result<GeoJson> {
    match &input.format {
        InputFormat::GeoJson => decode_geojson(&input.bytes),
        InputFormat::Delimited(opts) => {
            let text = utf8(&input.bytes)?;
            decode_delimited(text, opts).map(GeoJson::FeatureCollection)
        }
        InputFormat::ShapefileArchive => archive
            .ok_or_else(|| IngestError::decode("no decoder configured for shapefile archives"))?
            .decode(&input.bytes),
    }
}

fn utf8(bytes: &[u8]) -> Result<&str> {
    std::str::from_utf8(bytes).map_err(|e| IngestError::decode(format!("input is not UTF-8: {}", e)))
}

pub fn decode_geojson(bytes: &[u8]) -> Result<GeoJson> {
    utf8(bytes)?
        .parse::<GeoJson>()
        .map_err(|e| IngestError::decode(format!("invalid GeoJSON: {}", e)))
}

/// Header-first reader with every cell trimmed.
pub(crate) fn delimited_reader(text: &str, delimiter: u8) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes())
}

/// Builds point features from delimited text.
///
/// Columns other than the coordinate columns become string attributes; the
/// longitude and latitude are then added back as numeric attributes under
/// their own column names.
pub fn decode_delimited(text: &str, opts: &DelimitedOptions) -> Result<FeatureCollection> {
    let mut reader = delimited_reader(text, opts.delimiter_byte()?);

    let headers = reader
        .headers()
        .map_err(|e| IngestError::decode(format!("unreadable header row: {}", e)))?
        .clone();

    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| IngestError::decode(format!("column '{}' not found", name)))
    };
    let lat_idx = column(&opts.lat_field)?;
    let lon_idx = column(&opts.lon_field)?;

    let mut features = Vec::new();
    for (row, record) in reader.records().enumerate() {
        // header is line 1
        let line = row + 2;
        let record =
            record.map_err(|e| IngestError::decode(format!("line {}: {}", line, e)))?;

        let lat = coordinate(record.get(lat_idx), &opts.lat_field, line)?;
        let lon = coordinate(record.get(lon_idx), &opts.lon_field, line)?;

        let mut properties: JsonObject = headers
            .iter()
            .zip(record.iter())
            .enumerate()
            .filter(|(idx, _)| *idx != lat_idx && *idx != lon_idx)
            .map(|(_, (h, v))| (h.to_string(), JsonValue::String(v.to_string())))
            .collect();
        properties.insert(opts.lon_field.clone(), number(lon));
        properties.insert(opts.lat_field.clone(), number(lat));

        features.push(Feature {
            bbox: None,
            geometry: Some(Geometry::new(Value::Point(vec![lon, lat]))),
            id: None,
            properties: Some(properties),
            foreign_members: None,
        });
    }

    debug!(rows = features.len(), "decoded delimited text");
    Ok(FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    })
}

fn coordinate(raw: Option<&str>, field: &str, line: usize) -> Result<f64> {
    let raw = raw.unwrap_or_default();
    raw.parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| IngestError::decode(format!("line {}: invalid {} value '{}'", line, field, raw)))
}

fn number(v: f64) -> JsonValue {
    serde_json::Number::from_f64(v)
        .map(JsonValue::Number)
        .unwrap_or(JsonValue::Null)
}
