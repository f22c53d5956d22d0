//! Geometry collection flattening and dataset-wide type homogeneity.

use std::collections::BTreeSet;

use geojson::{FeatureCollection, Geometry as GeoJsonGeometry, Value as GeoJsonValue};
use serde::Serialize;
use tracing::debug;

use crate::error::{IngestError, Result};

/// Layer geometry type. Lines and polygons do not distinguish single and
/// multi-part variants; points do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Point,
    Multipoint,
    Polyline,
    Polygon,
}

impl GeometryKind {
    fn of(value: &GeoJsonValue) -> Option<Self> {
        match value {
            GeoJsonValue::Point(_) => Some(GeometryKind::Point),
            GeoJsonValue::MultiPoint(_) => Some(GeometryKind::Multipoint),
            GeoJsonValue::LineString(_) | GeoJsonValue::MultiLineString(_) => {
                Some(GeometryKind::Polyline)
            }
            GeoJsonValue::Polygon(_) | GeoJsonValue::MultiPolygon(_) => {
                Some(GeometryKind::Polygon)
            }
            GeoJsonValue::GeometryCollection(_) => None,
        }
    }
}

/// Flattens geometry collections in place and returns the single geometry
/// kind shared by every feature.
pub fn normalize_geometries(fc: &mut FeatureCollection) -> Result<GeometryKind> {
    if fc.features.is_empty() {
        return Err(IngestError::EmptyData);
    }
    let mut flattened = 0usize;

    for feature in &mut fc.features {
        let geometry = feature
            .geometry
            .as_mut()
            .ok_or_else(|| IngestError::geometry("missing geometry"))?;

        if let GeoJsonValue::GeometryCollection(members) = &mut geometry.value {
            let members = std::mem::take(members);
            geometry.value = flatten_collection(members)?;
            flattened += 1;
        }
    }

    let kinds: BTreeSet<GeometryKind> = fc
        .features
        .iter()
        .filter_map(|f| f.geometry.as_ref())
        .filter_map(|g| GeometryKind::of(&g.value))
        .collect();

    if kinds.len() != 1 {
        return Err(IngestError::geometry(format!(
            "inconsistent types: collection contains {:?}",
            kinds
        )));
    }
    let kind = kinds.into_iter().next().ok_or(IngestError::EmptyData)?;

    debug!(flattened, ?kind, "normalized geometries");
    Ok(kind)
}

/// Turns collection members into one primitive, or one multi-part primitive
/// when there are several.
fn flatten_collection(members: Vec<GeoJsonGeometry>) -> Result<GeoJsonValue> {
    let first = members
        .first()
        .ok_or_else(|| IngestError::geometry("empty collection"))?;
    let first_type = type_tag(&first.value);

    if members.iter().any(|g| type_tag(&g.value) != first_type) {
        return Err(IngestError::geometry("mixed collection"));
    }
    if first_type == "GeometryCollection" {
        return Err(IngestError::geometry("nested collection"));
    }

    let single = members.len() == 1;
    let mut values = members.into_iter().map(|g| g.value);
    if single {
        return values
            .next()
            .ok_or_else(|| IngestError::geometry("empty collection"));
    }

    match first_type {
        "Point" => Ok(GeoJsonValue::MultiPoint(
            values
                .filter_map(|v| match v {
                    GeoJsonValue::Point(p) => Some(p),
                    _ => None,
                })
                .collect(),
        )),
        "LineString" => Ok(GeoJsonValue::MultiLineString(
            values
                .filter_map(|v| match v {
                    GeoJsonValue::LineString(l) => Some(l),
                    _ => None,
                })
                .collect(),
        )),
        "Polygon" => Ok(GeoJsonValue::MultiPolygon(
            values
                .filter_map(|v| match v {
                    GeoJsonValue::Polygon(p) => Some(p),
                    _ => None,
                })
                .collect(),
        )),
        // multi-part members extend the same multi-part type
        "MultiPoint" => Ok(GeoJsonValue::MultiPoint(
            values
                .filter_map(|v| match v {
                    GeoJsonValue::MultiPoint(p) => Some(p),
                    _ => None,
                })
                .flatten()
                .collect(),
        )),
        "MultiLineString" => Ok(GeoJsonValue::MultiLineString(
            values
                .filter_map(|v| match v {
                    GeoJsonValue::MultiLineString(l) => Some(l),
                    _ => None,
                })
                .flatten()
                .collect(),
        )),
        "MultiPolygon" => Ok(GeoJsonValue::MultiPolygon(
            values
                .filter_map(|v| match v {
                    GeoJsonValue::MultiPolygon(p) => Some(p),
                    _ => None,
                })
                .flatten()
                .collect(),
        )),
        _ => Err(IngestError::geometry("nested collection")),
    }
}

fn type_tag(value: &GeoJsonValue) -> &'static str {
    match value {
        GeoJsonValue::Point(_) => "Point",
        GeoJsonValue::MultiPoint(_) => "MultiPoint",
        GeoJsonValue::LineString(_) => "LineString",
        GeoJsonValue::MultiLineString(_) => "MultiLineString",
        GeoJsonValue::Polygon(_) => "Polygon",
        GeoJsonValue::MultiPolygon(_) => "MultiPolygon",
        GeoJsonValue::GeometryCollection(_) => "GeometryCollection",
    }
}
