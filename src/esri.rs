//! Projected feature records in the shape the layer renderer consumes.

use geo::algorithm::winding_order::Winding;
use geo::{Coord, LineString};
use geojson::feature::Id;
use geojson::{Feature, JsonObject, JsonValue, Value as GeoJsonValue};
use serde::Serialize;

use crate::error::{IngestError, Result};
use crate::ids::OBJECTID;
use crate::normalize::GeometryKind;
use crate::projection::SpatialReference;

/// Placeholder for attribute values the layer cannot store.
pub const COMPLEX_VALUE_SENTINEL: &str = "[Complex Value Removed]";

type Position = Vec<f64>;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum EsriGeometry {
    Point {
        x: f64,
        y: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        z: Option<f64>,
    },
    Multipoint {
        points: Vec<Position>,
    },
    Polyline {
        paths: Vec<Vec<Position>>,
    },
    Polygon {
        rings: Vec<Vec<Position>>,
    },
}

/// Geometry plus the layer-level tags the renderer expects on each record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphicGeometry {
    #[serde(flatten)]
    pub shape: EsriGeometry,
    #[serde(rename = "type")]
    pub kind: GeometryKind,
    pub spatial_reference: SpatialReference,
}

/// One output record.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProjectedGraphic {
    pub geometry: GraphicGeometry,
    pub attributes: JsonObject,
}

/// Converts one projected feature. The feature id is written to `OBJECTID`.
pub fn to_graphic(
    feature: Feature,
    kind: GeometryKind,
    spatial_reference: &SpatialReference,
) -> Result<ProjectedGraphic> {
    let geometry = feature
        .geometry
        .ok_or_else(|| IngestError::geometry("missing geometry"))?;

    let mut attributes = feature.properties.unwrap_or_default();
    if let Some(id) = feature.id {
        let id = match id {
            Id::Number(n) => JsonValue::Number(n),
            Id::String(s) => JsonValue::String(s),
        };
        attributes.insert(OBJECTID.to_string(), id);
    }

    Ok(ProjectedGraphic {
        geometry: GraphicGeometry {
            shape: convert_geometry(geometry.value)?,
            kind,
            spatial_reference: spatial_reference.clone(),
        },
        attributes,
    })
}

fn convert_geometry(value: GeoJsonValue) -> Result<EsriGeometry> {
    match value {
        GeoJsonValue::Point(p) => {
            if p.len() < 2 {
                return Err(IngestError::geometry("point with fewer than two ordinates"));
            }
            Ok(EsriGeometry::Point {
                x: p[0],
                y: p[1],
                z: p.get(2).copied(),
            })
        }
        GeoJsonValue::MultiPoint(points) => Ok(EsriGeometry::Multipoint { points }),
        GeoJsonValue::LineString(line) => Ok(EsriGeometry::Polyline { paths: vec![line] }),
        GeoJsonValue::MultiLineString(paths) => Ok(EsriGeometry::Polyline { paths }),
        GeoJsonValue::Polygon(rings) => Ok(EsriGeometry::Polygon {
            rings: orient_rings(rings),
        }),
        GeoJsonValue::MultiPolygon(polygons) => Ok(EsriGeometry::Polygon {
            rings: polygons.into_iter().flat_map(orient_rings).collect(),
        }),
        GeoJsonValue::GeometryCollection(_) => {
            Err(IngestError::geometry("geometry collection reached conversion"))
        }
    }
}

/// Outer ring clockwise, holes counter-clockwise.
fn orient_rings(rings: Vec<Vec<Position>>) -> Vec<Vec<Position>> {
    rings
        .into_iter()
        .enumerate()
        .map(|(idx, mut ring)| {
            let clockwise = ring_is_clockwise(&ring);
            if (idx == 0) != clockwise {
                ring.reverse();
            }
            ring
        })
        .collect()
}

fn ring_is_clockwise(ring: &[Position]) -> bool {
    let line: LineString<f64> = ring
        .iter()
        .filter(|p| p.len() >= 2)
        .map(|p| Coord { x: p[0], y: p[1] })
        .collect();
    line.is_cw()
}

/// Replaces array and object attribute values with the sentinel string.
/// Returns the number of values replaced.
pub fn sanitize_attributes(attributes: &mut JsonObject) -> usize {
    let mut replaced = 0;
    for value in attributes.values_mut() {
        if value.is_array() || value.is_object() {
            *value = JsonValue::String(COMPLEX_VALUE_SENTINEL.to_string());
            replaced += 1;
        }
    }
    replaced
}
