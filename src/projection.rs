//! Spatial references and coordinate reprojection.
//!
//! The coordinator resolves the source system (caller override, then the
//! collection's named CRS, then WGS84), verifies that both source and target
//! definitions resolve before touching any coordinate, and transforms the
//! whole collection on a blocking worker.
//!
//! Two engines are provided:
//! - [`BuiltinProjections`]: geographic WGS84 and Web Mercator, no native deps
//! - `ProjEngine` (feature `proj`): any system PROJ can resolve

use std::collections::HashSet;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use geojson::{FeatureCollection, Value as GeoJsonValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{IngestError, Result};

/// GeoJSON without a named CRS is WGS84.
pub const DEFAULT_SOURCE: &str = "EPSG:4326";

const WEB_MERCATOR: &str = "EPSG:3857";
const EARTH_RADIUS: f64 = 6_378_137.0;
const MAX_MERCATOR_LAT: f64 = 85.051_128_779_806_59;

/// Wkids that are all Web Mercator under another name.
const WEB_MERCATOR_ALIASES: [u32; 4] = [102100, 102113, 900913, 3785];

/// Spatial reference as carried by layer configs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "SpatialReferenceInput")]
pub struct SpatialReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wkid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_wkid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wkt: Option<String>,
}

impl SpatialReference {
    pub fn from_wkid(wkid: u32) -> Self {
        let latest_wkid = WEB_MERCATOR_ALIASES.contains(&wkid).then_some(3857);
        Self {
            wkid: Some(wkid),
            latest_wkid,
            wkt: None,
        }
    }

    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkid: None,
            latest_wkid: None,
            wkt: Some(wkt.into()),
        }
    }

    /// Definition key handed to the projection engine.
    pub fn projection_code(&self) -> Result<String> {
        if let Some(wkid) = self.latest_wkid.or(self.wkid) {
            return Ok(normalize_code(&format!("EPSG:{}", wkid)));
        }
        self.wkt
            .clone()
            .ok_or_else(|| IngestError::config("spatial reference has neither wkid nor wkt"))
    }
}

impl FromStr for SpatialReference {
    type Err = IngestError;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IngestError::config("empty spatial reference"));
        }
        let code = normalize_code(s);
        if let Some(wkid) = code.strip_prefix("EPSG:") {
            if let Ok(wkid) = wkid.parse::<u32>() {
                // keep the alias the caller asked for as the wkid
                let asked = s
                    .rsplit(':')
                    .next()
                    .and_then(|n| n.parse::<u32>().ok())
                    .unwrap_or(wkid);
                return Ok(Self::from_wkid(asked));
            }
        }
        if let Ok(wkid) = s.parse::<u32>() {
            return Ok(Self::from_wkid(wkid));
        }
        Ok(Self::from_wkt(s))
    }
}

impl fmt::Display for SpatialReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.wkid, &self.wkt) {
            (Some(wkid), _) => write!(f, "wkid {}", wkid),
            (None, Some(_)) => write!(f, "wkt"),
            (None, None) => write!(f, "undefined"),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SpatialReferenceInput {
    Wkid(u32),
    Text(String),
    #[serde(rename_all = "camelCase")]
    Object {
        wkid: Option<u32>,
        latest_wkid: Option<u32>,
        wkt: Option<String>,
    },
}

impl TryFrom<SpatialReferenceInput> for SpatialReference {
    type Error = String;

    fn try_from(input: SpatialReferenceInput) -> std::result::Result<Self, Self::Error> {
        match input {
            SpatialReferenceInput::Wkid(wkid) => Ok(Self::from_wkid(wkid)),
            SpatialReferenceInput::Text(text) => text
                .parse::<SpatialReference>()
                .map_err(|e| format!("{}", e)),
            SpatialReferenceInput::Object {
                wkid,
                latest_wkid,
                wkt,
            } => {
                if wkid.is_none() && wkt.is_none() {
                    return Err("spatial reference needs a wkid or wkt".to_string());
                }
                let latest_wkid = latest_wkid.or_else(|| wkid.and_then(|w| Self::from_wkid(w).latest_wkid));
                Ok(Self {
                    wkid,
                    latest_wkid,
                    wkt,
                })
            }
        }
    }
}

/// Normalizes CRS names to `EPSG:<code>` where possible.
///
/// Handles OGC URNs (`urn:ogc:def:crs:EPSG::3857`), CRS84 and the Esri Web
/// Mercator aliases. Anything else is returned trimmed but otherwise as-is.
pub fn normalize_code(name: &str) -> String {
    let name = name.trim();
    let upper = name.to_ascii_uppercase();

    if upper.ends_with("CRS84") {
        return DEFAULT_SOURCE.to_string();
    }

    let epsg = if upper.starts_with("URN:OGC:DEF:CRS:EPSG:") {
        upper.rsplit(':').next().and_then(|n| n.parse::<u32>().ok())
    } else if let Some(rest) = upper.strip_prefix("EPSG:") {
        rest.parse::<u32>().ok()
    } else {
        None
    };

    match epsg {
        Some(code) if WEB_MERCATOR_ALIASES.contains(&code) => WEB_MERCATOR.to_string(),
        Some(code) => format!("EPSG:{}", code),
        None => name.to_string(),
    }
}

/// Picks the source system: caller override, then the collection's named
/// CRS, then WGS84.
pub fn resolve_source(override_code: Option<&str>, fc: &FeatureCollection) -> String {
    if let Some(code) = override_code.filter(|c| !c.trim().is_empty()) {
        return normalize_code(code);
    }
    embedded_crs(fc)
        .map(|name| normalize_code(&name))
        .unwrap_or_else(|| DEFAULT_SOURCE.to_string())
}

fn embedded_crs(fc: &FeatureCollection) -> Option<String> {
    let crs = fc.foreign_members.as_ref()?.get("crs")?;
    if crs.get("type")?.as_str()? != "name" {
        return None;
    }
    crs.get("properties")?
        .get("name")?
        .as_str()
        .map(str::to_string)
}

/// Position transform produced by an engine for one source/target pair.
pub type Transform = Box<dyn FnMut(f64, f64) -> Result<(f64, f64)>>;

/// Pluggable reprojection backend.
pub trait ProjectionEngine: Send + Sync {
    /// Verifies that a definition for `code` is available.
    fn resolve(&self, code: &str) -> Result<()>;

    /// Builds the transform from `from` to `to`.
    fn transform(&self, from: &str, to: &str) -> Result<Transform>;
}

/// WGS84 geographic and spherical Web Mercator.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinProjections;

impl BuiltinProjections {
    fn known(code: &str) -> bool {
        code == DEFAULT_SOURCE || code == WEB_MERCATOR
    }
}

impl ProjectionEngine for BuiltinProjections {
    fn resolve(&self, code: &str) -> Result<()> {
        if Self::known(code) {
            Ok(())
        } else {
            Err(IngestError::projection(format!(
                "no projection definition for '{}'",
                code
            )))
        }
    }

    fn transform(&self, from: &str, to: &str) -> Result<Transform> {
        self.resolve(from)?;
        self.resolve(to)?;
        match (from, to) {
            (a, b) if a == b => Ok(Box::new(identity)),
            (DEFAULT_SOURCE, WEB_MERCATOR) => Ok(Box::new(to_web_mercator)),
            (WEB_MERCATOR, DEFAULT_SOURCE) => Ok(Box::new(from_web_mercator)),
            _ => Err(IngestError::projection(format!(
                "no transform from '{}' to '{}'",
                from, to
            ))),
        }
    }
}

fn identity(x: f64, y: f64) -> Result<(f64, f64)> {
    Ok((x, y))
}

fn to_web_mercator(lon: f64, lat: f64) -> Result<(f64, f64)> {
    let lat = lat.clamp(-MAX_MERCATOR_LAT, MAX_MERCATOR_LAT);
    let x = EARTH_RADIUS * lon.to_radians();
    let y = EARTH_RADIUS * (PI / 4.0 + lat.to_radians() / 2.0).tan().ln();
    Ok((x, y))
}

fn from_web_mercator(x: f64, y: f64) -> Result<(f64, f64)> {
    let lon = (x / EARTH_RADIUS).to_degrees();
    let lat = (2.0 * (y / EARTH_RADIUS).exp().atan() - PI / 2.0).to_degrees();
    Ok((lon, lat))
}

/// PROJ-backed engine.
#[cfg(feature = "proj")]
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjEngine;

#[cfg(feature = "proj")]
impl ProjectionEngine for ProjEngine {
    fn resolve(&self, code: &str) -> Result<()> {
        proj::Proj::new(code)
            .map(|_| ())
            .map_err(|e| IngestError::projection(format!("cannot resolve '{}': {}", code, e)))
    }

    fn transform(&self, from: &str, to: &str) -> Result<Transform> {
        let proj = proj::Proj::new_known_crs(from, to, None).map_err(|e| {
            IngestError::projection(format!("cannot transform '{}' to '{}': {}", from, to, e))
        })?;
        Ok(Box::new(move |x: f64, y: f64| -> Result<(f64, f64)> {
            proj.convert((x, y))
                .map_err(|e| IngestError::projection(format!("transform failed: {}", e)))
        }))
    }
}

/// Reprojection coordinator with a shared cache of verified definitions.
pub struct Reprojector {
    engine: Arc<dyn ProjectionEngine>,
    resolved: RwLock<HashSet<String>>,
}

impl Reprojector {
    pub fn new(engine: Arc<dyn ProjectionEngine>) -> Self {
        Self {
            engine,
            resolved: RwLock::new(HashSet::new()),
        }
    }

    /// Fails on the first code that cannot be resolved.
    pub fn check_definitions(&self, codes: &[&str]) -> Result<()> {
        for code in codes {
            let cached = self
                .resolved
                .read()
                .map(|set| set.contains(*code))
                .unwrap_or(false);
            if cached {
                continue;
            }
            self.engine.resolve(code)?;
            if let Ok(mut set) = self.resolved.write() {
                set.insert(code.to_string());
            }
            debug!(code, "resolved projection definition");
        }
        Ok(())
    }

    /// Transforms every geometry of the collection from `from` to `to`.
    ///
    /// Either the whole collection is returned transformed or an error is.
    pub async fn project(
        &self,
        mut fc: FeatureCollection,
        from: &str,
        to: &str,
    ) -> Result<FeatureCollection> {
        self.check_definitions(&[from, to])?;
        if from == to {
            debug!(code = from, "source and target match, skipping transform");
            return Ok(fc);
        }

        let engine = Arc::clone(&self.engine);
        let (from, to) = (from.to_string(), to.to_string());
        let features = fc.features.len();

        let fc = tokio::task::spawn_blocking(move || -> Result<FeatureCollection> {
            let mut transform = engine.transform(&from, &to)?;
            project_collection(&mut fc, &mut transform)?;
            info!(features, from = %from, to = %to, "reprojected collection");
            Ok(fc)
        })
        .await
        .map_err(|e| IngestError::projection(format!("reprojection task failed: {}", e)))??;

        Ok(fc)
    }
}

fn project_collection(fc: &mut FeatureCollection, transform: &mut Transform) -> Result<()> {
    fc.bbox = None;
    for feature in &mut fc.features {
        feature.bbox = None;
        if let Some(geometry) = feature.geometry.as_mut() {
            geometry.bbox = None;
            project_value(&mut geometry.value, transform)?;
        }
    }
    Ok(())
}

fn project_value(value: &mut GeoJsonValue, transform: &mut Transform) -> Result<()> {
    match value {
        GeoJsonValue::Point(p) => project_position(p, transform),
        GeoJsonValue::MultiPoint(ps) | GeoJsonValue::LineString(ps) => {
            ps.iter_mut().try_for_each(|p| project_position(p, transform))
        }
        GeoJsonValue::MultiLineString(lines) | GeoJsonValue::Polygon(lines) => lines
            .iter_mut()
            .flatten()
            .try_for_each(|p| project_position(p, transform)),
        GeoJsonValue::MultiPolygon(polys) => polys
            .iter_mut()
            .flatten()
            .flatten()
            .try_for_each(|p| project_position(p, transform)),
        GeoJsonValue::GeometryCollection(members) => members
            .iter_mut()
            .try_for_each(|g| project_value(&mut g.value, transform)),
    }
}

fn project_position(position: &mut [f64], transform: &mut Transform) -> Result<()> {
    if position.len() < 2 {
        return Err(IngestError::geometry("position with fewer than two ordinates"));
    }
    let (x, y) = transform(position[0], position[1])?;
    position[0] = x;
    position[1] = y;
    Ok(())
}
