//! Default symbology.
//!
//! The registry holds one read-only template per geometry family. Lookups
//! always hand out a deep copy, so recolouring a layer can never leak into
//! another layer's styling.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

use crate::error::{IngestError, Result};
use crate::normalize::GeometryKind;

/// RGBA colour with a fractional alpha.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ColourInput", into = "[f64; 4]")]
pub struct Colour {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    /// 0.0 (transparent) to 1.0 (opaque)
    pub a: f64,
}

impl Colour {
    pub fn rgba(r: u8, g: u8, b: u8, a: f64) -> Self {
        Self {
            r,
            g,
            b,
            a: a.clamp(0.0, 1.0),
        }
    }

    /// Server symbol colour: alpha scaled to 0..=255.
    pub fn to_arc_server(self) -> [u8; 4] {
        [self.r, self.g, self.b, (self.a * 255.0).round() as u8]
    }
}

impl From<Colour> for [f64; 4] {
    fn from(c: Colour) -> Self {
        [c.r as f64, c.g as f64, c.b as f64, c.a]
    }
}

impl FromStr for Colour {
    type Err = IngestError;

    /// Parses `#RRGGBB` or `#RRGGBBAA`.
    fn from_str(s: &str) -> Result<Self> {
        let hex = s.trim().trim_start_matches('#');
        let channel = |i: usize| {
            hex.get(i..i + 2)
                .and_then(|h| u8::from_str_radix(h, 16).ok())
                .ok_or_else(|| IngestError::config(format!("invalid colour '{}'", s)))
        };
        match hex.len() {
            6 => Ok(Self::rgba(channel(0)?, channel(2)?, channel(4)?, 1.0)),
            8 => Ok(Self::rgba(
                channel(0)?,
                channel(2)?,
                channel(4)?,
                channel(6)? as f64 / 255.0,
            )),
            _ => Err(IngestError::config(format!("invalid colour '{}'", s))),
        }
    }
}

impl fmt::Display for Colour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.to_arc_server();
        write!(f, "#{:02x}{:02x}{:02x}{:02x}", r, g, b, a)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColourInput {
    Channels(Vec<f64>),
    Hex(String),
}

impl TryFrom<ColourInput> for Colour {
    type Error = String;

    fn try_from(input: ColourInput) -> std::result::Result<Self, Self::Error> {
        match input {
            ColourInput::Hex(hex) => hex.parse::<Colour>().map_err(|e| format!("{}", e)),
            ColourInput::Channels(c) if c.len() == 3 || c.len() == 4 => {
                let channel = |v: f64| v.clamp(0.0, 255.0).round() as u8;
                Ok(Self::rgba(
                    channel(c[0]),
                    channel(c[1]),
                    channel(c[2]),
                    c.get(3).copied().unwrap_or(1.0),
                ))
            }
            ColourInput::Channels(c) => Err(format!(
                "colour needs 3 or 4 channels, got {}",
                c.len()
            )),
        }
    }
}

/// Outline of a marker or fill symbol.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outline {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub style: &'static str,
    pub color: [u8; 4],
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Symbol {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub style: &'static str,
    pub color: [u8; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outline: Option<Outline>,
}

/// Single-symbol renderer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimpleRenderer {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub symbol: Symbol,
}

/// Named default templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Template {
    CirclePoint,
    SolidLine,
    OutlinedPoly,
}

impl Template {
    pub fn for_geometry(kind: GeometryKind) -> Self {
        match kind {
            GeometryKind::Point | GeometryKind::Multipoint => Template::CirclePoint,
            GeometryKind::Polyline => Template::SolidLine,
            GeometryKind::Polygon => Template::OutlinedPoly,
        }
    }
}

struct Registry {
    circle_point: SimpleRenderer,
    solid_line: SimpleRenderer,
    outlined_poly: SimpleRenderer,
}

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Registry {
        circle_point: SimpleRenderer {
            kind: "simple",
            symbol: Symbol {
                kind: "esriSMS",
                style: "esriSMSCircle",
                color: [67, 100, 255, 200],
                size: Some(7.0),
                width: None,
                outline: Some(Outline {
                    kind: "esriSLS",
                    style: "esriSLSSolid",
                    color: [0, 0, 0, 255],
                    width: 1.0,
                }),
            },
        },
        solid_line: SimpleRenderer {
            kind: "simple",
            symbol: Symbol {
                kind: "esriSLS",
                style: "esriSLSSolid",
                color: [90, 90, 90, 200],
                size: None,
                width: Some(2.0),
                outline: None,
            },
        },
        outlined_poly: SimpleRenderer {
            kind: "simple",
            symbol: Symbol {
                kind: "esriSFS",
                style: "esriSFSSolid",
                color: [76, 76, 125, 200],
                size: None,
                width: None,
                outline: Some(Outline {
                    kind: "esriSLS",
                    style: "esriSLSSolid",
                    color: [110, 110, 110, 255],
                    width: 1.0,
                }),
            },
        },
    })
}

/// Returns a private copy of the named default template.
pub fn default_renderer(template: Template) -> SimpleRenderer {
    let registry = registry();
    match template {
        Template::CirclePoint => registry.circle_point.clone(),
        Template::SolidLine => registry.solid_line.clone(),
        Template::OutlinedPoly => registry.outlined_poly.clone(),
    }
}

/// Picks the template for the geometry kind and applies the colour override.
pub fn select_renderer(kind: GeometryKind, colour: Option<Colour>) -> SimpleRenderer {
    let mut renderer = default_renderer(Template::for_geometry(kind));
    if let Some(colour) = colour {
        renderer.symbol.color = colour.to_arc_server();
    }
    renderer
}
