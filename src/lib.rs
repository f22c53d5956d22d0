//! Ingests user-supplied GeoJSON, delimited text and shapefile archives and
//! turns them into a normalized, strongly typed feature layer config.
//!
//! ```no_run
//! use geo_ingest::{process_file, InputFormat, IngestOptions, SpatialReference};
//! use std::path::Path;
//!
//! # async fn run() -> geo_ingest::Result<()> {
//! let options = IngestOptions::new(SpatialReference::from_wkid(102100));
//! let layer = process_file(Path::new("rivers.geojson"), InputFormat::GeoJson, &options).await?;
//! println!("{} features", layer.source.len());
//! # Ok(())
//! # }
//! ```

use std::path::Path;

pub mod decode;
pub mod error;
pub mod esri;
pub mod fields;
pub mod ids;
pub mod normalize;
pub mod options;
pub mod pipeline;
pub mod projection;
pub mod renderer;

pub use decode::{ArchiveDecoder, InputFormat, RawInput};
pub use error::{IngestError, Result};
pub use fields::{FieldDescriptor, FieldType};
pub use normalize::GeometryKind;
pub use options::{DelimitedOptions, FieldMetadata, IngestOptions};
pub use pipeline::{Ingestor, TargetLayerConfig};
pub use projection::{BuiltinProjections, ProjectionEngine, SpatialReference};
pub use renderer::Colour;

#[cfg(feature = "proj")]
pub use projection::ProjEngine;

/// Reads a file from disk and ingests it with the default engine.
pub async fn process_file(
    path: &Path,
    format: InputFormat,
    options: &IngestOptions,
) -> Result<TargetLayerConfig> {
    let input = decode::read_input(path, format).await?;
    default_ingestor().ingest(&input, options).await
}

/// PROJ-backed when the `proj` feature is enabled, built-in otherwise.
pub fn default_ingestor() -> Ingestor {
    #[cfg(feature = "proj")]
    {
        Ingestor::new(std::sync::Arc::new(ProjEngine))
    }
    #[cfg(not(feature = "proj"))]
    {
        Ingestor::default()
    }
}
