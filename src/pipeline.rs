//! Ingestion pipeline and layer config assembly.
//!
//! Stages run strictly in order for one call:
//!
//! ```text
//! decode -> assign ids -> normalize geometry -> infer fields
//!        -> sanitize names -> reproject -> convert + sanitize attributes
//!        -> select renderer -> assemble
//! ```
//!
//! Any stage failure aborts the call; no partial layer config is returned.

use std::sync::Arc;

use geojson::{FeatureCollection, GeoJson};
use serde::Serialize;
use tracing::{debug, info, Instrument};
use uuid::Uuid;

use crate::decode::{self, ArchiveDecoder, InputFormat, RawInput};
use crate::error::Result;
use crate::esri::{self, ProjectedGraphic};
use crate::fields::{self, FieldDescriptor, FieldType};
use crate::ids::{self, OBJECTID};
use crate::normalize::{self, GeometryKind};
use crate::options::IngestOptions;
use crate::projection::{self, BuiltinProjections, ProjectionEngine, Reprojector, SpatialReference};
use crate::renderer::{self, SimpleRenderer};

/// Finished layer configuration handed to the renderer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetLayerConfig {
    pub object_id_field: String,
    pub fields: Vec<FieldDescriptor>,
    pub geometry_type: GeometryKind,
    pub spatial_reference: SpatialReference,
    pub renderer: SimpleRenderer,
    pub source: Vec<ProjectedGraphic>,
    pub id: String,
}

/// Entry point for ingestion calls.
///
/// Cheap to clone; clones share the projection-definition cache.
#[derive(Clone)]
pub struct Ingestor {
    reprojector: Arc<Reprojector>,
    archive_decoder: Option<Arc<dyn ArchiveDecoder>>,
}

impl Default for Ingestor {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinProjections))
    }
}

impl Ingestor {
    pub fn new(engine: Arc<dyn ProjectionEngine>) -> Self {
        Self {
            reprojector: Arc::new(Reprojector::new(engine)),
            archive_decoder: None,
        }
    }

    pub fn with_archive_decoder(mut self, decoder: Arc<dyn ArchiveDecoder>) -> Self {
        self.archive_decoder = Some(decoder);
        self
    }

    /// Decodes raw input and runs the pipeline on it.
    pub async fn ingest(
        &self,
        input: &RawInput,
        options: &IngestOptions,
    ) -> Result<TargetLayerConfig> {
        options.target()?;
        let geojson = decode::decode(input, self.archive_decoder.as_ref())?;

        let coordinate_fields = match &input.format {
            InputFormat::Delimited(opts) => vec![opts.lat_field.clone(), opts.lon_field.clone()],
            _ => Vec::new(),
        };
        self.run(geojson, options, &coordinate_fields).await
    }

    /// Runs the pipeline on an already decoded GeoJSON document.
    pub async fn geojson_to_layer(
        &self,
        geojson: GeoJson,
        options: &IngestOptions,
    ) -> Result<TargetLayerConfig> {
        self.run(geojson, options, &[]).await
    }

    async fn run(
        &self,
        geojson: GeoJson,
        options: &IngestOptions,
        coordinate_fields: &[String],
    ) -> Result<TargetLayerConfig> {
        let layer_id = options
            .layer_id
            .clone()
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let span = tracing::info_span!("ingest", layer = %layer_id);

        self.run_stages(geojson, options, coordinate_fields, layer_id)
            .instrument(span)
            .await
    }

    async fn run_stages(
        &self,
        geojson: GeoJson,
        options: &IngestOptions,
        coordinate_fields: &[String],
        layer_id: String,
    ) -> Result<TargetLayerConfig> {
        let target_sr = options.target()?.clone();
        let target_code = target_sr.projection_code()?;

        let mut fc = ids::expect_collection(geojson)?;
        ids::assign_ids(&mut fc);

        let kind = normalize::normalize_geometries(&mut fc)?;

        let mut fields = fields::infer_fields(&fc)?;
        if let Some(allowed) = options.field_allow_list() {
            fields::retain_listed(&mut fields, allowed);
        }
        fields::sanitize_field_names(&mut fc, &mut fields);
        if !coordinate_fields.is_empty() {
            let names: Vec<&str> = coordinate_fields.iter().map(String::as_str).collect();
            fields::promote_coordinate_fields(&mut fields, &names);
        }

        let source_code = projection::resolve_source(options.source_projection.as_deref(), &fc);
        debug!(source = %source_code, target = %target_code, "resolved spatial references");
        let fc = self.reprojector.project(fc, &source_code, &target_code).await?;

        let source = to_graphics(fc, kind, &target_sr)?;
        let renderer = renderer::select_renderer(kind, options.colour);

        let config = assemble(fields, kind, target_sr, renderer, source, layer_id);
        info!(
            features = config.source.len(),
            fields = config.fields.len(),
            geometry = ?config.geometry_type,
            "ingestion complete"
        );
        Ok(config)
    }
}

fn to_graphics(
    fc: FeatureCollection,
    kind: GeometryKind,
    spatial_reference: &SpatialReference,
) -> Result<Vec<ProjectedGraphic>> {
    let mut replaced = 0;
    let graphics = fc
        .features
        .into_iter()
        .map(|feature| {
            let mut graphic = esri::to_graphic(feature, kind, spatial_reference)?;
            replaced += esri::sanitize_attributes(&mut graphic.attributes);
            Ok(graphic)
        })
        .collect::<Result<Vec<_>>>()?;
    if replaced > 0 {
        debug!(replaced, "replaced complex attribute values");
    }
    Ok(graphics)
}

/// Puts the layer config together. The reserved OID field always comes
/// first.
pub fn assemble(
    fields: Vec<FieldDescriptor>,
    geometry_type: GeometryKind,
    spatial_reference: SpatialReference,
    renderer: SimpleRenderer,
    source: Vec<ProjectedGraphic>,
    id: String,
) -> TargetLayerConfig {
    let mut all_fields = Vec::with_capacity(fields.len() + 1);
    all_fields.push(FieldDescriptor::new(OBJECTID, FieldType::Oid));
    all_fields.extend(fields);

    TargetLayerConfig {
        object_id_field: OBJECTID.to_string(),
        fields: all_fields,
        geometry_type,
        spatial_reference,
        renderer,
        source,
        id,
    }
}
