use std::sync::Arc;

use geo_ingest::esri::COMPLEX_VALUE_SENTINEL;
use geo_ingest::renderer::{default_renderer, Template};
use geo_ingest::{
    ArchiveDecoder, Colour, DelimitedOptions, FieldDescriptor, FieldMetadata, FieldType,
    GeometryKind, IngestError, IngestOptions, Ingestor, InputFormat, RawInput, SpatialReference,
};
use geojson::GeoJson;
use serde_json::{json, Value};

fn points(features: Vec<Value>) -> RawInput {
    RawInput::new(
        InputFormat::GeoJson,
        json!({"type": "FeatureCollection", "features": features}).to_string(),
    )
}

fn point(x: f64, y: f64, props: Value) -> Value {
    json!({
        "type": "Feature",
        "properties": props,
        "geometry": {"type": "Point", "coordinates": [x, y]}
    })
}

fn web_mercator() -> IngestOptions {
    IngestOptions::new(SpatialReference::from_wkid(102100))
}

#[tokio::test]
async fn test_three_points_end_to_end() {
    let input = points(vec![
        point(0.0, 0.0, json!({"name": "a", "pop": 10})),
        point(1.0, 1.0, json!({"name": "b", "pop": 20})),
        point(2.0, 2.0, json!({"name": "c", "pop": null})),
    ]);

    let layer = Ingestor::default().ingest(&input, &web_mercator()).await.unwrap();

    assert_eq!(layer.object_id_field, "OBJECTID");
    assert_eq!(layer.fields[0], FieldDescriptor::new("OBJECTID", FieldType::Oid));
    assert_eq!(layer.fields[1], FieldDescriptor::new("name", FieldType::String));
    assert_eq!(layer.fields[2], FieldDescriptor::new("pop", FieldType::Double));
    assert_eq!(layer.source.len(), 3);
    assert_eq!(layer.geometry_type, GeometryKind::Point);
    assert_eq!(layer.spatial_reference.latest_wkid, Some(3857));
    assert!(!layer.id.is_empty());

    let ids: Vec<_> = layer
        .source
        .iter()
        .map(|g| g.attributes["OBJECTID"].clone())
        .collect();
    assert_eq!(ids, vec![json!(1), json!(2), json!(3)]);
    assert!(layer
        .source
        .iter()
        .all(|g| !g.attributes.contains_key("ID_FILE")));

    let second = serde_json::to_value(&layer.source[1].geometry).unwrap();
    assert!((second["x"].as_f64().unwrap() - 111_319.490_793_273_57).abs() < 1e-6);
    assert_eq!(second["spatialReference"]["wkid"], json!(102100));
}

#[tokio::test]
async fn test_missing_target_is_config_error() {
    let valid = points(vec![point(0.0, 0.0, json!({}))]);
    let empty = points(vec![]);
    let not_a_collection = RawInput::new(InputFormat::GeoJson, point(0.0, 0.0, json!({})).to_string());

    for input in [valid, empty, not_a_collection] {
        let result = Ingestor::default()
            .ingest(&input, &IngestOptions::default())
            .await;
        assert!(matches!(result, Err(IngestError::Config(_))));
    }
}

#[tokio::test]
async fn test_stage_errors_surface_typed() {
    let ingestor = Ingestor::default();

    let feature = RawInput::new(InputFormat::GeoJson, point(0.0, 0.0, json!({})).to_string());
    assert!(matches!(
        ingestor.ingest(&feature, &web_mercator()).await,
        Err(IngestError::Format(_))
    ));

    assert!(matches!(
        ingestor.ingest(&points(vec![]), &web_mercator()).await,
        Err(IngestError::EmptyData)
    ));

    let unknown = IngestOptions::new(SpatialReference::from_wkid(3978));
    let err = ingestor
        .ingest(&points(vec![point(0.0, 0.0, json!({}))]), &unknown)
        .await
        .unwrap_err();
    assert!(matches!(err, IngestError::Projection(msg) if msg.contains("EPSG:3978")));
}

#[tokio::test]
async fn test_mixed_families_fail() {
    let input = points(vec![
        point(0.0, 0.0, json!({})),
        json!({
            "type": "Feature",
            "properties": {},
            "geometry": {
                "type": "GeometryCollection",
                "geometries": [
                    {"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]},
                    {"type": "LineString", "coordinates": [[2.0, 2.0], [3.0, 3.0]]}
                ]
            }
        }),
    ]);
    assert!(matches!(
        Ingestor::default().ingest(&input, &web_mercator()).await,
        Err(IngestError::Geometry(_))
    ));
}

#[tokio::test]
async fn test_native_ids_and_complex_values() {
    let mut first = point(0.0, 0.0, json!({"tags": ["a", "b"], "meta": {"k": 1}, "n": 42}));
    first["id"] = json!("feature-a");
    let input = points(vec![first, point(1.0, 1.0, json!({"tags": null, "meta": null, "n": 1}))]);

    let layer = Ingestor::default()
        .ingest(&input, &IngestOptions::new(SpatialReference::from_wkid(4326)))
        .await
        .unwrap();

    let names: Vec<_> = layer.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["OBJECTID", "tags", "meta", "n", "ID_FILE"]);

    let attrs = &layer.source[0].attributes;
    assert_eq!(attrs["tags"], json!(COMPLEX_VALUE_SENTINEL));
    assert_eq!(attrs["meta"], json!(COMPLEX_VALUE_SENTINEL));
    assert_eq!(attrs["n"], json!(42));
    assert_eq!(attrs["ID_FILE"], json!("feature-a"));
    assert_eq!(layer.source[1].attributes["ID_FILE"], json!(""));
    assert_eq!(layer.source[1].attributes["tags"], json!(null));
}

#[tokio::test]
async fn test_delimited_input() {
    let text = "Site Name,Lat,Long,Site_Name\nOttawa,45.42,-75.69,x\nGatineau,45.48,-75.70,y\n";
    let input = RawInput::new(
        InputFormat::Delimited(DelimitedOptions::default()),
        text,
    );

    let layer = Ingestor::default()
        .ingest(&input, &IngestOptions::new(SpatialReference::from_wkid(4326)))
        .await
        .unwrap();

    let site = &layer.fields[1];
    assert_eq!(site.name, "Site_Name_");
    assert_eq!(site.alias.as_deref(), Some("Site Name"));

    let lat = layer.fields.iter().find(|f| f.name == "Lat").unwrap();
    let lon = layer.fields.iter().find(|f| f.name == "Long").unwrap();
    assert_eq!(lat.field_type, FieldType::Double);
    assert_eq!(lon.field_type, FieldType::Double);

    let attrs = &layer.source[0].attributes;
    assert_eq!(attrs["Site_Name_"], json!("Ottawa"));
    assert_eq!(attrs["Site_Name"], json!("x"));
    assert_eq!(attrs["Lat"], json!(45.42));
    assert!(!attrs.contains_key("Site Name"));
}

#[tokio::test]
async fn test_embedded_crs_and_override() {
    let collection = json!({
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::3857"}},
        "features": [point(20_037_508.342_789_244, 0.0, json!({}))]
    });
    let geojson: GeoJson = collection.to_string().parse().unwrap();

    let layer = Ingestor::default()
        .geojson_to_layer(geojson, &IngestOptions::new(SpatialReference::from_wkid(4326)))
        .await
        .unwrap();
    let geometry = serde_json::to_value(&layer.source[0].geometry).unwrap();
    assert!((geometry["x"].as_f64().unwrap() - 180.0).abs() < 1e-9);

    // override wins over the embedded CRS
    let geojson: GeoJson = collection.to_string().parse().unwrap();
    let mut options = IngestOptions::new(SpatialReference::from_wkid(4326));
    options.source_projection = Some("EPSG:4326".to_string());
    let layer = Ingestor::default()
        .geojson_to_layer(geojson, &options)
        .await
        .unwrap();
    let geometry = serde_json::to_value(&layer.source[0].geometry).unwrap();
    assert_eq!(geometry["x"], json!(20_037_508.342_789_244));
}

#[tokio::test]
async fn test_exclusive_fields_filter() {
    let input = points(vec![point(0.0, 0.0, json!({"keep": "a", "drop": 1}))]);
    let mut options = web_mercator();
    options.field_metadata = Some(FieldMetadata {
        exclusive_fields: true,
        field_info: vec![FieldDescriptor::new("keep", FieldType::String)],
    });

    let layer = Ingestor::default().ingest(&input, &options).await.unwrap();
    let names: Vec<_> = layer.fields.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["OBJECTID", "keep"]);
}

#[tokio::test]
async fn test_renamed_field_does_not_take_excluded_column() {
    let input = points(vec![point(
        0.0,
        0.0,
        json!({"My Field": "kept-value", "My_Field": "excluded-value"}),
    )]);
    let mut options = web_mercator();
    options.field_metadata = Some(FieldMetadata {
        exclusive_fields: true,
        field_info: vec![FieldDescriptor::new("My Field", FieldType::String)],
    });

    let layer = Ingestor::default().ingest(&input, &options).await.unwrap();

    let field = &layer.fields[1];
    assert_eq!(layer.fields.len(), 2);
    assert_eq!(field.name, "My_Field_");
    assert_eq!(field.alias.as_deref(), Some("My Field"));

    let attrs = &layer.source[0].attributes;
    assert_eq!(attrs[field.name.as_str()], json!("kept-value"));
    assert_eq!(attrs["My_Field"], json!("excluded-value"));
}

#[tokio::test]
async fn test_empty_layer_id_gets_generated() {
    let mut options = web_mercator();
    options.layer_id = Some(String::new());

    let layer = Ingestor::default()
        .ingest(&points(vec![point(0.0, 0.0, json!({}))]), &options)
        .await
        .unwrap();
    assert!(!layer.id.is_empty());
}

#[tokio::test]
async fn test_concurrent_ingestions_keep_their_own_styling() {
    let ingestor = Ingestor::default();
    let polygon = |props: Value| {
        json!({
            "type": "Feature",
            "properties": props,
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]]
            }
        })
    };
    let red_input = points(vec![polygon(json!({}))]);
    let plain_input = points(vec![polygon(json!({}))]);

    let mut red = web_mercator();
    red.colour = Some(Colour::rgba(255, 0, 0, 1.0));
    let plain = web_mercator();

    let (red_layer, plain_layer) = tokio::join!(
        ingestor.ingest(&red_input, &red),
        ingestor.ingest(&plain_input, &plain)
    );
    let red_layer = red_layer.unwrap();
    let plain_layer = plain_layer.unwrap();

    assert_eq!(red_layer.renderer.symbol.color, [255, 0, 0, 255]);
    assert_eq!(plain_layer.renderer, default_renderer(Template::OutlinedPoly));
    assert_ne!(red_layer.id, plain_layer.id);
}

struct FixedArchive;

impl ArchiveDecoder for FixedArchive {
    fn decode(&self, _bytes: &[u8]) -> geo_ingest::Result<GeoJson> {
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {"NAME": "river"},
                "geometry": {"type": "LineString", "coordinates": [[0.0, 0.0], [1.0, 1.0]]}
            }]
        })
        .to_string()
        .parse::<GeoJson>()
        .map_err(|e| IngestError::Decode(format!("{}", e)))
    }
}

#[tokio::test]
async fn test_shapefile_archive_uses_plugged_decoder() {
    let input = RawInput::new(InputFormat::ShapefileArchive, vec![0x50, 0x4b, 0x03, 0x04]);

    assert!(matches!(
        Ingestor::default().ingest(&input, &web_mercator()).await,
        Err(IngestError::Decode(_))
    ));

    let mut options = web_mercator();
    options.layer_id = Some("rivers".to_string());
    let layer = Ingestor::default()
        .with_archive_decoder(Arc::new(FixedArchive))
        .ingest(&input, &options)
        .await
        .unwrap();
    assert_eq!(layer.id, "rivers");
    assert_eq!(layer.geometry_type, GeometryKind::Polyline);
    assert_eq!(layer.renderer.symbol.kind, "esriSLS");
}

#[tokio::test]
async fn test_layer_config_serializes() {
    let input = points(vec![point(0.0, 0.0, json!({"name": "a"}))]);
    let mut options = web_mercator();
    options.layer_id = Some("pts".to_string());
    let layer = Ingestor::default().ingest(&input, &options).await.unwrap();

    let value = serde_json::to_value(&layer).unwrap();
    assert_eq!(value["objectIdField"], json!("OBJECTID"));
    assert_eq!(value["geometryType"], json!("point"));
    assert_eq!(value["fields"][0], json!({"name": "OBJECTID", "type": "oid"}));
    assert_eq!(value["spatialReference"], json!({"wkid": 102100, "latestWkid": 3857}));
    assert_eq!(value["renderer"]["type"], json!("simple"));
    assert_eq!(value["id"], json!("pts"));
}
