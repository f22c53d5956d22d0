use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use geo_ingest::{
    default_ingestor, decode, Colour, DelimitedOptions, IngestError, IngestOptions, InputFormat,
    SpatialReference,
};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("geo-ingest")
        .version("1.0")
        .author("Jesper Fjellin")
        .about("Converts GeoJSON, CSV and shapefile archives into a typed, reprojected feature layer config")
        .arg(
            Arg::new("file")
                .short('f')
                .long("file")
                .num_args(1)
                .required(true)
                .help("Input file to ingest"),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .num_args(1)
                .value_parser(["geojson", "csv", "shapefile"])
                .help("Input format (guessed from the file extension if omitted)"),
        )
        .arg(
            Arg::new("target-sr")
                .short('t')
                .long("target-sr")
                .num_args(1)
                .help("Target spatial reference, e.g. EPSG:3857 or 102100"),
        )
        .arg(
            Arg::new("source-projection")
                .short('s')
                .long("source-projection")
                .num_args(1)
                .help("Override the source projection of the input"),
        )
        .arg(
            Arg::new("layer-id")
                .long("layer-id")
                .num_args(1)
                .help("Layer id (a UUID is generated if omitted)"),
        )
        .arg(
            Arg::new("colour")
                .long("colour")
                .num_args(1)
                .help("Symbol colour as #RRGGBB or #RRGGBBAA"),
        )
        .arg(
            Arg::new("lat-field")
                .long("lat-field")
                .num_args(1)
                .help("CSV latitude column (default: Lat)"),
        )
        .arg(
            Arg::new("lon-field")
                .long("lon-field")
                .num_args(1)
                .help("CSV longitude column (default: Long)"),
        )
        .arg(
            Arg::new("delimiter")
                .long("delimiter")
                .num_args(1)
                .help("CSV delimiter (default: ,)"),
        )
        .arg(
            Arg::new("options")
                .short('o')
                .long("options")
                .num_args(1)
                .help("JSON options file; flags override its entries"),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .num_args(1)
                .help("Write the layer config here instead of stdout"),
        )
}

fn load_options(matches: &ArgMatches) -> Result<IngestOptions> {
    let mut options = match matches.get_one::<String>("options") {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading options file {}", path))?;
            serde_json::from_str::<IngestOptions>(&text)
                .with_context(|| format!("parsing options file {}", path))?
        }
        None => IngestOptions::default(),
    };

    if let Some(sr) = matches.get_one::<String>("target-sr") {
        options.target_sr = Some(sr.parse::<SpatialReference>()?);
    }
    if let Some(source) = matches.get_one::<String>("source-projection") {
        options.source_projection = Some(source.clone());
    }
    if let Some(id) = matches.get_one::<String>("layer-id") {
        options.layer_id = Some(id.clone());
    }
    if let Some(colour) = matches.get_one::<String>("colour") {
        options.colour = Some(colour.parse::<Colour>()?);
    }
    Ok(options)
}

fn input_format(matches: &ArgMatches, file: &Path) -> Result<InputFormat> {
    let name = match matches.get_one::<String>("format") {
        Some(f) => f.clone(),
        None => match file
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("json") | Some("geojson") => "geojson".to_string(),
            Some("csv") | Some("txt") => "csv".to_string(),
            Some("zip") => "shapefile".to_string(),
            _ => bail!(
                "cannot guess the format of {}, pass --format",
                file.display()
            ),
        },
    };

    Ok(match name.as_str() {
        "geojson" => InputFormat::GeoJson,
        "shapefile" => InputFormat::ShapefileArchive,
        _ => {
            let mut csv = DelimitedOptions::default();
            if let Some(v) = matches.get_one::<String>("lat-field") {
                csv.lat_field = v.clone();
            }
            if let Some(v) = matches.get_one::<String>("lon-field") {
                csv.lon_field = v.clone();
            }
            if let Some(v) = matches.get_one::<String>("delimiter") {
                csv.delimiter = v.clone();
            }
            InputFormat::Delimited(csv)
        }
    })
}

async fn run(matches: ArgMatches) -> Result<()> {
    let file = matches
        .get_one::<String>("file")
        .map(PathBuf::from)
        .context("missing --file")?;
    if !file.exists() {
        bail!("file not found: {}", file.display());
    }

    let options = load_options(&matches)?;
    let format = input_format(&matches, &file)?;
    if let Some(sr) = &options.target_sr {
        tracing::info!(file = %file.display(), target = %sr, "ingesting");
    }
    if let Some(colour) = options.colour {
        tracing::debug!(colour = %colour, "symbol colour override");
    }

    let input = decode::read_input(&file, format).await?;
    let layer = default_ingestor().ingest(&input, &options).await?;

    let json = serde_json::to_string_pretty(&layer)?;
    match matches.get_one::<String>("output") {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("writing {}", path))?;
            tracing::info!(path = %path, "layer config written");
        }
        None => println!("{}", json),
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();

    if let Err(e) = run(matches).await {
        eprintln!("Error ingesting file: {:#}", e);
        if let Some(IngestError::Projection(_)) = e.downcast_ref::<IngestError>() {
            eprintln!("Check that --source-projection and --target-sr name systems this build can resolve.");
            eprintln!("Without the `proj` feature only EPSG:4326 and EPSG:3857 are available.");
        }
        std::process::exit(1);
    }
}
