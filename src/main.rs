use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use geo::BoundingRect;
use sanctuary_map::bands::{default_bands, dissolve_bands, elevation_column};
use sanctuary_map::config::AppConfig;
use sanctuary_map::output::{collection_to_geojson, write_geojson, zones_to_geojson};
use sanctuary_map::pipeline::{load_dataset, load_dem, run_zones};
use sanctuary_map::projection::Crs;
use sanctuary_map::render::{render_map, save_map, MapLayers};
use sanctuary_map::slim::{slim_collection, SlimOptions};
use sanctuary_map::types::BoundingBox;
use sanctuary_map::{data, Error};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build hazard exclusion zones and the remaining safe zone
    Zones {
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,
        /// OSM PBF extract, GeoJSON or shapefile (overrides input.dataset)
        #[arg(short, long, value_name = "FILE")]
        input: Option<PathBuf>,
        /// Study area as "west,south,east,north" (default: San Diego County)
        #[arg(long, value_name = "W,S,E,N")]
        bbox: Option<BoundingBox>,
        /// Elevation GeoTIFF for low-lying flood zones (overrides flood.dem)
        #[arg(long, value_name = "FILE")]
        dem: Option<PathBuf>,
        /// Skip writing the vector output (the map PNG is always written)
        #[arg(long)]
        no_save: bool,
        /// Directory for the map and vector outputs
        #[arg(short, long, value_name = "DIR")]
        output_dir: Option<PathBuf>,
    },
    /// Clip, slim and simplify a contour dataset for web maps
    Slim {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        #[arg(long, value_name = "W,S,E,N", default_value = "-117.15,32.53,-116.90,32.88")]
        bbox: BoundingBox,
        /// Attribute kept when present; all others are dropped
        #[arg(long, default_value = "ELEV")]
        keep_column: String,
        /// Simplification tolerance in metres
        #[arg(long, default_value_t = 1.5)]
        tolerance: f64,
        /// CRS of a shapefile input, e.g. EPSG:32611
        #[arg(long)]
        crs: Option<Crs>,
    },
    /// Classify contours into elevation safety bands and dissolve each band
    Bands {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
        /// Elevation attribute (default: "elevation", then "ELEV")
        #[arg(long)]
        column: Option<String>,
        /// Simplification tolerance in metres
        #[arg(long, default_value_t = 10.0)]
        tolerance: f64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Zones {
            config,
            input,
            bbox,
            dem,
            no_save,
            output_dir,
        } => {
            let mut app_config = match &config {
                Some(path) => AppConfig::load_from_file(path)
                    .with_context(|| format!("Failed to load config file: {:?}", path))?,
                None => AppConfig::default(),
            };
            if let Some(bbox) = bbox {
                println!("Custom bbox: W={} S={} E={} N={}", bbox.west, bbox.south, bbox.east, bbox.north);
                app_config.study_area = bbox;
            } else {
                println!("Using bbox: {}", app_config.study_area);
            }
            if dem.is_some() {
                app_config.flood.dem = dem;
            }
            if no_save {
                app_config.output.write_vector = false;
            }
            if let Some(dir) = output_dir {
                app_config.output.map_png = dir.join(file_name(&app_config.output.map_png));
                app_config.output.vector = dir.join(file_name(&app_config.output.vector));
            }
            let dataset = input
                .or_else(|| app_config.input.dataset.clone())
                .ok_or_else(|| anyhow!("No input dataset: pass --input or set input.dataset"))?;

            run_zones_command(&app_config, &dataset)?;
        }
        Commands::Slim {
            input,
            output,
            bbox,
            keep_column,
            tolerance,
            crs,
        } => {
            let collection = read_any(&input, crs)?;
            let options = SlimOptions {
                bbox,
                keep_column: Some(keep_column),
                tolerance_m: tolerance,
                working_crs: Crs::utm_zone_for(bbox.center().x, bbox.center().y),
            };
            let slim = slim_collection(&collection, &options);
            write_geojson(&output, collection_to_geojson(&slim))?;
            println!("Success! Found {} features.", slim.len());
        }
        Commands::Bands {
            input,
            output,
            column,
            tolerance,
        } => {
            let collection = read_any(&input, None)?;
            let column = match column {
                Some(c) => c,
                None => elevation_column(&collection)
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("No elevation column found in {:?}", input))?,
            };
            let working_crs = collection
                .geometries()
                .next()
                .and_then(|g| g.bounding_rect())
                .map(|r| {
                    let c = collection.crs.to_wgs84(r.center());
                    Crs::utm_zone_for(c.x, c.y)
                })
                .unwrap_or(Crs::SAN_DIEGO_UTM);

            let summary = dissolve_bands(&collection, &column, &default_bands(), tolerance, working_crs);
            write_geojson(&output, collection_to_geojson(&summary.zones))?;

            println!("Calculated levels:");
            for (name, count) in &summary.counts {
                println!("  {:<12} {} features", name, count);
            }
        }
    }

    Ok(())
}

fn run_zones_command(config: &AppConfig, dataset: &Path) -> Result<()> {
    println!("Checking for local file: {:?}", dataset);
    let layers = load_dataset(dataset, config).map_err(|e| match e {
        Error::MissingInput(path) => anyhow!("Local file NOT found at {:?}", path),
        other => anyhow!(other),
    })?;

    let dem = load_dem(config).map_err(|e| match e {
        Error::MissingInput(path) => anyhow!("DEM NOT found at {:?}", path),
        other => anyhow!(other),
    })?;

    let run = run_zones(config, &layers, dem.as_ref());
    println!("{}", run.report);

    let styles = config.zone_styles();
    let map_layers = MapLayers {
        study_area: &run.study_area,
        safe_zone: &run.safe_zone,
        zones: &run.zones,
        features: &run.features,
        styles: &styles,
    };
    let image = render_map(&map_layers, config.working_crs(), config.output.image_width)
        .context("Failed to render map")?;
    save_map(&image, &config.output.map_png).context("Failed to save map image")?;

    if config.output.write_vector {
        write_geojson(
            &config.output.vector,
            zones_to_geojson(&run.zones, &run.safe_zone, &run.report),
        )
        .context("Failed to write vector output")?;
    } else {
        info!("Skipping vector output");
    }

    println!("Done.");
    Ok(())
}

/// Reads a GeoJSON or shapefile as one collection, no bbox filtering.
fn read_any(path: &Path, crs: Option<Crs>) -> Result<sanctuary_map::types::FeatureCollection> {
    let world = BoundingBox::new(-180.0, -90.0, 180.0, 90.0)?;
    let layers = data::load_layers(path, &world, crs).with_context(|| format!("Failed to read {:?}", path))?;
    let mut collection = layers.lines;
    collection.features.extend(layers.polygons.features);
    collection.features.extend(layers.points.features);
    Ok(collection)
}

fn file_name(path: &Path) -> PathBuf {
    path.file_name().map(PathBuf::from).unwrap_or_else(|| path.to_path_buf())
}
