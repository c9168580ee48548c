//! The fixed zone pipeline: load → filter → buffer → union → subtract.

use crate::config::AppConfig;
use crate::data;
use crate::dem::{build_flood_zones, read_dem, Dem};
use crate::error::{Error, Result};
use crate::exclusion::{build_exclusion_zones, select_hazard_features};
use crate::masking::build_safe_zone;
use crate::projection::Crs;
use crate::report::SafetyReport;
use crate::types::{ExclusionZone, FeatureCollection, Layers, SafeZone, StudyArea};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

/// Everything one run produces.
#[derive(Debug, Clone)]
pub struct ZoneRun {
    pub study_area: StudyArea,
    pub features: BTreeMap<String, FeatureCollection>,
    pub zones: BTreeMap<String, ExclusionZone>,
    pub safe_zone: SafeZone,
    pub report: SafetyReport,
}

/// Loads the dataset for the configured study area.
///
/// A missing file is fatal. Any other read failure is logged and yields
/// empty layers so a partial safe zone can still be produced.
pub fn load_dataset(path: &Path, config: &AppConfig) -> Result<Layers> {
    data::ensure_exists(path)?;
    match data::load_layers(path, &config.study_area, config.input.crs) {
        Ok(layers) => Ok(layers),
        Err(e @ Error::MissingInput(_)) => Err(e),
        Err(e) => {
            error!("Failed to read {:?}, continuing with no features: {}", path, e);
            Ok(Layers::empty(config.input.crs.unwrap_or(Crs::Wgs84)))
        }
    }
}

/// Loads the configured DEM, if any, with the same failure rules as
/// `load_dataset`: missing is fatal, unreadable is logged and skipped.
pub fn load_dem(config: &AppConfig) -> Result<Option<Dem>> {
    let Some(path) = &config.flood.dem else {
        return Ok(None);
    };
    data::ensure_exists(path)?;
    match read_dem(path, config.flood.crs) {
        Ok(dem) => Ok(Some(dem)),
        Err(e) => {
            error!("Failed to read DEM {:?}, flood zones left empty: {}", path, e);
            Ok(None)
        }
    }
}

/// Runs the pipeline over already-loaded layers and an optional DEM.
pub fn run_zones(config: &AppConfig, layers: &Layers, dem: Option<&Dem>) -> ZoneRun {
    let study_area = config.study_area();
    let working_crs = config.working_crs();

    info!("Selecting hazard features");
    let features = select_hazard_features(layers, &config.hazards);

    info!("Calculating buffers in {}", working_crs);
    let mut zones = build_exclusion_zones(&features, &config.hazards, &study_area, working_crs);
    match dem {
        Some(dem) => {
            info!("Extracting flood zones from {}x{} DEM", dem.width, dem.height);
            zones.extend(build_flood_zones(dem, &config.flood.bands, &study_area));
        }
        None if config.flood.dem.is_some() => {
            for band in &config.flood.bands {
                zones.insert(band.name.clone(), ExclusionZone::empty(&band.name));
            }
        }
        None => {}
    }

    let safe_zone = build_safe_zone(&zones, &study_area);
    let report = SafetyReport::compute(&study_area, &zones, &safe_zone, working_crs);

    ZoneRun {
        study_area,
        features,
        zones,
        safe_zone,
        report,
    }
}
