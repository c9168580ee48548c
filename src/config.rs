use crate::error::{Error, Result};
use crate::projection::Crs;
use crate::types::{BoundingBox, LayerKind, StudyArea};
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub input: InputConfig,
    pub study_area: BoundingBox,
    pub projection: ProjectionConfig,
    pub hazards: Vec<HazardConfig>,
    pub flood: FloodConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct InputConfig {
    /// OSM PBF, GeoJSON or shapefile. Required, either here or on the CLI.
    pub dataset: Option<PathBuf>,
    /// CRS of the dataset when it is not WGS84 (shapefiles only).
    pub crs: Option<Crs>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Metric CRS used for buffering and area measurement.
    pub working_crs: Crs,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            working_crs: Crs::SAN_DIEGO_UTM,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HazardConfig {
    pub name: String,
    pub layer: LayerKind,
    pub key: String,
    pub values: Vec<String>,
    pub distance_m: f64,
    #[serde(default = "default_zone_color")]
    pub color: String, // Hex code
    #[serde(default = "default_zone_alpha")]
    pub alpha: f32,
    #[serde(default)]
    pub label: Option<String>,
}

impl HazardConfig {
    fn new(
        name: &str,
        layer: LayerKind,
        key: &str,
        values: &[&str],
        distance_m: f64,
        color: &str,
        alpha: f32,
        label: &str,
    ) -> Self {
        Self {
            name: name.to_string(),
            layer,
            key: key.to_string(),
            values: values.iter().map(|v| v.to_string()).collect(),
            distance_m,
            color: color.to_string(),
            alpha,
            label: Some(label.to_string()),
        }
    }

    pub fn legend_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("{} exclusion ({}m)", self.name, self.distance_m))
    }
}

fn default_zone_color() -> String {
    "#e74c3c".to_string()
}

fn default_zone_alpha() -> f32 {
    0.35
}

/// Low-elevation flood zones from a DEM. Disabled until `dem` is set.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct FloodConfig {
    /// Single-band GeoTIFF of elevations in metres.
    pub dem: Option<PathBuf>,
    /// CRS of the DEM when its GeoKeys are missing or should be ignored.
    pub crs: Option<Crs>,
    pub bands: Vec<FloodBand>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FloodBand {
    pub name: String,
    /// Cells at or below this elevation are flood-prone.
    pub max_elevation_m: f64,
    #[serde(default = "default_flood_color")]
    pub color: String,
    #[serde(default = "default_flood_alpha")]
    pub alpha: f32,
    #[serde(default)]
    pub label: Option<String>,
}

impl FloodBand {
    pub fn legend_label(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| format!("Elevation <= {} m", self.max_elevation_m))
    }
}

fn default_flood_color() -> String {
    "#1976d2".to_string()
}

fn default_flood_alpha() -> f32 {
    0.45
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            dem: None,
            crs: None,
            bands: vec![
                FloodBand {
                    name: "low_30m".to_string(),
                    max_elevation_m: 30.0,
                    color: "#1976d2".to_string(),
                    alpha: 0.45,
                    label: Some("Low elevation < 30 m".to_string()),
                },
                FloodBand {
                    name: "low_10m".to_string(),
                    max_elevation_m: 10.0,
                    color: "#0d47a1".to_string(),
                    alpha: 0.55,
                    label: Some("Very low elevation < 10 m".to_string()),
                },
            ],
        }
    }
}

/// How one exclusion zone is drawn, whatever produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct ZoneStyle {
    pub name: String,
    pub color: String,
    pub alpha: f32,
    pub label: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct OutputConfig {
    pub map_png: PathBuf,
    pub vector: PathBuf,
    /// Width of the rendered map in pixels; height follows the study area aspect.
    pub image_width: u32,
    pub write_vector: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            map_png: PathBuf::from("sanctuary_map.png"),
            vector: PathBuf::from("sanctuary_zones.geojson"),
            image_width: 2048,
            write_vector: true,
        }
    }
}

/// Full San Diego County.
pub const SAN_DIEGO_COUNTY: BoundingBox = BoundingBox {
    west: -117.60,
    south: 32.53,
    east: -116.08,
    north: 33.51,
};

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            study_area: SAN_DIEGO_COUNTY,
            projection: ProjectionConfig::default(),
            hazards: default_hazards(),
            flood: FloodConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

/// Freeways 2000 ft, airports 5 mi, rivers 1000 ft.
pub fn default_hazards() -> Vec<HazardConfig> {
    vec![
        HazardConfig::new(
            "freeway",
            LayerKind::Lines,
            "highway",
            &["motorway", "trunk"],
            610.0,
            "#e74c3c",
            0.35,
            "Freeway exclusion (610m / ~2,000 ft)",
        ),
        HazardConfig::new(
            "airport",
            LayerKind::Polygons,
            "aeroway",
            &["aerodrome", "runway"],
            8046.0,
            "#e67e22",
            0.25,
            "Airport exclusion (8046m / ~5 mi)",
        ),
        HazardConfig::new(
            "river",
            LayerKind::Lines,
            "waterway",
            &["river", "stream"],
            300.0,
            "#2980b9",
            0.40,
            "River/flood corridor (300m)",
        ),
    ]
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.study_area.validate()?;
        if !matches!(self.projection.working_crs, Crs::Utm { .. }) {
            return Err(Error::UnsupportedCrs(format!(
                "working CRS must be metric, got {}",
                self.projection.working_crs
            )));
        }
        for hazard in &self.hazards {
            if !(hazard.distance_m.is_finite() && hazard.distance_m > 0.0) {
                return Err(Error::InvalidDistance(hazard.distance_m));
            }
        }
        let mut names = HashSet::new();
        let all_names = self
            .hazards
            .iter()
            .map(|h| h.name.as_str())
            .chain(self.flood.bands.iter().map(|b| b.name.as_str()));
        for name in all_names {
            if !names.insert(name) {
                return Err(Error::InvalidConfig(format!("zone name '{}' is used twice", name)));
            }
        }
        for band in &self.flood.bands {
            if !band.max_elevation_m.is_finite() {
                return Err(Error::InvalidConfig(format!(
                    "flood band '{}' needs a finite max_elevation_m",
                    band.name
                )));
            }
        }
        Ok(())
    }

    /// Hazard zones first, then flood bands, in drawing order.
    pub fn zone_styles(&self) -> Vec<ZoneStyle> {
        let hazards = self.hazards.iter().map(|h| ZoneStyle {
            name: h.name.clone(),
            color: h.color.clone(),
            alpha: h.alpha,
            label: h.legend_label(),
        });
        let flood = self.flood.bands.iter().map(|b| ZoneStyle {
            name: b.name.clone(),
            color: b.color.clone(),
            alpha: b.alpha,
            label: b.legend_label(),
        });
        hazards.chain(flood).collect()
    }

    pub fn study_area(&self) -> StudyArea {
        StudyArea::new(self.study_area)
    }

    pub fn working_crs(&self) -> Crs {
        self.projection.working_crs
    }
}
