//! Health-based residential exclusion zones and safe-zone mapping.
//!
//! Hazard features (freeways, airports, waterways, ...) are read from an
//! OSM PBF extract, GeoJSON or shapefile, buffered by hazard-specific
//! distances in a metric CRS, unioned per hazard and subtracted from a study
//! area. What remains is the safe zone.

pub mod bands;
pub mod config;
pub mod data;
pub mod dem;
pub mod error;
pub mod exclusion;
pub mod masking;
pub mod osm;
pub mod output;
pub mod pipeline;
pub mod projection;
pub mod render;
pub mod report;
pub mod slim;
pub mod types;

pub use error::{Error, Result};
