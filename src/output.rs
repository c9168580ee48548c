use crate::error::{Error, Result};
use crate::projection::{reproject_collection, reproject_multipolygon, Crs};
use crate::report::SafetyReport;
use crate::types::{ExclusionZone, FeatureCollection, SafeZone};
use geo::MultiPolygon;
use geojson::{GeoJson, JsonObject};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::info;

pub const SAFE_ZONE_LAYER: &str = "safe_zones";

/// One feature per exclusion zone plus one for the safe zone, each tagged
/// with its `layer` name and area.
pub fn zones_to_geojson(
    zones: &BTreeMap<String, ExclusionZone>,
    safe_zone: &SafeZone,
    report: &SafetyReport,
) -> geojson::FeatureCollection {
    let mut features = Vec::with_capacity(zones.len() + 1);

    for (name, zone) in zones {
        let mut properties = JsonObject::new();
        properties.insert("layer".to_string(), Value::from(zone.layer_name()));
        properties.insert("hazard".to_string(), Value::from(name.as_str()));
        properties.insert(
            "area_km2".to_string(),
            Value::from(report.zone_areas_km2.get(name).copied().unwrap_or(0.0)),
        );
        features.push(polygon_feature(&zone.geometry, zone.crs, properties));
    }

    let mut properties = JsonObject::new();
    properties.insert("layer".to_string(), Value::from(SAFE_ZONE_LAYER));
    properties.insert("area_km2".to_string(), Value::from(report.safe_area_km2));
    properties.insert("percent_safe".to_string(), Value::from(report.percent_safe));
    features.push(polygon_feature(&safe_zone.geometry, safe_zone.crs, properties));

    geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

fn polygon_feature(geometry: &MultiPolygon<f64>, crs: Crs, properties: JsonObject) -> geojson::Feature {
    let geographic = reproject_multipolygon(geometry, crs, Crs::Wgs84);
    geojson::Feature {
        bbox: None,
        geometry: Some(geojson::Geometry::new(geojson::Value::from(&geographic))),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Serializes a collection as WGS84 GeoJSON.
pub fn collection_to_geojson(collection: &FeatureCollection) -> geojson::FeatureCollection {
    let geographic = reproject_collection(collection, Crs::Wgs84);
    let features = geographic
        .features
        .iter()
        .map(|f| geojson::Feature {
            bbox: None,
            geometry: Some(geojson::Geometry::new(geojson::Value::from(&f.geometry))),
            id: None,
            properties: Some(f.properties.clone()),
            foreign_members: None,
        })
        .collect();

    geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members: None,
    }
}

/// Writes `collection` to `path`, replacing any existing file.
pub fn write_geojson(path: &Path, collection: geojson::FeatureCollection) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let count = collection.features.len();
    let text = GeoJson::FeatureCollection(collection).to_string();
    fs::write(path, text).map_err(|e| Error::io(path, e))?;
    info!("Wrote {} features to {:?}", count, path);
    Ok(())
}
