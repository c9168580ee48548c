//! Hazard exclusion zones: tag filtering, metric buffering and union.

use crate::config::HazardConfig;
use crate::error::{Error, Result};
use crate::projection::{reproject_collection, reproject_multipolygon, Crs};
use crate::types::{ExclusionZone, Feature, FeatureCollection, Layers, StudyArea};
use geo::{BooleanOps, Buffer, CoordsIter, MultiPolygon, Polygon};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Keeps the features whose attribute `key` is one of `allowed_values`.
///
/// OGR's OSM driver folds uncommon tags into an `other_tags` hstore string
/// (`"key"=>"value","k2"=>"v2"`); a feature whose `other_tags` carries an
/// allowed value for `key` matches as well.
pub fn filter_by_tag(
    collection: &FeatureCollection,
    key: &str,
    allowed_values: &[String],
) -> FeatureCollection {
    if collection.is_empty() {
        return collection.clone();
    }

    let features: Vec<Feature> = collection
        .features
        .iter()
        .filter(|f| feature_matches(f, key, allowed_values))
        .cloned()
        .collect();

    FeatureCollection::new(collection.crs, features)
}

fn feature_matches(feature: &Feature, key: &str, allowed_values: &[String]) -> bool {
    if let Some(value) = feature.property_str(key) {
        if allowed_values.iter().any(|v| *v == value) {
            return true;
        }
    }
    match feature.properties.get("other_tags") {
        Some(Value::String(other_tags)) => allowed_values
            .iter()
            .any(|v| other_tags.contains(&format!("\"{}\"=>\"{}\"", key, v))),
        _ => false,
    }
}

/// Buffers every geometry by `distance_m` in `working_crs` and unions the
/// results.
///
/// The returned multipolygon is expressed in `working_crs`. An empty
/// collection yields an empty multipolygon.
pub fn buffer_union(
    collection: &FeatureCollection,
    distance_m: f64,
    working_crs: Crs,
) -> Result<MultiPolygon<f64>> {
    if !(distance_m.is_finite() && distance_m > 0.0) {
        return Err(Error::InvalidDistance(distance_m));
    }
    if working_crs.is_geographic() {
        return Err(Error::UnsupportedCrs(format!(
            "buffering needs a metric CRS, got {}",
            working_crs
        )));
    }
    if collection.is_empty() {
        return Ok(MultiPolygon::new(Vec::new()));
    }

    let projected = reproject_collection(collection, working_crs);

    let mut pieces: Vec<Polygon<f64>> = Vec::new();
    let mut skipped = 0usize;
    for geometry in projected.geometries() {
        if !geometry.coords_iter().all(|c| c.x.is_finite() && c.y.is_finite()) {
            skipped += 1;
            continue;
        }
        pieces.extend(geometry.buffer(distance_m));
    }
    if skipped > 0 {
        warn!("Skipped {} geometries with non-finite coordinates", skipped);
    }

    if pieces.is_empty() {
        return Ok(MultiPolygon::new(Vec::new()));
    }
    Ok(geo::unary_union(&pieces))
}

/// Builds one exclusion zone per configured hazard, in WGS84 and clipped
/// to the study area.
///
/// A hazard with no source collection, an empty one, or one whose buffer
/// fails gets an empty zone; the other hazards are unaffected.
pub fn build_exclusion_zones(
    features_by_hazard: &BTreeMap<String, FeatureCollection>,
    hazards: &[HazardConfig],
    study_area: &StudyArea,
    working_crs: Crs,
) -> BTreeMap<String, ExclusionZone> {
    let study_polygon = study_area.polygon();
    let mut zones = BTreeMap::new();

    for hazard in hazards {
        let zone = match features_by_hazard.get(&hazard.name) {
            None => {
                warn!(hazard = %hazard.name, "No source features, zone left empty");
                ExclusionZone::empty(&hazard.name)
            }
            Some(collection) if collection.is_empty() => {
                debug!(hazard = %hazard.name, "Empty source collection");
                ExclusionZone::empty(&hazard.name)
            }
            Some(collection) => match buffer_union(collection, hazard.distance_m, working_crs) {
                Ok(buffered) => {
                    let geographic = reproject_multipolygon(&buffered, working_crs, Crs::Wgs84);
                    ExclusionZone {
                        hazard: hazard.name.clone(),
                        geometry: geographic.intersection(&study_polygon),
                        crs: Crs::Wgs84,
                    }
                }
                Err(e) => {
                    warn!(hazard = %hazard.name, "Buffer failed, zone left empty: {}", e);
                    ExclusionZone::empty(&hazard.name)
                }
            },
        };

        info!(
            hazard = %hazard.name,
            distance_m = hazard.distance_m,
            polygons = zone.geometry.0.len(),
            "Built exclusion zone"
        );
        zones.insert(hazard.name.clone(), zone);
    }

    zones
}

/// Picks each hazard's source features out of the loaded layers.
pub fn select_hazard_features(
    layers: &Layers,
    hazards: &[HazardConfig],
) -> BTreeMap<String, FeatureCollection> {
    hazards
        .iter()
        .map(|hazard| {
            let selected = filter_by_tag(layers.layer(hazard.layer), &hazard.key, &hazard.values);
            info!(
                hazard = %hazard.name,
                "Found {} {:?} features tagged {}={:?}",
                selected.len(),
                hazard.layer,
                hazard.key,
                hazard.values
            );
            (hazard.name.clone(), selected)
        })
        .collect()
}
