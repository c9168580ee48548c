//! Elevation banding of contour features, dissolved per band.

use crate::projection::{reproject_geometry, Crs};
use crate::slim::simplify_geometry;
use crate::types::{Feature, FeatureCollection};
use geo::{Geometry, LineString, MultiLineString, MultiPoint, Point, Polygon};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{info, warn};

pub const SAFETY_LEVEL: &str = "safety_level";

/// Columns tried, in order, for an elevation value.
pub const ELEVATION_COLUMNS: &[&str] = &["elevation", "ELEV"];

/// Band covering elevations below `upper` (and at or above the previous band).
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ElevationBand {
    pub name: String,
    /// `None` is the open-ended top band.
    pub upper: Option<f64>,
}

/// Feet, for the 40 ft SanGIS contour set.
pub fn default_bands() -> Vec<ElevationBand> {
    vec![
        ElevationBand {
            name: "Severe Risk".to_string(),
            upper: Some(50.0),
        },
        ElevationBand {
            name: "Caution".to_string(),
            upper: Some(130.0),
        },
        ElevationBand {
            name: "Safe".to_string(),
            upper: None,
        },
    ]
}

pub fn classify_elevation(elevation: f64, bands: &[ElevationBand]) -> Option<&ElevationBand> {
    bands
        .iter()
        .find(|band| band.upper.map_or(true, |upper| elevation < upper))
}

/// First of `ELEVATION_COLUMNS` present on any feature.
pub fn elevation_column(collection: &FeatureCollection) -> Option<&'static str> {
    ELEVATION_COLUMNS
        .iter()
        .copied()
        .find(|col| collection.features.iter().any(|f| f.properties.contains_key(*col)))
}

fn elevation_of(feature: &Feature, column: &str) -> Option<f64> {
    match feature.properties.get(column)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Clone)]
pub struct BandSummary {
    /// One feature per non-empty band, in band order, WGS84.
    pub zones: FeatureCollection,
    pub counts: BTreeMap<String, usize>,
    pub unclassified: usize,
}

/// Classifies every feature by `column` and merges each band into one
/// geometry, simplified by `tolerance_m` in `working_crs`.
pub fn dissolve_bands(
    collection: &FeatureCollection,
    column: &str,
    bands: &[ElevationBand],
    tolerance_m: f64,
    working_crs: Crs,
) -> BandSummary {
    let mut grouped: BTreeMap<usize, Vec<&Geometry<f64>>> = BTreeMap::new();
    let mut unclassified = 0usize;

    for feature in &collection.features {
        let band_index = elevation_of(feature, column)
            .and_then(|elev| classify_elevation(elev, bands))
            .and_then(|band| bands.iter().position(|b| b == band));
        match band_index {
            Some(i) => grouped.entry(i).or_default().push(&feature.geometry),
            None => unclassified += 1,
        }
    }
    if unclassified > 0 {
        warn!("{} features had no usable '{}' value", unclassified, column);
    }

    let mut counts = BTreeMap::new();
    let mut features = Vec::new();
    for (index, geometries) in grouped {
        let band = &bands[index];
        counts.insert(band.name.clone(), geometries.len());

        let dissolved = dissolve(&geometries);
        let projected = reproject_geometry(&dissolved, collection.crs, working_crs);
        let simplified = if tolerance_m > 0.0 {
            simplify_geometry(&projected, tolerance_m)
        } else {
            projected
        };
        let geometry = reproject_geometry(&simplified, working_crs, Crs::Wgs84);

        features.push(Feature::new(geometry).with_property(SAFETY_LEVEL, band.name.as_str()));
    }

    for (name, count) in &counts {
        info!("{:<12} {} features", name, count);
    }

    BandSummary {
        zones: FeatureCollection::new(Crs::Wgs84, features),
        counts,
        unclassified,
    }
}

/// Merges geometries into one: lines into a multilinestring, areas into
/// their union, points into a multipoint. Mixed input yields a collection.
fn dissolve(geometries: &[&Geometry<f64>]) -> Geometry<f64> {
    let mut points: Vec<Point<f64>> = Vec::new();
    let mut lines: Vec<LineString<f64>> = Vec::new();
    let mut polygons: Vec<Polygon<f64>> = Vec::new();

    for geometry in geometries {
        collect_parts(geometry, &mut points, &mut lines, &mut polygons);
    }

    let mut parts: Vec<Geometry<f64>> = Vec::new();
    if !points.is_empty() {
        parts.push(Geometry::MultiPoint(MultiPoint::new(points)));
    }
    if !lines.is_empty() {
        parts.push(Geometry::MultiLineString(MultiLineString::new(lines)));
    }
    if !polygons.is_empty() {
        parts.push(Geometry::MultiPolygon(geo::unary_union(&polygons)));
    }

    if parts.len() == 1 {
        parts.remove(0)
    } else {
        Geometry::GeometryCollection(parts.into_iter().collect())
    }
}

fn collect_parts(
    geometry: &Geometry<f64>,
    points: &mut Vec<Point<f64>>,
    lines: &mut Vec<LineString<f64>>,
    polygons: &mut Vec<Polygon<f64>>,
) {
    match geometry {
        Geometry::Point(p) => points.push(*p),
        Geometry::MultiPoint(mp) => points.extend(mp.iter().copied()),
        Geometry::Line(l) => lines.push((*l).into()),
        Geometry::LineString(ls) => lines.push(ls.clone()),
        Geometry::MultiLineString(mls) => lines.extend(mls.iter().cloned()),
        Geometry::Polygon(p) => polygons.push(p.clone()),
        Geometry::MultiPolygon(mp) => polygons.extend(mp.iter().cloned()),
        Geometry::Rect(r) => polygons.push(r.to_polygon()),
        Geometry::Triangle(t) => polygons.push(t.to_polygon()),
        Geometry::GeometryCollection(gc) => {
            for g in gc {
                collect_parts(g, points, lines, polygons);
            }
        }
    }
}
