//! Web-ready extracts: clip to a bounding box, drop unused attributes and
//! simplify in metres.

use crate::projection::{reproject_geometry, Crs};
use crate::types::{BoundingBox, Feature, FeatureCollection};
use geo::{BooleanOps, Contains, Geometry, MultiLineString, MultiPolygon, Simplify};
use serde_json::Map;
use tracing::info;

#[derive(Debug, Clone)]
pub struct SlimOptions {
    pub bbox: BoundingBox,
    /// Only this attribute is kept when the dataset has it.
    pub keep_column: Option<String>,
    /// Douglas-Peucker tolerance in metres; zero disables simplification.
    pub tolerance_m: f64,
    pub working_crs: Crs,
}

/// Clips, slims and simplifies `collection`; the result is in WGS84.
pub fn slim_collection(collection: &FeatureCollection, options: &SlimOptions) -> FeatureCollection {
    let keep = options
        .keep_column
        .as_deref()
        .filter(|col| collection.features.iter().any(|f| f.properties.contains_key(*col)));

    let mut features = Vec::with_capacity(collection.len());
    for feature in &collection.features {
        let geographic = reproject_geometry(&feature.geometry, collection.crs, Crs::Wgs84);
        let Some(clipped) = clip_to_bbox(&geographic, &options.bbox) else {
            continue;
        };
        let geometry = if options.tolerance_m > 0.0 {
            let projected = reproject_geometry(&clipped, Crs::Wgs84, options.working_crs);
            let simplified = simplify_geometry(&projected, options.tolerance_m);
            reproject_geometry(&simplified, options.working_crs, Crs::Wgs84)
        } else {
            clipped
        };

        let properties = match keep {
            Some(col) => {
                let mut slim = Map::new();
                if let Some(value) = feature.properties.get(col) {
                    slim.insert(col.to_string(), value.clone());
                }
                slim
            }
            None => feature.properties.clone(),
        };
        features.push(Feature { geometry, properties });
    }

    info!(
        "Slimmed {} features down to {} inside {}",
        collection.len(),
        features.len(),
        options.bbox
    );
    FeatureCollection::new(Crs::Wgs84, features)
}

/// Part of a WGS84 geometry inside `bbox`, or `None` when nothing is left.
pub fn clip_to_bbox(geometry: &Geometry<f64>, bbox: &BoundingBox) -> Option<Geometry<f64>> {
    let window = bbox.polygon();
    match geometry {
        Geometry::Point(p) => window.contains(p).then(|| Geometry::Point(*p)),
        Geometry::MultiPoint(mp) => {
            let inside: Vec<_> = mp.iter().filter(|p| window.contains(*p)).copied().collect();
            (!inside.is_empty()).then(|| Geometry::MultiPoint(inside.into()))
        }
        Geometry::Line(l) => clip_lines(&window, MultiLineString::new(vec![(*l).into()])),
        Geometry::LineString(ls) => clip_lines(&window, MultiLineString::new(vec![ls.clone()])),
        Geometry::MultiLineString(mls) => clip_lines(&window, mls.clone()),
        Geometry::Polygon(p) => clip_polygons(&window, MultiPolygon::new(vec![p.clone()])),
        Geometry::MultiPolygon(mp) => clip_polygons(&window, mp.clone()),
        Geometry::Rect(r) => clip_polygons(&window, MultiPolygon::new(vec![r.to_polygon()])),
        Geometry::Triangle(t) => clip_polygons(&window, MultiPolygon::new(vec![t.to_polygon()])),
        Geometry::GeometryCollection(gc) => {
            let parts: Vec<_> = gc.iter().filter_map(|g| clip_to_bbox(g, bbox)).collect();
            (!parts.is_empty()).then(|| Geometry::GeometryCollection(parts.into_iter().collect()))
        }
    }
}

fn clip_lines(window: &geo::Polygon<f64>, lines: MultiLineString<f64>) -> Option<Geometry<f64>> {
    let clipped = window.clip(&lines, false);
    (!clipped.0.is_empty()).then(|| Geometry::MultiLineString(clipped))
}

fn clip_polygons(window: &geo::Polygon<f64>, polygons: MultiPolygon<f64>) -> Option<Geometry<f64>> {
    let clipped = polygons.intersection(window);
    (!clipped.0.is_empty()).then(|| Geometry::MultiPolygon(clipped))
}

/// Douglas-Peucker simplification; points pass through unchanged.
pub fn simplify_geometry(geometry: &Geometry<f64>, tolerance: f64) -> Geometry<f64> {
    match geometry {
        Geometry::LineString(ls) => Geometry::LineString(ls.simplify(tolerance)),
        Geometry::MultiLineString(mls) => Geometry::MultiLineString(mls.simplify(tolerance)),
        Geometry::Polygon(p) => Geometry::Polygon(p.simplify(tolerance)),
        Geometry::MultiPolygon(mp) => Geometry::MultiPolygon(mp.simplify(tolerance)),
        Geometry::GeometryCollection(gc) => Geometry::GeometryCollection(
            gc.iter().map(|g| simplify_geometry(g, tolerance)).collect(),
        ),
        other => other.clone(),
    }
}
