use crate::projection::{reproject_multipolygon, Crs};
use crate::types::{ExclusionZone, SafeZone, StudyArea};
use geo::{BooleanOps, BoundingRect, Intersects, MultiPolygon, Polygon};
use rstar::{RTree, RTreeObject, AABB};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Exclusion polygon indexed by its envelope.
pub struct ZonePolygon(Polygon<f64>);

impl RTreeObject for ZonePolygon {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        match self.0.bounding_rect() {
            Some(bbox) => {
                AABB::from_corners([bbox.min().x, bbox.min().y], [bbox.max().x, bbox.max().y])
            }
            None => AABB::from_point([0.0, 0.0]),
        }
    }
}

/// Indexes every polygon of every zone, in WGS84.
pub fn index_zones(zones: &BTreeMap<String, ExclusionZone>) -> RTree<ZonePolygon> {
    let mut polygons = Vec::new();
    for zone in zones.values() {
        let geographic = reproject_multipolygon(&zone.geometry, zone.crs, Crs::Wgs84);
        polygons.extend(
            geographic
                .into_iter()
                .filter(|p| !p.exterior().0.is_empty())
                .map(ZonePolygon),
        );
    }
    debug!("Building spatial index for {} zone polygons", polygons.len());
    RTree::bulk_load(polygons)
}

/// Study area minus the union of all exclusion zones, in WGS84.
///
/// No zones (or only empty ones) leave the whole study area safe; zones
/// covering the study area leave an empty safe zone.
pub fn build_safe_zone(zones: &BTreeMap<String, ExclusionZone>, study_area: &StudyArea) -> SafeZone {
    let study = study_area.multipolygon();
    let tree = index_zones(zones);

    let bbox = study_area.bbox;
    let study_aabb = AABB::from_corners([bbox.west, bbox.south], [bbox.east, bbox.north]);

    // Find intersecting zone polygons
    let candidates: Vec<&Polygon<f64>> = tree
        .locate_in_envelope_intersecting(&study_aabb)
        .map(|z| &z.0)
        .filter(|p| study.intersects(*p))
        .collect();

    if candidates.is_empty() {
        info!("No exclusion zones touch the study area");
        return SafeZone {
            geometry: study,
            crs: Crs::Wgs84,
        };
    }

    let subtracted = candidates.len();
    let excluded: MultiPolygon<f64> = geo::unary_union(candidates);
    let safe = study.difference(&excluded);
    info!(
        "Safe zone: {} polygons after subtracting {} of {} zone polygons",
        safe.0.len(),
        subtracted,
        tree.size()
    );

    SafeZone {
        geometry: safe,
        crs: Crs::Wgs84,
    }
}
