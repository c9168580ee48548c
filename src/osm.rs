//! OpenStreetMap PBF extraction.
//!
//! Two passes over the file. Tagged ways are collected first, along with the
//! node ids they reference. The node pass then resolves those ids and keeps
//! tagged nodes inside the bounding box as points. A way is kept whole when
//! its extent touches the box, so features crossing the edge survive intact.
//! Closed ways carrying an area key become polygons, everything else becomes
//! a line. Multipolygon relations are not assembled.

use crate::error::Result;
use crate::projection::Crs;
use crate::types::{BoundingBox, Feature, Layers};
use geo::{BoundingRect, Coord, Geometry, Intersects, LineString, Point, Polygon};
use osmpbf::{Element, ElementReader};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

/// Keys that turn a closed way into an area.
const AREA_KEYS: &[&str] = &[
    "aeroway",
    "amenity",
    "boundary",
    "building",
    "craft",
    "geological",
    "historic",
    "landuse",
    "leisure",
    "military",
    "natural",
    "office",
    "place",
    "shop",
    "sport",
    "tourism",
];

/// Tags ignored when deciding whether a node is a point feature.
const NODE_NOISE_KEYS: &[&str] = &["created_by", "source", "note", "fixme"];

struct PendingWay {
    id: i64,
    refs: Vec<i64>,
    tags: Map<String, Value>,
}

pub fn load_osm_pbf(path: &Path, bbox: &BoundingBox) -> Result<Layers> {
    let window = bbox.rect();
    let mut layers = Layers::empty(Crs::Wgs84);

    // Pass 1: tagged ways and the nodes they need.
    let mut ways: Vec<PendingWay> = Vec::new();
    let mut wanted: HashSet<i64> = HashSet::new();
    let mut seen_ways = 0usize;

    ElementReader::from_path(path)?.for_each(|element| {
        let Element::Way(way) = element else {
            return;
        };
        seen_ways += 1;

        let tags = collect_tags(way.tags());
        if tags.is_empty() {
            return;
        }
        let refs: Vec<i64> = way.refs().collect();
        wanted.extend(refs.iter().copied());
        ways.push(PendingWay {
            id: way.id(),
            refs,
            tags,
        });
    })?;

    debug!(
        "Pass A: ways seen {}, tagged {}, nodes referenced {}",
        seen_ways,
        ways.len(),
        wanted.len()
    );

    // Pass 2: resolve way nodes, keep tagged nodes inside the window.
    let mut node_map: HashMap<i64, Coord<f64>> = HashMap::with_capacity(wanted.len());
    let mut seen_nodes = 0usize;

    ElementReader::from_path(path)?.for_each(|element| {
        let (id, lon, lat, tags) = match &element {
            Element::Node(node) => (node.id(), node.lon(), node.lat(), collect_tags(node.tags())),
            Element::DenseNode(dn) => (dn.id(), dn.lon(), dn.lat(), collect_tags(dn.tags())),
            _ => return,
        };
        seen_nodes += 1;

        let coord = Coord { x: lon, y: lat };
        if wanted.contains(&id) {
            node_map.insert(id, coord);
        }

        let inside = lon >= window.min().x
            && lon <= window.max().x
            && lat >= window.min().y
            && lat <= window.max().y;
        if inside && tags.keys().any(|k| !NODE_NOISE_KEYS.contains(&k.as_str())) {
            layers.push(Feature {
                geometry: Geometry::Point(Point::from(coord)),
                properties: tags,
            });
        }
    })?;

    debug!("Pass B: nodes seen {}, resolved {}", seen_nodes, node_map.len());

    let mut outside = 0usize;
    for way in ways {
        let coords: Vec<Coord<f64>> = way
            .refs
            .iter()
            .filter_map(|r| node_map.get(r).copied())
            .collect();
        if coords.len() < 2 {
            continue;
        }

        let line = LineString::from(coords);
        if !line.bounding_rect().is_some_and(|extent| extent.intersects(&window)) {
            outside += 1;
            continue;
        }

        let closed = way.refs.len() >= 4
            && way.refs.first() == way.refs.last()
            && line.0.len() == way.refs.len();
        let geometry = if closed && is_area(&way.tags) {
            Geometry::Polygon(Polygon::new(line, vec![]))
        } else {
            Geometry::LineString(line)
        };

        let mut properties = way.tags;
        properties.insert("osm_id".to_string(), Value::from(way.id));
        layers.push(Feature {
            geometry,
            properties,
        });
    }

    info!(
        "OSM extract: {} ways seen ({} outside the window), {} points, {} lines, {} polygons",
        seen_ways,
        outside,
        layers.points.len(),
        layers.lines.len(),
        layers.polygons.len()
    );
    Ok(layers)
}

fn collect_tags<'a>(tags: impl Iterator<Item = (&'a str, &'a str)>) -> Map<String, Value> {
    tags.map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

fn is_area(tags: &Map<String, Value>) -> bool {
    if let Some(Value::String(area)) = tags.get("area") {
        return area == "yes";
    }
    tags.keys().any(|k| AREA_KEYS.contains(&k.as_str()))
}
