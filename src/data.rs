use crate::error::{Error, Result};
use crate::projection::{reproject_geometry, Crs};
use crate::types::{BoundingBox, Feature, FeatureCollection, Layers};
use geo::{BoundingRect, Geometry, Intersects};
use geojson::GeoJson;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

/// Loads a dataset and splits it into point, line and polygon layers.
///
/// Features whose bounding rectangle misses `bbox` are dropped. The
/// returned layers are in the dataset's CRS: WGS84 for OSM and GeoJSON,
/// `crs_override` (or WGS84) for shapefiles.
pub fn load_layers(path: &Path, bbox: &BoundingBox, crs_override: Option<Crs>) -> Result<Layers> {
    ensure_exists(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|s| s.to_lowercase())
        .ok_or_else(|| Error::UnsupportedFormat(format!("{:?} has no extension", path)))?;

    let layers = match extension.as_str() {
        "pbf" => crate::osm::load_osm_pbf(path, bbox)?,
        "json" | "geojson" => load_geojson(path, bbox, Crs::Wgs84)?,
        "shp" => load_shapefile(path, bbox, crs_override.unwrap_or(Crs::Wgs84))?,
        other => return Err(Error::UnsupportedFormat(other.to_string())),
    };

    info!(
        points = layers.points.len(),
        lines = layers.lines.len(),
        polygons = layers.polygons.len(),
        "Loaded {:?}",
        path
    );
    Ok(layers)
}

pub fn ensure_exists(path: &Path) -> Result<()> {
    if !path.exists() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    Ok(())
}

/// Reads a GeoJSON `FeatureCollection` without any filtering.
pub fn read_geojson_collection(path: &Path, crs: Crs) -> Result<FeatureCollection> {
    ensure_exists(path)?;
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let reader = BufReader::new(file);

    // Loads the whole document into memory.
    let geojson = GeoJson::from_reader(reader)?;
    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => {
            return Err(Error::UnsupportedFormat(
                "GeoJSON must be a FeatureCollection".to_string(),
            ))
        }
    };

    let mut features = Vec::with_capacity(collection.features.len());
    for feature in collection.features {
        let Some(geometry) = feature.geometry else {
            continue;
        };
        let geometry: Geometry<f64> = match geometry.value.try_into() {
            Ok(g) => g,
            Err(e) => {
                warn!("Skipping feature with unconvertible geometry: {}", e);
                continue;
            }
        };
        features.push(Feature {
            geometry,
            properties: feature.properties.unwrap_or_default(),
        });
    }

    Ok(FeatureCollection::new(crs, features))
}

fn load_geojson(path: &Path, bbox: &BoundingBox, crs: Crs) -> Result<Layers> {
    debug!("Loading GeoJSON from {:?}", path);
    let collection = read_geojson_collection(path, crs)?;
    Ok(split_layers(collection, bbox))
}

fn load_shapefile(path: &Path, bbox: &BoundingBox, crs: Crs) -> Result<Layers> {
    debug!("Loading shapefile from {:?}", path);
    let mut reader = shapefile::Reader::from_path(path)?;

    let mut features = Vec::new();
    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;
        let Some(geometry) = shape_to_geometry(shape) else {
            continue;
        };
        features.push(Feature {
            geometry,
            properties: record_to_properties(record),
        });
    }

    Ok(split_layers(FeatureCollection::new(crs, features), bbox))
}

fn shape_to_geometry(shape: shapefile::Shape) -> Option<Geometry<f64>> {
    use shapefile::Shape;

    let geometry = match shape {
        Shape::Point(p) => Geometry::Point(p.into()),
        Shape::PointM(p) => Geometry::Point(p.into()),
        Shape::PointZ(p) => Geometry::Point(p.into()),
        Shape::Multipoint(mp) => Geometry::MultiPoint(mp.into()),
        Shape::MultipointM(mp) => Geometry::MultiPoint(mp.into()),
        Shape::MultipointZ(mp) => Geometry::MultiPoint(mp.into()),
        Shape::Polyline(pl) => Geometry::MultiLineString(pl.into()),
        Shape::PolylineM(pl) => Geometry::MultiLineString(pl.into()),
        Shape::PolylineZ(pl) => Geometry::MultiLineString(pl.into()),
        Shape::Polygon(polygon) => match polygon.try_into() {
            Ok(mp) => Geometry::MultiPolygon(mp),
            Err(e) => {
                warn!("Failed to convert polygon: {:?}", e);
                return None;
            }
        },
        Shape::PolygonM(polygon) => match polygon.try_into() {
            Ok(mp) => Geometry::MultiPolygon(mp),
            Err(e) => {
                warn!("Failed to convert polygonM: {:?}", e);
                return None;
            }
        },
        Shape::PolygonZ(polygon) => match polygon.try_into() {
            Ok(mp) => Geometry::MultiPolygon(mp),
            Err(e) => {
                warn!("Failed to convert polygonZ: {:?}", e);
                return None;
            }
        },
        _ => return None, // NullShape, Multipatch
    };
    Some(geometry)
}

fn record_to_properties(record: shapefile::dbase::Record) -> Map<String, Value> {
    use shapefile::dbase::FieldValue;

    let fields: HashMap<String, FieldValue> = record.into();
    let mut properties = Map::new();
    for (name, value) in fields {
        let json = match value {
            FieldValue::Character(Some(s)) | FieldValue::Memo(s) => {
                Value::String(s.trim().to_string())
            }
            FieldValue::Numeric(Some(n)) | FieldValue::Double(n) => Value::from(n),
            FieldValue::Float(Some(f)) => Value::from(f as f64),
            FieldValue::Integer(i) => Value::from(i),
            FieldValue::Logical(Some(b)) => Value::Bool(b),
            _ => continue,
        };
        properties.insert(name, json);
    }
    properties
}

/// Drops features outside `bbox` and routes the rest into layers.
pub fn split_layers(collection: FeatureCollection, bbox: &BoundingBox) -> Layers {
    let crs = collection.crs;
    let mut layers = Layers::empty(crs);
    let window = bbox.rect();

    for feature in collection.features {
        let in_window = {
            let geographic = reproject_geometry(&feature.geometry, crs, Crs::Wgs84);
            geographic
                .bounding_rect()
                .map(|r| r.intersects(&window))
                .unwrap_or(false)
        };
        if in_window {
            layers.push(feature);
        }
    }
    layers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SAMPLE: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "properties": {"highway": "motorway"},
     "geometry": {"type": "LineString", "coordinates": [[-117.18, 32.72], [-117.12, 32.78]]}},
    {"type": "Feature", "properties": {"aeroway": "aerodrome"},
     "geometry": {"type": "Polygon", "coordinates": [[[-117.19, 32.73], [-117.18, 32.73], [-117.18, 32.74], [-117.19, 32.73]]]}},
    {"type": "Feature", "properties": {"highway": "motorway"},
     "geometry": {"type": "LineString", "coordinates": [[-116.50, 33.00], [-116.40, 33.10]]}},
    {"type": "Feature", "properties": {"amenity": "school"},
     "geometry": {"type": "Point", "coordinates": [-117.15, 32.75]}},
    {"type": "Feature", "properties": {}, "geometry": null}
  ]
}"#;

    fn write_sample(ext: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(ext).tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_geojson_split_and_bbox_filter() {
        let file = write_sample(".geojson");
        let bbox: BoundingBox = "-117.20,32.70,-117.10,32.80".parse().unwrap();
        let layers = load_layers(file.path(), &bbox, None).unwrap();
        assert_eq!(layers.lines.len(), 1, "the far-away motorway is outside the bbox");
        assert_eq!(layers.polygons.len(), 1);
        assert_eq!(layers.points.len(), 1);
        assert_eq!(layers.lines.crs, Crs::Wgs84);
    }

    #[test]
    fn test_geojson_ignores_crs_override() {
        let file = write_sample(".geojson");
        let bbox: BoundingBox = "-117.20,32.70,-117.10,32.80".parse().unwrap();
        let layers = load_layers(file.path(), &bbox, Some(Crs::SAN_DIEGO_UTM)).unwrap();
        assert_eq!(layers.lines.crs, Crs::Wgs84);
        assert_eq!(layers.lines.len(), 1);
    }

    #[test]
    fn test_missing_file_is_reported() {
        let bbox: BoundingBox = "-117.20,32.70,-117.10,32.80".parse().unwrap();
        let result = load_layers(Path::new("/nonexistent/socal.osm.pbf"), &bbox, None);
        assert!(matches!(result, Err(Error::MissingInput(_))));
    }

    #[test]
    fn test_unknown_extension_is_rejected() {
        let file = write_sample(".kml");
        let bbox: BoundingBox = "-117.20,32.70,-117.10,32.80".parse().unwrap();
        assert!(matches!(
            load_layers(file.path(), &bbox, None),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_non_collection_geojson_is_rejected() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        file.write_all(br#"{"type": "Point", "coordinates": [0.0, 0.0]}"#)
            .unwrap();
        assert!(matches!(
            read_geojson_collection(file.path(), Crs::Wgs84),
            Err(Error::UnsupportedFormat(_))
        ));
    }
}
