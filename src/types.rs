use crate::error::{Error, Result};
use crate::projection::Crs;
use geo::{Coord, Geometry, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    pub geometry: Geometry<f64>,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: impl Into<Geometry<f64>>) -> Self {
        Self {
            geometry: geometry.into(),
            properties: Map::new(),
        }
    }

    pub fn with_property(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.properties.insert(key.to_string(), value.into());
        self
    }

    /// Attribute rendered as text; strings are returned unquoted.
    pub fn property_str(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// Ordered features sharing one CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureCollection {
    pub crs: Crs,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(crs: Crs, features: Vec<Feature>) -> Self {
        Self { crs, features }
    }

    pub fn empty(crs: Crs) -> Self {
        Self::new(crs, Vec::new())
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn geometries(&self) -> impl Iterator<Item = &Geometry<f64>> {
        self.features.iter().map(|f| &f.geometry)
    }
}

/// Source layers a dataset is split into, by geometry type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerKind {
    Points,
    Lines,
    Polygons,
}

impl LayerKind {
    pub fn of(geometry: &Geometry<f64>) -> Option<LayerKind> {
        match geometry {
            Geometry::Point(_) | Geometry::MultiPoint(_) => Some(LayerKind::Points),
            Geometry::Line(_) | Geometry::LineString(_) | Geometry::MultiLineString(_) => {
                Some(LayerKind::Lines)
            }
            Geometry::Polygon(_)
            | Geometry::MultiPolygon(_)
            | Geometry::Rect(_)
            | Geometry::Triangle(_) => Some(LayerKind::Polygons),
            Geometry::GeometryCollection(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Layers {
    pub points: FeatureCollection,
    pub lines: FeatureCollection,
    pub polygons: FeatureCollection,
}

impl Layers {
    pub fn empty(crs: Crs) -> Self {
        Self {
            points: FeatureCollection::empty(crs),
            lines: FeatureCollection::empty(crs),
            polygons: FeatureCollection::empty(crs),
        }
    }

    pub fn layer(&self, kind: LayerKind) -> &FeatureCollection {
        match kind {
            LayerKind::Points => &self.points,
            LayerKind::Lines => &self.lines,
            LayerKind::Polygons => &self.polygons,
        }
    }

    /// Routes a feature to the layer matching its geometry type.
    /// Geometry collections are flattened into their members.
    pub fn push(&mut self, feature: Feature) {
        if let Geometry::GeometryCollection(gc) = feature.geometry {
            for member in gc {
                self.push(Feature {
                    geometry: member,
                    properties: feature.properties.clone(),
                });
            }
            return;
        }
        match LayerKind::of(&feature.geometry) {
            Some(LayerKind::Points) => self.points.features.push(feature),
            Some(LayerKind::Lines) => self.lines.features.push(feature),
            Some(LayerKind::Polygons) => self.polygons.features.push(feature),
            None => {}
        }
    }

    pub fn total(&self) -> usize {
        self.points.len() + self.lines.len() + self.polygons.len()
    }
}

/// West, south, east, north in geographic degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl BoundingBox {
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> Result<Self> {
        let bbox = Self {
            west,
            south,
            east,
            north,
        };
        bbox.validate()?;
        Ok(bbox)
    }

    pub fn validate(&self) -> Result<()> {
        let finite = [self.west, self.south, self.east, self.north]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.west >= self.east || self.south >= self.north {
            return Err(Error::InvalidBbox(self.to_string()));
        }
        if self.south < -90.0 || self.north > 90.0 || self.west < -180.0 || self.east > 180.0 {
            return Err(Error::InvalidBbox(self.to_string()));
        }
        Ok(())
    }

    pub fn rect(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.west,
                y: self.south,
            },
            Coord {
                x: self.east,
                y: self.north,
            },
        )
    }

    pub fn polygon(&self) -> Polygon<f64> {
        self.rect().to_polygon()
    }

    pub fn center(&self) -> Coord<f64> {
        self.rect().center()
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{},{}", self.west, self.south, self.east, self.north)
    }
}

impl FromStr for BoundingBox {
    type Err = Error;

    /// Parses `west,south,east,north`.
    fn from_str(s: &str) -> Result<Self> {
        let values: Vec<f64> = s
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<std::result::Result<_, _>>()
            .map_err(|_| Error::InvalidBbox(s.to_string()))?;
        match values.as_slice() {
            [w, s_, e, n] => BoundingBox::new(*w, *s_, *e, *n),
            _ => Err(Error::InvalidBbox(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StudyArea {
    pub bbox: BoundingBox,
}

impl StudyArea {
    pub fn new(bbox: BoundingBox) -> Self {
        Self { bbox }
    }

    pub fn polygon(&self) -> Polygon<f64> {
        self.bbox.polygon()
    }

    pub fn multipolygon(&self) -> MultiPolygon<f64> {
        MultiPolygon::new(vec![self.polygon()])
    }

    pub fn area_km2(&self, working: Crs) -> f64 {
        crate::projection::projected_area_km2(&self.multipolygon(), Crs::Wgs84, working)
    }
}

/// Buffered, unioned and clipped footprint of one hazard type.
#[derive(Debug, Clone, PartialEq)]
pub struct ExclusionZone {
    pub hazard: String,
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

impl ExclusionZone {
    pub fn empty(hazard: &str) -> Self {
        Self {
            hazard: hazard.to_string(),
            geometry: MultiPolygon::new(Vec::new()),
            crs: Crs::Wgs84,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }

    /// Name of the output layer this zone is written to.
    pub fn layer_name(&self) -> String {
        format!("{}_zone", self.hazard)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SafeZone {
    pub geometry: MultiPolygon<f64>,
    pub crs: Crs,
}

impl SafeZone {
    pub fn is_empty(&self) -> bool {
        self.geometry.0.is_empty()
    }
}
