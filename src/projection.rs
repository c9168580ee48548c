//! Coordinate reference systems used by the pipeline.
//!
//! Geographic WGS84 is used for bounding boxes and serialized output; every
//! distance and area computation happens in a UTM zone. The transverse
//! Mercator series follow Snyder, "Map Projections: A Working Manual"
//! (USGS PP 1395), which is accurate to well under a millimetre inside a zone.

use crate::error::{Error, Result};
use crate::types::{Feature, FeatureCollection};
use geo::{Area, Coord, Geometry, MapCoords, MultiPolygon};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const WGS84_A: f64 = 6_378_137.0;
const WGS84_F: f64 = 1.0 / 298.257_223_563;
const UTM_K0: f64 = 0.9996;
const UTM_FALSE_EASTING: f64 = 500_000.0;
const UTM_FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

/// A coordinate reference system the pipeline knows how to convert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Crs {
    /// Geographic longitude/latitude, EPSG:4326.
    Wgs84,
    /// UTM on WGS84, EPSG:326NN (north) or EPSG:327NN (south).
    Utm { zone: u8, north: bool },
}

impl Crs {
    /// San Diego County sits in UTM zone 11N (EPSG:32611).
    pub const SAN_DIEGO_UTM: Crs = Crs::Utm {
        zone: 11,
        north: true,
    };

    pub fn utm_zone_for(lon: f64, lat: f64) -> Crs {
        let zone = (((lon + 180.0) / 6.0).floor() as i32).clamp(0, 59) + 1;
        Crs::Utm {
            zone: zone as u8,
            north: lat >= 0.0,
        }
    }

    pub fn epsg(&self) -> u32 {
        match *self {
            Crs::Wgs84 => 4326,
            Crs::Utm { zone, north: true } => 32600 + zone as u32,
            Crs::Utm { zone, north: false } => 32700 + zone as u32,
        }
    }

    pub fn is_geographic(&self) -> bool {
        matches!(self, Crs::Wgs84)
    }

    /// Converts a coordinate in this CRS to WGS84 longitude/latitude.
    pub fn to_wgs84(&self, c: Coord<f64>) -> Coord<f64> {
        match *self {
            Crs::Wgs84 => c,
            Crs::Utm { zone, north } => utm_inverse(c, zone, north),
        }
    }

    /// Converts a WGS84 longitude/latitude into this CRS.
    pub fn from_wgs84(&self, c: Coord<f64>) -> Coord<f64> {
        match *self {
            Crs::Wgs84 => c,
            Crs::Utm { zone, north } => utm_forward(c, zone, north),
        }
    }

    pub fn transform(&self, to: Crs, c: Coord<f64>) -> Coord<f64> {
        if *self == to {
            return c;
        }
        to.from_wgs84(self.to_wgs84(c))
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.epsg())
    }
}

impl FromStr for Crs {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let code = trimmed
            .strip_prefix("EPSG:")
            .or_else(|| trimmed.strip_prefix("epsg:"))
            .unwrap_or(trimmed);
        let code: u32 = code
            .parse()
            .map_err(|_| Error::UnsupportedCrs(s.to_string()))?;
        match code {
            4326 => Ok(Crs::Wgs84),
            32601..=32660 => Ok(Crs::Utm {
                zone: (code - 32600) as u8,
                north: true,
            }),
            32701..=32760 => Ok(Crs::Utm {
                zone: (code - 32700) as u8,
                north: false,
            }),
            _ => Err(Error::UnsupportedCrs(s.to_string())),
        }
    }
}

impl TryFrom<String> for Crs {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.to_string()
    }
}

fn central_meridian(zone: u8) -> f64 {
    (zone as f64 - 1.0) * 6.0 - 180.0 + 3.0
}

fn eccentricity_squared() -> f64 {
    WGS84_F * (2.0 - WGS84_F)
}

fn meridian_arc(phi: f64) -> f64 {
    let e2 = eccentricity_squared();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e4 / 32.0 + 45.0 * e6 / 1024.0) * (2.0 * phi).sin()
            + (15.0 * e4 / 256.0 + 45.0 * e6 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e6 / 3072.0) * (6.0 * phi).sin())
}

fn utm_forward(c: Coord<f64>, zone: u8, north: bool) -> Coord<f64> {
    let e2 = eccentricity_squared();
    let ep2 = e2 / (1.0 - e2);

    let phi = c.y.to_radians();
    let dlambda = (c.x - central_meridian(zone)).to_radians();

    let (sin_phi, cos_phi) = phi.sin_cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let cc = ep2 * cos_phi * cos_phi;
    let a = cos_phi * dlambda;
    let m = meridian_arc(phi);

    let x = UTM_K0
        * n
        * (a + (1.0 - t + cc) * a.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * cc - 58.0 * ep2) * a.powi(5) / 120.0)
        + UTM_FALSE_EASTING;

    let y = UTM_K0
        * (m + n
            * tan_phi
            * (a * a / 2.0
                + (5.0 - t + 9.0 * cc + 4.0 * cc * cc) * a.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * cc - 330.0 * ep2) * a.powi(6) / 720.0));

    let y = if north {
        y
    } else {
        y + UTM_FALSE_NORTHING_SOUTH
    };

    Coord { x, y }
}

fn utm_inverse(c: Coord<f64>, zone: u8, north: bool) -> Coord<f64> {
    let e2 = eccentricity_squared();
    let e4 = e2 * e2;
    let e6 = e4 * e2;
    let ep2 = e2 / (1.0 - e2);
    let e1 = (1.0 - (1.0 - e2).sqrt()) / (1.0 + (1.0 - e2).sqrt());

    let x = c.x - UTM_FALSE_EASTING;
    let y = if north {
        c.y
    } else {
        c.y - UTM_FALSE_NORTHING_SOUTH
    };

    let m = y / UTM_K0;
    let mu = m / (WGS84_A * (1.0 - e2 / 4.0 - 3.0 * e4 / 64.0 - 5.0 * e6 / 256.0));

    // Footpoint latitude.
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1 * e1 / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin()
        + (1097.0 * e1.powi(4) / 512.0) * (8.0 * mu).sin();

    let (sin1, cos1) = phi1.sin_cos();
    let tan1 = phi1.tan();
    let n1 = WGS84_A / (1.0 - e2 * sin1 * sin1).sqrt();
    let t1 = tan1 * tan1;
    let c1 = ep2 * cos1 * cos1;
    let r1 = WGS84_A * (1.0 - e2) / (1.0 - e2 * sin1 * sin1).powf(1.5);
    let d = x / (n1 * UTM_K0);

    let phi = phi1
        - (n1 * tan1 / r1)
            * (d * d / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0
                + (61.0 + 90.0 * t1 + 298.0 * c1 + 45.0 * t1 * t1 - 252.0 * ep2 - 3.0 * c1 * c1)
                    * d.powi(6)
                    / 720.0);

    let lambda = (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
        + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1) * d.powi(5)
            / 120.0)
        / cos1;

    Coord {
        x: central_meridian(zone) + lambda.to_degrees(),
        y: phi.to_degrees(),
    }
}

pub fn reproject_geometry(geometry: &Geometry<f64>, from: Crs, to: Crs) -> Geometry<f64> {
    if from == to {
        return geometry.clone();
    }
    geometry.map_coords(|c| from.transform(to, c))
}

pub fn reproject_multipolygon(mp: &MultiPolygon<f64>, from: Crs, to: Crs) -> MultiPolygon<f64> {
    if from == to {
        return mp.clone();
    }
    mp.map_coords(|c| from.transform(to, c))
}

/// Returns a new collection with every geometry expressed in `to`.
pub fn reproject_collection(collection: &FeatureCollection, to: Crs) -> FeatureCollection {
    if collection.crs == to {
        return collection.clone();
    }
    let features = collection
        .features
        .iter()
        .map(|f| Feature {
            geometry: reproject_geometry(&f.geometry, collection.crs, to),
            properties: f.properties.clone(),
        })
        .collect();
    FeatureCollection::new(to, features)
}

/// Area of a geometry held in `crs`, measured in the metric `working` CRS.
pub fn projected_area_km2(mp: &MultiPolygon<f64>, crs: Crs, working: Crs) -> f64 {
    reproject_multipolygon(mp, crs, working).unsigned_area() / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64, tol: f64) {
        assert!((a - b).abs() <= tol, "{} vs {} (tolerance {})", a, b, tol);
    }

    #[test]
    fn test_central_meridian_on_equator() {
        let crs = Crs::Utm {
            zone: 11,
            north: true,
        };
        let p = crs.from_wgs84(Coord { x: -117.0, y: 0.0 });
        assert_close(p.x, 500_000.0, 1e-6);
        assert_close(p.y, 0.0, 1e-6);
    }

    #[test]
    fn test_san_diego_known_point() {
        // Reference values for (-117.1611, 32.7157) in EPSG:32611.
        let p = Crs::SAN_DIEGO_UTM.from_wgs84(Coord {
            x: -117.1611,
            y: 32.7157,
        });
        assert_close(p.x, 484_902.6, 1.0);
        assert_close(p.y, 3_619_781.6, 1.0);
    }

    #[test]
    fn test_round_trip_preserves_coordinates() {
        let crs = Crs::SAN_DIEGO_UTM;
        for &(lon, lat) in &[(-117.2, 32.7), (-116.1, 33.5), (-117.6, 32.53)] {
            let back = crs.to_wgs84(crs.from_wgs84(Coord { x: lon, y: lat }));
            assert_close(back.x, lon, 1e-7);
            assert_close(back.y, lat, 1e-7);
        }
    }

    #[test]
    fn test_southern_hemisphere_uses_false_northing() {
        let crs = Crs::utm_zone_for(151.2, -33.9);
        assert_eq!(crs, Crs::Utm { zone: 56, north: false });
        let p = crs.from_wgs84(Coord { x: 151.2, y: -33.9 });
        assert!(p.y > 6_000_000.0 && p.y < 10_000_000.0);
        let back = crs.to_wgs84(p);
        assert_close(back.x, 151.2, 1e-7);
        assert_close(back.y, -33.9, 1e-7);
    }

    #[test]
    fn test_parse_epsg_codes() {
        assert_eq!("EPSG:4326".parse::<Crs>().unwrap(), Crs::Wgs84);
        assert_eq!("32611".parse::<Crs>().unwrap(), Crs::SAN_DIEGO_UTM);
        assert_eq!(
            "epsg:32755".parse::<Crs>().unwrap(),
            Crs::Utm { zone: 55, north: false }
        );
        assert!(matches!(
            "EPSG:2230".parse::<Crs>(),
            Err(Error::UnsupportedCrs(_))
        ));
        assert_eq!(Crs::SAN_DIEGO_UTM.to_string(), "EPSG:32611");
    }

    #[test]
    fn test_projected_area_of_one_hundredth_degree() {
        let square = MultiPolygon::new(vec![geo::Rect::new(
            Coord { x: -117.15, y: 32.70 },
            Coord { x: -117.14, y: 32.71 },
        )
        .to_polygon()]);
        let km2 = projected_area_km2(&square, Crs::Wgs84, Crs::SAN_DIEGO_UTM);
        // ~0.937 km east-west by ~1.109 km north-south.
        assert_close(km2, 1.04, 0.01);
    }
}
