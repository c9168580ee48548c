//! Digital elevation models and low-elevation flood zones.
//!
//! A single-band GeoTIFF is read with the `tiff` crate. Georeferencing comes
//! from the ModelPixelScale and ModelTiepoint tags, the CRS from the GeoKey
//! directory. Cells at or below a band's threshold are merged into polygons.

use crate::config::FloodBand;
use crate::error::{Error, Result};
use crate::projection::{reproject_geometry, reproject_multipolygon, Crs};
use crate::types::{ExclusionZone, StudyArea};
use geo::{BooleanOps, BoundingRect, Coord, Geometry, MultiPolygon, Polygon, Rect};
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::ops::Range;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;
use tracing::{debug, info};

const MODEL_PIXEL_SCALE_TAG: u16 = 33550;
const MODEL_TIEPOINT_TAG: u16 = 33922;
const GEO_KEY_DIRECTORY_TAG: u16 = 34735;
const GDAL_NODATA_TAG: u16 = 42113;

const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_KEY: u16 = 3072;

/// North-up elevation grid in metres.
#[derive(Debug, Clone)]
pub struct Dem {
    pub width: usize,
    pub height: usize,
    values: Vec<f64>,
    /// Upper-left corner of the upper-left cell.
    pub origin: Coord<f64>,
    pub cell_width: f64,
    pub cell_height: f64,
    pub crs: Crs,
    pub nodata: Option<f64>,
}

impl Dem {
    pub fn new(
        width: usize,
        height: usize,
        values: Vec<f64>,
        origin: Coord<f64>,
        cell_size: (f64, f64),
        crs: Crs,
        nodata: Option<f64>,
    ) -> Result<Self> {
        if values.len() != width * height {
            return Err(Error::UnsupportedFormat(format!(
                "DEM has {} samples for a {}x{} grid (multi-band rasters are not supported)",
                values.len(),
                width,
                height
            )));
        }
        let (cell_width, cell_height) = cell_size;
        if !(cell_width > 0.0 && cell_height > 0.0) {
            return Err(Error::UnsupportedFormat(format!(
                "DEM cell size must be positive, got {}x{}",
                cell_width, cell_height
            )));
        }
        Ok(Self {
            width,
            height,
            values,
            origin,
            cell_width,
            cell_height,
            crs,
            nodata,
        })
    }

    /// Elevation of a cell; `None` for nodata, NaN or out of range.
    pub fn elevation(&self, col: usize, row: usize) -> Option<f64> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let value = self.values[row * self.width + col];
        if value.is_nan() || self.nodata == Some(value) {
            return None;
        }
        Some(value)
    }

    pub fn extent(&self) -> Rect<f64> {
        Rect::new(
            Coord {
                x: self.origin.x,
                y: self.origin.y - self.height as f64 * self.cell_height,
            },
            Coord {
                x: self.origin.x + self.width as f64 * self.cell_width,
                y: self.origin.y,
            },
        )
    }

    /// Columns and rows of the cells overlapping `extent`.
    fn cell_range(&self, extent: Rect<f64>) -> (Range<usize>, Range<usize>) {
        let clamp = |v: f64, max: usize| (v.max(0.0) as usize).min(max);
        let cols = clamp(((extent.min().x - self.origin.x) / self.cell_width).floor(), self.width)
            ..clamp(((extent.max().x - self.origin.x) / self.cell_width).ceil(), self.width);
        let rows = clamp(((self.origin.y - extent.max().y) / self.cell_height).floor(), self.height)
            ..clamp(((self.origin.y - extent.min().y) / self.cell_height).ceil(), self.height);
        (cols, rows)
    }

    /// Rectangle covering columns `cols` of rows `rows`.
    fn block(&self, cols: (usize, usize), rows: (usize, usize)) -> Polygon<f64> {
        Rect::new(
            Coord {
                x: self.origin.x + cols.0 as f64 * self.cell_width,
                y: self.origin.y - rows.1 as f64 * self.cell_height,
            },
            Coord {
                x: self.origin.x + cols.1 as f64 * self.cell_width,
                y: self.origin.y - rows.0 as f64 * self.cell_height,
            },
        )
        .to_polygon()
    }
}

/// Reads a single-band GeoTIFF DEM. `crs_override` wins over the GeoKeys.
pub fn read_dem(path: &Path, crs_override: Option<Crs>) -> Result<Dem> {
    if !path.exists() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| Error::io(path, e))?;
    let mut decoder = Decoder::new(BufReader::new(file))?;

    let (width, height) = decoder.dimensions()?;
    let values: Vec<f64> = match decoder.read_image()? {
        DecodingResult::F32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::F64(buf) => buf,
        DecodingResult::U8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::U32(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I8(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I16(buf) => buf.into_iter().map(f64::from).collect(),
        DecodingResult::I32(buf) => buf.into_iter().map(f64::from).collect(),
        _ => {
            return Err(Error::UnsupportedFormat(format!(
                "{:?}: unsupported DEM sample type",
                path
            )))
        }
    };

    let scale = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_PIXEL_SCALE_TAG)).ok();
    let tiepoint = decoder.get_tag_f64_vec(Tag::from_u16_exhaustive(MODEL_TIEPOINT_TAG)).ok();
    let (origin, cell_size) = match (scale, tiepoint) {
        // tiepoint: [I, J, K, X, Y, Z], scale: [ScaleX, ScaleY, ScaleZ]
        (Some(scale), Some(tie)) if scale.len() >= 2 && tie.len() >= 6 => (
            Coord {
                x: tie[3] - tie[0] * scale[0],
                y: tie[4] + tie[1] * scale[1],
            },
            (scale[0], scale[1]),
        ),
        _ => {
            return Err(Error::UnsupportedFormat(format!(
                "{:?} has no ModelPixelScale/ModelTiepoint tags",
                path
            )))
        }
    };

    let nodata: Option<f64> = decoder
        .get_tag_ascii_string(Tag::from_u16_exhaustive(GDAL_NODATA_TAG))
        .ok()
        .and_then(|s| s.trim_matches(|c: char| c.is_whitespace() || c == '\0').parse().ok());

    let crs = match crs_override {
        Some(crs) => crs,
        None => geokey_crs(&mut decoder).ok_or_else(|| {
            Error::UnsupportedCrs(format!(
                "{:?} has no supported EPSG GeoKey; set flood.crs",
                path
            ))
        })?,
    };

    debug!(width, height, %crs, ?nodata, "Read DEM {:?}", path);
    Dem::new(width as usize, height as usize, values, origin, cell_size, crs, nodata)
}

/// EPSG code from the GeoKey directory, projected before geographic.
fn geokey_crs<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<Crs> {
    let keys = decoder.get_tag_u16_vec(Tag::from_u16_exhaustive(GEO_KEY_DIRECTORY_TAG)).ok()?;
    // Four header shorts, then (key, location, count, value) entries.
    let entries: Vec<&[u16]> = keys.get(4..)?.chunks_exact(4).collect();
    [PROJECTED_CS_TYPE_KEY, GEOGRAPHIC_TYPE_KEY]
        .iter()
        .find_map(|wanted| {
            entries
                .iter()
                .find(|e| e[0] == *wanted && e[1] == 0)
                .and_then(|e| e[3].to_string().parse().ok())
        })
}

/// Cells at or below `max_elevation` merged into polygons, in the DEM CRS.
///
/// Only cells overlapping `extent` are considered when one is given.
pub fn low_elevation_polygons(dem: &Dem, max_elevation: f64, extent: Option<Rect<f64>>) -> MultiPolygon<f64> {
    let (cols, rows) = match extent {
        Some(extent) => dem.cell_range(extent),
        None => (0..dem.width, 0..dem.height),
    };

    // Identical runs in consecutive rows stack into one block.
    let mut pieces: Vec<Polygon<f64>> = Vec::new();
    let mut open: HashMap<(usize, usize), usize> = HashMap::new();
    for row in rows.clone() {
        let mut next = HashMap::new();
        for run in row_runs(dem, row, cols.clone(), max_elevation) {
            let top = open.remove(&run).unwrap_or(row);
            next.insert(run, top);
        }
        for (run, top) in open.drain() {
            pieces.push(dem.block(run, (top, row)));
        }
        open = next;
    }
    for (run, top) in open {
        pieces.push(dem.block(run, (top, rows.end)));
    }

    if pieces.is_empty() {
        return MultiPolygon::new(Vec::new());
    }
    geo::unary_union(&pieces)
}

/// Half-open column runs of low cells in one row.
fn row_runs(dem: &Dem, row: usize, cols: Range<usize>, max_elevation: f64) -> Vec<(usize, usize)> {
    let mut runs = Vec::new();
    let mut start: Option<usize> = None;
    for col in cols.clone() {
        let low = dem.elevation(col, row).is_some_and(|e| e <= max_elevation);
        match (low, start) {
            (true, None) => start = Some(col),
            (false, Some(s)) => {
                runs.push((s, col));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        runs.push((s, cols.end));
    }
    runs
}

/// One exclusion zone per flood band, in WGS84 and clipped to the study area.
pub fn build_flood_zones(
    dem: &Dem,
    bands: &[FloodBand],
    study_area: &StudyArea,
) -> BTreeMap<String, ExclusionZone> {
    let study_polygon = study_area.polygon();
    let extent = reproject_geometry(&Geometry::Polygon(study_polygon.clone()), Crs::Wgs84, dem.crs)
        .bounding_rect();

    let mut zones = BTreeMap::new();
    for band in bands {
        let low = low_elevation_polygons(dem, band.max_elevation_m, extent);
        let zone = if low.0.is_empty() {
            ExclusionZone::empty(&band.name)
        } else {
            let geographic = reproject_multipolygon(&low, dem.crs, Crs::Wgs84);
            ExclusionZone {
                hazard: band.name.clone(),
                geometry: geographic.intersection(&study_polygon),
                crs: Crs::Wgs84,
            }
        };
        info!(
            band = %band.name,
            max_elevation_m = band.max_elevation_m,
            polygons = zone.geometry.0.len(),
            "Built flood zone"
        );
        zones.insert(band.name.clone(), zone);
    }
    zones
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FloodConfig;
    use crate::types::BoundingBox;
    use geo::Area;
    use tiff::encoder::colortype::Gray32Float;
    use tiff::encoder::TiffEncoder;

    /// 10x10 grid of 0.01° cells over (-117.20, 32.70, -117.10, 32.80):
    /// columns 0-2 at 5 m, 3-4 at 20 m, the rest at 100 m.
    fn coastal_dem() -> Dem {
        let values = (0..100)
            .map(|i| match i % 10 {
                0..=2 => 5.0,
                3..=4 => 20.0,
                _ => 100.0,
            })
            .collect();
        Dem::new(
            10,
            10,
            values,
            Coord { x: -117.20, y: 32.80 },
            (0.01, 0.01),
            Crs::Wgs84,
            None,
        )
        .unwrap()
    }

    #[test]
    fn test_polygonize_counts_cells_at_or_below_threshold() {
        // 3x3 UTM grid of 30 m cells; one nodata cell.
        let values = vec![
            5.0, 10.0, 50.0, //
            -9999.0, 9.0, 50.0, //
            f64::NAN, 11.0, 2.0,
        ];
        let dem = Dem::new(
            3,
            3,
            values,
            Coord { x: 480_000.0, y: 3_620_000.0 },
            (30.0, 30.0),
            Crs::SAN_DIEGO_UTM,
            Some(-9999.0),
        )
        .unwrap();

        assert_eq!(dem.elevation(0, 1), None);
        assert_eq!(dem.elevation(0, 2), None);
        assert_eq!(dem.elevation(1, 1), Some(9.0));

        let low = low_elevation_polygons(&dem, 10.0, None);
        // (0,0), (1,0), (1,1), (2,2)
        assert!((low.unsigned_area() - 4.0 * 900.0).abs() < 1e-6);
    }

    #[test]
    fn test_adjacent_cells_merge() {
        let dem = coastal_dem();
        let low = low_elevation_polygons(&dem, 30.0, None);
        assert_eq!(low.0.len(), 1);
        assert!((low.unsigned_area() - 0.05 * 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_extent_limits_cells() {
        let dem = coastal_dem();
        // Touches columns 0-1 and rows 5-9.
        let extent = Rect::new(Coord { x: -117.195, y: 32.705 }, Coord { x: -117.185, y: 32.745 });
        let low = low_elevation_polygons(&dem, 30.0, Some(extent));
        assert!((low.unsigned_area() - 0.02 * 0.05).abs() < 1e-9);
    }

    #[test]
    fn test_flood_zones_per_band() {
        let dem = coastal_dem();
        let area = StudyArea::new(BoundingBox::new(-117.20, 32.70, -117.10, 32.80).unwrap());
        let zones = build_flood_zones(&dem, &FloodConfig::default().bands, &area);

        assert_eq!(zones.len(), 2);
        assert!((zones["low_30m"].geometry.unsigned_area() - 0.005).abs() < 1e-9);
        assert!((zones["low_10m"].geometry.unsigned_area() - 0.003).abs() < 1e-9);
        assert_eq!(zones["low_10m"].layer_name(), "low_10m_zone");
    }

    #[test]
    fn test_band_with_no_low_cells_is_empty() {
        let dem = coastal_dem();
        let area = StudyArea::new(BoundingBox::new(-117.20, 32.70, -117.10, 32.80).unwrap());
        let mut bands = FloodConfig::default().bands;
        bands[0].max_elevation_m = 1.0;
        let zones = build_flood_zones(&dem, &bands[..1], &area);
        assert!(zones["low_30m"].is_empty());
    }

    #[test]
    fn test_read_geotiff_with_geokeys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dem.tif");

        let data: Vec<f32> = vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        {
            let file = File::create(&path).unwrap();
            let mut encoder = TiffEncoder::new(file).unwrap();
            let mut image = encoder.new_image::<Gray32Float>(3, 2).unwrap();
            let scale = vec![30.0f64, 30.0, 0.0];
            image
                .encoder()
                .write_tag(Tag::Unknown(MODEL_PIXEL_SCALE_TAG), scale.as_slice())
                .unwrap();
            let tiepoint = vec![0.0f64, 0.0, 0.0, 480_000.0, 3_620_000.0, 0.0];
            image
                .encoder()
                .write_tag(Tag::Unknown(MODEL_TIEPOINT_TAG), tiepoint.as_slice())
                .unwrap();
            let geokeys: Vec<u16> = vec![
                1, 1, 0, 3, //
                1024, 0, 1, 1, //
                2048, 0, 1, 4326, //
                3072, 0, 1, 32611,
            ];
            image
                .encoder()
                .write_tag(Tag::Unknown(GEO_KEY_DIRECTORY_TAG), geokeys.as_slice())
                .unwrap();
            image.write_data(&data).unwrap();
        }

        let dem = read_dem(&path, None).unwrap();
        assert_eq!((dem.width, dem.height), (3, 2));
        assert_eq!(dem.crs, Crs::SAN_DIEGO_UTM);
        assert_eq!(dem.origin, Coord { x: 480_000.0, y: 3_620_000.0 });
        assert_eq!(dem.elevation(2, 1), Some(6.0));
        assert_eq!(dem.extent().min(), Coord { x: 480_000.0, y: 3_619_940.0 });

        let overridden = read_dem(&path, Some(Crs::Wgs84)).unwrap();
        assert_eq!(overridden.crs, Crs::Wgs84);
    }

    #[test]
    fn test_missing_dem_is_reported() {
        assert!(matches!(
            read_dem(Path::new("/nonexistent/san_diego_dem.tif"), None),
            Err(Error::MissingInput(_))
        ));
    }
}
