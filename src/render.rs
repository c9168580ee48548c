//! Static map rendering.
//!
//! Geometry is drawn in the metric working CRS so the study area keeps its
//! ground proportions, then mapped linearly onto a `tiny_skia::Pixmap`.

use crate::config::ZoneStyle;
use crate::error::{Error, Result};
use crate::projection::{reproject_geometry, Crs};
use crate::types::{ExclusionZone, FeatureCollection, SafeZone, StudyArea};
use font8x8::{UnicodeFonts, BASIC_FONTS};
use geo::{BoundingRect, Coord, Geometry, LineString, MapCoords, MultiPolygon, Rect};
use image::{ImageBuffer, Rgba, RgbaImage};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tiny_skia::{Color, FillRule, Paint, PathBuilder, Pixmap, Shader, Stroke, Transform};
use tracing::{debug, info};

const BACKGROUND: &str = "#16213e";
const STUDY_FILL: &str = "#0f3460";
const STUDY_OUTLINE: &str = "#e0e0e0";
const SAFE_COLOR: &str = "#27ae60";
const SAFE_ALPHA: f32 = 0.25;
const FEATURE_ALPHA: f32 = 0.5;
const FEATURE_WIDTH: f32 = 1.5;
const OUTLINE_WIDTH: f32 = 2.0;
const POINT_RADIUS: f32 = 2.0;
const LEGEND_SWATCH: f32 = 24.0;
const LEGEND_MARGIN: f32 = 16.0;
/// font8x8 glyphs are drawn at twice their size.
const GLYPH_SCALE: f32 = 2.0;
const GLYPH_SIZE: f32 = 8.0 * GLYPH_SCALE;

/// Everything drawn on the map, in drawing order.
pub struct MapLayers<'a> {
    pub study_area: &'a StudyArea,
    pub safe_zone: &'a SafeZone,
    pub zones: &'a BTreeMap<String, ExclusionZone>,
    /// Raw hazard features, drawn faintly over the zones.
    pub features: &'a BTreeMap<String, FeatureCollection>,
    /// Zone colours and legend labels; zones are drawn in this order.
    pub styles: &'a [ZoneStyle],
}

/// Maps working-CRS coordinates to pixel coordinates.
struct Viewport {
    extent: Rect<f64>,
    width: u32,
    height: u32,
    crs: Crs,
}

impl Viewport {
    fn new(study_area: &StudyArea, crs: Crs, width: u32) -> Self {
        let projected = reproject_geometry(&Geometry::Polygon(study_area.polygon()), Crs::Wgs84, crs);
        let extent = projected.bounding_rect().unwrap_or_else(|| study_area.bbox.rect());
        let aspect = extent.height() / extent.width();
        let height = ((width as f64 * aspect).round() as u32).max(1);
        Self {
            extent,
            width,
            height,
            crs,
        }
    }

    fn to_pixel(&self, c: Coord<f64>) -> Coord<f64> {
        Coord {
            x: (c.x - self.extent.min().x) / self.extent.width() * self.width as f64,
            y: (self.extent.max().y - c.y) / self.extent.height() * self.height as f64,
        }
    }

    fn geometry_to_pixels(&self, geometry: &Geometry<f64>, crs: Crs) -> Geometry<f64> {
        reproject_geometry(geometry, crs, self.crs).map_coords(|c| self.to_pixel(c))
    }
}

fn paint(hex: &str, alpha: f32) -> Paint<'static> {
    let Rgba([r, g, b, _]) = hex_to_rgba(hex);
    let a = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    Paint {
        shader: Shader::SolidColor(Color::from_rgba8(r, g, b, a)),
        anti_alias: true,
        ..Default::default()
    }
}

fn push_ring(builder: &mut PathBuilder, ring: &LineString<f64>, close: bool) {
    let mut coords = ring.coords();
    let Some(first) = coords.next() else {
        return;
    };
    builder.move_to(first.x as f32, first.y as f32);
    for c in coords {
        builder.line_to(c.x as f32, c.y as f32);
    }
    if close {
        builder.close();
    }
}

/// Fills every ring of `polygons` (pixel space) as one even-odd path.
fn fill_polygons(pixmap: &mut Pixmap, polygons: &MultiPolygon<f64>, paint: &Paint) {
    let mut builder = PathBuilder::new();
    for polygon in polygons {
        push_ring(&mut builder, polygon.exterior(), true);
        for interior in polygon.interiors() {
            push_ring(&mut builder, interior, true);
        }
    }
    if let Some(path) = builder.finish() {
        pixmap.fill_path(&path, paint, FillRule::EvenOdd, Transform::default(), None);
    }
}

fn stroke_geometry(pixmap: &mut Pixmap, geometry: &Geometry<f64>, paint: &Paint, width: f32) {
    let mut builder = PathBuilder::new();
    match geometry {
        Geometry::Point(p) => {
            if let Some(dot) = PathBuilder::from_circle(p.x() as f32, p.y() as f32, POINT_RADIUS) {
                pixmap.fill_path(&dot, paint, FillRule::Winding, Transform::default(), None);
            }
            return;
        }
        Geometry::LineString(ls) => push_ring(&mut builder, ls, false),
        Geometry::MultiLineString(mls) => {
            for ls in mls {
                push_ring(&mut builder, ls, false);
            }
        }
        Geometry::Polygon(p) => push_ring(&mut builder, p.exterior(), true),
        Geometry::MultiPolygon(mp) => {
            for p in mp {
                push_ring(&mut builder, p.exterior(), true);
            }
        }
        _ => {}
    }
    if let Some(path) = builder.finish() {
        let stroke = Stroke {
            width,
            ..Default::default()
        };
        pixmap.stroke_path(&path, paint, &stroke, Transform::default(), None);
    }
}

fn fill_rect(pixmap: &mut Pixmap, x: f32, y: f32, w: f32, h: f32, paint: &Paint) {
    if let Some(rect) = tiny_skia::Rect::from_xywh(x, y, w, h) {
        pixmap.fill_rect(rect, paint, Transform::default(), None);
    }
}

/// Draws `text` with its top-left corner at (x, y); returns the end x.
fn draw_text(pixmap: &mut Pixmap, text: &str, x: f32, y: f32, paint: &Paint) -> f32 {
    let mut cursor = x;
    for ch in text.chars() {
        if let Some(glyph) = BASIC_FONTS.get(ch) {
            for (row, bits) in glyph.iter().enumerate() {
                for col in 0..8 {
                    if bits & (1 << col) != 0 {
                        fill_rect(
                            pixmap,
                            cursor + col as f32 * GLYPH_SCALE,
                            y + row as f32 * GLYPH_SCALE,
                            GLYPH_SCALE,
                            GLYPH_SCALE,
                            paint,
                        );
                    }
                }
            }
        }
        cursor += GLYPH_SIZE;
    }
    cursor
}

fn text_width(text: &str) -> f32 {
    text.chars().count() as f32 * GLYPH_SIZE
}

fn as_multipolygon(geometry: Geometry<f64>) -> MultiPolygon<f64> {
    match geometry {
        Geometry::MultiPolygon(mp) => mp,
        Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
        _ => MultiPolygon::new(vec![]),
    }
}

/// Renders the study area, safe zone, exclusion zones, raw features and a
/// labelled legend.
pub fn render_map(layers: &MapLayers<'_>, working_crs: Crs, width: u32) -> Result<RgbaImage> {
    let viewport = Viewport::new(layers.study_area, working_crs, width.max(1));
    debug!("Rendering {}x{} map", viewport.width, viewport.height);

    let mut pixmap = Pixmap::new(viewport.width, viewport.height).ok_or_else(|| {
        Error::InvalidConfig(format!(
            "a {}x{} map cannot be drawn",
            viewport.width, viewport.height
        ))
    })?;
    let Rgba([r, g, b, _]) = hex_to_rgba(BACKGROUND);
    pixmap.fill(Color::from_rgba8(r, g, b, 255));

    // Study area
    let study = Geometry::Polygon(layers.study_area.polygon());
    let study_px = viewport.geometry_to_pixels(&study, Crs::Wgs84);
    fill_polygons(&mut pixmap, &as_multipolygon(study_px.clone()), &paint(STUDY_FILL, 1.0));

    // Safe zone
    if !layers.safe_zone.is_empty() {
        let safe = Geometry::MultiPolygon(layers.safe_zone.geometry.clone());
        let safe_px = viewport.geometry_to_pixels(&safe, layers.safe_zone.crs);
        fill_polygons(&mut pixmap, &as_multipolygon(safe_px), &paint(SAFE_COLOR, SAFE_ALPHA));
    }

    // Exclusion zones
    for style in layers.styles {
        let Some(zone) = layers.zones.get(&style.name) else {
            continue;
        };
        if zone.is_empty() {
            continue;
        }
        let zone_px = viewport.geometry_to_pixels(&Geometry::MultiPolygon(zone.geometry.clone()), zone.crs);
        fill_polygons(&mut pixmap, &as_multipolygon(zone_px), &paint(&style.color, style.alpha));
    }

    // Raw features (subtle)
    for style in layers.styles {
        let Some(collection) = layers.features.get(&style.name) else {
            continue;
        };
        let feature_paint = paint(&style.color, FEATURE_ALPHA);
        for geometry in collection.geometries() {
            let px = viewport.geometry_to_pixels(geometry, collection.crs);
            stroke_geometry(&mut pixmap, &px, &feature_paint, FEATURE_WIDTH);
        }
    }

    stroke_geometry(&mut pixmap, &study_px, &paint(STUDY_OUTLINE, 1.0), OUTLINE_WIDTH);

    draw_legend(&mut pixmap, layers);

    let pixels = pixmap.pixels();
    let image_width = pixmap.width();
    Ok(ImageBuffer::from_fn(pixmap.width(), pixmap.height(), |x, y| {
        let c = pixels[(y * image_width + x) as usize].demultiply();
        Rgba([c.red(), c.green(), c.blue(), c.alpha()])
    }))
}

/// Legend rows: safe areas first, then every zone that was built.
fn legend_entries(layers: &MapLayers<'_>) -> Vec<(String, f32, String)> {
    let mut entries = vec![(SAFE_COLOR.to_string(), 0.5, "Potential safe areas".to_string())];
    for style in layers.styles {
        if layers.zones.contains_key(&style.name) {
            entries.push((style.color.clone(), 0.7, style.label.clone()));
        }
    }
    entries
}

/// Lower-right box of swatches with their labels.
fn draw_legend(pixmap: &mut Pixmap, layers: &MapLayers<'_>) {
    let entries = legend_entries(layers);
    let label_width = entries
        .iter()
        .map(|(_, _, label)| text_width(label))
        .fold(0.0, f32::max);

    let row_height = LEGEND_SWATCH + LEGEND_MARGIN / 2.0;
    let box_w = LEGEND_MARGIN / 2.0 + LEGEND_SWATCH + LEGEND_MARGIN / 2.0 + label_width + LEGEND_MARGIN / 2.0;
    let box_h = entries.len() as f32 * row_height + LEGEND_MARGIN / 2.0;
    let (width, height) = (pixmap.width() as f32, pixmap.height() as f32);
    if box_w + LEGEND_MARGIN > width || box_h + LEGEND_MARGIN > height {
        debug!("Map too small for a legend");
        return;
    }

    let x0 = width - box_w - LEGEND_MARGIN;
    let y0 = height - box_h - LEGEND_MARGIN;
    fill_rect(pixmap, x0, y0, box_w, box_h, &paint(STUDY_FILL, 1.0));

    let text_paint = Paint {
        anti_alias: false,
        ..paint(STUDY_OUTLINE, 1.0)
    };
    for (i, (color, alpha, label)) in entries.iter().enumerate() {
        let y = y0 + LEGEND_MARGIN / 2.0 + i as f32 * row_height;
        let swatch_x = x0 + LEGEND_MARGIN / 2.0;
        fill_rect(pixmap, swatch_x, y, LEGEND_SWATCH, LEGEND_SWATCH, &paint(color, *alpha));
        let text_x = swatch_x + LEGEND_SWATCH + LEGEND_MARGIN / 2.0;
        draw_text(pixmap, label, text_x, y + (LEGEND_SWATCH - GLYPH_SIZE) / 2.0, &text_paint);
    }
}

pub fn save_map(image: &RgbaImage, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    image.save(path)?;
    info!("Map saved to {:?}", path);
    Ok(())
}

pub fn hex_to_rgba(hex: &str) -> Rgba<u8> {
    let hex = hex.trim_start_matches('#');
    let channel = |range: std::ops::Range<usize>| {
        hex.get(range)
            .and_then(|s| u8::from_str_radix(s, 16).ok())
            .unwrap_or(0)
    };
    Rgba([channel(0..2), channel(2..4), channel(4..6), 255])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::types::BoundingBox;
    use geo::{coord, LineString, Polygon};

    fn pixel(pixmap: &Pixmap, x: u32, y: u32) -> [u8; 4] {
        let c = pixmap.pixel(x, y).unwrap().demultiply();
        [c.red(), c.green(), c.blue(), c.alpha()]
    }

    fn opaque(pixmap: &mut Pixmap) {
        pixmap.fill(Color::from_rgba8(0, 0, 0, 255));
    }

    #[test]
    fn test_hex_to_rgba() {
        assert_eq!(hex_to_rgba("#e74c3c"), Rgba([0xe7, 0x4c, 0x3c, 255]));
        assert_eq!(hex_to_rgba("27ae60"), Rgba([0x27, 0xae, 0x60, 255]));
        assert_eq!(hex_to_rgba("#fff"), Rgba([0xff, 0, 0, 255]));
    }

    #[test]
    fn test_fill_respects_holes() {
        let mut pixmap = Pixmap::new(20, 20).unwrap();
        opaque(&mut pixmap);
        let ring = |a: f64, b: f64| {
            LineString::from(vec![
                coord! { x: a, y: a },
                coord! { x: b, y: a },
                coord! { x: b, y: b },
                coord! { x: a, y: b },
                coord! { x: a, y: a },
            ])
        };
        let donut = MultiPolygon::new(vec![Polygon::new(ring(2.0, 18.0), vec![ring(7.0, 13.0)])]);
        fill_polygons(&mut pixmap, &donut, &paint("#c86400", 1.0));

        assert_eq!(pixel(&pixmap, 4, 4), [0xc8, 0x64, 0x00, 255]);
        assert_eq!(pixel(&pixmap, 10, 10), [0, 0, 0, 255], "hole stays unpainted");
        assert_eq!(pixel(&pixmap, 0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn test_fill_blends_with_alpha() {
        let mut pixmap = Pixmap::new(10, 10).unwrap();
        opaque(&mut pixmap);
        let square = MultiPolygon::new(vec![Rect::new(coord! { x: 0.0, y: 0.0 }, coord! { x: 10.0, y: 10.0 }).to_polygon()]);
        fill_polygons(&mut pixmap, &square, &paint("#c86400", 0.5));
        let [r, g, b, a] = pixel(&pixmap, 5, 5);
        assert!((r as i32 - 100).abs() <= 1 && (g as i32 - 50).abs() <= 1 && b == 0, "{:?}", (r, g, b));
        assert_eq!(a, 255);
    }

    #[test]
    fn test_text_is_drawn() {
        let mut pixmap = Pixmap::new(64, 32).unwrap();
        opaque(&mut pixmap);
        let text_paint = Paint {
            anti_alias: false,
            ..paint("#ffffff", 1.0)
        };
        let end = draw_text(&mut pixmap, "AB", 0.0, 0.0, &text_paint);
        assert_eq!(end, 2.0 * GLYPH_SIZE);
        let lit = (0..32u32)
            .flat_map(|x| (0..16u32).map(move |y| (x, y)))
            .filter(|&(x, y)| pixel(&pixmap, x, y)[0] == 255)
            .count();
        assert!(lit > 20, "only {} pixels lit", lit);
        assert_eq!(pixel(&pixmap, 40, 20), [0, 0, 0, 255]);
    }

    #[test]
    fn test_render_paints_zone_colour_and_labels() {
        let area = StudyArea::new(BoundingBox::new(-117.20, 32.70, -117.10, 32.80).unwrap());
        let styles = AppConfig::default().zone_styles();
        let mut zones = BTreeMap::new();
        // Freeway zone covering the whole study area.
        zones.insert(
            "freeway".to_string(),
            ExclusionZone {
                hazard: "freeway".to_string(),
                geometry: area.multipolygon(),
                crs: Crs::Wgs84,
            },
        );
        let safe = SafeZone {
            geometry: MultiPolygon::new(vec![]),
            crs: Crs::Wgs84,
        };
        let features = BTreeMap::new();
        let layers = MapLayers {
            study_area: &area,
            safe_zone: &safe,
            zones: &zones,
            features: &features,
            styles: &styles,
        };

        let labels: Vec<String> = legend_entries(&layers).into_iter().map(|(_, _, l)| l).collect();
        assert_eq!(
            labels,
            vec![
                "Potential safe areas".to_string(),
                "Freeway exclusion (610m / ~2,000 ft)".to_string()
            ]
        );

        let image = render_map(&layers, Crs::SAN_DIEGO_UTM, 1000).unwrap();
        assert_eq!(image.width(), 1000);
        // 0.1° of longitude is shorter than 0.1° of latitude at 32.75°N.
        assert!(image.height() > 1000);

        let center = image.get_pixel(500, image.height() / 3);
        let study = hex_to_rgba(STUDY_FILL);
        assert_ne!(center, &study, "zone should tint the study area");
        assert!(center[0] > study[0], "freeway red should raise the red channel");

        // Label text sits in the lower-right legend box, clear of the outline.
        let text = hex_to_rgba(STUDY_OUTLINE);
        let inset = LEGEND_MARGIN as u32;
        let (w, h) = (image.width(), image.height());
        let lit = (w / 2..w - inset)
            .flat_map(|x| (h - 120..h - inset).map(move |y| (x, y)))
            .filter(|&(x, y)| image.get_pixel(x, y) == &text)
            .count();
        assert!(lit > 100, "only {} label pixels", lit);
    }
}
