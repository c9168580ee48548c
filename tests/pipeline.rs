use geo::{line_string, Area, Contains, Coord, Geometry};
use sanctuary_map::config::{AppConfig, HazardConfig};
use sanctuary_map::dem::Dem;
use sanctuary_map::exclusion::build_exclusion_zones;
use sanctuary_map::masking::build_safe_zone;
use sanctuary_map::output::{write_geojson, zones_to_geojson};
use sanctuary_map::pipeline::{load_dataset, run_zones};
use sanctuary_map::projection::Crs;
use sanctuary_map::report::SafetyReport;
use sanctuary_map::types::{BoundingBox, Feature, FeatureCollection, LayerKind, Layers, StudyArea};
use std::collections::BTreeMap;

fn downtown() -> StudyArea {
    StudyArea::new(BoundingBox::new(-117.20, 32.70, -117.10, 32.80).unwrap())
}

fn freeway_hazard() -> HazardConfig {
    HazardConfig {
        name: "freeway".to_string(),
        layer: LayerKind::Lines,
        key: "highway".to_string(),
        values: vec!["motorway".to_string(), "trunk".to_string()],
        distance_m: 610.0,
        color: "#e74c3c".to_string(),
        alpha: 0.35,
        label: None,
    }
}

fn freeway_segment() -> FeatureCollection {
    FeatureCollection::new(
        Crs::Wgs84,
        vec![Feature::new(line_string![(x: -117.16, y: 32.72), (x: -117.15, y: 32.78)])
            .with_property("highway", "motorway")],
    )
}

#[test]
fn test_freeway_zone_is_subtracted_from_study_area() {
    let study = downtown();
    let mut features = BTreeMap::new();
    features.insert("freeway".to_string(), freeway_segment());

    let zones = build_exclusion_zones(&features, &[freeway_hazard()], &study, Crs::SAN_DIEGO_UTM);
    let zone = &zones["freeway"];
    assert!(!zone.is_empty());
    assert!(zone.geometry.contains(&line_string![(x: -117.16, y: 32.72), (x: -117.15, y: 32.78)]));

    let safe = build_safe_zone(&zones, &study);
    assert!(safe.geometry.unsigned_area() < study.polygon().unsigned_area());

    let report = SafetyReport::compute(&study, &zones, &safe, Crs::SAN_DIEGO_UTM);
    assert!(report.percent_safe > 0.0 && report.percent_safe < 100.0);
    // 610 m either side of a ~6.7 km segment, plus round caps.
    let excluded = report.zone_areas_km2["freeway"];
    assert!((7.0..11.0).contains(&excluded), "excluded {} km²", excluded);
}

#[test]
fn test_all_hazards_empty_leaves_everything_safe() {
    let study = downtown();
    let mut features = BTreeMap::new();
    features.insert("freeway".to_string(), FeatureCollection::empty(Crs::Wgs84));

    let zones = build_exclusion_zones(&features, &[freeway_hazard()], &study, Crs::SAN_DIEGO_UTM);
    let safe = build_safe_zone(&zones, &study);
    let report = SafetyReport::compute(&study, &zones, &safe, Crs::SAN_DIEGO_UTM);

    assert!(zones["freeway"].is_empty());
    assert!((report.percent_safe - 100.0).abs() < 1e-6);
}

#[test]
fn test_no_zones_returns_study_area() {
    let study = downtown();
    let safe = build_safe_zone(&BTreeMap::new(), &study);
    let diff = (safe.geometry.unsigned_area() - study.polygon().unsigned_area()).abs();
    assert!(diff < 1e-12);
}

#[test]
fn test_geojson_dataset_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("hazards.geojson");
    std::fs::write(
        &input,
        r#"{
          "type": "FeatureCollection",
          "features": [
            {"type": "Feature",
             "properties": {"highway": "motorway"},
             "geometry": {"type": "LineString", "coordinates": [[-117.16, 32.72], [-117.15, 32.78]]}},
            {"type": "Feature",
             "properties": {"highway": "residential"},
             "geometry": {"type": "LineString", "coordinates": [[-117.12, 32.72], [-117.12, 32.78]]}},
            {"type": "Feature",
             "properties": {"highway": "motorway"},
             "geometry": {"type": "LineString", "coordinates": [[-116.50, 33.00], [-116.40, 33.10]]}}
          ]
        }"#,
    )
    .unwrap();

    let mut config = AppConfig::default();
    config.study_area = BoundingBox::new(-117.20, 32.70, -117.10, 32.80).unwrap();
    config.hazards = vec![freeway_hazard()];

    let layers = load_dataset(&input, &config).unwrap();
    assert_eq!(layers.lines.len(), 2);

    let run = run_zones(&config, &layers, None);
    assert_eq!(run.features["freeway"].len(), 1);
    assert!(!run.zones["freeway"].is_empty());
    assert!(run.report.percent_safe < 100.0);

    let output = dir.path().join("out").join("zones.geojson");
    write_geojson(&output, zones_to_geojson(&run.zones, &run.safe_zone, &run.report)).unwrap();

    let written: geojson::GeoJson = std::fs::read_to_string(&output).unwrap().parse().unwrap();
    let geojson::GeoJson::FeatureCollection(fc) = written else {
        panic!("expected a feature collection");
    };
    let layers: Vec<String> = fc
        .features
        .iter()
        .filter_map(|f| f.property("layer").and_then(|v| v.as_str()).map(str::to_string))
        .collect();
    assert_eq!(layers, vec!["freeway_zone", "safe_zones"]);

    let safe = fc.features.last().unwrap();
    let geometry: Geometry<f64> = safe.geometry.clone().unwrap().try_into().unwrap();
    assert!(matches!(geometry, Geometry::MultiPolygon(_)));
}

#[test]
fn test_low_ground_is_excluded_with_hazards() {
    let mut config = AppConfig::default();
    config.study_area = BoundingBox::new(-117.20, 32.70, -117.10, 32.80).unwrap();
    config.hazards = vec![freeway_hazard()];

    // West half of the grid is 5 m coastal flat, east half is 80 m mesa.
    let values: Vec<f64> = (0..100).map(|i| if i % 10 < 5 { 5.0 } else { 80.0 }).collect();
    let dem = Dem::new(10, 10, values, Coord { x: -117.20, y: 32.80 }, (0.01, 0.01), Crs::Wgs84, None).unwrap();

    let layers = Layers::empty(Crs::Wgs84);
    let dry = run_zones(&config, &layers, None);
    let wet = run_zones(&config, &layers, Some(&dem));

    assert!(!wet.zones["low_10m"].is_empty());
    assert!(!wet.zones["low_30m"].is_empty());
    assert!((dry.report.percent_safe - 100.0).abs() < 1e-6);
    assert!(
        (wet.report.percent_safe - 50.0).abs() < 1.0,
        "{} % safe",
        wet.report.percent_safe
    );
}

#[test]
fn test_shipped_config_loads() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("sanctuary.toml");
    let config = AppConfig::load_from_file(&path).unwrap();
    assert_eq!(config.working_crs(), Crs::SAN_DIEGO_UTM);
    let names: Vec<&str> = config.hazards.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(names, vec!["freeway", "airport", "river"]);
    assert_eq!(config.hazards[2].legend_label(), "river exclusion (300m)");
    assert!(config.flood.dem.is_none());
    let thresholds: Vec<f64> = config.flood.bands.iter().map(|b| b.max_elevation_m).collect();
    assert_eq!(thresholds, vec![30.0, 10.0]);
}
