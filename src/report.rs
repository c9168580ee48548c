use crate::projection::{projected_area_km2, Crs};
use crate::types::{ExclusionZone, SafeZone, StudyArea};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Summary statistics printed at the end of a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafetyReport {
    pub study_area_km2: f64,
    pub safe_area_km2: f64,
    pub percent_safe: f64,
    pub zone_areas_km2: BTreeMap<String, f64>,
}

impl SafetyReport {
    pub fn compute(
        study_area: &StudyArea,
        zones: &BTreeMap<String, ExclusionZone>,
        safe_zone: &SafeZone,
        working_crs: Crs,
    ) -> Self {
        let study_area_km2 = study_area.area_km2(working_crs);
        let safe_area_km2 = if safe_zone.is_empty() {
            0.0
        } else {
            projected_area_km2(&safe_zone.geometry, safe_zone.crs, working_crs)
        };
        let percent_safe = if study_area_km2 > 0.0 {
            safe_area_km2 / study_area_km2 * 100.0
        } else {
            0.0
        };

        let zone_areas_km2 = zones
            .iter()
            .map(|(name, zone)| {
                let km2 = if zone.is_empty() {
                    0.0
                } else {
                    projected_area_km2(&zone.geometry, zone.crs, working_crs)
                };
                (name.clone(), km2)
            })
            .collect();

        Self {
            study_area_km2,
            safe_area_km2,
            percent_safe,
            zone_areas_km2,
        }
    }
}

impl fmt::Display for SafetyReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  Study area  : {:.1} km²", self.study_area_km2)?;
        for (name, km2) in &self.zone_areas_km2 {
            writeln!(f, "  {:<12}: {:.1} km² excluded", name, km2)?;
        }
        writeln!(f, "  Safe area   : {:.1} km²", self.safe_area_km2)?;
        write!(f, "  % livable   : {:.1}%", self.percent_safe)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BoundingBox;
    use geo::MultiPolygon;

    #[test]
    fn test_fully_safe_study_area_reports_one_hundred_percent() {
        let area = StudyArea::new(BoundingBox::new(-117.20, 32.70, -117.10, 32.80).unwrap());
        let safe = SafeZone {
            geometry: area.multipolygon(),
            crs: Crs::Wgs84,
        };
        let report = SafetyReport::compute(&area, &BTreeMap::new(), &safe, Crs::SAN_DIEGO_UTM);
        assert!((report.percent_safe - 100.0).abs() < 1e-9);
        assert!((report.study_area_km2 - 103.85).abs() < 0.1);

        let text = report.to_string();
        assert!(text.contains("% livable   : 100.0%"));
    }

    #[test]
    fn test_empty_safe_zone_reports_zero() {
        let area = StudyArea::new(BoundingBox::new(-117.20, 32.70, -117.10, 32.80).unwrap());
        let safe = SafeZone {
            geometry: MultiPolygon::new(vec![]),
            crs: Crs::Wgs84,
        };
        let mut zones = BTreeMap::new();
        zones.insert(
            "freeway".to_string(),
            ExclusionZone {
                hazard: "freeway".to_string(),
                geometry: area.multipolygon(),
                crs: Crs::Wgs84,
            },
        );
        let report = SafetyReport::compute(&area, &zones, &safe, Crs::SAN_DIEGO_UTM);
        assert_eq!(report.safe_area_km2, 0.0);
        assert_eq!(report.percent_safe, 0.0);
        assert!((report.zone_areas_km2["freeway"] - report.study_area_km2).abs() < 1e-9);
    }
}
