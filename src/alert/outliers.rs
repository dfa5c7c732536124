//! Per-reading outlier detection.
//!
//! A reading is compared against `baseline + offset` for its station and
//! flagged when the absolute deviation is strictly greater than the
//! station's tolerance. The corrected value is always emitted so callers
//! can show "expected vs. actual" for every reading, not just the flagged
//! ones.
//!
//! Everything here is a pure function of its arguments: the baseline is
//! passed in explicitly, there is no "current baseline" state.

use std::sync::Arc;

use crate::analysis::grouping::Screened;
use crate::model::{BaselineEstimate, StationProfile, ValidationMode, ValidationResult};

// ---------------------------------------------------------------------------
// Core formula
// ---------------------------------------------------------------------------

/// Expected level, signed deviation and outlier flag for one value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Assessment {
    pub expected_m: f64,
    pub deviation_m: f64,
    pub is_outlier: bool,
}

/// `expected = baseline + offset`, `deviation = actual - expected`,
/// outlier when `|deviation| > tolerance`.
pub fn assess(actual_m: f64, baseline_m: f64, profile: &StationProfile) -> Assessment {
    let expected_m = baseline_m + profile.offset_m;
    let deviation_m = actual_m - expected_m;
    Assessment {
        expected_m,
        deviation_m,
        is_outlier: deviation_m.abs() > profile.tolerance_m,
    }
}

// ---------------------------------------------------------------------------
// ValidationResult construction
// ---------------------------------------------------------------------------

/// Validates one screened reading against `baseline`.
pub fn detect(
    screened: &Screened<'_>,
    baseline: &Arc<BaselineEstimate>,
    mode: ValidationMode,
) -> ValidationResult {
    let profile = screened.profile;
    let verdict = assess(screened.level_m, baseline.value_m, profile);

    ValidationResult {
        station_id: profile.station_id.clone(),
        timestamp: screened.timestamp,
        is_outlier: verdict.is_outlier,
        actual_m: screened.level_m,
        expected_m: Some(verdict.expected_m),
        corrected_m: Some(verdict.expected_m),
        deviation_m: Some(verdict.deviation_m),
        baseline_m: Some(baseline.value_m),
        offset_m: profile.offset_m,
        tolerance_m: profile.tolerance_m,
        baseline_used: Some(Arc::clone(baseline)),
        validation_mode: mode,
        excluded_from_baseline: baseline.excluded_stations.contains(&profile.station_id),
        measured_temperature: screened.reading.measured_temperature,
    }
}

/// Result for a reading whose timestamp has no baseline at all. It is never
/// an outlier and carries no expected or corrected value.
pub fn unresolved(screened: &Screened<'_>) -> ValidationResult {
    let profile = screened.profile;
    ValidationResult {
        station_id: profile.station_id.clone(),
        timestamp: screened.timestamp,
        is_outlier: false,
        actual_m: screened.level_m,
        expected_m: None,
        corrected_m: None,
        deviation_m: None,
        baseline_m: None,
        offset_m: profile.offset_m,
        tolerance_m: profile.tolerance_m,
        baseline_used: None,
        validation_mode: ValidationMode::Unresolved,
        excluded_from_baseline: false,
        measured_temperature: screened.reading.measured_temperature,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::grouping::screen;
    use crate::model::{BaselineSource, Reading};
    use crate::stations::StationTable;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::BTreeSet;

    const EPS: f64 = 1e-9;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 6, 12, 0, 0).unwrap()
    }

    fn baseline(value_m: f64, excluded: &[&str]) -> Arc<BaselineEstimate> {
        Arc::new(BaselineEstimate {
            timestamp: ts(),
            value_m,
            source: BaselineSource::Live,
            excluded_stations: excluded.iter().map(|s| s.to_string()).collect(),
            contributing_stations: BTreeSet::from(["Yafo".to_string(), "Ashdod".to_string()]),
        })
    }

    fn validate(id: &str, level: f64, base: &Arc<BaselineEstimate>) -> ValidationResult {
        let table = StationTable::calibrated();
        let readings = vec![Reading::new(id, ts(), level)];
        let (screened, failures) = screen(&readings, &table);
        assert!(failures.is_empty(), "{} should screen cleanly", id);
        detect(&screened[0], base, ValidationMode::Synchronous)
    }

    #[test]
    fn test_haifa_spike_is_flagged() {
        let result = validate("Haifa", 0.663, &baseline(0.319, &[]));
        assert!(result.is_outlier);
        assert!((result.expected_m.unwrap() - 0.359).abs() < EPS);
        assert!((result.corrected_m.unwrap() - 0.359).abs() < EPS);
        assert!((result.deviation_m.unwrap() - 0.304).abs() < EPS);
    }

    #[test]
    fn test_eilat_uses_elevated_offset() {
        let result = validate("Eilat", -0.009, &baseline(0.319, &[]));
        assert!(result.is_outlier);
        assert!((result.expected_m.unwrap() - 0.599).abs() < EPS);
        assert!((result.deviation_m.unwrap() + 0.608).abs() < EPS, "deviation is signed");
        assert!((result.abs_deviation().unwrap() - 0.608).abs() < EPS);
    }

    #[test]
    fn test_reading_within_tolerance_is_normal() {
        let result = validate("Acre", 0.42, &baseline(0.319, &[]));
        assert!(!result.is_outlier);
        // corrected value is still emitted for normal readings
        assert!((result.corrected_m.unwrap() - 0.399).abs() < EPS);
    }

    #[test]
    fn test_deviation_equal_to_tolerance_is_not_outlier() {
        let profile = StationProfile {
            station_id: "X".into(),
            group: crate::model::StationGroup::Other,
            offset_m: 0.0,
            tolerance_m: 0.25,
        };
        assert!(!assess(1.25, 1.0, &profile).is_outlier);
        assert!(assess(1.2500001, 1.0, &profile).is_outlier);
    }

    #[test]
    fn test_excluded_reference_station_is_marked() {
        let base = baseline(0.319, &["Ashkelon"]);
        let result = validate("Ashkelon", 0.380, &base);
        assert!(result.excluded_from_baseline);
        assert!(result.is_outlier, "0.061m off against a 0.03m tolerance");
        assert!(!validate("Yafo", 0.320, &base).excluded_from_baseline);
    }

    #[test]
    fn test_detection_is_pure() {
        let base = baseline(0.319, &[]);
        assert_eq!(validate("Haifa", 0.40, &base), validate("Haifa", 0.40, &base));
    }

    #[test]
    fn test_unresolved_has_no_expected_value() {
        let table = StationTable::calibrated();
        let readings = vec![Reading::new("Haifa", ts(), 0.36)];
        let (screened, _) = screen(&readings, &table);
        let result = unresolved(&screened[0]);
        assert_eq!(result.validation_mode, ValidationMode::Unresolved);
        assert!(!result.is_outlier);
        assert!(result.corrected_m.is_none() && result.baseline_used.is_none());
    }
}
