//! Property tests: engine invariants hold for arbitrary gauge batches.
//!
//! - every resolved result has `corrected_m == baseline + offset`
//! - outlier percentage is `100 * outliers / total` (0 for empty batches)
//! - excluded stations are reference stations that were present, and never
//!   contribute to the same baseline
//! - results are ordered by timestamp, then station id

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;

use seamon_service::{Reading, StationTable, ValidationEngine, ValidationMode};

// ---------------------------------------------------------------------------
// Helpers / Strategies
// ---------------------------------------------------------------------------

const STATIONS: &[&str] = &["Yafo", "Ashdod", "Ashkelon", "Haifa", "Acre", "Eilat"];

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 11, 6, 0, 0, 0).unwrap()
}

/// One reading: any known station, on a 10-minute grid over 12 hours,
/// with a level around typical Mediterranean values plus occasional spikes.
fn arb_reading() -> impl Strategy<Value = Reading> {
    (
        0..STATIONS.len(),
        0i64..72,
        prop_oneof![4 => 0.25f64..0.45, 1 => -0.5f64..1.5],
    )
        .prop_map(|(station, slot, level)| {
            Reading::new(STATIONS[station], t0() + Duration::minutes(slot * 10), level)
        })
}

fn arb_batch() -> impl Strategy<Value = Vec<Reading>> {
    prop::collection::vec(arb_reading(), 0..120)
}

// ---------------------------------------------------------------------------
// Property Tests
// ---------------------------------------------------------------------------

proptest! {
    #[test]
    fn corrected_is_always_baseline_plus_offset(readings in arb_batch()) {
        let report = ValidationEngine::calibrated().validate_batch(&readings);
        for result in &report.results {
            match &result.baseline_used {
                Some(baseline) => {
                    let corrected = result.corrected_m.expect("resolved results carry a correction");
                    prop_assert!((corrected - (baseline.value_m + result.offset_m)).abs() < 1e-12);
                    let outlier = result.deviation_m.unwrap().abs() > result.tolerance_m;
                    prop_assert_eq!(result.is_outlier, outlier);
                }
                None => {
                    prop_assert_eq!(result.validation_mode, ValidationMode::Unresolved);
                    prop_assert!(!result.is_outlier);
                }
            }
        }
    }

    #[test]
    fn outlier_percentage_matches_counts(readings in arb_batch()) {
        let report = ValidationEngine::calibrated().validate_batch(&readings);
        let outliers = report.results.iter().filter(|r| r.is_outlier).count();
        prop_assert_eq!(report.outliers_detected, outliers);
        if report.total_records == 0 {
            prop_assert_eq!(report.outlier_percentage, 0.0);
        } else {
            let expected = 100.0 * outliers as f64 / report.total_records as f64;
            prop_assert_eq!(report.outlier_percentage, expected);
        }
    }

    #[test]
    fn exclusions_are_reference_members_that_reported(readings in arb_batch()) {
        let table = StationTable::calibrated();
        let report = ValidationEngine::calibrated().validate_batch(&readings);
        for result in &report.results {
            let Some(baseline) = &result.baseline_used else { continue };
            prop_assert!(baseline.excluded_stations.is_disjoint(&baseline.contributing_stations));
            for id in &baseline.excluded_stations {
                prop_assert!(table.is_reference(id), "{} is not a reference gauge", id);
                prop_assert!(readings.iter().any(|r| &r.station_id == id));
            }
            if baseline.is_live() {
                prop_assert!(!baseline.contributing_stations.is_empty());
            }
        }
    }

    #[test]
    fn results_are_ordered_and_deterministic(readings in arb_batch()) {
        let engine = ValidationEngine::calibrated();
        let first = engine.validate_batch(&readings);
        let keys: Vec<_> = first
            .results
            .iter()
            .map(|r| (r.timestamp, r.station_id.clone()))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort();
        prop_assert_eq!(&keys, &sorted);

        let second = engine.validate_batch(&readings);
        prop_assert_eq!(first, second);
    }
}
