/// Live baseline calculation.
///
/// The baseline for a timestamp is the arithmetic mean of the reference
/// readings that survive cross-validation. Summation runs in station-id
/// order so the same input always yields the same bits.

use chrono::{DateTime, Utc};

use crate::analysis::cross_validation::{self, MemberReading};
use crate::logging::{self, Component};
use crate::model::{BaselineEstimate, BaselineSource, EngineError};

/// Arithmetic mean. Returns `None` for an empty slice.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Cross-validates `members` and averages the survivors into a live
/// `BaselineEstimate` stamped with `timestamp`.
///
/// Fails with `BaselineUnresolvable` when there are no members; the caller
/// then moves on to the asynchronous window or historical fallback.
pub fn live_baseline(
    timestamp: DateTime<Utc>,
    members: &[MemberReading<'_>],
    threshold_m: f64,
) -> Result<BaselineEstimate, EngineError> {
    let checked = cross_validation::cross_validate(timestamp, members, threshold_m)?;

    let values: Vec<f64> = checked.survivors.iter().map(|m| m.level_m).collect();
    let value_m = mean(&values).ok_or(EngineError::BaselineUnresolvable { timestamp })?;

    let estimate = BaselineEstimate {
        timestamp,
        value_m,
        source: BaselineSource::Live,
        excluded_stations: checked
            .excluded
            .iter()
            .map(|m| m.station_id.to_string())
            .collect(),
        contributing_stations: checked
            .survivors
            .iter()
            .map(|m| m.station_id.to_string())
            .collect(),
    };

    logging::debug(
        Component::Baseline,
        None,
        &format!(
            "baseline {:.3}m at {} from {} station(s), {} excluded",
            estimate.value_m,
            timestamp,
            estimate.contributing_stations.len(),
            estimate.exclusion_count()
        ),
    );

    Ok(estimate)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 6, 0, 0, 0).unwrap()
    }

    fn m(station_id: &str, level_m: f64) -> MemberReading<'_> {
        MemberReading { station_id, level_m }
    }

    #[test]
    fn test_mean_of_empty_is_none() {
        assert_eq!(mean(&[]), None);
        assert_eq!(mean(&[0.5]), Some(0.5));
    }

    #[test]
    fn test_agreeing_group_baseline_is_plain_mean() {
        let members = [m("Yafo", 0.320), m("Ashdod", 0.318), m("Ashkelon", 0.316)];
        let estimate = live_baseline(ts(), &members, 0.05).unwrap();
        let expected = (0.318 + 0.316 + 0.320) / 3.0;
        assert!((estimate.value_m - expected).abs() < 1e-12);
        assert!(estimate.excluded_stations.is_empty());
        assert_eq!(estimate.contributing_stations.len(), 3);
        assert_eq!(estimate.source, BaselineSource::Live);
    }

    #[test]
    fn test_excluded_station_does_not_contribute() {
        let members = [m("Yafo", 0.320), m("Ashdod", 0.318), m("Ashkelon", 0.380)];
        let estimate = live_baseline(ts(), &members, 0.05).unwrap();
        assert!((estimate.value_m - 0.319).abs() < 1e-9, "got {}", estimate.value_m);
        assert!(estimate.excluded_stations.contains("Ashkelon"));
        assert!(!estimate.contributing_stations.contains("Ashkelon"));
    }

    #[test]
    fn test_excluded_is_subset_of_considered_group() {
        let members = [m("Yafo", 0.30), m("Ashdod", 0.31), m("Ashkelon", 0.90)];
        let estimate = live_baseline(ts(), &members, 0.05).unwrap();
        for id in &estimate.excluded_stations {
            assert!(members.iter().any(|m| m.station_id == id.as_str()));
        }
        assert!(estimate.excluded_stations.is_disjoint(&estimate.contributing_stations));
    }

    #[test]
    fn test_no_members_is_unresolvable() {
        assert_eq!(
            live_baseline(ts(), &[], 0.05),
            Err(EngineError::BaselineUnresolvable { timestamp: ts() })
        );
    }

    #[test]
    fn test_baseline_is_reproducible() {
        let members = [m("Yafo", 0.3213), m("Ashdod", 0.3177), m("Ashkelon", 0.3191)];
        let first = live_baseline(ts(), &members, 0.05).unwrap();
        let second = live_baseline(ts(), &members, 0.05).unwrap();
        assert_eq!(first.value_m.to_bits(), second.value_m.to_bits());
    }
}
