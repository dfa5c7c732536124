//! Asynchronous window validation.
//!
//! Reference and non-reference gauges are not sampled in lockstep. When a
//! non-reference reading has no reference reading in its own slot, the
//! nearest reading of each reference station within ±window is taken and
//! the usual cross-validation + mean is run over those values alone.
//!
//! A slot holding a single reference reading gets the same treatment: the
//! other reference stations' nearest readings are pulled in so the lone
//! gauge is checked against its peers instead of against itself.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::analysis::baseline;
use crate::analysis::cross_validation::MemberReading;
use crate::analysis::grouping::Screened;
use crate::logging::{self, Component};
use crate::model::{BaselineEstimate, EngineError};

/// Time-sorted reference readings per reference station.
#[derive(Debug, Default)]
pub struct ReferenceIndex<'a> {
    by_station: BTreeMap<&'a str, Vec<(DateTime<Utc>, f64)>>,
}

/// The sample chosen for one reference station.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSample<'a> {
    pub station_id: &'a str,
    pub timestamp: DateTime<Utc>,
    pub level_m: f64,
}

impl<'a> ReferenceIndex<'a> {
    /// Indexes every reference-group reading in `screened`.
    pub fn build<'s, I>(screened: I) -> Self
    where
        'a: 's,
        I: IntoIterator<Item = &'s Screened<'a>>,
    {
        let mut by_station: BTreeMap<&'a str, Vec<(DateTime<Utc>, f64)>> = BTreeMap::new();
        for s in screened.into_iter().filter(|s| s.is_reference()) {
            by_station
                .entry(s.station_id())
                .or_default()
                .push((s.timestamp, s.level_m));
        }
        for series in by_station.values_mut() {
            series.sort_by_key(|(ts, _)| *ts);
        }
        Self { by_station }
    }

    pub fn is_empty(&self) -> bool {
        self.by_station.is_empty()
    }

    /// For each reference station, the reading closest to `target` with
    /// `|t - target| <= window`. On equal distance the earlier reading wins.
    pub fn nearest_in_window(&self, target: DateTime<Utc>, window: Duration) -> Vec<WindowSample<'a>> {
        let mut samples = Vec::new();
        for (&station_id, series) in &self.by_station {
            let idx = series.partition_point(|(ts, _)| *ts < target);
            let before = idx.checked_sub(1).and_then(|i| series.get(i));
            let after = series.get(idx);

            let best = match (before, after) {
                (Some(b), Some(a)) => {
                    if (a.0 - target) < (target - b.0) { Some(a) } else { Some(b) }
                }
                (Some(b), None) => Some(b),
                (None, Some(a)) => Some(a),
                (None, None) => None,
            };

            if let Some(&(timestamp, level_m)) = best {
                let distance = (timestamp - target).abs();
                if distance <= window {
                    samples.push(WindowSample {
                        station_id,
                        timestamp,
                        level_m,
                    });
                }
            }
        }
        samples
    }
}

/// Builds a live baseline for `target` from the reference data inside the
/// window. `BaselineUnresolvable` when the window holds no reference data.
pub fn window_baseline(
    index: &ReferenceIndex<'_>,
    target: DateTime<Utc>,
    window: Duration,
    threshold_m: f64,
) -> Result<BaselineEstimate, EngineError> {
    let samples = index.nearest_in_window(target, window);
    if samples.is_empty() {
        logging::debug(
            Component::Window,
            None,
            &format!("no reference data within ±{}min of {}", window.num_minutes(), target),
        );
        return Err(EngineError::BaselineUnresolvable { timestamp: target });
    }

    let members: Vec<MemberReading<'_>> = samples
        .iter()
        .map(|s| MemberReading {
            station_id: s.station_id,
            level_m: s.level_m,
        })
        .collect();
    let estimate = baseline::live_baseline(target, &members, threshold_m)?;

    let widest = samples
        .iter()
        .map(|s| (s.timestamp - target).abs().num_minutes())
        .max()
        .unwrap_or(0);
    logging::debug(
        Component::Window,
        None,
        &format!(
            "async baseline {:.3}m at {} from {} station(s), furthest {}min away",
            estimate.value_m,
            target,
            estimate.contributing_stations.len(),
            widest
        ),
    );

    Ok(estimate)
}

/// Baseline for a slot whose only reference reading is `lone`: `lone` plus
/// the nearest reading of every other reference station within the window,
/// cross-validated together. `BaselineUnresolvable` when no peer reported
/// inside the window.
pub fn lone_reference_baseline(
    index: &ReferenceIndex<'_>,
    lone: MemberReading<'_>,
    target: DateTime<Utc>,
    window: Duration,
    threshold_m: f64,
) -> Result<BaselineEstimate, EngineError> {
    let mut members = vec![lone];
    members.extend(
        index
            .nearest_in_window(target, window)
            .into_iter()
            .filter(|s| s.station_id != lone.station_id)
            .map(|s| MemberReading {
                station_id: s.station_id,
                level_m: s.level_m,
            }),
    );
    if members.len() < 2 {
        return Err(EngineError::BaselineUnresolvable { timestamp: target });
    }

    let estimate = baseline::live_baseline(target, &members, threshold_m)?;
    logging::debug(
        Component::Window,
        Some(lone.station_id),
        &format!(
            "lone reference at {} checked against {} peer(s), baseline {:.3}m",
            target,
            members.len() - 1,
            estimate.value_m
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
    use crate::analysis::grouping::screen;
    use crate::model::Reading;
    use crate::stations::StationTable;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 6, 12, 0, 0).unwrap()
    }

    fn reading(id: &str, minutes: i64, level: f64) -> Reading {
        Reading::new(id, t0() + Duration::minutes(minutes), level)
    }

    #[test]
    fn test_index_ignores_non_reference_stations() {
        let table = StationTable::calibrated();
        let readings = vec![reading("Haifa", 0, 0.36), reading("Eilat", 5, 0.60)];
        let (screened, _) = screen(&readings, &table);
        let index = ReferenceIndex::build(&screened);
        assert!(index.is_empty());
    }

    #[test]
    fn test_nearest_reading_per_station_is_chosen() {
        let table = StationTable::calibrated();
        let readings = vec![
            reading("Yafo", -50, 0.10),
            reading("Yafo", -10, 0.32),
            reading("Yafo", 30, 0.20),
            reading("Ashdod", 20, 0.318),
        ];
        let (screened, _) = screen(&readings, &table);
        let index = ReferenceIndex::build(&screened);
        let samples = index.nearest_in_window(t0(), Duration::hours(1));
        assert_eq!(samples.len(), 2);
        let yafo = samples.iter().find(|s| s.station_id == "Yafo").unwrap();
        assert_eq!(yafo.level_m, 0.32);
    }

    #[test]
    fn test_equal_distance_prefers_earlier() {
        let table = StationTable::calibrated();
        let readings = vec![reading("Yafo", -15, 0.30), reading("Yafo", 15, 0.40)];
        let (screened, _) = screen(&readings, &table);
        let index = ReferenceIndex::build(&screened);
        let samples = index.nearest_in_window(t0(), Duration::hours(1));
        assert_eq!(samples[0].level_m, 0.30);
    }

    #[test]
    fn test_window_edge_is_inclusive() {
        let table = StationTable::calibrated();
        let readings = vec![reading("Ashdod", 60, 0.318), reading("Yafo", -61, 0.320)];
        let (screened, _) = screen(&readings, &table);
        let index = ReferenceIndex::build(&screened);
        let samples = index.nearest_in_window(t0(), Duration::hours(1));
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].station_id, "Ashdod");
    }

    #[test]
    fn test_reference_40_minutes_away_builds_baseline() {
        let table = StationTable::calibrated();
        let readings = vec![reading("Yafo", -40, 0.320), reading("Ashdod", -40, 0.318)];
        let (screened, _) = screen(&readings, &table);
        let index = ReferenceIndex::build(&screened);
        let estimate = window_baseline(&index, t0(), Duration::hours(1), 0.05).unwrap();
        assert!((estimate.value_m - 0.319).abs() < 1e-9);
        assert_eq!(estimate.timestamp, t0(), "stamped with the target, not the samples");
    }

    #[test]
    fn test_reference_90_minutes_away_is_unresolvable() {
        let table = StationTable::calibrated();
        let readings = vec![reading("Yafo", -90, 0.320), reading("Ashdod", -90, 0.318)];
        let (screened, _) = screen(&readings, &table);
        let index = ReferenceIndex::build(&screened);
        assert_eq!(
            window_baseline(&index, t0(), Duration::hours(1), 0.05),
            Err(EngineError::BaselineUnresolvable { timestamp: t0() })
        );
    }

    #[test]
    fn test_window_samples_are_cross_validated() {
        let table = StationTable::calibrated();
        let readings = vec![
            reading("Yafo", -20, 0.320),
            reading("Ashdod", 10, 0.318),
            reading("Ashkelon", 35, 0.380),
        ];
        let (screened, _) = screen(&readings, &table);
        let index = ReferenceIndex::build(&screened);
        let estimate = window_baseline(&index, t0(), Duration::hours(1), 0.05).unwrap();
        assert!(estimate.excluded_stations.contains("Ashkelon"));
        assert!((estimate.value_m - 0.319).abs() < 1e-9);
    }

    #[test]
    fn test_lone_reference_is_checked_against_peers() {
        let table = StationTable::calibrated();
        let readings = vec![
            reading("Yafo", -30, 0.320),
            reading("Ashdod", -30, 0.318),
            reading("Ashkelon", 0, 1.500),
        ];
        let (screened, _) = screen(&readings, &table);
        let index = ReferenceIndex::build(&screened);
        let lone = MemberReading {
            station_id: "Ashkelon",
            level_m: 1.500,
        };
        let estimate = lone_reference_baseline(&index, lone, t0(), Duration::hours(1), 0.05).unwrap();
        assert!(estimate.excluded_stations.contains("Ashkelon"));
        assert!((estimate.value_m - 0.319).abs() < 1e-9);
        assert_eq!(estimate.timestamp, t0());
    }

    #[test]
    fn test_lone_reference_without_peers_is_unresolvable() {
        let table = StationTable::calibrated();
        let readings = vec![reading("Ashkelon", 0, 0.32), reading("Yafo", -90, 0.32)];
        let (screened, _) = screen(&readings, &table);
        let index = ReferenceIndex::build(&screened);
        let lone = MemberReading {
            station_id: "Ashkelon",
            level_m: 0.32,
        };
        assert_eq!(
            lone_reference_baseline(&index, lone, t0(), Duration::hours(1), 0.05),
            Err(EngineError::BaselineUnresolvable { timestamp: t0() })
        );
    }
}
