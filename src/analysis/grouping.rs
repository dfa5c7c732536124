/// Screening and grouping of raw readings.
///
/// Turns the flat batch into per-timestamp slots of readings that are known
/// to be usable: each carries its finite level and its station profile.
/// Anything that cannot enter a baseline (missing/non-finite value, unknown
/// station, duplicate slot entry) is turned into a `Failure` here and never
/// reaches the later stages.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, SubsecRound, Utc};

use crate::logging::{self, Component};
use crate::model::{EngineError, Failure, Reading, StationProfile};
use crate::stations::StationTable;

/// A reading that passed screening.
#[derive(Debug, Clone, Copy)]
pub struct Screened<'a> {
    pub reading: &'a Reading,
    pub profile: &'a StationProfile,
    pub level_m: f64,
    /// Reading timestamp truncated to whole seconds.
    pub timestamp: DateTime<Utc>,
}

impl<'a> Screened<'a> {
    pub fn station_id(&self) -> &'a str {
        &self.reading.station_id
    }

    pub fn is_reference(&self) -> bool {
        self.profile.is_reference()
    }
}

/// Readings grouped by timestamp, each slot sorted by station id.
pub type Slots<'a> = BTreeMap<DateTime<Utc>, Vec<Screened<'a>>>;

/// Splits readings into usable ones and failures.
///
/// The first reading for a (station, second) pair wins; later duplicates
/// are reported as invalid rather than averaged in.
pub fn screen<'a>(readings: &'a [Reading], table: &'a StationTable) -> (Vec<Screened<'a>>, Vec<Failure>) {
    let mut accepted = Vec::with_capacity(readings.len());
    let mut failures = Vec::new();
    let mut seen: HashSet<(&str, DateTime<Utc>)> = HashSet::new();
    let mut unknown_stations: HashSet<&str> = HashSet::new();

    for reading in readings {
        let timestamp = reading.timestamp.trunc_subsecs(0);

        let profile = match table.profile(&reading.station_id) {
            Ok(p) => p,
            Err(err) => {
                // One configuration failure per station, not per reading.
                if unknown_stations.insert(reading.station_id.as_str()) {
                    push_failure(&mut failures, &err);
                }
                continue;
            }
        };

        let level_m = match reading.level() {
            Ok(v) => v,
            Err(err) => {
                push_failure(&mut failures, &err);
                continue;
            }
        };

        if !seen.insert((reading.station_id.as_str(), timestamp)) {
            push_failure(
                &mut failures,
                &EngineError::InvalidReading {
                    station_id: reading.station_id.clone(),
                    timestamp,
                    reason: "duplicate reading for this timestamp".to_string(),
                },
            );
            continue;
        }

        accepted.push(Screened {
            reading,
            profile,
            level_m,
            timestamp,
        });
    }

    if !failures.is_empty() {
        logging::debug(
            Component::Ingest,
            None,
            &format!(
                "Screened {} readings: {} accepted, {} rejected",
                readings.len(),
                accepted.len(),
                failures.len()
            ),
        );
    }

    (accepted, failures)
}

fn push_failure(failures: &mut Vec<Failure>, err: &EngineError) {
    if let Some(failure) = err.to_failure() {
        logging::log_failure(&failure);
        failures.push(failure);
    }
}

/// Groups screened readings into timestamp slots.
pub fn group_by_timestamp(screened: Vec<Screened<'_>>) -> Slots<'_> {
    let mut slots: Slots<'_> = BTreeMap::new();
    for s in screened {
        slots.entry(s.timestamp).or_default().push(s);
    }
    for members in slots.values_mut() {
        members.sort_by(|a, b| a.station_id().cmp(b.station_id()));
    }
    slots
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
