//! Reference group integrity check.
//!
//! Before a baseline is computed the reference gauges are checked against
//! each other. A member is out of agreement when its level differs from the
//! median of the *other* members by more than the agreement threshold.
//! Exclusion is iterative: the worst offender is dropped and the remaining
//! members are re-evaluated, since one bad gauge can drag the peer median
//! far enough to make a good gauge look bad. Dropped members are never
//! re-admitted.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};

use crate::logging::{self, Component};
use crate::model::EngineError;

/// One reference gauge's level at the timestamp under validation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemberReading<'a> {
    pub station_id: &'a str,
    pub level_m: f64,
}

/// Outcome of cross-validation. `survivors` is sorted by station id,
/// `excluded` is in the order members were dropped.
#[derive(Debug, Clone, PartialEq)]
pub struct CrossValidation<'a> {
    pub survivors: Vec<MemberReading<'a>>,
    pub excluded: Vec<MemberReading<'a>>,
}

/// Median of a slice. Returns `None` when empty.
pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

/// Distance of `members[idx]` from the median of every other member.
fn peer_deviation(members: &[MemberReading<'_>], idx: usize) -> Option<(f64, f64)> {
    let peers: Vec<f64> = members
        .iter()
        .enumerate()
        .filter(|(j, _)| *j != idx)
        .map(|(_, m)| m.level_m)
        .collect();
    median(&peers).map(|m| ((members[idx].level_m - m).abs(), m))
}

/// Runs the integrity check on the reference readings of one timestamp.
///
/// Ties on deviation are broken by station id: the lowest id is dropped
/// first. A single member has no peers and always survives. Only an empty
/// input is `BaselineUnresolvable`.
pub fn cross_validate<'a>(
    timestamp: DateTime<Utc>,
    members: &[MemberReading<'a>],
    threshold_m: f64,
) -> Result<CrossValidation<'a>, EngineError> {
    if members.is_empty() {
        return Err(EngineError::BaselineUnresolvable { timestamp });
    }

    let mut survivors = members.to_vec();
    survivors.sort_by(|a, b| a.station_id.cmp(b.station_id));
    let mut excluded = Vec::new();

    while survivors.len() >= 2 {
        // (index, deviation, peer median) of the worst member over threshold
        let mut worst: Option<(usize, f64, f64)> = None;
        for idx in 0..survivors.len() {
            let Some((deviation, peer_median)) = peer_deviation(&survivors, idx) else {
                continue;
            };
            if deviation <= threshold_m {
                continue;
            }
            let replace = match worst {
                None => true,
                Some((_, w, _)) => deviation.total_cmp(&w) == Ordering::Greater,
            };
            if replace {
                worst = Some((idx, deviation, peer_median));
            }
        }

        let Some((idx, deviation, peer_median)) = worst else {
            break;
        };
        let dropped = survivors.remove(idx);
        logging::info(
            Component::CrossValidation,
            Some(dropped.station_id),
            &format!(
                "excluded from baseline at {}: {:.3}m is {:.1}cm from peer median {:.3}m",
                timestamp,
                dropped.level_m,
                deviation * 100.0,
                peer_median
            ),
        );
        excluded.push(dropped);
    }

    Ok(CrossValidation { survivors, excluded })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
