//! Historical baseline fallback.
//!
//! When a timestamp has no live reference data at all (neither in its slot
//! nor inside the asynchronous window), the baseline is reconstructed from
//! earlier live baselines inside the look-back window, weighted toward the
//! most recent ones so the tidal phase is roughly preserved.
//!
//! # Clock injection
//! Ages are measured from the timestamp being resolved, never from
//! `Utc::now()`, so replaying an old batch gives the same answer.
//!
//! The history is append-only: an estimate is committed once and never
//! replaced, and only live estimates are accepted. A fallback built on top
//! of another fallback would drift without any real data behind it.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::config::{EngineConfig, RecencyDecay};
use crate::logging::{self, Component};
use crate::model::{BaselineEstimate, BaselineSource, EngineError};

// ---------------------------------------------------------------------------
// Baseline history
// ---------------------------------------------------------------------------

/// Finalized live baselines, keyed by timestamp.
#[derive(Debug, Clone, Default)]
pub struct BaselineHistory {
    estimates: BTreeMap<DateTime<Utc>, Arc<BaselineEstimate>>,
}

impl BaselineHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a history from previously persisted estimates. Non-live and
    /// duplicate entries are skipped.
    pub fn from_estimates<I>(estimates: I) -> Self
    where
        I: IntoIterator<Item = BaselineEstimate>,
    {
        let mut history = Self::new();
        for estimate in estimates {
            history.commit(Arc::new(estimate));
        }
        history
    }

    /// Appends a live estimate. Returns `false` (and leaves the history
    /// untouched) for fallback estimates or an already committed timestamp.
    pub fn commit(&mut self, estimate: Arc<BaselineEstimate>) -> bool {
        if !estimate.is_live() || self.estimates.contains_key(&estimate.timestamp) {
            return false;
        }
        self.estimates.insert(estimate.timestamp, estimate);
        true
    }

    pub fn get(&self, timestamp: &DateTime<Utc>) -> Option<&Arc<BaselineEstimate>> {
        self.estimates.get(timestamp)
    }

    /// Estimates with `target - lookback <= t < target`, oldest first.
    pub fn window(
        &self,
        target: DateTime<Utc>,
        lookback: Duration,
    ) -> impl Iterator<Item = &Arc<BaselineEstimate>> {
        let start = target
            .checked_sub_signed(lookback.max(Duration::zero()))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.estimates
            .range(start..target)
            .map(|(_, estimate)| estimate)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<BaselineEstimate>> {
        self.estimates.values()
    }

    pub fn len(&self) -> usize {
        self.estimates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.estimates.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Recency weighting
// ---------------------------------------------------------------------------

/// Linear weight given to an estimate sitting exactly on the window edge.
pub const EDGE_WEIGHT: f64 = 1e-6;

/// Weight of a historical baseline `age` old.
///
/// Exponential: `exp(-age / e_folding)`. Linear: `1 - age / lookback`,
/// floored at `EDGE_WEIGHT` so the oldest estimate in the window still
/// counts.
pub fn recency_weight(decay: RecencyDecay, age: Duration, lookback: Duration) -> f64 {
    let age_hours = age.num_seconds() as f64 / 3600.0;
    match decay {
        RecencyDecay::Exponential { e_folding_hours } => (-age_hours / e_folding_hours).exp(),
        RecencyDecay::Linear => {
            let lookback_hours = lookback.num_seconds() as f64 / 3600.0;
            if lookback_hours <= 0.0 {
                EDGE_WEIGHT
            } else {
                (1.0 - age_hours / lookback_hours).max(EDGE_WEIGHT)
            }
        }
    }
}

/// Reconstructs a baseline for `target` from `history`.
///
/// Fails with `BaselineUnresolvable` when fallback is switched off or when
/// fewer than `min_historical_estimates` baselines fall in the window.
/// Never returns a default or zero baseline.
///
/// Exponential ages are measured from the newest candidate rather than from
/// `target`. The shift cancels out of the weighted mean, and the newest
/// candidate keeps weight 1 however long the look-back is.
pub fn historical_baseline(
    history: &BaselineHistory,
    target: DateTime<Utc>,
    config: &EngineConfig,
) -> Result<BaselineEstimate, EngineError> {
    let unresolvable = EngineError::BaselineUnresolvable { timestamp: target };
    if !config.historical_fallback {
        return Err(unresolvable);
    }

    let lookback = config.lookback();
    let candidates: Vec<&Arc<BaselineEstimate>> = history.window(target, lookback).collect();
    if candidates.is_empty() || candidates.len() < config.min_historical_estimates {
        return Err(unresolvable);
    }

    let shift = match (config.decay, candidates.last()) {
        (RecencyDecay::Exponential { .. }, Some(newest)) => target - newest.timestamp,
        _ => Duration::zero(),
    };

    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    let mut used = 0usize;
    let mut contributing = BTreeSet::new();
    for estimate in &candidates {
        let age = target - estimate.timestamp - shift;
        let weight = recency_weight(config.decay, age, lookback);
        if weight <= 0.0 || !weight.is_finite() {
            continue;
        }
        weighted_sum += weight * estimate.value_m;
        weight_total += weight;
        used += 1;
        contributing.extend(estimate.contributing_stations.iter().cloned());
    }

    if used == 0 || weight_total <= 0.0 {
        return Err(unresolvable);
    }

    let value_m = weighted_sum / weight_total;
    logging::info(
        Component::Historical,
        None,
        &format!(
            "historical baseline {:.3}m for {} from {} estimate(s) in the last {}h",
            value_m,
            target,
            used,
            config.lookback_hours
        ),
    );

    Ok(BaselineEstimate {
        timestamp: target,
        value_m,
        source: BaselineSource::HistoricalFallback,
        excluded_stations: BTreeSet::new(),
        contributing_stations: contributing,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
