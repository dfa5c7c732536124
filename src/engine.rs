/// Batch validation engine.
///
/// Owns the immutable station table and engine settings and turns a batch
/// of readings into a `BatchReport`. Per timestamp the baseline is resolved
/// in a fixed order:
///
///   1. synchronous: reference readings in the same slot
///   2. asynchronous: nearest reference readings within ±window, also used
///      to check a slot's lone reference reading against its peers
///   3. historical: recency-weighted earlier live baselines
///   4. unresolved: explicit `BaselineUnresolvable` failure
///
/// Timestamps are independent of each other apart from the baseline
/// history, so the work is split into parallel phases around one
/// sequential commit step.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rayon::prelude::*;

use crate::alert::outliers;
use crate::analysis::baseline;
use crate::analysis::cross_validation::MemberReading;
use crate::analysis::grouping::{self, Screened};
use crate::analysis::historical::{self, BaselineHistory};
use crate::analysis::window::{self, ReferenceIndex};
use crate::config::EngineConfig;
use crate::logging::{self, Component};
use crate::model::{
    BaselineEstimate, BatchReport, EngineError, Failure, Reading, ValidationMode,
    ValidationResult,
};
use crate::report::{self, CorrectionReport, HealthReport, OutlierReport, ValidationQuery};
use crate::stations::StationTable;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ValidationEngine {
    table: StationTable,
    config: EngineConfig,
}

/// Everything one timestamp slot produced.
#[derive(Debug, Default)]
struct SlotOutcome {
    results: Vec<ValidationResult>,
    failure: Option<Failure>,
    /// Cross-validation passes run for an asynchronous window (0 or 1).
    window_validations: usize,
    window_exclusions: usize,
    baseline_resolved: bool,
}

impl ValidationEngine {
    /// Fails with `NoStationProfiles` for an empty table, or
    /// `InvalidConfig` for out-of-range settings.
    pub fn new(table: StationTable, config: EngineConfig) -> Result<Self, EngineError> {
        if table.is_empty() {
            return Err(EngineError::NoStationProfiles);
        }
        config.validate()?;
        Ok(Self { table, config })
    }

    /// The built-in station table with default settings.
    pub fn calibrated() -> Self {
        Self {
            table: StationTable::calibrated(),
            config: EngineConfig::default(),
        }
    }

    pub fn table(&self) -> &StationTable {
        &self.table
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validates a batch with no prior baseline history.
    pub fn validate_batch(&self, readings: &[Reading]) -> BatchReport {
        let mut history = BaselineHistory::new();
        self.validate_batch_with_history(readings, &mut history)
    }

    /// Validates a batch, falling back on `history` for timestamps without
    /// live reference data. Synchronous live baselines from this batch are
    /// committed to `history` so the caller can carry it into the next one.
    pub fn validate_batch_with_history(
        &self,
        readings: &[Reading],
        history: &mut BaselineHistory,
    ) -> BatchReport {
        logging::debug(
            Component::System,
            None,
            &format!(
                "Validating {} readings against {} station profiles",
                readings.len(),
                self.table.len()
            ),
        );

        let (screened, mut failures) = grouping::screen(readings, &self.table);
        let slots = grouping::group_by_timestamp(screened);
        let index = ReferenceIndex::build(slots.values().flatten());
        let slot_list: Vec<(DateTime<Utc>, &Vec<Screened<'_>>)> =
            slots.iter().map(|(ts, members)| (*ts, members)).collect();

        // Phase 1: live baselines, one per slot with reference data.
        let threshold_m = self.config.agreement_threshold_m;
        let async_window = self.config.async_window();
        let live: Vec<Option<SlotBaseline>> = slot_list
            .par_iter()
            .map(|(ts, members)| slot_baseline(*ts, members, &index, async_window, threshold_m))
            .collect();

        // Phase 2: commit in timestamp order. Only synchronous estimates feed
        // the historical fallback.
        let mut committed = 0usize;
        for (estimate, mode) in live.iter().flatten() {
            if *mode == ValidationMode::Synchronous && history.commit(Arc::clone(estimate)) {
                committed += 1;
            }
        }
        if committed > 0 {
            logging::debug(
                Component::Historical,
                None,
                &format!("Committed {} live baselines ({} in history)", committed, history.len()),
            );
        }

        // Phase 3: per-slot validation.
        let history: &BaselineHistory = history;
        let outcomes: Vec<SlotOutcome> = slot_list
            .par_iter()
            .zip(live.par_iter())
            .map(|((ts, members), sync)| self.resolve_slot(*ts, members, sync.as_ref(), &index, history))
            .collect();

        let sync_validations = live.iter().flatten().count();
        let sync_exclusions: usize = live
            .iter()
            .flatten()
            .map(|(estimate, _)| estimate.exclusion_count())
            .sum();

        let mut results = Vec::with_capacity(readings.len());
        let mut window_validations = 0;
        let mut window_exclusions = 0;
        let mut baseline_calculations = 0;
        for outcome in outcomes {
            window_validations += outcome.window_validations;
            window_exclusions += outcome.window_exclusions;
            if outcome.baseline_resolved {
                baseline_calculations += 1;
            }
            results.extend(outcome.results);
            failures.extend(outcome.failure);
        }

        let stats = report::validation_stats(
            sync_validations + window_validations,
            sync_exclusions + window_exclusions,
            baseline_calculations,
        );
        let batch = report::build_batch_report(results, failures, stats);

        let resolved = batch.results.iter().filter(|r| r.is_resolved()).count();
        logging::log_batch_summary(
            batch.total_records,
            resolved,
            batch.outliers_detected,
            batch.failures.len(),
        );
        batch
    }

    fn resolve_slot(
        &self,
        timestamp: DateTime<Utc>,
        members: &[Screened<'_>],
        live: Option<&SlotBaseline>,
        index: &ReferenceIndex<'_>,
        history: &BaselineHistory,
    ) -> SlotOutcome {
        let mut outcome = SlotOutcome::default();

        let resolved = match live {
            Some((estimate, mode)) => Some((Arc::clone(estimate), *mode)),
            None => self.fallback_baseline(timestamp, index, history, &mut outcome),
        };

        match resolved {
            Some((estimate, mode)) => {
                outcome.baseline_resolved = true;
                outcome.results = members
                    .iter()
                    .map(|s| outliers::detect(s, &estimate, mode))
                    .collect();
                for result in outcome.results.iter().filter(|r| r.is_outlier) {
                    logging::debug(
                        Component::Detector,
                        Some(&result.station_id),
                        &report::outlier_message(result).unwrap_or_default(),
                    );
                }
            }
            None => {
                let err = EngineError::BaselineUnresolvable { timestamp };
                if let Some(failure) = err.to_failure() {
                    logging::log_failure(&failure);
                    outcome.failure = Some(failure);
                }
                outcome.results = members.iter().map(outliers::unresolved).collect();
            }
        }
        outcome
    }

    /// Asynchronous window first, then historical fallback.
    fn fallback_baseline(
        &self,
        timestamp: DateTime<Utc>,
        index: &ReferenceIndex<'_>,
        history: &BaselineHistory,
        outcome: &mut SlotOutcome,
    ) -> Option<(Arc<BaselineEstimate>, ValidationMode)> {
        let threshold_m = self.config.agreement_threshold_m;
        match window::window_baseline(index, timestamp, self.config.async_window(), threshold_m) {
            Ok(estimate) => {
                outcome.window_validations = 1;
                outcome.window_exclusions = estimate.exclusion_count();
                return Some((Arc::new(estimate), ValidationMode::Asynchronous));
            }
            Err(EngineError::BaselineUnresolvable { .. }) => {}
            Err(other) => {
                logging::warn(Component::Window, None, &other.to_string());
            }
        }

        historical::historical_baseline(history, timestamp, &self.config)
            .ok()
            .map(|estimate| (Arc::new(estimate), ValidationMode::Historical))
    }

    // -----------------------------------------------------------------------
    // Query operations
    // -----------------------------------------------------------------------

    /// Outlier payload for the readings selected by `query`.
    pub fn outlier_query(&self, readings: &[Reading], query: &ValidationQuery) -> OutlierReport {
        report::outlier_report(&self.validate_batch(readings), query, &self.config)
    }

    /// Corrected value for every selected reading.
    pub fn correction_query(&self, readings: &[Reading], query: &ValidationQuery) -> CorrectionReport {
        report::correction_report(&self.validate_batch(readings), query, &self.config)
    }

    /// Engine-health statistics for the selected readings.
    pub fn health_query(&self, readings: &[Reading], query: &ValidationQuery) -> HealthReport {
        report::health_report(&self.validate_batch(readings), query, &self.config)
    }
}

/// A slot's live baseline and the mode its readings are validated in.
type SlotBaseline = (Arc<BaselineEstimate>, ValidationMode);

/// Live baseline from the reference members of one slot, or `None` when the
/// slot holds only non-reference readings.
///
/// Two or more reference readings give a synchronous baseline. A single one
/// is cross-validated together with its peers' nearest readings inside the
/// window (asynchronous); with no peer in reach it stands alone.
fn slot_baseline(
    timestamp: DateTime<Utc>,
    members: &[Screened<'_>],
    index: &ReferenceIndex<'_>,
    async_window: Duration,
    threshold_m: f64,
) -> Option<SlotBaseline> {
    let refs: Vec<MemberReading<'_>> = members
        .iter()
        .filter(|s| s.is_reference())
        .map(|s| MemberReading {
            station_id: s.station_id(),
            level_m: s.level_m,
        })
        .collect();

    if let [lone] = refs.as_slice() {
        if let Ok(estimate) =
            window::lone_reference_baseline(index, *lone, timestamp, async_window, threshold_m)
        {
            return Some((Arc::new(estimate), ValidationMode::Asynchronous));
        }
    }
    if refs.is_empty() {
        return None;
    }
    baseline::live_baseline(timestamp, &refs, threshold_m)
        .ok()
        .map(|estimate| (Arc::new(estimate), ValidationMode::Synchronous))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FailureKind;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 6, 12, 0, 0).unwrap()
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(minutes)
    }

    fn southern_group(ts: DateTime<Utc>) -> Vec<Reading> {
        vec![
            Reading::new("Yafo", ts, 0.320),
            Reading::new("Ashdod", ts, 0.318),
        ]
    }

    #[test]
    fn test_empty_batch_is_an_empty_report() {
        let report = ValidationEngine::calibrated().validate_batch(&[]);
        assert_eq!(report.total_records, 0);
        assert_eq!(report.outlier_percentage, 0.0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = EngineConfig {
            agreement_threshold_m: -1.0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            ValidationEngine::new(StationTable::calibrated(), config),
            Err(EngineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_synchronous_slot_uses_shared_baseline() {
        let mut readings = southern_group(t0());
        readings.push(Reading::new("Haifa", t0(), 0.663));
        let report = ValidationEngine::calibrated().validate_batch(&readings);

        assert_eq!(report.total_records, 3);
        assert!(report.results.iter().all(|r| r.validation_mode == ValidationMode::Synchronous));
        let haifa = report.results.iter().find(|r| r.station_id == "Haifa").unwrap();
        assert!(haifa.is_outlier);
        assert!((haifa.corrected_m.unwrap() - 0.359).abs() < 1e-9);
        assert_eq!(report.outliers_detected, 1);
    }

    #[test]
    fn test_results_ordered_by_timestamp_then_station() {
        let mut readings = southern_group(at(10));
        readings.extend(southern_group(t0()));
        let report = ValidationEngine::calibrated().validate_batch(&readings);
        let order: Vec<(DateTime<Utc>, &str)> = report
            .results
            .iter()
            .map(|r| (r.timestamp, r.station_id.as_str()))
            .collect();
        assert_eq!(
            order,
            vec![(t0(), "Ashdod"), (t0(), "Yafo"), (at(10), "Ashdod"), (at(10), "Yafo")]
        );
    }

    #[test]
    fn test_lone_station_uses_async_window() {
        let mut readings = southern_group(at(-40));
        readings.push(Reading::new("Acre", t0(), 0.40));
        let report = ValidationEngine::calibrated().validate_batch(&readings);
        let acre = report.results.iter().find(|r| r.station_id == "Acre").unwrap();
        assert_eq!(acre.validation_mode, ValidationMode::Asynchronous);
        assert_eq!(report.validation.total_validations, 2, "one sync slot, one window");
    }

    #[test]
    fn test_lone_reference_is_validated_against_peers() {
        let mut readings = southern_group(t0());
        readings.push(Reading::new("Ashkelon", at(30), 1.500));
        readings.push(Reading::new("Haifa", at(30), 1.540));
        let report = ValidationEngine::calibrated().validate_batch(&readings);

        let ashkelon = report.results.iter().find(|r| r.station_id == "Ashkelon").unwrap();
        assert_eq!(ashkelon.validation_mode, ValidationMode::Asynchronous);
        assert!((ashkelon.baseline_m.unwrap() - 0.319).abs() < 1e-9);
        assert!(ashkelon.is_outlier, "1.500m is far above its peers");
        assert!(ashkelon.excluded_from_baseline);

        let haifa = report.results.iter().find(|r| r.station_id == "Haifa").unwrap();
        assert_eq!(haifa.validation_mode, ValidationMode::Asynchronous);
        assert!(haifa.is_outlier, "Haifa is judged against the checked baseline");
    }

    #[test]
    fn test_lone_reference_baseline_is_not_committed() {
        let mut history = BaselineHistory::new();
        let mut readings = southern_group(t0());
        readings.push(Reading::new("Ashkelon", at(30), 0.321));
        ValidationEngine::calibrated().validate_batch_with_history(&readings, &mut history);
        assert_eq!(history.len(), 1, "only the synchronous slot is history");
        assert!(history.get(&at(30)).is_none());
    }

    #[test]
    fn test_lone_reference_without_peers_stands_alone() {
        let readings = vec![
            Reading::new("Ashkelon", t0(), 0.321),
            Reading::new("Haifa", t0(), 0.36),
        ];
        let report = ValidationEngine::calibrated().validate_batch(&readings);
        assert!(report.results.iter().all(|r| r.validation_mode == ValidationMode::Synchronous));
        assert!((report.results[0].baseline_m.unwrap() - 0.321).abs() < 1e-9);
    }

    #[test]
    fn test_async_miss_falls_back_to_history() {
        let mut readings = southern_group(at(-90));
        readings.push(Reading::new("Acre", t0(), 0.40));
        let report = ValidationEngine::calibrated().validate_batch(&readings);
        let acre = report.results.iter().find(|r| r.station_id == "Acre").unwrap();
        assert_eq!(acre.validation_mode, ValidationMode::Historical);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_no_data_anywhere_is_unresolved() {
        let readings = vec![Reading::new("Eilat", t0(), 0.60)];
        let report = ValidationEngine::calibrated().validate_batch(&readings);
        assert_eq!(report.results[0].validation_mode, ValidationMode::Unresolved);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].kind, FailureKind::BaselineUnresolvable);
        assert_eq!(report.failures[0].timestamp, Some(t0()));
    }

    #[test]
    fn test_history_is_carried_between_batches() {
        let engine = ValidationEngine::calibrated();
        let mut history = BaselineHistory::new();
        engine.validate_batch_with_history(&southern_group(at(-180)), &mut history);
        assert_eq!(history.len(), 1);

        let report =
            engine.validate_batch_with_history(&[Reading::new("Haifa", t0(), 0.36)], &mut history);
        assert_eq!(report.results[0].validation_mode, ValidationMode::Historical);
        assert_eq!(history.len(), 1, "fallback estimates are never committed");
    }

    #[test]
    fn test_invalid_and_unknown_readings_do_not_abort_batch() {
        let mut readings = southern_group(t0());
        readings.push(Reading::new("Hadera", t0(), 0.30));
        readings.push(Reading::new("Haifa", t0(), f64::NAN));
        let report = ValidationEngine::calibrated().validate_batch(&readings);
        assert_eq!(report.total_records, 2);
        let kinds: Vec<FailureKind> = report.failures.iter().map(|f| f.kind).collect();
        assert!(kinds.contains(&FailureKind::ConfigurationError));
        assert!(kinds.contains(&FailureKind::InvalidReading));
    }
}
