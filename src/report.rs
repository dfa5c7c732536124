//! Correction & Statistics Reporting
//!
//! Reshapes already-computed `ValidationResult`s into the payloads callers
//! render: the batch report, the outlier / correction / health queries, and
//! the corrected and cleaned series handed to forecasting consumers.
//!
//! Nothing in here decides whether a reading is an outlier.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EngineConfig;
use crate::logging::{self, Component};
use crate::model::{
    BaselineEstimate, BaselineSource, BatchReport, Failure, ValidationMode, ValidationResult,
    ValidationStats,
};
use crate::stations;

// ============================================================================
// Batch aggregation
// ============================================================================

/// `100 * outliers / total`, exactly 0 for an empty batch.
pub fn outlier_percentage(outliers: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * outliers as f64 / total as f64
    }
}

/// "<station> is <|dev|>m off. Expected: <expected>m (baseline + <offset>m),
/// Measured: <actual>m". `None` for unresolved readings.
pub fn outlier_message(result: &ValidationResult) -> Option<String> {
    let deviation = result.abs_deviation()?;
    let expected = result.expected_m?;
    Some(format!(
        "{} is {:.3}m off. Expected: {:.3}m (baseline + {:.2}m), Measured: {:.3}m",
        result.station_id, deviation, expected, result.offset_m, result.actual_m
    ))
}

/// Each baseline estimate used by `results`, once, in first-use order.
/// Estimates are shared between readings by `Arc`, so identity is pointer
/// identity.
pub fn distinct_baselines(results: &[ValidationResult]) -> Vec<&Arc<BaselineEstimate>> {
    let mut seen: HashSet<*const BaselineEstimate> = HashSet::new();
    results
        .iter()
        .filter_map(|r| r.baseline_used.as_ref())
        .filter(|b| seen.insert(Arc::as_ptr(*b)))
        .collect()
}

/// Exclusions summed over the distinct baselines in `results`.
pub fn exclusion_count(results: &[ValidationResult]) -> usize {
    distinct_baselines(results)
        .iter()
        .map(|b| b.exclusion_count())
        .sum()
}

pub fn validation_stats(
    total_validations: usize,
    total_exclusions: usize,
    baseline_calculations: usize,
) -> ValidationStats {
    let exclusion_rate = if total_validations == 0 {
        0.0
    } else {
        total_exclusions as f64 / total_validations as f64 * 100.0
    };
    ValidationStats {
        total_validations,
        total_exclusions,
        exclusion_rate,
        baseline_calculations,
    }
}

pub fn build_batch_report(
    results: Vec<ValidationResult>,
    failures: Vec<Failure>,
    validation: ValidationStats,
) -> BatchReport {
    let total_records = results.len();
    let outliers_detected = results.iter().filter(|r| r.is_outlier).count();
    BatchReport {
        total_records,
        outliers_detected,
        outlier_percentage: outlier_percentage(outliers_detected, total_records),
        exclusion_count: exclusion_count(&results),
        results,
        failures,
        validation,
    }
}

// ============================================================================
// Query selection
// ============================================================================

/// Date range (inclusive) and optional station filter applied to results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationQuery {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    /// `None` or empty selects every station.
    pub stations: Option<BTreeSet<String>>,
}

impl ValidationQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: Some(end),
            stations: None,
        }
    }

    pub fn with_stations<I, S>(mut self, stations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stations = Some(stations.into_iter().map(Into::into).collect());
        self
    }

    fn in_range(&self, timestamp: DateTime<Utc>) -> bool {
        self.start.is_none_or(|s| timestamp >= s) && self.end.is_none_or(|e| timestamp <= e)
    }

    fn has_station(&self, station_id: &str) -> bool {
        match &self.stations {
            Some(set) if !set.is_empty() => set.contains(station_id),
            _ => true,
        }
    }

    pub fn matches(&self, result: &ValidationResult) -> bool {
        self.in_range(result.timestamp) && self.has_station(&result.station_id)
    }

    /// Failures without a timestamp or station are kept when that part of
    /// the filter cannot be applied.
    pub fn matches_failure(&self, failure: &Failure) -> bool {
        failure.timestamp.is_none_or(|ts| self.in_range(ts))
            && failure
                .station_id
                .as_deref()
                .is_none_or(|id| self.has_station(id))
    }
}

/// Results selected by `query`, capped to the `max_records` most recent
/// (0 = unlimited). Keeps timestamp-then-station order.
pub fn select<'r>(
    report: &'r BatchReport,
    query: &ValidationQuery,
    max_records: usize,
) -> Vec<&'r ValidationResult> {
    let selected: Vec<&ValidationResult> =
        report.results.iter().filter(|r| query.matches(r)).collect();
    if max_records == 0 || selected.len() <= max_records {
        return selected;
    }
    logging::warn(
        Component::Report,
        None,
        &format!(
            "{} readings selected, keeping the {} most recent",
            selected.len(),
            max_records
        ),
    );
    let skip = selected.len() - max_records;
    selected.into_iter().skip(skip).collect()
}

fn selected_failures(report: &BatchReport, query: &ValidationQuery) -> Vec<Failure> {
    report
        .failures
        .iter()
        .filter(|f| query.matches_failure(f))
        .cloned()
        .collect()
}

// ============================================================================
// Outlier query
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierEntry {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub actual_m: f64,
    pub expected_m: f64,
    pub deviation_m: f64,
    pub corrected_m: f64,
    pub tolerance_m: f64,
    pub validation_mode: ValidationMode,
    pub excluded_from_baseline: bool,
    pub message: String,
}

impl OutlierEntry {
    fn from_result(result: &ValidationResult) -> Option<Self> {
        Some(Self {
            station_id: result.station_id.clone(),
            timestamp: result.timestamp,
            actual_m: result.actual_m,
            expected_m: result.expected_m?,
            deviation_m: result.deviation_m?,
            corrected_m: result.corrected_m?,
            tolerance_m: result.tolerance_m,
            validation_mode: result.validation_mode,
            excluded_from_baseline: result.excluded_from_baseline,
            message: outlier_message(result)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutlierReport {
    pub total_records: usize,
    pub outliers_detected: usize,
    pub outlier_percentage: f64,
    /// Newest first, at most `max_outliers`.
    pub outliers: Vec<OutlierEntry>,
    pub outliers_by_station: BTreeMap<String, usize>,
    pub failures: Vec<Failure>,
}

pub fn outlier_report(
    report: &BatchReport,
    query: &ValidationQuery,
    config: &EngineConfig,
) -> OutlierReport {
    let selected = select(report, query, config.max_records);
    let flagged: Vec<&ValidationResult> =
        selected.iter().copied().filter(|r| r.is_outlier).collect();

    let mut outliers_by_station: BTreeMap<String, usize> = BTreeMap::new();
    for result in &flagged {
        *outliers_by_station.entry(result.station_id.clone()).or_insert(0) += 1;
    }

    let limit = if config.max_outliers == 0 {
        flagged.len()
    } else {
        config.max_outliers
    };
    if flagged.len() > limit {
        logging::warn(
            Component::Report,
            None,
            &format!(
                "{} outliers found, returning the {} most recent",
                flagged.len(),
                limit
            ),
        );
    }
    let outliers = flagged
        .iter()
        .rev()
        .take(limit)
        .filter_map(|r| OutlierEntry::from_result(r))
        .collect();

    OutlierReport {
        total_records: selected.len(),
        outliers_detected: flagged.len(),
        outlier_percentage: outlier_percentage(flagged.len(), selected.len()),
        outliers,
        outliers_by_station,
        failures: selected_failures(report, query),
    }
}

// ============================================================================
// Correction query
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionEntry {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub actual_m: f64,
    /// `None` only when the timestamp was unresolved.
    pub corrected_m: Option<f64>,
    pub is_outlier: bool,
    pub validation_mode: ValidationMode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    pub total_records: usize,
    pub corrections: Vec<CorrectionEntry>,
    pub failures: Vec<Failure>,
}

pub fn correction_report(
    report: &BatchReport,
    query: &ValidationQuery,
    config: &EngineConfig,
) -> CorrectionReport {
    let corrections: Vec<CorrectionEntry> = select(report, query, config.max_records)
        .into_iter()
        .map(|r| CorrectionEntry {
            station_id: r.station_id.clone(),
            timestamp: r.timestamp,
            actual_m: r.actual_m,
            corrected_m: r.corrected_m,
            is_outlier: r.is_outlier,
            validation_mode: r.validation_mode,
        })
        .collect();
    CorrectionReport {
        total_records: corrections.len(),
        corrections,
        failures: selected_failures(report, query),
    }
}

// ============================================================================
// Health (validation report) query
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimestampExclusions {
    pub timestamp: DateTime<Utc>,
    pub validation_mode: ValidationMode,
    pub exclusion_count: usize,
    pub excluded_stations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub total_records: usize,
    pub total_timestamps: usize,
    /// One entry per selected timestamp, oldest first.
    pub exclusions: Vec<TimestampExclusions>,
    /// Share of timestamps (0..=1) validated against a historical baseline.
    pub fallback_fraction: f64,
    /// Readings per validation mode.
    pub mode_distribution: BTreeMap<String, usize>,
    pub outliers_by_station: BTreeMap<String, usize>,
    pub unresolved_timestamps: Vec<DateTime<Utc>>,
    /// Counters for the whole batch, before query filtering.
    pub validation: ValidationStats,
}

pub fn health_report(
    report: &BatchReport,
    query: &ValidationQuery,
    config: &EngineConfig,
) -> HealthReport {
    let selected = select(report, query, config.max_records);

    let mut per_timestamp: BTreeMap<DateTime<Utc>, (ValidationMode, Option<&Arc<BaselineEstimate>>)> =
        BTreeMap::new();
    let mut mode_distribution: BTreeMap<String, usize> = BTreeMap::new();
    let mut outliers_by_station: BTreeMap<String, usize> = BTreeMap::new();

    for result in &selected {
        per_timestamp
            .entry(result.timestamp)
            .or_insert((result.validation_mode, result.baseline_used.as_ref()));
        *mode_distribution
            .entry(result.validation_mode.to_string())
            .or_insert(0) += 1;
        if result.is_outlier {
            *outliers_by_station.entry(result.station_id.clone()).or_insert(0) += 1;
        }
    }

    let exclusions: Vec<TimestampExclusions> = per_timestamp
        .iter()
        .map(|(ts, (mode, baseline))| {
            let excluded_stations: Vec<String> = baseline
                .map(|b| b.excluded_stations.iter().cloned().collect())
                .unwrap_or_default();
            TimestampExclusions {
                timestamp: *ts,
                validation_mode: *mode,
                exclusion_count: excluded_stations.len(),
                excluded_stations,
            }
        })
        .collect();

    let historical = per_timestamp
        .values()
        .filter(|(_, b)| b.is_some_and(|b| b.source == BaselineSource::HistoricalFallback))
        .count();
    let fallback_fraction = if per_timestamp.is_empty() {
        0.0
    } else {
        historical as f64 / per_timestamp.len() as f64
    };

    let unresolved_timestamps = per_timestamp
        .iter()
        .filter(|(_, (mode, _))| *mode == ValidationMode::Unresolved)
        .map(|(ts, _)| *ts)
        .collect();

    HealthReport {
        total_records: selected.len(),
        total_timestamps: per_timestamp.len(),
        exclusions,
        fallback_fraction,
        mode_distribution,
        outliers_by_station,
        unresolved_timestamps,
        validation: report.validation.clone(),
    }
}

/// Print a human-readable summary of a health report.
pub fn print_summary(health: &HealthReport) {
    println!("\n{}", "=".repeat(60));
    println!("SEA LEVEL VALIDATION SUMMARY");
    println!("{}", "=".repeat(60));
    println!(
        "Readings:     {} across {} timestamps",
        health.total_records, health.total_timestamps
    );
    for (mode, count) in &health.mode_distribution {
        println!("  {:<13} {}", mode, count);
    }
    println!(
        "Fallback:     {:.1}% of timestamps",
        health.fallback_fraction * 100.0
    );
    println!(
        "Exclusions:   {} in {} cross-validations ({:.1}%)",
        health.validation.total_exclusions,
        health.validation.total_validations,
        health.validation.exclusion_rate
    );
    if !health.outliers_by_station.is_empty() {
        println!("Outliers:");
        for (station, count) in &health.outliers_by_station {
            println!("  {:>4}  {}", count, stations::describe_station(station));
        }
    }
    if !health.unresolved_timestamps.is_empty() {
        println!(
            "Unresolved:   {} timestamp(s) had no baseline",
            health.unresolved_timestamps.len()
        );
    }
    println!("{}", "=".repeat(60));
}

// ============================================================================
// Corrected and cleaned series
// ============================================================================

/// A reading after corrections were applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectedReading {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub level_m: f64,
    /// The measured value, kept whether or not it was replaced.
    pub original_m: f64,
    pub was_corrected: bool,
}

/// Copies every validated reading, replacing outliers with `corrected_m`.
pub fn apply_corrections(results: &[ValidationResult]) -> Vec<CorrectedReading> {
    results
        .iter()
        .map(|r| {
            let replacement = if r.is_outlier { r.corrected_m } else { None };
            CorrectedReading {
                station_id: r.station_id.clone(),
                timestamp: r.timestamp,
                level_m: replacement.unwrap_or(r.actual_m),
                original_m: r.actual_m,
                was_corrected: replacement.is_some(),
            }
        })
        .collect()
}

/// Which value a cleaned series carries for each kept reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesValue {
    #[default]
    Measured,
    Corrected,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeriesPoint {
    pub timestamp: DateTime<Utc>,
    pub level_m: f64,
}

/// Per-station training series for forecasters: outliers and unresolved
/// readings are dropped, the rest carry the chosen value.
pub fn clean_series(
    results: &[ValidationResult],
    value: SeriesValue,
) -> BTreeMap<String, Vec<SeriesPoint>> {
    let mut series: BTreeMap<String, Vec<SeriesPoint>> = BTreeMap::new();
    for result in results.iter().filter(|r| r.is_resolved() && !r.is_outlier) {
        let level_m = match value {
            SeriesValue::Measured => result.actual_m,
            SeriesValue::Corrected => match result.corrected_m {
                Some(v) => v,
                None => continue,
            },
        };
        series
            .entry(result.station_id.clone())
            .or_default()
            .push(SeriesPoint {
                timestamp: result.timestamp,
                level_m,
            });
    }
    series
}

// ============================================================================
// Tests
// ============================================================================
