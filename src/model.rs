/// Core data types for the sea-level quality-control engine.
///
/// This module defines the shared domain model imported by all other modules.
/// It contains no I/O and no decision logic: readings come in from ingestion,
/// baselines and validation results are produced by `analysis` and `alert`,
/// and the report types are assembled by `report`.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Reading types
// ---------------------------------------------------------------------------

/// A single sea-level observation from a coastal gauge.
///
/// `measured_level` is optional because exports carry gaps (`null`, empty
/// cells). A missing or non-finite level is never coerced; it is rejected
/// as an `InvalidReading` before any baseline work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    /// Sea level in meters (signed).
    pub measured_level: Option<f64>,
    #[serde(default)]
    pub measured_temperature: Option<f64>,
}

impl Reading {
    pub fn new(station_id: impl Into<String>, timestamp: DateTime<Utc>, level_m: f64) -> Self {
        Self {
            station_id: station_id.into(),
            timestamp,
            measured_level: Some(level_m),
            measured_temperature: None,
        }
    }

    /// Returns the measured level, or `InvalidReading` if it is missing or
    /// not a finite number.
    pub fn level(&self) -> Result<f64, EngineError> {
        match self.measured_level {
            Some(v) if v.is_finite() => Ok(v),
            Some(v) => Err(EngineError::InvalidReading {
                station_id: self.station_id.clone(),
                timestamp: self.timestamp,
                reason: format!("non-finite level {}", v),
            }),
            None => Err(EngineError::InvalidReading {
                station_id: self.station_id.clone(),
                timestamp: self.timestamp,
                reason: "missing level".to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Station configuration
// ---------------------------------------------------------------------------

/// Whether a station contributes to the baseline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StationGroup {
    Reference,
    Other,
}

impl fmt::Display for StationGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationGroup::Reference => write!(f, "reference"),
            StationGroup::Other => write!(f, "other"),
        }
    }
}

/// Offset and tolerance for one station, in meters.
///
/// `offset_m` is the expected bias against the baseline; `tolerance_m` is
/// the largest absolute deviation from `baseline + offset` still accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationProfile {
    #[serde(alias = "id")]
    pub station_id: String,
    pub group: StationGroup,
    pub offset_m: f64,
    pub tolerance_m: f64,
}

impl StationProfile {
    pub fn is_reference(&self) -> bool {
        self.group == StationGroup::Reference
    }
}

// ---------------------------------------------------------------------------
// Baseline types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineSource {
    /// Built from reference readings at (or near) the timestamp.
    Live,
    /// Reconstructed from earlier live baselines.
    HistoricalFallback,
}

/// The reference sea level for one timestamp, before station offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineEstimate {
    pub timestamp: DateTime<Utc>,
    pub value_m: f64,
    pub source: BaselineSource,
    /// Reference stations dropped by cross-validation. Empty when every
    /// member agreed (and always empty for historical fallbacks).
    pub excluded_stations: BTreeSet<String>,
    pub contributing_stations: BTreeSet<String>,
}

impl BaselineEstimate {
    pub fn exclusion_count(&self) -> usize {
        self.excluded_stations.len()
    }

    pub fn is_live(&self) -> bool {
        self.source == BaselineSource::Live
    }
}

// ---------------------------------------------------------------------------
// Validation output
// ---------------------------------------------------------------------------

/// How a reading's baseline was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationMode {
    Synchronous,
    Asynchronous,
    Historical,
    /// No baseline could be built; the reading was not judged.
    Unresolved,
}

impl fmt::Display for ValidationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationMode::Synchronous => write!(f, "synchronous"),
            ValidationMode::Asynchronous => write!(f, "asynchronous"),
            ValidationMode::Historical => write!(f, "historical"),
            ValidationMode::Unresolved => write!(f, "unresolved"),
        }
    }
}

/// Outcome for one reading.
///
/// `expected_m`, `corrected_m`, `deviation_m` and `baseline_used` are `None`
/// only for `Unresolved` readings. Whenever a baseline exists,
/// `corrected_m == baseline_used.value_m + offset_m`, outlier or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub station_id: String,
    pub timestamp: DateTime<Utc>,
    pub is_outlier: bool,
    pub actual_m: f64,
    pub expected_m: Option<f64>,
    pub corrected_m: Option<f64>,
    /// Signed: `actual_m - expected_m`.
    pub deviation_m: Option<f64>,
    /// Copy of `baseline_used.value_m` for flat consumers.
    pub baseline_m: Option<f64>,
    pub offset_m: f64,
    pub tolerance_m: f64,
    pub baseline_used: Option<Arc<BaselineEstimate>>,
    pub validation_mode: ValidationMode,
    /// The station was dropped by cross-validation of `baseline_used`.
    pub excluded_from_baseline: bool,
    pub measured_temperature: Option<f64>,
}

impl ValidationResult {
    pub fn abs_deviation(&self) -> Option<f64> {
        self.deviation_m.map(f64::abs)
    }

    pub fn is_resolved(&self) -> bool {
        self.validation_mode != ValidationMode::Unresolved
    }
}

/// Aggregate cross-validation counters for a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationStats {
    /// Cross-validation passes run (synchronous slots and async windows).
    pub total_validations: usize,
    pub total_exclusions: usize,
    /// `total_exclusions / total_validations * 100`, 0 with no validations.
    pub exclusion_rate: f64,
    pub baseline_calculations: usize,
}

/// Everything the engine produced for one batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub total_records: usize,
    pub outliers_detected: usize,
    pub outlier_percentage: f64,
    /// Exclusions summed over the distinct baselines used in the batch.
    pub exclusion_count: usize,
    /// Ordered by timestamp, then station id.
    pub results: Vec<ValidationResult>,
    pub failures: Vec<Failure>,
    pub validation: ValidationStats,
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    BaselineUnresolvable,
    InvalidReading,
    ConfigurationError,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureKind::BaselineUnresolvable => write!(f, "baseline_unresolvable"),
            FailureKind::InvalidReading => write!(f, "invalid_reading"),
            FailureKind::ConfigurationError => write!(f, "configuration_error"),
        }
    }
}

/// A per-timestamp or per-station problem that did not abort the batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub station_id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors raised by the engine and its configuration layer.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// No live, windowed or historical reference data for the timestamp.
    #[error("baseline unresolvable at {timestamp}")]
    BaselineUnresolvable { timestamp: DateTime<Utc> },

    #[error("invalid reading from {station_id} at {timestamp}: {reason}")]
    InvalidReading {
        station_id: String,
        timestamp: DateTime<Utc>,
        reason: String,
    },

    /// A station in the input data has no profile.
    #[error("no station profile for {station_id}")]
    ConfigurationError { station_id: String },

    /// The station table is empty; nothing can be validated.
    #[error("no station profiles loaded")]
    NoStationProfiles,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("parse error: {0}")]
    Parse(String),
}

impl EngineError {
    /// Converts a scoped error into a batch failure record. Returns `None`
    /// for batch-level errors, which are never collected.
    pub fn to_failure(&self) -> Option<Failure> {
        let message = self.to_string();
        match self {
            EngineError::BaselineUnresolvable { timestamp } => Some(Failure {
                kind: FailureKind::BaselineUnresolvable,
                station_id: None,
                timestamp: Some(*timestamp),
                message,
            }),
            EngineError::InvalidReading {
                station_id,
                timestamp,
                ..
            } => Some(Failure {
                kind: FailureKind::InvalidReading,
                station_id: Some(station_id.clone()),
                timestamp: Some(*timestamp),
                message,
            }),
            EngineError::ConfigurationError { station_id } => Some(Failure {
                kind: FailureKind::ConfigurationError,
                station_id: Some(station_id.clone()),
                timestamp: None,
                message,
            }),
            _ => None,
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::Io(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at_midnight() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 6, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_finite_level_is_accepted() {
        let reading = Reading::new("Yafo", at_midnight(), 0.320);
        assert_eq!(reading.level(), Ok(0.320));
    }

    #[test]
    fn test_missing_level_is_invalid_not_zero() {
        let mut reading = Reading::new("Yafo", at_midnight(), 0.0);
        reading.measured_level = None;
        match reading.level() {
            Err(EngineError::InvalidReading { reason, .. }) => {
                assert!(reason.contains("missing"), "reason was {:?}", reason)
            }
            other => panic!("expected InvalidReading, got {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_levels_are_invalid() {
        for bad in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let reading = Reading::new("Haifa", at_midnight(), bad);
            assert!(
                matches!(reading.level(), Err(EngineError::InvalidReading { .. })),
                "{} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_scoped_errors_become_failures() {
        let err = EngineError::ConfigurationError {
            station_id: "Hadera".to_string(),
        };
        let failure = err.to_failure().expect("configuration errors are scoped");
        assert_eq!(failure.kind, FailureKind::ConfigurationError);
        assert_eq!(failure.station_id.as_deref(), Some("Hadera"));

        let gap = EngineError::BaselineUnresolvable {
            timestamp: at_midnight(),
        };
        let failure = gap.to_failure().expect("baseline gaps are scoped");
        assert_eq!(failure.timestamp, Some(at_midnight()));
    }

    #[test]
    fn test_batch_level_errors_are_not_failures() {
        assert!(EngineError::NoStationProfiles.to_failure().is_none());
        assert!(EngineError::Parse("x".into()).to_failure().is_none());
    }

    #[test]
    fn test_station_profile_accepts_id_alias() {
        let profile: StationProfile = serde_json::from_str(
            r#"{"id":"Eilat","group":"other","offset_m":0.28,"tolerance_m":0.06}"#,
        )
        .expect("alias should deserialize");
        assert_eq!(profile.station_id, "Eilat");
        assert!(!profile.is_reference());
    }
}
