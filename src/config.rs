//! Engine configuration.
//!
//! Thresholds, windows and the station table are read from a TOML file so
//! operators can recalibrate without a rebuild:
//!
//! ```toml
//! [engine]
//! agreement_threshold_m = 0.05
//! async_window_minutes = 60
//! lookback_hours = 72
//!
//! [engine.decay]
//! shape = "exponential"
//! e_folding_hours = 1.0
//!
//! [[station]]
//! id = "Yafo"
//! group = "reference"
//! offset_m = 0.0
//! tolerance_m = 0.03
//! ```
//!
//! Every `[engine]` key is optional. A file without any `[[station]]`
//! entries is rejected with `NoStationProfiles`.

use std::fs;
use std::path::Path;

use chrono::Duration;
use serde::Deserialize;

use crate::model::{EngineError, StationProfile};
use crate::stations::StationTable;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./seamon.toml";

/// Widest accepted asynchronous half-window: one day.
pub const MAX_ASYNC_WINDOW_MINUTES: i64 = 24 * 60;

/// Longest accepted historical look-back: ten years.
pub const MAX_LOOKBACK_HOURS: i64 = 24 * 365 * 10;

// ---------------------------------------------------------------------------
// Recency decay
// ---------------------------------------------------------------------------

/// How historical baselines are weighted by age.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RecencyDecay {
    /// `w = exp(-age / e_folding)`.
    Exponential { e_folding_hours: f64 },
    /// `w = 1 - age / lookback`; zero at the edge of the look-back window.
    Linear,
}

impl Default for RecencyDecay {
    fn default() -> Self {
        RecencyDecay::Exponential {
            e_folding_hours: 1.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Engine settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Mutual-agreement threshold for reference cross-validation, meters.
    pub agreement_threshold_m: f64,
    /// Half-width of the asynchronous search window.
    pub async_window_minutes: i64,
    /// How far back historical fallback may look.
    pub lookback_hours: i64,
    pub decay: RecencyDecay,
    pub historical_fallback: bool,
    /// Fewest earlier baselines a historical fallback may be built from.
    pub min_historical_estimates: usize,
    /// Most-recent results kept by the query operations (0 = unlimited).
    pub max_records: usize,
    /// Most-recent outliers listed by the outlier query (0 = unlimited).
    pub max_outliers: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agreement_threshold_m: 0.05,
            async_window_minutes: 60,
            lookback_hours: 72,
            decay: RecencyDecay::default(),
            historical_fallback: true,
            min_historical_estimates: 1,
            max_records: 3000,
            max_outliers: 500,
        }
    }
}

impl EngineConfig {
    /// Clamped to `0..=MAX_ASYNC_WINDOW_MINUTES`.
    pub fn async_window(&self) -> Duration {
        Duration::try_minutes(self.async_window_minutes.clamp(0, MAX_ASYNC_WINDOW_MINUTES))
            .unwrap_or(Duration::zero())
    }

    /// Clamped to `0..=MAX_LOOKBACK_HOURS`.
    pub fn lookback(&self) -> Duration {
        Duration::try_hours(self.lookback_hours.clamp(0, MAX_LOOKBACK_HOURS))
            .unwrap_or(Duration::zero())
    }

    /// Rejects settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.agreement_threshold_m.is_finite() || self.agreement_threshold_m < 0.0 {
            return Err(EngineError::InvalidConfig(format!(
                "agreement_threshold_m must be a non-negative number, got {}",
                self.agreement_threshold_m
            )));
        }
        if self.async_window_minutes <= 0
            || self.async_window_minutes > MAX_ASYNC_WINDOW_MINUTES
            || Duration::try_minutes(self.async_window_minutes).is_none()
        {
            return Err(EngineError::InvalidConfig(format!(
                "async_window_minutes must be in 1..={}, got {}",
                MAX_ASYNC_WINDOW_MINUTES, self.async_window_minutes
            )));
        }
        if self.lookback_hours <= 0
            || self.lookback_hours > MAX_LOOKBACK_HOURS
            || Duration::try_hours(self.lookback_hours).is_none()
        {
            return Err(EngineError::InvalidConfig(format!(
                "lookback_hours must be in 1..={}, got {}",
                MAX_LOOKBACK_HOURS, self.lookback_hours
            )));
        }
        if let RecencyDecay::Exponential { e_folding_hours } = self.decay {
            if !e_folding_hours.is_finite() || e_folding_hours <= 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "e_folding_hours must be positive, got {}",
                    e_folding_hours
                )));
            }
        }
        if self.min_historical_estimates == 0 {
            return Err(EngineError::InvalidConfig(
                "min_historical_estimates must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File loading
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    station: Vec<StationProfile>,
}

/// Parses TOML text into validated engine settings and a station table.
pub fn parse_config(text: &str) -> Result<(EngineConfig, StationTable), EngineError> {
    let file: ConfigFile =
        toml::from_str(text).map_err(|e| EngineError::Parse(e.to_string()))?;
    file.engine.validate()?;
    let table = StationTable::new(file.station)?;
    Ok((file.engine, table))
}

/// Loads the config file at `path`.
pub fn load_config(path: impl AsRef<Path>) -> Result<(EngineConfig, StationTable), EngineError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| EngineError::Io(format!("{}: {}", path.display(), e)))?;
    parse_config(&text)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
