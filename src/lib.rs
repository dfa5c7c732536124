//! Sea-level quality control for a network of coastal tide gauges.
//!
//! A batch of readings goes in; per-reading outlier flags, corrected
//! values and validation statistics come out. The baseline for each
//! timestamp comes from a mutually agreeing reference group, with an
//! asynchronous window and a historical fallback for gaps.
//!
//! Module tree:
//! - `model`    — shared types and `EngineError`.
//! - `stations` — calibrated gauge registry and the `StationTable`.
//! - `config`   — `EngineConfig` and TOML loading.
//! - `logging`  — component/station tagged logger.
//! - `ingest`   — CSV / JSON reading exports.
//! - `analysis` — screening, cross-validation, baselines, fallbacks.
//! - `alert`    — outlier detection against a baseline.
//! - `engine`   — batch orchestration.
//! - `report`   — batch report, query payloads, cleaned series.

pub mod alert;
pub mod analysis;
pub mod config;
pub mod engine;
pub mod ingest;
pub mod logging;
pub mod model;
pub mod report;
pub mod stations;

pub use analysis::historical::BaselineHistory;
pub use config::EngineConfig;
pub use engine::ValidationEngine;
pub use model::{
    BaselineEstimate, BaselineSource, BatchReport, EngineError, Failure, FailureKind, Reading,
    StationGroup, StationProfile, ValidationMode, ValidationResult, ValidationStats,
};
pub use report::ValidationQuery;
pub use stations::StationTable;
