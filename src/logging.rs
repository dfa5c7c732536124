/// Structured logging for the sea-level quality-control service
///
/// Provides context-rich logging tagged with the engine component and,
/// where relevant, the station id. Supports console output and an
/// append-only log file for daemon operation. Until `init_logger` is called
/// every log call is a no-op, so the engine can be used as a plain library.

use chrono::Utc;
use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::str::FromStr;
use std::sync::Mutex;

use crate::model::{Failure, FailureKind};

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine Components
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    CrossValidation,
    Baseline,
    Window,
    Historical,
    Detector,
    Report,
    Config,
    Ingest,
    System,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::CrossValidation => write!(f, "XVAL"),
            Component::Baseline => write!(f, "BASE"),
            Component::Window => write!(f, "ASYNC"),
            Component::Historical => write!(f, "HIST"),
            Component::Detector => write!(f, "DETECT"),
            Component::Report => write!(f, "REPORT"),
            Component::Config => write!(f, "CONFIG"),
            Component::Ingest => write!(f, "INGEST"),
            Component::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - a sensor glitch the engine is built to absorb
    Expected,
    /// Unexpected failure - indicates a configuration or data contract problem
    Unexpected,
    /// Unknown - may be a transient dropout or a lasting outage
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Global logger instance
static LOGGER: Mutex<Option<Logger>> = Mutex::new(None);

pub struct Logger {
    /// Minimum log level to display
    min_level: LogLevel,
    /// Optional file path for logging
    log_file: Option<String>,
    /// Whether to include timestamps in console output
    console_timestamps: bool,
}

impl Logger {
    /// Install the global logger, replacing any previous one
    pub fn init(min_level: LogLevel, log_file: Option<String>, console_timestamps: bool) {
        let logger = Logger {
            min_level,
            log_file,
            console_timestamps,
        };

        if let Ok(mut slot) = LOGGER.lock() {
            *slot = Some(logger);
        }
    }

    fn log(&self, level: LogLevel, component: Component, station_id: Option<&str>, message: &str) {
        if level < self.min_level {
            return;
        }

        let timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC");
        let station_part = station_id.map(|s| format!(" [{}]", s)).unwrap_or_default();
        let log_entry = format!(
            "{} {} {}{}: {}",
            timestamp, level, component, station_part, message
        );

        // stdout carries report JSON; console logging stays on stderr
        if self.console_timestamps {
            eprintln!("{}", log_entry);
        } else {
            match level {
                LogLevel::Error => eprintln!("   ✗ {}{}: {}", component, station_part, message),
                LogLevel::Warning => eprintln!("   ⚠ {}{}: {}", component, station_part, message),
                LogLevel::Info => eprintln!("   {}", message),
                LogLevel::Debug => eprintln!("   [DEBUG] {}{}: {}", component, station_part, message),
            }
        }

        if let Some(ref path) = self.log_file {
            if let Err(e) = Self::append_to_file(path, &log_entry) {
                eprintln!("Failed to write to log file {}: {}", path, e);
            }
        }
    }

    fn append_to_file(path: &str, entry: &str) -> std::io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        writeln!(file, "{}", entry)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Initialize the global logger
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    Logger::init(min_level, log_file.map(String::from), console_timestamps);
}

fn emit(level: LogLevel, component: Component, station_id: Option<&str>, message: &str) {
    if let Ok(guard) = LOGGER.lock() {
        if let Some(logger) = guard.as_ref() {
            logger.log(level, component, station_id, message);
        }
    }
}

pub fn info(component: Component, station_id: Option<&str>, message: &str) {
    emit(LogLevel::Info, component, station_id, message);
}

pub fn warn(component: Component, station_id: Option<&str>, message: &str) {
    emit(LogLevel::Warning, component, station_id, message);
}

pub fn error(component: Component, station_id: Option<&str>, message: &str) {
    emit(LogLevel::Error, component, station_id, message);
}

pub fn debug(component: Component, station_id: Option<&str>, message: &str) {
    emit(LogLevel::Debug, component, station_id, message);
}

// ---------------------------------------------------------------------------
// Failure Logging
// ---------------------------------------------------------------------------

/// Classify a batch failure by how alarming it is
pub fn classify_failure(kind: FailureKind) -> FailureType {
    match kind {
        // A gauge reporting NaN or nothing is routine sensor noise.
        FailureKind::InvalidReading => FailureType::Expected,
        // Data for a station nobody configured means the table is out of date.
        FailureKind::ConfigurationError => FailureType::Unexpected,
        FailureKind::BaselineUnresolvable => FailureType::Unknown,
    }
}

fn component_for(kind: FailureKind) -> Component {
    match kind {
        FailureKind::InvalidReading => Component::Ingest,
        FailureKind::ConfigurationError => Component::Config,
        FailureKind::BaselineUnresolvable => Component::Historical,
    }
}

/// Log a batch failure at the level its classification calls for
pub fn log_failure(failure: &Failure) {
    let failure_type = classify_failure(failure.kind);
    let message = format!("{} [{}]: {}", failure.kind, failure_type, failure.message);
    let component = component_for(failure.kind);
    let station = failure.station_id.as_deref();

    match failure_type {
        FailureType::Expected => debug(component, station, &message),
        FailureType::Unexpected => error(component, station, &message),
        FailureType::Unknown => warn(component, station, &message),
    }
}

// ---------------------------------------------------------------------------
// Batch Summary Logging
// ---------------------------------------------------------------------------

/// Log a one-line summary of a validation batch
pub fn log_batch_summary(total: usize, resolved: usize, outliers: usize, failures: usize) {
    let message = format!(
        "Validation complete: {}/{} resolved, {} outliers, {} failures",
        resolved, total, outliers, failures
    );

    if failures == 0 {
        info(Component::Report, None, &message);
    } else if resolved == 0 {
        error(Component::Report, None, &message);
    } else {
        warn(Component::Report, None, &message);
    }
}
