/// Tide-gauge export parsing.
///
/// Gauge exports are flat CSV files, one row per station per sample:
///
/// ```text
/// Tab_DateTime,Station,Tab_Value_mDepthC1,Tab_Temperature
/// 2025-11-06 12:00:00,Yafo,0.320,22.4
/// 2025-11-06 12:00:00,Haifa,null,
/// ```
///
/// Columns are located by header name, so extra columns and any column
/// order are accepted. Fields may be double-quoted, in which case they can
/// hold commas and `""` stands for a literal quote. Quoted line breaks are
/// not supported; every record is one line. `Tab_Temperature` is optional. Gaps in the level
/// column (`null`, empty, `NaN`) produce a reading with no level; the engine
/// rejects those later as invalid instead of reading them as zero.
///
/// Readings can also be supplied as a JSON array of `Reading` objects.

use std::fs;
use std::path::Path;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::logging::{self, Component};
use crate::model::{EngineError, Reading};

pub const TIMESTAMP_COLUMN: &str = "Tab_DateTime";
pub const STATION_COLUMN: &str = "Station";
pub const LEVEL_COLUMN: &str = "Tab_Value_mDepthC1";
pub const TEMPERATURE_COLUMN: &str = "Tab_Temperature";

const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"];

// ============================================================================
// Parse results
// ============================================================================

/// A row that could not be turned into a reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// 1-based line number in the source text.
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReadings {
    pub readings: Vec<Reading>,
    pub rejected: Vec<RowError>,
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    timestamp: usize,
    station: usize,
    level: usize,
    temperature: Option<usize>,
}

impl Columns {
    fn from_header(header: &str) -> Result<Self, EngineError> {
        let fields = split_fields(header);
        let names: Vec<&str> = fields.iter().map(|f| clean(f)).collect();
        let find = |wanted: &str| names.iter().position(|n| n.eq_ignore_ascii_case(wanted));
        let require = |wanted: &str| {
            find(wanted).ok_or_else(|| {
                EngineError::Parse(format!("missing column {} in header", wanted))
            })
        };
        Ok(Self {
            timestamp: require(TIMESTAMP_COLUMN)?,
            station: require(STATION_COLUMN)?,
            level: require(LEVEL_COLUMN)?,
            temperature: find(TEMPERATURE_COLUMN),
        })
    }
}

// ============================================================================
// Field helpers
// ============================================================================

/// Splits one CSV record on commas outside double quotes, unquoting as it
/// goes.
fn split_fields(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => fields.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    fields.push(current);
    fields
}

fn clean(field: &str) -> &str {
    field.trim().trim_matches('"').trim()
}

/// Optional numeric field: `null`, empty and `NaN` are gaps, anything else
/// must parse.
fn parse_field(raw: &str) -> Result<Option<f64>, String> {
    let value = clean(raw);
    if value.is_empty() || value.eq_ignore_ascii_case("null") || value.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    value
        .parse::<f64>()
        .map(Some)
        .map_err(|_| format!("not a number: {:?}", value))
}

/// `YYYY-MM-DD HH:MM:SS` (UTC) or RFC 3339.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    let value = clean(raw);
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("unrecognized timestamp {:?}", value))
}

fn parse_row(fields: &[&str], cols: Columns) -> Result<Reading, String> {
    let get = |idx: usize| {
        fields
            .get(idx)
            .copied()
            .ok_or_else(|| format!("expected at least {} fields, found {}", idx + 1, fields.len()))
    };

    let timestamp = parse_timestamp(get(cols.timestamp)?)?;
    let station_id = clean(get(cols.station)?);
    if station_id.is_empty() {
        return Err("empty station id".to_string());
    }
    let measured_level = parse_field(get(cols.level)?)?;
    let measured_temperature = match cols.temperature.and_then(|idx| fields.get(idx)) {
        Some(raw) => parse_field(raw)?,
        None => None,
    };

    Ok(Reading {
        station_id: station_id.to_string(),
        timestamp,
        measured_level,
        measured_temperature,
    })
}

// ============================================================================
// Public parsers
// ============================================================================

/// Parses CSV text. A missing header is fatal; malformed rows are skipped
/// and listed in `rejected`.
pub fn parse_readings_csv(text: &str) -> Result<ParsedReadings, EngineError> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header) = lines
        .next()
        .ok_or_else(|| EngineError::Parse("empty readings file".to_string()))?;
    let cols = Columns::from_header(header)?;

    let mut parsed = ParsedReadings::default();
    for (i, line) in lines {
        let owned = split_fields(line);
        let fields: Vec<&str> = owned.iter().map(String::as_str).collect();
        match parse_row(&fields, cols) {
            Ok(reading) => parsed.readings.push(reading),
            Err(message) => parsed.rejected.push(RowError { line: i + 1, message }),
        }
    }

    if !parsed.rejected.is_empty() {
        logging::warn(
            Component::Ingest,
            None,
            &format!(
                "Skipped {} malformed row(s), first at line {}",
                parsed.rejected.len(),
                parsed.rejected[0].line
            ),
        );
    }
    Ok(parsed)
}

/// Parses a JSON array of readings.
pub fn parse_readings_json(text: &str) -> Result<Vec<Reading>, EngineError> {
    serde_json::from_str(text).map_err(|e| EngineError::Parse(e.to_string()))
}

/// Loads readings from disk; `.json` files are JSON, anything else is CSV.
pub fn load_readings(path: impl AsRef<Path>) -> Result<ParsedReadings, EngineError> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)
        .map_err(|e| EngineError::Io(format!("{}: {}", path.display(), e)))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    let parsed = if is_json {
        ParsedReadings {
            readings: parse_readings_json(&text)?,
            rejected: Vec::new(),
        }
    } else {
        parse_readings_csv(&text)?
    };

    logging::info(
        Component::Ingest,
        None,
        &format!("Loaded {} readings from {}", parsed.readings.len(), path.display()),
    );
    Ok(parsed)
}

// ============================================================================
// Tests
// ============================================================================
