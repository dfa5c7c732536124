use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{DateTime, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;

use seamon_service::config::{self, DEFAULT_CONFIG_PATH};
use seamon_service::ingest::csv;
use seamon_service::logging::{self, Component, LogLevel};
use seamon_service::report::{self, SeriesValue};
use seamon_service::{
    BaselineEstimate, BaselineHistory, EngineConfig, EngineError, StationTable, ValidationEngine,
    ValidationQuery,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Query {
    /// Outlier list with counts and percentage
    Outliers,
    /// Corrected value for every reading
    Corrections,
    /// Exclusions, fallback share and mode distribution
    Health,
    /// Outlier-free per-station series for forecasting
    Clean,
    /// The full batch report
    Batch,
}

#[derive(Parser, Debug)]
#[command(about = "Validate coastal sea-level readings against a cross-validated reference baseline")]
struct Args {
    /// CSV export or JSON array of readings
    #[arg(long)]
    readings: PathBuf,

    /// Engine settings and station table (TOML)
    #[arg(long, env = "SEAMON_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = Query::Outliers)]
    query: Query,

    /// Inclusive range start (RFC 3339)
    #[arg(long)]
    start: Option<DateTime<Utc>>,

    /// Inclusive range end (RFC 3339)
    #[arg(long)]
    end: Option<DateTime<Utc>>,

    /// Restrict output to these stations (repeatable)
    #[arg(long = "station")]
    stations: Vec<String>,

    /// Previously committed live baselines (JSON array)
    #[arg(long)]
    history: Option<PathBuf>,

    /// Write the updated baseline history here
    #[arg(long)]
    history_out: Option<PathBuf>,

    /// Use corrected instead of measured values for `--query clean`
    #[arg(long)]
    corrected: bool,

    /// Print a human-readable summary to stdout after the JSON
    #[arg(long)]
    summary: bool,

    #[arg(long, env = "SEAMON_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, env = "SEAMON_LOG_FILE")]
    log_file: Option<String>,
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();

    let level = args.log_level.parse::<LogLevel>().unwrap_or_else(|err| {
        eprintln!("{}, using info", err);
        LogLevel::Info
    });
    logging::init_logger(level, args.log_file.as_deref(), true);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            logging::error(Component::System, None, &err.to_string());
            eprintln!("seamon: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn run(args: &Args) -> Result<(), EngineError> {
    let (engine_config, table) = load_settings(args.config.as_deref())?;
    let engine = ValidationEngine::new(table, engine_config)?;

    let parsed = csv::load_readings(&args.readings)?;
    for row in &parsed.rejected {
        logging::warn(
            Component::Ingest,
            None,
            &format!("line {}: {}", row.line, row.message),
        );
    }

    let mut history = match &args.history {
        Some(path) => load_history(path)?,
        None => BaselineHistory::new(),
    };
    let batch = engine.validate_batch_with_history(&parsed.readings, &mut history);

    if let Some(path) = &args.history_out {
        save_history(path, &history)?;
    }

    let query = ValidationQuery {
        start: args.start,
        end: args.end,
        stations: if args.stations.is_empty() {
            None
        } else {
            Some(args.stations.iter().cloned().collect())
        },
    };

    let cfg = engine.config();
    match args.query {
        Query::Outliers => print_json(&report::outlier_report(&batch, &query, cfg))?,
        Query::Corrections => print_json(&report::correction_report(&batch, &query, cfg))?,
        Query::Health => print_json(&report::health_report(&batch, &query, cfg))?,
        Query::Clean => {
            let selected: Vec<_> = report::select(&batch, &query, cfg.max_records)
                .into_iter()
                .cloned()
                .collect();
            let value = if args.corrected {
                SeriesValue::Corrected
            } else {
                SeriesValue::Measured
            };
            print_json(&report::clean_series(&selected, value))?
        }
        Query::Batch => print_json(&batch)?,
    }

    if args.summary {
        report::print_summary(&report::health_report(&batch, &query, cfg));
    }
    Ok(())
}

/// Explicit path (flag or `SEAMON_CONFIG`) must load. Otherwise the default
/// path is tried and the calibrated table is used when it is absent.
fn load_settings(path: Option<&Path>) -> Result<(EngineConfig, StationTable), EngineError> {
    if let Some(path) = path {
        let settings = config::load_config(path)?;
        logging::info(
            Component::Config,
            None,
            &format!("Loaded {} station profiles from {}", settings.1.len(), path.display()),
        );
        return Ok(settings);
    }

    let default_path = Path::new(DEFAULT_CONFIG_PATH);
    if default_path.exists() {
        return config::load_config(default_path);
    }

    logging::warn(
        Component::Config,
        None,
        &format!(
            "{} not found, using calibrated station table and default settings",
            DEFAULT_CONFIG_PATH
        ),
    );
    Ok((EngineConfig::default(), StationTable::calibrated()))
}

fn load_history(path: &Path) -> Result<BaselineHistory, EngineError> {
    let text = fs::read_to_string(path)
        .map_err(|e| EngineError::Io(format!("{}: {}", path.display(), e)))?;
    let estimates: Vec<BaselineEstimate> =
        serde_json::from_str(&text).map_err(|e| EngineError::Parse(e.to_string()))?;
    let history = BaselineHistory::from_estimates(estimates);
    logging::info(
        Component::Historical,
        None,
        &format!("Loaded {} historical baselines", history.len()),
    );
    Ok(history)
}

fn save_history(path: &Path, history: &BaselineHistory) -> Result<(), EngineError> {
    let estimates: Vec<&BaselineEstimate> = history.iter().map(|e| e.as_ref()).collect();
    let text =
        serde_json::to_string_pretty(&estimates).map_err(|e| EngineError::Parse(e.to_string()))?;
    fs::write(path, text).map_err(|e| EngineError::Io(format!("{}: {}", path.display(), e)))
}

fn print_json<T: Serialize>(value: &T) -> Result<(), EngineError> {
    let text =
        serde_json::to_string_pretty(value).map_err(|e| EngineError::Parse(e.to_string()))?;
    println!("{}", text);
    Ok(())
}
