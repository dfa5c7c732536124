/// Reading ingestion.
///
/// Submodules:
/// - `csv` — gauge CSV exports (and JSON arrays) into `Reading`s.

pub mod csv;
