/// Baseline derivation for the sea-level monitoring service.
///
/// Everything between "a batch of screened readings" and "a baseline value
/// for each timestamp" lives here. Outlier scoring against that baseline is
/// in `alert`.
///
/// Submodules:
/// - `grouping`         — screens raw readings and buckets them by timestamp.
/// - `cross_validation` — reference group integrity check (peer median).
/// - `baseline`         — mean of the surviving reference readings.
/// - `window`           — asynchronous ±window baseline for lone readings.
/// - `historical`       — recency-weighted fallback from past baselines.

pub mod baseline;
pub mod cross_validation;
pub mod grouping;
pub mod historical;
pub mod window;
