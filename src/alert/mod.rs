/// Reading-level judgements against a resolved baseline.
///
/// Submodules:
/// - `outliers` — expected value, signed deviation and outlier flag.

pub mod outliers;
