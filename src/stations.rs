/// Station registry for the coastal sea-level monitoring service.
///
/// Defines the calibrated list of tide gauges and the immutable
/// `StationTable` the engine is constructed with. Offsets and tolerances
/// live here (or in the TOML config that overrides them) and nowhere else;
/// recalibrating a station is a data change, not a code change.

use std::collections::BTreeMap;

use crate::model::{EngineError, StationGroup, StationProfile};

// ---------------------------------------------------------------------------
// Calibrated registry
// ---------------------------------------------------------------------------

/// Metadata for a single tide gauge.
pub struct Station {
    pub station_id: &'static str,
    /// Human-readable description of the station's role.
    pub description: &'static str,
    /// WGS84 latitude.
    pub latitude: f64,
    /// WGS84 longitude.
    pub longitude: f64,
    pub group: StationGroup,
    /// Expected bias vs. the southern baseline, meters.
    pub offset_m: f64,
    /// Allowed absolute deviation from `baseline + offset`, meters.
    pub tolerance_m: f64,
}

/// Tolerance applied to every reference-group gauge.
pub const REFERENCE_TOLERANCE_M: f64 = 0.03;

/// Tolerance for most non-reference gauges.
pub const OTHER_TOLERANCE_M: f64 = 0.05;

/// The calibrated gauges, southern reference group first.
///
/// Offsets are long-term mean sea level differences against the southern
/// group. Eilat sits on a different sea and carries both a large offset and
/// a wider tolerance.
pub static STATION_REGISTRY: &[Station] = &[
    Station {
        station_id: "Yafo",
        description: "Southern reference gauge at Jaffa port.",
        latitude: 32.0540,
        longitude: 34.7500,
        group: StationGroup::Reference,
        offset_m: 0.0,
        tolerance_m: REFERENCE_TOLERANCE_M,
    },
    Station {
        station_id: "Ashdod",
        description: "Southern reference gauge at Ashdod port.",
        latitude: 31.8260,
        longitude: 34.6370,
        group: StationGroup::Reference,
        offset_m: 0.0,
        tolerance_m: REFERENCE_TOLERANCE_M,
    },
    Station {
        station_id: "Ashkelon",
        description: "Southern reference gauge. Reports on its own cadence, \
                      so its slots often miss the other reference gauges.",
        latitude: 31.6810,
        longitude: 34.5560,
        group: StationGroup::Reference,
        offset_m: 0.0,
        tolerance_m: REFERENCE_TOLERANCE_M,
    },
    Station {
        station_id: "Haifa",
        description: "Northern gauge, 4 cm above the southern baseline.",
        latitude: 32.8250,
        longitude: 34.9960,
        group: StationGroup::Other,
        offset_m: 0.04,
        tolerance_m: OTHER_TOLERANCE_M,
    },
    Station {
        station_id: "Acre",
        description: "Northern gauge, 8 cm above the southern baseline.",
        latitude: 32.9200,
        longitude: 35.0680,
        group: StationGroup::Other,
        offset_m: 0.08,
        tolerance_m: OTHER_TOLERANCE_M,
    },
    Station {
        station_id: "Eilat",
        description: "Red Sea gauge. Offset recalibrated from 0.17 m to \
                      0.28 m against the measured MSL difference.",
        latitude: 29.5470,
        longitude: 34.9550,
        group: StationGroup::Other,
        offset_m: 0.28,
        tolerance_m: 0.06,
    },
];

/// Looks up a registry entry by id. Returns `None` if not found.
pub fn find_station(station_id: &str) -> Option<&'static Station> {
    STATION_REGISTRY.iter().find(|s| s.station_id == station_id)
}

/// One-line label for reports: id, position and role for registry gauges,
/// the bare id for stations that only exist in a config file.
pub fn describe_station(station_id: &str) -> String {
    match find_station(station_id) {
        Some(s) => format!(
            "{} ({:.3}N {:.3}E): {}",
            s.station_id, s.latitude, s.longitude, s.description
        ),
        None => station_id.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Station table
// ---------------------------------------------------------------------------

/// Immutable station → profile table, shared read-only by every worker.
#[derive(Debug, Clone, PartialEq)]
pub struct StationTable {
    profiles: BTreeMap<String, StationProfile>,
}

impl StationTable {
    /// Builds a table, rejecting an empty list, duplicate ids and
    /// non-finite or negative values.
    pub fn new(profiles: Vec<StationProfile>) -> Result<Self, EngineError> {
        if profiles.is_empty() {
            return Err(EngineError::NoStationProfiles);
        }

        let mut map = BTreeMap::new();
        for profile in profiles {
            if profile.station_id.trim().is_empty() {
                return Err(EngineError::InvalidConfig(
                    "station id must not be empty".to_string(),
                ));
            }
            if !profile.offset_m.is_finite() {
                return Err(EngineError::InvalidConfig(format!(
                    "offset for {} is not finite",
                    profile.station_id
                )));
            }
            if !profile.tolerance_m.is_finite() || profile.tolerance_m < 0.0 {
                return Err(EngineError::InvalidConfig(format!(
                    "tolerance for {} must be a non-negative number",
                    profile.station_id
                )));
            }
            let id = profile.station_id.clone();
            if map.insert(id.clone(), profile).is_some() {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate station id {}",
                    id
                )));
            }
        }

        Ok(Self { profiles: map })
    }

    /// The table built from `STATION_REGISTRY`.
    pub fn calibrated() -> Self {
        let profiles = STATION_REGISTRY
            .iter()
            .map(|s| {
                (
                    s.station_id.to_string(),
                    StationProfile {
                        station_id: s.station_id.to_string(),
                        group: s.group,
                        offset_m: s.offset_m,
                        tolerance_m: s.tolerance_m,
                    },
                )
            })
            .collect();
        Self { profiles }
    }

    pub fn get(&self, station_id: &str) -> Option<&StationProfile> {
        self.profiles.get(station_id)
    }

    /// Like `get`, but a missing station is a `ConfigurationError`.
    pub fn profile(&self, station_id: &str) -> Result<&StationProfile, EngineError> {
        self.get(station_id)
            .ok_or_else(|| EngineError::ConfigurationError {
                station_id: station_id.to_string(),
            })
    }

    pub fn is_reference(&self, station_id: &str) -> bool {
        self.get(station_id).is_some_and(StationProfile::is_reference)
    }

    /// Reference-group station ids, sorted.
    pub fn reference_ids(&self) -> Vec<&str> {
        self.profiles
            .values()
            .filter(|p| p.is_reference())
            .map(|p| p.station_id.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &StationProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(id: &str, group: StationGroup, offset_m: f64, tolerance_m: f64) -> StationProfile {
        StationProfile {
            station_id: id.to_string(),
            group,
            offset_m,
            tolerance_m,
        }
    }

    #[test]
    fn test_no_duplicate_station_ids() {
        let mut seen = std::collections::HashSet::new();
        for station in STATION_REGISTRY {
            assert!(
                seen.insert(station.station_id),
                "duplicate station id '{}' found in STATION_REGISTRY",
                station.station_id
            );
        }
    }

    #[test]
    fn test_registry_contains_all_expected_gauges() {
        let expected = ["Yafo", "Ashdod", "Ashkelon", "Haifa", "Acre", "Eilat"];
        for id in &expected {
            assert!(find_station(id).is_some(), "STATION_REGISTRY missing '{}'", id);
        }
        assert_eq!(STATION_REGISTRY.len(), expected.len());
    }

    #[test]
    fn test_reference_group_has_zero_offset_and_tight_tolerance() {
        for station in STATION_REGISTRY.iter().filter(|s| s.group == StationGroup::Reference) {
            assert_eq!(station.offset_m, 0.0, "{} must sit on the baseline", station.station_id);
            assert_eq!(station.tolerance_m, 0.03);
        }
    }

    #[test]
    fn test_eilat_uses_recalibrated_offset() {
        let eilat = find_station("Eilat").expect("Eilat should be in registry");
        assert_eq!(eilat.offset_m, 0.28, "0.17 m was the miscalibrated value");
        assert_eq!(eilat.tolerance_m, 0.06);
    }

    #[test]
    fn test_find_station_returns_none_for_unknown_id() {
        assert!(find_station("Hadera").is_none());
    }

    #[test]
    fn test_describe_station_includes_position_and_role() {
        let label = describe_station("Haifa");
        assert!(label.starts_with("Haifa (32.825N 34.996E): "), "got {}", label);
        assert!(label.contains("4 cm above"));
        assert_eq!(describe_station("Hadera"), "Hadera");
    }

    #[test]
    fn test_calibrated_table_matches_registry() {
        let table = StationTable::calibrated();
        assert_eq!(table.len(), STATION_REGISTRY.len());
        assert_eq!(table.reference_ids(), vec!["Ashdod", "Ashkelon", "Yafo"]);
        assert!(table.is_reference("Yafo"));
        assert!(!table.is_reference("Haifa"));
        assert!(!table.is_reference("Hadera"));
    }

    #[test]
    fn test_unknown_station_is_configuration_error() {
        let table = StationTable::calibrated();
        assert_eq!(
            table.profile("Hadera"),
            Err(EngineError::ConfigurationError {
                station_id: "Hadera".to_string()
            })
        );
    }

    #[test]
    fn test_empty_table_is_rejected() {
        assert_eq!(StationTable::new(Vec::new()), Err(EngineError::NoStationProfiles));
    }

    #[test]
    fn test_duplicate_ids_are_rejected() {
        let result = StationTable::new(vec![
            profile("Yafo", StationGroup::Reference, 0.0, 0.03),
            profile("Yafo", StationGroup::Reference, 0.0, 0.03),
        ]);
        assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
    }

    #[test]
    fn test_negative_or_nan_tolerance_is_rejected() {
        for tol in [-0.01, f64::NAN] {
            let result = StationTable::new(vec![profile("Haifa", StationGroup::Other, 0.04, tol)]);
            assert!(
                matches!(result, Err(EngineError::InvalidConfig(_))),
                "tolerance {} should be rejected",
                tol
            );
        }
    }
}
