//! Wire mapping - the user's description of how the rack is wired to the PCB
//!
//! The mapping arrives as a JSON document (from the config file, a CLI flag or an
//! environment variable) and is validated in stages, each stopping at the first
//! problem it finds:
//!
//! 1. schema shape - required keys present, values of the right JSON type
//! 2. enum membership - zone keys and port names are known markings
//! 3. version - must be [`WIRE_MAPPING_VERSION`]
//! 4. port uniqueness - no port wired to two zones
//! 5. port existence - every port has a pin on the selected board
//!
//! ```json
//! {
//!   "version": 1,
//!   "fans": { "INTAKE_LOWER": ["PN1"], "EXHAUST_UPPER": ["PN2", "PN3"] },
//!   "thermistors": { "INTAKE_LOWER": ["TMP0"], "EXHAUST_UPPER": ["TMP4"] }
//! }
//! ```

use crate::board::PinTableEntry;
use crate::error::{OrvError, Result};
use crate::types::{FanPort, ThermistorPort, Zone};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use std::hash::Hash;
use std::str::FromStr;

/// The only schema version this build understands.
pub const WIRE_MAPPING_VERSION: u64 = 1;

/// Factory wiring of the v1.0.0 kit, used when no mapping is configured.
pub const DEFAULT_WIRE_MAPPING_JSON: &str = r#"{
  "version": 1,
  "fans": {
    "INTAKE_UPPER": ["ONBOARD", "PN3"],
    "INTAKE_LOWER": ["PN2", "PN5"],
    "EXHAUST_UPPER": [],
    "EXHAUST_LOWER": []
  },
  "thermistors": {
    "INTAKE_UPPER": ["TMP0"],
    "INTAKE_LOWER": ["TMP1"],
    "EXHAUST_UPPER": ["TMP4"],
    "EXHAUST_LOWER": ["TMP5"]
  }
}"#;

const REQUIRED_KEYS: [&str; 3] = ["version", "fans", "thermistors"];

/// A validated wire mapping. Immutable once built.
///
/// Every zone is always present; zones the user did not mention map to no ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WireMapping {
    version: u64,
    fans: BTreeMap<Zone, Vec<FanPort>>,
    thermistors: BTreeMap<Zone, Vec<ThermistorPort>>,
}

impl WireMapping {
    /// Parse and validate a JSON wiring payload against a board's pin table.
    ///
    /// # Errors
    ///
    /// - `Schema` for malformed JSON, missing or unknown keys, unknown zone or port
    ///   names, or an unsupported version
    /// - `Conflict` if a port is wired to more than one zone
    /// - `UnknownPort` if a port has no pin on the board
    pub fn from_json(payload: &str, pins: &PinTableEntry) -> Result<Self> {
        let root: Value = serde_json::from_str(payload)
            .map_err(|e| schema_error("$", format!("invalid JSON: {}", e)))?;

        // Stage 1: schema shape
        let root = root
            .as_object()
            .ok_or_else(|| schema_error("$", "expected a JSON object"))?;

        for key in REQUIRED_KEYS {
            if !root.contains_key(key) {
                return Err(schema_error(key, "missing required key"));
            }
        }
        if let Some(key) = root.keys().find(|k| !REQUIRED_KEYS.contains(&k.as_str())) {
            return Err(schema_error(key, "unknown key"));
        }

        let version = root["version"]
            .as_u64()
            .ok_or_else(|| schema_error("version", "expected a non-negative integer"))?;
        let raw_fans = port_lists(root, "fans")?;
        let raw_thermistors = port_lists(root, "thermistors")?;

        // Stage 2: enum membership
        let fans = parse_zones::<FanPort>("fans", &raw_fans)?;
        let thermistors = parse_zones::<ThermistorPort>("thermistors", &raw_thermistors)?;

        // Stage 3: version
        if version != WIRE_MAPPING_VERSION {
            return Err(schema_error(
                "version",
                format!(
                    "unsupported version {}, expected {}",
                    version, WIRE_MAPPING_VERSION
                ),
            ));
        }

        Self::new(fans, thermistors, pins)
    }

    /// Build a mapping from already-typed port lists, running the uniqueness and
    /// pin-table checks.
    pub fn new(
        fans: impl IntoIterator<Item = (Zone, Vec<FanPort>)>,
        thermistors: impl IntoIterator<Item = (Zone, Vec<ThermistorPort>)>,
        pins: &PinTableEntry,
    ) -> Result<Self> {
        let mut mapping = Self {
            version: WIRE_MAPPING_VERSION,
            fans: Zone::ALL.into_iter().map(|zone| (zone, Vec::new())).collect(),
            thermistors: Zone::ALL.into_iter().map(|zone| (zone, Vec::new())).collect(),
        };
        mapping.fans.extend(fans);
        mapping.thermistors.extend(thermistors);

        // Stage 4: port uniqueness
        check_unique("fans", &mapping.fans)?;
        check_unique("thermistors", &mapping.thermistors)?;

        // Stage 5: port existence
        for (zone, ports) in &mapping.fans {
            if let Some(port) = ports.iter().find(|port| pins.fan(**port).is_none()) {
                return Err(unknown_port(*zone, port, pins));
            }
        }
        for (zone, ports) in &mapping.thermistors {
            if let Some(port) = ports.iter().find(|port| pins.thermistor(**port).is_none()) {
                return Err(unknown_port(*zone, port, pins));
            }
        }

        Ok(mapping)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Fan ports wired to a zone, in configuration order.
    pub fn fans(&self, zone: Zone) -> &[FanPort] {
        self.fans.get(&zone).map(Vec::as_slice).unwrap_or_default()
    }

    /// Thermistor ports wired to a zone, in configuration order.
    pub fn thermistors(&self, zone: Zone) -> &[ThermistorPort] {
        self.thermistors
            .get(&zone)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Every fan port in use, across all zones.
    pub fn all_fans(&self) -> impl Iterator<Item = FanPort> + '_ {
        self.fans.values().flatten().copied()
    }

    /// Every thermistor port in use, across all zones.
    pub fn all_thermistors(&self) -> impl Iterator<Item = ThermistorPort> + '_ {
        self.thermistors.values().flatten().copied()
    }

    /// Serialize back to the canonical JSON form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

fn schema_error(field: impl Into<String>, reason: impl Into<String>) -> OrvError {
    OrvError::Schema {
        field: field.into(),
        reason: reason.into(),
    }
}

fn unknown_port(zone: Zone, port: &impl Display, pins: &PinTableEntry) -> OrvError {
    OrvError::UnknownPort {
        zone,
        port: port.to_string(),
        platform: pins.platform,
        revision: pins.revision,
    }
}

/// Check that `root[key]` is an object of string arrays and return it as such.
fn port_lists(root: &Map<String, Value>, key: &str) -> Result<Vec<(String, Vec<String>)>> {
    let zones = root[key]
        .as_object()
        .ok_or_else(|| schema_error(key, "expected an object keyed by zone"))?;

    zones
        .iter()
        .map(|(zone, ports)| {
            let field = format!("{}.{}", key, zone);
            let ports = ports
                .as_array()
                .ok_or_else(|| schema_error(&field, "expected an array of port names"))?;
            let names = ports
                .iter()
                .enumerate()
                .map(|(i, port)| {
                    port.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| schema_error(format!("{}[{}]", field, i), "expected a string"))
                })
                .collect::<Result<Vec<_>>>()?;
            Ok((zone.clone(), names))
        })
        .collect()
}

fn parse_zones<P>(key: &str, raw: &[(String, Vec<String>)]) -> Result<Vec<(Zone, Vec<P>)>>
where
    P: FromStr,
{
    let mut parsed: Vec<(Zone, Vec<P>)> = Vec::with_capacity(raw.len());

    for (zone_name, port_names) in raw {
        let field = format!("{}.{}", key, zone_name);
        let zone: Zone = zone_name
            .parse()
            .map_err(|_| schema_error(&field, format!("unknown zone '{}'", zone_name)))?;
        if parsed.iter().any(|(seen, _)| *seen == zone) {
            return Err(schema_error(&field, format!("zone {} listed twice", zone)));
        }

        let ports = port_names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                name.parse::<P>().map_err(|_| {
                    schema_error(
                        format!("{}[{}]", field, i),
                        format!("unknown port '{}'", name),
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;

        parsed.push((zone, ports));
    }

    Ok(parsed)
}

fn check_unique<P>(key: &str, zones: &BTreeMap<Zone, Vec<P>>) -> Result<()>
where
    P: Copy + Eq + Hash + Display,
{
    let mut owners: HashMap<P, Zone> = HashMap::new();

    for (zone, ports) in zones {
        for (i, port) in ports.iter().enumerate() {
            match owners.insert(*port, *zone) {
                None => {}
                Some(first) if first == *zone => {
                    return Err(schema_error(
                        format!("{}.{}[{}]", key, zone, i),
                        format!("port {} listed twice", port),
                    ));
                }
                Some(first) => {
                    return Err(OrvError::Conflict {
                        port: port.to_string(),
                        first,
                        second: *zone,
                    });
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::{AdcChannel, BeagleBoneBlackV100, BoardConfig, PcbRevision, Platform, PwmChannel};
    use serde_json::json;

    fn pins() -> &'static PinTableEntry {
        &BeagleBoneBlackV100::PINS
    }

    /// A board that only populates PN1 and TMP0.
    fn sparse_pins() -> PinTableEntry {
        PinTableEntry {
            fans: &[(
                FanPort::Pn1,
                PwmChannel {
                    header_pin: "P9_14",
                    chip: 1,
                    channel: 'a',
                },
            )],
            thermistors: &[(
                ThermistorPort::Tmp0,
                AdcChannel {
                    header_pin: "P9_35",
                    index: 6,
                },
            )],
            leds: &[],
            ..BeagleBoneBlackV100::PINS
        }
    }

    fn parse(value: serde_json::Value) -> Result<WireMapping> {
        WireMapping::from_json(&value.to_string(), pins())
    }

    #[test]
    fn test_valid_mapping() {
        let mapping = parse(json!({
            "version": 1,
            "fans": {"INTAKE_LOWER": ["PN1"], "EXHAUST_UPPER": ["PN2", "ONBOARD"]},
            "thermistors": {"INTAKE_LOWER": ["TMP0"], "EXHAUST_UPPER": ["TMP4", "TMP5"]}
        }))
        .unwrap();

        assert_eq!(mapping.version(), 1);
        assert_eq!(mapping.fans(Zone::IntakeLower), &[FanPort::Pn1]);
        assert_eq!(
            mapping.fans(Zone::ExhaustUpper),
            &[FanPort::Pn2, FanPort::Onboard]
        );
        assert_eq!(
            mapping.thermistors(Zone::ExhaustUpper),
            &[ThermistorPort::Tmp4, ThermistorPort::Tmp5]
        );
        // Unmentioned zones are present and empty
        assert!(mapping.fans(Zone::IntakeUpper).is_empty());
        assert!(mapping.thermistors(Zone::ExhaustLower).is_empty());
        assert_eq!(mapping.all_fans().count(), 3);
    }

    #[test]
    fn test_round_trip() {
        let inputs = [
            DEFAULT_WIRE_MAPPING_JSON.to_string(),
            json!({"version": 1, "fans": {}, "thermistors": {}}).to_string(),
            json!({
                "version": 1,
                "fans": {"intake_lower": ["pn1"], "exhaust_upper": ["onboard"]},
                "thermistors": {"Intake_Lower": ["tmp0"]}
            })
            .to_string(),
            json!({
                "version": 1,
                "fans": {
                    "INTAKE_LOWER": ["PN1", "PN2"],
                    "INTAKE_UPPER": ["PN3"],
                    "EXHAUST_LOWER": ["PN4"],
                    "EXHAUST_UPPER": ["PN5", "ONBOARD"]
                },
                "thermistors": {
                    "INTAKE_LOWER": ["TMP0", "TMP1"],
                    "INTAKE_UPPER": ["TMP2", "TMP3"],
                    "EXHAUST_LOWER": ["TMP4"],
                    "EXHAUST_UPPER": ["TMP5", "TMP6"]
                }
            })
            .to_string(),
            json!({
                "version": 1,
                "fans": {"EXHAUST_LOWER": ["PN2"]},
                "thermistors": {}
            })
            .to_string(),
        ];

        for input in &inputs {
            let mapping = WireMapping::from_json(input, pins()).unwrap();
            let json = mapping.to_json().unwrap();
            let reparsed = WireMapping::from_json(&json, pins()).unwrap();
            assert_eq!(mapping, reparsed, "{}", input);
            assert_eq!(reparsed.to_json().unwrap(), json);
        }
    }

    #[test]
    fn test_default_mapping() {
        let mapping = WireMapping::from_json(DEFAULT_WIRE_MAPPING_JSON, pins()).unwrap();
        assert_eq!(
            mapping.fans(Zone::IntakeUpper),
            &[FanPort::Onboard, FanPort::Pn3]
        );
        assert_eq!(mapping.thermistors(Zone::ExhaustLower), &[ThermistorPort::Tmp5]);
    }

    #[test]
    fn test_lowercase_names_accepted() {
        let mapping = parse(json!({
            "version": 1,
            "fans": {"intake_lower": ["pn1"]},
            "thermistors": {"intake_lower": ["tmp0"]}
        }))
        .unwrap();
        assert_eq!(mapping.fans(Zone::IntakeLower), &[FanPort::Pn1]);
    }

    #[test]
    fn test_fan_conflict_names_both_zones() {
        let err = parse(json!({
            "version": 1,
            "fans": {"INTAKE_LOWER": ["PN1"], "EXHAUST_UPPER": ["PN1"]},
            "thermistors": {}
        }))
        .unwrap_err();

        match err {
            OrvError::Conflict {
                port,
                first,
                second,
            } => {
                assert_eq!(port, "PN1");
                assert_eq!(first, Zone::IntakeLower);
                assert_eq!(second, Zone::ExhaustUpper);
            }
            other => panic!("Expected Conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_thermistor_conflict() {
        let err = parse(json!({
            "version": 1,
            "fans": {},
            "thermistors": {"INTAKE_UPPER": ["TMP2"], "EXHAUST_LOWER": ["TMP3", "TMP2"]}
        }))
        .unwrap_err();
        assert!(matches!(err, OrvError::Conflict { ref port, .. } if port == "TMP2"));
    }

    #[test]
    fn test_duplicate_within_zone() {
        let err = parse(json!({
            "version": 1,
            "fans": {"INTAKE_LOWER": ["PN1", "PN1"]},
            "thermistors": {}
        }))
        .unwrap_err();
        assert!(matches!(err, OrvError::Schema { ref field, .. } if field == "fans.INTAKE_LOWER[1]"));
    }

    #[test]
    fn test_unsupported_version_wins_over_other_errors() {
        for version in [0, 2, 99] {
            // Conflicting ports would also fail, but the version is checked first
            let err = parse(json!({
                "version": version,
                "fans": {"INTAKE_LOWER": ["PN1"], "INTAKE_UPPER": ["PN1"]},
                "thermistors": {}
            }))
            .unwrap_err();
            assert!(
                matches!(err, OrvError::Schema { ref field, .. } if field == "version"),
                "version {} gave {:?}",
                version,
                err
            );
        }

        // String versions are a shape error
        let err = parse(json!({"version": "1", "fans": {}, "thermistors": {}})).unwrap_err();
        assert!(matches!(err, OrvError::Schema { ref field, .. } if field == "version"));
    }

    #[test]
    fn test_missing_and_unknown_keys() {
        let err = parse(json!({"version": 1, "fans": {}})).unwrap_err();
        assert!(matches!(err, OrvError::Schema { ref field, .. } if field == "thermistors"));

        let err = parse(json!({
            "version": 1,
            "fans": {},
            "thermistors": {},
            "upper_intake_fans": []
        }))
        .unwrap_err();
        assert!(matches!(err, OrvError::Schema { ref field, .. } if field == "upper_intake_fans"));

        let err = WireMapping::from_json("[1, 2]", pins()).unwrap_err();
        assert!(matches!(err, OrvError::Schema { ref field, .. } if field == "$"));

        let err = WireMapping::from_json("{not json", pins()).unwrap_err();
        assert!(matches!(err, OrvError::Schema { .. }));
    }

    #[test]
    fn test_wrong_value_types() {
        let err = parse(json!({"version": 1, "fans": ["PN1"], "thermistors": {}})).unwrap_err();
        assert!(matches!(err, OrvError::Schema { ref field, .. } if field == "fans"));

        let err = parse(json!({
            "version": 1,
            "fans": {"INTAKE_LOWER": "PN1"},
            "thermistors": {}
        }))
        .unwrap_err();
        assert!(matches!(err, OrvError::Schema { ref field, .. } if field == "fans.INTAKE_LOWER"));

        let err = parse(json!({
            "version": 1,
            "fans": {},
            "thermistors": {"EXHAUST_LOWER": ["TMP0", 3]}
        }))
        .unwrap_err();
        assert!(
            matches!(err, OrvError::Schema { ref field, .. } if field == "thermistors.EXHAUST_LOWER[1]")
        );
    }

    #[test]
    fn test_unknown_names() {
        let err = parse(json!({
            "version": 1,
            "fans": {"MIDDLE": ["PN1"]},
            "thermistors": {}
        }))
        .unwrap_err();
        match err {
            OrvError::Schema { field, reason } => {
                assert_eq!(field, "fans.MIDDLE");
                assert!(reason.contains("unknown zone"));
            }
            other => panic!("Expected Schema, got {:?}", other),
        }

        let err = parse(json!({
            "version": 1,
            "fans": {"INTAKE_LOWER": ["PN1", "PN9"]},
            "thermistors": {}
        }))
        .unwrap_err();
        assert!(matches!(err, OrvError::Schema { ref field, .. } if field == "fans.INTAKE_LOWER[1]"));
    }

    #[test]
    fn test_zone_listed_twice() {
        let err = WireMapping::from_json(
            r#"{"version": 1, "fans": {"INTAKE_LOWER": [], "intake_lower": []}, "thermistors": {}}"#,
            pins(),
        )
        .unwrap_err();
        assert!(matches!(err, OrvError::Schema { .. }));
    }

    #[test]
    fn test_port_missing_from_pin_table() {
        let sparse = sparse_pins();

        let ok = WireMapping::from_json(
            r#"{"version": 1, "fans": {"INTAKE_LOWER": ["PN1"]}, "thermistors": {"INTAKE_LOWER": ["TMP0"]}}"#,
            &sparse,
        );
        assert!(ok.is_ok());

        let err = WireMapping::from_json(
            r#"{"version": 1, "fans": {"INTAKE_LOWER": ["PN1"]}, "thermistors": {"EXHAUST_UPPER": ["TMP4"]}}"#,
            &sparse,
        )
        .unwrap_err();
        match err {
            OrvError::UnknownPort {
                zone,
                port,
                platform,
                revision,
            } => {
                assert_eq!(zone, Zone::ExhaustUpper);
                assert_eq!(port, "TMP4");
                assert_eq!(platform, Platform::BeagleBoneBlack);
                assert_eq!(revision, PcbRevision::V100);
            }
            other => panic!("Expected UnknownPort, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_zones_are_legal() {
        let mapping = parse(json!({"version": 1, "fans": {}, "thermistors": {}})).unwrap();
        for zone in Zone::ALL {
            assert!(mapping.fans(zone).is_empty());
            assert!(mapping.thermistors(zone).is_empty());
        }
    }
}
