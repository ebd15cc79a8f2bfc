//! Identity resolution between controller entities and registry units
//!
//! The controller hands out externally-assigned ids (vehicle "db:2",
//! loadpoint "1"); the hub addresses devices by small integer units. This
//! module owns the mapping between the two: each `(kind, external_id)` pair
//! gets a stable entity slot, each `(kind, external_id, parameter)` triple a
//! unit number probed upward from that slot.
//!
//! The mapping is persisted implicitly in the registry itself: every unit's
//! description is a structured `{kind}_{external_id}_{parameter}` key, and
//! startup recovery parses those keys back into the map. Once assigned, a
//! unit is never reassigned to a different external id while its record
//! exists; stale entities simply persist as offline devices.
//!
//! Loadpoint ids derived from stream position are a known weak point: the
//! controller may reorder loadpoints across reconnects. Recovery therefore
//! always prefers the persisted description key over positional inference.

use crate::error::{Result, VoltbridgeError};
use crate::logging::get_logger;
use crate::registry::RegistryRecord;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Entity kinds addressable by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    Site,
    Battery,
    Pv,
    Tariff,
    Grid,
    Vehicle,
    Loadpoint,
    Session,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        EntityKind::Site,
        EntityKind::Battery,
        EntityKind::Pv,
        EntityKind::Tariff,
        EntityKind::Grid,
        EntityKind::Vehicle,
        EntityKind::Loadpoint,
        EntityKind::Session,
    ];

    /// First unit number of this kind's range
    pub fn base(self) -> u32 {
        match self {
            EntityKind::Site => 1,
            EntityKind::Battery => 20,
            EntityKind::Pv => 40,
            EntityKind::Tariff => 60,
            EntityKind::Grid => 80,
            EntityKind::Vehicle => 100,
            EntityKind::Loadpoint => 200,
            EntityKind::Session => 300,
        }
    }

    /// Unit numbers reserved per entity, leaving room for its sub-devices
    pub fn stride(self) -> u32 {
        match self {
            EntityKind::Vehicle | EntityKind::Loadpoint => 20,
            _ => 10,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Site => "site",
            EntityKind::Battery => "battery",
            EntityKind::Pv => "pv",
            EntityKind::Tariff => "tariff",
            EntityKind::Grid => "grid",
            EntityKind::Vehicle => "vehicle",
            EntityKind::Loadpoint => "loadpoint",
            EntityKind::Session => "session",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "site" => Some(EntityKind::Site),
            "battery" => Some(EntityKind::Battery),
            "pv" => Some(EntityKind::Pv),
            "tariff" => Some(EntityKind::Tariff),
            "grid" => Some(EntityKind::Grid),
            "vehicle" => Some(EntityKind::Vehicle),
            "loadpoint" => Some(EntityKind::Loadpoint),
            "session" => Some(EntityKind::Session),
            _ => None,
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured device key persisted in a unit's description, format
/// `{kind}_{external_id}_{parameter}`.
///
/// Grammar: kind is lowercase letters; external_id is alphanumeric with an
/// optional colon (controller ids like "db:2" stay opaque strings, never
/// coerced to integers); parameter is lowercase letters and underscores.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceKey {
    pub kind: EntityKind,
    pub external_id: String,
    pub parameter: String,
}

impl DeviceKey {
    pub fn new(kind: EntityKind, external_id: &str, parameter: &str) -> Self {
        Self {
            kind,
            external_id: external_id.to_string(),
            parameter: parameter.to_string(),
        }
    }

    /// Parse a persisted description key. Malformed keys are a defined
    /// error, not a silent skip; the caller decides what to do with them.
    pub fn parse(description: &str) -> Result<Self> {
        let malformed =
            || VoltbridgeError::validation("description", "malformed device key");

        let (kind_str, rest) = description.split_once('_').ok_or_else(malformed)?;
        // The parameter may itself contain underscores; the external id
        // never does, so split the id off the front of the remainder.
        let (id_str, parameter) = rest.split_once('_').ok_or_else(malformed)?;

        if kind_str.is_empty() || !kind_str.chars().all(|c| c.is_ascii_lowercase()) {
            return Err(malformed());
        }
        let kind = EntityKind::parse(kind_str).ok_or_else(|| {
            VoltbridgeError::validation("description", "unknown entity kind in device key")
        })?;

        if id_str.is_empty()
            || !id_str.chars().all(|c| c.is_ascii_alphanumeric() || c == ':')
        {
            return Err(malformed());
        }

        if parameter.is_empty()
            || !parameter
                .chars()
                .all(|c| c.is_ascii_lowercase() || c == '_')
        {
            return Err(malformed());
        }

        Ok(Self {
            kind,
            external_id: id_str.to_string(),
            parameter: parameter.to_string(),
        })
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.kind, self.external_id, self.parameter)
    }
}

/// Human label for a parameter, used in device display names
/// ("Zoe SoC", "Garage Charging Power").
pub fn parameter_label(parameter: &str) -> String {
    parameter
        .split('_')
        .map(|word| match word {
            "soc" => "SoC".to_string(),
            "pv" => "PV".to_string(),
            _ => {
                let mut chars = word.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// The identity map between external ids and unit numbers
pub struct IdentityResolver {
    /// Unit per device key
    units: HashMap<DeviceKey, u32>,
    /// Base slot per entity
    entity_slots: HashMap<(EntityKind, String), u32>,
    /// Every unit number in use, including recovered foreign records
    occupied: BTreeSet<u32>,
    /// Discovery-order index per kind, drives slot allocation
    kind_counts: HashMap<EntityKind, u32>,
    /// Display names recovered from the registry
    names: HashMap<(EntityKind, String), String>,
    /// Records excluded from the map due to conflicts
    orphans: Vec<RegistryRecord>,
    logger: crate::logging::StructuredLogger,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl IdentityResolver {
    pub fn new() -> Self {
        Self {
            units: HashMap::new(),
            entity_slots: HashMap::new(),
            occupied: BTreeSet::new(),
            kind_counts: HashMap::new(),
            names: HashMap::new(),
            orphans: Vec::new(),
            logger: get_logger("identity"),
        }
    }

    /// Rebuild the identity map from persisted registry records.
    ///
    /// Records whose description does not follow the key grammar belong to
    /// other plugins; their unit numbers are still marked occupied so fresh
    /// allocations never collide with them. A record whose key duplicates an
    /// already-recovered key is a conflict: it is surfaced and orphaned, the
    /// earlier record wins, and the system keeps operating on everything
    /// else.
    pub fn recover_from_registry(records: &[RegistryRecord]) -> (Self, Vec<VoltbridgeError>) {
        let mut resolver = Self::new();
        let mut conflicts = Vec::new();

        for record in records {
            resolver.occupied.insert(record.unit);

            let key = match DeviceKey::parse(&record.description) {
                Ok(key) => key,
                Err(_) => {
                    resolver
                        .logger
                        .debug(&format!("Skipping foreign unit {}: '{}'", record.unit, record.description));
                    continue;
                }
            };

            if let Some(existing_unit) = resolver.units.get(&key) {
                let err = VoltbridgeError::identity_conflict(
                    record.unit,
                    key.to_string(),
                    record.description.clone(),
                );
                resolver.logger.error(&format!(
                    "Registry conflict: key '{}' already bound to unit {}, orphaning unit {}",
                    key, existing_unit, record.unit
                ));
                resolver.orphans.push(record.clone());
                conflicts.push(err);
                continue;
            }

            let entity = (key.kind, key.external_id.clone());
            let slot = resolver.entity_slots.entry(entity.clone()).or_insert_with(|| {
                *resolver.kind_counts.entry(key.kind).or_insert(0) += 1;
                record.unit
            });
            // Keep the entity slot at the lowest unit seen for the entity
            if record.unit < *slot {
                *slot = record.unit;
            }

            // Recover the human name by stripping the parameter suffix
            let suffix = format!(" {}", parameter_label(&key.parameter));
            if let Some(stripped) = record.display_name.strip_suffix(&suffix)
                && !stripped.is_empty()
            {
                resolver
                    .names
                    .entry(entity)
                    .or_insert_with(|| stripped.to_string());
            }

            resolver.units.insert(key, record.unit);
        }

        (resolver, conflicts)
    }

    /// Unit for a device key, allocating entity slot and unit on first
    /// sighting. Resolution is a bijection per kind: distinct external ids
    /// never share a slot, and re-resolving is stable.
    pub fn resolve(&mut self, key: &DeviceKey) -> u32 {
        if let Some(unit) = self.units.get(key) {
            return *unit;
        }

        let slot = self.resolve_entity(key.kind, &key.external_id);
        // Two-phase allocation: kind-appropriate starting point, then probe
        // upward past anything occupied. Tolerates manual deletions and
        // gaps without colliding with unrelated entities.
        let mut unit = slot;
        while self.occupied.contains(&unit) {
            unit += 1;
        }

        self.occupied.insert(unit);
        self.units.insert(key.clone(), unit);
        self.logger
            .debug(&format!("Mapped device key '{}' to unit {}", key, unit));
        unit
    }

    /// Base slot for an entity, allocating on first sighting.
    pub fn resolve_entity(&mut self, kind: EntityKind, external_id: &str) -> u32 {
        let entity = (kind, external_id.to_string());
        if let Some(slot) = self.entity_slots.get(&entity) {
            return *slot;
        }

        // Slots grow in discovery order, independent of anything numeric in
        // the external id: "db:5" seen second still lands on index 1.
        let index = self.kind_counts.entry(kind).or_insert(0);
        let mut slot = kind.base() + *index * kind.stride();
        *index += 1;

        while self.occupied.contains(&slot) {
            slot += 1;
        }

        self.entity_slots.insert(entity, slot);
        slot
    }

    /// Look up a unit without allocating
    pub fn unit_for(&self, key: &DeviceKey) -> Option<u32> {
        self.units.get(key).copied()
    }

    /// Reverse lookup: the device key owning a unit
    pub fn key_for_unit(&self, unit: u32) -> Option<&DeviceKey> {
        self.units.iter().find(|(_, u)| **u == unit).map(|(k, _)| k)
    }

    /// Recovered display name for an entity
    pub fn display_name(&self, kind: EntityKind, external_id: &str) -> Option<&str> {
        self.names
            .get(&(kind, external_id.to_string()))
            .map(|s| s.as_str())
    }

    /// Remember a display name observed in live state
    pub fn set_display_name(&mut self, kind: EntityKind, external_id: &str, name: &str) {
        self.names
            .insert((kind, external_id.to_string()), name.to_string());
    }

    /// External ids of a kind currently known, in slot order
    pub fn known_externals(&self, kind: EntityKind) -> Vec<String> {
        let mut entities: Vec<(u32, String)> = self
            .entity_slots
            .iter()
            .filter(|((k, _), _)| *k == kind)
            .map(|((_, id), slot)| (*slot, id.clone()))
            .collect();
        entities.sort();
        entities.into_iter().map(|(_, id)| id).collect()
    }

    /// Records orphaned during recovery
    pub fn orphans(&self) -> &[RegistryRecord] {
        &self.orphans
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_key_parse_and_display() {
        let key = DeviceKey::parse("vehicle_db:2_soc").unwrap();
        assert_eq!(key.kind, EntityKind::Vehicle);
        assert_eq!(key.external_id, "db:2");
        assert_eq!(key.parameter, "soc");
        assert_eq!(key.to_string(), "vehicle_db:2_soc");

        let key = DeviceKey::parse("loadpoint_1_charging_power").unwrap();
        assert_eq!(key.parameter, "charging_power");
    }

    #[test]
    fn device_key_rejects_malformed() {
        assert!(DeviceKey::parse("").is_err());
        assert!(DeviceKey::parse("vehicle").is_err());
        assert!(DeviceKey::parse("vehicle_db:2").is_err());
        assert!(DeviceKey::parse("Vehicle_1_soc").is_err());
        assert!(DeviceKey::parse("gadget_1_soc").is_err());
        assert!(DeviceKey::parse("vehicle_db;2_soc").is_err());
        assert!(DeviceKey::parse("vehicle_1_SoC").is_err());
    }

    #[test]
    fn parameter_labels() {
        assert_eq!(parameter_label("soc"), "SoC");
        assert_eq!(parameter_label("min_soc"), "Min SoC");
        assert_eq!(parameter_label("charging_power"), "Charging Power");
        assert_eq!(parameter_label("pv_power"), "PV Power");
    }

    #[test]
    fn discovery_order_allocation() {
        let mut resolver = IdentityResolver::new();
        // Numeric suffixes in external ids do not influence slots.
        let first = resolver.resolve_entity(EntityKind::Vehicle, "db:2");
        let second = resolver.resolve_entity(EntityKind::Vehicle, "db:5");
        assert_eq!(first, EntityKind::Vehicle.base());
        assert_eq!(second, EntityKind::Vehicle.base() + EntityKind::Vehicle.stride());
    }

    #[test]
    fn resolve_is_stable_and_bijective() {
        let mut resolver = IdentityResolver::new();
        let a = resolver.resolve(&DeviceKey::new(EntityKind::Vehicle, "db:2", "soc"));
        let b = resolver.resolve(&DeviceKey::new(EntityKind::Vehicle, "db:5", "soc"));
        assert_ne!(a, b);
        assert_eq!(resolver.resolve(&DeviceKey::new(EntityKind::Vehicle, "db:2", "soc")), a);
    }

    #[test]
    fn parameters_probe_within_entity_range() {
        let mut resolver = IdentityResolver::new();
        let soc = resolver.resolve(&DeviceKey::new(EntityKind::Vehicle, "db:2", "soc"));
        let range = resolver.resolve(&DeviceKey::new(EntityKind::Vehicle, "db:2", "range"));
        let status = resolver.resolve(&DeviceKey::new(EntityKind::Vehicle, "db:2", "status"));
        assert_eq!(soc, 100);
        assert_eq!(range, 101);
        assert_eq!(status, 102);
    }

    #[test]
    fn probe_skips_foreign_units() {
        let records = vec![RegistryRecord {
            unit: 100,
            display_name: "Some other plugin".to_string(),
            description: "not ours".to_string(),
        }];
        let (mut resolver, conflicts) = IdentityResolver::recover_from_registry(&records);
        assert!(conflicts.is_empty());

        let unit = resolver.resolve(&DeviceKey::new(EntityKind::Vehicle, "db:2", "soc"));
        assert_eq!(unit, 101);
    }

    #[test]
    fn recovery_round_trip() {
        let records = vec![
            RegistryRecord {
                unit: 100,
                display_name: "Zoe SoC".to_string(),
                description: "vehicle_db:2_soc".to_string(),
            },
            RegistryRecord {
                unit: 101,
                display_name: "Zoe Range".to_string(),
                description: "vehicle_db:2_range".to_string(),
            },
            RegistryRecord {
                unit: 200,
                display_name: "Garage Charging Power".to_string(),
                description: "loadpoint_1_charging_power".to_string(),
            },
        ];
        let (mut resolver, conflicts) = IdentityResolver::recover_from_registry(&records);
        assert!(conflicts.is_empty());

        // Units recovered, not reallocated
        assert_eq!(resolver.resolve(&DeviceKey::new(EntityKind::Vehicle, "db:2", "soc")), 100);
        assert_eq!(
            resolver.display_name(EntityKind::Vehicle, "db:2"),
            Some("Zoe")
        );
        assert_eq!(
            resolver.display_name(EntityKind::Loadpoint, "1"),
            Some("Garage")
        );

        // A vehicle discovered after recovery continues past the recovered one
        let next = resolver.resolve_entity(EntityKind::Vehicle, "db:9");
        assert_eq!(next, 120);
    }

    #[test]
    fn duplicate_keys_conflict_and_orphan() {
        let records = vec![
            RegistryRecord {
                unit: 100,
                display_name: "Zoe SoC".to_string(),
                description: "vehicle_db:2_soc".to_string(),
            },
            RegistryRecord {
                unit: 140,
                display_name: "Zoe SoC".to_string(),
                description: "vehicle_db:2_soc".to_string(),
            },
        ];
        let (resolver, conflicts) = IdentityResolver::recover_from_registry(&records);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(resolver.orphans().len(), 1);
        assert_eq!(resolver.orphans()[0].unit, 140);
        // The earlier record keeps the mapping
        assert_eq!(
            resolver.unit_for(&DeviceKey::new(EntityKind::Vehicle, "db:2", "soc")),
            Some(100)
        );
    }
}
