//! Device registry interface
//!
//! The hub owns a set of persistent virtual devices ("units") addressed by
//! small integers. Voltbridge never touches the hub's storage directly; it
//! talks through this trait. Units are keyed by a structured description
//! string (see [`crate::identity::DeviceKey`]) which survives restarts and
//! is how the identity mapping is recovered.
//!
//! An in-memory implementation backs tests and standalone runs.

use std::collections::BTreeMap;

/// How a virtual device presents its value. Decides the display formatting
/// applied at the registry boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceClass {
    /// Instantaneous power in W
    Power,
    /// Cumulative energy in kWh
    Energy,
    /// Percentage 0-100
    Percentage,
    /// Distance in km
    Distance,
    /// Plain integer counter
    Counter,
    /// Selector switch with fixed level names (levels 0, 10, 20, ...)
    Selector(&'static [&'static str]),
}

pub const CHARGE_MODE_LEVELS: &[&str] = &["Off", "Now", "Min+PV", "PV"];
pub const PHASE_LEVELS: &[&str] = &["Auto", "1-Phase", "3-Phase"];
pub const BATTERY_MODE_LEVELS: &[&str] = &["Unknown", "Normal", "Hold", "Charge", "External"];
pub const VEHICLE_STATUS_LEVELS: &[&str] =
    &["Disconnected", "Connected", "Charging", "Complete"];

/// One persisted unit as seen during startup recovery
#[derive(Debug, Clone, PartialEq)]
pub struct RegistryRecord {
    pub unit: u32,
    pub display_name: String,
    /// Structured description key, format `{kind}_{external_id}_{parameter}`
    pub description: String,
}

/// Host device registry, the outbound collaborator of the bridge.
///
/// Implementations persist units across restarts; Voltbridge recovers its
/// identity mapping from `records()` at startup.
pub trait DeviceRegistry: Send {
    /// Look up a unit by its structured description key
    fn find_unit(&self, description: &str) -> Option<u32>;

    /// Create a new unit. `description` is the structured key the unit is
    /// recovered by; `display_name` is what the operator sees.
    fn create_unit(
        &mut self,
        unit: u32,
        display_name: &str,
        class: DeviceClass,
        description: &str,
    );

    /// Push a value to an existing unit. `numeric_value` carries selector
    /// levels; `string_value` carries formatted sensor readings.
    fn update_unit(&mut self, unit: u32, numeric_value: i64, string_value: &str);

    /// Enumerate all persisted units for startup recovery
    fn records(&self) -> Vec<RegistryRecord>;
}

/// In-memory registry used by tests and standalone runs
#[derive(Debug, Default)]
pub struct MemoryRegistry {
    units: BTreeMap<u32, MemoryUnit>,
    writes: usize,
}

#[derive(Debug, Clone)]
pub struct MemoryUnit {
    pub display_name: String,
    pub class: DeviceClass,
    pub description: String,
    pub numeric_value: i64,
    pub string_value: String,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pre-existing unit, as if it survived from a previous run
    pub fn seed(&mut self, unit: u32, display_name: &str, class: DeviceClass, description: &str) {
        self.create_unit(unit, display_name, class, description);
    }

    /// Inspect a unit's current value (test helper)
    pub fn unit(&self, unit: u32) -> Option<&MemoryUnit> {
        self.units.get(&unit)
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Number of value writes received, for asserting write suppression
    pub fn write_count(&self) -> usize {
        self.writes
    }
}

impl DeviceRegistry for MemoryRegistry {
    fn find_unit(&self, description: &str) -> Option<u32> {
        self.units
            .iter()
            .find(|(_, u)| u.description == description)
            .map(|(unit, _)| *unit)
    }

    fn create_unit(
        &mut self,
        unit: u32,
        display_name: &str,
        class: DeviceClass,
        description: &str,
    ) {
        self.units.entry(unit).or_insert_with(|| MemoryUnit {
            display_name: display_name.to_string(),
            class,
            description: description.to_string(),
            numeric_value: 0,
            string_value: String::new(),
        });
    }

    fn update_unit(&mut self, unit: u32, numeric_value: i64, string_value: &str) {
        if let Some(entry) = self.units.get_mut(&unit) {
            entry.numeric_value = numeric_value;
            entry.string_value = string_value.to_string();
            self.writes += 1;
        }
    }

    fn records(&self) -> Vec<RegistryRecord> {
        self.units
            .iter()
            .map(|(unit, u)| RegistryRecord {
                unit: *unit,
                display_name: u.display_name.clone(),
                description: u.description.clone(),
            })
            .collect()
    }
}
