//! Command translation between hub selector levels and controller values
//!
//! The hub exposes enumerated settings as selector switches with discrete
//! levels in steps of 10; the controller wants semantic strings or small
//! integers. Translation is pure table lookup in both directions, fixed for
//! the process lifetime. A level or wire value outside the table maps to
//! the table's defined default rather than failing, since the hub UI only
//! exposes known levels but a drifted controller may send anything.
//!
//! Percentage-valued parameters (min/target SoC) are not translated; the
//! slider value already is the percentage.

use serde::{Deserialize, Serialize};

/// Loadpoint charging mode: selector Off|Now|Min+PV|PV
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChargeMode {
    Off,
    Now,
    MinPv,
    Pv,
}

impl ChargeMode {
    pub const ALL: [ChargeMode; 4] = [
        ChargeMode::Off,
        ChargeMode::Now,
        ChargeMode::MinPv,
        ChargeMode::Pv,
    ];

    /// Selector level shown by the hub
    pub fn level(self) -> u8 {
        match self {
            ChargeMode::Off => 0,
            ChargeMode::Now => 10,
            ChargeMode::MinPv => 20,
            ChargeMode::Pv => 30,
        }
    }

    /// Unknown levels map to Off, the table default
    pub fn from_level(level: u8) -> Self {
        match level {
            10 => ChargeMode::Now,
            20 => ChargeMode::MinPv,
            30 => ChargeMode::Pv,
            _ => ChargeMode::Off,
        }
    }

    /// Mode string used in controller API paths
    pub fn as_wire(self) -> &'static str {
        match self {
            ChargeMode::Off => "off",
            ChargeMode::Now => "now",
            ChargeMode::MinPv => "minpv",
            ChargeMode::Pv => "pv",
        }
    }

    pub fn from_wire(value: &str) -> Self {
        match value {
            "now" => ChargeMode::Now,
            "minpv" => ChargeMode::MinPv,
            "pv" => ChargeMode::Pv,
            _ => ChargeMode::Off,
        }
    }
}

/// Loadpoint phase setting: selector Auto|1-Phase|3-Phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhaseSetting {
    Auto,
    One,
    Three,
}

impl PhaseSetting {
    pub const ALL: [PhaseSetting; 3] =
        [PhaseSetting::Auto, PhaseSetting::One, PhaseSetting::Three];

    pub fn level(self) -> u8 {
        match self {
            PhaseSetting::Auto => 0,
            PhaseSetting::One => 10,
            PhaseSetting::Three => 20,
        }
    }

    /// Unknown levels map to Auto, the table default
    pub fn from_level(level: u8) -> Self {
        match level {
            10 => PhaseSetting::One,
            20 => PhaseSetting::Three,
            _ => PhaseSetting::Auto,
        }
    }

    /// Phase count sent to the controller (0 = auto)
    pub fn as_wire(self) -> u8 {
        match self {
            PhaseSetting::Auto => 0,
            PhaseSetting::One => 1,
            PhaseSetting::Three => 3,
        }
    }

    pub fn from_wire(phases: i64) -> Self {
        match phases {
            1 => PhaseSetting::One,
            3 => PhaseSetting::Three,
            _ => PhaseSetting::Auto,
        }
    }
}

/// Home battery operating mode: selector Unknown|Normal|Hold|Charge|External
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatteryMode {
    Unknown,
    Normal,
    Hold,
    Charge,
    External,
}

impl BatteryMode {
    pub const ALL: [BatteryMode; 5] = [
        BatteryMode::Unknown,
        BatteryMode::Normal,
        BatteryMode::Hold,
        BatteryMode::Charge,
        BatteryMode::External,
    ];

    pub fn level(self) -> u8 {
        match self {
            BatteryMode::Unknown => 0,
            BatteryMode::Normal => 10,
            BatteryMode::Hold => 20,
            BatteryMode::Charge => 30,
            BatteryMode::External => 40,
        }
    }

    /// Unknown levels map to Unknown, the table default
    pub fn from_level(level: u8) -> Self {
        match level {
            10 => BatteryMode::Normal,
            20 => BatteryMode::Hold,
            30 => BatteryMode::Charge,
            40 => BatteryMode::External,
            _ => BatteryMode::Unknown,
        }
    }

    pub fn as_wire(self) -> &'static str {
        match self {
            BatteryMode::Unknown => "unknown",
            BatteryMode::Normal => "normal",
            BatteryMode::Hold => "hold",
            BatteryMode::Charge => "charge",
            BatteryMode::External => "external",
        }
    }

    pub fn from_wire(value: &str) -> Self {
        match value {
            "normal" => BatteryMode::Normal,
            "hold" => BatteryMode::Hold,
            "charge" => BatteryMode::Charge,
            "external" => BatteryMode::External,
            _ => BatteryMode::Unknown,
        }
    }
}

/// Vehicle connection state: selector Disconnected|Connected|Charging|Complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VehicleStatus {
    Disconnected,
    Connected,
    Charging,
    Complete,
}

impl VehicleStatus {
    pub const ALL: [VehicleStatus; 4] = [
        VehicleStatus::Disconnected,
        VehicleStatus::Connected,
        VehicleStatus::Charging,
        VehicleStatus::Complete,
    ];

    pub fn level(self) -> u8 {
        match self {
            VehicleStatus::Disconnected => 0,
            VehicleStatus::Connected => 10,
            VehicleStatus::Charging => 20,
            VehicleStatus::Complete => 30,
        }
    }

    pub fn from_level(level: u8) -> Self {
        match level {
            10 => VehicleStatus::Connected,
            20 => VehicleStatus::Charging,
            30 => VehicleStatus::Complete,
            _ => VehicleStatus::Disconnected,
        }
    }

    /// Controller status codes; anything unrecognized means disconnected
    pub fn from_wire(code: &str) -> Self {
        match code {
            "A" => VehicleStatus::Connected,
            "B" => VehicleStatus::Charging,
            "C" => VehicleStatus::Complete,
            _ => VehicleStatus::Disconnected,
        }
    }
}
