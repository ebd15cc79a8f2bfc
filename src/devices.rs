//! Device projection
//!
//! Turns a canonical snapshot into the flat list of virtual-device updates
//! the registry should receive. Canonical numerics keep their source units
//! all the way here; this module owns every unit conversion and every
//! registry-facing string format.
//!
//! Formats follow the hub's sensor conventions:
//! power `"{watts:.1};0"`, energy `"0;{value:.3}"`, percentage and distance
//! one decimal, selectors as their level number, the charging timer in whole
//! minutes and zeroed while not charging.

use crate::commands::{BatteryMode, ChargeMode, PhaseSetting, VehicleStatus};
use crate::identity::{DeviceKey, EntityKind, parameter_label};
use crate::registry::{
    BATTERY_MODE_LEVELS, CHARGE_MODE_LEVELS, DeviceClass, PHASE_LEVELS, VEHICLE_STATUS_LEVELS,
};
use crate::state::{CanonicalState, LoadpointState, SiteState, VehicleState};

/// One ready-to-apply registry update
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceUpdate {
    pub key: DeviceKey,
    pub display_name: String,
    pub class: DeviceClass,
    pub numeric_value: i64,
    pub string_value: String,
}

impl DeviceUpdate {
    fn sensor(kind: EntityKind, id: &str, parameter: &str, owner: &str, class: DeviceClass, string_value: String) -> Self {
        Self {
            key: DeviceKey::new(kind, id, parameter),
            display_name: format!("{} {}", owner, parameter_label(parameter)),
            class,
            numeric_value: 0,
            string_value,
        }
    }

    fn selector(kind: EntityKind, id: &str, parameter: &str, owner: &str, levels: &'static [&'static str], level: u8) -> Self {
        Self {
            key: DeviceKey::new(kind, id, parameter),
            display_name: format!("{} {}", owner, parameter_label(parameter)),
            class: DeviceClass::Selector(levels),
            numeric_value: i64::from(level),
            string_value: level.to_string(),
        }
    }
}

fn power_value(watts: f64) -> String {
    format!("{watts:.1};0")
}

fn energy_value(energy: f64) -> String {
    format!("0;{energy:.3}")
}

fn decimal_value(value: f64) -> String {
    format!("{value:.1}")
}

/// Project a canonical snapshot into registry updates. Fields the snapshot
/// does not carry produce no update, so devices keep their last value
/// through partial data.
pub fn project(state: &CanonicalState) -> Vec<DeviceUpdate> {
    let mut updates = Vec::new();

    project_site(&state.site, &mut updates);

    for (id, vehicle) in &state.vehicles {
        project_vehicle(id, vehicle, &mut updates);
    }

    for (id, loadpoint) in &state.loadpoints {
        project_loadpoint(id, loadpoint, &mut updates);
    }

    updates
}

fn project_site(site: &SiteState, updates: &mut Vec<DeviceUpdate>) {
    let owner = site.title.as_deref().unwrap_or("Site");

    if let Some(watts) = site.grid_power {
        updates.push(DeviceUpdate::sensor(
            EntityKind::Site, "1", "grid_power", owner,
            DeviceClass::Power, power_value(watts),
        ));
    }
    if let Some(watts) = site.home_power {
        updates.push(DeviceUpdate::sensor(
            EntityKind::Site, "1", "home_power", owner,
            DeviceClass::Power, power_value(watts),
        ));
    }
    if let Some(watts) = site.pv_power {
        updates.push(DeviceUpdate::sensor(
            EntityKind::Site, "1", "pv_power", owner,
            DeviceClass::Power, power_value(watts),
        ));
    }

    // Aggregate battery, present only on sites that have one
    if site.has_battery() {
        if let Some(watts) = site.battery_power {
            updates.push(DeviceUpdate::sensor(
                EntityKind::Battery, "1", "power", "Battery",
                DeviceClass::Power, power_value(watts),
            ));
        }
        if let Some(soc) = site.battery_soc {
            updates.push(DeviceUpdate::sensor(
                EntityKind::Battery, "1", "soc", "Battery",
                DeviceClass::Percentage, decimal_value(soc),
            ));
        }
        if let Some(mode) = &site.battery_mode {
            updates.push(DeviceUpdate::selector(
                EntityKind::Battery, "1", "mode", "Battery",
                BATTERY_MODE_LEVELS,
                BatteryMode::from_wire(mode).level(),
            ));
        }
    }
}

fn project_vehicle(id: &str, vehicle: &VehicleState, updates: &mut Vec<DeviceUpdate>) {
    let fallback = format!("Vehicle {id}");
    let owner = vehicle.title.as_deref().unwrap_or(&fallback);

    if let Some(soc) = vehicle.soc {
        updates.push(DeviceUpdate::sensor(
            EntityKind::Vehicle, id, "soc", owner,
            DeviceClass::Percentage, decimal_value(soc),
        ));
    }
    if let Some(km) = vehicle.range_km {
        updates.push(DeviceUpdate::sensor(
            EntityKind::Vehicle, id, "range", owner,
            DeviceClass::Distance, decimal_value(km),
        ));
    }
    if let Some(status) = &vehicle.status {
        updates.push(DeviceUpdate::selector(
            EntityKind::Vehicle, id, "status", owner,
            VEHICLE_STATUS_LEVELS,
            VehicleStatus::from_wire(status).level(),
        ));
    }
}

fn project_loadpoint(id: &str, lp: &LoadpointState, updates: &mut Vec<DeviceUpdate>) {
    let fallback = format!("Loadpoint {id}");
    let owner = lp.title.as_deref().unwrap_or(&fallback);

    if let Some(watts) = lp.charge_power {
        updates.push(DeviceUpdate::sensor(
            EntityKind::Loadpoint, id, "charging_power", owner,
            DeviceClass::Power, power_value(watts),
        ));
    }
    if let Some(energy) = lp.charged_energy {
        updates.push(DeviceUpdate::sensor(
            EntityKind::Loadpoint, id, "charged_energy", owner,
            DeviceClass::Energy, energy_value(energy),
        ));
    }
    if let Some(mode) = &lp.mode {
        updates.push(DeviceUpdate::selector(
            EntityKind::Loadpoint, id, "mode", owner,
            CHARGE_MODE_LEVELS,
            ChargeMode::from_wire(mode).level(),
        ));
    }
    if let Some(phases) = lp.phases {
        updates.push(DeviceUpdate::selector(
            EntityKind::Loadpoint, id, "phases", owner,
            PHASE_LEVELS,
            PhaseSetting::from_wire(phases).level(),
        ));
    }
    if let Some(soc) = lp.min_soc {
        updates.push(DeviceUpdate::sensor(
            EntityKind::Loadpoint, id, "min_soc", owner,
            DeviceClass::Percentage, decimal_value(soc),
        ));
    }
    if let Some(soc) = lp.target_soc {
        updates.push(DeviceUpdate::sensor(
            EntityKind::Loadpoint, id, "target_soc", owner,
            DeviceClass::Percentage, decimal_value(soc),
        ));
    }
    if let Some(secs) = lp.charge_timer_secs {
        // Timer counts only while charging, shows zero otherwise
        let minutes = if lp.charging == Some(true) {
            (secs / 60.0).round() as i64
        } else {
            0
        };
        updates.push(DeviceUpdate::sensor(
            EntityKind::Loadpoint, id, "charging_timer", owner,
            DeviceClass::Counter, minutes.to_string(),
        ));
    }
}
