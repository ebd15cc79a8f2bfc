//! Canonical state model for Voltbridge
//!
//! Both wire shapes the controller speaks (nested REST snapshot, flat
//! dot-path stream) are normalized into this one tree: a `site` record plus
//! ordered `loadpoints`, `vehicles` and optional `battery`/`pv` collections.
//!
//! All numeric fields keep the units the source emitted (watts, kWh,
//! percent 0-100, amps, km, seconds). Unit conversion and display
//! formatting happen at the device-registry boundary, never here.
//!
//! Every field is optional so the same type serves as both a sparse
//! fragment (one stream diff) and a full snapshot; merging a fragment into
//! a snapshot is additive per field and never discards known values.

use serde::{Deserialize, Serialize};

/// Site-level readings and settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SiteState {
    pub title: Option<String>,
    /// Grid import (+) / export (-) power in W
    pub grid_power: Option<f64>,
    /// Home consumption in W
    pub home_power: Option<f64>,
    /// PV generation in W
    pub pv_power: Option<f64>,
    /// Battery charge (-) / discharge (+) power in W
    pub battery_power: Option<f64>,
    /// Battery state of charge in percent
    pub battery_soc: Option<f64>,
    /// Battery operating mode as reported by the controller
    pub battery_mode: Option<String>,
    /// Green energy share of home consumption in percent
    pub green_share_home: Option<f64>,
    /// Green energy share of charging in percent
    pub green_share_loadpoints: Option<f64>,
    /// Current grid tariff in currency/kWh
    pub tariff_grid: Option<f64>,
    /// Current feed-in tariff in currency/kWh
    pub tariff_feed_in: Option<f64>,
    /// Controller software version
    pub version: Option<String>,
}

/// One charging point
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoadpointState {
    pub title: Option<String>,
    /// Charging mode as reported by the controller (off/now/minpv/pv)
    pub mode: Option<String>,
    /// Configured phase count (0 = auto, 1, 3)
    pub phases: Option<i64>,
    /// Current charging power in W
    pub charge_power: Option<f64>,
    /// Energy delivered in the current session in kWh
    pub charged_energy: Option<f64>,
    /// Whether the loadpoint is actively charging
    pub charging: Option<bool>,
    /// Elapsed charging time in seconds
    pub charge_timer_secs: Option<f64>,
    /// Minimum SoC setting in percent
    pub min_soc: Option<f64>,
    /// Charge limit SoC setting in percent
    pub target_soc: Option<f64>,
    /// Connected vehicle SoC in percent
    pub vehicle_soc: Option<f64>,
    /// Vehicle connection status code (A/B/C wire values)
    pub vehicle_status: Option<String>,
}

/// One vehicle known to the controller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    pub title: Option<String>,
    /// State of charge in percent
    pub soc: Option<f64>,
    /// Remaining range in km
    pub range_km: Option<f64>,
    /// Connection status code (A/B/C wire values)
    pub status: Option<String>,
}

/// One home battery
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatteryState {
    pub title: Option<String>,
    /// Charge (-) / discharge (+) power in W
    pub power: Option<f64>,
    /// State of charge in percent
    pub soc: Option<f64>,
    /// Capacity in kWh
    pub capacity_kwh: Option<f64>,
}

/// One PV array
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PvState {
    pub title: Option<String>,
    /// Generation power in W
    pub power: Option<f64>,
    /// Lifetime energy in kWh
    pub energy_kwh: Option<f64>,
}

/// The normalized snapshot (or sparse fragment) of controller state.
///
/// Entity collections are ordered and keyed by external id. Loadpoint ids
/// are 1-based positional strings ("1", "2", ...) matching the controller's
/// REST addressing; vehicle ids are genuine controller-assigned keys and may
/// contain colons (e.g. "db:2").
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalState {
    pub site: SiteState,
    pub loadpoints: Vec<(String, LoadpointState)>,
    pub vehicles: Vec<(String, VehicleState)>,
    pub battery: Vec<(String, BatteryState)>,
    pub pv: Vec<(String, PvState)>,
}

macro_rules! take_some {
    ($dst:expr, $src:expr, $($field:ident),+ $(,)?) => {
        $(
            if $src.$field.is_some() {
                $dst.$field = $src.$field.clone();
            }
        )+
    };
}

impl SiteState {
    /// Fold another site fragment into this one; present fields win.
    pub fn merge_from(&mut self, other: &SiteState) {
        take_some!(
            self,
            other,
            title,
            grid_power,
            home_power,
            pv_power,
            battery_power,
            battery_soc,
            battery_mode,
            green_share_home,
            green_share_loadpoints,
            tariff_grid,
            tariff_feed_in,
            version,
        );
    }

    /// Whether any battery-derived field is populated
    pub fn has_battery(&self) -> bool {
        self.battery_power.is_some() || self.battery_soc.is_some() || self.battery_mode.is_some()
    }
}

impl LoadpointState {
    pub fn merge_from(&mut self, other: &LoadpointState) {
        take_some!(
            self,
            other,
            title,
            mode,
            phases,
            charge_power,
            charged_energy,
            charging,
            charge_timer_secs,
            min_soc,
            target_soc,
            vehicle_soc,
            vehicle_status,
        );
    }
}

impl VehicleState {
    pub fn merge_from(&mut self, other: &VehicleState) {
        take_some!(self, other, title, soc, range_km, status);
    }
}

impl BatteryState {
    pub fn merge_from(&mut self, other: &BatteryState) {
        take_some!(self, other, title, power, soc, capacity_kwh);
    }
}

impl PvState {
    pub fn merge_from(&mut self, other: &PvState) {
        take_some!(self, other, title, power, energy_kwh);
    }
}

fn merge_keyed<T, F>(dst: &mut Vec<(String, T)>, src: &[(String, T)], merge: F)
where
    T: Clone,
    F: Fn(&mut T, &T),
{
    for (key, incoming) in src {
        match dst.iter_mut().find(|(k, _)| k == key) {
            Some((_, existing)) => merge(existing, incoming),
            None => dst.push((key.clone(), incoming.clone())),
        }
    }
}

impl CanonicalState {
    /// Additively fold a fragment into this snapshot. Fields present in the
    /// fragment overwrite; absent fields keep their previous values. New
    /// entities are appended in discovery order.
    pub fn merge_from(&mut self, frag: &CanonicalState) {
        self.site.merge_from(&frag.site);
        merge_keyed(&mut self.loadpoints, &frag.loadpoints, LoadpointState::merge_from);
        merge_keyed(&mut self.vehicles, &frag.vehicles, VehicleState::merge_from);
        merge_keyed(&mut self.battery, &frag.battery, BatteryState::merge_from);
        merge_keyed(&mut self.pv, &frag.pv, PvState::merge_from);
    }

    /// Count of hallmark keys present. A payload carrying at least two is
    /// heuristically treated as a complete state dump rather than a diff.
    pub fn hallmark_count(&self) -> usize {
        [
            self.site.grid_power.is_some(),
            self.site.home_power.is_some(),
            self.site.pv_power.is_some(),
            self.site.version.is_some(),
            !self.vehicles.is_empty(),
            !self.loadpoints.is_empty(),
        ]
        .iter()
        .filter(|present| **present)
        .count()
    }

    /// Hallmark-key completeness rule
    pub fn looks_complete(&self) -> bool {
        self.hallmark_count() >= 2
    }

    /// Whether the fragment carries no information at all
    pub fn is_empty(&self) -> bool {
        *self == CanonicalState::default()
    }

    /// Look up a loadpoint fragment by external id
    pub fn loadpoint(&self, external_id: &str) -> Option<&LoadpointState> {
        self.loadpoints
            .iter()
            .find(|(id, _)| id == external_id)
            .map(|(_, lp)| lp)
    }

    /// Look up a vehicle fragment by external id
    pub fn vehicle(&self, external_id: &str) -> Option<&VehicleState> {
        self.vehicles
            .iter()
            .find(|(id, _)| id == external_id)
            .map(|(_, v)| v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_merge_keeps_absent_fields() {
        let mut base = SiteState {
            grid_power: Some(500.0),
            home_power: Some(300.0),
            ..Default::default()
        };
        let frag = SiteState {
            grid_power: Some(450.0),
            pv_power: Some(1200.0),
            ..Default::default()
        };
        base.merge_from(&frag);
        assert_eq!(base.grid_power, Some(450.0));
        assert_eq!(base.home_power, Some(300.0));
        assert_eq!(base.pv_power, Some(1200.0));
    }

    #[test]
    fn keyed_merge_appends_new_entities_in_order() {
        let mut state = CanonicalState::default();
        state.loadpoints.push((
            "1".to_string(),
            LoadpointState {
                mode: Some("pv".to_string()),
                ..Default::default()
            },
        ));

        let mut frag = CanonicalState::default();
        frag.loadpoints.push((
            "2".to_string(),
            LoadpointState {
                mode: Some("off".to_string()),
                ..Default::default()
            },
        ));
        frag.loadpoints.push((
            "1".to_string(),
            LoadpointState {
                phases: Some(3),
                ..Default::default()
            },
        ));

        state.merge_from(&frag);
        assert_eq!(state.loadpoints.len(), 2);
        assert_eq!(state.loadpoints[0].0, "1");
        assert_eq!(state.loadpoints[0].1.mode.as_deref(), Some("pv"));
        assert_eq!(state.loadpoints[0].1.phases, Some(3));
        assert_eq!(state.loadpoints[1].0, "2");
    }

    #[test]
    fn hallmark_counting() {
        let mut state = CanonicalState::default();
        assert_eq!(state.hallmark_count(), 0);
        assert!(!state.looks_complete());

        state.site.grid_power = Some(100.0);
        assert!(!state.looks_complete());

        state.site.home_power = Some(80.0);
        assert!(state.looks_complete());

        state.vehicles.push(("db:2".to_string(), VehicleState::default()));
        assert_eq!(state.hallmark_count(), 3);
    }

    #[test]
    fn battery_presence() {
        let mut site = SiteState::default();
        assert!(!site.has_battery());
        site.battery_soc = Some(80.0);
        assert!(site.has_battery());
    }
}
