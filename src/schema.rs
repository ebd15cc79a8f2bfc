//! Schema normalization for controller payloads
//!
//! The controller speaks two wire shapes for the same state: the REST
//! endpoint returns a nested object (optionally wrapped in a `result`
//! envelope), while the WebSocket stream emits flat dot-path keys such as
//! `loadpoints.0.chargePower`. This module detects which shape a payload
//! uses and converts both into the canonical tree from [`crate::state`].
//!
//! Downstream code never re-inspects raw JSON; shape dispatch happens
//! exactly once here.

use crate::error::{Result, VoltbridgeError};
use crate::state::{
    BatteryState, CanonicalState, LoadpointState, PvState, SiteState, VehicleState,
};
use serde_json::{Map, Value};
use tracing::trace;

/// An entity collection as found on the wire: either an ordered list or a
/// mapping keyed by external id. Resolved once at the ingestion boundary.
enum Collection<'a> {
    List(&'a Vec<Value>),
    Keyed(&'a Map<String, Value>),
}

impl<'a> Collection<'a> {
    fn of(value: &'a Value) -> Option<Self> {
        match value {
            Value::Array(items) => Some(Collection::List(items)),
            Value::Object(map) => Some(Collection::Keyed(map)),
            _ => None,
        }
    }

    /// Ordered (external_id, entity) pairs. List entries get 1-based
    /// positional ids matching the controller's REST addressing; keyed
    /// entries keep their own ids.
    fn entries(&self) -> Vec<(String, &'a Value)> {
        match self {
            Collection::List(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| ((i + 1).to_string(), v))
                .collect(),
            Collection::Keyed(map) => map.iter().map(|(k, v)| (k.clone(), v)).collect(),
        }
    }
}

/// Normalize a raw controller payload of either wire shape into a canonical
/// fragment. Malformed or unrecognizable payloads yield a `Schema` error;
/// callers skip the cycle and keep the last good snapshot.
pub fn normalize(raw: &Value) -> Result<CanonicalState> {
    let obj = raw
        .as_object()
        .ok_or_else(|| VoltbridgeError::schema("state payload is not a JSON object"))?;

    // The REST endpoint sometimes wraps the state one level deeper.
    // Unwrap a single `result` envelope.
    let obj = match obj.get("result").and_then(|v| v.as_object()) {
        Some(inner) => inner,
        None => obj,
    };

    if obj.keys().any(|k| k.contains('.')) {
        return normalize_flat(obj);
    }

    // A bare `loadpoints`/`vehicles` key only occurs in the nested shape;
    // the stream always dot-prefixes per-loadpoint data.
    if obj.contains_key("site") || obj.get("loadpoints").is_some_and(|v| !v.is_null()) {
        return normalize_nested(obj);
    }

    // Flat site-level diffs carry no dots at all (e.g. a single
    // `gridPower` update), so fall back to flat parsing and reject only
    // payloads that yield nothing recognizable.
    let fragment = normalize_flat(obj)?;
    if fragment.is_empty() {
        return Err(VoltbridgeError::schema(
            "unparseable state payload: neither nested nor dot-path shape",
        ));
    }
    Ok(fragment)
}

fn normalize_nested(obj: &Map<String, Value>) -> Result<CanonicalState> {
    let mut state = CanonicalState::default();

    if let Some(site) = obj.get("site").and_then(|v| v.as_object()) {
        state.site = parse_site_object(site);
    }

    // Newer controllers put site scalars at the top level next to the
    // entity collections rather than under a `site` object.
    for (key, value) in obj {
        if matches!(key.as_str(), "site" | "loadpoints" | "vehicles" | "battery" | "pv") {
            continue;
        }
        apply_site_field(&mut state.site, key, value);
    }

    if let Some(value) = obj.get("loadpoints")
        && let Some(collection) = Collection::of(value)
    {
        for (id, entry) in collection.entries() {
            if let Some(lp) = entry.as_object() {
                state.loadpoints.push((id, parse_loadpoint_object(lp)));
            }
        }
    }

    if let Some(value) = obj.get("vehicles")
        && let Some(collection) = Collection::of(value)
    {
        for (id, entry) in collection.entries() {
            if let Some(v) = entry.as_object() {
                state.vehicles.push((id, parse_vehicle_object(v)));
            }
        }
    }

    // Battery and PV arrays appear either at the top level or inside `site`
    // depending on controller version.
    for source in [obj, obj.get("site").and_then(|v| v.as_object()).unwrap_or(obj)] {
        if state.battery.is_empty()
            && let Some(items) = source.get("battery").and_then(|v| v.as_array())
        {
            for (i, entry) in items.iter().enumerate() {
                if let Some(b) = entry.as_object() {
                    state.battery.push(((i + 1).to_string(), parse_battery_object(b)));
                }
            }
        }
        if state.pv.is_empty()
            && let Some(items) = source.get("pv").and_then(|v| v.as_array())
        {
            for (i, entry) in items.iter().enumerate() {
                if let Some(p) = entry.as_object() {
                    state.pv.push(((i + 1).to_string(), parse_pv_object(p)));
                }
            }
        }
    }

    Ok(state)
}

fn normalize_flat(obj: &Map<String, Value>) -> Result<CanonicalState> {
    let mut state = CanonicalState::default();
    // Keyed by 0-based stream index; converted to 1-based external ids below.
    let mut loadpoints: Vec<(usize, LoadpointState)> = Vec::new();

    for (key, value) in obj {
        if let Some(rest) = key.strip_prefix("loadpoints.") {
            let Some((index, field)) = rest.split_once('.') else {
                trace!(key, "ignoring loadpoint key without field suffix");
                continue;
            };
            let Ok(index) = index.parse::<usize>() else {
                trace!(key, "ignoring loadpoint key with non-numeric index");
                continue;
            };
            let pos = match loadpoints.iter().position(|(i, _)| *i == index) {
                Some(pos) => pos,
                None => {
                    loadpoints.push((index, LoadpointState::default()));
                    loadpoints.len() - 1
                }
            };
            apply_loadpoint_field(&mut loadpoints[pos].1, field, value);
            continue;
        }

        if let Some(rest) = key.strip_prefix("vehicles.") {
            // Per-vehicle stream keys carry genuine external ids.
            let Some((id, field)) = rest.split_once('.') else {
                continue;
            };
            let pos = match state.vehicles.iter().position(|(k, _)| k == id) {
                Some(pos) => pos,
                None => {
                    state.vehicles.push((id.to_string(), VehicleState::default()));
                    state.vehicles.len() - 1
                }
            };
            apply_vehicle_field(&mut state.vehicles[pos].1, field, value);
            continue;
        }

        if key == "vehicles" {
            // A top-level vehicles mapping in the stream is a set of vehicle
            // fragments keyed by their own ids.
            if let Some(map) = value.as_object() {
                for (id, entry) in map {
                    if let Some(v) = entry.as_object() {
                        state.vehicles.push((id.clone(), parse_vehicle_object(v)));
                    }
                }
            }
            continue;
        }

        apply_site_field(&mut state.site, key, value);
    }

    loadpoints.sort_by_key(|(index, _)| *index);
    state.loadpoints = loadpoints
        .into_iter()
        .map(|(index, lp)| ((index + 1).to_string(), lp))
        .collect();

    Ok(state)
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn as_string(value: &Value) -> Option<String> {
    value.as_str().map(|s| s.to_string())
}

fn parse_site_object(site: &Map<String, Value>) -> SiteState {
    let mut out = SiteState::default();
    for (key, value) in site {
        apply_site_field(&mut out, key, value);
    }
    // Legacy controllers nest grid readings one level deeper. Synthesize the
    // flat field from `grid.power`, preferring the flat scalar if both exist.
    if out.grid_power.is_none()
        && let Some(power) = site
            .get("grid")
            .and_then(|g| g.as_object())
            .and_then(|g| g.get("power"))
            .and_then(as_f64)
    {
        out.grid_power = Some(power);
    }
    out
}

fn apply_site_field(site: &mut SiteState, key: &str, value: &Value) {
    match key {
        "siteTitle" | "title" => site.title = as_string(value),
        "gridPower" => site.grid_power = as_f64(value),
        // Flat-stream spelling of the legacy nested grid record; the flat
        // scalar wins when both are present.
        "grid.power" => {
            if site.grid_power.is_none() {
                site.grid_power = as_f64(value);
            }
        }
        "homePower" => site.home_power = as_f64(value),
        "pvPower" => site.pv_power = as_f64(value),
        "batteryPower" => site.battery_power = as_f64(value),
        "batterySoc" => site.battery_soc = as_f64(value),
        "batteryMode" => site.battery_mode = as_string(value),
        "greenShareHome" => site.green_share_home = as_f64(value),
        "greenShareLoadpoints" => site.green_share_loadpoints = as_f64(value),
        "tariffGrid" => site.tariff_grid = as_f64(value),
        "tariffFeedIn" => site.tariff_feed_in = as_f64(value),
        "version" => site.version = as_string(value),
        _ => trace!(key, "ignoring unknown site field"),
    }
}

fn parse_loadpoint_object(lp: &Map<String, Value>) -> LoadpointState {
    let mut out = LoadpointState::default();
    for (key, value) in lp {
        apply_loadpoint_field(&mut out, key, value);
    }
    out
}

fn apply_loadpoint_field(lp: &mut LoadpointState, key: &str, value: &Value) {
    match key {
        "title" => lp.title = as_string(value),
        "mode" => lp.mode = as_string(value),
        "phases" | "phasesConfigured" => lp.phases = value.as_i64(),
        "chargePower" => lp.charge_power = as_f64(value),
        "chargedEnergy" => lp.charged_energy = as_f64(value),
        "charging" => lp.charging = value.as_bool(),
        "chargeTimer" | "chargeDuration" => lp.charge_timer_secs = as_f64(value),
        "minSoc" => lp.min_soc = as_f64(value),
        "targetSoc" | "limitSoc" => lp.target_soc = as_f64(value),
        "vehicleSoc" => lp.vehicle_soc = as_f64(value),
        "vehicleStatus" | "connectedStatus" => lp.vehicle_status = as_string(value),
        _ => trace!(key, "ignoring unknown loadpoint field"),
    }
}

fn parse_vehicle_object(v: &Map<String, Value>) -> VehicleState {
    let mut out = VehicleState::default();
    for (key, value) in v {
        apply_vehicle_field(&mut out, key, value);
    }
    out
}

fn apply_vehicle_field(vehicle: &mut VehicleState, key: &str, value: &Value) {
    match key {
        "title" => vehicle.title = as_string(value),
        // Older controllers only send `name`; keep it as a title fallback.
        "name" => {
            if vehicle.title.is_none() {
                vehicle.title = as_string(value);
            }
        }
        "soc" => vehicle.soc = as_f64(value),
        "range" => vehicle.range_km = as_f64(value),
        "status" => vehicle.status = as_string(value),
        _ => trace!(key, "ignoring unknown vehicle field"),
    }
}

fn parse_battery_object(b: &Map<String, Value>) -> BatteryState {
    BatteryState {
        title: b.get("title").and_then(as_string),
        power: b.get("power").and_then(as_f64),
        soc: b.get("soc").and_then(as_f64),
        capacity_kwh: b.get("capacity").and_then(as_f64),
    }
}

fn parse_pv_object(p: &Map<String, Value>) -> PvState {
    PvState {
        title: p.get("title").and_then(as_string),
        power: p.get("power").and_then(as_f64),
        energy_kwh: p.get("energy").and_then(as_f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn nested_shape_with_result_envelope() {
        let payload = json!({
            "result": {
                "site": {"gridPower": 500.0, "homePower": 300.0},
                "loadpoints": [{"mode": "pv", "phases": 1}],
                "vehicles": []
            }
        });
        let state = normalize(&payload).unwrap();
        assert_eq!(state.site.grid_power, Some(500.0));
        assert_eq!(state.loadpoints.len(), 1);
        assert_eq!(state.loadpoints[0].0, "1");
        assert_eq!(state.loadpoints[0].1.mode.as_deref(), Some("pv"));
    }

    #[test]
    fn nested_keyed_collections() {
        let payload = json!({
            "site": {"gridPower": 100.0},
            "vehicles": {
                "db:2": {"title": "Zoe", "soc": 55.0}
            }
        });
        let state = normalize(&payload).unwrap();
        assert_eq!(state.vehicles.len(), 1);
        assert_eq!(state.vehicles[0].0, "db:2");
        assert_eq!(state.vehicles[0].1.soc, Some(55.0));
    }

    #[test]
    fn flat_shape_groups_loadpoint_keys() {
        let payload = json!({
            "gridPower": 250.0,
            "loadpoints.0.chargePower": 3700.0,
            "loadpoints.0.mode": "now",
            "loadpoints.1.mode": "off"
        });
        let state = normalize(&payload).unwrap();
        assert_eq!(state.site.grid_power, Some(250.0));
        assert_eq!(state.loadpoints.len(), 2);
        // 0-based stream indices become 1-based external ids
        assert_eq!(state.loadpoints[0].0, "1");
        assert_eq!(state.loadpoints[0].1.charge_power, Some(3700.0));
        assert_eq!(state.loadpoints[1].0, "2");
        assert_eq!(state.loadpoints[1].1.mode.as_deref(), Some("off"));
    }

    #[test]
    fn nested_shape_with_top_level_site_scalars() {
        let payload = json!({
            "result": {
                "gridPower": 500.0,
                "batterySoc": 80.0,
                "version": "0.200.0",
                "loadpoints": [{"title": "Garage", "chargePower": 7400.0}]
            }
        });
        let state = normalize(&payload).unwrap();
        assert_eq!(state.site.grid_power, Some(500.0));
        assert_eq!(state.site.battery_soc, Some(80.0));
        assert_eq!(state.loadpoints[0].1.title.as_deref(), Some("Garage"));
        assert!(state.looks_complete());
    }

    #[test]
    fn flat_site_only_fragment() {
        let state = normalize(&json!({"gridPower": 100})).unwrap();
        assert_eq!(state.site.grid_power, Some(100.0));
        assert!(!state.looks_complete());
    }

    #[test]
    fn legacy_grid_nesting_prefers_flat_scalar() {
        let nested_only = json!({"site": {"grid": {"power": 420.0}}});
        let state = normalize(&nested_only).unwrap();
        assert_eq!(state.site.grid_power, Some(420.0));

        let both = json!({"site": {"gridPower": 500.0, "grid": {"power": 420.0}}});
        let state = normalize(&both).unwrap();
        assert_eq!(state.site.grid_power, Some(500.0));
    }

    #[test]
    fn unrecognized_payload_is_schema_error() {
        assert!(normalize(&json!([1, 2, 3])).is_err());
        assert!(normalize(&json!({"foo": "bar"})).is_err());
        assert!(normalize(&json!("nope")).is_err());
    }

    #[test]
    fn normalize_is_deterministic() {
        let payload = json!({
            "site": {"gridPower": 500, "batterySoc": 80, "batteryMode": "normal"},
            "loadpoints": [{"mode": "pv", "phases": 1}],
            "vehicles": []
        });
        let a = normalize(&payload).unwrap();
        let b = normalize(&payload).unwrap();
        assert_eq!(a, b);
        assert!(a.site.has_battery());
    }
}
