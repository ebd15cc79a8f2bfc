//! End-to-end reconciliation tests: raw controller payloads in, registry
//! device values out.

use async_trait::async_trait;
use serde_json::{Value, json};
use voltbridge::bridge::Bridge;
use voltbridge::commands::{BatteryMode, ChargeMode, PhaseSetting};
use voltbridge::config::Config;
use voltbridge::error::Result;
use voltbridge::identity::EntityKind;
use voltbridge::registry::{DeviceClass, MemoryRegistry};
use voltbridge::transport::ControllerApi;

/// Controller stub for tests that never issue commands
struct IdleController;

#[async_trait]
impl ControllerApi for IdleController {
    async fn fetch_state(&mut self) -> Result<Value> {
        Ok(json!({"gridPower": 0.0}))
    }
    async fn set_loadpoint_mode(&mut self, _: &str, _: ChargeMode) -> Result<()> {
        Ok(())
    }
    async fn set_loadpoint_phases(&mut self, _: &str, _: PhaseSetting) -> Result<()> {
        Ok(())
    }
    async fn set_loadpoint_min_soc(&mut self, _: &str, _: u8) -> Result<()> {
        Ok(())
    }
    async fn set_loadpoint_limit_soc(&mut self, _: &str, _: u8) -> Result<()> {
        Ok(())
    }
    async fn set_battery_mode(&mut self, _: BatteryMode) -> Result<()> {
        Ok(())
    }
}

fn test_config() -> Config {
    let mut config = Config::default();
    // Fold partial frames immediately so tests need no clock
    config.updates.partial_fold_secs = 0;
    config
}

fn bridge() -> Bridge<IdleController, MemoryRegistry> {
    Bridge::new(test_config(), IdleController, MemoryRegistry::new())
}

fn bridge_with(registry: MemoryRegistry) -> Bridge<IdleController, MemoryRegistry> {
    Bridge::new(test_config(), IdleController, registry)
}

fn full_state() -> Value {
    json!({
        "result": {
            "siteTitle": "Home",
            "gridPower": 500.0,
            "homePower": 300.0,
            "pvPower": 1000.0,
            "batterySoc": 80.0,
            "batteryMode": "normal",
            "version": "0.200.0",
            "loadpoints": [{
                "title": "Garage",
                "mode": "pv",
                "phases": 3,
                "chargePower": 7400.0,
                "charging": true,
                "chargeTimer": 600.0
            }],
            "vehicles": {
                "db:2": {"title": "Zoe", "soc": 55.0, "range": 120.0, "status": "B"}
            }
        }
    })
}

#[test]
fn full_state_creates_and_fills_devices() {
    let mut bridge = bridge();
    bridge.ingest(&full_state());
    let registry = bridge.registry();

    // Site trio takes the first units of the site range
    let grid = registry.unit(1).expect("grid power unit");
    assert_eq!(grid.display_name, "Home Grid Power");
    assert_eq!(grid.description, "site_1_grid_power");
    assert_eq!(grid.string_value, "500.0;0");
    assert_eq!(registry.unit(2).expect("home power").string_value, "300.0;0");
    assert_eq!(registry.unit(3).expect("pv power").string_value, "1000.0;0");

    // Battery aggregate in the battery range
    assert_eq!(registry.unit(20).expect("battery soc").string_value, "80.0");
    let mode = registry.unit(21).expect("battery mode");
    assert_eq!(mode.numeric_value, 10);
    assert!(matches!(mode.class, DeviceClass::Selector(_)));

    // Vehicle devices start at the vehicle base
    let soc = registry.unit(100).expect("vehicle soc");
    assert_eq!(soc.display_name, "Zoe SoC");
    assert_eq!(soc.string_value, "55.0");
    assert_eq!(registry.unit(101).expect("vehicle range").string_value, "120.0");
    // Status code "B" maps to the Charging level
    assert_eq!(registry.unit(102).expect("vehicle status").numeric_value, 20);

    // Loadpoint devices start at the loadpoint base
    assert_eq!(
        registry.unit(200).expect("charging power").string_value,
        "7400.0;0"
    );
    assert_eq!(registry.unit(201).expect("charge mode").numeric_value, 30);
    assert_eq!(registry.unit(202).expect("phases").numeric_value, 20);
    // 600 seconds of charging shown as 10 minutes
    assert_eq!(
        registry.unit(203).expect("charging timer").string_value,
        "10"
    );
}

#[test]
fn partial_before_complete_gives_immediate_visibility() {
    let mut bridge = bridge();
    // Single flat stream frame, long before any full sync
    bridge.ingest(&json!({"loadpoints.0.chargePower": 7400.0}));

    let charging_power = bridge
        .registry()
        .unit(200)
        .expect("loadpoint unit from tentative snapshot");
    assert_eq!(charging_power.string_value, "7400.0;0");
    assert_eq!(charging_power.description, "loadpoint_1_charging_power");
}

#[test]
fn first_complete_replaces_tentative_state() {
    let mut bridge = bridge();
    bridge.ingest(&json!({"loadpoints.0.chargePower": 1000.0}));
    assert_eq!(bridge.registry().unit(200).expect("lp").string_value, "1000.0;0");

    // The first full document is never throttled and wins wholesale
    bridge.ingest(&full_state());
    assert_eq!(bridge.registry().unit(200).expect("lp").string_value, "7400.0;0");
    assert_eq!(bridge.registry().unit(1).expect("grid").string_value, "500.0;0");
}

#[test]
fn poll_snapshot_is_never_throttled_behind_stream_frames() {
    // Stock throttle timings: a complete stream frame arms the 5s
    // complete-throttle window.
    let mut bridge = Bridge::new(Config::default(), IdleController, MemoryRegistry::new());
    bridge.ingest(&full_state());
    assert_eq!(bridge.registry().unit(1).expect("grid").string_value, "500.0;0");

    // A poll response right afterwards must replace state immediately,
    // not sit buffered until the window elapses.
    let applied = bridge.ingest_snapshot(&json!({
        "result": {
            "gridPower": 750.0,
            "homePower": 300.0,
            "pvPower": 1000.0,
            "version": "0.200.0"
        }
    }));
    assert!(applied);
    assert_eq!(bridge.registry().unit(1).expect("grid").string_value, "750.0;0");
}

#[test]
fn recovered_names_survive_untitled_state() {
    let mut seeded = MemoryRegistry::new();
    seeded.seed(1, "Casa Grid Power", DeviceClass::Power, "site_1_grid_power");

    let mut bridge = bridge_with(seeded);
    // The payload carries no siteTitle; the name recovered from the
    // persisted unit still labels newly created ones.
    bridge.ingest(&json!({"gridPower": 100.0, "homePower": 50.0}));

    let home = bridge.registry().unit(2).expect("home power unit");
    assert_eq!(home.display_name, "Casa Home Power");
}

#[test]
fn live_titles_refresh_resolver_names() {
    let mut bridge = bridge();
    bridge.ingest(&full_state());

    let resolver = bridge.resolver();
    assert_eq!(resolver.display_name(EntityKind::Site, "1"), Some("Home"));
    assert_eq!(resolver.display_name(EntityKind::Vehicle, "db:2"), Some("Zoe"));
    assert_eq!(resolver.display_name(EntityKind::Loadpoint, "1"), Some("Garage"));
}

#[test]
fn vehicles_allocate_in_discovery_order() {
    let mut bridge = bridge();
    bridge.ingest(&json!({
        "gridPower": 100.0,
        "version": "0.200.0",
        "vehicles": {
            "db:2": {"soc": 50.0},
            "db:5": {"soc": 60.0}
        }
    }));

    let registry = bridge.registry();
    // Numeric parts of external ids play no role in slot assignment
    assert_eq!(registry.unit(100).expect("first vehicle").description, "vehicle_db:2_soc");
    assert_eq!(registry.unit(120).expect("second vehicle").description, "vehicle_db:5_soc");
}

#[test]
fn recovery_reuses_persisted_units() {
    let mut seeded = MemoryRegistry::new();
    // A unit surviving from an earlier run, off its natural slot
    seeded.seed(105, "Zoe SoC", DeviceClass::Percentage, "vehicle_db:2_soc");

    let mut bridge = bridge_with(seeded);
    bridge.ingest(&json!({
        "gridPower": 100.0,
        "version": "0.200.0",
        "vehicles": {"db:2": {"soc": 77.0}}
    }));

    let registry = bridge.registry();
    assert_eq!(registry.unit(105).expect("recovered unit").string_value, "77.0");
    // No duplicate unit was created on the natural slot
    assert!(registry.unit(100).is_none());
}

#[test]
fn unchanged_values_are_not_rewritten() {
    let mut bridge = bridge();
    bridge.ingest(&json!({"gridPower": 100.0}));
    assert_eq!(bridge.registry().write_count(), 1);

    // Different fragment, same grid value: only the new home reading lands
    bridge.ingest(&json!({"gridPower": 100.0, "homePower": 50.0}));
    assert_eq!(bridge.registry().write_count(), 2);
    assert_eq!(bridge.registry().unit(2).expect("home").string_value, "50.0;0");
}
