//! Bridge orchestrator
//!
//! Owns the event loop: stream frames and host commands come in, registry
//! updates and controller writes go out. Every inbound fragment takes the
//! same path regardless of transport: normalize to canonical form, merge
//! into the partial-update buffer, and when the buffer emits a snapshot,
//! project it onto devices.
//!
//! Commands go controller-first: the registry value is only written back
//! after the controller accepts the setting, so a rejected command leaves
//! the device showing the real state.

use crate::config::Config;
use crate::devices::{self, DeviceUpdate};
use crate::error::{Result, VoltbridgeError};
use crate::identity::{DeviceKey, EntityKind, IdentityResolver};
use crate::logging::{StructuredLogger, get_logger};
use crate::merge::PartialUpdateBuffer;
use crate::registry::DeviceRegistry;
use crate::scheduler::{Scheduler, SchedulerAction, SchedulerPolicy};
use crate::schema;
use crate::state::CanonicalState;
use crate::stream::{self, StreamEvent, StreamHandle};
use crate::transport::ControllerApi;
use crate::commands::{BatteryMode, ChargeMode, PhaseSetting};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

/// A command from the hub targeting one of our units
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub unit: u32,
    /// Selector level for selector devices, raw percent for SoC setpoints
    pub level: u8,
}

pub struct Bridge<C: ControllerApi, R: DeviceRegistry> {
    config: Config,
    controller: C,
    registry: R,
    resolver: IdentityResolver,
    buffer: PartialUpdateBuffer,
    scheduler: Scheduler,
    stream_handle: Option<StreamHandle>,
    stream_events: mpsc::Receiver<StreamEvent>,
    stream_sender: mpsc::Sender<StreamEvent>,
    /// Last value pushed per unit, for skipping no-op registry writes
    last_applied: HashMap<u32, (i64, String)>,
    logger: StructuredLogger,
}

impl<C: ControllerApi, R: DeviceRegistry> Bridge<C, R> {
    pub fn new(config: Config, controller: C, registry: R) -> Self {
        let (resolver, conflicts) =
            IdentityResolver::recover_from_registry(&registry.records());
        let logger = get_logger("bridge");
        for conflict in &conflicts {
            logger.warn(&format!("Startup recovery: {conflict}"));
        }
        for kind in EntityKind::ALL {
            let known = resolver.known_externals(kind);
            if !known.is_empty() {
                logger.info(&format!(
                    "Recovered {} {} entit{} from registry: {}",
                    known.len(),
                    kind,
                    if known.len() == 1 { "y" } else { "ies" },
                    known.join(", ")
                ));
            }
        }

        let updates = &config.updates;
        let scheduler = Scheduler::new(SchedulerPolicy {
            streaming: updates.streaming,
            poll_interval: Duration::from_secs(updates.poll_interval_secs),
            stream_retry_limit: updates.stream_retry_limit,
            forced_refresh: Duration::from_secs(updates.forced_refresh_secs),
        });
        let buffer = PartialUpdateBuffer::new(
            Duration::from_secs(updates.complete_throttle_secs),
            Duration::from_secs(updates.partial_fold_secs),
        );

        let (stream_sender, stream_events) = mpsc::channel(64);

        Self {
            config,
            controller,
            registry,
            resolver,
            buffer,
            scheduler,
            stream_handle: None,
            stream_events,
            stream_sender,
            last_applied: HashMap::new(),
            logger,
        }
    }

    /// Drive the bridge until the command channel closes.
    pub async fn run(&mut self, mut commands: mpsc::Receiver<HostCommand>) -> Result<()> {
        self.logger.info(&format!(
            "Bridge starting against {}",
            self.config.api_base_url()
        ));

        loop {
            let action = self.scheduler.next_action(Instant::now());
            match action {
                SchedulerAction::ConnectStream { generation } => {
                    self.connect_stream(generation).await;
                }
                SchedulerAction::Poll => {
                    if self.scheduler.begin_cycle() {
                        let was_ok = self.poll_cycle().await;
                        self.scheduler.finish_cycle(Instant::now(), was_ok);
                    }
                }
                SchedulerAction::Wait(duration) => {
                    tokio::select! {
                        _ = tokio::time::sleep(duration) => {}
                        event = self.stream_events.recv() => {
                            if let Some(event) = event {
                                self.handle_stream_event(event);
                            }
                        }
                        command = commands.recv() => {
                            match command {
                                Some(command) => self.handle_command(command).await,
                                None => {
                                    self.logger.info("Command channel closed, shutting down");
                                    self.shutdown().await;
                                    return Ok(());
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        if let Some(mut handle) = self.stream_handle.take() {
            handle.close();
        }
        self.controller.logout().await;
    }

    async fn connect_stream(&mut self, generation: u64) {
        if let Some(mut old) = self.stream_handle.take() {
            old.close();
        }

        let url = self.config.ws_url();
        let timeout = Duration::from_secs(self.config.updates.connect_timeout_secs);
        match stream::connect(&url, generation, timeout, self.stream_sender.clone()).await {
            Ok(handle) => {
                self.logger
                    .info(&format!("Stream connected, generation {}", handle.generation()));
                self.stream_handle = Some(handle);
                self.scheduler.stream_connected();
                // Anything buffered belongs to the old connection
                self.buffer.reset();
            }
            Err(e) => {
                self.logger.warn(&format!("Stream connect failed: {e}"));
                self.scheduler.stream_failed();
            }
        }
    }

    fn handle_stream_event(&mut self, event: StreamEvent) {
        // Frames from a superseded connection must not touch the buffer
        if event.generation() != self.scheduler.current_generation() {
            self.logger.debug(&format!(
                "Discarding event from stale generation {}",
                event.generation()
            ));
            return;
        }

        match event {
            StreamEvent::Connected { .. } => {}
            StreamEvent::Message { payload, .. } => {
                self.ingest(&payload);
            }
            StreamEvent::Closed { .. } => {
                self.stream_handle = None;
                self.scheduler.stream_closed();
            }
        }
    }

    /// Normalize a raw payload and merge it; apply any emitted snapshot.
    ///
    /// This is the single entry point for inbound data. The event loop
    /// feeds it stream frames and poll responses; an embedding host that
    /// receives payloads through its own transport can call it directly.
    pub fn ingest(&mut self, payload: &serde_json::Value) {
        let fragment = match schema::normalize(payload) {
            Ok(fragment) => fragment,
            Err(e) => {
                self.logger.warn(&format!("Dropping unrecognized payload: {e}"));
                return;
            }
        };

        if let Some(snapshot) = self.buffer.merge(fragment, Instant::now()) {
            self.apply(snapshot);
        }
    }

    /// Normalize an authoritative full snapshot and apply it, replacing
    /// the buffered state outright. Poll responses come through here so
    /// they are never throttled behind a recent stream frame.
    pub fn ingest_snapshot(&mut self, payload: &serde_json::Value) -> bool {
        let fragment = match schema::normalize(payload) {
            Ok(fragment) => fragment,
            Err(e) => {
                self.logger.warn(&format!("Dropping unrecognized snapshot: {e}"));
                return false;
            }
        };

        let snapshot = self.buffer.accept_snapshot(fragment, Instant::now());
        self.apply(snapshot);
        true
    }

    /// One fetch-and-apply cycle against the REST endpoint. Returns whether
    /// a full refresh was applied.
    async fn poll_cycle(&mut self) -> bool {
        let payload = match self.controller.fetch_state().await {
            Ok(payload) => payload,
            Err(e) => {
                self.logger.warn(&format!("State fetch failed: {e}"));
                if matches!(e, VoltbridgeError::Auth { .. }) {
                    // Session expired; re-login and let the next cycle retry
                    if let Err(e) = self.controller.login().await {
                        self.logger.warn(&format!("Re-login failed: {e}"));
                    }
                }
                return false;
            }
        };
        self.ingest_snapshot(&payload)
    }

    /// Push a snapshot to the registry, creating units on first sighting
    /// and skipping writes whose value has not changed.
    fn apply(&mut self, mut snapshot: CanonicalState) {
        self.sync_display_names(&mut snapshot);
        let updates = devices::project(&snapshot);
        let mut written = 0usize;

        for update in updates {
            if self.write_device(&update) {
                written += 1;
            }
        }

        if written > 0 {
            self.logger
                .debug(&format!("Applied snapshot, {written} unit(s) updated"));
        }
    }

    /// Titles flow both ways between live state and the resolver: a title
    /// carried by the snapshot refreshes the resolver's record of it, and
    /// an entity arriving without one keeps the name recovered from the
    /// registry instead of falling back to a generic label.
    fn sync_display_names(&mut self, snapshot: &mut CanonicalState) {
        if let Some(title) = &snapshot.site.title {
            self.resolver.set_display_name(EntityKind::Site, "1", title);
        } else if let Some(name) = self.resolver.display_name(EntityKind::Site, "1") {
            snapshot.site.title = Some(name.to_string());
        }

        for (id, vehicle) in &mut snapshot.vehicles {
            if let Some(title) = &vehicle.title {
                self.resolver.set_display_name(EntityKind::Vehicle, id, title);
            } else if let Some(name) = self.resolver.display_name(EntityKind::Vehicle, id) {
                vehicle.title = Some(name.to_string());
            }
        }

        for (id, loadpoint) in &mut snapshot.loadpoints {
            if let Some(title) = &loadpoint.title {
                self.resolver.set_display_name(EntityKind::Loadpoint, id, title);
            } else if let Some(name) = self.resolver.display_name(EntityKind::Loadpoint, id) {
                loadpoint.title = Some(name.to_string());
            }
        }
    }

    fn write_device(&mut self, update: &DeviceUpdate) -> bool {
        let unit = match self.resolver.unit_for(&update.key) {
            Some(unit) => unit,
            None => {
                let unit = self.resolver.resolve(&update.key);
                if self.registry.find_unit(&update.key.to_string()).is_none() {
                    self.logger.info(&format!(
                        "Creating unit {} '{}' for {}",
                        unit, update.display_name, update.key
                    ));
                    self.registry.create_unit(
                        unit,
                        &update.display_name,
                        update.class.clone(),
                        &update.key.to_string(),
                    );
                }
                unit
            }
        };

        let value = (update.numeric_value, update.string_value.clone());
        if self.last_applied.get(&unit) == Some(&value) {
            return false;
        }

        self.registry
            .update_unit(unit, update.numeric_value, &update.string_value);
        self.last_applied.insert(unit, value);
        true
    }

    /// Translate and execute one hub command. The controller is asked
    /// first; only an accepted setting is written back to the registry, so
    /// a rejection leaves the device on its previous value.
    pub async fn handle_command(&mut self, command: HostCommand) {
        let key = match self.resolver.key_for_unit(command.unit) {
            Some(key) => key.clone(),
            None => {
                self.logger
                    .warn(&format!("Command for unknown unit {}", command.unit));
                return;
            }
        };

        let result = self.dispatch_command(&key, command.level).await;
        match result {
            Ok(()) => {
                self.logger.info(&format!(
                    "Command accepted: {} on unit {} set to level {}",
                    key, command.unit, command.level
                ));
                // Optimistic write-back of the accepted value
                self.registry.update_unit(
                    command.unit,
                    i64::from(command.level),
                    &command.level.to_string(),
                );
                self.last_applied.insert(
                    command.unit,
                    (i64::from(command.level), command.level.to_string()),
                );
            }
            Err(e) => {
                self.logger.error(&format!(
                    "Command for {} failed, device left unchanged: {e}",
                    key
                ));
            }
        }
    }

    async fn dispatch_command(&mut self, key: &DeviceKey, level: u8) -> Result<()> {
        match (key.kind, key.parameter.as_str()) {
            (EntityKind::Loadpoint, "mode") => {
                self.controller
                    .set_loadpoint_mode(&key.external_id, ChargeMode::from_level(level))
                    .await
            }
            (EntityKind::Loadpoint, "phases") => {
                self.controller
                    .set_loadpoint_phases(&key.external_id, PhaseSetting::from_level(level))
                    .await
            }
            (EntityKind::Loadpoint, "min_soc") => {
                self.controller
                    .set_loadpoint_min_soc(&key.external_id, level)
                    .await
            }
            (EntityKind::Loadpoint, "target_soc") => {
                self.controller
                    .set_loadpoint_limit_soc(&key.external_id, level)
                    .await
            }
            (EntityKind::Battery, "mode") => {
                self.controller
                    .set_battery_mode(BatteryMode::from_level(level))
                    .await
            }
            _ => Err(VoltbridgeError::command_rejected(format!(
                "Device {key} is read-only"
            ))),
        }
    }

    /// Accessors for integration tests and the binary
    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut R {
        &mut self.registry
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }
}
