//! The recompute engine (spec §5): the single place every external event
//! funnels through. Grounded on `brain::Brain`/`brain::python_like::PythonBrain::run`
//! for the "one synchronous sweep over every room, then the boiler, then I/O"
//! shape, and on `main.rs`'s main loop for how a host drives it.
//!
//! `trigger_recompute(reason)` is the only entry point a host needs to call;
//! it always runs `recompute_all` to completion before returning, so two
//! recomputes for rapid-fire sensor events never interleave (spec §5).

use crate::alerts::{AlertKind, AlertManager, Severity};
use crate::bridge::Bridge;
use crate::config::schedule::OperatingMode;
use crate::config::{DaemonConfig, DomainConfig};
use crate::cycling::CyclingProtection;
use crate::load_calc::radiator_capacity_w;
use crate::load_sharing::{LoadSharingManager, RoomCandidate};
use crate::overrides::OverrideStore;
use crate::persistence::{self, CyclingProtectionState, PersistedState, RoomState, SetpointRampState};
use crate::ramp::SetpointRamp;
use crate::room::RoomController;
use crate::schedule::ScheduleStore;
use crate::sensors::SensorManager;
use crate::status::StatusPublisher;
use crate::telemetry::{TelemetryRow, TelemetryWriter};
use crate::valve::{TrvController, ValveCoordinator};
use crate::boiler::{BoilerFsm, BoilerInputs};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub struct Controller {
    bridge: Arc<dyn Bridge>,
    domain: DomainConfig,
    daemon: DaemonConfig,
    sensors: SensorManager,
    schedule: ScheduleStore,
    overrides: OverrideStore,
    rooms: RoomController,
    boiler: BoilerFsm,
    cycling: CyclingProtection,
    ramp: SetpointRamp,
    load_sharing: LoadSharingManager,
    coordinator: ValveCoordinator,
    trvs: TrvController,
    alerts: AlertManager,
    telemetry: Option<TelemetryWriter>,
    status: StatusPublisher,
    first_tick: bool,
}

impl Controller {
    /// Wires up every sub-module and restores durable state (spec §6
    /// "Persisted state", §9 "Persistence is a pure map": read once here,
    /// every subsequent write goes through `save_persisted_state`).
    pub fn new(bridge: Arc<dyn Bridge>, daemon: DaemonConfig, domain: DomainConfig) -> Self {
        let persisted = persistence::load(&daemon.persistence_file);

        let schedule = ScheduleStore::new(domain.schedules.clone());

        let mut rooms = RoomController::new();
        for (id, state) in &persisted.room_state {
            rooms.restore(id, state.valve_percent);
        }

        let mut coordinator = ValveCoordinator::restore(persisted.pump_overrun_snapshot.clone());
        if !coordinator.is_pump_overrun_active() {
            coordinator = ValveCoordinator::new();
        }

        let mut cycling = CyclingProtection::new();
        cycling.restore(
            persisted.cycling_protection.mode,
            persisted.cycling_protection.saved_setpoint,
            persisted.cycling_protection.cooldown_start,
        );

        let ramp = SetpointRamp::new();

        let mut trvs = TrvController::new(bridge.clone());
        for room in &domain.rooms {
            trvs.register_room(&room.id, room.trv.clone(), room.valve_update.min_interval_s);
        }

        let telemetry = Some(TelemetryWriter::new(daemon.telemetry_dir.clone()));
        let status = StatusPublisher::new(bridge.clone());

        Controller {
            bridge,
            domain,
            daemon,
            sensors: SensorManager::new(),
            schedule,
            overrides: OverrideStore::new(),
            rooms,
            boiler: BoilerFsm::new(),
            cycling,
            ramp,
            load_sharing: LoadSharingManager::new(),
            coordinator,
            trvs,
            alerts: AlertManager::new(),
            telemetry,
            status,
            first_tick: true,
        }
    }

    pub fn schedule_mut(&mut self) -> &mut ScheduleStore {
        &mut self.schedule
    }

    pub fn schedule(&self) -> &ScheduleStore {
        &self.schedule
    }

    pub fn overrides_mut(&mut self) -> &mut OverrideStore {
        &mut self.overrides
    }

    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    pub fn domain(&self) -> &DomainConfig {
        &self.domain
    }

    pub fn domain_mut(&mut self) -> &mut DomainConfig {
        &mut self.domain
    }

    pub fn daemon(&self) -> &DaemonConfig {
        &self.daemon
    }

    pub fn current_valve_commands(&self) -> &HashMap<String, u8> {
        self.coordinator.current_commands()
    }

    /// Re-reads `rooms.yaml`/`schedules.yaml`/`boiler.yaml` from the paths in
    /// `DaemonConfig` (spec §6 `reload_config`). A bad file leaves the
    /// previous domain config in place, matching the teacher's
    /// `try_read_python_brain_config_file` "fatal to the reload, not to the
    /// daemon" behaviour.
    pub fn reload_config(&mut self) -> Result<(), String> {
        let domain = crate::config::load_domain_config(&self.daemon).map_err(|e| e.to_string())?;
        for (room_id, schedule) in &domain.schedules {
            self.schedule.replace_schedule(room_id, schedule.clone());
        }
        self.domain = domain;
        Ok(())
    }

    /// Feed a raw sensor reading in from the bridge. Deadband filtering
    /// against recompute storms (spec §5) is the host's job at the
    /// `listen_state` callback; this always records the value so staleness
    /// accounting stays correct regardless.
    pub fn record_sensor(&mut self, entity_id: &str, value: f32, now: DateTime<Utc>) {
        self.sensors.record(entity_id, value, now);
    }

    /// Rebuilds ramp state from the live boiler entity (spec §4.7: no
    /// persistence is kept for the ramp, so a restart must re-derive it from
    /// whatever the boiler is physically doing). Call once after `new`,
    /// before the first `trigger_recompute`.
    pub async fn bootstrap(&mut self) {
        let flow_temp = self
            .bridge
            .get_attribute(&self.domain.boiler.entity_id, "flow_temperature")
            .await
            .and_then(|v| v.parse::<f32>().ok());
        let flame_on = self
            .bridge
            .get_attribute(&self.domain.boiler.entity_id, "flame_on")
            .await
            .map(|v| v == "true")
            .unwrap_or(false);
        if let Some(flow_temp) = flow_temp {
            self.ramp.infer_on_restart(self.domain.boiler.base_flow_setpoint_c, flow_temp, flame_on);
        }
    }

    /// Every external event funnels through here (spec §5).
    pub async fn trigger_recompute(&mut self, reason: &str, now: DateTime<Utc>) {
        self.bridge.log_info(&format!("Recompute triggered: {reason}"));
        self.overrides.sweep_expired(now);
        self.recompute_all(now).await;
    }

    async fn recompute_all(&mut self, now: DateTime<Utc>) {
        let frost_temp = self.domain.system.frost_protection_temp_c;
        let base_setpoint = self.domain.boiler.base_flow_setpoint_c;

        let mut calling_rooms = HashSet::new();
        let mut room_desired_percent = HashMap::new();
        let mut candidates = Vec::new();
        let mut room_temps: HashMap<String, Option<f32>> = HashMap::new();
        let mut room_targets: HashMap<String, f32> = HashMap::new();
        let mut passive_max_temps: HashMap<String, f32> = HashMap::new();

        for room in self.domain.rooms.clone() {
            let (temp, is_stale) = self.sensors.room_temperature_smoothed(&room, now);
            room_temps.insert(room.id.clone(), temp);

            let result = self.rooms.compute(
                &room,
                now,
                &self.schedule,
                &self.overrides,
                temp,
                is_stale,
                frost_temp,
                true,
            );

            if result.decision.is_calling() {
                calling_rooms.insert(room.id.clone());
            }
            if let Some(pct) = result.decision.desired_valve_percent() {
                if pct > 0 {
                    room_desired_percent.insert(room.id.clone(), pct);
                }
            }

            let resolved = self.schedule.resolve_target(&room.id, now, &self.overrides, frost_temp);
            let mut passive_max_temp = None;
            if let Some(resolved) = &resolved {
                room_targets.insert(room.id.clone(), resolved.target);
                if resolved.operating_mode == OperatingMode::Passive {
                    passive_max_temp = Some(resolved.target);
                    passive_max_temps.insert(room.id.clone(), resolved.target);
                }
            }

            let capacity = room
                .delta_t50
                .map(|delta_t50| {
                    radiator_capacity_w(
                        delta_t50,
                        room.radiator_exponent_or_default(),
                        base_setpoint,
                        self.domain.boiler.load_monitoring.system_delta_t,
                        temp.unwrap_or(18.0),
                    )
                })
                .unwrap_or(0.0);

            candidates.push(RoomCandidate {
                id: room.id.clone(),
                mode: self.schedule.mode(&room.id),
                calling: result.decision.is_calling(),
                temp,
                current_valve_percent: self.rooms.last_commanded_valve(&room.id),
                capacity_at_100_w: capacity,
                off_delta_c: room.hysteresis.off_delta_c,
                next_schedule_change: self.schedule.next_change(&room.id, now, self.schedule.holiday),
                schedule_lookahead_m: room.load_sharing.schedule_lookahead_m,
                fallback_priority: room.load_sharing.fallback_priority,
                passive_max_temp,
            });
        }

        let flame_on = self
            .bridge
            .get_attribute(&self.domain.boiler.entity_id, "flame_on")
            .await
            .map(|v| v == "true")
            .unwrap_or(false);
        let boiler_entity_heating = self
            .bridge
            .get_state(&self.domain.boiler.entity_id)
            .await
            .map(|s| s == "heat")
            .unwrap_or(false);
        let flow_temp = self
            .bridge
            .get_attribute(&self.domain.boiler.entity_id, "flow_temperature")
            .await
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(0.0);
        let return_temp = self
            .bridge
            .get_attribute(&self.domain.boiler.entity_id, "return_temperature")
            .await
            .and_then(|v| v.parse::<f32>().ok())
            .unwrap_or(0.0);
        let dhw_active = self
            .bridge
            .get_state("binary_sensor.dhw_active")
            .await
            .map(|s| s == "on")
            .unwrap_or(false);

        // spec §4.5/I4 `trv_feedback_ok`: every calling room's TRV must have
        // confirmed its last commanded opening within tolerance. The first
        // recompute has no prior commands to check against, so it's exempt
        // (startup grace, spec §4.5/§4.10).
        let trv_feedback_confirmed = self.first_tick
            || calling_rooms.iter().all(|room| self.trvs.room_feedback_confirmed(room));

        let boiler_inputs = BoilerInputs {
            has_demand: !calling_rooms.is_empty(),
            calling_rooms: calling_rooms.clone(),
            room_desired_percent: room_desired_percent.clone(),
            trv_feedback_confirmed,
            flame_on,
            boiler_entity_heating,
            is_startup: self.first_tick,
        };
        let boiler_outputs = self.boiler.step(&boiler_inputs, now, &self.domain.boiler);

        for alert in &boiler_outputs.alerts {
            self.raise_boiler_alert(*alert, now);
        }

        if boiler_outputs.pump_overrun_snapshot_active {
            self.coordinator.enable_pump_overrun();
        } else {
            self.coordinator.disable_pump_overrun();
        }

        let cycling_outputs = self.cycling.tick(
            now,
            flame_on,
            true,
            dhw_active,
            return_temp,
            base_setpoint,
            &self.domain.boiler.cooldown,
        );

        let cycling_normal = matches!(cycling_outputs.state, crate::cycling::CyclingState::Normal);
        let ramp_outputs = self.ramp.tick(
            self.domain.boiler.setpoint_ramp.enabled,
            matches!(boiler_outputs.state, crate::boiler::BoilerState::On),
            cycling_normal,
            flame_on,
            flow_temp,
            base_setpoint,
            &self.domain.boiler.setpoint_ramp,
        );

        if let Some(setpoint) = cycling_outputs.forced_setpoint_c.or(ramp_outputs.setpoint_c) {
            self.command_flow_setpoint(setpoint).await;
        }

        let effective_setpoint = cycling_outputs
            .forced_setpoint_c
            .or(ramp_outputs.setpoint_c)
            .unwrap_or(base_setpoint);
        let load_sharing_outputs = self.load_sharing.tick(
            now,
            &candidates,
            calling_rooms.is_empty(),
            matches!(cycling_outputs.state, crate::cycling::CyclingState::Cooldown),
            return_temp,
            effective_setpoint,
            &self.domain.boiler.load_sharing,
        );

        for room in &self.domain.rooms {
            let desired = room_desired_percent.get(&room.id).copied().unwrap_or(0);
            let interlock = boiler_outputs.interlock_export.get(&room.id).copied();
            let load_sharing = load_sharing_outputs.overrides.get(&room.id).copied();
            let correction = self.trvs.take_unexpected_position(&room.id);

            let final_pct = self
                .coordinator
                .apply(&room.id, desired, interlock, load_sharing, correction);

            if self.trvs.last_commanded(&room.id) != Some(final_pct) {
                self.trvs
                    .set_valve(&room.id, final_pct, now, correction.is_some(), boiler_outputs.pump_overrun_snapshot_active)
                    .await;
            }
        }

        if let Some((room, pct)) = &boiler_outputs.safety_override {
            self.alerts.observe(
                AlertKind::SafetyRoomEngaged,
                Some(room),
                Severity::Critical,
                "Safety room engaged to protect a hot idle boiler",
                now,
            );
            self.trvs.set_valve(room, *pct, now, true, false).await;
        } else {
            self.alerts.clear(AlertKind::SafetyRoomEngaged, None);
        }

        if let Some(on) = boiler_outputs.command_boiler_on {
            self.command_boiler(on).await;
        }

        self.status
            .publish(
                now,
                boiler_outputs.state,
                flame_on,
                matches!(cycling_outputs.state, crate::cycling::CyclingState::Cooldown),
                &candidates,
                &room_temps,
                &room_targets,
                self.coordinator.current_commands(),
                &passive_max_temps,
            )
            .await;
        self.write_telemetry(now, &boiler_outputs.state, flame_on, flow_temp, return_temp, &cycling_outputs.state, load_sharing_outputs.active);
        self.save_persisted_state(&cycling_outputs.state);

        self.first_tick = false;
    }

    fn raise_boiler_alert(&mut self, alert: crate::boiler::BoilerAlert, now: DateTime<Utc>) {
        use crate::boiler::BoilerAlert;
        let (kind, severity, message) = match alert {
            BoilerAlert::Desync => (AlertKind::StateDesync, Severity::Warning, "Boiler FSM desynced from entity state"),
            BoilerAlert::InterlockFailure => (AlertKind::InterlockFailure, Severity::Critical, "Interlock could not be satisfied"),
            BoilerAlert::ControlFailure => (AlertKind::BoilerControlFailure, Severity::Critical, "Boiler on/off service call failed"),
            BoilerAlert::SafetyRoomEngaged => return,
        };
        self.alerts.observe(kind, None, severity, message, now);
    }

    async fn command_boiler(&self, on: bool) {
        let mut kwargs = HashMap::new();
        kwargs.insert(
            "entity_id".to_string(),
            serde_json::Value::String(self.domain.boiler.entity_id.clone()),
        );
        let service = if on { "climate/turn_on" } else { "climate/turn_off" };
        self.bridge.call_service(service, kwargs).await;
    }

    async fn command_flow_setpoint(&self, setpoint_c: f32) {
        let mut kwargs = HashMap::new();
        kwargs.insert(
            "entity_id".to_string(),
            serde_json::Value::String(self.domain.boiler.entity_id.clone()),
        );
        kwargs.insert("temperature".to_string(), serde_json::Value::from(setpoint_c));
        self.bridge.call_service("climate/set_temperature", kwargs).await;
    }

    fn write_telemetry(
        &mut self,
        now: DateTime<Utc>,
        boiler_state: &crate::boiler::BoilerState,
        flame_on: bool,
        flow_temp: f32,
        return_temp: f32,
        cycling_state: &crate::cycling::CyclingState,
        load_sharing_active: bool,
    ) {
        let Some(writer) = self.telemetry.as_mut() else { return };
        let cycling_str = match cycling_state {
            crate::cycling::CyclingState::Normal => "NORMAL",
            crate::cycling::CyclingState::Cooldown => "COOLDOWN",
            crate::cycling::CyclingState::Timeout => "TIMEOUT",
        };
        let row = TelemetryRow {
            at: now,
            boiler_state: format!("{boiler_state:?}"),
            flame_on,
            room: "*".to_string(),
            room_mode: "*".to_string(),
            calling: !self.coordinator.current_commands().is_empty(),
            valve_percent: 0,
            flow_temp_c: flow_temp,
            return_temp_c: return_temp,
            cycling_state: cycling_str.to_string(),
            load_sharing_active,
            outside_temp_c: None,
        };
        if let Err(e) = writer.write_row(&row) {
            self.bridge.log_error(&format!("Failed to write telemetry row: {e}"));
        }
    }

    fn save_persisted_state(&self, cycling_state: &crate::cycling::CyclingState) {
        let mut room_state = HashMap::new();
        for room in &self.domain.rooms {
            room_state.insert(
                room.id.clone(),
                RoomState {
                    valve_percent: self.coordinator.current_commands().get(&room.id).copied().unwrap_or(0),
                    last_calling: false,
                    passive_valve: 0,
                },
            );
        }

        let persisted = PersistedState {
            room_state,
            cycling_protection: CyclingProtectionState {
                mode: *cycling_state,
                saved_setpoint: self.cycling.saved_setpoint(),
                cooldown_start: self.cycling.cooldown_start(),
                cooldowns_count: self.cycling.cooldowns_count() as u32,
            },
            setpoint_ramp: SetpointRampState {
                ramp_steps_applied: self.ramp.steps_applied(),
            },
            pump_overrun_snapshot: self
                .coordinator
                .pump_overrun_snapshot()
                .cloned()
                .unwrap_or_default(),
        };

        if let Err(e) = persistence::save(&self.daemon.persistence_file, &persisted) {
            self.bridge.log_error(&format!("Failed to persist state: {e}"));
        }
    }
}
