//! Boiler state machine (spec §4.5).
//!
//! Modelled per the "state-machine drawing" design note as a discriminated
//! enum plus a single `step(inputs) -> outputs` function: all I/O (reading
//! the bridge, issuing the on/off service call) is left to the caller, which
//! only has to act on `BoilerOutputs`.

use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::time::Duration as StdDuration;

use crate::config::boiler::BoilerConfig;
use crate::time_util::chrono_duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoilerState {
    Off,
    PendingOn,
    On,
    PendingOff,
    PumpOverrun,
    InterlockBlocked,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoilerAlert {
    Desync,
    InterlockFailure,
    ControlFailure,
    SafetyRoomEngaged,
}

#[derive(Clone, Debug, Default)]
struct Timer {
    started_at: Option<DateTime<Utc>>,
}

impl Timer {
    fn start(&mut self, now: DateTime<Utc>) {
        self.started_at = Some(now);
    }

    fn cancel(&mut self) {
        self.started_at = None;
    }

    fn is_active(&self) -> bool {
        self.started_at.is_some()
    }

    /// True once `duration` has passed since start, or trivially true if the
    /// timer was never started (nothing to wait for).
    fn elapsed_or_unset(&self, now: DateTime<Utc>, duration: StdDuration) -> bool {
        let duration = chrono_duration(duration);
        self.started_at
            .map_or(true, |t| now.signed_duration_since(t) >= duration)
    }

    /// True only once the timer was started *and* ran its full course.
    fn ran_out(&self, now: DateTime<Utc>, duration: StdDuration) -> bool {
        let duration = chrono_duration(duration);
        self.started_at
            .is_some_and(|t| now.signed_duration_since(t) >= duration)
    }
}

/// Per-tick inputs the caller gathers from room decisions, the TRV
/// controller, and the bridge (spec §4.5 "Inputs each tick").
pub struct BoilerInputs {
    pub has_demand: bool,
    pub calling_rooms: HashSet<String>,
    /// Band-computed desired percentage per room with a non-zero valve,
    /// before any coordinator persistence is applied.
    pub room_desired_percent: HashMap<String, u8>,
    pub trv_feedback_confirmed: bool,
    pub flame_on: bool,
    pub boiler_entity_heating: bool,
    pub is_startup: bool,
}

pub struct BoilerOutputs {
    pub state: BoilerState,
    /// `Some(true/false)` when the boiler on/off service call must be
    /// (re)issued this tick; `None` means leave the entity as-is.
    pub command_boiler_on: Option<bool>,
    pub interlock_export: HashMap<String, u8>,
    pub pump_overrun_snapshot_active: bool,
    pub safety_override: Option<(String, u8)>,
    pub alerts: Vec<BoilerAlert>,
}

pub struct BoilerFsm {
    state: BoilerState,
    min_on: Timer,
    min_off: Timer,
    off_delay: Timer,
    pump_overrun: Timer,
    pump_overrun_snapshot_active: bool,
    prev_flame_on: bool,
}

impl Default for BoilerFsm {
    fn default() -> Self {
        BoilerFsm {
            state: BoilerState::Off,
            min_on: Timer::default(),
            min_off: Timer::default(),
            off_delay: Timer::default(),
            pump_overrun: Timer::default(),
            pump_overrun_snapshot_active: false,
            prev_flame_on: false,
        }
    }
}

impl BoilerFsm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> BoilerState {
        self.state
    }

    pub fn pump_overrun_snapshot_active(&self) -> bool {
        self.pump_overrun_snapshot_active
    }

    /// spec §4.5: the full per-tick transition table, desync reconciliation
    /// included. Interlock redistribution is computed every tick regardless
    /// of state transitions, since the coordinator needs it as a standing
    /// persistence export.
    pub fn step(
        &mut self,
        inputs: &BoilerInputs,
        now: DateTime<Utc>,
        config: &BoilerConfig,
    ) -> BoilerOutputs {
        let mut alerts = Vec::new();
        let mut command_boiler_on = None;
        let mut skip_transitions = false;

        // Desync reconciliation, before anything else this tick.
        if self.state == BoilerState::On && !inputs.boiler_entity_heating {
            alerts.push(BoilerAlert::Desync);
            self.state = BoilerState::Off;
            self.min_on.cancel();
            self.off_delay.cancel();
        } else if matches!(
            self.state,
            BoilerState::Off | BoilerState::PendingOn | BoilerState::InterlockBlocked
        ) && inputs.boiler_entity_heating
        {
            // PENDING_OFF and PUMP_OVERRUN legitimately see the entity still
            // reporting heat for part of their lifetime, so only the states
            // that never expect it are treated as desynced.
            alerts.push(BoilerAlert::Desync);
            skip_transitions = true;
            if !inputs.is_startup {
                command_boiler_on = Some(false);
            }
        }

        // Flame-off hook: restart the overrun timer if it lapsed mid-PUMP_OVERRUN.
        if self.state == BoilerState::PumpOverrun
            && self.prev_flame_on
            && !inputs.flame_on
            && !self.pump_overrun.is_active()
        {
            self.pump_overrun.start(now);
        }

        let (interlock_ok, interlock_export) =
            self.compute_interlock(inputs, config.interlock.min_valve_open_percent);
        let min_off_elapsed = self.min_off.elapsed_or_unset(now, config.anti_cycling.min_off_time_s);

        if !skip_transitions {
        match self.state {
            BoilerState::Off => {
                if inputs.has_demand {
                    if interlock_ok && min_off_elapsed {
                        if inputs.trv_feedback_confirmed {
                            self.state = BoilerState::On;
                            self.min_on.start(now);
                            command_boiler_on = Some(true);
                        } else {
                            self.state = BoilerState::PendingOn;
                        }
                    } else {
                        self.state = BoilerState::InterlockBlocked;
                    }
                }
            }
            BoilerState::PendingOn => {
                if !inputs.has_demand {
                    self.state = BoilerState::Off;
                } else if !interlock_ok {
                    self.state = BoilerState::InterlockBlocked;
                } else if inputs.trv_feedback_confirmed {
                    self.state = BoilerState::On;
                    self.min_on.start(now);
                    command_boiler_on = Some(true);
                }
            }
            BoilerState::On => {
                if !interlock_ok {
                    alerts.push(BoilerAlert::InterlockFailure);
                    self.state = BoilerState::PumpOverrun;
                    command_boiler_on = Some(false);
                    self.min_off.start(now);
                    if inputs.flame_on {
                        self.pump_overrun.cancel();
                    } else {
                        self.pump_overrun.start(now);
                    }
                } else if !inputs.has_demand {
                    self.state = BoilerState::PendingOff;
                    self.off_delay.start(now);
                    self.pump_overrun_snapshot_active = true;
                }
            }
            BoilerState::PendingOff => {
                if inputs.has_demand && interlock_ok {
                    self.state = BoilerState::On;
                    self.off_delay.cancel();
                    self.pump_overrun_snapshot_active = false;
                } else {
                    let off_delay_elapsed =
                        self.off_delay.ran_out(now, config.anti_cycling.off_delay_s)
                            || !inputs.boiler_entity_heating;
                    let min_on_elapsed = self.min_on.elapsed_or_unset(now, config.anti_cycling.min_on_time_s)
                        || !inputs.boiler_entity_heating;
                    if off_delay_elapsed && min_on_elapsed {
                        self.state = BoilerState::PumpOverrun;
                        command_boiler_on = Some(false);
                        self.min_off.start(now);
                        if !inputs.flame_on {
                            self.pump_overrun.start(now);
                        }
                    }
                }
            }
            BoilerState::PumpOverrun => {
                if inputs.has_demand && interlock_ok && inputs.trv_feedback_confirmed && min_off_elapsed {
                    self.state = BoilerState::On;
                    self.pump_overrun.cancel();
                    self.min_on.start(now);
                    command_boiler_on = Some(true);
                    self.pump_overrun_snapshot_active = false;
                } else if self.pump_overrun.ran_out(now, config.pump_overrun_s) {
                    self.state = BoilerState::Off;
                    self.pump_overrun_snapshot_active = false;
                }
            }
            BoilerState::InterlockBlocked => {
                if !inputs.has_demand {
                    self.state = BoilerState::Off;
                } else if interlock_ok && min_off_elapsed {
                    self.state = BoilerState::On;
                    self.min_on.start(now);
                    command_boiler_on = Some(true);
                }
            }
        }
        }

        let safety_override = self.safety_override(config, inputs);
        if safety_override.is_some() {
            alerts.push(BoilerAlert::SafetyRoomEngaged);
        }

        self.prev_flame_on = inputs.flame_on;

        BoilerOutputs {
            state: self.state,
            command_boiler_on,
            interlock_export,
            pump_overrun_snapshot_active: self.pump_overrun_snapshot_active,
            safety_override,
            alerts,
        }
    }

    /// spec §4.5 "Interlock computation": redistribute the deficit evenly
    /// across calling rooms. Always reachable once at least one room is
    /// calling, since every room can in principle be pushed to 100%; the
    /// degenerate case below is a configured minimum that exceeds what even
    /// every calling room at 100% could supply.
    fn compute_interlock(
        &self,
        inputs: &BoilerInputs,
        min_valve_open_percent: u32,
    ) -> (bool, HashMap<String, u8>) {
        if !inputs.has_demand || inputs.calling_rooms.is_empty() {
            return (true, HashMap::new());
        }
        let total: u32 = inputs.room_desired_percent.values().map(|v| *v as u32).sum();
        if total >= min_valve_open_percent {
            return (true, HashMap::new());
        }
        let n_calling = inputs.calling_rooms.len() as u32;
        let per_room = min_valve_open_percent.div_ceil(n_calling).min(100);
        let export = inputs
            .calling_rooms
            .iter()
            .map(|room| (room.clone(), per_room as u8))
            .collect();
        let reachable = 100 * n_calling >= min_valve_open_percent;
        (reachable, export)
    }

    fn safety_override(
        &self,
        config: &BoilerConfig,
        inputs: &BoilerInputs,
    ) -> Option<(String, u8)> {
        let safety_room = config.safety_room.as_ref()?;
        if self.state == BoilerState::Off && inputs.boiler_entity_heating && !inputs.has_demand {
            Some((safety_room.clone(), 100))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::test_utils::utc_datetime;
    use std::time::Duration as StdDuration;

    fn config() -> BoilerConfig {
        let mut config = BoilerConfig {
            entity_id: "climate.boiler".into(),
            ..Default::default()
        };
        config.anti_cycling.min_on_time_s = StdDuration::from_secs(0);
        config.anti_cycling.min_off_time_s = StdDuration::from_secs(0);
        config.anti_cycling.off_delay_s = StdDuration::from_secs(0);
        config.interlock.min_valve_open_percent = 40;
        config
    }

    fn demand(rooms: &[(&str, u8)]) -> BoilerInputs {
        let mut calling = HashSet::new();
        let mut percent = HashMap::new();
        for (room, pct) in rooms {
            calling.insert(room.to_string());
            percent.insert(room.to_string(), *pct);
        }
        BoilerInputs {
            has_demand: !rooms.is_empty(),
            calling_rooms: calling,
            room_desired_percent: percent,
            trv_feedback_confirmed: true,
            flame_on: false,
            boiler_entity_heating: false,
            is_startup: false,
        }
    }

    #[test]
    fn interlock_redistribution_enables_transition() {
        let cfg = config();
        let mut fsm = BoilerFsm::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        let inputs = demand(&[("a", 10), ("b", 10)]);

        let outputs = fsm.step(&inputs, now, &cfg);
        assert_eq!(outputs.interlock_export.get("a"), Some(&20));
        assert_eq!(outputs.interlock_export.get("b"), Some(&20));
        assert_eq!(outputs.state, BoilerState::On);
        assert_eq!(outputs.command_boiler_on, Some(true));
    }

    #[test]
    fn off_to_pending_on_without_feedback() {
        let cfg = config();
        let mut fsm = BoilerFsm::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        let mut inputs = demand(&[("a", 50)]);
        inputs.trv_feedback_confirmed = false;

        let outputs = fsm.step(&inputs, now, &cfg);
        assert_eq!(outputs.state, BoilerState::PendingOn);
        assert_eq!(outputs.command_boiler_on, None);
    }

    #[test]
    fn on_to_pending_off_on_demand_cease_then_pump_overrun() {
        let cfg = config();
        let mut fsm = BoilerFsm::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        let inputs = demand(&[("a", 50)]);
        let step1 = fsm.step(&inputs, now, &cfg);
        assert_eq!(step1.state, BoilerState::On);

        let mut no_demand = demand(&[]);
        no_demand.boiler_entity_heating = true;
        no_demand.flame_on = true;
        let step2 = fsm.step(&no_demand, now, &cfg);
        assert_eq!(step2.state, BoilerState::PendingOff);
        assert!(step2.pump_overrun_snapshot_active);

        let step3 = fsm.step(&no_demand, now, &cfg);
        assert_eq!(step3.state, BoilerState::PumpOverrun);
        assert_eq!(step3.command_boiler_on, Some(false));
    }

    #[test]
    fn desync_forces_fsm_off_when_entity_goes_cold() {
        let cfg = config();
        let mut fsm = BoilerFsm::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        let inputs = demand(&[("a", 50)]);
        fsm.step(&inputs, now, &cfg);
        assert_eq!(fsm.state(), BoilerState::On);

        let mut entity_off = demand(&[("a", 50)]);
        entity_off.boiler_entity_heating = false;
        let outputs = fsm.step(&entity_off, now, &cfg);
        assert!(outputs.alerts.contains(&BoilerAlert::Desync));
    }

    #[test]
    fn safety_room_engages_when_boiler_hot_with_no_demand() {
        let mut cfg = config();
        cfg.safety_room = Some("hallway".to_string());
        let mut fsm = BoilerFsm::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        let mut inputs = demand(&[]);
        inputs.boiler_entity_heating = true;
        inputs.is_startup = true;

        let outputs = fsm.step(&inputs, now, &cfg);
        assert_eq!(outputs.safety_override, Some(("hallway".to_string(), 100)));
    }
}
