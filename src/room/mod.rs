//! Per-room call-for-heat and valve-percent law (spec §4.4).
//!
//! `RoomDecision` is a sum type rather than a struct of optional fields, per
//! the "polymorphism over variants" design note - callers dispatch on the
//! variant instead of checking which fields happen to be populated.

use crate::config::rooms::RoomConfig;
use crate::overrides::OverrideStore;
use crate::schedule::{RoomMode, ScheduleStore};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Target-changed bypass threshold; smaller than any meaningful schedule or
/// override step, large enough to absorb float round-trip noise.
const TARGET_CHANGE_EPSILON: f32 = 1e-3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RoomDecision {
    Active {
        calling: bool,
        target: f32,
        /// `None` means "do not command the valve this tick" (spec §4.4 step
        /// 4): the coordinator's own persistence rules decide what happens.
        desired_valve_percent: Option<u8>,
    },
    Passive {
        target: f32,
        desired_valve_percent: u8,
    },
    FrostProtection {
        target: f32,
    },
    Off,
}

impl RoomDecision {
    pub fn is_calling(&self) -> bool {
        matches!(
            self,
            RoomDecision::Active { calling: true, .. } | RoomDecision::FrostProtection { .. }
        )
    }

    pub fn desired_valve_percent(&self) -> Option<u8> {
        match self {
            RoomDecision::Active {
                desired_valve_percent,
                ..
            } => *desired_valve_percent,
            RoomDecision::Passive {
                desired_valve_percent,
                ..
            } => Some(*desired_valve_percent),
            RoomDecision::FrostProtection { .. } => Some(100),
            RoomDecision::Off => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrostEvent {
    None,
    Entered,
    Cleared,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RoomComputeResult {
    pub decision: RoomDecision,
    pub frost_event: FrostEvent,
}

#[derive(Clone, Debug)]
struct RoomRuntime {
    current_band: u8,
    last_commanded_valve: u8,
    last_target: Option<f32>,
    frost_active: bool,
    frost_alerted: bool,
    passive_open: bool,
}

impl Default for RoomRuntime {
    fn default() -> Self {
        RoomRuntime {
            current_band: 0,
            last_commanded_valve: 0,
            last_target: None,
            frost_active: false,
            frost_alerted: false,
            passive_open: false,
        }
    }
}

/// Owns per-room dynamic state (spec §3 "Room controller").
#[derive(Default)]
pub struct RoomController {
    rooms: HashMap<String, RoomRuntime>,
}

impl RoomController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds runtime state from the persisted blob (spec §6 "Persisted state").
    pub fn restore(&mut self, room_id: &str, valve_percent: u8) {
        let runtime = self.rooms.entry(room_id.to_string()).or_default();
        runtime.last_commanded_valve = valve_percent;
    }

    pub fn last_commanded_valve(&self, room_id: &str) -> u8 {
        self.rooms.get(room_id).map(|r| r.last_commanded_valve).unwrap_or(0)
    }

    /// spec §4.4: the full room decision ladder.
    pub fn compute(
        &mut self,
        room: &RoomConfig,
        now: DateTime<Utc>,
        schedule: &ScheduleStore,
        overrides: &OverrideStore,
        temp: Option<f32>,
        is_stale: bool,
        frost_protection_temp_c: f32,
        master_enabled: bool,
    ) -> RoomComputeResult {
        let mode = schedule.mode(&room.id);

        if master_enabled && mode != RoomMode::Off {
            if let Some(event) = self.evaluate_frost(room, temp, is_stale, frost_protection_temp_c) {
                match event {
                    FrostDecision::Active(decision, frost_event) => {
                        return RoomComputeResult { decision, frost_event }
                    }
                    FrostDecision::JustCleared => {
                        let decision = self.resolve_non_frost(
                            room,
                            now,
                            schedule,
                            overrides,
                            mode,
                            temp,
                            is_stale,
                            frost_protection_temp_c,
                        );
                        return RoomComputeResult {
                            decision,
                            frost_event: FrostEvent::Cleared,
                        };
                    }
                }
            }
        }

        let decision = self.resolve_non_frost(
            room,
            now,
            schedule,
            overrides,
            mode,
            temp,
            is_stale,
            frost_protection_temp_c,
        );
        RoomComputeResult {
            decision,
            frost_event: FrostEvent::None,
        }
    }

    fn evaluate_frost(
        &mut self,
        room: &RoomConfig,
        temp: Option<f32>,
        is_stale: bool,
        frost_protection_temp_c: f32,
    ) -> Option<FrostDecision> {
        let (t, _) = match (temp, is_stale) {
            (Some(t), false) => (t, false),
            _ => return None,
        };
        let runtime = self.rooms.entry(room.id.clone()).or_default();
        let on_delta = room.hysteresis.on_delta_c;
        let off_delta = room.hysteresis.off_delta_c;

        if !runtime.frost_active && t < frost_protection_temp_c - on_delta {
            runtime.frost_active = true;
            runtime.frost_alerted = true;
            runtime.last_commanded_valve = 100;
            runtime.last_target = Some(frost_protection_temp_c);
            return Some(FrostDecision::Active(
                RoomDecision::FrostProtection {
                    target: frost_protection_temp_c,
                },
                FrostEvent::Entered,
            ));
        }

        if runtime.frost_active && t > frost_protection_temp_c + off_delta {
            runtime.frost_active = false;
            let was_alerted = runtime.frost_alerted;
            runtime.frost_alerted = false;
            if was_alerted {
                return Some(FrostDecision::JustCleared);
            }
            return None;
        }

        if runtime.frost_active {
            runtime.last_commanded_valve = 100;
            runtime.last_target = Some(frost_protection_temp_c);
            return Some(FrostDecision::Active(
                RoomDecision::FrostProtection {
                    target: frost_protection_temp_c,
                },
                FrostEvent::None,
            ));
        }

        None
    }

    #[allow(clippy::too_many_arguments)]
    fn resolve_non_frost(
        &mut self,
        room: &RoomConfig,
        now: DateTime<Utc>,
        schedule: &ScheduleStore,
        overrides: &OverrideStore,
        mode: RoomMode,
        temp: Option<f32>,
        is_stale: bool,
        frost_protection_temp_c: f32,
    ) -> RoomDecision {
        let resolved = schedule.resolve_target(&room.id, now, overrides, frost_protection_temp_c);

        // 4. Unresolved target, unknown temp outside manual mode, or mode=off:
        // report inactive without issuing a valve command.
        let unresolved = resolved.is_none();
        let temp_unknown_blocks = temp.is_none() && mode != RoomMode::Manual;
        let _ = is_stale;
        if unresolved || temp_unknown_blocks || mode == RoomMode::Off {
            return RoomDecision::Off;
        }
        let resolved = resolved.unwrap();

        if resolved.operating_mode == crate::config::schedule::OperatingMode::Passive {
            return self.resolve_passive(room, resolved, temp);
        }

        self.resolve_active(room, resolved, temp, frost_protection_temp_c)
    }

    fn resolve_passive(
        &mut self,
        room: &RoomConfig,
        resolved: crate::schedule::Resolved,
        temp: Option<f32>,
    ) -> RoomDecision {
        let runtime = self.rooms.entry(room.id.clone()).or_default();
        let max_temp = resolved.target;
        let valve_pct = resolved.valve_percent.unwrap_or(0);
        let on_delta = room.hysteresis.on_delta_c;
        let off_delta = room.hysteresis.off_delta_c;

        let Some(t) = temp else {
            return RoomDecision::Passive {
                target: max_temp,
                desired_valve_percent: if runtime.passive_open { valve_pct } else { 0 },
            };
        };

        let error = max_temp - t;
        if error > on_delta {
            runtime.passive_open = true;
        } else if error < -off_delta {
            runtime.passive_open = false;
        }
        // else: hold last state.

        let desired = if runtime.passive_open { valve_pct } else { 0 };
        runtime.last_commanded_valve = desired;
        runtime.last_target = Some(max_temp);

        RoomDecision::Passive {
            target: max_temp,
            desired_valve_percent: desired,
        }
    }

    fn resolve_active(
        &mut self,
        room: &RoomConfig,
        resolved: crate::schedule::Resolved,
        temp: Option<f32>,
        frost_protection_temp_c: f32,
    ) -> RoomDecision {
        let runtime = self.rooms.entry(room.id.clone()).or_default();
        // I6: a commanded target never falls below the frost threshold.
        let target = resolved.target.max(frost_protection_temp_c);
        let on_delta = room.hysteresis.on_delta_c;
        let off_delta = room.hysteresis.off_delta_c;

        let Some(t) = temp else {
            // Manual mode with no temperature reading: retain the prior
            // calling decision so the TRV doesn't chatter, but issue no fresh
            // command.
            return RoomDecision::Active {
                calling: runtime.last_commanded_valve > 0,
                target,
                desired_valve_percent: None,
            };
        };

        let error = target - t;
        let target_changed = match runtime.last_target {
            Some(prev) => (target - prev).abs() > TARGET_CHANGE_EPSILON,
            None => true,
        };
        let prev_calling = runtime.last_commanded_valve > 0;

        let calling = if target_changed {
            error >= -off_delta
        } else if error > on_delta {
            true
        } else if error < -off_delta {
            false
        } else {
            prev_calling
        };

        let (band_0, band_1, band_2, band_max) = room.valve_bands.resolved_percentages();
        let new_band = step_band(
            runtime.current_band,
            error,
            room.valve_bands.band_1_error,
            room.valve_bands.band_2_error,
            room.valve_bands.step_hysteresis_c,
        );
        runtime.current_band = new_band;

        let mut percent = match new_band {
            0 => band_0,
            1 => band_1,
            _ => band_2,
        };

        // 8. I1 enforcement: calling rooms must never be commanded to 0%.
        if calling && percent == 0 {
            percent = [band_0, band_1, band_2, band_max]
                .into_iter()
                .find(|p| *p > 0)
                .unwrap_or(band_max.max(1));
        }

        runtime.last_target = Some(target);
        runtime.last_commanded_valve = percent;

        RoomDecision::Active {
            calling,
            target,
            desired_valve_percent: Some(percent),
        }
    }
}

enum FrostDecision {
    Active(RoomDecision, FrostEvent),
    JustCleared,
}

/// Stepped band selection with per-threshold hysteresis (spec §4.4 step 7).
/// Upward moves take effect as soon as `error` crosses a threshold; downward
/// moves release one band at a time, each gated by `threshold - step`.
fn step_band(current: u8, error: f32, t1: Option<f32>, t2: Option<f32>, step: f32) -> u8 {
    let upward_target = match (t1, t2) {
        (_, Some(t2)) if error >= t2 => 2,
        (Some(t1), _) if error >= t1 => 1,
        _ => 0,
    };

    if upward_target >= current {
        return upward_target;
    }

    let threshold_for_current = match current {
        2 => t2,
        1 => t1,
        _ => None,
    };
    match threshold_for_current {
        Some(threshold) if error < threshold - step => current - 1,
        Some(_) => current,
        None => upward_target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rooms::{HysteresisConfig, RoomConfig, ValveBandConfig};
    use crate::schedule::ScheduleStore;
    use crate::time_util::test_utils::utc_datetime;
    use std::collections::HashMap;

    fn room() -> RoomConfig {
        RoomConfig {
            id: "lounge".into(),
            hysteresis: HysteresisConfig {
                on_delta_c: 0.3,
                off_delta_c: 0.1,
            },
            valve_bands: ValveBandConfig {
                band_1_error: Some(0.0),
                band_1_percent: Some(30),
                band_2_error: Some(0.5),
                band_2_percent: Some(70),
                band_max_percent: Some(100),
                band_0_percent: Some(0),
                step_hysteresis_c: 0.1,
            },
            ..Default::default()
        }
    }

    #[test]
    fn starts_heating_on_target_change() {
        let mut store = ScheduleStore::new(HashMap::new());
        store.set_mode("lounge", RoomMode::Manual, Some(18.4));
        let overrides = OverrideStore::new();
        let mut controller = RoomController::new();
        let r = room();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);

        // Seed last_target to 18.0 by running once with the old target.
        store.set_mode("lounge", RoomMode::Manual, Some(18.0));
        controller.compute(&r, now, &store, &overrides, Some(18.2), false, 7.0, true);

        store.set_mode("lounge", RoomMode::Manual, Some(18.4));
        let result = controller.compute(&r, now, &store, &overrides, Some(18.2), false, 7.0, true);
        match result.decision {
            RoomDecision::Active { calling, .. } => assert!(calling),
            other => panic!("expected Active, got {other:?}"),
        }
    }

    #[test]
    fn stops_heating_on_overshoot() {
        let mut store = ScheduleStore::new(HashMap::new());
        store.set_mode("lounge", RoomMode::Manual, Some(18.4));
        let overrides = OverrideStore::new();
        let mut controller = RoomController::new();
        let r = room();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);

        // First tick establishes calling=true with target already settled.
        controller.compute(&r, now, &store, &overrides, Some(18.0), false, 7.0, true);
        let result = controller.compute(&r, now, &store, &overrides, Some(18.6), false, 7.0, true);
        match result.decision {
            RoomDecision::Active { calling, .. } => assert!(!calling),
            other => panic!("expected Active, got {other:?}"),
        }
    }

    #[test]
    fn frost_override_enters_and_exits() {
        let store = ScheduleStore::new(HashMap::new());
        let overrides = OverrideStore::new();
        let mut controller = RoomController::new();
        let r = room();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);

        let entered = controller.compute(&r, now, &store, &overrides, Some(6.5), false, 7.0, true);
        assert_eq!(entered.frost_event, FrostEvent::Entered);
        match entered.decision {
            RoomDecision::FrostProtection { target } => assert_eq!(target, 7.0),
            other => panic!("expected FrostProtection, got {other:?}"),
        }

        let holding = controller.compute(&r, now, &store, &overrides, Some(6.9), false, 7.0, true);
        assert!(matches!(holding.decision, RoomDecision::FrostProtection { .. }));

        let cleared = controller.compute(&r, now, &store, &overrides, Some(7.2), false, 7.0, true);
        assert_eq!(cleared.frost_event, FrostEvent::Cleared);
    }

    #[test]
    fn i1_forces_nonzero_valve_when_calling() {
        let mut store = ScheduleStore::new(HashMap::new());
        store.set_mode("lounge", RoomMode::Manual, Some(18.0));
        let overrides = OverrideStore::new();
        let mut controller = RoomController::new();
        let mut r = room();
        r.valve_bands.band_0_percent = Some(0);
        r.valve_bands.band_1_error = Some(10.0); // unreachable threshold
        r.valve_bands.band_2_error = Some(20.0);
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);

        // Force calling by a target change bypass with error above -off_delta.
        let result = controller.compute(&r, now, &store, &overrides, Some(17.9), false, 7.0, true);
        if let RoomDecision::Active { calling, desired_valve_percent, .. } = result.decision {
            assert!(calling);
            assert!(desired_valve_percent.unwrap() > 0);
        } else {
            panic!("expected Active decision");
        }
    }

    #[test]
    fn passive_branch_never_calls_for_heat() {
        let mut store = ScheduleStore::new(HashMap::new());
        store.set_mode("lounge", RoomMode::Passive, None);
        store.set_passive_settings(
            "lounge",
            crate::schedule::PassiveSettings {
                max_temp: 21.0,
                valve_pct: 40,
                min_temp: 15.0,
            },
        );
        let overrides = OverrideStore::new();
        let mut controller = RoomController::new();
        let r = room();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);

        let result = controller.compute(&r, now, &store, &overrides, Some(19.0), false, 7.0, true);
        match result.decision {
            RoomDecision::Passive { desired_valve_percent, .. } => assert_eq!(desired_valve_percent, 40),
            other => panic!("expected Passive, got {other:?}"),
        }
    }
}
