//! Valve coordinator (spec §4.9) and TRV controller (spec §4.10).
//!
//! Grounded on `io::robbable::Dispatchable` for the "one authority at a time,
//! newest command wins" idea (here: a new in-flight TRV command always
//! supersedes the previous one rather than racing it) and on
//! `io::controls::mod.rs` for the translate-intent-into-a-bridge-call shape.
//! The coordinator itself has no direct teacher analogue (the teacher talks
//! to GPIO pins directly); it is built from spec §4.9/§4.10/§9 to hold the
//! "coordinator's commanded-positions map is the single place where final
//! truth lives" invariant.

use crate::bridge::Bridge;
use crate::config::rooms::TrvSpec;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

/// Seconds after sending an opening-degree command before the feedback is
/// re-checked.
pub const TRV_COMMAND_RETRY_INTERVAL_S: u64 = 30;
/// Feedback within this many percentage points of the target counts as a match.
pub const TRV_COMMAND_FEEDBACK_TOLERANCE: u8 = 3;
/// Number of feedback-check retries before giving up and recording the
/// actual position as commanded.
pub const TRV_COMMAND_MAX_RETRIES: u32 = 3;
/// How often the climate setpoint lock is re-asserted even if nothing has
/// reported it drifting.
pub const TRV_SETPOINT_LOCK_RECHECK_S: u64 = 300;

/// Final per-room valve truth, built bottom-up from band/frost logic through
/// interlock, pump-overrun, load-sharing and correction overrides (spec
/// §4.9 priority order).
pub struct ValveCoordinator {
    current_commands: HashMap<String, u8>,
    pump_overrun_snapshot: Option<HashMap<String, u8>>,
}

impl Default for ValveCoordinator {
    fn default() -> Self {
        ValveCoordinator {
            current_commands: HashMap::new(),
            pump_overrun_snapshot: None,
        }
    }
}

impl ValveCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore from a persisted pump-overrun snapshot (spec §8 "preserved
    /// across a simulated process restart"). An empty map means no overrun
    /// was in progress at the last write.
    pub fn restore(snapshot: HashMap<String, u8>) -> Self {
        ValveCoordinator {
            current_commands: snapshot.clone(),
            pump_overrun_snapshot: if snapshot.is_empty() { None } else { Some(snapshot) },
        }
    }

    pub fn current_commands(&self) -> &HashMap<String, u8> {
        &self.current_commands
    }

    pub fn pump_overrun_snapshot(&self) -> Option<&HashMap<String, u8>> {
        self.pump_overrun_snapshot.as_ref()
    }

    pub fn is_pump_overrun_active(&self) -> bool {
        self.pump_overrun_snapshot.is_some()
    }

    /// Entering PENDING_OFF snapshots the current commands; this becomes the
    /// floor every room is held to until the overrun finishes.
    pub fn enable_pump_overrun(&mut self) {
        if self.pump_overrun_snapshot.is_none() {
            self.pump_overrun_snapshot = Some(self.current_commands.clone());
        }
    }

    pub fn disable_pump_overrun(&mut self) {
        self.pump_overrun_snapshot = None;
    }

    /// Apply one room's priority cascade and record the result as the new
    /// current command. `desired_pct` is the band/frost-computed value
    /// before any override is considered; pump-overrun comparisons use this
    /// raw value, matching the priority order (pump-overrun outranks
    /// load-sharing and correction, so those have not been folded in yet).
    pub fn apply(
        &mut self,
        room: &str,
        desired_pct: u8,
        interlock_override: Option<u8>,
        load_sharing_override: Option<u8>,
        correction_override: Option<u8>,
    ) -> u8 {
        let final_pct = if let Some(pct) = interlock_override {
            pct
        } else if let Some(snapshot) = self.pump_overrun_snapshot.as_mut() {
            let held = *snapshot.get(room).unwrap_or(&0);
            if desired_pct > held {
                snapshot.insert(room.to_string(), desired_pct);
                desired_pct
            } else {
                held
            }
        } else if let Some(pct) = load_sharing_override {
            pct
        } else if let Some(pct) = correction_override {
            pct
        } else {
            desired_pct
        };

        self.current_commands.insert(room.to_string(), final_pct);
        final_pct
    }
}

#[derive(Clone, Debug)]
struct InFlight {
    target_pct: u8,
    attempt: u32,
}

#[derive(Clone, Debug, Default)]
struct TrvRoomState {
    last_commanded: Option<u8>,
    last_update: Option<DateTime<Utc>>,
    in_flight: Option<InFlight>,
    /// Set by the unexpected-position watcher; cleared once the coordinator
    /// has been told about it and issued a correction.
    unexpected_position: Option<u8>,
}

/// Drives one TRV's opening-degree command and feedback reconciliation. One
/// controller instance is shared across all rooms; per-room state lives in
/// `state`.
pub struct TrvController {
    bridge: Arc<dyn Bridge>,
    specs: HashMap<String, TrvSpec>,
    min_interval_s: HashMap<String, u32>,
    state: Mutex<HashMap<String, TrvRoomState>>,
}

impl TrvController {
    pub fn new(bridge: Arc<dyn Bridge>) -> Self {
        TrvController {
            bridge,
            specs: HashMap::new(),
            min_interval_s: HashMap::new(),
            state: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_room(&mut self, room: &str, spec: TrvSpec, min_interval_s: u32) {
        self.specs.insert(room.to_string(), spec);
        self.min_interval_s.insert(room.to_string(), min_interval_s);
    }

    /// Lock the TRV's own climate setpoint so it never does its own
    /// thermostating (spec §4.10 "setpoint lock"). Call at startup and
    /// periodically thereafter (`TRV_SETPOINT_LOCK_RECHECK_S`).
    pub async fn assert_setpoint_lock(&self, room: &str) {
        let Some(spec) = self.specs.get(room) else { return };
        let mut kwargs = HashMap::new();
        kwargs.insert(
            "entity_id".to_string(),
            serde_json::Value::String(spec.command_entity.clone()),
        );
        kwargs.insert(
            "temperature".to_string(),
            serde_json::Value::from(spec.locked_setpoint),
        );
        self.bridge
            .call_service("climate/set_temperature", kwargs)
            .await;
    }

    /// `set_valve` (spec §4.10): rate-limited unless `is_correction`, no-op
    /// if the target already matches the last commanded value.
    pub async fn set_valve(
        &self,
        room: &str,
        pct: u8,
        now: DateTime<Utc>,
        is_correction: bool,
        persistence_active: bool,
    ) {
        let Some(spec) = self.specs.get(room).cloned() else { return };
        let min_interval = *self.min_interval_s.get(room).unwrap_or(&30) as i64;

        {
            let mut state = self.state.lock().unwrap();
            let entry = state.entry(room.to_string()).or_default();

            if !is_correction {
                if entry.last_commanded == Some(pct) {
                    return;
                }
                if let Some(last_update) = entry.last_update {
                    if now.signed_duration_since(last_update) < chrono::Duration::seconds(min_interval) {
                        return;
                    }
                }
            } else {
                self.bridge.log_info(&format!(
                    "TRV correction for {room}: expected {:?}, commanding {pct}",
                    entry.last_commanded
                ));
            }

            // A new command always supersedes whatever was in flight.
            entry.in_flight = Some(InFlight { target_pct: pct, attempt: 0 });
            entry.last_update = Some(now);
        }

        self.send_opening_degree(room, &spec, pct).await;
        self.check_feedback(room, now, persistence_active).await;
    }

    async fn send_opening_degree(&self, room: &str, spec: &TrvSpec, pct: u8) {
        let mut kwargs = HashMap::new();
        kwargs.insert(
            "entity_id".to_string(),
            serde_json::Value::String(spec.command_entity.clone()),
        );
        kwargs.insert("opening_degree".to_string(), serde_json::Value::from(pct));
        self.bridge.call_service("trv/set_opening_degree", kwargs).await;
        self.bridge.log_info(&format!("Commanded {room} TRV to {pct}%"));
    }

    /// Feedback check scheduled `TRV_COMMAND_RETRY_INTERVAL_S` after a
    /// command: success clears the in-flight record, mismatch retries up to
    /// `TRV_COMMAND_MAX_RETRIES` then gives up and records the actual
    /// position as commanded, raising a TRV alert via the caller.
    pub async fn check_feedback(&self, room: &str, now: DateTime<Utc>, persistence_active: bool) -> FeedbackOutcome {
        let Some(spec) = self.specs.get(room).cloned() else { return FeedbackOutcome::NoCommandInFlight };
        let feedback = self
            .bridge
            .get_state(&spec.feedback_entity)
            .await
            .and_then(|s| s.parse::<f32>().ok())
            .map(|f| f.round() as i32);

        let mut state = self.state.lock().unwrap();
        let entry = state.entry(room.to_string()).or_default();

        let Some(in_flight) = entry.in_flight.clone() else {
            drop(state);
            return self.watch_unexpected(room, feedback, persistence_active);
        };

        let Some(feedback_pct) = feedback else {
            return FeedbackOutcome::FeedbackUnavailable;
        };

        let within_tolerance =
            (feedback_pct - in_flight.target_pct as i32).unsigned_abs() as u8 <= TRV_COMMAND_FEEDBACK_TOLERANCE;

        if within_tolerance {
            entry.last_commanded = Some(in_flight.target_pct);
            entry.last_update = Some(now);
            entry.in_flight = None;
            FeedbackOutcome::Confirmed
        } else if in_flight.attempt + 1 < TRV_COMMAND_MAX_RETRIES {
            entry.in_flight = Some(InFlight {
                target_pct: in_flight.target_pct,
                attempt: in_flight.attempt + 1,
            });
            FeedbackOutcome::Retrying
        } else {
            let actual = feedback_pct.clamp(0, 100) as u8;
            entry.last_commanded = Some(actual);
            entry.last_update = Some(now);
            entry.in_flight = None;
            FeedbackOutcome::MismatchExhausted { actual }
        }
    }

    /// Unexpected-position watcher (spec §4.10): no command in flight, no
    /// pump-overrun in progress, feedback drifted from last commanded.
    fn watch_unexpected(&self, room: &str, feedback: Option<i32>, persistence_active: bool) -> FeedbackOutcome {
        if persistence_active {
            return FeedbackOutcome::Ignored;
        }
        let mut state = self.state.lock().unwrap();
        let entry = state.entry(room.to_string()).or_default();
        if entry.in_flight.is_some() {
            return FeedbackOutcome::Ignored;
        }
        let (Some(feedback_pct), Some(last)) = (feedback, entry.last_commanded) else {
            return FeedbackOutcome::Ignored;
        };
        if (feedback_pct - last as i32).unsigned_abs() as u8 > TRV_COMMAND_FEEDBACK_TOLERANCE {
            let actual = feedback_pct.clamp(0, 100) as u8;
            entry.unexpected_position = Some(actual);
            FeedbackOutcome::UnexpectedPosition { actual }
        } else {
            FeedbackOutcome::Ignored
        }
    }

    /// Drains (and clears) the unexpected-position record the coordinator
    /// should use to drive a correction override on the next tick.
    pub fn take_unexpected_position(&self, room: &str) -> Option<u8> {
        self.state.lock().unwrap().get_mut(room).and_then(|s| s.unexpected_position.take())
    }

    pub fn last_commanded(&self, room: &str) -> Option<u8> {
        self.state.lock().unwrap().get(room).and_then(|s| s.last_commanded)
    }

    /// Per-room feedback consistency used by the boiler FSM's
    /// `trv_feedback_ok` input (spec §4.5/I4): true once the room has no
    /// command still awaiting feedback confirmation. A room with no entry
    /// yet (no command ever sent) counts as confirmed — there is nothing to
    /// disconfirm, which is the startup grace spec §4.5 calls for.
    pub fn room_feedback_confirmed(&self, room: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .get(room)
            .map(|s| s.in_flight.is_none())
            .unwrap_or(true)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FeedbackOutcome {
    Confirmed,
    Retrying,
    MismatchExhausted { actual: u8 },
    UnexpectedPosition { actual: u8 },
    FeedbackUnavailable,
    NoCommandInFlight,
    Ignored,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interlock_override_wins_over_everything() {
        let mut coord = ValveCoordinator::new();
        let result = coord.apply("lounge", 10, Some(40), Some(20), Some(5));
        assert_eq!(result, 40);
        assert_eq!(coord.current_commands()["lounge"], 40);
    }

    #[test]
    fn pump_overrun_holds_snapshot_until_desired_exceeds_it() {
        let mut coord = ValveCoordinator::new();
        coord.apply("a", 20, None, None, None);
        coord.apply("b", 20, None, None, None);
        coord.enable_pump_overrun();

        // Band logic now says 0 for "a"; snapshot still wins.
        let a = coord.apply("a", 0, None, None, None);
        assert_eq!(a, 20);

        // Band logic says 60 for "b"; desired exceeds the snapshot, so it
        // wins and the snapshot is bumped.
        let b = coord.apply("b", 60, None, None, None);
        assert_eq!(b, 60);
        assert_eq!(coord.pump_overrun_snapshot().unwrap()["b"], 60);
    }

    #[test]
    fn load_sharing_override_applies_when_no_overrun_or_interlock() {
        let mut coord = ValveCoordinator::new();
        let result = coord.apply("kitchen", 0, None, Some(50), None);
        assert_eq!(result, 50);
    }

    #[test]
    fn correction_override_only_applies_below_load_sharing() {
        let mut coord = ValveCoordinator::new();
        let result = coord.apply("study", 0, None, None, Some(35));
        assert_eq!(result, 35);
    }

    #[test]
    fn restore_reconstructs_snapshot_from_persistence() {
        let mut snapshot = HashMap::new();
        snapshot.insert("lounge".to_string(), 45u8);
        let coord = ValveCoordinator::restore(snapshot);
        assert!(coord.is_pump_overrun_active());
        assert_eq!(coord.current_commands()["lounge"], 45);
    }

    #[tokio::test]
    async fn set_valve_rate_limits_normal_commands() {
        use crate::bridge::dummy::DummyBridge;
        use crate::time_util::test_utils::utc_datetime;

        let bridge = Arc::new(DummyBridge::new());
        let mut controller = TrvController::new(bridge.clone());
        controller.register_room(
            "lounge",
            TrvSpec {
                command_entity: "climate.trv_lounge".to_string(),
                feedback_entity: "sensor.trv_lounge_feedback".to_string(),
                locked_setpoint: 35.0,
            },
            60,
        );

        let t0 = utc_datetime(2024, 1, 1, 10, 0, 0);
        controller.set_valve("lounge", 40, t0, false, false).await;
        controller.set_valve("lounge", 60, t0, false, false).await;

        assert_eq!(bridge.service_calls().len(), 1);
    }

    #[tokio::test]
    async fn correction_bypasses_rate_limit() {
        use crate::bridge::dummy::DummyBridge;
        use crate::time_util::test_utils::utc_datetime;

        let bridge = Arc::new(DummyBridge::new());
        let mut controller = TrvController::new(bridge.clone());
        controller.register_room(
            "lounge",
            TrvSpec {
                command_entity: "climate.trv_lounge".to_string(),
                feedback_entity: "sensor.trv_lounge_feedback".to_string(),
                locked_setpoint: 35.0,
            },
            60,
        );

        let t0 = utc_datetime(2024, 1, 1, 10, 0, 0);
        controller.set_valve("lounge", 40, t0, false, false).await;
        controller.set_valve("lounge", 60, t0, true, false).await;

        assert_eq!(bridge.service_calls().len(), 2);
    }

    #[tokio::test]
    async fn feedback_within_tolerance_confirms_command() {
        use crate::bridge::dummy::DummyBridge;
        use crate::time_util::test_utils::utc_datetime;

        let bridge = Arc::new(DummyBridge::new());
        bridge.seed("sensor.trv_lounge_feedback", "41");
        let mut controller = TrvController::new(bridge.clone());
        controller.register_room(
            "lounge",
            TrvSpec {
                command_entity: "climate.trv_lounge".to_string(),
                feedback_entity: "sensor.trv_lounge_feedback".to_string(),
                locked_setpoint: 35.0,
            },
            60,
        );

        let t0 = utc_datetime(2024, 1, 1, 10, 0, 0);
        controller.set_valve("lounge", 40, t0, false, false).await;

        assert_eq!(controller.last_commanded("lounge"), Some(40));
    }
}
