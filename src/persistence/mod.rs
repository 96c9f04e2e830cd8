//! Persisted state (spec §3 "Lifecycles", §6 "Persisted state", §9 "Persistence
//! is a pure map"): a single JSON blob, read on startup, written atomically
//! by the core after every recompute. Grounded on the atomic-write idiom of
//! `io/temperatures/file.rs` / `io/wiser/filehub.rs` (write to a sibling
//! temp file, then rename).

use crate::cycling::CyclingState;
use crate::ramp::RampState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io;
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct RoomState {
    pub valve_percent: u8,
    pub last_calling: bool,
    pub passive_valve: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CyclingProtectionState {
    pub mode: CyclingState,
    pub saved_setpoint: Option<f32>,
    pub cooldown_start: Option<DateTime<Utc>>,
    pub cooldowns_count: u32,
}

impl Default for CyclingProtectionState {
    fn default() -> Self {
        CyclingProtectionState {
            mode: CyclingState::Normal,
            saved_setpoint: None,
            cooldown_start: None,
            cooldowns_count: 0,
        }
    }
}

/// The ramp itself keeps no persisted state (spec §4.7 "inferred from the
/// physical boiler setpoint on restart"); only the step counter, useful for
/// diagnostics, survives a restart.
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct SetpointRampState {
    pub ramp_steps_applied: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct PersistedState {
    #[serde(default)]
    pub room_state: HashMap<String, RoomState>,
    #[serde(default)]
    pub cycling_protection: CyclingProtectionState,
    #[serde(default)]
    pub setpoint_ramp: SetpointRampState,
    /// Pump-overrun valve snapshot (spec §8 "preserved across a simulated
    /// process restart"), keyed by room id.
    #[serde(default)]
    pub pump_overrun_snapshot: HashMap<String, u8>,
}

impl serde::Serialize for CyclingState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            CyclingState::Normal => "NORMAL",
            CyclingState::Cooldown => "COOLDOWN",
            CyclingState::Timeout => "TIMEOUT",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> serde::Deserialize<'de> for CyclingState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "COOLDOWN" => Ok(CyclingState::Cooldown),
            "TIMEOUT" => Ok(CyclingState::Timeout),
            _ => Ok(CyclingState::Normal),
        }
    }
}

impl serde::Serialize for RampState {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            RampState::Inactive => "INACTIVE",
            RampState::Ramping => "RAMPING",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> serde::Deserialize<'de> for RampState {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "RAMPING" => Ok(RampState::Ramping),
            _ => Ok(RampState::Inactive),
        }
    }
}

/// Readers tolerate a missing/empty/corrupt file by falling back to
/// `Default` (spec §5 "Shared resource policy").
pub fn load(path: impl AsRef<Path>) -> PersistedState {
    match std::fs::read_to_string(path.as_ref()) {
        Ok(raw) if !raw.trim().is_empty() => serde_json::from_str(&raw).unwrap_or_else(|e| {
            log::warn!(target: "persistence", "Corrupt state file {:?}: {e}, using defaults", path.as_ref());
            PersistedState::default()
        }),
        _ => PersistedState::default(),
    }
}

/// Atomic write: serialise to a sibling temp file, then rename over the
/// real path, so a crash mid-write never leaves a half-written blob.
pub fn save(path: impl AsRef<Path>, state: &PersistedState) -> io::Result<()> {
    let path = path.as_ref();
    let tmp_path = path.with_extension("json.tmp");
    let serialised = serde_json::to_string_pretty(state)?;
    std::fs::write(&tmp_path, serialised)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_default() {
        let state = load("/nonexistent/path/heating_state.json");
        assert!(state.room_state.is_empty());
        assert_eq!(state.cycling_protection.mode, CyclingState::Normal);
    }

    #[test]
    fn round_trips_through_atomic_write() {
        let dir = std::env::temp_dir().join("heating_core_test_persistence");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("state.json");

        let mut state = PersistedState::default();
        state.room_state.insert(
            "lounge".to_string(),
            RoomState {
                valve_percent: 40,
                last_calling: true,
                passive_valve: 0,
            },
        );
        save(&path, &state).unwrap();

        let loaded = load(&path);
        assert_eq!(loaded.room_state.get("lounge").unwrap().valve_percent, 40);

        std::fs::remove_dir_all(&dir).ok();
    }
}
