//! Temporary override store (spec §4.3).
//!
//! Timer liveness itself is delegated to the bridge (spec §3 "Timer entities
//! live in the external bridge"); this store only holds the override's
//! parameters and the deadline it was told about, mirroring the pattern in
//! `brain/boost_active_rooms/mod.rs` where `AppliedBoosts` tracks what *we*
//! applied without owning the timer that expires it.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActiveOverride {
    pub target: f32,
    pub deadline: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassiveOverride {
    pub min: f32,
    pub max: f32,
    pub valve_pct: u8,
    pub deadline: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OverrideMode {
    None,
    Active,
    Passive,
}

#[derive(Debug, Default)]
struct RoomOverrides {
    active: Option<ActiveOverride>,
    passive: Option<PassiveOverride>,
}

#[derive(Debug, Default)]
pub struct OverrideStore {
    rooms: HashMap<String, RoomOverrides>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum OverrideError {
    TargetOutOfRange,
    PassiveRangeInvalid,
    DurationNotPositive,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// spec §4.3: target clamped to [10,35], duration > 0.
    pub fn set_active(
        &mut self,
        room: &str,
        target: f32,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), OverrideError> {
        if deadline <= now {
            return Err(OverrideError::DurationNotPositive);
        }
        let clamped = target.clamp(10.0, 35.0);
        let entry = self.rooms.entry(room.to_string()).or_default();
        entry.active = Some(ActiveOverride {
            target: clamped,
            deadline,
        });
        Ok(())
    }

    /// spec §4.3/§6: `min <= max - 0.5`, `min in [8,20]`, `max in [10,30]`,
    /// `valve in [0,100]`. Shared with `set_passive_settings` (spec §6
    /// "validated atomically") since both set the same {min, max, valve_pct}
    /// passive triplet.
    pub fn validate_passive_range(min: f32, max: f32) -> Result<(), OverrideError> {
        if !(8.0..=20.0).contains(&min) || !(10.0..=30.0).contains(&max) || min > max - 0.5 {
            return Err(OverrideError::PassiveRangeInvalid);
        }
        Ok(())
    }

    pub fn set_passive(
        &mut self,
        room: &str,
        min: f32,
        max: f32,
        valve_pct: u8,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), OverrideError> {
        if deadline <= now {
            return Err(OverrideError::DurationNotPositive);
        }
        Self::validate_passive_range(min, max)?;
        let entry = self.rooms.entry(room.to_string()).or_default();
        entry.passive = Some(PassiveOverride {
            min,
            max,
            valve_pct: valve_pct.min(100),
            deadline,
        });
        Ok(())
    }

    pub fn cancel(&mut self, room: &str) {
        self.rooms.remove(room);
    }

    /// Called by the bridge's timer-expiry callback.
    pub fn expire_active(&mut self, room: &str) {
        if let Some(entry) = self.rooms.get_mut(room) {
            entry.active = None;
        }
    }

    pub fn expire_passive(&mut self, room: &str) {
        if let Some(entry) = self.rooms.get_mut(room) {
            entry.passive = None;
        }
    }

    pub fn get_mode(&self, room: &str) -> OverrideMode {
        match self.rooms.get(room) {
            Some(entry) if entry.active.is_some() => OverrideMode::Active,
            Some(entry) if entry.passive.is_some() => OverrideMode::Passive,
            _ => OverrideMode::None,
        }
    }

    pub fn get_active(&self, room: &str) -> Option<ActiveOverride> {
        self.rooms.get(room).and_then(|r| r.active)
    }

    pub fn get_passive(&self, room: &str) -> Option<PassiveOverride> {
        self.rooms.get(room).and_then(|r| r.passive)
    }

    /// Expire anything whose deadline has passed. The bridge is the
    /// authoritative source of timer liveness (spec §3); this is a
    /// best-effort local fallback for hosts that don't call the
    /// per-room expiry callbacks.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) {
        for entry in self.rooms.values_mut() {
            if entry.active.is_some_and(|o| o.deadline <= now) {
                entry.active = None;
            }
            if entry.passive.is_some_and(|o| o.deadline <= now) {
                entry.passive = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::test_utils::utc_datetime;

    #[test]
    fn active_override_clamps_target() {
        let mut store = OverrideStore::new();
        let now = utc_datetime(2024, 1, 1, 0, 0, 0);
        let deadline = now + chrono::Duration::minutes(30);
        store.set_active("lounge", 99.0, deadline, now).unwrap();
        assert_eq!(store.get_active("lounge").unwrap().target, 35.0);
    }

    #[test]
    fn passive_requires_half_degree_gap() {
        let mut store = OverrideStore::new();
        let now = utc_datetime(2024, 1, 1, 0, 0, 0);
        let deadline = now + chrono::Duration::minutes(30);
        let err = store
            .set_passive("lounge", 18.0, 18.2, 50, deadline, now)
            .unwrap_err();
        assert_eq!(err, OverrideError::PassiveRangeInvalid);
    }

    #[test]
    fn cancel_clears_both_kinds() {
        let mut store = OverrideStore::new();
        let now = utc_datetime(2024, 1, 1, 0, 0, 0);
        let deadline = now + chrono::Duration::minutes(30);
        store.set_active("lounge", 20.0, deadline, now).unwrap();
        store.cancel("lounge");
        assert_eq!(store.get_mode("lounge"), OverrideMode::None);
    }

    #[test]
    fn sweep_expired_removes_past_deadlines() {
        let mut store = OverrideStore::new();
        let now = utc_datetime(2024, 1, 1, 0, 0, 0);
        let deadline = now + chrono::Duration::minutes(10);
        store.set_active("lounge", 20.0, deadline, now).unwrap();
        store.sweep_expired(now + chrono::Duration::minutes(11));
        assert_eq!(store.get_mode("lounge"), OverrideMode::None);
    }
}
