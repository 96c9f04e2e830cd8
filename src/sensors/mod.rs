//! Sensor fusion (spec §4.1).
//!
//! Grounded on the entity-handle idiom of `io/temperatures/mod.rs`: sensors
//! are addressed by an opaque string handle owned by the bridge, readings
//! are cached here as they arrive, and fusion/staleness is computed purely
//! from that cache at recompute time - nothing here ever talks to the
//! bridge directly.

use crate::config::rooms::{RoomConfig, SensorRole};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug)]
struct SensorSample {
    value: f32,
    at: DateTime<Utc>,
}

/// Tracks the last-known value of every sensor entity plus per-room EMA
/// smoothing residue (spec §3 "Sensor manager").
#[derive(Default)]
pub struct SensorManager {
    samples: HashMap<String, SensorSample>,
    ema: HashMap<String, f32>,
}

impl SensorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a raw reading from the bridge. Always stores the value and
    /// timestamp, even if it will be dropped as noise for recompute-triggering
    /// purposes elsewhere (spec §5: staleness accounting is unaffected by the
    /// deadband filter).
    pub fn record(&mut self, entity_id: &str, value: f32, now: DateTime<Utc>) {
        self.samples
            .insert(entity_id.to_string(), SensorSample { value, at: now });
    }

    fn is_fresh(&self, entity_id: &str, timeout_m: u32, now: DateTime<Utc>) -> Option<f32> {
        let sample = self.samples.get(entity_id)?;
        let age = now.signed_duration_since(sample.at);
        if age <= chrono::Duration::minutes(timeout_m as i64) {
            Some(sample.value)
        } else {
            None
        }
    }

    /// Raw fused temperature for a room: mean of non-stale sensors in the
    /// highest-precedence role that has any (primary, then fallback).
    pub fn room_temperature(&self, room: &RoomConfig, now: DateTime<Utc>) -> (Option<f32>, bool) {
        let primary = self.fuse_role(room, SensorRole::Primary, now);
        if let Some(value) = primary {
            return (Some(value), false);
        }
        let fallback = self.fuse_role(room, SensorRole::Fallback, now);
        if let Some(value) = fallback {
            return (Some(value), false);
        }
        (None, true)
    }

    fn fuse_role(&self, room: &RoomConfig, role: SensorRole, now: DateTime<Utc>) -> Option<f32> {
        let values: Vec<f32> = room
            .sensors
            .iter()
            .filter(|s| s.role == role)
            .filter_map(|s| self.is_fresh(&s.entity_id, s.timeout_m, now))
            .collect();
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f32>() / values.len() as f32)
    }

    /// The smoothed temperature used for both control and display (spec §4.1).
    /// When the room has no smoothing configured (or it's disabled), this is
    /// just the raw fused value.
    pub fn room_temperature_smoothed(
        &mut self,
        room: &RoomConfig,
        now: DateTime<Utc>,
    ) -> (Option<f32>, bool) {
        let (raw, is_stale) = self.room_temperature(room, now);
        let Some(raw) = raw else {
            return (None, is_stale);
        };

        let smoothing = match room.smoothing {
            Some(s) if s.enabled => s,
            _ => return (Some(raw), is_stale),
        };

        let alpha = smoothing.clamped_alpha();
        let smoothed = match self.ema.get(&room.id) {
            Some(prev) => alpha * raw + (1.0 - alpha) * prev,
            None => raw,
        };
        self.ema.insert(room.id.clone(), smoothed);
        (Some(smoothed), is_stale)
    }

    #[cfg(test)]
    pub fn reset_ema(&mut self, room_id: &str) {
        self.ema.remove(room_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::rooms::{RoomConfig, SensorSpec};
    use crate::time_util::test_utils::utc_datetime;

    fn room_with_sensors(sensors: Vec<SensorSpec>) -> RoomConfig {
        RoomConfig {
            id: "lounge".into(),
            sensors,
            ..Default::default()
        }
    }

    fn primary(entity: &str, timeout_m: u32) -> SensorSpec {
        SensorSpec {
            entity_id: entity.into(),
            role: SensorRole::Primary,
            timeout_m,
            ..Default::default()
        }
    }

    fn fallback(entity: &str, timeout_m: u32) -> SensorSpec {
        SensorSpec {
            entity_id: entity.into(),
            role: SensorRole::Fallback,
            timeout_m,
            ..Default::default()
        }
    }

    #[test]
    fn averages_multiple_fresh_primaries() {
        let mut mgr = SensorManager::new();
        let now = utc_datetime(2024, 1, 1, 12, 0, 0);
        mgr.record("sensor.a", 19.0, now);
        mgr.record("sensor.b", 21.0, now);
        let room = room_with_sensors(vec![primary("sensor.a", 30), primary("sensor.b", 30)]);

        let (value, stale) = mgr.room_temperature(&room, now);
        assert_eq!(value, Some(20.0));
        assert!(!stale);
    }

    #[test]
    fn falls_back_when_all_primaries_stale() {
        let mut mgr = SensorManager::new();
        let t0 = utc_datetime(2024, 1, 1, 12, 0, 0);
        mgr.record("sensor.primary", 19.0, t0);
        mgr.record("sensor.fallback", 18.5, t0);
        let room = room_with_sensors(vec![primary("sensor.primary", 10), fallback("sensor.fallback", 60)]);

        let later = t0 + chrono::Duration::minutes(20);
        let (value, stale) = mgr.room_temperature(&room, later);
        assert_eq!(value, Some(18.5));
        assert!(!stale);
    }

    #[test]
    fn reports_stale_when_nothing_fresh() {
        let mut mgr = SensorManager::new();
        let t0 = utc_datetime(2024, 1, 1, 12, 0, 0);
        mgr.record("sensor.primary", 19.0, t0);
        let room = room_with_sensors(vec![primary("sensor.primary", 10)]);

        let later = t0 + chrono::Duration::minutes(20);
        let (value, stale) = mgr.room_temperature(&room, later);
        assert_eq!(value, None);
        assert!(stale);
    }

    #[test]
    fn ema_smooths_towards_raw_value() {
        let mut mgr = SensorManager::new();
        let t0 = utc_datetime(2024, 1, 1, 12, 0, 0);
        let mut room = room_with_sensors(vec![primary("sensor.a", 30)]);
        room.smoothing = Some(crate::config::rooms::SmoothingConfig {
            enabled: true,
            alpha: 0.5,
        });

        mgr.record("sensor.a", 20.0, t0);
        let (first, _) = mgr.room_temperature_smoothed(&room, t0);
        assert_eq!(first, Some(20.0));

        let t1 = t0 + chrono::Duration::minutes(1);
        mgr.record("sensor.a", 22.0, t1);
        let (second, _) = mgr.room_temperature_smoothed(&room, t1);
        assert_eq!(second, Some(21.0));
    }
}
