//! Scheduler & override resolution (spec §4.2).
//!
//! `resolve_target` implements the seven-level precedence ladder verbatim;
//! `next_change` is the forward scan over up to 8 days (today + 7) that
//! spec §9 "Design notes" calls out explicitly rather than an indexed
//! calendar structure.

use crate::config::schedule::{Day, OperatingMode, RoomSchedule, ScheduleBlock};
use crate::overrides::{OverrideMode, OverrideStore};
use chrono::{DateTime, Datelike, NaiveTime, Utc};
use std::collections::HashMap;

/// The user-selected room mode (distinct from the runtime `OperatingMode`,
/// spec GLOSSARY).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoomMode {
    Auto,
    Manual,
    Passive,
    Off,
}

/// The `{max_temp, valve_pct, min_temp}` helper read when `RoomMode::Passive`
/// is the persistent mode (spec §4.2 precedence level 3), set via
/// `set_passive_settings` (spec §6).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PassiveSettings {
    pub max_temp: f32,
    pub valve_pct: u8,
    pub min_temp: f32,
}

#[derive(Clone, Debug)]
struct RoomModeState {
    mode: RoomMode,
    manual_setpoint: Option<f32>,
    passive_settings: Option<PassiveSettings>,
}

impl Default for RoomModeState {
    fn default() -> Self {
        RoomModeState {
            mode: RoomMode::Auto,
            manual_setpoint: None,
            passive_settings: None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Resolved {
    pub target: f32,
    pub operating_mode: OperatingMode,
    pub valve_percent: Option<u8>,
    pub min_target: Option<f32>,
    pub is_default_mode: bool,
}

const HOLIDAY_TARGET: f32 = 16.0;

/// Owns the mutable per-room schedules (spec §3) and the mode/manual/passive
/// selections a user makes via the service surface (spec §6).
pub struct ScheduleStore {
    schedules: HashMap<String, RoomSchedule>,
    modes: HashMap<String, RoomModeState>,
    pub holiday: bool,
}

impl ScheduleStore {
    pub fn new(schedules: HashMap<String, RoomSchedule>) -> Self {
        ScheduleStore {
            schedules,
            modes: HashMap::new(),
            holiday: false,
        }
    }

    pub fn schedule(&self, room: &str) -> Option<&RoomSchedule> {
        self.schedules.get(room)
    }

    pub fn replace_schedule(&mut self, room: &str, schedule: RoomSchedule) {
        self.schedules.insert(room.to_string(), schedule);
    }

    pub fn all_schedules(&self) -> &HashMap<String, RoomSchedule> {
        &self.schedules
    }

    /// Atomic whole-file rewrite (spec §6 `replace_schedules`): the new map
    /// wholly replaces the old one, it isn't merged in room-by-room.
    pub fn replace_all(&mut self, schedules: HashMap<String, RoomSchedule>) {
        self.schedules = schedules;
    }

    pub fn set_default_target(&mut self, room: &str, target: f32) -> Result<(), String> {
        let schedule = self
            .schedules
            .get_mut(room)
            .ok_or_else(|| format!("unknown room '{room}'"))?;
        schedule.default_target = target;
        Ok(())
    }

    pub fn set_mode(&mut self, room: &str, mode: RoomMode, manual_setpoint: Option<f32>) {
        let entry = self.modes.entry(room.to_string()).or_default();
        entry.mode = mode;
        if mode == RoomMode::Manual {
            entry.manual_setpoint = manual_setpoint;
        }
    }

    pub fn mode(&self, room: &str) -> RoomMode {
        self.modes.get(room).map(|s| s.mode).unwrap_or(RoomMode::Auto)
    }

    pub fn set_passive_settings(&mut self, room: &str, settings: PassiveSettings) {
        self.modes.entry(room.to_string()).or_default().passive_settings = Some(settings);
    }

    /// spec §4.2: the seven-level precedence ladder.
    pub fn resolve_target(
        &self,
        room: &str,
        now: DateTime<Utc>,
        overrides: &OverrideStore,
        frost_protection_temp_c: f32,
    ) -> Option<Resolved> {
        let state = self.modes.get(room).cloned().unwrap_or_default();

        match state.mode {
            // 1. Room mode `off` -> no target.
            RoomMode::Off => None,

            // 2. Room mode `manual` -> {target = manual_setpoint, active}.
            RoomMode::Manual => state.manual_setpoint.map(|target| Resolved {
                target,
                operating_mode: OperatingMode::Active,
                valve_percent: None,
                min_target: None,
                is_default_mode: false,
            }),

            // 3. Room mode `passive` -> read the passive helper.
            RoomMode::Passive => state.passive_settings.map(|settings| Resolved {
                target: settings.max_temp,
                operating_mode: OperatingMode::Passive,
                valve_percent: Some(settings.valve_pct),
                min_target: Some(settings.min_temp.max(frost_protection_temp_c)),
                is_default_mode: false,
            }),

            RoomMode::Auto => {
                // 4. active override always forces active.
                if let Some(active) = overrides.get_active(room) {
                    return Some(Resolved {
                        target: active.target,
                        operating_mode: OperatingMode::Active,
                        valve_percent: None,
                        min_target: None,
                        is_default_mode: false,
                    });
                }
                // 5. passive override. The passive control law (§4.4 step 5)
                // bands symmetrically around `max_temp`, the same field a
                // persistent passive mode (level 3) puts in `target` — so a
                // passive override's `max` goes there too, with `min` as the
                // floor, to give both passive sources the same control point.
                if overrides.get_mode(room) == OverrideMode::Passive {
                    if let Some(pv) = overrides.get_passive(room) {
                        return Some(Resolved {
                            target: pv.max,
                            operating_mode: OperatingMode::Passive,
                            valve_percent: Some(pv.valve_pct),
                            min_target: Some(pv.min.max(frost_protection_temp_c)),
                            is_default_mode: false,
                        });
                    }
                }
                // 6. holiday.
                if self.holiday {
                    return Some(Resolved {
                        target: HOLIDAY_TARGET,
                        operating_mode: OperatingMode::Active,
                        valve_percent: None,
                        min_target: None,
                        is_default_mode: false,
                    });
                }
                // 7. scheduled block, falling back to the day default.
                Some(self.resolve_scheduled(room, now))
            }
        }
    }

    fn resolve_scheduled(&self, room: &str, now: DateTime<Utc>) -> Resolved {
        let Some(schedule) = self.schedules.get(room) else {
            return Resolved {
                target: 18.0,
                operating_mode: OperatingMode::Active,
                valve_percent: None,
                min_target: None,
                is_default_mode: true,
            };
        };

        let day = now.weekday();
        let time = now.time();
        if let Some(block) = find_block(schedule.blocks_for(day), time) {
            return Resolved {
                target: block.target,
                operating_mode: block.mode.unwrap_or(OperatingMode::Active),
                valve_percent: block.valve_percent,
                min_target: block.min_target,
                is_default_mode: false,
            };
        }

        Resolved {
            target: schedule.default_target,
            operating_mode: schedule.default_mode,
            valve_percent: schedule.default_valve_percent,
            min_target: schedule.default_min_temp,
            is_default_mode: true,
        }
    }

    /// Scan forward up to 8 days (today + 7) for the next transition this
    /// room will head to, synthesising a default-target transition at any
    /// gap boundary (spec §4.2 / §9).
    pub fn next_change(
        &self,
        room: &str,
        now: DateTime<Utc>,
        holiday: bool,
    ) -> Option<(DateTime<Utc>, f32)> {
        if holiday || self.mode(room) != RoomMode::Auto {
            return None;
        }
        let schedule = self.schedules.get(room)?;
        let current = self.resolve_scheduled(room, now);

        let mut cursor_date = now.date_naive();
        let mut cursor_time = now.time();

        for day_offset in 0..8 {
            let day = cursor_date.weekday();
            let transitions = transitions_for_day(schedule, day);
            for (time, target) in transitions {
                if day_offset == 0 && time <= cursor_time {
                    continue;
                }
                if target != current.target {
                    let date_time = cursor_date.and_time(time);
                    let when = DateTime::<Utc>::from_naive_utc_and_offset(date_time, Utc);
                    return Some((when, target));
                }
            }
            cursor_date = cursor_date.succ_opt().unwrap_or(cursor_date);
            cursor_time = NaiveTime::MIN;
        }
        None
    }
}

fn find_block(blocks: &[ScheduleBlock], time: NaiveTime) -> Option<&ScheduleBlock> {
    blocks.iter().find(|b| b.contains(time))
}

/// Produces the ordered list of (start_time, target) transitions within a
/// day: each block's start, plus a synthetic transition back to the day
/// default immediately after each block ends.
fn transitions_for_day(schedule: &RoomSchedule, day: Day) -> Vec<(NaiveTime, f32)> {
    let mut out = Vec::new();
    for block in schedule.blocks_for(day) {
        out.push((block.start, block.target));
        out.push((block.end, schedule.default_target));
    }
    out.sort_by_key(|(t, _)| *t);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schedule::ScheduleBlock;
    use crate::time_util::test_utils::{time, utc_datetime};

    fn schedule_with_block(day: Day, start: (u32, u32), end: (u32, u32), target: f32) -> RoomSchedule {
        let mut schedule = RoomSchedule {
            default_target: 18.0,
            ..Default::default()
        };
        schedule.days.insert(
            day,
            vec![ScheduleBlock {
                start: time(start.0, start.1, 0),
                end: time(end.0, end.1, 0),
                target,
                mode: None,
                valve_percent: None,
                min_target: None,
            }],
        );
        schedule
    }

    #[test]
    fn off_mode_has_no_target() {
        let mut store = ScheduleStore::new(HashMap::new());
        store.set_mode("lounge", RoomMode::Off, None);
        let overrides = OverrideStore::new();
        let resolved = store.resolve_target("lounge", utc_datetime(2024, 1, 1, 10, 0, 0), &overrides, 7.0);
        assert!(resolved.is_none());
    }

    #[test]
    fn manual_mode_uses_setpoint() {
        let mut store = ScheduleStore::new(HashMap::new());
        store.set_mode("lounge", RoomMode::Manual, Some(21.5));
        let overrides = OverrideStore::new();
        let resolved = store
            .resolve_target("lounge", utc_datetime(2024, 1, 1, 10, 0, 0), &overrides, 7.0)
            .unwrap();
        assert_eq!(resolved.target, 21.5);
        assert_eq!(resolved.operating_mode, OperatingMode::Active);
    }

    #[test]
    fn active_override_beats_schedule() {
        let mut schedules = HashMap::new();
        schedules.insert(
            "lounge".to_string(),
            schedule_with_block(chrono::Weekday::Mon, (9, 0), (17, 0), 19.0),
        );
        let store = ScheduleStore::new(schedules);
        let mut overrides = OverrideStore::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0); // Monday
        overrides
            .set_active("lounge", 22.0, now + chrono::Duration::minutes(30), now)
            .unwrap();

        let resolved = store.resolve_target("lounge", now, &overrides, 7.0).unwrap();
        assert_eq!(resolved.target, 22.0);
    }

    #[test]
    fn holiday_overrides_schedule_but_not_overrides() {
        let mut schedules = HashMap::new();
        schedules.insert(
            "lounge".to_string(),
            schedule_with_block(chrono::Weekday::Mon, (9, 0), (17, 0), 19.0),
        );
        let mut store = ScheduleStore::new(schedules);
        store.holiday = true;
        let overrides = OverrideStore::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        let resolved = store.resolve_target("lounge", now, &overrides, 7.0).unwrap();
        assert_eq!(resolved.target, 16.0);
    }

    #[test]
    fn gap_falls_back_to_day_default() {
        let mut schedules = HashMap::new();
        schedules.insert(
            "lounge".to_string(),
            schedule_with_block(chrono::Weekday::Mon, (9, 0), (17, 0), 19.0),
        );
        let store = ScheduleStore::new(schedules);
        let overrides = OverrideStore::new();
        let now = utc_datetime(2024, 1, 1, 20, 0, 0); // after the block
        let resolved = store.resolve_target("lounge", now, &overrides, 7.0).unwrap();
        assert_eq!(resolved.target, 18.0);
        assert!(resolved.is_default_mode);
    }

    #[test]
    fn next_change_finds_upcoming_block_start() {
        let mut schedules = HashMap::new();
        schedules.insert(
            "lounge".to_string(),
            schedule_with_block(chrono::Weekday::Mon, (9, 0), (17, 0), 19.0),
        );
        let store = ScheduleStore::new(schedules);
        let now = utc_datetime(2024, 1, 1, 7, 0, 0); // Monday morning, before block
        let (when, target) = store.next_change("lounge", now, false).unwrap();
        assert_eq!(target, 19.0);
        assert_eq!(when.time(), time(9, 0, 0));
    }
}
