//! Load-sharing manager (spec §4.8): opportunistically opens valves in
//! additional rooms when the naturally-calling set can't absorb the
//! boiler's minimum output, to stave off short-cycling.
//!
//! Capacity totals use the EN 442 estimate from [`crate::load_calc`]; as the
//! spec notes, these are ±20-30% figures used only for threshold comparison.

use crate::config::boiler::{BoilerLoadSharingConfig, LoadSharingMode};
use crate::schedule::RoomMode;
use chrono::DateTime;
use chrono::Utc;
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Tier {
    Schedule,
    Fallback,
}

struct ActiveRoom {
    tier: Tier,
    valve_pct: u8,
    activated_at: DateTime<Utc>,
    target_temp: f32,
}

/// Everything the manager needs to know about one room this tick, gathered
/// by the caller from config, the room controller, and the scheduler.
pub struct RoomCandidate {
    pub id: String,
    pub mode: RoomMode,
    pub calling: bool,
    pub temp: Option<f32>,
    pub current_valve_percent: u8,
    pub capacity_at_100_w: f32,
    pub off_delta_c: f32,
    /// From `ScheduleStore::next_change`, only meaningful in `Auto` mode.
    pub next_schedule_change: Option<(DateTime<Utc>, f32)>,
    pub schedule_lookahead_m: Option<u32>,
    pub fallback_priority: Option<u32>,
    /// Passive rooms only: the configured passive max_temp, used for the
    /// "currently below max_temp" fallback-tier-A eligibility check.
    pub passive_max_temp: Option<f32>,
}

pub struct LoadSharingOutputs {
    pub overrides: HashMap<String, u8>,
    pub active: bool,
}

/// Owns the set of rooms currently being opportunistically opened, and the
/// fallback-timeout cooldown history that excludes recently-timed-out rooms.
pub struct LoadSharingManager {
    active: HashMap<String, ActiveRoom>,
    fallback_cooldown_until: HashMap<String, DateTime<Utc>>,
}

impl Default for LoadSharingManager {
    fn default() -> Self {
        LoadSharingManager {
            active: HashMap::new(),
            fallback_cooldown_until: HashMap::new(),
        }
    }
}

impl LoadSharingManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_rooms(&self) -> Vec<String> {
        self.active.keys().cloned().collect()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        candidates: &[RoomCandidate],
        calling_rooms_empty: bool,
        cycling_cooldown: bool,
        return_temp: f32,
        setpoint: f32,
        config: &BoilerLoadSharingConfig,
    ) -> LoadSharingOutputs {
        let by_id: HashMap<&str, &RoomCandidate> =
            candidates.iter().map(|c| (c.id.as_str(), c)).collect();

        // Minimum activation duration (spec §4.8): triggers C/D/E/F may not
        // remove a room before this elapses since `activated_at`. Trigger A
        // (the whole tier drops because calling-capacity evaporated) and
        // trigger B (bypasses it explicitly) are exempt.
        let min_duration = crate::time_util::chrono_duration(config.min_activation_duration_s);
        let min_elapsed = |activated_at: DateTime<Utc>| now.signed_duration_since(activated_at) >= min_duration;

        // Exit trigger C: a participating room is now naturally calling.
        self.active.retain(|id, entry| {
            let calling_now = by_id.get(id.as_str()).is_some_and(|c| c.calling);
            !calling_now || !min_elapsed(entry.activated_at)
        });

        // Exit trigger F: a participating room's mode left `auto`.
        self.active.retain(|id, entry| {
            let still_auto = by_id.get(id.as_str()).is_some_and(|c| c.mode == RoomMode::Auto);
            still_auto || !min_elapsed(entry.activated_at)
        });

        // Exit trigger E: a participating room reached pre-warm target + off_delta.
        self.active.retain(|id, entry| {
            let Some(candidate) = by_id.get(id.as_str()) else {
                return false;
            };
            let reached = match candidate.temp {
                Some(t) => t >= entry.target_temp + candidate.off_delta_c,
                None => false,
            };
            !reached || !min_elapsed(entry.activated_at)
        });

        // Exit trigger D: fallback-tier room overstayed fallback_timeout_s.
        let mut timed_out = Vec::new();
        self.active.retain(|id, entry| {
            let overstayed = entry.tier == Tier::Fallback
                && now.signed_duration_since(entry.activated_at)
                    >= crate::time_util::chrono_duration(config.fallback_timeout_s);
            if overstayed && min_elapsed(entry.activated_at) {
                timed_out.push(id.clone());
                false
            } else {
                true
            }
        });
        for id in timed_out {
            self.fallback_cooldown_until
                .insert(id, now + crate::time_util::chrono_duration(config.fallback_cooldown_s));
        }
        self.fallback_cooldown_until.retain(|_, until| *until > now);

        // Exit trigger A: all originally calling rooms stopped -> drop the tier entirely.
        if calling_rooms_empty && !self.active.is_empty() {
            self.active.clear();
        }

        let calling_capacity: f32 = candidates
            .iter()
            .filter(|c| c.calling)
            .map(|c| c.capacity_at_100_w)
            .sum();
        let passive_weighted: f32 = candidates
            .iter()
            .filter(|c| c.mode == RoomMode::Passive)
            .map(|c| c.capacity_at_100_w * (c.current_valve_percent as f32 / 100.0))
            .sum();
        let active_capacity: f32 = self
            .active
            .iter()
            .filter_map(|(id, entry)| {
                by_id
                    .get(id.as_str())
                    .map(|c| c.capacity_at_100_w * (entry.valve_pct as f32 / 100.0))
            })
            .sum();
        let mut total_capacity = calling_capacity + passive_weighted + active_capacity;

        let return_hot = return_temp >= setpoint - config.high_return_delta_c;
        let entry_ok = total_capacity < config.min_calling_capacity_w && (cycling_cooldown || return_hot);
        let target_capacity = config.min_calling_capacity_w + config.target_capacity_margin_w;

        if config.mode != LoadSharingMode::Off
            && (entry_ok || !self.active.is_empty())
            && total_capacity < target_capacity
        {
            self.run_selection_cascade(now, candidates, &by_id, config, &mut total_capacity, target_capacity);
        }

        let overrides = self
            .active
            .iter()
            .map(|(id, entry)| (id.clone(), entry.valve_pct))
            .collect();

        LoadSharingOutputs {
            overrides,
            active: !self.active.is_empty(),
        }
    }

    fn run_selection_cascade(
        &mut self,
        now: DateTime<Utc>,
        candidates: &[RoomCandidate],
        by_id: &HashMap<&str, &RoomCandidate>,
        config: &BoilerLoadSharingConfig,
        total_capacity: &mut f32,
        target_capacity: f32,
    ) {
        // Escalate already-active rooms one step at a time before adding more.
        let ids: Vec<String> = self.active.keys().cloned().collect();
        for id in &ids {
            if *total_capacity >= target_capacity {
                return;
            }
            let Some(candidate) = by_id.get(id.as_str()) else { continue };
            let entry = self.active.get_mut(id).expect("key came from self.active");
            if entry.valve_pct >= 100 {
                continue;
            }
            let before = entry.valve_pct;
            entry.valve_pct = (entry.valve_pct + config.escalation_step_percent).min(100);
            *total_capacity += candidate.capacity_at_100_w * ((entry.valve_pct - before) as f32 / 100.0);
        }
        if *total_capacity >= target_capacity {
            return;
        }

        // Schedule tier: rooms in auto, not calling, not already active, with
        // an upcoming block whose target exceeds current temp, closest first.
        let mut schedule_pool: Vec<&RoomCandidate> = candidates
            .iter()
            .filter(|c| {
                c.mode == RoomMode::Auto
                    && !c.calling
                    && !self.active.contains_key(&c.id)
                    && c.temp.is_some()
            })
            .filter(|c| {
                let Some((when, target)) = c.next_schedule_change else {
                    return false;
                };
                let lookahead_m = c.schedule_lookahead_m.unwrap_or(30) as f32 * config.lookahead_multiplier;
                let minutes_until = when.signed_duration_since(now).num_seconds() as f32 / 60.0;
                minutes_until >= 0.0 && minutes_until <= lookahead_m && target > c.temp.unwrap()
            })
            .collect();
        schedule_pool.sort_by(|a, b| {
            let a_when = a.next_schedule_change.unwrap().0;
            let b_when = b.next_schedule_change.unwrap().0;
            a_when.cmp(&b_when)
        });

        for candidate in schedule_pool {
            if *total_capacity >= target_capacity {
                return;
            }
            let target_temp = candidate.next_schedule_change.unwrap().1;
            self.activate(candidate, Tier::Schedule, target_temp, config.initial_valve_percent, now);
            *total_capacity += candidate.capacity_at_100_w * (config.initial_valve_percent as f32 / 100.0);
        }
        if *total_capacity >= target_capacity || config.mode == LoadSharingMode::Conservative {
            return;
        }

        // Fallback tier A: passive rooms currently below their max_temp.
        let mut fallback_a: Vec<&RoomCandidate> = candidates
            .iter()
            .filter(|c| {
                c.mode == RoomMode::Passive
                    && !self.active.contains_key(&c.id)
                    && !self.fallback_cooldown_until.contains_key(&c.id)
                    && c.temp.is_some()
                    && c.passive_max_temp.is_some_and(|max| c.temp.unwrap() < max)
            })
            .collect();
        fallback_a.sort_by(|a, b| a.id.cmp(&b.id));
        for candidate in fallback_a {
            if *total_capacity >= target_capacity {
                return;
            }
            let target_temp = candidate.passive_max_temp.unwrap();
            self.activate(candidate, Tier::Fallback, target_temp, config.initial_valve_percent, now);
            *total_capacity += candidate.capacity_at_100_w * (config.initial_valve_percent as f32 / 100.0);
        }
        if *total_capacity >= target_capacity || config.mode != LoadSharingMode::Aggressive {
            return;
        }

        // Fallback tier B: priority-ordered auto rooms.
        let mut fallback_b: Vec<&RoomCandidate> = candidates
            .iter()
            .filter(|c| {
                c.mode == RoomMode::Auto
                    && !c.calling
                    && !self.active.contains_key(&c.id)
                    && !self.fallback_cooldown_until.contains_key(&c.id)
                    && c.temp.is_some()
                    && c.fallback_priority.is_some()
            })
            .collect();
        fallback_b.sort_by_key(|c| c.fallback_priority.unwrap());
        for candidate in fallback_b {
            if *total_capacity >= target_capacity {
                return;
            }
            // No schedule target here; pre-warm towards a nominal comfort
            // bump over the room's own current temperature.
            let target_temp = candidate.temp.unwrap() + 1.0;
            self.activate(candidate, Tier::Fallback, target_temp, config.initial_valve_percent, now);
            *total_capacity += candidate.capacity_at_100_w * (config.initial_valve_percent as f32 / 100.0);
        }
    }

    fn activate(
        &mut self,
        candidate: &RoomCandidate,
        tier: Tier,
        target_temp: f32,
        valve_pct: u8,
        now: DateTime<Utc>,
    ) {
        self.active.insert(
            candidate.id.clone(),
            ActiveRoom {
                tier,
                valve_pct,
                activated_at: now,
                target_temp,
            },
        );
    }
}
