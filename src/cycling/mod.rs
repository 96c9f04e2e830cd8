//! Return-temperature cooldown protection (spec §4.6).

use chrono::{DateTime, Utc};
use std::collections::VecDeque;

use crate::config::boiler::CooldownConfig;
use crate::time_util::chrono_duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CyclingState {
    Normal,
    Cooldown,
    Timeout,
}

pub struct CyclingOutputs {
    pub state: CyclingState,
    /// Set when the boiler's flow setpoint must be (re)written this tick.
    pub forced_setpoint_c: Option<f32>,
    pub excessive_cycling_alert: bool,
    pub timeout_alert: bool,
}

pub struct CyclingProtection {
    state: CyclingState,
    saved_setpoint: Option<f32>,
    cooldown_entry_time: Option<DateTime<Utc>>,
    last_recovery_check: Option<DateTime<Utc>>,
    cooldown_history: VecDeque<DateTime<Utc>>,
    prev_flame_on: bool,
}

impl Default for CyclingProtection {
    fn default() -> Self {
        CyclingProtection {
            state: CyclingState::Normal,
            saved_setpoint: None,
            cooldown_entry_time: None,
            last_recovery_check: None,
            cooldown_history: VecDeque::new(),
            prev_flame_on: false,
        }
    }
}

impl CyclingProtection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CyclingState {
        self.state
    }

    pub fn restore(&mut self, state: CyclingState, saved_setpoint: Option<f32>, cooldown_start: Option<DateTime<Utc>>) {
        self.state = state;
        self.saved_setpoint = saved_setpoint;
        self.cooldown_entry_time = cooldown_start;
    }

    pub fn saved_setpoint(&self) -> Option<f32> {
        self.saved_setpoint
    }

    pub fn cooldown_start(&self) -> Option<DateTime<Utc>> {
        self.cooldown_entry_time
    }

    pub fn cooldowns_count(&self) -> usize {
        self.cooldown_history.len()
    }

    /// spec §4.6. `current_setpoint` is the boiler's live flow setpoint.
    /// `sensor_settled` gates the flame-off entry check by
    /// `sensor_settle_delay_s`; `dhw_active` suppresses the whole mechanism.
    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        now: DateTime<Utc>,
        flame_on: bool,
        sensor_settled: bool,
        dhw_active: bool,
        return_temp: f32,
        current_setpoint: f32,
        config: &CooldownConfig,
    ) -> CyclingOutputs {
        let flame_just_went_off = self.prev_flame_on && !flame_on;
        self.prev_flame_on = flame_on;

        let mut forced_setpoint_c = None;
        let mut excessive_cycling_alert = false;
        let mut timeout_alert = false;

        if self.state == CyclingState::Normal
            && flame_just_went_off
            && sensor_settled
            && !dhw_active
            && return_temp >= current_setpoint - config.high_delta_c
        {
            self.saved_setpoint = Some(current_setpoint);
            self.cooldown_entry_time = Some(now);
            self.last_recovery_check = Some(now);
            self.state = CyclingState::Cooldown;
            self.cooldown_history.push_back(now);
            forced_setpoint_c = Some(clamp_setpoint(config.forced_setpoint_c));

            let window_start = now - chrono_duration(config.excessive_cycling_window_s);
            while self
                .cooldown_history
                .front()
                .is_some_and(|t| *t < window_start)
            {
                self.cooldown_history.pop_front();
            }
            if self.cooldown_history.len() as u32 > config.excessive_cycling_threshold {
                excessive_cycling_alert = true;
            }
        } else if self.state == CyclingState::Cooldown {
            let entry = self.cooldown_entry_time.expect("cooldown entry time set on entry");
            if now.signed_duration_since(entry) > chrono_duration(config.max_duration_s) {
                self.state = CyclingState::Timeout;
                timeout_alert = true;
                if let Some(saved) = self.saved_setpoint.take() {
                    forced_setpoint_c = Some(clamp_setpoint(saved));
                }
                self.cooldown_entry_time = None;
            } else {
                let due = self
                    .last_recovery_check
                    .map(|t| now.signed_duration_since(t) >= chrono_duration(config.recovery_interval_s))
                    .unwrap_or(true);
                if due {
                    self.last_recovery_check = Some(now);
                    let saved = self.saved_setpoint.unwrap_or(current_setpoint);
                    let threshold = (saved - config.recovery_delta_c).max(config.recovery_min_c);
                    if return_temp <= threshold {
                        forced_setpoint_c = Some(clamp_setpoint(saved));
                        self.state = CyclingState::Normal;
                        self.saved_setpoint = None;
                        self.cooldown_entry_time = None;
                    }
                }
            }
        } else if self.state == CyclingState::Timeout {
            // Forced exit already happened; wait for a fresh flame-off cycle.
            self.state = CyclingState::Normal;
        }

        CyclingOutputs {
            state: self.state,
            forced_setpoint_c,
            excessive_cycling_alert,
            timeout_alert,
        }
    }
}

fn clamp_setpoint(setpoint: f32) -> f32 {
    setpoint.clamp(30.0, 80.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::test_utils::utc_datetime;
    use std::time::Duration as StdDuration;

    fn config() -> CooldownConfig {
        CooldownConfig {
            high_delta_c: 5.0,
            recovery_delta_c: 10.0,
            recovery_min_c: 30.0,
            recovery_interval_s: StdDuration::from_secs(60),
            max_duration_s: StdDuration::from_secs(30 * 60),
            sensor_settle_delay_s: StdDuration::from_secs(2),
            forced_setpoint_c: 30.0,
            excessive_cycling_threshold: 3,
            excessive_cycling_window_s: StdDuration::from_secs(2 * 60 * 60),
        }
    }

    #[test]
    fn enters_cooldown_on_high_return_temp() {
        let mut protection = CyclingProtection::new();
        let cfg = config();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        protection.tick(now, true, true, false, 50.0, 70.0, &cfg); // flame on, establish baseline
        let outputs = protection.tick(now, false, true, false, 65.0, 70.0, &cfg);
        assert_eq!(outputs.state, CyclingState::Cooldown);
        assert_eq!(outputs.forced_setpoint_c, Some(30.0));
    }

    #[test]
    fn recovers_when_return_drops_below_threshold() {
        let mut protection = CyclingProtection::new();
        let cfg = config();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        protection.tick(now, true, true, false, 50.0, 70.0, &cfg);
        protection.tick(now, false, true, false, 65.0, 70.0, &cfg);

        let later = now + chrono::Duration::seconds(70);
        let outputs = protection.tick(later, false, true, false, 60.0, 30.0, &cfg);
        assert_eq!(outputs.state, CyclingState::Normal);
        assert_eq!(outputs.forced_setpoint_c, Some(70.0));
    }

    #[test]
    fn dhw_active_suppresses_cooldown_entry() {
        let mut protection = CyclingProtection::new();
        let cfg = config();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        protection.tick(now, true, true, false, 50.0, 70.0, &cfg);
        let outputs = protection.tick(now, false, true, true, 65.0, 70.0, &cfg);
        assert_eq!(outputs.state, CyclingState::Normal);
    }

    #[test]
    fn excessive_cycling_alert_after_threshold() {
        let mut protection = CyclingProtection::new();
        let cfg = config();
        let mut now = utc_datetime(2024, 1, 1, 10, 0, 0);
        let mut last_alert = false;
        for _ in 0..4 {
            protection.tick(now, true, true, false, 50.0, 70.0, &cfg);
            let outputs = protection.tick(now, false, true, false, 65.0, 70.0, &cfg);
            last_alert = outputs.excessive_cycling_alert;
            now += chrono::Duration::seconds(80);
            protection.restore(CyclingState::Normal, None, None);
        }
        assert!(last_alert);
    }
}
