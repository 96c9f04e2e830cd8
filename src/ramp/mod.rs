//! Setpoint ramp (spec §4.7): dynamic flow-temperature escalation to avoid
//! short-cycling while the boiler runs flat out against a sluggish flow temp.

use crate::config::boiler::SetpointRampConfig;

const BASELINE_EPSILON: f32 = 1e-3;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RampState {
    Inactive,
    Ramping,
}

pub struct RampOutputs {
    pub state: RampState,
    /// `Some(setpoint)` when the boiler's flow setpoint must be (re)written.
    pub setpoint_c: Option<f32>,
}

pub struct SetpointRamp {
    state: RampState,
    baseline: Option<f32>,
    current: Option<f32>,
    steps_applied: u32,
}

impl Default for SetpointRamp {
    fn default() -> Self {
        SetpointRamp {
            state: RampState::Inactive,
            baseline: None,
            current: None,
            steps_applied: 0,
        }
    }
}

impl SetpointRamp {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> RampState {
        self.state
    }

    pub fn steps_applied(&self) -> u32 {
        self.steps_applied
    }

    /// spec §4.7 "State is inferred from physical boiler setpoint on
    /// restart": no persistence is kept for this component, the live
    /// boiler setpoint and flame state are enough to rebuild it.
    pub fn infer_on_restart(&mut self, baseline: f32, physical_setpoint: f32, flame_on: bool) {
        self.baseline = Some(baseline);
        if physical_setpoint > baseline + BASELINE_EPSILON && flame_on {
            self.current = Some(physical_setpoint);
            self.state = RampState::Ramping;
        } else {
            self.current = None;
            self.state = RampState::Inactive;
        }
    }

    /// `baseline_setpoint` is the user/schedule-chosen flow setpoint for
    /// this tick; `flow_temp` is the live measured flow temperature.
    pub fn tick(
        &mut self,
        enabled: bool,
        boiler_on: bool,
        cycling_normal: bool,
        flame_on: bool,
        flow_temp: f32,
        baseline_setpoint: f32,
        config: &SetpointRampConfig,
    ) -> RampOutputs {
        let baseline_changed = self
            .baseline
            .is_some_and(|b| (b - baseline_setpoint).abs() > BASELINE_EPSILON);
        self.baseline = Some(baseline_setpoint);

        if !enabled || baseline_changed || (!flame_on && self.state != RampState::Inactive) {
            let reset_to = if self.state == RampState::Ramping {
                Some(baseline_setpoint)
            } else {
                None
            };
            self.state = RampState::Inactive;
            self.current = None;
            self.steps_applied = 0;
            return RampOutputs {
                state: self.state,
                setpoint_c: reset_to,
            };
        }

        if !boiler_on || !cycling_normal || !flame_on {
            return RampOutputs {
                state: self.state,
                setpoint_c: None,
            };
        }

        let current = self.current.unwrap_or(baseline_setpoint);
        if flow_temp >= current + config.delta_trigger_c {
            let next = (current + config.delta_increase_c).min(config.max_setpoint_c);
            if next > current {
                self.current = Some(next);
                self.steps_applied += 1;
                self.state = RampState::Ramping;
                return RampOutputs {
                    state: self.state,
                    setpoint_c: Some(next),
                };
            }
        }

        RampOutputs {
            state: self.state,
            setpoint_c: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> SetpointRampConfig {
        SetpointRampConfig {
            enabled: true,
            delta_trigger_c: 2.0,
            delta_increase_c: 2.0,
            max_setpoint_c: 70.0,
        }
    }

    #[test]
    fn ramps_up_when_flow_exceeds_trigger() {
        let mut ramp = SetpointRamp::new();
        let cfg = config();
        let outputs = ramp.tick(true, true, true, true, 62.0, 60.0, &cfg);
        assert_eq!(outputs.state, RampState::Ramping);
        assert_eq!(outputs.setpoint_c, Some(62.0));
    }

    #[test]
    fn caps_at_max_setpoint() {
        let mut ramp = SetpointRamp::new();
        let cfg = config();
        ramp.current = Some(69.0);
        ramp.state = RampState::Ramping;
        ramp.baseline = Some(60.0);
        let outputs = ramp.tick(true, true, true, true, 72.0, 60.0, &cfg);
        assert_eq!(outputs.setpoint_c, Some(70.0));
    }

    #[test]
    fn resets_on_flame_off() {
        let mut ramp = SetpointRamp::new();
        let cfg = config();
        ramp.current = Some(64.0);
        ramp.state = RampState::Ramping;
        ramp.baseline = Some(60.0);
        let outputs = ramp.tick(true, true, true, false, 64.0, 60.0, &cfg);
        assert_eq!(outputs.state, RampState::Inactive);
        assert_eq!(outputs.setpoint_c, Some(60.0));
    }

    #[test]
    fn resets_on_baseline_change() {
        let mut ramp = SetpointRamp::new();
        let cfg = config();
        ramp.current = Some(64.0);
        ramp.state = RampState::Ramping;
        ramp.baseline = Some(60.0);
        let outputs = ramp.tick(true, true, true, true, 64.0, 55.0, &cfg);
        assert_eq!(outputs.state, RampState::Inactive);
        assert_eq!(outputs.setpoint_c, Some(55.0));
    }

    #[test]
    fn infers_ramping_state_on_restart() {
        let mut ramp = SetpointRamp::new();
        ramp.infer_on_restart(60.0, 66.0, true);
        assert_eq!(ramp.state(), RampState::Ramping);

        let mut ramp2 = SetpointRamp::new();
        ramp2.infer_on_restart(60.0, 66.0, false);
        assert_eq!(ramp2.state(), RampState::Inactive);
    }
}
