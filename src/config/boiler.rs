use serde::Deserialize;
use serde_with::serde_as;
use serde_with::DurationSeconds;
use std::time::Duration;

#[serde_as]
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BoilerConfig {
    pub entity_id: String,
    /// The flow setpoint commanded while the boiler is on and nothing
    /// (ramp, cooldown) is overriding it. The ramp escalates up from this;
    /// cooldown recovery returns to it.
    pub base_flow_setpoint_c: f32,
    #[serde_as(as = "DurationSeconds")]
    pub pump_overrun_s: Duration,
    pub anti_cycling: AntiCyclingConfig,
    pub interlock: InterlockConfig,
    pub safety_room: Option<String>,
    pub load_monitoring: LoadMonitoringConfig,
    pub load_sharing: BoilerLoadSharingConfig,
    pub setpoint_ramp: SetpointRampConfig,
    pub cooldown: CooldownConfig,
}

impl Default for BoilerConfig {
    fn default() -> Self {
        BoilerConfig {
            entity_id: String::new(),
            base_flow_setpoint_c: 60.0,
            pump_overrun_s: Duration::from_secs(60),
            anti_cycling: AntiCyclingConfig::default(),
            interlock: InterlockConfig::default(),
            safety_room: None,
            load_monitoring: LoadMonitoringConfig::default(),
            load_sharing: BoilerLoadSharingConfig::default(),
            setpoint_ramp: SetpointRampConfig::default(),
            cooldown: CooldownConfig::default(),
        }
    }
}

#[serde_as]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct AntiCyclingConfig {
    #[serde_as(as = "DurationSeconds")]
    pub min_on_time_s: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub min_off_time_s: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub off_delay_s: Duration,
}

impl Default for AntiCyclingConfig {
    fn default() -> Self {
        AntiCyclingConfig {
            min_on_time_s: Duration::from_secs(5 * 60),
            min_off_time_s: Duration::from_secs(5 * 60),
            off_delay_s: Duration::from_secs(90),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct InterlockConfig {
    pub min_valve_open_percent: u32,
}

impl Default for InterlockConfig {
    fn default() -> Self {
        InterlockConfig {
            min_valve_open_percent: 40,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoadMonitoringConfig {
    pub enabled: bool,
    pub system_delta_t: f32,
    pub radiator_exponent: f32,
}

impl Default for LoadMonitoringConfig {
    fn default() -> Self {
        LoadMonitoringConfig {
            enabled: false,
            system_delta_t: 10.0,
            radiator_exponent: 1.3,
        }
    }
}

#[serde_as]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct BoilerLoadSharingConfig {
    pub min_calling_capacity_w: f32,
    /// Added on top of `min_calling_capacity_w` to get the escalation
    /// stopping point, so the manager doesn't hover right at the trigger
    /// threshold and flap back into the entry condition next tick.
    pub target_capacity_margin_w: f32,
    pub high_return_delta_c: f32,
    pub lookahead_multiplier: f32,
    #[serde_as(as = "DurationSeconds")]
    pub min_activation_duration_s: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub fallback_timeout_s: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub fallback_cooldown_s: Duration,
    pub mode: LoadSharingMode,
    pub initial_valve_percent: u8,
    pub escalation_step_percent: u8,
}

impl Default for BoilerLoadSharingConfig {
    fn default() -> Self {
        BoilerLoadSharingConfig {
            min_calling_capacity_w: 3500.0,
            target_capacity_margin_w: 500.0,
            high_return_delta_c: 5.0,
            lookahead_multiplier: 1.0,
            min_activation_duration_s: Duration::from_secs(10 * 60),
            fallback_timeout_s: Duration::from_secs(45 * 60),
            fallback_cooldown_s: Duration::from_secs(60 * 60),
            mode: LoadSharingMode::Balanced,
            initial_valve_percent: 50,
            escalation_step_percent: 10,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LoadSharingMode {
    Off,
    Conservative,
    Balanced,
    Aggressive,
}

#[serde_as]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SetpointRampConfig {
    pub enabled: bool,
    pub delta_trigger_c: f32,
    pub delta_increase_c: f32,
    pub max_setpoint_c: f32,
}

impl Default for SetpointRampConfig {
    fn default() -> Self {
        SetpointRampConfig {
            enabled: true,
            delta_trigger_c: 2.0,
            delta_increase_c: 2.0,
            max_setpoint_c: 70.0,
        }
    }
}

#[serde_as]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CooldownConfig {
    pub high_delta_c: f32,
    pub recovery_delta_c: f32,
    pub recovery_min_c: f32,
    #[serde_as(as = "DurationSeconds")]
    pub recovery_interval_s: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub max_duration_s: Duration,
    #[serde_as(as = "DurationSeconds")]
    pub sensor_settle_delay_s: Duration,
    pub forced_setpoint_c: f32,
    pub excessive_cycling_threshold: u32,
    #[serde_as(as = "DurationSeconds")]
    pub excessive_cycling_window_s: Duration,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        CooldownConfig {
            high_delta_c: 5.0,
            recovery_delta_c: 10.0,
            recovery_min_c: 30.0,
            recovery_interval_s: Duration::from_secs(60),
            max_duration_s: Duration::from_secs(30 * 60),
            sensor_settle_delay_s: Duration::from_secs(2),
            forced_setpoint_c: 30.0,
            excessive_cycling_threshold: 3,
            excessive_cycling_window_s: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SystemConfig {
    pub frost_protection_temp_c: f32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        SystemConfig {
            frost_protection_temp_c: 7.0,
        }
    }
}

impl SystemConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(5.0..=15.0).contains(&self.frost_protection_temp_c) {
            return Err(format!(
                "frost_protection_temp_c ({}) must be within [5, 15]",
                self.frost_protection_temp_c
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct BoilerFile {
    pub boiler: BoilerConfig,
    pub system: SystemConfig,
}
