use serde::{Deserialize, Serialize};

/// Static, immutable-after-load configuration for a single room (spec §3 "Room config").
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct RoomConfig {
    pub id: String,
    pub name: String,
    /// Decimal places used when rendering this room's temperature and when
    /// computing the sensor-noise deadband (`0.5 * 10^-precision`).
    pub precision: u32,
    pub sensors: Vec<SensorSpec>,
    pub trv: TrvSpec,
    pub hysteresis: HysteresisConfig,
    pub valve_bands: ValveBandConfig,
    pub valve_update: ValveUpdateConfig,
    pub smoothing: Option<SmoothingConfig>,
    /// EN 442 ΔT50 rating in watts. Required when boiler load monitoring is enabled.
    pub delta_t50: Option<f32>,
    /// Radiator exponent `n` in the EN 442 formula. Defaults to 1.3 if absent.
    pub radiator_exponent: Option<f32>,
    pub load_sharing: RoomLoadSharingConfig,
}

impl Default for RoomConfig {
    fn default() -> Self {
        RoomConfig {
            id: String::new(),
            name: String::new(),
            precision: 1,
            sensors: Vec::new(),
            trv: TrvSpec::default(),
            hysteresis: HysteresisConfig::default(),
            valve_bands: ValveBandConfig::default(),
            valve_update: ValveUpdateConfig::default(),
            smoothing: None,
            delta_t50: None,
            radiator_exponent: None,
            load_sharing: RoomLoadSharingConfig::default(),
        }
    }
}

impl RoomConfig {
    /// The deadband below which a sensor update is considered noise and must
    /// not by itself trigger a recompute (spec §5 "Cancellation").
    pub fn display_deadband(&self) -> f32 {
        0.5 * 10f32.powi(-(self.precision as i32))
    }

    pub fn radiator_exponent_or_default(&self) -> f32 {
        self.radiator_exponent.unwrap_or(1.3)
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SensorRole {
    Primary,
    Fallback,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SensorSpec {
    pub entity_id: String,
    pub temperature_attribute: Option<String>,
    pub role: SensorRole,
    pub timeout_m: u32,
}

impl Default for SensorSpec {
    fn default() -> Self {
        SensorSpec {
            entity_id: String::new(),
            temperature_attribute: None,
            role: SensorRole::Primary,
            timeout_m: 30,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct TrvSpec {
    /// Entity that accepts an `opening_degree` 0-100 command.
    pub command_entity: String,
    /// Entity that reports the TRV's actual valve feedback position, 0-100.
    pub feedback_entity: String,
    /// The climate setpoint the TRV's own thermostat is locked to (spec §4.10).
    pub locked_setpoint: f32,
}

impl Default for TrvSpec {
    fn default() -> Self {
        TrvSpec {
            command_entity: String::new(),
            feedback_entity: String::new(),
            locked_setpoint: 35.0,
        }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct HysteresisConfig {
    pub on_delta_c: f32,
    pub off_delta_c: f32,
}

impl Default for HysteresisConfig {
    fn default() -> Self {
        HysteresisConfig {
            on_delta_c: 0.3,
            off_delta_c: 0.1,
        }
    }
}

/// Stepped, hysteretic proportional valve-band controller (spec §4.4 step 7).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ValveBandConfig {
    pub band_1_error: Option<f32>,
    pub band_1_percent: Option<u8>,
    pub band_2_error: Option<f32>,
    pub band_2_percent: Option<u8>,
    pub band_max_percent: Option<u8>,
    pub band_0_percent: Option<u8>,
    pub step_hysteresis_c: f32,
}

impl Default for ValveBandConfig {
    fn default() -> Self {
        ValveBandConfig {
            band_1_error: None,
            band_1_percent: None,
            band_2_error: None,
            band_2_percent: None,
            band_max_percent: None,
            band_0_percent: None,
            step_hysteresis_c: 0.1,
        }
    }
}

impl ValveBandConfig {
    /// Apply the cascading defaults from spec §4.4 step 7 and return the four
    /// resolved output percentages `(band_0, band_1, band_2, band_max)`.
    pub fn resolved_percentages(&self) -> (u8, u8, u8, u8) {
        let band_max = self.band_max_percent.unwrap_or(100);
        let band_2 = self.band_2_percent.unwrap_or(band_max);
        let band_1 = self.band_1_percent.unwrap_or(band_2);
        let band_0 = self.band_0_percent.unwrap_or(0);
        (band_0, band_1, band_2, band_max)
    }

    pub fn validate(&self) -> Result<(), String> {
        if let (Some(b1), Some(b2)) = (self.band_1_error, self.band_2_error) {
            if b1 >= b2 {
                return Err(format!(
                    "band_1_error ({b1}) must be less than band_2_error ({b2})"
                ));
            }
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ValveUpdateConfig {
    pub min_interval_s: u32,
}

impl Default for ValveUpdateConfig {
    fn default() -> Self {
        ValveUpdateConfig { min_interval_s: 30 }
    }
}

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SmoothingConfig {
    pub enabled: bool,
    pub alpha: f32,
}

impl Default for SmoothingConfig {
    fn default() -> Self {
        SmoothingConfig {
            enabled: false,
            alpha: 0.3,
        }
    }
}

impl SmoothingConfig {
    pub fn clamped_alpha(&self) -> f32 {
        self.alpha.clamp(0.0, 1.0)
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct RoomLoadSharingConfig {
    pub schedule_lookahead_m: Option<u32>,
    pub fallback_priority: Option<u32>,
}
