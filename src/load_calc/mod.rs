//! EN 442 radiator capacity estimator (spec §4.8).
//!
//! Estimates are explicitly documented as ±20-30% accurate; they exist only
//! to compare against a threshold, never to drive a precise control law.

/// `P = P50 * ((mean_water_temp - room_temp) / 50) ^ n`, with
/// `mean_water_temp = baseline_setpoint - system_delta_t / 2`.
pub fn radiator_capacity_w(
    delta_t50_w: f32,
    radiator_exponent: f32,
    baseline_setpoint_c: f32,
    system_delta_t_c: f32,
    room_temp_c: f32,
) -> f32 {
    let mean_water_temp = baseline_setpoint_c - system_delta_t_c / 2.0;
    let delta = (mean_water_temp - room_temp_c) / 50.0;
    if delta <= 0.0 {
        return 0.0;
    }
    delta_t50_w * delta.powf(radiator_exponent)
}
