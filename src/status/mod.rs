//! Status publisher (spec §6 "Published entities"): pushes the derived
//! control state out to bridge-owned entities every recompute. Grounded on
//! the entity-publish idiom of `brain::boost_active_rooms::mod.rs` (compute
//! once, then fire a batch of `set_state` calls, one entity per fact).

use crate::bridge::Bridge;
use crate::boiler::BoilerState;
use crate::load_sharing::RoomCandidate;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Entity id prefix every published entity shares, e.g. `heating` yields
/// `sensor.heating_status`, `sensor.heating_lounge_temperature`, etc.
const PREFIX: &str = "heating";

pub struct StatusPublisher {
    bridge: Arc<dyn Bridge>,
}

impl StatusPublisher {
    pub fn new(bridge: Arc<dyn Bridge>) -> Self {
        StatusPublisher { bridge }
    }

    /// One full publish pass (spec §6 "Published entities"): the system-wide
    /// status bag, the system calling/cooldown flags, and the per-room set.
    #[allow(clippy::too_many_arguments)]
    pub async fn publish(
        &self,
        now: DateTime<Utc>,
        boiler_state: BoilerState,
        flame_on: bool,
        cooldown_active: bool,
        candidates: &[RoomCandidate],
        room_temps: &HashMap<String, Option<f32>>,
        room_targets: &HashMap<String, f32>,
        valve_percent: &HashMap<String, u8>,
        passive_max_temp: &HashMap<String, f32>,
    ) {
        let any_calling = candidates.iter().any(|c| c.calling);

        let mut attributes = HashMap::new();
        attributes.insert("boiler_state".to_string(), Value::String(format!("{boiler_state:?}")));
        attributes.insert("flame_on".to_string(), Value::Bool(flame_on));
        attributes.insert(
            "calling_rooms".to_string(),
            Value::Array(
                candidates
                    .iter()
                    .filter(|c| c.calling)
                    .map(|c| Value::String(c.id.clone()))
                    .collect(),
            ),
        );
        attributes.insert("updated_at".to_string(), Value::String(now.to_rfc3339()));
        self.bridge
            .set_state(&format!("sensor.{PREFIX}_status"), "ok", attributes, true)
            .await;

        self.bridge
            .set_state(
                &format!("binary_sensor.{PREFIX}_calling_for_heat"),
                if any_calling { "on" } else { "off" },
                HashMap::new(),
                true,
            )
            .await;
        self.bridge
            .set_state(
                &format!("binary_sensor.{PREFIX}_cooldown_active"),
                if cooldown_active { "on" } else { "off" },
                HashMap::new(),
                true,
            )
            .await;

        for candidate in candidates {
            let room = &candidate.id;

            self.bridge
                .set_state(
                    &format!("binary_sensor.{PREFIX}_{room}_calling_for_heat"),
                    if candidate.calling { "on" } else { "off" },
                    HashMap::new(),
                    true,
                )
                .await;

            if let Some(Some(temp)) = room_temps.get(room) {
                self.bridge
                    .set_state(
                        &format!("sensor.{PREFIX}_{room}_temperature"),
                        &format!("{temp:.1}"),
                        HashMap::new(),
                        true,
                    )
                    .await;
            }

            if let Some(target) = room_targets.get(room) {
                self.bridge
                    .set_state(
                        &format!("sensor.{PREFIX}_{room}_target"),
                        &format!("{target:.1}"),
                        HashMap::new(),
                        true,
                    )
                    .await;
            }

            if let Some(pct) = valve_percent.get(room) {
                self.bridge
                    .set_state(
                        &format!("sensor.{PREFIX}_{room}_valve_percent"),
                        &pct.to_string(),
                        HashMap::new(),
                        true,
                    )
                    .await;
            }

            self.bridge
                .set_state(
                    &format!("sensor.{PREFIX}_{room}_state"),
                    if candidate.calling { "calling" } else { "idle" },
                    HashMap::new(),
                    true,
                )
                .await;

            if let Some(max_temp) = passive_max_temp.get(room) {
                self.bridge
                    .set_state(
                        &format!("sensor.{PREFIX}_{room}_passive_max_temp"),
                        &format!("{max_temp:.1}"),
                        HashMap::new(),
                        true,
                    )
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::dummy::DummyBridge;
    use crate::schedule::RoomMode;
    use crate::time_util::test_utils::utc_datetime;

    #[tokio::test]
    async fn publishes_system_and_per_room_entities() {
        let bridge = Arc::new(DummyBridge::new());
        let publisher = StatusPublisher::new(bridge.clone());
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);

        let candidates = vec![RoomCandidate {
            id: "lounge".to_string(),
            mode: RoomMode::Auto,
            calling: true,
            temp: Some(19.5),
            current_valve_percent: 40,
            capacity_at_100_w: 1200.0,
            off_delta_c: 0.3,
            next_schedule_change: None,
            schedule_lookahead_m: None,
            fallback_priority: None,
            passive_max_temp: None,
        }];
        let mut room_temps = HashMap::new();
        room_temps.insert("lounge".to_string(), Some(19.5));
        let mut room_targets = HashMap::new();
        room_targets.insert("lounge".to_string(), 20.0);
        let mut valve_percent = HashMap::new();
        valve_percent.insert("lounge".to_string(), 40u8);

        publisher
            .publish(
                now,
                BoilerState::On,
                true,
                false,
                &candidates,
                &room_temps,
                &room_targets,
                &valve_percent,
                &HashMap::new(),
            )
            .await;

        assert_eq!(bridge.get_state("sensor.heating_status").await, Some("ok".to_string()));
        assert_eq!(
            bridge.get_state("binary_sensor.heating_lounge_calling_for_heat").await,
            Some("on".to_string())
        );
        assert_eq!(bridge.get_state("sensor.heating_lounge_temperature").await, Some("19.5".to_string()));
        assert_eq!(bridge.get_state("sensor.heating_lounge_valve_percent").await, Some("40".to_string()));
    }
}
