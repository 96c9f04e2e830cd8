use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The runtime heating mode a schedule block (or day default) resolves to.
/// Distinct from the user-selected [`crate::schedule::RoomMode`] (spec GLOSSARY).
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OperatingMode {
    Active,
    Passive,
}

/// One ordered block within a day's schedule (spec §3 "Schedule").
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct ScheduleBlock {
    pub start: NaiveTime,
    /// `23:59` is treated as the half-open "24:00" end of day.
    pub end: NaiveTime,
    pub target: f32,
    pub mode: Option<OperatingMode>,
    pub valve_percent: Option<u8>,
    pub min_target: Option<f32>,
}

impl ScheduleBlock {
    /// `23:59` is a sentinel for "24:00", the half-open end of the day, so a
    /// block ending there contains every remaining time of day.
    fn end_of_day_sentinel() -> NaiveTime {
        NaiveTime::from_hms_opt(23, 59, 0).expect("23:59:00 must be a valid time")
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.end == Self::end_of_day_sentinel() {
            self.start <= time
        } else {
            self.start <= time && time < self.end
        }
    }
}

pub type Day = chrono::Weekday;

/// A single room's mutable weekly schedule.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct RoomSchedule {
    pub default_target: f32,
    pub default_mode: OperatingMode,
    pub default_valve_percent: Option<u8>,
    pub default_min_temp: Option<f32>,
    #[serde(with = "day_map")]
    pub days: HashMap<Day, Vec<ScheduleBlock>>,
}

impl Default for RoomSchedule {
    fn default() -> Self {
        RoomSchedule {
            default_target: 18.0,
            default_mode: OperatingMode::Active,
            default_valve_percent: None,
            default_min_temp: None,
            days: HashMap::new(),
        }
    }
}

impl RoomSchedule {
    pub fn blocks_for(&self, day: Day) -> &[ScheduleBlock] {
        self.days.get(&day).map(|v| v.as_slice()).unwrap_or(&[])
    }

    /// Validate the non-overlap / ordering invariants from spec §3.
    pub fn validate(&self) -> Result<(), String> {
        for (day, blocks) in &self.days {
            let mut prev_end: Option<NaiveTime> = None;
            let mut sorted = blocks.clone();
            sorted.sort_by_key(|b| b.start);
            for block in &sorted {
                if block.start >= block.end && block.end != NaiveTime::from_hms_opt(23, 59, 0).unwrap() {
                    return Err(format!(
                        "{day:?}: block start {} must be before end {}",
                        block.start, block.end
                    ));
                }
                if let Some(prev) = prev_end {
                    if block.start < prev {
                        return Err(format!(
                            "{day:?}: overlapping schedule blocks around {}",
                            block.start
                        ));
                    }
                }
                prev_end = Some(block.end);
            }
        }
        Ok(())
    }
}

/// Serializes the weekday map as a `mon`..`sun` string-keyed YAML map, matching
/// how the rest of the pack's config loaders prefer plain string keys.
mod day_map {
    use super::{Day, ScheduleBlock};
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        map: &HashMap<Day, Vec<ScheduleBlock>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let as_strings: HashMap<String, &Vec<ScheduleBlock>> = map
            .iter()
            .map(|(day, blocks)| (day_name(*day).to_string(), blocks))
            .collect();
        as_strings.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<Day, Vec<ScheduleBlock>>, D::Error> {
        let raw: HashMap<String, Vec<ScheduleBlock>> = HashMap::deserialize(deserializer)?;
        raw.into_iter()
            .map(|(name, blocks)| {
                day_from_name(&name)
                    .map(|day| (day, blocks))
                    .ok_or_else(|| D::Error::custom(format!("unknown weekday '{name}'")))
            })
            .collect()
    }

    fn day_name(day: Day) -> &'static str {
        match day {
            Day::Mon => "mon",
            Day::Tue => "tue",
            Day::Wed => "wed",
            Day::Thu => "thu",
            Day::Fri => "fri",
            Day::Sat => "sat",
            Day::Sun => "sun",
        }
    }

    fn day_from_name(name: &str) -> Option<Day> {
        Some(match name.to_ascii_lowercase().as_str() {
            "mon" | "monday" => Day::Mon,
            "tue" | "tuesday" => Day::Tue,
            "wed" | "wednesday" => Day::Wed,
            "thu" | "thursday" => Day::Thu,
            "fri" | "friday" => Day::Fri,
            "sat" | "saturday" => Day::Sat,
            "sun" | "sunday" => Day::Sun,
            _ => return None,
        })
    }
}
