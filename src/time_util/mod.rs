pub mod mytime;
pub mod timeslot;

#[cfg(test)]
pub mod test_utils;

/// Converts a config-level `std::time::Duration` (as produced by
/// `serde_with::DurationSeconds`) into the `chrono::Duration` the rest of
/// the core does its arithmetic in.
pub fn chrono_duration(duration: std::time::Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero())
}
