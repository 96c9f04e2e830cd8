//! Alert manager (spec §7, supplemented from the Python original's
//! `alert_manager.py`, SPEC_FULL.md §B): debounces N consecutive
//! occurrences before raising, rate-limits per (kind, room) per hour, and
//! auto-clears once the underlying condition resolves.

use chrono::{DateTime, Utc};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AlertKind {
    TrvFeedbackMismatch,
    BoilerControlFailure,
    StateDesync,
    CooldownTimeout,
    SafetyRoomEngaged,
    InterlockFailure,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Alert {
    pub kind: AlertKind,
    pub room: Option<String>,
    pub severity: Severity,
    pub message: String,
    pub first_raised: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct AlertKey {
    kind: AlertKind,
    room: Option<&'static str>,
}

struct Tracked {
    consecutive: u32,
    raised: bool,
    last_raised_at: Option<DateTime<Utc>>,
}

impl Default for Tracked {
    fn default() -> Self {
        Tracked {
            consecutive: 0,
            raised: false,
            last_raised_at: None,
        }
    }
}

/// Debounce threshold: a condition must be observed on this many
/// consecutive calls to `observe` before it is actually raised.
const DEBOUNCE_COUNT: u32 = 3;
const RATE_LIMIT: chrono::Duration = chrono::Duration::hours(1);

pub struct AlertManager {
    tracked: HashMap<(AlertKind, String), Tracked>,
    active: HashMap<(AlertKind, String), Alert>,
}

impl Default for AlertManager {
    fn default() -> Self {
        AlertManager {
            tracked: HashMap::new(),
            active: HashMap::new(),
        }
    }
}

impl AlertManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(kind: AlertKind, room: Option<&str>) -> (AlertKind, String) {
        (kind, room.unwrap_or("").to_string())
    }

    /// Report that `kind` (optionally scoped to `room`) is currently
    /// present this tick. Returns `Some(alert)` the first tick it actually
    /// crosses the debounce threshold (i.e. transitions to raised).
    pub fn observe(
        &mut self,
        kind: AlertKind,
        room: Option<&str>,
        severity: Severity,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Option<Alert> {
        let key = Self::key(kind, room);
        let tracked = self.tracked.entry(key.clone()).or_default();
        tracked.consecutive += 1;

        if tracked.raised {
            return None;
        }
        if tracked.consecutive < DEBOUNCE_COUNT {
            return None;
        }
        if tracked.last_raised_at.is_some_and(|t| now.signed_duration_since(t) < RATE_LIMIT) {
            return None;
        }

        tracked.raised = true;
        tracked.last_raised_at = Some(now);
        let alert = Alert {
            kind,
            room: room.map(str::to_string),
            severity,
            message: message.into(),
            first_raised: now,
        };
        self.active.insert(key, alert.clone());
        Some(alert)
    }

    /// Report that `kind` is no longer present; auto-clears if it was
    /// raised, and always resets the debounce counter.
    pub fn clear(&mut self, kind: AlertKind, room: Option<&str>) -> bool {
        let key = Self::key(kind, room);
        self.tracked.remove(&key);
        self.active.remove(&key).is_some()
    }

    pub fn active_alerts(&self) -> impl Iterator<Item = &Alert> {
        self.active.values()
    }

    pub fn is_active(&self, kind: AlertKind, room: Option<&str>) -> bool {
        self.active.contains_key(&Self::key(kind, room))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time_util::test_utils::utc_datetime;

    #[test]
    fn does_not_raise_before_debounce_threshold() {
        let mut mgr = AlertManager::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        assert!(mgr.observe(AlertKind::TrvFeedbackMismatch, Some("lounge"), Severity::Warning, "mismatch", now).is_none());
        assert!(mgr.observe(AlertKind::TrvFeedbackMismatch, Some("lounge"), Severity::Warning, "mismatch", now).is_none());
        assert!(!mgr.is_active(AlertKind::TrvFeedbackMismatch, Some("lounge")));
    }

    #[test]
    fn raises_after_consecutive_threshold_then_stays_quiet() {
        let mut mgr = AlertManager::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        for _ in 0..2 {
            mgr.observe(AlertKind::TrvFeedbackMismatch, Some("lounge"), Severity::Warning, "mismatch", now);
        }
        let raised = mgr.observe(AlertKind::TrvFeedbackMismatch, Some("lounge"), Severity::Warning, "mismatch", now);
        assert!(raised.is_some());
        assert!(mgr.is_active(AlertKind::TrvFeedbackMismatch, Some("lounge")));

        // Further observations don't re-emit while already raised.
        let again = mgr.observe(AlertKind::TrvFeedbackMismatch, Some("lounge"), Severity::Warning, "mismatch", now);
        assert!(again.is_none());
    }

    #[test]
    fn clear_resets_and_allows_re_raise() {
        let mut mgr = AlertManager::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        for _ in 0..3 {
            mgr.observe(AlertKind::StateDesync, None, Severity::Warning, "desync", now);
        }
        assert!(mgr.is_active(AlertKind::StateDesync, None));
        assert!(mgr.clear(AlertKind::StateDesync, None));
        assert!(!mgr.is_active(AlertKind::StateDesync, None));
    }

    #[test]
    fn rooms_are_tracked_independently() {
        let mut mgr = AlertManager::new();
        let now = utc_datetime(2024, 1, 1, 10, 0, 0);
        for _ in 0..3 {
            mgr.observe(AlertKind::TrvFeedbackMismatch, Some("lounge"), Severity::Warning, "m", now);
        }
        assert!(mgr.is_active(AlertKind::TrvFeedbackMismatch, Some("lounge")));
        assert!(!mgr.is_active(AlertKind::TrvFeedbackMismatch, Some("kitchen")));
    }
}
