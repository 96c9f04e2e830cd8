//! The external home-automation bridge (spec §6 "Bridge capability set").
//!
//! Modelled on the teacher's `io::IOBundle` plus `io::wiser::WiserManager`:
//! a thin `#[async_trait]` surface the core depends on, with a single
//! in-process `dummy` implementation used for tests and local runs. Any
//! host providing this trait can drive the core; the home-automation
//! platform itself is out of scope (spec §1 Non-goals).

pub mod dummy;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// Opaque identity of a bridge-owned timer (spec §9 "Timers as external
/// resources" — the core keeps only the identity, never the countdown).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub String);

impl fmt::Display for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of `get_history` (spec §6).
#[derive(Clone, Debug, PartialEq)]
pub struct HistoryRecord {
    pub at: DateTime<Utc>,
    pub state: String,
}

/// Callback registered via `listen_state`: entity id, old state, new state.
pub type StateListener = Box<dyn Fn(&str, Option<&str>, Option<&str>) + Send + Sync>;
/// Callback registered via `register_service`: kwargs in, nothing back (the
/// core's services report success/failure through `set_state`/logging, the
/// way the teacher's services behave).
pub type ServiceHandler = Box<dyn Fn(HashMap<String, Value>) + Send + Sync>;

/// The full surface the core needs to run headless (spec §6). `set_state`
/// and `call_service` are fire-and-forget per spec §5 ("the core never
/// blocks on I/O"); everything else is a synchronous read against the
/// bridge's in-memory cache or registration of a callback the bridge will
/// invoke later.
#[async_trait]
pub trait Bridge: Send + Sync {
    async fn get_state(&self, entity: &str) -> Option<String>;
    async fn get_attribute(&self, entity: &str, attribute: &str) -> Option<String>;
    async fn entity_exists(&self, entity: &str) -> bool;

    async fn set_state(
        &self,
        entity: &str,
        state: &str,
        attributes: HashMap<String, Value>,
        replace: bool,
    );

    async fn call_service(&self, domain_service: &str, kwargs: HashMap<String, Value>);

    fn register_endpoint(&self, name: &str, handler: ServiceHandler);
    fn register_service(&self, name: &str, handler: ServiceHandler);
    fn listen_state(&self, entity: &str, handler: StateListener);

    async fn run_every(&self, name: &str, start: DateTime<Utc>, interval_s: u64) -> TimerHandle;
    async fn run_in(&self, name: &str, seconds: u64) -> TimerHandle;
    async fn cancel_timer(&self, handle: TimerHandle);

    async fn get_history(&self, entity: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<HistoryRecord>;

    fn log_info(&self, message: &str) {
        log::info!(target: "bridge", "{message}");
    }

    fn log_error(&self, message: &str) {
        log::error!(target: "bridge", "{message}");
    }
}
