//! In-memory [`Bridge`] used by tests and local/offline runs, grounded on
//! `io::dummy::DummyAllOutputs`: a plain struct behind a mutex standing in
//! for the real home-automation connection.

use super::{Bridge, HistoryRecord, ServiceHandler, StateListener, TimerHandle};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

#[derive(Clone, Debug, Default)]
struct EntityState {
    state: String,
    attributes: HashMap<String, Value>,
}

#[derive(Default)]
pub struct DummyBridge {
    entities: Mutex<HashMap<String, EntityState>>,
    history: Mutex<HashMap<String, Vec<HistoryRecord>>>,
    service_calls: Mutex<Vec<(String, HashMap<String, Value>)>>,
    timer_seq: AtomicU64,
}

impl DummyBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test/bootstrap helper: seed an entity's starting state directly,
    /// without going through `set_state`'s history-recording path.
    pub fn seed(&self, entity: &str, state: &str) {
        self.entities.lock().unwrap().insert(
            entity.to_string(),
            EntityState {
                state: state.to_string(),
                attributes: HashMap::new(),
            },
        );
    }

    pub fn service_calls(&self) -> Vec<(String, HashMap<String, Value>)> {
        self.service_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Bridge for DummyBridge {
    async fn get_state(&self, entity: &str) -> Option<String> {
        self.entities.lock().unwrap().get(entity).map(|e| e.state.clone())
    }

    async fn get_attribute(&self, entity: &str, attribute: &str) -> Option<String> {
        self.entities
            .lock()
            .unwrap()
            .get(entity)
            .and_then(|e| e.attributes.get(attribute))
            .map(|v| v.to_string())
    }

    async fn entity_exists(&self, entity: &str) -> bool {
        self.entities.lock().unwrap().contains_key(entity)
    }

    async fn set_state(
        &self,
        entity: &str,
        state: &str,
        attributes: HashMap<String, Value>,
        replace: bool,
    ) {
        let mut entities = self.entities.lock().unwrap();
        let entry = entities.entry(entity.to_string()).or_default();
        entry.state = state.to_string();
        if replace {
            entry.attributes = attributes;
        } else {
            entry.attributes.extend(attributes);
        }
        self.history
            .lock()
            .unwrap()
            .entry(entity.to_string())
            .or_default()
            .push(HistoryRecord {
                at: Utc::now(),
                state: state.to_string(),
            });
    }

    async fn call_service(&self, domain_service: &str, kwargs: HashMap<String, Value>) {
        self.service_calls
            .lock()
            .unwrap()
            .push((domain_service.to_string(), kwargs));
    }

    fn register_endpoint(&self, _name: &str, _handler: ServiceHandler) {
        // No HTTP surface of its own; the real endpoint lives in `http::mod`.
    }

    fn register_service(&self, _name: &str, _handler: ServiceHandler) {
        // Nothing to wire up for the in-memory dummy.
    }

    fn listen_state(&self, _entity: &str, _handler: StateListener) {
        // The dummy has no event loop; tests drive state changes directly.
    }

    async fn run_every(&self, name: &str, _start: DateTime<Utc>, _interval_s: u64) -> TimerHandle {
        let id = self.timer_seq.fetch_add(1, Ordering::Relaxed);
        TimerHandle(format!("{name}-{id}"))
    }

    async fn run_in(&self, name: &str, _seconds: u64) -> TimerHandle {
        let id = self.timer_seq.fetch_add(1, Ordering::Relaxed);
        TimerHandle(format!("{name}-{id}"))
    }

    async fn cancel_timer(&self, _handle: TimerHandle) {}

    async fn get_history(&self, entity: &str, start: DateTime<Utc>, end: DateTime<Utc>) -> Vec<HistoryRecord> {
        self.history
            .lock()
            .unwrap()
            .get(entity)
            .map(|records| records.iter().filter(|r| r.at >= start && r.at <= end).cloned().collect())
            .unwrap_or_default()
    }
}
