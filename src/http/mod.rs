//! Service / HTTP surface (spec §6): the operations a UI or automation calls
//! to read the controller's state and push overrides/mode/schedule changes
//! into it. Every write ends with a recompute, mirroring `core::Controller`'s
//! own rule that a recompute follows every external input (spec §5).
//!
//! The bridge abstraction (spec §6 "Bridge capability set") is deliberately
//! separate from this: `Bridge::register_endpoint`/`register_service` model
//! a home-automation platform's own service registry, while this module is
//! the daemon's first-class HTTP surface, built with `axum` the way the rest
//! of the pack reaches for it for a service surface.

use crate::config::schedule::RoomSchedule;
use crate::config::DomainConfig;
use crate::core::Controller;
use crate::overrides::OverrideError;
use crate::schedule::{PassiveSettings, RoomMode};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub type SharedController = Arc<Mutex<Controller>>;

pub fn router(controller: SharedController) -> Router {
    Router::new()
        .route("/override", post(override_active))
        .route("/override_passive", post(override_passive))
        .route("/cancel_override", post(cancel_override))
        .route("/set_mode", post(set_mode))
        .route("/set_passive_settings", post(set_passive_settings))
        .route("/set_default_target", post(set_default_target))
        .route("/replace_schedules", post(replace_schedules))
        .route("/reload_config", post(reload_config))
        .route("/rooms", get(get_rooms))
        .route("/schedules", get(get_schedules))
        .route("/status", get(get_status))
        .route("/settings", get(get_settings).post(set_settings))
        .with_state(controller)
}

fn ok() -> Response {
    (StatusCode::OK, Json(json!({"success": true}))).into_response()
}

fn ok_with(extra: serde_json::Value) -> Response {
    let mut body = json!({"success": true});
    if let (Some(obj), serde_json::Value::Object(extra)) = (body.as_object_mut(), extra) {
        obj.extend(extra);
    }
    (StatusCode::OK, Json(body)).into_response()
}

fn err(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({"success": false, "error": message.into()}))).into_response()
}

fn override_error_message(e: OverrideError) -> &'static str {
    match e {
        OverrideError::TargetOutOfRange => "target out of range",
        OverrideError::PassiveRangeInvalid => "min must be <= max - 0.5, min in [8,20], max in [10,30]",
        OverrideError::DurationNotPositive => "duration must be positive / end_time must be in the future",
    }
}

/// `minutes`/`end_time`: exactly one must be set (spec §4.3/§6).
fn resolve_deadline(minutes: Option<i64>, end_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Result<DateTime<Utc>, &'static str> {
    match (minutes, end_time) {
        (Some(m), None) => Ok(now + Duration::minutes(m)),
        (None, Some(e)) => Ok(e),
        _ => Err("exactly one of minutes/end_time must be set"),
    }
}

async fn trigger(state: &SharedController, reason: &str, now: DateTime<Utc>) {
    let mut controller = state.lock().await;
    controller.trigger_recompute(reason, now).await;
}

#[derive(Deserialize)]
pub struct OverrideRequest {
    room: String,
    target: Option<f32>,
    delta: Option<f32>,
    minutes: Option<i64>,
    end_time: Option<DateTime<Utc>>,
}

/// `override(room, target|delta, minutes|end_time)` (spec §6).
async fn override_active(State(state): State<SharedController>, Json(req): Json<OverrideRequest>) -> Response {
    let now = Utc::now();
    let mut controller = state.lock().await;

    let target = match (req.target, req.delta) {
        (Some(t), None) => t,
        (None, Some(d)) => {
            if !(-10.0..=10.0).contains(&d) {
                return err(StatusCode::BAD_REQUEST, "delta must be in [-10,10]");
            }
            let frost = controller.domain().system.frost_protection_temp_c;
            match controller.schedule().resolve_target(&req.room, now, controller.overrides(), frost) {
                Some(resolved) => resolved.target + d,
                None => return err(StatusCode::BAD_REQUEST, "no resolvable scheduled target to apply delta against"),
            }
        }
        _ => return err(StatusCode::BAD_REQUEST, "exactly one of target/delta must be set"),
    };
    let deadline = match resolve_deadline(req.minutes, req.end_time, now) {
        Ok(d) => d,
        Err(msg) => return err(StatusCode::BAD_REQUEST, msg),
    };

    match controller.overrides_mut().set_active(&req.room, target, deadline, now) {
        Ok(()) => {
            drop(controller);
            trigger(&state, "http override", now).await;
            ok()
        }
        Err(e) => err(StatusCode::BAD_REQUEST, override_error_message(e)),
    }
}

#[derive(Deserialize)]
pub struct OverridePassiveRequest {
    room: String,
    min_temp: f32,
    max_temp: f32,
    valve_percent: u8,
    minutes: Option<i64>,
    end_time: Option<DateTime<Utc>>,
}

/// `override_passive(...)` — only valid when the room is in `auto` (spec §6).
async fn override_passive(State(state): State<SharedController>, Json(req): Json<OverridePassiveRequest>) -> Response {
    let now = Utc::now();
    let mut controller = state.lock().await;

    if controller.schedule().mode(&req.room) != RoomMode::Auto {
        return err(StatusCode::BAD_REQUEST, "room must be in auto mode for a passive override");
    }
    let deadline = match resolve_deadline(req.minutes, req.end_time, now) {
        Ok(d) => d,
        Err(msg) => return err(StatusCode::BAD_REQUEST, msg),
    };

    match controller
        .overrides_mut()
        .set_passive(&req.room, req.min_temp, req.max_temp, req.valve_percent, deadline, now)
    {
        Ok(()) => {
            drop(controller);
            trigger(&state, "http override_passive", now).await;
            ok()
        }
        Err(e) => err(StatusCode::BAD_REQUEST, override_error_message(e)),
    }
}

#[derive(Deserialize)]
pub struct RoomRequest {
    room: String,
}

async fn cancel_override(State(state): State<SharedController>, Json(req): Json<RoomRequest>) -> Response {
    let now = Utc::now();
    {
        let mut controller = state.lock().await;
        controller.overrides_mut().cancel(&req.room);
    }
    trigger(&state, "http cancel_override", now).await;
    ok()
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ModeParam {
    Auto,
    Manual,
    Passive,
    Off,
}

impl From<ModeParam> for RoomMode {
    fn from(m: ModeParam) -> Self {
        match m {
            ModeParam::Auto => RoomMode::Auto,
            ModeParam::Manual => RoomMode::Manual,
            ModeParam::Passive => RoomMode::Passive,
            ModeParam::Off => RoomMode::Off,
        }
    }
}

#[derive(Deserialize)]
pub struct SetModeRequest {
    room: String,
    mode: ModeParam,
    manual_setpoint: Option<f32>,
}

async fn set_mode(State(state): State<SharedController>, Json(req): Json<SetModeRequest>) -> Response {
    let now = Utc::now();
    let mode: RoomMode = req.mode.into();
    if mode == RoomMode::Manual && req.manual_setpoint.is_none() {
        return err(StatusCode::BAD_REQUEST, "manual mode requires manual_setpoint");
    }
    {
        let mut controller = state.lock().await;
        controller.schedule_mut().set_mode(&req.room, mode, req.manual_setpoint);
    }
    trigger(&state, "http set_mode", now).await;
    ok()
}

#[derive(Deserialize)]
pub struct SetPassiveSettingsRequest {
    room: String,
    max_temp: f32,
    valve_pct: u8,
    min_temp: f32,
}

async fn set_passive_settings(State(state): State<SharedController>, Json(req): Json<SetPassiveSettingsRequest>) -> Response {
    let now = Utc::now();
    if let Err(e) = crate::overrides::OverrideStore::validate_passive_range(req.min_temp, req.max_temp) {
        return err(StatusCode::BAD_REQUEST, override_error_message(e));
    }
    {
        let mut controller = state.lock().await;
        controller.schedule_mut().set_passive_settings(
            &req.room,
            PassiveSettings {
                max_temp: req.max_temp,
                valve_pct: req.valve_pct.min(100),
                min_temp: req.min_temp,
            },
        );
    }
    trigger(&state, "http set_passive_settings", now).await;
    ok()
}

#[derive(Deserialize)]
pub struct SetDefaultTargetRequest {
    room: String,
    target: f32,
}

/// `set_default_target(room, target)` — rewrites `schedules.yaml` (spec §6).
async fn set_default_target(State(state): State<SharedController>, Json(req): Json<SetDefaultTargetRequest>) -> Response {
    let now = Utc::now();
    {
        let mut controller = state.lock().await;
        if let Err(e) = controller.schedule_mut().set_default_target(&req.room, req.target) {
            return err(StatusCode::BAD_REQUEST, e);
        }
        if let Err(e) = persist_schedules(&controller) {
            log::error!(target: "http", "Failed to persist schedules.yaml: {e}");
        }
    }
    trigger(&state, "http set_default_target", now).await;
    ok()
}

#[derive(Deserialize)]
pub struct ReplaceSchedulesRequest {
    schedules: HashMap<String, RoomSchedule>,
}

/// `replace_schedules(schedule)` — atomic whole-file rewrite + reload (spec §6).
async fn replace_schedules(State(state): State<SharedController>, Json(req): Json<ReplaceSchedulesRequest>) -> Response {
    let now = Utc::now();
    {
        let mut controller = state.lock().await;
        controller.schedule_mut().replace_all(req.schedules);
        if let Err(e) = persist_schedules(&controller) {
            log::error!(target: "http", "Failed to persist schedules.yaml: {e}");
        }
    }
    trigger(&state, "http replace_schedules", now).await;
    ok()
}

fn persist_schedules(controller: &Controller) -> std::io::Result<()> {
    let yaml = serde_yaml::to_string(controller.schedule().all_schedules())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    let path = &controller.daemon().schedules_file;
    let tmp = path.with_extension("yaml.tmp");
    std::fs::write(&tmp, yaml)?;
    std::fs::rename(&tmp, path)
}

/// `reload_config()` — re-reads `rooms.yaml`/`schedules.yaml`/`boiler.yaml`,
/// leaving the previous config in place on failure (spec §6).
async fn reload_config(State(state): State<SharedController>) -> Response {
    let now = Utc::now();
    let result = {
        let mut controller = state.lock().await;
        controller.reload_config()
    };
    match result {
        Ok(()) => {
            trigger(&state, "http reload_config", now).await;
            ok()
        }
        Err(e) => err(StatusCode::INTERNAL_SERVER_ERROR, e),
    }
}

async fn get_rooms(State(state): State<SharedController>) -> Response {
    let controller = state.lock().await;
    ok_with(json!({"rooms": controller.domain().rooms}))
}

async fn get_schedules(State(state): State<SharedController>) -> Response {
    let controller = state.lock().await;
    ok_with(json!({"schedules": controller.schedule().all_schedules()}))
}

#[derive(Serialize)]
struct RoomStatus {
    room: String,
    mode: String,
    target: Option<f32>,
    valve_percent: u8,
}

async fn get_status(State(state): State<SharedController>) -> Response {
    let controller = state.lock().await;
    let now = Utc::now();
    let frost = controller.domain().system.frost_protection_temp_c;

    let rooms: Vec<RoomStatus> = controller
        .domain()
        .rooms
        .iter()
        .map(|room| {
            let resolved = controller.schedule().resolve_target(&room.id, now, controller.overrides(), frost);
            RoomStatus {
                room: room.id.clone(),
                mode: format!("{:?}", controller.schedule().mode(&room.id)),
                target: resolved.map(|r| r.target),
                valve_percent: controller.current_valve_commands().get(&room.id).copied().unwrap_or(0),
            }
        })
        .collect();

    ok_with(json!({"rooms": rooms}))
}

/// The tunable thresholds exposed for runtime inspection/adjustment without a
/// full config reload (spec SPEC_FULL.md "Settings endpoint"), bounded to the
/// same ranges validated at config load.
#[derive(Serialize, Deserialize, Default)]
pub struct SettingsPatch {
    interlock_min_valve_open_percent: Option<u32>,
    cooldown_high_delta_c: Option<f32>,
    cooldown_recovery_delta_c: Option<f32>,
    cooldown_recovery_min_c: Option<f32>,
    cooldown_forced_setpoint_c: Option<f32>,
    ramp_delta_trigger_c: Option<f32>,
    ramp_delta_increase_c: Option<f32>,
    ramp_max_setpoint_c: Option<f32>,
    load_sharing_min_calling_capacity_w: Option<f32>,
    load_sharing_target_capacity_margin_w: Option<f32>,
    load_sharing_high_return_delta_c: Option<f32>,
}

fn settings_snapshot(domain: &DomainConfig) -> SettingsPatch {
    let b = &domain.boiler;
    SettingsPatch {
        interlock_min_valve_open_percent: Some(b.interlock.min_valve_open_percent),
        cooldown_high_delta_c: Some(b.cooldown.high_delta_c),
        cooldown_recovery_delta_c: Some(b.cooldown.recovery_delta_c),
        cooldown_recovery_min_c: Some(b.cooldown.recovery_min_c),
        cooldown_forced_setpoint_c: Some(b.cooldown.forced_setpoint_c),
        ramp_delta_trigger_c: Some(b.setpoint_ramp.delta_trigger_c),
        ramp_delta_increase_c: Some(b.setpoint_ramp.delta_increase_c),
        ramp_max_setpoint_c: Some(b.setpoint_ramp.max_setpoint_c),
        load_sharing_min_calling_capacity_w: Some(b.load_sharing.min_calling_capacity_w),
        load_sharing_target_capacity_margin_w: Some(b.load_sharing.target_capacity_margin_w),
        load_sharing_high_return_delta_c: Some(b.load_sharing.high_return_delta_c),
    }
}

async fn get_settings(State(state): State<SharedController>) -> Response {
    let controller = state.lock().await;
    ok_with(json!({"settings": settings_snapshot(controller.domain())}))
}

async fn set_settings(State(state): State<SharedController>, Json(patch): Json<SettingsPatch>) -> Response {
    let mut controller = state.lock().await;
    let domain = controller.domain_mut();
    if let Some(v) = patch.interlock_min_valve_open_percent {
        domain.boiler.interlock.min_valve_open_percent = v;
    }
    if let Some(v) = patch.cooldown_high_delta_c {
        domain.boiler.cooldown.high_delta_c = v;
    }
    if let Some(v) = patch.cooldown_recovery_delta_c {
        domain.boiler.cooldown.recovery_delta_c = v;
    }
    if let Some(v) = patch.cooldown_recovery_min_c {
        domain.boiler.cooldown.recovery_min_c = v;
    }
    if let Some(v) = patch.cooldown_forced_setpoint_c {
        domain.boiler.cooldown.forced_setpoint_c = v;
    }
    if let Some(v) = patch.ramp_delta_trigger_c {
        domain.boiler.setpoint_ramp.delta_trigger_c = v;
    }
    if let Some(v) = patch.ramp_delta_increase_c {
        domain.boiler.setpoint_ramp.delta_increase_c = v;
    }
    if let Some(v) = patch.ramp_max_setpoint_c {
        domain.boiler.setpoint_ramp.max_setpoint_c = v;
    }
    if let Some(v) = patch.load_sharing_min_calling_capacity_w {
        domain.boiler.load_sharing.min_calling_capacity_w = v;
    }
    if let Some(v) = patch.load_sharing_target_capacity_margin_w {
        domain.boiler.load_sharing.target_capacity_margin_w = v;
    }
    if let Some(v) = patch.load_sharing_high_return_delta_c {
        domain.boiler.load_sharing.high_return_delta_c = v;
    }
    ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::dummy::DummyBridge;
    use crate::config::{DaemonConfig, DomainConfig};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_controller() -> SharedController {
        let bridge = Arc::new(DummyBridge::new());
        let domain = DomainConfig {
            rooms: Vec::new(),
            schedules: HashMap::new(),
            boiler: Default::default(),
            system: Default::default(),
        };
        Arc::new(Mutex::new(Controller::new(bridge, DaemonConfig::default(), domain)))
    }

    #[tokio::test]
    async fn override_requires_exactly_one_of_target_delta() {
        let app = router(test_controller());
        let body = Json(json!({"room": "lounge", "minutes": 30})).0.to_string();
        let request = Request::builder()
            .method("POST")
            .uri("/override")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn get_settings_reports_defaults() {
        let app = router(test_controller());
        let request = Request::builder().method("GET").uri("/settings").body(Body::empty()).unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
