//! Configuration loading.
//!
//! `DaemonConfig` (`heating_core.toml`) is the thin, rarely-changed bootstrap
//! config: where to find the domain YAML files, where to persist state, and
//! where to bind the HTTP surface. It is loaded with `toml`, the way the
//! teacher's top-level `Config` loads `follow_heating.toml`.
//!
//! The domain configuration (`rooms.yaml`, `schedules.yaml`, `boiler.yaml`,
//! spec §6) is loaded with `serde_yaml`, following the same
//! `#[serde(default, deny_unknown_fields)]` + explicit validation idiom the
//! teacher uses for `python_brain.toml` (`brain/python_like/config/mod.rs`).

pub mod boiler;
pub mod rooms;
pub mod schedule;

use log::{debug, error, info};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub use boiler::{BoilerConfig, BoilerFile, SystemConfig};
pub use rooms::RoomConfig;
pub use schedule::RoomSchedule;

#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct DaemonConfig {
    pub rooms_file: PathBuf,
    pub schedules_file: PathBuf,
    pub boiler_file: PathBuf,
    pub persistence_file: PathBuf,
    pub telemetry_dir: PathBuf,
    pub http: HttpConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        DaemonConfig {
            rooms_file: "rooms.yaml".into(),
            schedules_file: "schedules.yaml".into(),
            boiler_file: "boiler.yaml".into(),
            persistence_file: "heating_state.json".into(),
            telemetry_dir: "telemetry".into(),
            http: HttpConfig::default(),
        }
    }
}

#[derive(Clone, Deserialize, Debug)]
#[serde(default)]
pub struct HttpConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            bind_address: "127.0.0.1".to_string(),
            port: 8731,
        }
    }
}

const DAEMON_CONFIG_FILE: &str = "heating_core.toml";

pub fn try_read_daemon_config() -> DaemonConfig {
    try_read_daemon_config_file(DAEMON_CONFIG_FILE)
}

pub fn try_read_daemon_config_file(path: impl AsRef<Path>) -> DaemonConfig {
    match std::fs::read_to_string(path.as_ref()) {
        Ok(s) => match toml::from_str(&s) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to deserialize {:?}: {}", path.as_ref(), e);
                DaemonConfig::default()
            }
        },
        Err(e) => {
            info!(
                "No daemon config at {:?} ({}), using defaults",
                path.as_ref(),
                e
            );
            DaemonConfig::default()
        }
    }
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RoomsFile {
    rooms: Vec<RoomConfig>,
}

#[derive(Clone, Debug, Deserialize, Default)]
#[serde(transparent)]
struct SchedulesFile {
    schedules: HashMap<String, RoomSchedule>,
}

/// Fully loaded, cross-validated domain configuration.
#[derive(Clone, Debug)]
pub struct DomainConfig {
    pub rooms: Vec<RoomConfig>,
    pub schedules: HashMap<String, RoomSchedule>,
    pub boiler: BoilerConfig,
    pub system: SystemConfig,
}

#[derive(Debug)]
pub struct ConfigError(pub String);

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for ConfigError {}

pub fn load_domain_config(daemon: &DaemonConfig) -> Result<DomainConfig, ConfigError> {
    let rooms = load_rooms(&daemon.rooms_file)?;
    let schedules = load_schedules(&daemon.schedules_file)?;
    let boiler_file = load_boiler(&daemon.boiler_file)?;

    validate_domain(&rooms, &schedules, &boiler_file)?;

    Ok(DomainConfig {
        rooms,
        schedules,
        boiler: boiler_file.boiler,
        system: boiler_file.system,
    })
}

fn load_rooms(path: &Path) -> Result<Vec<RoomConfig>, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("Failed to read {:?}: {}", path, e)))?;
    let parsed: RoomsFile = serde_yaml::from_str(&raw)
        .map_err(|e| ConfigError(format!("Failed to parse {:?}: {}", path, e)))?;
    debug!(target: "config", "Loaded {} rooms from {:?}", parsed.rooms.len(), path);
    Ok(parsed.rooms)
}

fn load_schedules(path: &Path) -> Result<HashMap<String, RoomSchedule>, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("Failed to read {:?}: {}", path, e)))?;
    let parsed: SchedulesFile = serde_yaml::from_str(&raw)
        .map_err(|e| ConfigError(format!("Failed to parse {:?}: {}", path, e)))?;
    Ok(parsed.schedules)
}

fn load_boiler(path: &Path) -> Result<BoilerFile, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("Failed to read {:?}: {}", path, e)))?;
    let parsed: BoilerFile = serde_yaml::from_str(&raw)
        .map_err(|e| ConfigError(format!("Failed to parse {:?}: {}", path, e)))?;
    Ok(parsed)
}

fn validate_domain(
    rooms: &[RoomConfig],
    schedules: &HashMap<String, RoomSchedule>,
    boiler_file: &BoilerFile,
) -> Result<(), ConfigError> {
    boiler_file
        .system
        .validate()
        .map_err(|e| ConfigError(format!("Invalid [system]: {e}")))?;

    for room in rooms {
        room.valve_bands
            .validate()
            .map_err(|e| ConfigError(format!("Room '{}': {e}", room.id)))?;

        if boiler_file.boiler.load_monitoring.enabled && room.delta_t50.is_none() {
            return Err(ConfigError(format!(
                "Room '{}' is missing delta_t50, required while load_monitoring is enabled",
                room.id
            )));
        }

        if let Some(schedule) = schedules.get(&room.id) {
            schedule
                .validate()
                .map_err(|e| ConfigError(format!("Room '{}' schedule: {e}", room.id)))?;
        }
    }

    if let Some(safety_room) = &boiler_file.boiler.safety_room {
        if !rooms.iter().any(|r| &r.id == safety_room) {
            return Err(ConfigError(format!(
                "safety_room '{safety_room}' does not match any configured room"
            )));
        }
    }

    Ok(())
}
