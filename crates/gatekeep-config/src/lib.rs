//! Configuration for the gatekeep binary.
//!
//! One TOML file (platform config dir, or an explicit path) merged with
//! `GATEKEEP_`-prefixed environment variables, plus translation into the
//! runtime types of `gatekeep_core`. Nested keys use a double underscore
//! in the environment: `GATEKEEP_BUS__HOST=broker.local`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use gatekeep_api::ReconnectConfig;
use gatekeep_core::peripheral::{JoinTimeouts, PeripheralSettings};
use gatekeep_core::{
    BusSettings, CameraSettings, DoorTiming, OracleSettings, OrchestratorConfig,
    TelemetrySettings, TopicMap,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("telemetry endpoint is set but no token is configured")]
    MissingToken,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub bus: BusSection,
    #[serde(default)]
    pub topics: TopicsSection,
    #[serde(default)]
    pub door: DoorSection,
    #[serde(default)]
    pub telemetry: TelemetrySection,
    #[serde(default)]
    pub camera: CameraSection,
    #[serde(default)]
    pub oracle: OracleSection,
    #[serde(default)]
    pub storage: StorageSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub peripheral: PeripheralSection,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BusSection {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub reconnect_initial_ms: u64,
    pub reconnect_max_secs: u64,
    /// Failures before the bus is reported as failed. Unset means never.
    pub max_retries: Option<u32>,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            host: "broker.emqx.io".into(),
            port: 1883,
            client_id: "gatekeep".into(),
            keep_alive_secs: 60,
            connect_timeout_secs: 10,
            reconnect_initial_ms: 1_000,
            reconnect_max_secs: 30,
            max_retries: Some(10),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TopicsSection {
    pub prefix: String,
}

impl Default for TopicsSection {
    fn default() -> Self {
        Self {
            prefix: gatekeep_core::config::DEFAULT_TOPIC_PREFIX.into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DoorSection {
    pub auto_close_secs: u64,
    pub safety_bound_secs: u64,
    pub watchdog_period_ms: u64,
}

impl Default for DoorSection {
    fn default() -> Self {
        Self {
            auto_close_secs: 7,
            safety_bound_secs: 10,
            watchdog_period_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetrySection {
    /// Backend base URL. Telemetry is off when unset.
    pub endpoint: Option<String>,
    /// Token in plaintext (prefer `token_env`).
    pub token: Option<String>,
    /// Environment variable holding the token.
    pub token_env: Option<String>,
    pub timeout_secs: u64,
}

impl Default for TelemetrySection {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: None,
            token_env: Some("GATEKEEP_TELEMETRY_TOKEN".into()),
            timeout_secs: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CameraSection {
    pub capture_path: String,
    pub fetch_timeout_secs: u64,
    pub open_attempts: u32,
    pub retry_pause_ms: u64,
    pub frame_stride: u64,
    pub save_every: u64,
    pub tick_ms: u64,
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            capture_path: gatekeep_api::camera::DEFAULT_CAPTURE_PATH.into(),
            fetch_timeout_secs: 8,
            open_attempts: 3,
            retry_pause_ms: 1_000,
            frame_stride: 3,
            save_every: 30,
            tick_ms: 30,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OracleSection {
    /// Identification service base URL. The frame pipeline is off when unset.
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Match distance below which an identification is trusted.
    pub tolerance: f64,
    /// Static identity catalog, merged with the service's list.
    pub identities: Vec<String>,
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: 5,
            tolerance: gatekeep_core::oracle::DEFAULT_TOLERANCE,
            identities: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageSection {
    pub table_path: PathBuf,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            table_path: PathBuf::from("attendance_log.csv"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DisplaySection {
    pub refresh_secs: u64,
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self { refresh_secs: 5 }
    }
}

/// Settings for `gatekeep peripheral`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PeripheralSection {
    pub client_id: String,
    pub max_retries: u32,
    pub scan_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Simulated proximity trigger period. Off when unset.
    pub proximity_every_secs: Option<u64>,
    pub proximity_hold_secs: u64,
    pub reinit_pause_secs: u64,
}

impl Default for PeripheralSection {
    fn default() -> Self {
        Self {
            client_id: "gatekeep-door".into(),
            max_retries: 3,
            scan_timeout_secs: 10,
            connect_timeout_secs: 10,
            proximity_every_secs: None,
            proximity_hold_secs: 2,
            reinit_pause_secs: 5,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("id", "lintas-alam", "gatekeep").map_or_else(
        || {
            let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
            p.push(".config");
            p.push("gatekeep");
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from the canonical path, or `path` when given, plus environment.
pub fn load_config(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.map_or_else(config_path, Path::to_path_buf);
    load_config_from(&path)
}

/// Load from `path` plus environment. A missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("GATEKEEP_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Copy of `cfg` with the telemetry token masked.
pub fn redacted(cfg: &Config) -> Config {
    let mut shown = cfg.clone();
    if shown.telemetry.token.is_some() {
        shown.telemetry.token = Some("********".into());
    }
    shown
}

/// TOML text of `cfg` with the telemetry token masked.
pub fn render_redacted(cfg: &Config) -> Result<String, ConfigError> {
    Ok(toml::to_string_pretty(&redacted(cfg))?)
}

// ── Secret resolution ───────────────────────────────────────────────

/// Telemetry token: `token_env` lookup first, then plaintext.
pub fn resolve_telemetry_token(
    section: &TelemetrySection,
) -> Result<Option<SecretString>, ConfigError> {
    // 1. Named env var
    if let Some(ref env_name) = section.token_env {
        if let Ok(val) = std::env::var(env_name) {
            if !val.is_empty() {
                return Ok(Some(SecretString::from(val)));
            }
        }
    }

    // 2. Plaintext in config
    if let Some(ref token) = section.token {
        return Ok(Some(SecretString::from(token.clone())));
    }

    if section.endpoint.is_some() {
        return Err(ConfigError::MissingToken);
    }
    Ok(None)
}

// ── Translation to runtime config ───────────────────────────────────

fn parse_url(field: &str, raw: Option<&String>) -> Result<Option<Url>, ConfigError> {
    raw.map(|s| {
        s.parse::<Url>()
            .map_err(|e| invalid(field, format!("invalid URL '{s}': {e}")))
    })
    .transpose()
}

fn bus_settings(section: &BusSection) -> Result<BusSettings, ConfigError> {
    if section.host.trim().is_empty() {
        return Err(invalid("bus.host", "must not be empty"));
    }
    Ok(BusSettings {
        host: section.host.clone(),
        port: section.port,
        client_id: section.client_id.clone(),
        keep_alive: Duration::from_secs(section.keep_alive_secs),
        connect_timeout: Duration::from_secs(section.connect_timeout_secs),
        reconnect: ReconnectConfig {
            initial_delay: Duration::from_millis(section.reconnect_initial_ms),
            max_delay: Duration::from_secs(section.reconnect_max_secs),
            max_retries: section.max_retries,
        },
    })
}

/// Broker settings alone, for one-shot publishers.
pub fn to_bus_settings(cfg: &Config) -> Result<BusSettings, ConfigError> {
    bus_settings(&cfg.bus)
}

/// Build the orchestrator's runtime config, resolving secrets.
pub fn to_orchestrator_config(cfg: &Config) -> Result<OrchestratorConfig, ConfigError> {
    let door = DoorTiming {
        auto_close: Duration::from_secs(cfg.door.auto_close_secs),
        safety_bound: Duration::from_secs(cfg.door.safety_bound_secs),
        watchdog_period: Duration::from_millis(cfg.door.watchdog_period_ms.max(1)),
    };
    if door.safety_bound <= door.auto_close {
        return Err(invalid(
            "door.safety_bound_secs",
            format!(
                "must exceed auto_close_secs ({} <= {})",
                cfg.door.safety_bound_secs, cfg.door.auto_close_secs
            ),
        ));
    }

    let telemetry = TelemetrySettings {
        endpoint: parse_url("telemetry.endpoint", cfg.telemetry.endpoint.as_ref())?,
        token: resolve_telemetry_token(&cfg.telemetry)?
            .unwrap_or_else(|| SecretString::from(String::new())),
        timeout: Duration::from_secs(cfg.telemetry.timeout_secs),
    };

    let camera = CameraSettings {
        capture_path: cfg.camera.capture_path.clone(),
        fetch_timeout: Duration::from_secs(cfg.camera.fetch_timeout_secs),
        open_attempts: cfg.camera.open_attempts,
        retry_pause: Duration::from_millis(cfg.camera.retry_pause_ms),
        frame_stride: cfg.camera.frame_stride,
        save_every: cfg.camera.save_every,
        tick: Duration::from_millis(cfg.camera.tick_ms),
    };
    if camera.frame_stride == 0 {
        return Err(invalid("camera.frame_stride", "must be at least 1"));
    }

    let oracle = OracleSettings {
        base_url: parse_url("oracle.base_url", cfg.oracle.base_url.as_ref())?,
        timeout: Duration::from_secs(cfg.oracle.timeout_secs),
        tolerance: cfg.oracle.tolerance,
    };
    if !(oracle.tolerance.is_finite() && oracle.tolerance > 0.0) {
        return Err(invalid("oracle.tolerance", "must be a positive number"));
    }

    Ok(OrchestratorConfig {
        bus: bus_settings(&cfg.bus)?,
        topics: TopicMap::with_prefix(&cfg.topics.prefix),
        door,
        telemetry,
        camera,
        oracle,
        table_path: cfg.storage.table_path.clone(),
        identities: cfg.oracle.identities.clone(),
        display_refresh: Duration::from_secs(cfg.display.refresh_secs),
    })
}

/// Build the simulated peripheral's settings.
pub fn to_peripheral_settings(cfg: &Config) -> Result<PeripheralSettings, ConfigError> {
    let p = &cfg.peripheral;
    let mut bus = bus_settings(&cfg.bus)?;
    bus.client_id.clone_from(&p.client_id);
    bus.reconnect.max_retries = Some(p.max_retries);

    Ok(PeripheralSettings {
        bus,
        topics: TopicMap::with_prefix(&cfg.topics.prefix),
        join: JoinTimeouts {
            scan: Duration::from_secs(p.scan_timeout_secs),
            connect: Duration::from_secs(p.connect_timeout_secs),
        },
        proximity_every: p.proximity_every_secs.map(Duration::from_secs),
        proximity_hold: Duration::from_secs(p.proximity_hold_secs),
        reinit_pause: Duration::from_secs(p.reinit_pause_secs),
    })
}
