// ── Runtime orchestrator configuration ──
//
// These types describe how the orchestrator talks to the bus, the camera,
// the oracle and the telemetry backend. They never touch disk: the binary
// builds an `OrchestratorConfig` (via gatekeep-config) and hands it in.

use std::path::PathBuf;
use std::time::Duration;

use gatekeep_api::{BusConfig, ReconnectConfig};
use secrecy::SecretString;
use url::Url;

/// Default topic namespace shared with the peripherals.
pub const DEFAULT_TOPIC_PREFIX: &str = "lintas_alam";

/// Topic names of the bus contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMap {
    /// Door command, orchestrator → peripheral (`OPEN` / `CLOSE`).
    pub door: String,
    /// Display text, orchestrator → peripheral.
    pub display: String,
    /// Auxiliary light, orchestrator → peripheral (`ON` / `OFF`).
    pub light: String,
    /// Schedule updates from the external scheduler.
    pub schedule: String,
    /// Camera IP announcements from the camera peripheral.
    pub topology: String,
    /// Known-identity list for downstream displays.
    pub names: String,
    /// Admission events for downstream consumers.
    pub admission: String,
    /// Door state echo from the peripheral's proximity trigger.
    pub auto_door: String,
}

impl TopicMap {
    pub fn with_prefix(prefix: &str) -> Self {
        let p = prefix.trim_end_matches('/');
        Self {
            door: format!("{p}/door"),
            display: format!("{p}/oled"),
            light: format!("{p}/lampu"),
            schedule: format!("{p}/schedule"),
            topology: format!("{p}/ip"),
            names: format!("{p}/dataset_names"),
            admission: format!("{p}/detected_person"),
            auto_door: format!("{p}/auto_door"),
        }
    }

    /// Topics the orchestrator subscribes to on every connect.
    pub fn orchestrator_inbound(&self) -> Vec<String> {
        vec![
            self.topology.clone(),
            self.schedule.clone(),
            self.auto_door.clone(),
        ]
    }

    /// Topics a door/display peripheral subscribes to.
    pub fn peripheral_inbound(&self) -> Vec<String> {
        vec![
            self.door.clone(),
            self.display.clone(),
            self.light.clone(),
            self.schedule.clone(),
        ]
    }
}

impl Default for TopicMap {
    fn default() -> Self {
        Self::with_prefix(DEFAULT_TOPIC_PREFIX)
    }
}

/// Broker endpoint and reconnect policy.
#[derive(Debug, Clone)]
pub struct BusSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
}

impl BusSettings {
    /// Transport-level bus config subscribing to `subscriptions`.
    pub fn to_bus_config(&self, subscriptions: Vec<String>) -> BusConfig {
        BusConfig {
            host: self.host.clone(),
            port: self.port,
            client_id: self.client_id.clone(),
            keep_alive: self.keep_alive,
            connect_timeout: self.connect_timeout,
            subscriptions,
        }
    }
}

impl Default for BusSettings {
    fn default() -> Self {
        let bus = BusConfig::default();
        Self {
            host: bus.host,
            port: bus.port,
            client_id: bus.client_id,
            keep_alive: bus.keep_alive,
            connect_timeout: bus.connect_timeout,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// Door timing: auto-close delay, watchdog bound and watchdog cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorTiming {
    pub auto_close: Duration,
    /// Hard upper bound on time spent open. Must exceed `auto_close`.
    pub safety_bound: Duration,
    pub watchdog_period: Duration,
}

impl Default for DoorTiming {
    fn default() -> Self {
        Self {
            auto_close: Duration::from_secs(7),
            safety_bound: Duration::from_secs(10),
            watchdog_period: Duration::from_secs(1),
        }
    }
}

/// Telemetry backend. Disabled when `endpoint` is `None`.
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub endpoint: Option<Url>,
    pub token: SecretString,
    pub timeout: Duration,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            endpoint: None,
            token: SecretString::from(String::new()),
            timeout: Duration::from_secs(5),
        }
    }
}

/// Camera link and frame-loop cadence.
#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub capture_path: String,
    pub fetch_timeout: Duration,
    /// Attempts to open the camera before the announced target is dropped.
    pub open_attempts: u32,
    pub retry_pause: Duration,
    /// Only every n-th frame is identified.
    pub frame_stride: u64,
    /// Persist the table every n processed frames.
    pub save_every: u64,
    /// Pause between loop iterations.
    pub tick: Duration,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            capture_path: gatekeep_api::camera::DEFAULT_CAPTURE_PATH.into(),
            fetch_timeout: Duration::from_secs(8),
            open_attempts: 3,
            retry_pause: Duration::from_secs(1),
            frame_stride: 3,
            save_every: 30,
            tick: Duration::from_millis(30),
        }
    }
}

/// Identification backend. Disabled when `base_url` is `None`.
#[derive(Debug, Clone)]
pub struct OracleSettings {
    pub base_url: Option<Url>,
    pub timeout: Duration,
    /// Match distances at or above this are not confident.
    pub tolerance: f64,
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout: Duration::from_secs(5),
            tolerance: crate::oracle::DEFAULT_TOLERANCE,
        }
    }
}

/// Complete orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub bus: BusSettings,
    pub topics: TopicMap,
    pub door: DoorTiming,
    pub telemetry: TelemetrySettings,
    pub camera: CameraSettings,
    pub oracle: OracleSettings,
    /// Attendance table location.
    pub table_path: PathBuf,
    /// Static catalog, merged with whatever the oracle reports.
    pub identities: Vec<String>,
    /// Cadence of the schedule-status display refresh.
    pub display_refresh: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            bus: BusSettings::default(),
            topics: TopicMap::default(),
            door: DoorTiming::default(),
            telemetry: TelemetrySettings::default(),
            camera: CameraSettings::default(),
            oracle: OracleSettings::default(),
            table_path: PathBuf::from("attendance_log.csv"),
            identities: Vec::new(),
            display_refresh: Duration::from_secs(5),
        }
    }
}
