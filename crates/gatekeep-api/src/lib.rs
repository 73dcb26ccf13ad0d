// gatekeep-api: Async transport clients for the attendance gate (MQTT bus, telemetry, camera, oracle)

pub mod bus;
pub mod camera;
pub mod error;
pub mod oracle;
pub mod telemetry;
pub mod transport;

pub use bus::{BusConfig, BusEvent, BusHandle, BusMessage, ReconnectConfig};
pub use camera::SnapshotClient;
pub use error::Error;
pub use oracle::{FaceMatch, OracleClient};
pub use telemetry::{DoorReport, PresenceReport, TelemetryClient};
pub use transport::TransportConfig;
