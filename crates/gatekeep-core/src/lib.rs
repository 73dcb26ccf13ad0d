//! Admission and orchestration engine for the attendance gate.
//!
//! Sits between `gatekeep-api` (bus, HTTP clients) and the `gatekeep`
//! binary:
//!
//! - **[`Orchestrator`]** owns the shared state and the background tasks:
//!   bus supervision with observable [`ConnectionState`], the door
//!   watchdog, the schedule-status display refresh and the
//!   [`FramePipeline`].
//!
//! - **[`ScheduleRegistry`]** holds the course window and per-identity
//!   override windows. Assigning a course window opens a new admission
//!   epoch in the [`AttendanceLedger`].
//!
//! - **[`DetectionRouter`]** turns one recognized face into at most one
//!   admission per (identity, course) epoch.
//!
//! - **[`DoorController`]** drives the door state machine with an
//!   auto-close timer and a fail-safe watchdog.
//!
//! - **Sinks**: [`TelemetrySink`] (best-effort HTTP) and
//!   [`PersistenceSink`] (CSV table, atomic rewrite).
//!
//! - **[`peripheral`]** mirrors the door/display peripheral for bench
//!   testing without hardware.

pub mod catalog;
pub mod clock;
pub mod config;
pub mod door;
pub mod error;
pub mod ledger;
pub mod oracle;
pub mod orchestrator;
pub mod outbound;
pub mod peripheral;
pub mod persistence;
pub mod pipeline;
pub mod router;
pub mod schedule;
pub mod telemetry;

// ── Primary re-exports ──────────────────────────────────────────────
pub use catalog::IdentityCatalog;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BusSettings, CameraSettings, DoorTiming, OracleSettings, OrchestratorConfig,
    TelemetrySettings, TopicMap,
};
pub use door::{CloseReason, DoorCommand, DoorController, DoorState};
pub use error::CoreError;
pub use ledger::{AttendanceLedger, AttendanceRow, AttendanceStatus, DetectionEntry, Presence};
pub use oracle::{
    Detection, Frame, FrameSource, HttpFrameSource, HttpIdentifier, Identification, Identifier,
};
pub use orchestrator::{Collaborators, ConnectionState, Orchestrator};
pub use outbound::{MemoryPublisher, Outbound, Publisher};
pub use persistence::{CsvTable, PersistenceSink};
pub use pipeline::FramePipeline;
pub use router::{DetectionRouter, RouteOutcome};
pub use schedule::{NO_SCHEDULE, ScheduleRegistry, ScheduleUpdate, ScheduleWindow};
pub use telemetry::{HttpTelemetry, NoopTelemetry, TelemetrySink};
