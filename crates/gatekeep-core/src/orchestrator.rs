// ── Orchestrator ──
//
// Owns the shared admission state and the background tasks around it:
// the bus supervisor (connection lifecycle + inbound dispatch), the door
// watchdog, the periodic schedule-status refresh and the frame pipeline.
// Every task observes one cancellation token; `shutdown` joins them all
// and writes the attendance table one last time.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gatekeep_api::{BusEvent, BusMessage};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::catalog::IdentityCatalog;
use crate::clock::Clock;
use crate::config::OrchestratorConfig;
use crate::door::{CloseReason, DoorCommand, DoorController};
use crate::error::CoreError;
use crate::ledger::AttendanceLedger;
use crate::oracle::Identifier;
use crate::outbound::{Outbound, Publisher};
use crate::persistence::PersistenceSink;
use crate::pipeline::FramePipeline;
use crate::router::DetectionRouter;
use crate::schedule::{ScheduleRegistry, TIMESTAMP_FORMAT};
use crate::telemetry::TelemetrySink;

/// Detection-log label for door echoes from the proximity trigger.
pub const AUTO_DOOR_LABEL: &str = "Pintu Otomatis";

// ── ConnectionState ──────────────────────────────────────────────────

/// Bus connection state, observable through a `watch` channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
    /// Retry budget exhausted. Retries continue at the backoff cap.
    Failed,
}

/// External collaborators the orchestrator talks through.
#[derive(Clone)]
pub struct Collaborators {
    pub publisher: Arc<dyn Publisher>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub persistence: Arc<dyn PersistenceSink>,
    pub clock: Arc<dyn Clock>,
}

// ── Orchestrator ─────────────────────────────────────────────────────

/// Cheaply cloneable handle to the running gate.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    config: OrchestratorConfig,
    registry: Arc<ScheduleRegistry>,
    ledger: Arc<AttendanceLedger>,
    catalog: Arc<IdentityCatalog>,
    door: DoorController,
    router: DetectionRouter,
    outbound: Outbound,
    telemetry: Arc<dyn TelemetrySink>,
    persistence: Arc<dyn PersistenceSink>,
    clock: Arc<dyn Clock>,
    connection_state: watch::Sender<ConnectionState>,
    camera_target: watch::Sender<Option<String>>,
    degraded: AtomicBool,
    cancel: CancellationToken,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Orchestrator {
    pub fn new(config: OrchestratorConfig, deps: Collaborators) -> Self {
        let cancel = CancellationToken::new();
        let catalog = Arc::new(IdentityCatalog::new(config.identities.iter().cloned()));
        let ledger = Arc::new(AttendanceLedger::new());
        let registry = Arc::new(ScheduleRegistry::new(
            Arc::clone(&ledger),
            Arc::clone(&catalog),
        ));
        let outbound = Outbound::new(deps.publisher, config.topics.clone());
        let door = DoorController::new(
            config.door,
            outbound.clone(),
            Arc::clone(&deps.telemetry),
            Arc::clone(&deps.clock),
            cancel.child_token(),
        );
        let router = DetectionRouter::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::clone(&catalog),
            door.clone(),
            outbound.clone(),
            Arc::clone(&deps.telemetry),
            Arc::clone(&deps.persistence),
        );
        let (connection_state, _) = watch::channel(ConnectionState::Disconnected);
        let (camera_target, _) = watch::channel(None);

        Self {
            inner: Arc::new(OrchestratorInner {
                config,
                registry,
                ledger,
                catalog,
                door,
                router,
                outbound,
                telemetry: deps.telemetry,
                persistence: deps.persistence,
                clock: deps.clock,
                connection_state,
                camera_target,
                degraded: AtomicBool::new(false),
                cancel,
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    // ── Accessors ────────────────────────────────────────────────

    pub fn config(&self) -> &OrchestratorConfig {
        &self.inner.config
    }

    pub fn registry(&self) -> &ScheduleRegistry {
        &self.inner.registry
    }

    pub fn ledger(&self) -> &AttendanceLedger {
        &self.inner.ledger
    }

    pub fn catalog(&self) -> &IdentityCatalog {
        &self.inner.catalog
    }

    pub fn door(&self) -> &DoorController {
        &self.inner.door
    }

    pub fn router(&self) -> &DetectionRouter {
        &self.inner.router
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.connection_state.subscribe()
    }

    pub fn camera_target(&self) -> watch::Receiver<Option<String>> {
        self.inner.camera_target.subscribe()
    }

    pub fn is_degraded(&self) -> bool {
        self.inner.degraded.load(Ordering::SeqCst)
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Fill the catalog from static config plus whatever the oracle
    /// reports. An unreachable oracle leaves the static list in place.
    pub async fn load_catalog(&self, identifier: Option<&dyn Identifier>) -> usize {
        let mut names = self.inner.config.identities.clone();
        if let Some(identifier) = identifier {
            match identifier.identities().await {
                Ok(remote) => names.extend(remote),
                Err(e) => warn!(error = %e, "could not load identities from oracle"),
            }
        }
        let count = self.inner.catalog.replace(names);
        info!(identities = count, "catalog loaded");
        if count == 0 {
            warn!("catalog is empty, nobody can be admitted");
        }
        count
    }

    /// Spawn the bus supervisor, watchdog, display refresh and (when
    /// given) the frame pipeline.
    pub async fn start(&self, bus_events: mpsc::Receiver<BusEvent>, pipeline: Option<FramePipeline>) {
        self.inner
            .connection_state
            .send_replace(ConnectionState::Connecting);

        let mut handles = self.inner.task_handles.lock().await;
        handles.push(self.spawn_bus_supervisor(bus_events));
        handles.push(self.inner.door.spawn_watchdog(self.inner.cancel.child_token()));
        handles.push(self.spawn_display_refresh());
        match pipeline {
            Some(pipeline) => {
                let orchestrator = self.clone();
                let cancel = self.inner.cancel.child_token();
                handles.push(tokio::spawn(pipeline.run(orchestrator, cancel)));
            }
            None => warn!("no identification backend configured, frame pipeline disabled"),
        }
        info!(tasks = handles.len(), "orchestrator started");
    }

    /// Cancel every task, wait for them and save the table once more.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();

        let handles: Vec<_> = self.inner.task_handles.lock().await.drain(..).collect();
        for result in futures_util::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "task ended abnormally");
            }
        }

        if let Err(e) = self.save_table() {
            error!(error = %e, "final attendance save failed");
        }
        self.inner
            .connection_state
            .send_replace(ConnectionState::Disconnected);
        info!("orchestrator stopped");
    }

    // ── Bus supervision ──────────────────────────────────────────

    fn spawn_bus_supervisor(&self, mut events: mpsc::Receiver<BusEvent>) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let cancel = self.inner.cancel.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(event) => orchestrator.handle_bus_event(event),
                        None => {
                            debug!("bus event channel closed");
                            break;
                        }
                    },
                }
            }
        })
    }

    /// Apply one event from the bus loop.
    pub fn handle_bus_event(&self, event: BusEvent) {
        match event {
            BusEvent::Connected => self.on_connected(),
            BusEvent::Message(msg) => self.handle_message(&msg),
            BusEvent::Disconnected {
                attempt,
                reason,
                retry_in,
            } => {
                let retry_ms = u64::try_from(retry_in.as_millis()).unwrap_or(u64::MAX);
                warn!(attempt, %reason, retry_ms, "bus disconnected");
                self.inner.connection_state.send_if_modified(|state| {
                    if *state == ConnectionState::Failed {
                        return false;
                    }
                    *state = ConnectionState::Reconnecting {
                        attempt: attempt.saturating_add(1),
                    };
                    true
                });
            }
            BusEvent::Exhausted { attempts } => {
                error!(attempts, "bus retry budget exhausted, running degraded");
                self.inner.degraded.store(true, Ordering::SeqCst);
                self.inner
                    .connection_state
                    .send_replace(ConnectionState::Failed);
            }
        }
    }

    fn on_connected(&self) {
        self.inner
            .connection_state
            .send_replace(ConnectionState::Connected);

        if let Err(e) = self.inner.outbound.names(&self.inner.catalog) {
            warn!(error = %e, "identity list not published");
        }
        self.inner.door.resend_pending();
        if self.inner.degraded.swap(false, Ordering::SeqCst) {
            info!("bus recovered from degraded state");
            self.inner.outbound.invalidate_status();
        }
        self.refresh_display();
    }

    /// Dispatch one inbound publish by topic.
    pub fn handle_message(&self, msg: &BusMessage) {
        let topics = self.inner.outbound.topics();
        debug!(topic = %msg.topic, payload = %msg.payload, "bus message");

        if msg.topic == topics.topology {
            self.on_topology(&msg.payload);
        } else if msg.topic == topics.schedule {
            match self.inner.registry.apply_payload(&msg.payload) {
                Ok(_) => self.refresh_display(),
                Err(e) => warn!(error = %e, "schedule update rejected"),
            }
        } else if msg.topic == topics.auto_door {
            self.on_auto_door(&msg.payload);
        } else {
            debug!(topic = %msg.topic, "message on unhandled topic");
        }
    }

    fn on_topology(&self, payload: &str) {
        let host = payload.trim();
        if host.is_empty() {
            warn!("empty camera announce ignored");
            return;
        }
        info!(host, "camera announced");
        self.inner.camera_target.send_replace(Some(host.to_owned()));
    }

    fn on_auto_door(&self, payload: &str) {
        let Ok(command) = payload.trim().parse::<DoorCommand>() else {
            warn!(payload, "invalid auto-door status ignored");
            return;
        };
        let now = self.inner.clock.now();
        info!(%command, "auto-door echo");

        self.inner
            .ledger
            .append_detection(AUTO_DOOR_LABEL, &now.format(TIMESTAMP_FORMAT).to_string());

        // A close of an open door is reported by the door controller.
        let closed_here = command == DoorCommand::Close && self.inner.door.close(CloseReason::External);
        if !closed_here {
            self.inner.telemetry.publish_door_status(command, now);
        }
    }

    /// Drop the camera target if it is still `host`.
    pub fn clear_camera_target(&self, host: &str) {
        self.inner.camera_target.send_if_modified(|target| {
            if target.as_deref() == Some(host) {
                *target = None;
                true
            } else {
                false
            }
        });
    }

    // ── Periodic work ────────────────────────────────────────────

    fn spawn_display_refresh(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let cancel = self.inner.cancel.child_token();
        let period = self.inner.config.display_refresh.max(Duration::from_millis(100));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => orchestrator.refresh_display(),
                }
            }
        })
    }

    /// Publish the schedule status text if it changed.
    pub fn refresh_display(&self) {
        let now = self.inner.clock.now().naive_local();
        let active = self.inner.registry.is_course_active(now);
        if let Err(e) = self.inner.outbound.schedule_status(active) {
            debug!(error = %e, "schedule status not published");
        }
    }

    pub fn save_table(&self) -> Result<(), CoreError> {
        let rows = self.inner.ledger.snapshot_table(&self.inner.catalog);
        self.inner.persistence.save(&rows)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use chrono::{DateTime, Local, TimeZone};

    use super::*;
    use crate::clock::ManualClock;
    use crate::door::DoorState;
    use crate::ledger::AttendanceRow;
    use crate::outbound::MemoryPublisher;
    use crate::telemetry::NoopTelemetry;

    #[derive(Default)]
    struct CountingTable {
        saves: AtomicUsize,
    }

    impl PersistenceSink for CountingTable {
        fn save(&self, _rows: &[AttendanceRow]) -> Result<(), CoreError> {
            self.saves.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct DoorReports(std::sync::Mutex<Vec<DoorCommand>>);

    impl TelemetrySink for DoorReports {
        fn publish_admission(&self, _: &str, _: &str, _: DateTime<Local>) {}

        fn publish_door_status(&self, command: DoorCommand, _: DateTime<Local>) {
            self.0.lock().unwrap().push(command);
        }
    }

    struct Rig {
        orchestrator: Orchestrator,
        publisher: Arc<MemoryPublisher>,
        table: Arc<CountingTable>,
    }

    fn nine_thirty() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap()
    }

    fn rig() -> Rig {
        rig_with(Arc::new(NoopTelemetry))
    }

    fn rig_with(telemetry: Arc<dyn TelemetrySink>) -> Rig {
        let publisher = Arc::new(MemoryPublisher::new());
        let table = Arc::new(CountingTable::default());
        let config = OrchestratorConfig {
            identities: vec!["alice".into(), "bob".into()],
            ..OrchestratorConfig::default()
        };
        let orchestrator = Orchestrator::new(
            config,
            Collaborators {
                publisher: publisher.clone(),
                telemetry,
                persistence: table.clone(),
                clock: Arc::new(ManualClock::new(nine_thirty())),
            },
        );
        Rig {
            orchestrator,
            publisher,
            table,
        }
    }

    fn msg(topic: &str, payload: &str) -> BusEvent {
        BusEvent::Message(BusMessage::new(topic, payload))
    }

    #[test]
    fn disconnect_then_exhaust_then_recover() {
        let rig = rig();
        let state = rig.orchestrator.connection_state();

        rig.orchestrator.handle_bus_event(BusEvent::Disconnected {
            attempt: 0,
            reason: "refused".into(),
            retry_in: Duration::from_secs(1),
        });
        assert_eq!(*state.borrow(), ConnectionState::Reconnecting { attempt: 1 });

        rig.orchestrator
            .handle_bus_event(BusEvent::Exhausted { attempts: 10 });
        assert_eq!(*state.borrow(), ConnectionState::Failed);
        assert!(rig.orchestrator.is_degraded());

        // Further failures keep the Failed state visible.
        rig.orchestrator.handle_bus_event(BusEvent::Disconnected {
            attempt: 11,
            reason: "refused".into(),
            retry_in: Duration::from_secs(30),
        });
        assert_eq!(*state.borrow(), ConnectionState::Failed);

        rig.orchestrator.handle_bus_event(BusEvent::Connected);
        assert_eq!(*state.borrow(), ConnectionState::Connected);
        assert!(!rig.orchestrator.is_degraded());
    }

    #[test]
    fn connect_publishes_names_and_status() {
        let rig = rig();
        rig.orchestrator.handle_bus_event(BusEvent::Connected);

        assert_eq!(
            rig.publisher.payloads("lintas_alam/dataset_names"),
            vec![r#"{"names":["alice","bob"]}"#]
        );
        assert_eq!(
            rig.publisher.payloads("lintas_alam/oled"),
            vec!["Absen Ditutup!\nSilahkan Hubungi Dosen!"]
        );

        // Second connect: names again, status deduplicated.
        rig.orchestrator.handle_bus_event(BusEvent::Connected);
        assert_eq!(rig.publisher.payloads("lintas_alam/dataset_names").len(), 2);
        assert_eq!(rig.publisher.payloads("lintas_alam/oled").len(), 1);
    }

    #[test]
    fn degraded_recovery_republishes_status() {
        let rig = rig();
        rig.orchestrator.handle_bus_event(BusEvent::Connected);
        rig.orchestrator
            .handle_bus_event(BusEvent::Exhausted { attempts: 10 });
        rig.orchestrator.handle_bus_event(BusEvent::Connected);
        assert_eq!(rig.publisher.payloads("lintas_alam/oled").len(), 2);
    }

    #[test]
    fn schedule_message_updates_registry_and_display() {
        let rig = rig();
        rig.orchestrator.handle_bus_event(msg(
            "lintas_alam/schedule",
            r#"{"course":"Fisika","start":"2024-01-01 09:00:00","end":"2024-01-01 10:00:00"}"#,
        ));
        assert_eq!(rig.orchestrator.registry().current_course_name(), "Fisika");
        assert_eq!(
            rig.publisher.payloads("lintas_alam/oled"),
            vec!["Silahkan Absen!"]
        );

        rig.orchestrator
            .handle_bus_event(msg("lintas_alam/schedule", "{garbage"));
        assert_eq!(rig.orchestrator.registry().current_course_name(), "Fisika");
    }

    #[test]
    fn topology_announce_sets_and_clears_target() {
        let rig = rig();
        let target = rig.orchestrator.camera_target();

        rig.orchestrator
            .handle_bus_event(msg("lintas_alam/ip", " 192.168.1.40 \n"));
        assert_eq!(target.borrow().as_deref(), Some("192.168.1.40"));

        rig.orchestrator.clear_camera_target("10.0.0.1");
        assert_eq!(target.borrow().as_deref(), Some("192.168.1.40"));
        rig.orchestrator.clear_camera_target("192.168.1.40");
        assert!(target.borrow().is_none());

        rig.orchestrator.handle_bus_event(msg("lintas_alam/ip", "  "));
        assert!(target.borrow().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn auto_door_close_echo_closes_open_door() {
        let rig = rig();
        assert!(rig.orchestrator.door().admit());

        rig.orchestrator
            .handle_bus_event(msg("lintas_alam/auto_door", "CLOSE"));
        assert_eq!(rig.orchestrator.door().state(), DoorState::Closed);

        let log = rig.orchestrator.ledger().detections();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].identity, AUTO_DOOR_LABEL);
        assert_eq!(log[0].timestamp, "2024-01-01 09:30:00");

        rig.orchestrator
            .handle_bus_event(msg("lintas_alam/auto_door", "AJAR"));
        assert_eq!(rig.orchestrator.ledger().detections().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn auto_door_echoes_report_each_physical_change_once() {
        let reports = Arc::new(DoorReports::default());
        let rig = rig_with(reports.clone());
        assert!(rig.orchestrator.door().admit());

        // Closes the open door; the controller reports it.
        rig.orchestrator
            .handle_bus_event(msg("lintas_alam/auto_door", "CLOSE"));
        // Door already closed: the echo itself is reported.
        rig.orchestrator
            .handle_bus_event(msg("lintas_alam/auto_door", "OPEN"));
        rig.orchestrator
            .handle_bus_event(msg("lintas_alam/auto_door", "CLOSE"));

        assert_eq!(
            *reports.0.lock().unwrap(),
            vec![
                DoorCommand::Open,
                DoorCommand::Close,
                DoorCommand::Open,
                DoorCommand::Close
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_joins_tasks_and_saves() {
        let rig = rig();
        let (_tx, rx) = mpsc::channel(8);
        rig.orchestrator.start(rx, None).await;
        assert_eq!(
            *rig.orchestrator.connection_state().borrow(),
            ConnectionState::Connecting
        );

        rig.orchestrator.shutdown().await;
        assert_eq!(rig.table.saves.load(Ordering::SeqCst), 1);
        assert_eq!(
            *rig.orchestrator.connection_state().borrow(),
            ConnectionState::Disconnected
        );
    }
}
