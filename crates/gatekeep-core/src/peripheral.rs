// ── Door/display peripheral mirror ──
//
// A software stand-in for the door peripheral. It consumes the same bus
// contract as the hardware (door, display, light and schedule topics),
// joins the network through an explicit state machine, simulates the
// proximity trigger by echoing OPEN/CLOSE on the auto-door topic, and
// re-initializes its bus link when the link fails instead of exiting.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gatekeep_api::{BusEvent, BusHandle, BusMessage, ReconnectConfig};
use serde_json::Value;
use strum::Display;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{BusSettings, TopicMap};
use crate::door::{DoorCommand, DoorState};
use crate::error::CoreError;
use crate::outbound::Publisher;

/// Resting display text.
pub const IDLE_TEXT: &str = "Absen Ditutup!\n\nSilahkan\nHubungi\nDosen!";
const NETWORK_FAILED_TEXT: &str = "Koneksi WiFi\nGagal";
const BUS_FAILED_TEXT: &str = "Koneksi MQTT\nGagal";
const PROXIMITY_TEXT: &str = "Pintu Otomatis!";

// ── Commands ─────────────────────────────────────────────────────────

/// A bus message as the peripheral understands it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeripheralCommand {
    Door(DoorCommand),
    Display(String),
    Light(bool),
    /// Schedule update, already rendered for the display.
    Schedule(String),
}

impl PeripheralCommand {
    /// Decode `msg`. `None` for foreign topics and invalid payloads.
    pub fn parse(topics: &TopicMap, msg: &BusMessage) -> Option<Self> {
        let payload = msg.payload.as_str();
        if msg.topic == topics.door {
            match payload.trim().parse() {
                Ok(command) => Some(Self::Door(command)),
                Err(_) => {
                    warn!(payload, "invalid door command ignored");
                    None
                }
            }
        } else if msg.topic == topics.display {
            Some(Self::Display(payload.to_owned()))
        } else if msg.topic == topics.light {
            match payload.trim() {
                "ON" => Some(Self::Light(true)),
                "OFF" => Some(Self::Light(false)),
                other => {
                    warn!(payload = other, "invalid light command ignored");
                    None
                }
            }
        } else if msg.topic == topics.schedule {
            Some(Self::Schedule(schedule_display_text(payload)))
        } else {
            None
        }
    }
}

/// Render a schedule payload the way the panel shows it.
pub fn schedule_display_text(payload: &str) -> String {
    let Ok(Value::Object(data)) = serde_json::from_str::<Value>(payload) else {
        return "Galat Jadwal".into();
    };
    let field = |key: &str| data.get(key).and_then(Value::as_str).unwrap_or("?");
    let is_delete = |key: &str| data.get(key).and_then(Value::as_str) == Some("delete");

    if is_delete("course") {
        "Tidak Ada\nMatkul\nMenunggu\nJadwal Baru".into()
    } else if is_delete("person") {
        "Tidak Ada\nOrang\nMenunggu\nJadwal Baru".into()
    } else if data.contains_key("course") {
        format!(
            "Mata Kuliah:\n{}\nMulai:\n{}\nSelesai:\n{}",
            field("course"),
            field("start"),
            field("end")
        )
    } else if data.contains_key("person") {
        format!(
            "Orang:\n{}\nMulai:\n{}\nSelesai:\n{}",
            field("person"),
            field("start"),
            field("end")
        )
    } else {
        "Jadwal Tidak\nValid".into()
    }
}

// ── Panel ────────────────────────────────────────────────────────────

/// Actuator and display state of the simulated peripheral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Panel {
    pub door: DoorState,
    pub display: String,
    pub light: bool,
}

impl Default for Panel {
    fn default() -> Self {
        Self {
            door: DoorState::Closed,
            display: IDLE_TEXT.into(),
            light: false,
        }
    }
}

impl Panel {
    pub fn apply(&mut self, command: PeripheralCommand) {
        match command {
            PeripheralCommand::Door(DoorCommand::Open) => {
                self.door = DoorState::Open;
                self.show("Pintu Dibuka!");
            }
            PeripheralCommand::Door(DoorCommand::Close) => {
                self.door = DoorState::Closed;
                self.show("Pintu Ditutup!");
            }
            PeripheralCommand::Display(text) | PeripheralCommand::Schedule(text) => self.show(&text),
            PeripheralCommand::Light(on) => {
                self.light = on;
                info!(on, "light");
            }
        }
    }

    pub fn show(&mut self, text: &str) {
        text.clone_into(&mut self.display);
        info!(display = %text.replace('\n', " | "), "panel");
    }
}

// ── Network join ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum JoinState {
    Disconnected,
    Scanning,
    Connecting,
    Connected,
    /// The target did not show up in the last scan.
    NotFound,
}

/// Link layer the peripheral joins before talking to the bus.
#[async_trait]
pub trait NetworkLink: Send + Sync {
    /// Names of the targets currently visible.
    async fn scan(&self, target: &str) -> Result<Vec<String>, CoreError>;
    async fn associate(&self, target: &str) -> Result<(), CoreError>;
}

/// Link that "scans" by resolving the broker address and "associates"
/// by opening a TCP connection to it.
#[derive(Debug, Default, Clone, Copy)]
pub struct BrokerLink;

#[async_trait]
impl NetworkLink for BrokerLink {
    async fn scan(&self, target: &str) -> Result<Vec<String>, CoreError> {
        match tokio::net::lookup_host(target).await {
            Ok(mut addrs) => Ok(if addrs.next().is_some() {
                vec![target.to_owned()]
            } else {
                Vec::new()
            }),
            Err(e) => {
                debug!(target, error = %e, "broker name did not resolve");
                Ok(Vec::new())
            }
        }
    }

    async fn associate(&self, target: &str) -> Result<(), CoreError> {
        tokio::net::TcpStream::connect(target)
            .await
            .map(drop)
            .map_err(|e| CoreError::Connectivity {
                target: target.to_owned(),
                reason: e.to_string(),
            })
    }
}

/// Bounded timeouts for each join phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTimeouts {
    pub scan: Duration,
    pub connect: Duration,
}

impl Default for JoinTimeouts {
    fn default() -> Self {
        Self {
            scan: Duration::from_secs(10),
            connect: Duration::from_secs(10),
        }
    }
}

/// `Disconnected → Scanning → Connecting → Connected`, with `NotFound`
/// when the target is missing from the scan.
#[derive(Debug)]
pub struct JoinMachine {
    target: String,
    timeouts: JoinTimeouts,
    state: JoinState,
}

impl JoinMachine {
    pub fn new(target: impl Into<String>, timeouts: JoinTimeouts) -> Self {
        Self {
            target: target.into(),
            timeouts,
            state: JoinState::Disconnected,
        }
    }

    pub fn state(&self) -> JoinState {
        self.state
    }

    pub fn reset(&mut self) {
        self.transition(JoinState::Disconnected);
    }

    fn transition(&mut self, next: JoinState) {
        if self.state != next {
            debug!(from = %self.state, to = %next, target = %self.target, "join state");
            self.state = next;
        }
    }

    /// Run one join attempt. On failure the machine rests in
    /// `Disconnected` or `NotFound`.
    pub async fn join(&mut self, link: &dyn NetworkLink) -> Result<(), CoreError> {
        if self.state == JoinState::Connected {
            return Ok(());
        }

        self.transition(JoinState::Scanning);
        let visible = match tokio::time::timeout(self.timeouts.scan, link.scan(&self.target)).await {
            Ok(Ok(visible)) => visible,
            Ok(Err(e)) => {
                self.transition(JoinState::Disconnected);
                return Err(e);
            }
            Err(_) => {
                self.transition(JoinState::Disconnected);
                return Err(CoreError::Timeout {
                    target: format!("scan for {}", self.target),
                    timeout_secs: self.timeouts.scan.as_secs(),
                });
            }
        };
        if !visible.iter().any(|t| *t == self.target) {
            self.transition(JoinState::NotFound);
            return Err(CoreError::ResourceUnavailable {
                resource: format!("{} not found in scan", self.target),
            });
        }

        self.transition(JoinState::Connecting);
        match tokio::time::timeout(self.timeouts.connect, link.associate(&self.target)).await {
            Ok(Ok(())) => {
                self.transition(JoinState::Connected);
                info!(target = %self.target, "network joined");
                Ok(())
            }
            Ok(Err(e)) => {
                self.transition(JoinState::Disconnected);
                Err(e)
            }
            Err(_) => {
                self.transition(JoinState::Disconnected);
                Err(CoreError::Timeout {
                    target: self.target.clone(),
                    timeout_secs: self.timeouts.connect.as_secs(),
                })
            }
        }
    }
}

// ── Runtime ──────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct PeripheralSettings {
    pub bus: BusSettings,
    pub topics: TopicMap,
    pub join: JoinTimeouts,
    /// Simulated proximity trigger period; `None` disables it.
    pub proximity_every: Option<Duration>,
    /// How long the proximity trigger holds the door open.
    pub proximity_hold: Duration,
    /// Pause before re-initializing a failed link.
    pub reinit_pause: Duration,
}

impl Default for PeripheralSettings {
    fn default() -> Self {
        let bus = BusSettings {
            client_id: "gatekeep-door".into(),
            reconnect: ReconnectConfig {
                max_retries: Some(3),
                ..ReconnectConfig::default()
            },
            ..BusSettings::default()
        };
        Self {
            bus,
            topics: TopicMap::default(),
            join: JoinTimeouts::default(),
            proximity_every: None,
            proximity_hold: Duration::from_secs(2),
            reinit_pause: Duration::from_secs(5),
        }
    }
}

enum SessionEnd {
    Cancelled,
    LinkLost(String),
}

/// Run the simulated peripheral until `cancel` fires.
pub async fn run_peripheral(
    settings: PeripheralSettings,
    link: Arc<dyn NetworkLink>,
    cancel: CancellationToken,
) -> Panel {
    let mut panel = Panel::default();
    let target = format!("{}:{}", settings.bus.host, settings.bus.port);
    let mut join = JoinMachine::new(target, settings.join);

    while !cancel.is_cancelled() {
        if let Err(e) = join.join(link.as_ref()).await {
            warn!(error = %e, state = %join.state(), "network join failed");
            panel.show(NETWORK_FAILED_TEXT);
            if !pause(&cancel, settings.reinit_pause).await {
                break;
            }
            continue;
        }

        let session_cancel = cancel.child_token();
        let (bus, mut events) = BusHandle::spawn(
            settings.bus.to_bus_config(settings.topics.peripheral_inbound()),
            settings.bus.reconnect.clone(),
            session_cancel.clone(),
        );
        let end = session(&mut panel, &bus, &mut events, &settings, &cancel).await;
        bus.shutdown();

        match end {
            SessionEnd::Cancelled => break,
            SessionEnd::LinkLost(reason) => {
                warn!(%reason, "bus link lost, re-initializing");
                panel.show(BUS_FAILED_TEXT);
                join.reset();
                if !pause(&cancel, settings.reinit_pause).await {
                    break;
                }
                panel.show(IDLE_TEXT);
            }
        }
    }

    info!("peripheral stopped");
    panel
}

async fn session(
    panel: &mut Panel,
    bus: &BusHandle,
    events: &mut mpsc::Receiver<BusEvent>,
    settings: &PeripheralSettings,
    cancel: &CancellationToken,
) -> SessionEnd {
    let mut proximity = settings.proximity_every.map(tokio::time::interval);
    if let Some(ticker) = proximity.as_mut() {
        // First tick completes immediately; skip it.
        ticker.tick().await;
    }

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return SessionEnd::Cancelled,
            event = events.recv() => match event {
                Some(BusEvent::Connected) => info!("peripheral bus connected"),
                Some(BusEvent::Message(msg)) => {
                    if let Some(command) = PeripheralCommand::parse(&settings.topics, &msg) {
                        panel.apply(command);
                    }
                }
                Some(BusEvent::Disconnected { attempt, reason, .. }) => {
                    debug!(attempt, %reason, "peripheral bus retrying");
                }
                Some(BusEvent::Exhausted { attempts }) => {
                    return SessionEnd::LinkLost(format!("{attempts} connection attempts failed"));
                }
                None => return SessionEnd::LinkLost("bus loop stopped".into()),
            },
            () = tick(proximity.as_mut()) => {
                if !proximity_cycle(panel, bus, settings, cancel).await {
                    return SessionEnd::Cancelled;
                }
            }
        }
    }
}

async fn tick(ticker: Option<&mut tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Open, hold, close, echoing each state on the auto-door topic.
async fn proximity_cycle(
    panel: &mut Panel,
    bus: &dyn Publisher,
    settings: &PeripheralSettings,
    cancel: &CancellationToken,
) -> bool {
    panel.show(PROXIMITY_TEXT);
    panel.door = DoorState::Open;
    echo(bus, &settings.topics, DoorCommand::Open);

    let finished = pause(cancel, settings.proximity_hold).await;

    panel.door = DoorState::Closed;
    echo(bus, &settings.topics, DoorCommand::Close);
    panel.show(IDLE_TEXT);
    finished
}

fn echo(bus: &dyn Publisher, topics: &TopicMap, command: DoorCommand) {
    if let Err(e) = bus.publish(&topics.auto_door, &command.to_string()) {
        warn!(%command, error = %e, "auto-door echo not published");
    }
}

/// Sleep unless cancelled first. Returns `false` on cancellation.
async fn pause(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
