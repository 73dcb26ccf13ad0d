// ── Outbound bus traffic ──
//
// Everything gatekeep says on the bus goes through `Outbound`: door
// commands, display text, the light, schedule updates, admission events
// and the identity list. Publishing never awaits the network.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use gatekeep_api::{BusHandle, BusMessage};
use serde::Serialize;
use tracing::{debug, info};

use crate::catalog::IdentityCatalog;
use crate::config::TopicMap;
use crate::door::DoorCommand;
use crate::error::CoreError;
use crate::schedule::ScheduleUpdate;

/// Display text while the course window is active.
pub const STATUS_OPEN: &str = "Silahkan Absen!";
/// Display text outside the course window.
pub const STATUS_CLOSED: &str = "Absen Ditutup!\nSilahkan Hubungi Dosen!";

/// Display text shown right after an admission.
pub fn admitted_text(name: &str) -> String {
    format!("{name} telah absen\nSilahkan masuk!")
}

// ── Publisher ────────────────────────────────────────────────────────

/// Fire-and-forget publish port.
pub trait Publisher: Send + Sync {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), CoreError>;
}

impl Publisher for BusHandle {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), CoreError> {
        BusHandle::publish(self, topic, payload.as_bytes().to_vec()).map_err(CoreError::from)
    }
}

/// In-memory publisher that records every message.
///
/// Used by tests and by offline runs where no broker is reachable. Can be
/// switched into a failing mode to exercise retry paths.
#[derive(Debug, Default)]
pub struct MemoryPublisher {
    sent: Mutex<Vec<BusMessage>>,
    failing: AtomicBool,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn messages(&self) -> Vec<BusMessage> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Payloads published on `topic`, in order.
    pub fn payloads(&self, topic: &str) -> Vec<String> {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn clear(&self) {
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, topic: &str, payload: &str) -> Result<(), CoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(CoreError::Publish {
                message: format!("{topic}: publisher offline"),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(BusMessage::new(topic, payload));
        Ok(())
    }
}

// ── Admission event ──────────────────────────────────────────────────

/// Body of the admission-event topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdmissionEvent {
    pub name: String,
    pub timestamp: String,
    pub status: String,
    pub course: String,
}

// ── Outbound ─────────────────────────────────────────────────────────

/// Topic-aware publishing helpers shared by the router, the door and the
/// bus supervisor.
#[derive(Clone)]
pub struct Outbound {
    publisher: Arc<dyn Publisher>,
    topics: Arc<TopicMap>,
    last_status: Arc<Mutex<Option<&'static str>>>,
}

impl Outbound {
    pub fn new(publisher: Arc<dyn Publisher>, topics: TopicMap) -> Self {
        Self {
            publisher,
            topics: Arc::new(topics),
            last_status: Arc::new(Mutex::new(None)),
        }
    }

    pub fn topics(&self) -> &TopicMap {
        &self.topics
    }

    pub fn door(&self, command: DoorCommand) -> Result<(), CoreError> {
        self.publisher
            .publish(&self.topics.door, &command.to_string())
    }

    pub fn display(&self, text: &str) -> Result<(), CoreError> {
        debug!(text, "display");
        self.publisher.publish(&self.topics.display, text)
    }

    pub fn light(&self, on: bool) -> Result<(), CoreError> {
        self.publisher
            .publish(&self.topics.light, if on { "ON" } else { "OFF" })
    }

    pub fn admission(&self, event: &AdmissionEvent) -> Result<(), CoreError> {
        let body = serde_json::to_string(event)
            .map_err(|e| CoreError::malformed("admission event", e.to_string()))?;
        self.publisher.publish(&self.topics.admission, &body)
    }

    pub fn names(&self, catalog: &IdentityCatalog) -> Result<(), CoreError> {
        self.publisher
            .publish(&self.topics.names, &catalog.to_payload())
    }

    pub fn schedule(&self, update: &ScheduleUpdate) -> Result<(), CoreError> {
        self.publisher
            .publish(&self.topics.schedule, &update.to_payload())
    }

    /// Publish the schedule status text if it differs from the last one
    /// published. Returns whether anything was sent.
    pub fn schedule_status(&self, course_active: bool) -> Result<bool, CoreError> {
        let text = if course_active { STATUS_OPEN } else { STATUS_CLOSED };
        let mut last = self
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *last == Some(text) {
            return Ok(false);
        }
        self.publisher.publish(&self.topics.display, text)?;
        *last = Some(text);
        info!(text, "schedule status published");
        Ok(true)
    }

    /// Forget the last status so the next refresh publishes unconditionally.
    pub fn invalidate_status(&self) {
        *self
            .last_status
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn outbound() -> (Arc<MemoryPublisher>, Outbound) {
        let publisher = Arc::new(MemoryPublisher::new());
        let outbound = Outbound::new(publisher.clone(), TopicMap::default());
        (publisher, outbound)
    }

    #[test]
    fn schedule_status_is_deduplicated() {
        let (publisher, outbound) = outbound();
        assert!(outbound.schedule_status(false).unwrap());
        assert!(!outbound.schedule_status(false).unwrap());
        assert!(outbound.schedule_status(true).unwrap());

        outbound.invalidate_status();
        assert!(outbound.schedule_status(true).unwrap());

        assert_eq!(
            publisher.payloads("lintas_alam/oled"),
            vec![STATUS_CLOSED, STATUS_OPEN, STATUS_OPEN]
        );
    }

    #[test]
    fn failed_status_publish_is_retried() {
        let (publisher, outbound) = outbound();
        publisher.set_failing(true);
        assert!(outbound.schedule_status(true).is_err());

        publisher.set_failing(false);
        assert!(outbound.schedule_status(true).unwrap());
    }

    #[test]
    fn admission_event_shape() {
        let (publisher, outbound) = outbound();
        outbound
            .admission(&AdmissionEvent {
                name: "alice".into(),
                timestamp: "2024-01-01 09:30:00".into(),
                status: "Hadir".into(),
                course: "Fisika".into(),
            })
            .unwrap();

        let body: serde_json::Value =
            serde_json::from_str(&publisher.payloads("lintas_alam/detected_person")[0]).unwrap();
        assert_eq!(body["name"], "alice");
        assert_eq!(body["status"], "Hadir");
        assert_eq!(body["course"], "Fisika");
    }

    #[test]
    fn door_and_light_payloads() {
        let (publisher, outbound) = outbound();
        outbound.door(DoorCommand::Open).unwrap();
        outbound.light(false).unwrap();
        assert_eq!(publisher.payloads("lintas_alam/door"), vec!["OPEN"]);
        assert_eq!(publisher.payloads("lintas_alam/lampu"), vec!["OFF"]);
    }

    #[test]
    fn schedule_update_reaches_schedule_topic() {
        let (publisher, outbound) = outbound();
        outbound.schedule(&ScheduleUpdate::ClearCourse).unwrap();

        let sent = publisher.payloads("lintas_alam/schedule");
        assert_eq!(sent.len(), 1);
        assert_eq!(ScheduleUpdate::parse(&sent[0]).unwrap(), ScheduleUpdate::ClearCourse);
    }
}
