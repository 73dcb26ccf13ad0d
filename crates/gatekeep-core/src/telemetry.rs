// ── Telemetry sink ──
//
// Best-effort reporting of admissions and door state. Each report runs in
// its own task; failures are logged and never reach the caller.

use std::sync::Arc;

use chrono::{DateTime, Local};
use dashmap::DashMap;
use gatekeep_api::{DoorReport, PresenceReport, TelemetryClient, TransportConfig};
use tracing::{debug, info, warn};

use crate::config::TelemetrySettings;
use crate::door::DoorCommand;
use crate::error::CoreError;

/// Seconds an admission dedup key is remembered.
const DEDUP_HORIZON_SECS: i64 = 60;

pub trait TelemetrySink: Send + Sync {
    fn publish_admission(&self, identity: &str, course: &str, at: DateTime<Local>);
    fn publish_door_status(&self, status: DoorCommand, at: DateTime<Local>);
}

/// Sink used when no telemetry endpoint is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn publish_admission(&self, identity: &str, course: &str, _at: DateTime<Local>) {
        debug!(identity, course, "telemetry disabled, admission not reported");
    }

    fn publish_door_status(&self, status: DoorCommand, _at: DateTime<Local>) {
        debug!(%status, "telemetry disabled, door status not reported");
    }
}

/// HTTP telemetry with per-second admission dedup.
pub struct HttpTelemetry {
    client: TelemetryClient,
    sent: Arc<DashMap<(String, i64), ()>>,
}

impl HttpTelemetry {
    pub fn new(client: TelemetryClient) -> Self {
        Self {
            client,
            sent: Arc::new(DashMap::new()),
        }
    }

    /// Build from settings; `Ok(None)` when telemetry is disabled.
    pub fn from_settings(settings: &TelemetrySettings) -> Result<Option<Self>, CoreError> {
        let Some(endpoint) = settings.endpoint.clone() else {
            return Ok(None);
        };
        let transport = TransportConfig::with_timeout(settings.timeout);
        let client = TelemetryClient::new(endpoint, &settings.token, &transport)?;
        Ok(Some(Self::new(client)))
    }

    /// Record `(identity, second)`; `false` if it was already reported.
    fn first_report(&self, identity: &str, at: DateTime<Local>) -> bool {
        let second = at.timestamp();
        self.sent
            .retain(|(_, seen), _| second - *seen < DEDUP_HORIZON_SECS);
        self.sent
            .insert((identity.to_owned(), second), ())
            .is_none()
    }
}

impl TelemetrySink for HttpTelemetry {
    fn publish_admission(&self, identity: &str, course: &str, at: DateTime<Local>) {
        if !self.first_report(identity, at) {
            debug!(identity, "admission already reported this second, skipping");
            return;
        }
        let client = self.client.clone();
        let report = PresenceReport {
            name: identity.to_owned(),
            course: course.to_owned(),
            at,
        };
        tokio::spawn(async move {
            match client.send_presence(&report).await {
                Ok(()) => info!(identity = %report.name, course = %report.course, "admission reported"),
                Err(e) => {
                    let err = CoreError::from(e);
                    warn!(identity = %report.name, error = %err, "admission telemetry failed");
                }
            }
        });
    }

    fn publish_door_status(&self, status: DoorCommand, at: DateTime<Local>) {
        let client = self.client.clone();
        let report = DoorReport {
            status: status.to_string(),
            at,
        };
        tokio::spawn(async move {
            match client.send_door_status(&report).await {
                Ok(()) => info!(status = %report.status, "door status reported"),
                Err(e) => {
                    let err = CoreError::from(e);
                    warn!(status = %report.status, error = %err, "door telemetry failed");
                }
            }
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Duration;

    use chrono::TimeZone;
    use secrecy::SecretString;
    use wiremock::matchers::{body_partial_json, method};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn at(sec: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, 9, 30, sec).unwrap()
    }

    async fn sink(server: &MockServer) -> HttpTelemetry {
        let settings = TelemetrySettings {
            endpoint: Some(server.uri().parse().unwrap()),
            token: SecretString::from("t".to_string()),
            timeout: Duration::from_secs(5),
        };
        HttpTelemetry::from_settings(&settings).unwrap().unwrap()
    }

    #[test]
    fn disabled_without_endpoint() {
        assert!(
            HttpTelemetry::from_settings(&TelemetrySettings::default())
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn admission_is_reported_once_per_second() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "person_presence": { "context": { "name": "alice" } }
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&server)
            .await;

        let sink = sink(&server).await;
        sink.publish_admission("alice", "Fisika", at(0));
        sink.publish_admission("alice", "Fisika", at(0));
        sink.publish_admission("alice", "Fisika", at(1));

        tokio::time::sleep(Duration::from_millis(300)).await;
        server.verify().await;
    }

    #[tokio::test]
    async fn delivery_failure_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let sink = sink(&server).await;
        sink.publish_door_status(DoorCommand::Close, at(0));

        tokio::time::sleep(Duration::from_millis(300)).await;
        server.verify().await;
    }
}
