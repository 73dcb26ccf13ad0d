// Telemetry HTTP client
//
// Posts presence and door-status "dots" to the telemetry backend. The
// backend contract is a JSON object of variables, each carrying a value,
// a millisecond timestamp, and an optional context object. Authentication
// is a token header injected once at client construction.

use chrono::{DateTime, Local};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Header carrying the backend token.
pub const AUTH_HEADER: &str = "X-Auth-Token";

// ── Reports ──────────────────────────────────────────────────────────

/// One admitted person.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceReport {
    pub name: String,
    pub course: String,
    pub at: DateTime<Local>,
}

/// Door actuator state change (`OPEN` / `CLOSE`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoorReport {
    pub status: String,
    pub at: DateTime<Local>,
}

// ── Wire shapes ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct Dot<C: Serialize> {
    value: i64,
    timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    context: Option<C>,
}

#[derive(Debug, Serialize)]
struct PresenceContext<'a> {
    name: &'a str,
    date: String,
    time: String,
    course: &'a str,
}

#[derive(Debug, Serialize)]
struct DoorContext<'a> {
    status: &'a str,
    date: String,
    time: String,
}

#[derive(Debug, Serialize)]
struct PresenceBody<'a> {
    person_presence: Dot<PresenceContext<'a>>,
    attendance_timestamp: Dot<()>,
}

#[derive(Debug, Serialize)]
struct DoorBody<'a> {
    auto_door_status: Dot<DoorContext<'a>>,
}

impl PresenceReport {
    fn body(&self) -> PresenceBody<'_> {
        let ms = self.at.timestamp_millis();
        PresenceBody {
            person_presence: Dot {
                value: 1,
                timestamp: ms,
                context: Some(PresenceContext {
                    name: &self.name,
                    date: self.at.format("%Y-%m-%d").to_string(),
                    time: self.at.format("%H:%M:%S").to_string(),
                    course: &self.course,
                }),
            },
            attendance_timestamp: Dot {
                value: ms,
                timestamp: ms,
                context: None,
            },
        }
    }
}

impl DoorReport {
    fn body(&self) -> DoorBody<'_> {
        DoorBody {
            auto_door_status: Dot {
                value: i64::from(self.status == "OPEN"),
                timestamp: self.at.timestamp_millis(),
                context: Some(DoorContext {
                    status: &self.status,
                    date: self.at.format("%Y-%m-%d").to_string(),
                    time: self.at.format("%H:%M:%S").to_string(),
                }),
            },
        }
    }
}

// ── Client ───────────────────────────────────────────────────────────

/// HTTP client for the telemetry backend.
///
/// Each call is a single POST bounded by the transport timeout; callers
/// decide whether to retry (the orchestrator never does).
#[derive(Clone)]
pub struct TelemetryClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl TelemetryClient {
    /// Build a client that injects the token header on every request.
    pub fn new(
        endpoint: Url,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        let mut value = HeaderValue::from_str(token.expose_secret())
            .map_err(|e| Error::ClientSetup(format!("invalid telemetry token: {e}")))?;
        value.set_sensitive(true);
        headers.insert(HeaderName::from_static("x-auth-token"), value);

        let http = transport.build_client_with_headers(headers)?;
        Ok(Self { http, endpoint })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn from_reqwest(endpoint: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            endpoint: Url::parse(endpoint)?,
        })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Report an admission.
    pub async fn send_presence(&self, report: &PresenceReport) -> Result<(), Error> {
        self.post(&report.body()).await
    }

    /// Report a door state change.
    pub async fn send_door_status(&self, report: &DoorReport) -> Result<(), Error> {
        self.post(&report.body()).await
    }

    async fn post<B: Serialize + Sync>(&self, body: &B) -> Result<(), Error> {
        debug!(endpoint = %self.endpoint, "POST telemetry");
        let resp = self.http.post(self.endpoint.clone()).json(body).send().await?;
        let status = resp.status();
        if status.as_u16() == 200 || status.as_u16() == 201 {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Error::Status {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap()
    }

    #[test]
    fn presence_body_shape() {
        let report = PresenceReport {
            name: "alice".into(),
            course: "Fisika".into(),
            at: at(),
        };
        let json = serde_json::to_value(report.body()).unwrap();
        let ms = at().timestamp_millis();

        assert_eq!(json["person_presence"]["value"], 1);
        assert_eq!(json["person_presence"]["timestamp"], ms);
        assert_eq!(json["person_presence"]["context"]["name"], "alice");
        assert_eq!(json["person_presence"]["context"]["date"], "2024-01-01");
        assert_eq!(json["person_presence"]["context"]["time"], "09:30:00");
        assert_eq!(json["person_presence"]["context"]["course"], "Fisika");
        assert_eq!(json["attendance_timestamp"]["value"], ms);
        assert!(json["attendance_timestamp"].get("context").is_none());
    }

    #[test]
    fn door_body_value_tracks_status() {
        let open = DoorReport { status: "OPEN".into(), at: at() };
        let close = DoorReport { status: "CLOSE".into(), at: at() };

        let open_json = serde_json::to_value(open.body()).unwrap();
        let close_json = serde_json::to_value(close.body()).unwrap();

        assert_eq!(open_json["auto_door_status"]["value"], 1);
        assert_eq!(close_json["auto_door_status"]["value"], 0);
        assert_eq!(close_json["auto_door_status"]["context"]["status"], "CLOSE");
    }
}
