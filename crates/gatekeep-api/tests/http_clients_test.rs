// Integration tests for the HTTP clients using wiremock.
#![allow(clippy::unwrap_used)]

use bytes::Bytes;
use chrono::{Local, TimeZone};
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gatekeep_api::telemetry::AUTH_HEADER;
use gatekeep_api::{
    DoorReport, Error, OracleClient, PresenceReport, SnapshotClient, TelemetryClient,
    TransportConfig,
};

// ── Telemetry ───────────────────────────────────────────────────────

async fn telemetry_setup() -> (MockServer, TelemetryClient) {
    let server = MockServer::start().await;
    let endpoint = format!("{}/api/v1.6/devices/face_recognation", server.uri());
    let client = TelemetryClient::new(
        endpoint.parse().unwrap(),
        &SecretString::from("token-123".to_string()),
        &TransportConfig::default(),
    )
    .unwrap();
    (server, client)
}

#[tokio::test]
async fn test_presence_posts_with_token() {
    let (server, client) = telemetry_setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1.6/devices/face_recognation"))
        .and(header(AUTH_HEADER, "token-123"))
        .and(body_partial_json(json!({
            "person_presence": { "value": 1, "context": { "name": "alice", "course": "Fisika" } }
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let report = PresenceReport {
        name: "alice".into(),
        course: "Fisika".into(),
        at: Local.with_ymd_and_hms(2024, 1, 1, 9, 30, 0).unwrap(),
    };
    client.send_presence(&report).await.unwrap();
}

#[tokio::test]
async fn test_door_status_non_success_is_error() {
    let (server, client) = telemetry_setup().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(402).set_body_string("quota exceeded"))
        .mount(&server)
        .await;

    let report = DoorReport {
        status: "CLOSE".into(),
        at: Local::now(),
    };
    let err = client.send_door_status(&report).await.unwrap_err();
    match err {
        Error::Status { status, body } => {
            assert_eq!(status, 402);
            assert_eq!(body, "quota exceeded");
        }
        other => panic!("expected Status error, got {other:?}"),
    }
}

// ── Camera ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_snapshot_fetch_returns_bytes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/capture"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xd8, 0xff, 0xd9]))
        .mount(&server)
        .await;

    let client = SnapshotClient::new("/capture", &TransportConfig::default()).unwrap();
    let frame = client.fetch(&server.uri()).await.unwrap();
    assert_eq!(frame, Bytes::from_static(&[0xff, 0xd8, 0xff, 0xd9]));
}

#[tokio::test]
async fn test_snapshot_fetch_server_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = SnapshotClient::from_reqwest("/capture", reqwest::Client::new());
    let err = client.fetch(&server.uri()).await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert!(err.is_transient());
}

// ── Oracle ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_identify_parses_faces() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/identify"))
        .and(header("content-type", "image/jpeg"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "faces": [
                { "identity": "alice", "distance": 0.31 },
                { "identity": null }
            ]
        })))
        .mount(&server)
        .await;

    let client = OracleClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    let faces = client.identify(Bytes::from_static(b"jpeg")).await.unwrap();

    assert_eq!(faces.len(), 2);
    assert_eq!(faces[0].identity.as_deref(), Some("alice"));
    assert_eq!(faces[0].distance, Some(0.31));
    assert!(faces[1].identity.is_none());
}

#[tokio::test]
async fn test_identities_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/identities"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "names": ["alice", "carol"] })))
        .mount(&server)
        .await;

    let client = OracleClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    assert_eq!(client.identities().await.unwrap(), vec!["alice", "carol"]);
}

#[tokio::test]
async fn test_identify_malformed_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let client = OracleClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    let err = client.identify(Bytes::new()).await.unwrap_err();
    assert!(matches!(err, Error::Deserialization { ref body, .. } if body == "<html>"));
}
