// ── Frames and the identification oracle ──
//
// The pipeline never looks inside a frame: it pulls JPEG bytes from a
// `FrameSource` and hands them to an `Identifier`, which reports one
// `Detection` per face found.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Local};
use gatekeep_api::{FaceMatch, OracleClient, SnapshotClient, TransportConfig};

use crate::clock::Clock;
use crate::config::{CameraSettings, OracleSettings};
use crate::error::CoreError;

/// Default match-distance tolerance; larger distances are not confident.
pub const DEFAULT_TOLERANCE: f64 = 0.5;

/// One still frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub jpeg: Bytes,
    pub captured_at: DateTime<Local>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Identification {
    Known(String),
    Unknown,
}

/// One face seen in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub identification: Identification,
    pub confident: bool,
    pub at: DateTime<Local>,
}

impl Detection {
    pub fn known(identity: impl Into<String>, at: DateTime<Local>) -> Self {
        Self {
            identification: Identification::Known(identity.into()),
            confident: true,
            at,
        }
    }

    pub fn unknown(at: DateTime<Local>) -> Self {
        Self {
            identification: Identification::Unknown,
            confident: false,
            at,
        }
    }
}

#[async_trait]
pub trait Identifier: Send + Sync {
    async fn identify(&self, frame: &Frame) -> Result<Vec<Detection>, CoreError>;

    /// Identities this oracle was enrolled with. Empty when unknown.
    async fn identities(&self) -> Result<Vec<String>, CoreError> {
        Ok(Vec::new())
    }
}

#[async_trait]
pub trait FrameSource: Send + Sync {
    /// Grab one frame from the camera at `host`.
    async fn fetch(&self, host: &str) -> Result<Frame, CoreError>;
}

// ── HTTP adapters ────────────────────────────────────────────────────

/// Identifier backed by the HTTP identification service.
pub struct HttpIdentifier {
    client: OracleClient,
    tolerance: f64,
}

impl HttpIdentifier {
    pub fn new(client: OracleClient) -> Self {
        Self {
            client,
            tolerance: DEFAULT_TOLERANCE,
        }
    }

    /// Build from settings; `Ok(None)` when no backend is configured.
    pub fn from_settings(settings: &OracleSettings) -> Result<Option<Self>, CoreError> {
        let Some(base_url) = settings.base_url.clone() else {
            return Ok(None);
        };
        let client = OracleClient::new(base_url, &TransportConfig::with_timeout(settings.timeout))?;
        Ok(Some(Self::new(client).with_tolerance(settings.tolerance)))
    }

    pub fn with_tolerance(mut self, tolerance: f64) -> Self {
        self.tolerance = tolerance;
        self
    }

    fn to_detection(&self, face: FaceMatch, at: DateTime<Local>) -> Detection {
        match face.identity {
            Some(identity) if !identity.is_empty() => Detection {
                identification: Identification::Known(identity),
                confident: face.distance.is_none_or(|d| d < self.tolerance),
                at,
            },
            _ => Detection::unknown(at),
        }
    }
}

#[async_trait]
impl Identifier for HttpIdentifier {
    async fn identify(&self, frame: &Frame) -> Result<Vec<Detection>, CoreError> {
        let faces = self.client.identify(frame.jpeg.clone()).await?;
        Ok(faces
            .into_iter()
            .map(|face| self.to_detection(face, frame.captured_at))
            .collect())
    }

    async fn identities(&self) -> Result<Vec<String>, CoreError> {
        Ok(self.client.identities().await?)
    }
}

/// Frame source pulling stills from the camera's HTTP capture endpoint.
pub struct HttpFrameSource {
    client: SnapshotClient,
    clock: Arc<dyn Clock>,
}

impl HttpFrameSource {
    pub fn new(client: SnapshotClient, clock: Arc<dyn Clock>) -> Self {
        Self { client, clock }
    }

    pub fn from_settings(settings: &CameraSettings, clock: Arc<dyn Clock>) -> Result<Self, CoreError> {
        let transport = TransportConfig::with_timeout(settings.fetch_timeout);
        let client = SnapshotClient::new(settings.capture_path.clone(), &transport)?;
        Ok(Self::new(client, clock))
    }
}

#[async_trait]
impl FrameSource for HttpFrameSource {
    async fn fetch(&self, host: &str) -> Result<Frame, CoreError> {
        let jpeg = self.client.fetch(host).await.map_err(|e| {
            if e.is_transient() {
                CoreError::ResourceUnavailable {
                    resource: format!("camera at {host}: {e}"),
                }
            } else {
                CoreError::from(e)
            }
        })?;
        Ok(Frame {
            jpeg,
            captured_at: self.clock.now(),
        })
    }
}
