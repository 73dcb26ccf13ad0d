// Camera snapshot client
//
// Pulls single JPEG frames from the camera peripheral announced on the
// topology topic. Decoding is left to the identification backend; this
// client only moves bytes with a bounded timeout.

use bytes::Bytes;
use tracing::trace;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Default still-capture path served by the camera firmware.
pub const DEFAULT_CAPTURE_PATH: &str = "/capture";

/// HTTP client fetching still frames from a camera host.
#[derive(Clone)]
pub struct SnapshotClient {
    http: reqwest::Client,
    capture_path: String,
    timeout_secs: u64,
}

impl SnapshotClient {
    pub fn new(capture_path: impl Into<String>, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            capture_path: capture_path.into(),
            timeout_secs: transport.timeout_secs(),
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn from_reqwest(capture_path: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            http,
            capture_path: capture_path.into(),
            timeout_secs: 0,
        }
    }

    /// Build the capture URL for a camera host (`ip` or `ip:port`).
    pub fn capture_url(&self, host: &str) -> Result<Url, Error> {
        let base = if host.starts_with("http://") || host.starts_with("https://") {
            Url::parse(host)?
        } else {
            Url::parse(&format!("http://{host}"))?
        };
        Ok(base.join(&self.capture_path)?)
    }

    /// Fetch one frame from `host`.
    pub async fn fetch(&self, host: &str) -> Result<Bytes, Error> {
        let url = self.capture_url(host)?;
        trace!(%url, "fetching frame");

        let resp = self.http.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    timeout_secs: self.timeout_secs,
                }
            } else {
                Error::Transport(e)
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.bytes().await?)
    }
}
