// Identification oracle client
//
// The face-identification backend is a separate service. It accepts a JPEG
// frame and answers with one entry per detected face: a known identity or
// `null` for an unknown face. It also serves the list of identities it was
// trained on, which becomes the orchestrator's catalog.

use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// One face found in a frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FaceMatch {
    /// Matched identity, `None` when the face is unknown.
    #[serde(default)]
    pub identity: Option<String>,
    /// Embedding distance of the best match, when the backend reports it.
    #[serde(default)]
    pub distance: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct IdentifyResponse {
    #[serde(default)]
    faces: Vec<FaceMatch>,
}

#[derive(Debug, Deserialize)]
struct IdentitiesResponse {
    names: Vec<String>,
}

/// HTTP client for the identification backend.
#[derive(Clone)]
pub struct OracleClient {
    http: reqwest::Client,
    base_url: Url,
}

impl OracleClient {
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            base_url,
        })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn from_reqwest(base_url: &str, http: reqwest::Client) -> Result<Self, Error> {
        Ok(Self {
            http,
            base_url: Url::parse(base_url)?,
        })
    }

    fn url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    /// Submit one JPEG frame for identification.
    pub async fn identify(&self, jpeg: Bytes) -> Result<Vec<FaceMatch>, Error> {
        let url = self.url("identify")?;
        let resp = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(jpeg)
            .send()
            .await?;
        let parsed: IdentifyResponse = read_json(resp).await?;
        debug!(faces = parsed.faces.len(), "oracle answered");
        Ok(parsed.faces)
    }

    /// Fetch the identities the backend can recognize.
    pub async fn identities(&self) -> Result<Vec<String>, Error> {
        let url = self.url("identities")?;
        let resp = self.http.get(url).send().await?;
        let parsed: IdentitiesResponse = read_json(resp).await?;
        Ok(parsed.names)
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
    let status = resp.status();
    let body = resp.text().await?;
    if !status.is_success() {
        return Err(Error::Status {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body,
    })
}
