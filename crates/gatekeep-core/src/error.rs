// ── Core error types ──
//
// Domain errors from gatekeep-core. Consumers never see HTTP status codes
// or MQTT client errors directly: the `From<gatekeep_api::Error>` impl
// folds transport failures into the connectivity / delivery taxonomy.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connectivity ─────────────────────────────────────────────────
    #[error("Cannot reach {target}: {reason}")]
    Connectivity { target: String, reason: String },

    #[error("{target} timed out after {timeout_secs}s")]
    Timeout { target: String, timeout_secs: u64 },

    // ── Input ────────────────────────────────────────────────────────
    #[error("Malformed {what}: {reason}")]
    MalformedInput { what: String, reason: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("Resource unavailable: {resource}")]
    ResourceUnavailable { resource: String },

    // ── Delivery ─────────────────────────────────────────────────────
    #[error("Telemetry delivery failed: {message}")]
    TelemetryDelivery {
        message: String,
        status: Option<u16>,
    },

    #[error("Bus publish failed: {message}")]
    Publish { message: String },

    // ── Persistence ──────────────────────────────────────────────────
    #[error("Persistence failed for {path}: {reason}")]
    Persistence { path: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl CoreError {
    pub(crate) fn malformed(what: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedInput {
            what: what.into(),
            reason: reason.into(),
        }
    }

    /// Whether the failure is worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Connectivity { .. } | Self::Timeout { .. } | Self::ResourceUnavailable { .. }
        )
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<gatekeep_api::Error> for CoreError {
    fn from(err: gatekeep_api::Error) -> Self {
        use gatekeep_api::Error as Api;

        match err {
            Api::Transport(ref e) => {
                let target = e
                    .url()
                    .map_or_else(|| "<unknown>".to_owned(), ToString::to_string);
                if e.is_timeout() {
                    CoreError::Timeout {
                        target,
                        timeout_secs: 0,
                    }
                } else {
                    CoreError::Connectivity {
                        target,
                        reason: e.to_string(),
                    }
                }
            }
            Api::Timeout { timeout_secs } => CoreError::Timeout {
                target: "remote endpoint".into(),
                timeout_secs,
            },
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::ClientSetup(message) => CoreError::Config { message },
            Api::Status { status, body } => CoreError::TelemetryDelivery {
                message: format!("HTTP {status}: {body}"),
                status: Some(status),
            },
            Api::BusConnect(reason) => CoreError::Connectivity {
                target: "message bus".into(),
                reason,
            },
            Api::BusPublish { topic, reason } => CoreError::Publish {
                message: format!("{topic}: {reason}"),
            },
            Api::Deserialization { message, body: _ } => {
                CoreError::malformed("remote response", message)
            }
        }
    }
}
