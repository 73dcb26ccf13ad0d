//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with help text.

use miette::Diagnostic;
use thiserror::Error;

use gatekeep_config::ConfigError;
use gatekeep_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the broker at {host}:{port}")]
    #[diagnostic(
        code(gatekeep::broker_unreachable),
        help(
            "Check that the broker is running and reachable.\n\
             Override it with: gatekeep --broker <HOST> ..."
        )
    )]
    BrokerUnreachable { host: String, port: u16 },

    #[error("Could not reach {target}: {reason}")]
    #[diagnostic(code(gatekeep::connection_failed))]
    ConnectionFailed { target: String, reason: String },

    #[error("{target} timed out after {seconds}s")]
    #[diagnostic(code(gatekeep::timeout))]
    Timeout { target: String, seconds: u64 },

    // ── Input ────────────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(gatekeep::validation))]
    Validation { field: String, reason: String },

    #[error("Attendance table not found at {path}")]
    #[diagnostic(
        code(gatekeep::no_table),
        help("The table is written by `gatekeep run` after the first admission.")
    )]
    TableNotFound { path: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(gatekeep::config),
        help("Inspect the effective settings with: gatekeep config show")
    )]
    Config(#[from] ConfigError),

    #[error("Config file already exists at {path}")]
    #[diagnostic(
        code(gatekeep::config_exists),
        help("Use --force to overwrite it.")
    )]
    ConfigExists { path: String },

    // ── Runtime ──────────────────────────────────────────────────────
    #[error("{0}")]
    #[diagnostic(code(gatekeep::runtime))]
    Runtime(String),

    // ── IO / Serialization ───────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON output failed: {0}")]
    #[diagnostic(code(gatekeep::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::BrokerUnreachable { .. } | Self::ConnectionFailed { .. } => {
                exit_code::CONNECTION
            }
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            Self::TableNotFound { .. } => exit_code::NOT_FOUND,
            Self::Config(_) | Self::ConfigExists { .. } => exit_code::CONFIG,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Connectivity { target, reason } => Self::ConnectionFailed { target, reason },
            CoreError::Timeout {
                target,
                timeout_secs,
            } => Self::Timeout {
                target,
                seconds: timeout_secs,
            },
            CoreError::MalformedInput { what, reason } => Self::Validation {
                field: what,
                reason,
            },
            CoreError::ResourceUnavailable { resource } => Self::ConnectionFailed {
                target: resource,
                reason: "unavailable".into(),
            },
            other => Self::Runtime(other.to_string()),
        }
    }
}
