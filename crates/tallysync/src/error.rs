//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` variants into user-facing errors with actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use tallysync_config::ConfigError;
use tallysync_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach the backend at {url}")]
    #[diagnostic(
        code(tallysync::connection_failed),
        help(
            "Check that the TallySync backend is running and reachable.\n\
             Reason: {reason}\n\
             Change the address with: tallysync config set-backend <URL>"
        )
    )]
    ConnectionFailed { url: String, reason: String },

    #[error("Backend request timed out")]
    #[diagnostic(
        code(tallysync::timeout),
        help("Increase the timeout with --timeout or check backend responsiveness.")
    )]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(tallysync::auth_failed),
        help(
            "The backend rejected the API key and did not offer a new one.\n\
             Copy the key from the backend settings and run: tallysync config set-key <KEY>"
        )
    )]
    AuthFailed { message: String },

    // ── Backend responses ────────────────────────────────────────────
    #[error("Not found: {message}")]
    #[diagnostic(code(tallysync::not_found))]
    NotFound { message: String },

    #[error("Backend error (HTTP {status}): {message}")]
    #[diagnostic(code(tallysync::api_error))]
    Api { status: u16, message: String },

    #[error("Backend reports status '{status}'")]
    #[diagnostic(
        code(tallysync::unhealthy),
        help("The backend is up but not ready. Check its logs.")
    )]
    Unhealthy { status: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(tallysync::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error(transparent)]
    #[diagnostic(
        code(tallysync::config),
        help("Inspect the settings file with: tallysync config path")
    )]
    Config(#[from] ConfigError),

    #[error("Could not save settings: {message}")]
    #[diagnostic(code(tallysync::persistence))]
    Persistence { message: String },

    #[error("Internal error: {0}")]
    #[diagnostic(code(tallysync::internal))]
    Internal(String),

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    #[diagnostic(code(tallysync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::Timeout => exit_code::TIMEOUT,
            Self::AuthFailed { .. } => exit_code::AUTH,
            Self::NotFound { .. } => exit_code::NOT_FOUND,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Network { url, reason } => CliError::ConnectionFailed { url, reason },
            CoreError::Timeout => CliError::Timeout,
            CoreError::Auth { message } => CliError::AuthFailed { message },
            CoreError::Server { status, message } => CliError::Api { status, message },
            CoreError::NotFound { message } => CliError::NotFound { message },
            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },
            CoreError::Persistence { message } => CliError::Persistence { message },
            CoreError::Internal(message) => CliError::Internal(message),
        }
    }
}
