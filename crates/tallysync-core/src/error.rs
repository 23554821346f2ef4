// ── Core error types ──
//
// Client-facing errors from tallysync-core. Consumers see the failure
// taxonomy (network, auth, server, not found), never raw reqwest or serde
// errors. The `From<tallysync_api::Error>` impl does the translation.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    /// No response reached the client.
    #[error("Cannot reach backend at {url}: {reason}")]
    Network { url: String, reason: String },

    #[error("Backend request timed out")]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    /// Credential rejected even after the heal attempt.
    #[error("Authentication failed: {message}")]
    Auth { message: String },

    // ── Backend responses ────────────────────────────────────────────
    #[error("Backend error (HTTP {status}): {message}")]
    Server { status: u16, message: String },

    #[error("Not found: {message}")]
    NotFound { message: String },

    // ── Local errors ─────────────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Could not persist client state: {message}")]
    Persistence { message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// `true` when the backend could not be reached at all.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::Timeout)
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<tallysync_api::Error> for CoreError {
    fn from(err: tallysync_api::Error) -> Self {
        use tallysync_api::Error as ApiError;

        match err {
            ApiError::Unauthorized => CoreError::Auth {
                message: "API key rejected by backend".into(),
            },
            ApiError::InvalidHeader(reason) => CoreError::Config {
                message: format!("stored API key is not a valid header value: {reason}"),
            },
            ApiError::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if let Some(status) = e.status() {
                    CoreError::Server {
                        status: status.as_u16(),
                        message: e.to_string(),
                    }
                } else {
                    CoreError::Network {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                }
            }
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid backend URL: {e}"),
            },
            ApiError::Tls(reason) => CoreError::Network {
                url: String::new(),
                reason: format!("TLS error: {reason}"),
            },
            ApiError::Http {
                status: 404,
                message,
            } => CoreError::NotFound { message },
            ApiError::Http { status, message } => CoreError::Server { status, message },
            ApiError::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            ApiError::Stream(reason) => CoreError::Network {
                url: String::new(),
                reason: format!("event stream failed: {reason}"),
            },
        }
    }
}
