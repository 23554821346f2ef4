// ── Runtime client configuration ──
//
// These types describe *how* the client talks to the backend: timeouts,
// reconnect cadence, TLS. They never touch disk. The persisted address and
// key live in the credential store; tallysync-config builds a ClientConfig
// from the user's settings and hands it in.

use std::time::Duration;

use tallysync_api::{TlsMode, TransportConfig};
use url::Url;

/// Backend address used when nothing has been persisted yet.
pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8001";

/// Fixed delay between a stream failure and the next connection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// TLS verification strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TlsVerification {
    /// System CA store (strict). Default: the backend is usually plain HTTP
    /// on localhost, and HTTPS deployments use real certificates.
    #[default]
    SystemDefaults,
    /// Custom CA certificate file.
    CustomCa(std::path::PathBuf),
    /// Skip verification (self-signed certs).
    DangerAcceptInvalid,
}

/// Configuration for one client session.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Address used when the credential store has none persisted.
    pub default_backend_url: Url,
    /// Whole-request timeout for authenticated calls.
    pub timeout: Duration,
    /// Timeout for the unauthenticated info fetch during heal.
    pub bootstrap_timeout: Duration,
    /// Minimum spacing between heal attempts that found no new key.
    pub bootstrap_cooldown: Duration,
    /// Delay before reopening a failed event stream.
    pub reconnect_delay: Duration,
    pub tls: TlsVerification,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_backend_url: default_backend_url(),
            timeout: Duration::from_secs(30),
            bootstrap_timeout: Duration::from_secs(3),
            bootstrap_cooldown: Duration::from_secs(2),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            tls: TlsVerification::default(),
        }
    }
}

impl ClientConfig {
    /// Translate into the api-level transport settings.
    pub fn transport(&self) -> TransportConfig {
        let tls = match &self.tls {
            TlsVerification::SystemDefaults => TlsMode::System,
            TlsVerification::CustomCa(path) => TlsMode::CustomCa(path.clone()),
            TlsVerification::DangerAcceptInvalid => TlsMode::DangerAcceptInvalid,
        };
        TransportConfig {
            tls,
            timeout: self.timeout,
            ..TransportConfig::default()
        }
    }
}

pub fn default_backend_url() -> Url {
    Url::parse(DEFAULT_BACKEND_URL).expect("default backend URL is valid")
}
