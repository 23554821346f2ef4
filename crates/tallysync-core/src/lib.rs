//! Resilient client session for the TallySync backend, between
//! `tallysync-api` and UI consumers (CLI, desktop shells).
//!
//! - **[`CredentialStore`]**: single owner of the backend address and API
//!   key. Lock-free snapshots, whole-value writes, and a generation counter
//!   that signals "session invalidated" on every key change.
//!
//! - **[`Bootstrapper`]**: recovers the key from the backend's
//!   unauthenticated `/api/info` endpoint. Single-flight, with a short
//!   cooldown after heals that found nothing new.
//!
//! - **[`RequestExecutor`]**: authenticated calls with heal-and-retry-once
//!   on 401.
//!
//! - **[`ConnectorHandle`]**: the event stream actor. One stream at a time,
//!   fixed-delay reconnect, re-scoping per selected company.
//!
//! - **[`StatusProjector`]**: derives a human-readable [`StatusLabel`] from
//!   connection state and sync results.
//!
//! - **[`Session`]**: wires it all together and reopens the stream when
//!   the key rotates.

pub mod bootstrap;
pub mod config;
pub mod connector;
pub mod credential;
pub mod error;
pub mod event;
pub mod executor;
pub mod session;
pub mod status;

// ── Primary re-exports ──────────────────────────────────────────────
pub use bootstrap::{BootstrapOutcome, Bootstrapper};
pub use config::{ClientConfig, DEFAULT_BACKEND_URL, DEFAULT_RECONNECT_DELAY, TlsVerification};
pub use connector::{ConnectionState, ConnectorHandle, SseSource, StreamSource};
pub use credential::{
    CompanyId, Credential, CredentialStore, MemoryPersistence, PersistedState, StatePersistence,
};
pub use error::CoreError;
pub use event::DomainEvent;
pub use executor::{Page, RequestExecutor, RequestOptions, RequestOutcome};
pub use session::Session;
pub use status::{StatusLabel, StatusLevel, StatusProjector};

// Wire types consumers need without depending on tallysync-api directly.
pub use tallysync_api::{Company, Health, ServerInfo};
