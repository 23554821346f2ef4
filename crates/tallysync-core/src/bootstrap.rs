// ── Bootstrap / auto-heal ──
//
// Recovers a usable API key from the backend's unauthenticated info
// endpoint. Safe to call on every start and after any 401: heals are
// serialized, a caller that waited on another heal reuses its rotation,
// and an unproductive heal is not repeated within the cooldown.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tallysync_api::ApiClient;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::credential::CredentialStore;

/// Result of one bootstrap attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum BootstrapOutcome {
    /// A new key was stored; dependents must re-initialize.
    KeyRotated,
    /// The backend's key matches ours, or it did not offer one.
    Unchanged,
    /// Info endpoint failed (timeout, network, non-2xx, bad body).
    Unreachable,
    /// Skipped: a heal that found nothing finished moments ago.
    Throttled,
}

impl BootstrapOutcome {
    pub fn rotated(self) -> bool {
        self == Self::KeyRotated
    }
}

#[derive(Debug, Default)]
struct HealState {
    last_unproductive: Option<Instant>,
}

/// The auto-heal protocol.
#[derive(Debug)]
pub struct Bootstrapper {
    api: ApiClient,
    store: Arc<CredentialStore>,
    timeout: Duration,
    cooldown: Duration,
    state: Mutex<HealState>,
}

impl Bootstrapper {
    pub fn new(
        api: ApiClient,
        store: Arc<CredentialStore>,
        timeout: Duration,
        cooldown: Duration,
    ) -> Self {
        Self {
            api,
            store,
            timeout,
            cooldown,
            state: Mutex::new(HealState::default()),
        }
    }

    /// Opportunistic heal: fetch the backend's key and adopt it if new.
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        self.run(None).await
    }

    /// Reactive heal after a 401 observed at credential `seen_generation`.
    ///
    /// If the credential moved on since then (another caller healed while
    /// this one waited), reports [`BootstrapOutcome::KeyRotated`] without
    /// touching the network.
    pub async fn heal_after(&self, seen_generation: u64) -> BootstrapOutcome {
        self.run(Some(seen_generation)).await
    }

    async fn run(&self, seen_generation: Option<u64>) -> BootstrapOutcome {
        let mut state = self.state.lock().await;

        if seen_generation.is_some_and(|seen| seen != self.store.generation()) {
            debug!("credential already healed by a concurrent caller");
            return BootstrapOutcome::KeyRotated;
        }

        if let Some(finished) = state.last_unproductive {
            if finished.elapsed() < self.cooldown {
                debug!(
                    cooldown_ms = u64::try_from(self.cooldown.as_millis()).unwrap_or(u64::MAX),
                    "skipping heal, last attempt found no new key"
                );
                return BootstrapOutcome::Throttled;
            }
        }

        let outcome = self.fetch_and_adopt().await;
        state.last_unproductive = (!outcome.rotated()).then(Instant::now);
        outcome
    }

    async fn fetch_and_adopt(&self) -> BootstrapOutcome {
        let credential = self.store.get();

        let info = match self
            .api
            .fetch_info(&credential.backend_url, self.timeout)
            .await
        {
            Ok(info) => info,
            Err(e) => {
                warn!(
                    backend = %credential.backend_url,
                    error = %e,
                    "backend info endpoint unreachable, cannot heal API key"
                );
                return BootstrapOutcome::Unreachable;
            }
        };

        match info.api_key.filter(|key| !key.trim().is_empty()) {
            Some(key) if credential.key_matches(&key) => {
                debug!("backend API key matches stored key");
                BootstrapOutcome::Unchanged
            }
            Some(key) => {
                if self.store.set_api_key(SecretString::from(key)) {
                    info!(
                        backend = %credential.backend_url,
                        had_key = credential.has_key(),
                        "adopted API key from backend"
                    );
                    BootstrapOutcome::KeyRotated
                } else {
                    BootstrapOutcome::Unchanged
                }
            }
            None => {
                debug!("backend info did not include an API key");
                BootstrapOutcome::Unchanged
            }
        }
    }
}
