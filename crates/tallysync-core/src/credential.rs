// ── Credential store ──
//
// Single owner and single writer of the backend address + API key pair.
// Reads are lock-free snapshots; writes replace the whole value and then
// persist it, serialized behind one writer lock so the persisted copy
// always reflects the latest in-memory value.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use arc_swap::ArcSwap;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::CoreError;

/// Backend identifier of a company (the event stream scope).
pub type CompanyId = i64;

// ── Credential ───────────────────────────────────────────────────────

/// Backend address plus the API key that authorizes this client.
#[derive(Debug, Clone)]
pub struct Credential {
    pub backend_url: Url,
    /// Absent before the first successful bootstrap, or after `clear()`.
    pub api_key: Option<SecretString>,
}

impl Credential {
    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Compare the stored key against a candidate without exposing it.
    pub fn key_matches(&self, candidate: &str) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|key| key.expose_secret() == candidate)
    }
}

fn same_key(a: Option<&SecretString>, b: Option<&SecretString>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.expose_secret() == b.expose_secret(),
        (None, None) => true,
        _ => false,
    }
}

// ── Persistence seam ─────────────────────────────────────────────────

/// The values that survive a restart, keyed by fixed names.
#[derive(Debug, Clone, Default)]
pub struct PersistedState {
    pub backend_url: Option<String>,
    pub api_key: Option<SecretString>,
    pub selected_company: Option<CompanyId>,
}

/// Where the credential store keeps its state between runs.
///
/// Implemented on disk by `tallysync-config`; [`MemoryPersistence`] is the
/// in-process variant for tests and ephemeral overrides.
pub trait StatePersistence: Send + Sync {
    fn load(&self) -> Result<PersistedState, CoreError>;
    fn save(&self, state: &PersistedState) -> Result<(), CoreError>;
}

/// In-memory [`StatePersistence`].
#[derive(Debug, Default)]
pub struct MemoryPersistence {
    state: Mutex<PersistedState>,
    saves: AtomicUsize,
}

impl MemoryPersistence {
    pub fn with_state(state: PersistedState) -> Self {
        Self {
            state: Mutex::new(state),
            saves: AtomicUsize::new(0),
        }
    }

    /// The last saved state.
    pub fn snapshot(&self) -> PersistedState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl StatePersistence for MemoryPersistence {
    fn load(&self) -> Result<PersistedState, CoreError> {
        Ok(self.snapshot())
    }

    fn save(&self, state: &PersistedState) -> Result<(), CoreError> {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ── CredentialStore ──────────────────────────────────────────────────

/// Owner of the client's credential and selected company.
///
/// Every change to the credential bumps a generation counter, published
/// on a `watch` channel. Dependents (the event connector, in-flight
/// requests) use it as the "session invalidated" signal.
pub struct CredentialStore {
    current: ArcSwap<Credential>,
    selected_company: ArcSwap<Option<CompanyId>>,
    writer: Mutex<()>,
    generation: watch::Sender<u64>,
    persistence: Arc<dyn StatePersistence>,
}

impl CredentialStore {
    /// Load persisted state, falling back to `default_url` and no key.
    ///
    /// Load failures are logged, never fatal: the store always starts.
    pub fn open(persistence: Arc<dyn StatePersistence>, default_url: Url) -> Self {
        let state = persistence.load().unwrap_or_else(|e| {
            warn!(error = %e, "could not load persisted client state, using defaults");
            PersistedState::default()
        });

        let backend_url = match state.backend_url.as_deref().map(Url::parse) {
            Some(Ok(url)) => url,
            Some(Err(e)) => {
                warn!(error = %e, "persisted backend URL is invalid, using default");
                default_url
            }
            None => default_url,
        };
        let api_key = state
            .api_key
            .filter(|key| !key.expose_secret().trim().is_empty());

        debug!(%backend_url, has_key = api_key.is_some(), "credential store opened");

        let (generation, _) = watch::channel(0);
        Self {
            current: ArcSwap::from_pointee(Credential {
                backend_url,
                api_key,
            }),
            selected_company: ArcSwap::from_pointee(state.selected_company),
            writer: Mutex::new(()),
            generation,
            persistence,
        }
    }

    // ── Reads ────────────────────────────────────────────────────────

    /// Current credential snapshot. Never blocks, never fails.
    pub fn get(&self) -> Arc<Credential> {
        self.current.load_full()
    }

    pub fn selected_company(&self) -> Option<CompanyId> {
        **self.selected_company.load()
    }

    /// Number of credential changes since the store was opened.
    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Subscribe to credential changes.
    pub fn watch_generation(&self) -> watch::Receiver<u64> {
        self.generation.subscribe()
    }

    // ── Writes ───────────────────────────────────────────────────────

    /// Replace address and key together.
    pub fn set(&self, backend_url: Url, api_key: Option<SecretString>) {
        let _guard = self.lock_writer();
        let previous = self.current.load_full();
        let changed = previous.backend_url != backend_url
            || !same_key(previous.api_key.as_ref(), api_key.as_ref());

        self.current.store(Arc::new(Credential {
            backend_url,
            api_key,
        }));
        if changed {
            self.bump("credential replaced");
        }
        self.persist();
    }

    /// Replace the key, keeping the address. Returns `true` if it changed.
    pub fn set_api_key(&self, api_key: SecretString) -> bool {
        let _guard = self.lock_writer();
        let previous = self.current.load_full();
        if same_key(previous.api_key.as_ref(), Some(&api_key)) {
            return false;
        }

        self.current.store(Arc::new(Credential {
            backend_url: previous.backend_url.clone(),
            api_key: Some(api_key),
        }));
        self.bump("API key replaced");
        self.persist();
        true
    }

    /// Remove the key; the address is kept as last-known-good.
    pub fn clear(&self) {
        let _guard = self.lock_writer();
        let previous = self.current.load_full();
        if previous.api_key.is_none() {
            return;
        }

        self.current.store(Arc::new(Credential {
            backend_url: previous.backend_url.clone(),
            api_key: None,
        }));
        self.bump("API key cleared");
        self.persist();
    }

    pub fn set_selected_company(&self, company: Option<CompanyId>) {
        let _guard = self.lock_writer();
        self.selected_company.store(Arc::new(company));
        self.persist();
    }

    // ── Internals ────────────────────────────────────────────────────

    fn lock_writer(&self) -> MutexGuard<'_, ()> {
        self.writer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self, reason: &'static str) {
        self.generation.send_modify(|generation| *generation += 1);
        info!(generation = self.generation(), reason, "credential changed");
    }

    fn persist(&self) {
        let credential = self.current.load_full();
        let state = PersistedState {
            backend_url: Some(credential.backend_url.to_string()),
            api_key: credential.api_key.clone(),
            selected_company: self.selected_company(),
        };
        if let Err(e) = self.persistence.save(&state) {
            warn!(error = %e, "failed to persist client state; keeping in-memory value");
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("current", &self.get())
            .field("selected_company", &self.selected_company())
            .field("generation", &self.generation())
            .finish_non_exhaustive()
    }
}

// ── Tests ────────────────────────────────────────────────────────────
