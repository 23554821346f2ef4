// ── Session ──
//
// Wires the credential store, healer, executor, event connector and
// status projector into one client session. When the API key changes
// (heal or manual edit), the session re-creates everything that captured
// the old key: the event stream is reopened and subscribers are told.

use std::sync::Arc;

use tallysync_api::{ApiClient, Health, ServerInfo};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::bootstrap::{BootstrapOutcome, Bootstrapper};
use crate::config::ClientConfig;
use crate::connector::{
    ConnectionState, ConnectorHandle, EVENT_CHANNEL_CAPACITY, SseSource, StreamSource,
};
use crate::credential::{CompanyId, Credential, CredentialStore, StatePersistence};
use crate::error::CoreError;
use crate::event::DomainEvent;
use crate::executor::RequestExecutor;
use crate::status::{StatusLabel, StatusProjector};

/// A running client session.
///
/// Construction spawns background tasks, so it must happen inside a
/// tokio runtime. Call [`start`](Self::start) to heal and connect.
#[derive(Debug)]
pub struct Session {
    config: ClientConfig,
    api: ApiClient,
    store: Arc<CredentialStore>,
    healer: Arc<Bootstrapper>,
    executor: RequestExecutor,
    connector: ConnectorHandle,
    events: broadcast::Sender<DomainEvent>,
    status: StatusProjector,
    cancel: CancellationToken,
    connector_task: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

impl Session {
    /// Session backed by the SSE event stream.
    pub fn new(
        config: ClientConfig,
        persistence: Arc<dyn StatePersistence>,
    ) -> Result<Self, CoreError> {
        Self::with_stream_source(config, persistence, SseSource::new)
    }

    /// Session with a custom event source, built from the session's parts.
    pub fn with_stream_source<S, F>(
        config: ClientConfig,
        persistence: Arc<dyn StatePersistence>,
        make_source: F,
    ) -> Result<Self, CoreError>
    where
        S: StreamSource,
        F: FnOnce(ApiClient, Arc<CredentialStore>, Arc<Bootstrapper>) -> S,
    {
        let api = ApiClient::new(&config.transport())?;
        let store = Arc::new(CredentialStore::open(
            persistence,
            config.default_backend_url.clone(),
        ));
        let healer = Arc::new(Bootstrapper::new(
            api.clone(),
            Arc::clone(&store),
            config.bootstrap_timeout,
            config.bootstrap_cooldown,
        ));
        let executor = RequestExecutor::new(api.clone(), Arc::clone(&store), Arc::clone(&healer));

        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let source = make_source(api.clone(), Arc::clone(&store), Arc::clone(&healer));
        let (connector, connector_task) =
            ConnectorHandle::spawn(source, config.reconnect_delay, events.clone());

        let cancel = CancellationToken::new();
        let status = StatusProjector::spawn(
            connector.watch_state(),
            events.subscribe(),
            cancel.child_token(),
        );
        let watcher = spawn_rotation_watcher(
            store.watch_generation(),
            connector.clone(),
            events.clone(),
            cancel.child_token(),
        );

        Ok(Self {
            config,
            api,
            store,
            healer,
            executor,
            connector,
            events,
            status,
            cancel,
            connector_task,
            watcher,
        })
    }

    /// Opportunistic heal, then open the stream for the persisted company.
    pub async fn start(&self) -> BootstrapOutcome {
        let outcome = self.healer.bootstrap().await;
        debug!(%outcome, "startup bootstrap finished");
        self.connector.set_scope(self.store.selected_company());
        outcome
    }

    /// Run a heal now, outside the 401 path.
    pub async fn bootstrap(&self) -> BootstrapOutcome {
        self.healer.bootstrap().await
    }

    /// Persist the selection and re-scope the event stream.
    pub fn select_company(&self, company: Option<CompanyId>) {
        self.store.set_selected_company(company);
        self.connector.set_scope(company);
    }

    pub fn selected_company(&self) -> Option<CompanyId> {
        self.store.selected_company()
    }

    // ── Unauthenticated probes ───────────────────────────────────────

    pub async fn info(&self) -> Result<ServerInfo, CoreError> {
        let credential = self.store.get();
        self.api
            .fetch_info(&credential.backend_url, self.config.timeout)
            .await
            .map_err(CoreError::from)
    }

    pub async fn health(&self) -> Result<Health, CoreError> {
        let credential = self.store.get();
        self.api
            .fetch_health(&credential.backend_url)
            .await
            .map_err(CoreError::from)
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn credentials(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn credential(&self) -> Arc<Credential> {
        self.store.get()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    pub fn status(&self) -> StatusLabel {
        self.status.label()
    }

    pub fn watch_status(&self) -> watch::Receiver<StatusLabel> {
        self.status.watch()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connector.state()
    }

    pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
        self.connector.watch_state()
    }

    /// Close the stream and stop every background task.
    pub async fn shutdown(self) {
        // Connector first, so the projector sees `Closed` before it stops.
        self.connector.shutdown();
        if let Err(e) = self.connector_task.await {
            debug!(error = %e, "connector task ended abnormally");
        }
        self.cancel.cancel();
        if let Err(e) = self.watcher.await {
            debug!(error = %e, "rotation watcher ended abnormally");
        }
        self.status.join().await;
        info!("session shut down");
    }
}

/// Re-initialize dependents whenever the credential generation moves.
fn spawn_rotation_watcher(
    mut generations: watch::Receiver<u64>,
    connector: ConnectorHandle,
    events: broadcast::Sender<DomainEvent>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                changed = generations.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let generation = *generations.borrow_and_update();
                    info!(generation, "credential changed, reopening event stream");
                    let _ = events.send(DomainEvent::CredentialRotated);
                    connector.reconnect();
                }
            }
        }
    })
}
