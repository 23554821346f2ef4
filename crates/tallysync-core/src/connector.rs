// ── Event stream connector ──
//
// One actor task owns the connection state, the open stream and the retry
// timer. They live in a single `Link` value, so there is never more than
// one stream, one pending open, or one armed timer. Callers steer it with
// commands through a `ConnectorHandle`.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tallysync_api::{ApiClient, Error as ApiError, EventStream, StreamEvent};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, trace, warn};

use crate::bootstrap::Bootstrapper;
use crate::credential::{CompanyId, CredentialStore};
use crate::event::DomainEvent;

/// Capacity of the domain event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Live-connection state as seen by the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum ConnectionState {
    /// Opening, or open but the backend has not said hello yet.
    Connecting,
    /// `connected` received; events are flowing.
    Live,
    /// Transport failed; a retry is scheduled.
    Error,
    /// Not started yet, or shut down.
    Closed,
}

// ── Stream source seam ───────────────────────────────────────────────

/// Opens one event stream for a scope.
pub trait StreamSource: Send + Sync + 'static {
    fn open(
        &self,
        scope: Option<CompanyId>,
    ) -> impl Future<Output = Result<EventStream, ApiError>> + Send;
}

/// Production source: SSE over HTTP with the current API key.
///
/// A 401 triggers a heal. The open still fails; if the heal rotated the
/// key, the session's rotation watcher reconnects right away, otherwise
/// the regular retry delay applies.
#[derive(Debug)]
pub struct SseSource {
    api: ApiClient,
    store: Arc<CredentialStore>,
    healer: Arc<Bootstrapper>,
}

impl SseSource {
    pub fn new(api: ApiClient, store: Arc<CredentialStore>, healer: Arc<Bootstrapper>) -> Self {
        Self { api, store, healer }
    }
}

impl StreamSource for SseSource {
    async fn open(&self, scope: Option<CompanyId>) -> Result<EventStream, ApiError> {
        let generation = self.store.generation();
        let credential = self.store.get();

        let result = self
            .api
            .open_events(&credential.backend_url, credential.api_key.as_ref(), scope)
            .await;

        if matches!(&result, Err(e) if e.is_unauthorized()) {
            let outcome = self.healer.heal_after(generation).await;
            debug!(%outcome, "event stream rejected API key");
        }
        result
    }
}

// ── Commands ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorCommand {
    SetScope(Option<CompanyId>),
    Reconnect,
    Shutdown,
}

// ── Handle ───────────────────────────────────────────────────────────

/// Cloneable control surface for the connector task.
///
/// The task exits when `shutdown` is called or every handle is dropped.
#[derive(Debug, Clone)]
pub struct ConnectorHandle {
    commands: mpsc::UnboundedSender<ConnectorCommand>,
    state: watch::Receiver<ConnectionState>,
    events: broadcast::Sender<DomainEvent>,
}

impl ConnectorHandle {
    /// Spawn the connector task. It stays idle and `Closed` until the
    /// first `set_scope`.
    pub fn spawn<S: StreamSource>(
        source: S,
        reconnect_delay: Duration,
        events: broadcast::Sender<DomainEvent>,
    ) -> (Self, JoinHandle<()>) {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConnectionState::Closed);

        let connector = Connector {
            source: Arc::new(source),
            scope: None,
            reconnect_delay,
            state: state_tx,
            events: events.clone(),
            link: Link::Idle,
        };
        let task = tokio::spawn(connector.run(command_rx));

        (
            Self {
                commands,
                state,
                events,
            },
            task,
        )
    }

    /// Re-scope the stream. Cancels any pending retry and reopens now.
    pub fn set_scope(&self, scope: Option<CompanyId>) {
        self.send(ConnectorCommand::SetScope(scope));
    }

    /// Reopen with the current scope (after a credential change).
    pub fn reconnect(&self) {
        self.send(ConnectorCommand::Reconnect);
    }

    pub fn shutdown(&self) {
        self.send(ConnectorCommand::Shutdown);
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    fn send(&self, command: ConnectorCommand) {
        if self.commands.send(command).is_err() {
            debug!(?command, "connector task already stopped");
        }
    }
}

// ── Actor ────────────────────────────────────────────────────────────

enum Link {
    /// Not started, or shut down.
    Idle,
    Opening(BoxFuture<'static, Result<EventStream, ApiError>>),
    Open(EventStream),
    /// Retry timer armed after a failure.
    Waiting(Pin<Box<Sleep>>),
}

enum Step {
    Opened(Result<EventStream, ApiError>),
    Received(Option<Result<StreamEvent, ApiError>>),
    RetryDue,
}

impl Link {
    /// Drive whatever the link currently holds to its next step.
    ///
    /// Cancel-safe: dropping the returned future leaves the link intact.
    async fn next_step(&mut self) -> Step {
        match self {
            Self::Idle => std::future::pending().await,
            Self::Opening(attempt) => Step::Opened(attempt.await),
            Self::Open(stream) => Step::Received(stream.next().await),
            Self::Waiting(timer) => {
                timer.as_mut().await;
                Step::RetryDue
            }
        }
    }
}

enum Wake {
    Command(Option<ConnectorCommand>),
    Step(Step),
}

struct Connector<S> {
    source: Arc<S>,
    scope: Option<CompanyId>,
    reconnect_delay: Duration,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<DomainEvent>,
    link: Link,
}

impl<S: StreamSource> Connector<S> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<ConnectorCommand>) {
        loop {
            let wake = tokio::select! {
                biased;
                command = commands.recv() => Wake::Command(command),
                step = self.link.next_step() => Wake::Step(step),
            };

            match wake {
                Wake::Command(Some(ConnectorCommand::SetScope(scope))) => {
                    self.scope = scope;
                    self.open();
                }
                Wake::Command(Some(ConnectorCommand::Reconnect)) => {
                    if matches!(self.link, Link::Idle) {
                        debug!("reconnect requested before first scope, ignoring");
                    } else {
                        self.open();
                    }
                }
                Wake::Command(Some(ConnectorCommand::Shutdown) | None) => break,
                Wake::Step(step) => self.advance(step),
            }
        }

        self.link = Link::Idle;
        self.set_state(ConnectionState::Closed);
        info!("event stream closed");
    }

    fn open(&mut self) {
        // Release the previous stream or timer before the next attempt.
        self.link = Link::Idle;
        self.set_state(ConnectionState::Connecting);
        debug!(scope = ?self.scope, "opening event stream");

        let source = Arc::clone(&self.source);
        let scope = self.scope;
        self.link = Link::Opening(Box::pin(async move { source.open(scope).await }));
    }

    fn advance(&mut self, step: Step) {
        match step {
            Step::Opened(Ok(stream)) => self.link = Link::Open(stream),
            Step::Opened(Err(e)) => self.fail(&e.to_string()),
            Step::Received(Some(Ok(event))) => self.dispatch(event),
            Step::Received(Some(Err(e))) => self.fail(&e.to_string()),
            Step::Received(None) => self.fail("stream ended"),
            Step::RetryDue => self.open(),
        }
    }

    fn fail(&mut self, reason: &str) {
        warn!(
            scope = ?self.scope,
            reason,
            retry_ms = u64::try_from(self.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
            "event stream lost"
        );
        self.link = Link::Waiting(Box::pin(tokio::time::sleep(self.reconnect_delay)));
        self.set_state(ConnectionState::Error);
    }

    fn dispatch(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Connected { channel } => {
                info!(scope = ?self.scope, channel = channel.as_deref(), "event stream live");
                self.set_state(ConnectionState::Live);
            }
            StreamEvent::SyncComplete(payload) => self.publish(payload.into()),
            StreamEvent::SyncError(payload) => self.publish(payload.into()),
            StreamEvent::Heartbeat => trace!("heartbeat"),
        }
    }

    /// Sync results only count once the backend has said hello.
    fn publish(&self, event: DomainEvent) {
        if *self.state.borrow() != ConnectionState::Live {
            debug!(scope = ?self.scope, "sync event before `connected`, dropping");
            return;
        }
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            debug!(from = %current, to = %next, "connection state");
            *current = next;
            true
        });
    }
}

// ── Tests ────────────────────────────────────────────────────────────
