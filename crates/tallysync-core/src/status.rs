// ── Status projection ──
//
// Turns connection state plus the last successful sync into the label a
// status indicator shows. `project` is pure; `StatusProjector` keeps a
// label current from the connector's channels.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connector::ConnectionState;
use crate::event::DomainEvent;

/// How often "Synced 3m ago" style labels are refreshed.
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

const DISCONNECTED_HINT: &str =
    "Check that the backend is running and the backend address in settings is correct";

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum StatusLevel {
    Pending,
    Ok,
    Degraded,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLabel {
    pub level: StatusLevel,
    pub text: String,
    /// Where to look when the level is `Degraded`.
    pub hint: Option<&'static str>,
}

impl StatusLabel {
    fn new(level: StatusLevel, text: impl Into<String>) -> Self {
        Self {
            level,
            text: text.into(),
            hint: None,
        }
    }
}

/// Label for a connection state and the time of the last completed sync.
pub fn project(
    state: ConnectionState,
    last_synced: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> StatusLabel {
    match state {
        ConnectionState::Connecting => StatusLabel::new(StatusLevel::Pending, "Connecting…"),
        ConnectionState::Live => match last_synced {
            Some(at) => StatusLabel::new(
                StatusLevel::Ok,
                format!("Synced {}", relative_time(at, now)),
            ),
            None => StatusLabel::new(StatusLevel::Ok, "Live"),
        },
        ConnectionState::Error => StatusLabel {
            hint: Some(DISCONNECTED_HINT),
            ..StatusLabel::new(StatusLevel::Degraded, "Disconnected")
        },
        ConnectionState::Closed => StatusLabel::new(StatusLevel::Offline, "Offline"),
    }
}

/// "just now", "42s ago", "5m ago", "3h ago", "2d ago".
pub fn relative_time(then: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let secs = (now - then).num_seconds().max(0);
    match secs {
        0..10 => "just now".into(),
        10..60 => format!("{secs}s ago"),
        60..3600 => format!("{}m ago", secs / 60),
        3600..86_400 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

// ── Projector task ───────────────────────────────────────────────────

/// Background task publishing the current [`StatusLabel`].
#[derive(Debug)]
pub struct StatusProjector {
    label: watch::Receiver<StatusLabel>,
    task: JoinHandle<()>,
}

impl StatusProjector {
    /// Spawn the projector. It stops on `cancel` or when its inputs close.
    pub fn spawn(
        mut states: watch::Receiver<ConnectionState>,
        mut events: broadcast::Receiver<DomainEvent>,
        cancel: CancellationToken,
    ) -> Self {
        let initial = project(*states.borrow_and_update(), None, Utc::now());
        let (tx, label) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut last_synced: Option<DateTime<Utc>> = None;
            let mut refresh = tokio::time::interval(REFRESH_INTERVAL);
            refresh.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    changed = states.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    event = events.recv() => match event {
                        Ok(DomainEvent::SyncCompleted { synced_at, .. }) => {
                            last_synced = Some(synced_at.unwrap_or_else(Utc::now));
                        }
                        Ok(_) => continue,
                        Err(RecvError::Lagged(skipped)) => {
                            debug!(skipped, "status projector lagged behind events");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = refresh.tick() => {}
                }

                let next = project(*states.borrow_and_update(), last_synced, Utc::now());
                tx.send_if_modified(|current| {
                    if *current == next {
                        return false;
                    }
                    *current = next;
                    true
                });
            }

            // Inputs are gone: report whatever the connector last said.
            let last = project(*states.borrow(), last_synced, Utc::now());
            tx.send_replace(last);
        });

        Self { label, task }
    }

    pub fn label(&self) -> StatusLabel {
        self.label.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<StatusLabel> {
        self.label.clone()
    }

    pub async fn join(self) {
        if let Err(e) = self.task.await {
            debug!(error = %e, "status projector task ended abnormally");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::TimeDelta;
    use pretty_assertions::assert_eq;

    use super::*;

    fn at(secs_ago: i64, now: DateTime<Utc>) -> DateTime<Utc> {
        now - TimeDelta::seconds(secs_ago)
    }

    #[test]
    fn labels_per_state() {
        let now = Utc::now();

        assert_eq!(
            project(ConnectionState::Connecting, None, now),
            StatusLabel::new(StatusLevel::Pending, "Connecting…")
        );
        assert_eq!(project(ConnectionState::Live, None, now).text, "Live");
        assert_eq!(
            project(ConnectionState::Live, Some(at(300, now)), now).text,
            "Synced 5m ago"
        );
        assert_eq!(project(ConnectionState::Closed, None, now).level, StatusLevel::Offline);
    }

    #[test]
    fn disconnected_carries_hint() {
        let label = project(ConnectionState::Error, Some(Utc::now()), Utc::now());
        assert_eq!(label.level, StatusLevel::Degraded);
        assert_eq!(label.text, "Disconnected");
        assert!(label.hint.is_some());
    }

    #[test]
    fn relative_time_buckets() {
        let now = Utc::now();
        assert_eq!(relative_time(at(3, now), now), "just now");
        assert_eq!(relative_time(at(42, now), now), "42s ago");
        assert_eq!(relative_time(at(7200, now), now), "2h ago");
        assert_eq!(relative_time(at(3 * 86_400, now), now), "3d ago");
        // Clock skew: a sync "in the future" is still just now.
        assert_eq!(relative_time(at(-30, now), now), "just now");
    }

    #[tokio::test]
    async fn projector_follows_state_and_syncs() {
        let (state_tx, states) = watch::channel(ConnectionState::Connecting);
        let (event_tx, events) = broadcast::channel(16);
        let cancel = CancellationToken::new();

        let projector = StatusProjector::spawn(states, events, cancel.clone());
        let mut label = projector.watch();
        assert_eq!(projector.label().text, "Connecting…");

        state_tx.send_replace(ConnectionState::Live);
        label.wait_for(|l| l.text == "Live").await.unwrap();

        event_tx
            .send(DomainEvent::SyncCompleted {
                company_id: Some(1),
                company_name: "Acme Traders".into(),
                record_count: 10,
                synced_at: Some(Utc::now()),
            })
            .unwrap();
        label.wait_for(|l| l.text == "Synced just now").await.unwrap();

        state_tx.send_replace(ConnectionState::Error);
        label
            .wait_for(|l| l.level == StatusLevel::Degraded)
            .await
            .unwrap();

        cancel.cancel();
        projector.join().await;
    }
}
