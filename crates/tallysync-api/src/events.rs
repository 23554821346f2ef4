//! Server-sent event stream decoding.
//!
//! The backend pushes named events over `GET /api/events`:
//!
//! | event           | payload                                                        |
//! |-----------------|----------------------------------------------------------------|
//! | `connected`     | `{ "channel": "all" \| "<company_id>" }` (optional)            |
//! | `sync_complete` | `{ company_id, company_name, records, synced_at, duration_s }` |
//! | `sync_error`    | `{ company_id, error }`                                        |
//! | `heartbeat`     | `{}`                                                           |
//!
//! [`EventStream`] turns the raw response body into typed [`StreamEvent`]s.
//! Unknown event names and undecodable payloads are logged and skipped so a
//! newer backend never tears the stream down. Transport failures end the
//! stream with [`Error::Stream`].

use std::fmt;
use std::pin::Pin;
use std::task::{Context, Poll};

use chrono::{DateTime, NaiveDateTime, Utc};
use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Error;

// ── Event payloads ───────────────────────────────────────────────────

/// Payload of a `sync_complete` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncComplete {
    #[serde(default)]
    pub company_id: Option<i64>,
    #[serde(default)]
    pub company_name: String,
    /// Number of records pulled by the sync run.
    #[serde(default)]
    pub records: u64,
    /// Completion time. The backend emits naive ISO-8601 in UTC.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub duration_s: Option<f64>,
}

/// Payload of a `sync_error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncError {
    #[serde(default)]
    pub company_id: Option<i64>,
    #[serde(default)]
    pub error: String,
}

#[derive(Deserialize)]
struct Hello {
    #[serde(default)]
    channel: Option<String>,
}

// ── StreamEvent ──────────────────────────────────────────────────────

/// A named event received from the backend stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// First event on every stream; the backend has registered the subscriber.
    Connected { channel: Option<String> },
    SyncComplete(SyncComplete),
    SyncError(SyncError),
    /// Keep-alive, sent after 25s of silence.
    Heartbeat,
}

impl StreamEvent {
    /// Decode a named event. Returns `Ok(None)` for event names this
    /// client does not know.
    pub fn parse(name: &str, data: &str) -> Result<Option<Self>, Error> {
        let event = match name {
            "connected" => {
                // No payload is required; a missing or odd body still counts.
                let channel = serde_json::from_str::<Hello>(data)
                    .ok()
                    .and_then(|hello| hello.channel);
                Self::Connected { channel }
            }
            "sync_complete" => Self::SyncComplete(decode_payload(data)?),
            "sync_error" => Self::SyncError(decode_payload(data)?),
            "heartbeat" => Self::Heartbeat,
            _ => return Ok(None),
        };
        Ok(Some(event))
    }

    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::SyncComplete(_) => "sync_complete",
            Self::SyncError(_) => "sync_error",
            Self::Heartbeat => "heartbeat",
        }
    }
}

fn decode_payload<T: DeserializeOwned>(data: &str) -> Result<T, Error> {
    serde_json::from_str(data).map_err(|e| Error::Deserialization {
        message: e.to_string(),
        body: data.to_owned(),
    })
}

/// Parse a backend timestamp: RFC 3339, or naive ISO-8601 taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| raw.parse::<NaiveDateTime>().ok().map(|n| n.and_utc()))
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

// ── EventStream ──────────────────────────────────────────────────────

/// A typed stream of backend events.
///
/// Ends with `None` when the backend closes the connection, or yields a
/// final `Err` on transport failure.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Result<StreamEvent, Error>> + Send>>,
}

impl EventStream {
    /// Wrap any stream of decoded events.
    pub fn new<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<StreamEvent, Error>> + Send + 'static,
    {
        Self {
            inner: Box::pin(stream),
        }
    }

    /// Decode an HTTP response body as server-sent events.
    pub(crate) fn from_response(resp: reqwest::Response) -> Self {
        Self::new(decode_sse(resp.bytes_stream()))
    }
}

impl Stream for EventStream {
    type Item = Result<StreamEvent, Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream").finish_non_exhaustive()
    }
}

/// Frame raw body chunks into SSE events and decode the ones we know.
pub fn decode_sse<S, B, E>(body: S) -> impl Stream<Item = Result<StreamEvent, Error>> + Send
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    async_stream::try_stream! {
        let frames = body.eventsource();
        let mut frames = std::pin::pin!(frames);

        while let Some(frame) = frames.next().await {
            let frame = frame.map_err(|e| Error::Stream(e.to_string()))?;
            if let Some(event) = decode_frame(&frame.event, &frame.data) {
                yield event;
            }
        }
    }
}

fn decode_frame(name: &str, data: &str) -> Option<StreamEvent> {
    match StreamEvent::parse(name, data) {
        Ok(Some(event)) => Some(event),
        Ok(None) => {
            tracing::debug!(event = name, "skipping unknown stream event");
            None
        }
        Err(e) => {
            tracing::warn!(event = name, error = %e, "dropping undecodable stream event");
            None
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::convert::Infallible;

    use chrono::TimeZone;
    use futures_util::stream;
    use pretty_assertions::assert_eq;

    use super::*;

    async fn decode_chunks(chunks: Vec<&'static str>) -> Vec<Result<StreamEvent, Error>> {
        let body = stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
        decode_sse(body).collect().await
    }

    #[test]
    fn parse_sync_complete() {
        let event = StreamEvent::parse(
            "sync_complete",
            r#"{"company_id":7,"company_name":"Acme","records":42,"synced_at":"2026-02-17T10:00:00","duration_s":1.25}"#,
        )
        .unwrap()
        .unwrap();

        let StreamEvent::SyncComplete(payload) = event else {
            panic!("expected SyncComplete, got {event:?}");
        };
        assert_eq!(payload.company_id, Some(7));
        assert_eq!(payload.company_name, "Acme");
        assert_eq!(payload.records, 42);
        assert_eq!(
            payload.synced_at,
            Some(Utc.with_ymd_and_hms(2026, 2, 17, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn parse_sync_error() {
        let event = StreamEvent::parse("sync_error", r#"{"company_id":2,"error":"Tally offline"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            StreamEvent::SyncError(SyncError {
                company_id: Some(2),
                error: "Tally offline".into(),
            })
        );
    }

    #[test]
    fn connected_tolerates_missing_payload() {
        let event = StreamEvent::parse("connected", "").unwrap().unwrap();
        assert_eq!(event, StreamEvent::Connected { channel: None });

        let event = StreamEvent::parse("connected", r#"{"channel":"3"}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            StreamEvent::Connected {
                channel: Some("3".into())
            }
        );
    }

    #[test]
    fn unknown_event_is_none() {
        assert!(StreamEvent::parse("order_pushed", "{}").unwrap().is_none());
    }

    #[test]
    fn malformed_payload_is_deserialization_error() {
        let err = StreamEvent::parse("sync_complete", "not json").unwrap_err();
        assert!(matches!(err, Error::Deserialization { .. }), "got {err:?}");
    }

    #[test]
    fn timestamps_accept_offsets_and_naive() {
        let with_offset = parse_timestamp("2026-02-17T15:30:00+05:30").unwrap();
        let naive = parse_timestamp("2026-02-17T10:00:00.000001").unwrap();
        assert_eq!(with_offset, Utc.with_ymd_and_hms(2026, 2, 17, 10, 0, 0).unwrap());
        assert_eq!(naive.timestamp(), with_offset.timestamp());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[tokio::test]
    async fn decodes_events_split_across_chunks() {
        let events = decode_chunks(vec![
            "event: connected\ndata: {\"channel\":\"all\"}\n\n",
            "event: sync_com",
            "plete\ndata: {\"records\":42,\"company_name\":\"Acme\"}\n\n",
            "event: heartbeat\ndata: {}\n\n",
        ])
        .await;

        let names: Vec<_> = events
            .iter()
            .map(|e| e.as_ref().unwrap().name())
            .collect();
        assert_eq!(names, vec!["connected", "sync_complete", "heartbeat"]);
    }

    #[tokio::test]
    async fn skips_unknown_and_malformed_events() {
        let events = decode_chunks(vec![
            "event: mystery\ndata: {}\n\n",
            "event: sync_error\ndata: {oops\n\n",
            "event: sync_error\ndata: {\"error\":\"boom\"}\n\n",
        ])
        .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(
            events.first(),
            Some(Ok(StreamEvent::SyncError(SyncError { error, .. }))) if error == "boom"
        ));
    }
}
