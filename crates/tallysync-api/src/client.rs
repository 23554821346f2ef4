// Async HTTP client for the TallySync backend.
//
// Every call is a single attempt: the caller supplies the backend address
// and the API key for that attempt. Retry and credential healing live one
// layer up, in tallysync-core.

use std::time::Duration;

use reqwest::header::{ACCEPT, HeaderValue};
use reqwest::{Method, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;
use url::Url;

use crate::error::Error;
use crate::events::EventStream;
use crate::models::{Health, ServerInfo};
use crate::transport::TransportConfig;

/// Header carrying the API key on authenticated calls.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Header carrying the collection size on paginated list endpoints.
pub const TOTAL_COUNT_HEADER: &str = "X-Total-Count";

// ── Error response shape (FastAPI style) ─────────────────────────────

#[derive(serde::Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    detail: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl ErrorResponse {
    fn into_message(self) -> Option<String> {
        match self.detail {
            Some(Value::String(s)) => Some(s),
            Some(Value::Null) | None => self.message.or(self.error),
            Some(other) => Some(other.to_string()),
        }
    }
}

// ── Request / response ───────────────────────────────────────────────

/// One outbound API call, independent of the credential it is sent with.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the backend root, e.g. `/api/companies`.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    /// Decoded JSON body; `Value::Null` for 204 or an empty body.
    pub body: Value,
    /// Parsed `X-Total-Count`, when the endpoint sends one.
    pub total_count: Option<u64>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Async client for the TallySync backend.
///
/// Cheaply cloneable; both inner `reqwest::Client`s are reference-counted.
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    stream_http: reqwest::Client,
}

impl ApiClient {
    /// Build both HTTP clients from a transport config.
    pub fn new(transport: &TransportConfig) -> Result<Self, Error> {
        Ok(Self {
            http: transport.build_client()?,
            stream_http: transport.build_stream_client()?,
        })
    }

    /// Wrap an existing `reqwest::Client` for both requests and streams.
    pub fn from_reqwest(http: reqwest::Client) -> Self {
        Self {
            stream_http: http.clone(),
            http,
        }
    }

    // ── URL builder ──────────────────────────────────────────────────

    /// Join a backend path onto the base address.
    ///
    /// The base may carry a path prefix (`http://host/tally`); paths are
    /// always resolved beneath it.
    pub fn endpoint(base_url: &Url, path: &str) -> Result<Url, Error> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        Ok(base.join(path.trim_start_matches('/'))?)
    }

    // ── Unauthenticated meta endpoints ───────────────────────────────

    /// `GET /api/info` with a short per-request timeout. Never sends a key.
    pub async fn fetch_info(&self, base_url: &Url, timeout: Duration) -> Result<ServerInfo, Error> {
        let url = Self::endpoint(base_url, "api/info")?;
        debug!("GET {url} (unauthenticated)");

        let resp = self.http.get(url).timeout(timeout).send().await?;
        Self::decode(resp).await
    }

    /// `GET /api/health`. Never sends a key.
    pub async fn fetch_health(&self, base_url: &Url) -> Result<Health, Error> {
        let url = Self::endpoint(base_url, "api/health")?;
        debug!("GET {url} (unauthenticated)");

        let resp = self.http.get(url).send().await?;
        Self::decode(resp).await
    }

    // ── Authenticated calls ──────────────────────────────────────────

    /// Execute one authenticated request.
    ///
    /// 401 maps to [`Error::Unauthorized`]; any other non-2xx maps to
    /// [`Error::Http`] with a best-effort message from the body.
    pub async fn execute(
        &self,
        base_url: &Url,
        api_key: Option<&SecretString>,
        request: &ApiRequest,
    ) -> Result<ApiResponse, Error> {
        let url = Self::endpoint(base_url, &request.path)?;
        debug!(method = %request.method, "{url}");

        let mut builder = self.http.request(request.method.clone(), url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        let resp = with_api_key(builder, api_key)?.send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::parse_error(status, resp).await);
        }

        let total_count = resp
            .headers()
            .get(TOTAL_COUNT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());

        let text = resp.text().await?;
        let body = if status == StatusCode::NO_CONTENT || text.trim().is_empty() {
            Value::Null
        } else {
            parse_json(text)?
        };

        Ok(ApiResponse {
            status: status.as_u16(),
            body,
            total_count,
        })
    }

    /// Open the server-sent event stream, optionally scoped to a company.
    pub async fn open_events(
        &self,
        base_url: &Url,
        api_key: Option<&SecretString>,
        company_id: Option<i64>,
    ) -> Result<EventStream, Error> {
        let mut url = Self::endpoint(base_url, "api/events")?;
        if let Some(id) = company_id {
            url.query_pairs_mut()
                .append_pair("company_id", &id.to_string());
        }
        debug!("GET {url} (event stream)");

        let builder = self
            .stream_http
            .get(url)
            .header(ACCEPT, "text/event-stream");
        let resp = with_api_key(builder, api_key)?.send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Self::parse_error(status, resp).await);
        }

        Ok(EventStream::from_response(resp))
    }

    // ── Response handling ────────────────────────────────────────────

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, Error> {
        let status = resp.status();
        if !status.is_success() {
            return Err(Self::parse_error(status, resp).await);
        }
        let text = resp.text().await?;
        parse_json(text)
    }

    async fn parse_error(status: StatusCode, resp: reqwest::Response) -> Error {
        if status == StatusCode::UNAUTHORIZED {
            return Error::Unauthorized;
        }

        let raw = resp.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&raw)
            .ok()
            .and_then(ErrorResponse::into_message)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

        Error::Http {
            status: status.as_u16(),
            message,
        }
    }
}

fn with_api_key(
    builder: RequestBuilder,
    api_key: Option<&SecretString>,
) -> Result<RequestBuilder, Error> {
    let Some(key) = api_key else {
        return Ok(builder);
    };
    let mut value = HeaderValue::from_str(key.expose_secret())
        .map_err(|e| Error::InvalidHeader(e.to_string()))?;
    value.set_sensitive(true);
    Ok(builder.header(API_KEY_HEADER, value))
}

fn parse_json<T: DeserializeOwned>(body: String) -> Result<T, Error> {
    serde_json::from_str(&body).map_err(|e| {
        let preview: String = body.chars().take(200).collect();
        Error::Deserialization {
            message: format!("{e} (body preview: {preview:?})"),
            body,
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_under_root() {
        let base = Url::parse("http://localhost:8001").unwrap();
        let url = ApiClient::endpoint(&base, "/api/companies").unwrap();
        assert_eq!(url.as_str(), "http://localhost:8001/api/companies");
    }

    #[test]
    fn endpoint_keeps_path_prefix() {
        let base = Url::parse("https://office.example/tally").unwrap();
        let url = ApiClient::endpoint(&base, "api/info").unwrap();
        assert_eq!(url.as_str(), "https://office.example/tally/api/info");
    }

    #[test]
    fn error_message_prefers_detail() {
        let body: ErrorResponse =
            serde_json::from_str(r#"{"detail":"Order already pushed to Tally"}"#).unwrap();
        assert_eq!(
            body.into_message().as_deref(),
            Some("Order already pushed to Tally")
        );

        let body: ErrorResponse = serde_json::from_str(r#"{"error":"boom"}"#).unwrap();
        assert_eq!(body.into_message().as_deref(), Some("boom"));

        let body: ErrorResponse = serde_json::from_str("{}").unwrap();
        assert_eq!(body.into_message(), None);
    }

    #[test]
    fn structured_detail_is_stringified() {
        let body: ErrorResponse =
            serde_json::from_str(r#"{"detail":[{"loc":["body","port"],"msg":"too big"}]}"#)
                .unwrap();
        let message = body.into_message().unwrap();
        assert!(message.contains("too big"), "got {message}");
    }
}
