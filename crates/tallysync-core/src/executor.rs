// ── Authenticated request executor ──
//
// Sends one logical call with the current API key. A 401 on the first
// attempt triggers a heal, and the call is retried exactly once if the
// key rotated. The retry budget is a local, so concurrent calls never
// share or exhaust each other's.

use std::sync::Arc;

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tallysync_api::{ApiClient, ApiRequest, ApiResponse, Company};
use tracing::{debug, warn};

use crate::bootstrap::Bootstrapper;
use crate::credential::CredentialStore;
use crate::error::CoreError;

// ── Options / outcome ────────────────────────────────────────────────

/// Method, query and body for one call. Defaults to a bare `GET`.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self::get()
    }
}

impl RequestOptions {
    fn with_method(method: Method) -> Self {
        Self {
            method,
            query: Vec::new(),
            body: None,
        }
    }

    pub fn get() -> Self {
        Self::with_method(Method::GET)
    }

    pub fn post(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::with_method(Method::POST)
        }
    }

    pub fn put(body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::with_method(Method::PUT)
        }
    }

    pub fn delete() -> Self {
        Self::with_method(Method::DELETE)
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    fn into_request(self, path: &str) -> ApiRequest {
        ApiRequest {
            method: self.method,
            path: path.to_owned(),
            query: self.query,
            body: self.body,
        }
    }
}

/// A successful call.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub status: u16,
    /// Decoded body; `Null` for 204 or an empty body.
    pub payload: Value,
    /// Only populated by [`RequestExecutor::request_paginated`].
    pub total_count: Option<u64>,
}

/// One page of a paginated collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total_count: Option<u64>,
}

// ── Executor ─────────────────────────────────────────────────────────

/// Authenticated calls against the backend with heal-and-retry-once.
///
/// Cheaply cloneable; clones share the store and the heal lock.
#[derive(Debug, Clone)]
pub struct RequestExecutor {
    api: ApiClient,
    store: Arc<CredentialStore>,
    healer: Arc<Bootstrapper>,
}

impl RequestExecutor {
    pub fn new(api: ApiClient, store: Arc<CredentialStore>, healer: Arc<Bootstrapper>) -> Self {
        Self { api, store, healer }
    }

    /// Execute `options` against `path`.
    pub async fn request(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<RequestOutcome, CoreError> {
        let response = self.send(options.into_request(path)).await?;
        Ok(RequestOutcome {
            status: response.status,
            payload: response.body,
            total_count: None,
        })
    }

    /// Like [`request`](Self::request), but also reports `X-Total-Count`.
    pub async fn request_paginated(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<RequestOutcome, CoreError> {
        let response = self.send(options.into_request(path)).await?;
        Ok(RequestOutcome {
            status: response.status,
            payload: response.body,
            total_count: response.total_count,
        })
    }

    // ── Typed helpers ────────────────────────────────────────────────

    /// `GET path` decoded into `T`.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, CoreError> {
        let outcome = self.request(path, RequestOptions::get()).await?;
        decode(path, outcome.payload)
    }

    /// `GET path` decoded as a JSON array, with the collection total.
    pub async fn list_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        options: RequestOptions,
    ) -> Result<Page<T>, CoreError> {
        let outcome = self.request_paginated(path, options).await?;
        Ok(Page {
            items: decode(path, outcome.payload)?,
            total_count: outcome.total_count,
        })
    }

    /// `GET /api/companies`.
    pub async fn list_companies(&self) -> Result<Vec<Company>, CoreError> {
        self.get_json("/api/companies").await
    }

    // ── Retry core ───────────────────────────────────────────────────

    async fn send(&self, request: ApiRequest) -> Result<ApiResponse, CoreError> {
        // Read the generation before the credential: a rotation racing
        // this snapshot is then seen as "already healed".
        let generation = self.store.generation();
        let credential = self.store.get();

        match self
            .api
            .execute(&credential.backend_url, credential.api_key.as_ref(), &request)
            .await
        {
            Err(e) if e.is_unauthorized() => {}
            other => return other.map_err(CoreError::from),
        }

        debug!(path = %request.path, "401 from backend, attempting heal");
        let outcome = self.healer.heal_after(generation).await;
        if !outcome.rotated() {
            warn!(path = %request.path, %outcome, "API key rejected and no replacement available");
            return Err(CoreError::Auth {
                message: format!("API key rejected by backend (heal: {outcome})"),
            });
        }

        let credential = self.store.get();
        match self
            .api
            .execute(&credential.backend_url, credential.api_key.as_ref(), &request)
            .await
        {
            Err(e) if e.is_unauthorized() => {
                warn!(path = %request.path, "healed API key also rejected");
                Err(CoreError::Auth {
                    message: "API key rejected by backend after refresh".into(),
                })
            }
            other => other.map_err(CoreError::from),
        }
    }
}

fn decode<T: DeserializeOwned>(path: &str, payload: Value) -> Result<T, CoreError> {
    serde_json::from_value(payload)
        .map_err(|e| CoreError::Internal(format!("unexpected response from {path}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn options_build_requests() {
        let request = RequestOptions::post(json!({"name": "Acme"}))
            .with_query("dry_run", "true")
            .into_request("/api/companies");

        assert_eq!(request.method, Method::POST);
        assert_eq!(request.path, "/api/companies");
        assert_eq!(request.query, vec![("dry_run".into(), "true".into())]);
        assert_eq!(request.body, Some(json!({"name": "Acme"})));
    }

    #[test]
    fn default_options_are_bare_get() {
        let options = RequestOptions::default();
        assert_eq!(options.method, Method::GET);
        assert!(options.query.is_empty());
        assert!(options.body.is_none());
    }

    #[test]
    fn decode_reports_path_on_mismatch() {
        let err = decode::<Vec<Company>>("/api/companies", json!({"not": "a list"})).unwrap_err();
        assert!(err.to_string().contains("/api/companies"), "got {err}");
    }
}
