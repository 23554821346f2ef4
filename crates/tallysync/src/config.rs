//! CLI configuration: settings file plus per-invocation flag overrides.
//!
//! `--backend` / `--api-key` and the `TALLYSYNC_BACKEND_URL` /
//! `TALLYSYNC_SELECTED_COMPANY` variables apply to one run only. When any
//! is set the session gets an in-memory copy of the persisted state, so a
//! key healed during that run is not written back to disk either.
//! Flags win over the environment.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tallysync_config::{
    FilePersistence, config_path, env_overrides, load_config_from, to_client_config,
};
use tallysync_core::{ClientConfig, MemoryPersistence, StatePersistence, TlsVerification};

use crate::cli::GlobalOpts;
use crate::error::CliError;

/// The settings file this invocation uses.
pub fn settings_path(global: &GlobalOpts) -> PathBuf {
    global.config.clone().unwrap_or_else(config_path)
}

/// Runtime config and state persistence for a session.
pub fn resolve(
    global: &GlobalOpts,
) -> Result<(ClientConfig, Arc<dyn StatePersistence>), CliError> {
    let path = settings_path(global);
    let settings = load_config_from(&path)?;

    let mut client = to_client_config(&settings)?;
    if let Some(secs) = global.timeout {
        client.timeout = Duration::from_secs(secs);
    }
    if let Some(delay) = global.reconnect_delay {
        client.reconnect_delay = delay;
    }
    if global.insecure {
        client.tls = TlsVerification::DangerAcceptInvalid;
    }

    let env = env_overrides()?;
    let file = FilePersistence::new(path);
    if global.backend.is_none() && global.api_key.is_none() && env.is_empty() {
        let persistence: Arc<dyn StatePersistence> = Arc::new(file);
        return Ok((client, persistence));
    }

    let mut state = file.load()?;
    if let Some(ref backend) = env.backend_url {
        state.backend_url = Some(parse_backend_url(backend)?.to_string());
    }
    if env.selected_company.is_some() {
        state.selected_company = env.selected_company;
    }
    if let Some(ref backend) = global.backend {
        state.backend_url = Some(parse_backend_url(backend)?.to_string());
    }
    if let Some(ref key) = global.api_key {
        state.api_key = Some(SecretString::from(key.clone()));
    }
    let persistence: Arc<dyn StatePersistence> = Arc::new(MemoryPersistence::with_state(state));
    Ok((client, persistence))
}

/// Validate a user-supplied backend address.
pub fn parse_backend_url(raw: &str) -> Result<url::Url, CliError> {
    let url = url::Url::parse(raw).map_err(|e| CliError::Validation {
        field: "backend".into(),
        reason: format!("{e}: {raw}"),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(CliError::Validation {
            field: "backend".into(),
            reason: format!("expected an http or https URL, got '{raw}'"),
        });
    }
    Ok(url)
}
