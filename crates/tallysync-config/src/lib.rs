//! Persisted settings for TallySync clients.
//!
//! One flat TOML file holds the backend address, the API key (or a marker
//! that it lives in the OS keyring), the selected company and transport
//! tuning. [`FilePersistence`] plugs it into the core credential store;
//! [`to_client_config`] turns it into a `tallysync_core::ClientConfig`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use tallysync_core::{
    ClientConfig, CompanyId, CoreError, DEFAULT_BACKEND_URL, PersistedState, StatePersistence,
    TlsVerification,
};

const ENV_PREFIX: &str = "TALLYSYNC_";
const KEYRING_SERVICE: &str = "tallysync";
const KEYRING_USER: &str = "api-key";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

impl From<ConfigError> for CoreError {
    fn from(err: ConfigError) -> Self {
        CoreError::Persistence {
            message: err.to_string(),
        }
    }
}

// ── TOML config ─────────────────────────────────────────────────────

/// Where the API key is kept between runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStorage {
    /// Plaintext `api_key` entry in the config file.
    #[default]
    File,
    /// OS keyring; the file never contains the key.
    Keyring,
}

/// The on-disk settings file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// API key (plaintext; only used with `key_storage = "file"`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_company: Option<CompanyId>,

    #[serde(default)]
    pub key_storage: KeyStorage,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// `/api/info` timeout during key recovery, in seconds.
    #[serde(default = "default_bootstrap_timeout")]
    pub bootstrap_timeout: u64,

    /// Event stream reconnect delay in milliseconds.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default)]
    pub insecure: bool,

    /// Path to custom CA certificate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            api_key: None,
            selected_company: None,
            key_storage: KeyStorage::default(),
            timeout: default_timeout(),
            bootstrap_timeout: default_bootstrap_timeout(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            insecure: false,
            ca_cert: None,
        }
    }
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.into()
}
fn default_timeout() -> u64 {
    30
}
fn default_bootstrap_timeout() -> u64 {
    3
}
fn default_reconnect_delay_ms() -> u64 {
    5000
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the settings file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "tallysync", "tallysync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("state.toml");
            p
        },
        |dirs| dirs.config_dir().join("state.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("tallysync");
    p
}

// ── Loading ─────────────────────────────────────────────────────────

/// Defaults, then the file at `path`, then `TALLYSYNC_*` environment.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = file_figment(path).merge(Env::prefixed(ENV_PREFIX));
    Ok(figment.extract()?)
}

/// [`load_config_from`] the canonical path.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Persisted-state values taken from the environment for this process only.
///
/// `TALLYSYNC_BACKEND_URL` and `TALLYSYNC_SELECTED_COMPANY` win over the
/// file, but must never be written back to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct StateOverrides {
    #[serde(default)]
    pub backend_url: Option<String>,
    #[serde(default)]
    pub selected_company: Option<CompanyId>,
}

impl StateOverrides {
    pub fn is_empty(&self) -> bool {
        self.backend_url.is_none() && self.selected_company.is_none()
    }
}

/// Read [`StateOverrides`] from `TALLYSYNC_*` variables.
pub fn env_overrides() -> Result<StateOverrides, ConfigError> {
    let env = Env::prefixed(ENV_PREFIX).only(&["backend_url", "selected_company"]);
    Ok(Figment::from(env).extract()?)
}

/// Defaults plus the file only. What gets rewritten on save, so
/// environment overrides never leak into the file.
fn read_file_config(path: &Path) -> Result<Config, ConfigError> {
    Ok(file_figment(path).extract()?)
}

fn file_figment(path: &Path) -> Figment {
    Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
}

// ── Saving ──────────────────────────────────────────────────────────

pub fn save_config_to(path: &Path, cfg: &Config) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

/// Serialize config to TOML and write to the canonical path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(&config_path(), cfg)
}

// ── Translation to core config ──────────────────────────────────────

/// Build the runtime `ClientConfig` from settings.
pub fn to_client_config(cfg: &Config) -> Result<ClientConfig, ConfigError> {
    let default_backend_url =
        url::Url::parse(&cfg.backend_url).map_err(|e| ConfigError::Validation {
            field: "backend_url".into(),
            reason: format!("{e}: {}", cfg.backend_url),
        })?;

    let tls = if cfg.insecure {
        TlsVerification::DangerAcceptInvalid
    } else if let Some(ref ca_path) = cfg.ca_cert {
        TlsVerification::CustomCa(ca_path.clone())
    } else {
        TlsVerification::SystemDefaults
    };

    Ok(ClientConfig {
        default_backend_url,
        timeout: Duration::from_secs(cfg.timeout),
        bootstrap_timeout: Duration::from_secs(cfg.bootstrap_timeout),
        reconnect_delay: Duration::from_millis(cfg.reconnect_delay_ms),
        tls,
        ..ClientConfig::default()
    })
}

// ── Keyring ─────────────────────────────────────────────────────────

fn keyring_entry() -> Result<keyring::Entry, ConfigError> {
    Ok(keyring::Entry::new(KEYRING_SERVICE, KEYRING_USER)?)
}

fn keyring_read() -> Result<Option<SecretString>, ConfigError> {
    match keyring_entry()?.get_password() {
        Ok(secret) => Ok(Some(SecretString::from(secret))),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn keyring_write(api_key: Option<&SecretString>) -> Result<(), ConfigError> {
    let entry = keyring_entry()?;
    match api_key {
        Some(key) => entry.set_password(key.expose_secret())?,
        None => match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(e.into()),
        },
    }
    Ok(())
}

// ── File-backed persistence ─────────────────────────────────────────

/// [`StatePersistence`] over the settings file (and keyring).
///
/// Saving rewrites only the persisted client state; every other setting
/// in the file is kept as-is.
#[derive(Debug, Clone)]
pub struct FilePersistence {
    path: PathBuf,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Persistence at the canonical config path.
    pub fn at_default_path() -> Self {
        Self::new(config_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatePersistence for FilePersistence {
    fn load(&self) -> Result<PersistedState, CoreError> {
        let cfg = read_file_config(&self.path)?;
        let api_key = match cfg.key_storage {
            KeyStorage::File => cfg.api_key.map(SecretString::from),
            KeyStorage::Keyring => keyring_read()?,
        };
        // Only an address actually stored in the file; otherwise the
        // store falls back to the configured default.
        let backend_url = Figment::from(Toml::file(&self.path))
            .extract_inner::<String>("backend_url")
            .ok();

        Ok(PersistedState {
            backend_url,
            api_key,
            selected_company: cfg.selected_company,
        })
    }

    fn save(&self, state: &PersistedState) -> Result<(), CoreError> {
        let mut cfg = read_file_config(&self.path)?;

        if let Some(ref url) = state.backend_url {
            cfg.backend_url.clone_from(url);
        }
        cfg.selected_company = state.selected_company;
        cfg.api_key = match cfg.key_storage {
            KeyStorage::File => state
                .api_key
                .as_ref()
                .map(|key| key.expose_secret().to_owned()),
            KeyStorage::Keyring => {
                keyring_write(state.api_key.as_ref())?;
                None
            }
        };

        save_config_to(&self.path, &cfg)?;
        debug!(path = %self.path.display(), "client state saved");
        Ok(())
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use pretty_assertions::assert_eq;
    use tallysync_core::CredentialStore;

    use super::*;

    fn temp_path() -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("state.toml");
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let (_dir, path) = temp_path();
        let cfg = read_file_config(&path).unwrap();
        assert_eq!(cfg, Config::default());
        assert_eq!(cfg.backend_url, "http://localhost:8001");
        assert_eq!(cfg.reconnect_delay_ms, 5000);
    }

    #[test]
    fn save_then_read_round_trips() {
        let (_dir, path) = temp_path();
        let cfg = Config {
            backend_url: "http://10.0.0.5:8001".into(),
            selected_company: Some(4),
            timeout: 12,
            ..Config::default()
        };

        save_config_to(&path, &cfg).unwrap();

        assert_eq!(read_file_config(&path).unwrap(), cfg);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(!raw.contains("api_key"), "absent key must not be written");
    }

    #[test]
    fn file_persistence_round_trips_state() {
        let (_dir, path) = temp_path();
        let persistence = FilePersistence::new(&path);

        persistence
            .save(&PersistedState {
                backend_url: Some("http://10.0.0.5:8001/".into()),
                api_key: Some(SecretString::from("abc123".to_owned())),
                selected_company: Some(7),
            })
            .unwrap();

        let loaded = persistence.load().unwrap();
        assert_eq!(loaded.backend_url.as_deref(), Some("http://10.0.0.5:8001/"));
        assert_eq!(
            loaded.api_key.as_ref().map(|k| k.expose_secret().to_owned()),
            Some("abc123".to_owned())
        );
        assert_eq!(loaded.selected_company, Some(7));
    }

    #[test]
    fn file_persistence_keeps_other_settings() {
        let (_dir, path) = temp_path();
        save_config_to(
            &path,
            &Config {
                timeout: 9,
                insecure: true,
                ..Config::default()
            },
        )
        .unwrap();

        FilePersistence::new(&path)
            .save(&PersistedState {
                backend_url: Some("http://backend:8001/".into()),
                api_key: None,
                selected_company: None,
            })
            .unwrap();

        let cfg = read_file_config(&path).unwrap();
        assert_eq!(cfg.timeout, 9);
        assert!(cfg.insecure);
        assert_eq!(cfg.backend_url, "http://backend:8001/");
        assert_eq!(cfg.api_key, None);
    }

    #[test]
    fn missing_file_has_no_stored_backend() {
        let (_dir, path) = temp_path();
        let state = FilePersistence::new(&path).load().unwrap();
        assert_eq!(state.backend_url, None);
        assert!(state.api_key.is_none());
    }

    #[test]
    fn env_backend_reaches_credential_store() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("TALLYSYNC_BACKEND_URL", "http://10.9.9.9:8001");
            let path = jail.directory().join("state.toml");

            let settings = load_config_from(&path).unwrap();
            let client = to_client_config(&settings).unwrap();
            let store = CredentialStore::open(
                Arc::new(FilePersistence::new(&path)),
                client.default_backend_url,
            );

            assert_eq!(store.get().backend_url.as_str(), "http://10.9.9.9:8001/");
            Ok(())
        });
    }

    #[test]
    fn env_overrides_cover_state_keys_only() {
        figment::Jail::expect_with(|jail| {
            assert!(env_overrides().unwrap().is_empty());

            jail.set_env("TALLYSYNC_BACKEND_URL", "http://10.9.9.9:8001");
            jail.set_env("TALLYSYNC_SELECTED_COMPANY", "4");
            jail.set_env("TALLYSYNC_TIMEOUT", "5");

            assert_eq!(
                env_overrides().unwrap(),
                StateOverrides {
                    backend_url: Some("http://10.9.9.9:8001".into()),
                    selected_company: Some(4),
                }
            );
            Ok(())
        });
    }

    #[test]
    fn client_config_translation() {
        let cfg = Config {
            backend_url: "https://office.example/tally".into(),
            timeout: 10,
            reconnect_delay_ms: 2500,
            ca_cert: Some(PathBuf::from("/etc/ssl/office-ca.pem")),
            ..Config::default()
        };

        let client = to_client_config(&cfg).unwrap();
        assert_eq!(
            client.default_backend_url.as_str(),
            "https://office.example/tally"
        );
        assert_eq!(client.timeout, Duration::from_secs(10));
        assert_eq!(client.reconnect_delay, Duration::from_millis(2500));
        assert_eq!(
            client.tls,
            TlsVerification::CustomCa(PathBuf::from("/etc/ssl/office-ca.pem"))
        );

        let insecure = to_client_config(&Config {
            insecure: true,
            ..cfg
        })
        .unwrap();
        assert_eq!(insecure.tls, TlsVerification::DangerAcceptInvalid);
    }

    #[test]
    fn invalid_backend_url_is_rejected() {
        let err = to_client_config(&Config {
            backend_url: "not a url".into(),
            ..Config::default()
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "backend_url"));
    }

    #[test]
    fn key_storage_parses_lowercase() {
        let (_dir, path) = temp_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "key_storage = \"keyring\"\nselected_company = 3\n").unwrap();

        let cfg = read_file_config(&path).unwrap();
        assert_eq!(cfg.key_storage, KeyStorage::Keyring);
        assert_eq!(cfg.selected_company, Some(3));
    }
}
