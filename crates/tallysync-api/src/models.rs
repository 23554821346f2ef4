// Response shapes for the backend's unauthenticated meta endpoints and
// the company collection.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Body of `GET /api/info`.
///
/// `api_key` is the key the backend currently expects on authenticated
/// calls. Everything is optional so an older backend that omits a field
/// still decodes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub build: Option<String>,
    #[serde(default)]
    pub db_path: Option<String>,
}

/// Body of `GET /api/health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub scheduler_running: bool,
}

impl Health {
    pub fn is_ok(&self) -> bool {
        self.status.eq_ignore_ascii_case("ok")
    }
}

/// A company configured on the backend (`GET /api/companies`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: i64,
    pub name: String,
    pub tally_company_name: String,
    pub host: String,
    pub port: u16,
    pub is_active: bool,
    pub sync_interval_minutes: u32,
    #[serde(default)]
    pub last_synced_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub created_at: Option<NaiveDateTime>,
}
