// ── Domain notifications ──
//
// What the rest of the application hears about: sync results re-emitted
// from the event stream, plus session-level credential rotation.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tallysync_api::{SyncComplete, SyncError};

use crate::credential::CompanyId;

/// A notification broadcast to subscribers, in stream receipt order.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    SyncCompleted {
        company_id: Option<CompanyId>,
        company_name: String,
        record_count: u64,
        synced_at: Option<DateTime<Utc>>,
    },
    SyncFailed {
        company_id: Option<CompanyId>,
        message: String,
    },
    /// The API key changed; dependent contexts have been re-initialized.
    CredentialRotated,
}

impl From<SyncComplete> for DomainEvent {
    fn from(payload: SyncComplete) -> Self {
        Self::SyncCompleted {
            company_id: payload.company_id,
            company_name: payload.company_name,
            record_count: payload.records,
            synced_at: payload.synced_at,
        }
    }
}

impl From<SyncError> for DomainEvent {
    fn from(payload: SyncError) -> Self {
        Self::SyncFailed {
            company_id: payload.company_id,
            message: payload.error,
        }
    }
}
