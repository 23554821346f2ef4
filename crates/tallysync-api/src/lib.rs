// tallysync-api: Async wire client for the TallySync backend (REST + SSE events)

pub mod client;
pub mod error;
pub mod events;
pub mod models;
pub mod transport;

pub use client::{API_KEY_HEADER, ApiClient, ApiRequest, ApiResponse, TOTAL_COUNT_HEADER};
pub use error::Error;
pub use events::{EventStream, StreamEvent, SyncComplete, SyncError};
pub use models::{Company, Health, ServerInfo};
pub use transport::{TlsMode, TransportConfig};
