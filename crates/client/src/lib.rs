//! Alertdesk realtime client.
//!
//! Keeps one WebSocket open to the console backend, recovers it after
//! failures, and fans inbound `{type, data}` messages out to subscribers.

pub mod config;
pub mod credentials;
pub mod error;
pub mod logging;
pub mod storage;
pub mod ws;

pub use alertdesk_shared::{kinds, Envelope};
pub use config::RealtimeConfig;
pub use credentials::{CredentialProvider, SessionFile, StaticToken, StoredSession};
pub use error::{ClientError, ConfigError, ErrorKind};
pub use ws::{handler, ConnectionManager, ConnectionState, ReconnectConfig, Unsubscribe};
