//! WebSocket module for real-time console notifications.
//!
//! This module provides:
//! - A single managed connection with exponential-backoff reconnect
//! - Type-keyed dispatch of inbound envelopes to subscribed handlers
//! - State and error observers for indicators and diagnostics
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │               ConnectionManager              │
//! │  state machine · reconnect policy · router   │
//! └──────────────────────────────────────────────┘
//!        │ Connector::open           ▲ text frames
//!        ▼                           │
//!   ┌─────────────────────────────────────┐
//!   │ connection task (one per socket)    │
//!   │ inbound frames / outbound queue     │
//!   └─────────────────────────────────────┘
//!                    │ Envelope { type, data }
//!          ┌─────────┼──────────┐
//!          ▼         ▼          ▼
//!     "alert.new" "incident.*" "feedback.new"
//!      handlers    handlers     handlers
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = RealtimeConfig::from_env()?;
//! let manager = ConnectionManager::new(config, SessionFile::default_location().unwrap())?;
//!
//! let _ = manager.on_state_change(|state| println!("realtime: {state}"));
//! manager.subscribe("alert.new", handler(|data| println!("new alert: {data}")));
//! manager.connect();
//! ```

mod connection;
mod manager;
mod observers;
mod router;
mod transport;

use std::sync::{Mutex, MutexGuard};

pub use connection::{ConnectionState, ReconnectConfig};
pub use manager::{ConnectionManager, ConnectionManagerBuilder};
pub use observers::{ErrorHandler, StateHandler, Unsubscribe};
pub use router::{handler, MessageHandler, MessageRouter};
pub use transport::{
    Connector, FrameSink, FrameStream, Transport, TransportError, TungsteniteConnector,
};

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
