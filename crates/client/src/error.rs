//! Error types for the realtime client.
//!
//! [`ClientError`] values are never returned to callers of the connection
//! API. They are delivered to error observers (see
//! [`ConnectionManager::on_error`](crate::ws::ConnectionManager::on_error))
//! so a long-lived console keeps running through them.

use std::fmt;

use thiserror::Error;

use crate::ws::ConnectionState;

/// Coarse classification of a [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Auth,
    Decode,
    Transport,
    NotConnected,
    Encode,
    Handler,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Auth => "auth",
            ErrorKind::Decode => "decode",
            ErrorKind::Transport => "transport",
            ErrorKind::NotConnected => "not-connected",
            ErrorKind::Encode => "encode",
            ErrorKind::Handler => "handler",
        };
        f.write_str(name)
    }
}

/// Runtime faults reported through the error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// No usable credential; no connection attempt was made.
    #[error("credential unavailable: {0}")]
    Auth(String),
    /// An inbound frame was dropped because it was not a valid envelope.
    #[error("dropped undecodable frame: {0}")]
    Decode(String),
    /// Low-level I/O fault on the socket.
    #[error("transport error: {0}")]
    Transport(String),
    /// `send` was called while the connection was not up.
    #[error("cannot send `{kind}` while {state}")]
    NotConnected { kind: String, state: ConnectionState },
    /// An outbound payload could not be serialized.
    #[error("cannot encode `{kind}` payload: {reason}")]
    Encode { kind: String, reason: String },
    /// A message handler panicked during dispatch.
    #[error("handler for `{kind}` panicked: {reason}")]
    HandlerPanicked { kind: String, reason: String },
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Auth(_) => ErrorKind::Auth,
            ClientError::Decode(_) => ErrorKind::Decode,
            ClientError::Transport(_) => ErrorKind::Transport,
            ClientError::NotConnected { .. } => ErrorKind::NotConnected,
            ClientError::Encode { .. } => ErrorKind::Encode,
            ClientError::HandlerPanicked { .. } => ErrorKind::Handler,
        }
    }
}

/// Problems detected while building the client, before anything connects.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid endpoint `{endpoint}`: {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
    #[error("unsupported endpoint scheme `{0}` (expected http, https, ws or wss)")]
    UnsupportedScheme(String),
    #[error("endpoint `{0}` has no host")]
    MissingHost(String),
    #[error("invalid value `{value}` for {var}")]
    InvalidNumber { var: &'static str, value: String },
    #[error("the connection manager must be built inside a tokio runtime")]
    NoRuntime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_match_variants() {
        assert_eq!(ClientError::Auth("missing".into()).kind(), ErrorKind::Auth);
        assert_eq!(ClientError::Decode("bad".into()).kind(), ErrorKind::Decode);
        assert_eq!(
            ClientError::NotConnected {
                kind: "alert.ack".into(),
                state: ConnectionState::Reconnecting,
            }
            .kind(),
            ErrorKind::NotConnected
        );
    }

    #[test]
    fn not_connected_message_names_state() {
        let err = ClientError::NotConnected {
            kind: "alert.ack".into(),
            state: ConnectionState::Disconnected,
        };
        assert_eq!(err.to_string(), "cannot send `alert.ack` while disconnected");
    }
}
