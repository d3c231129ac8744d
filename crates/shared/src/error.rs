//! Shared error types for the realtime wire protocol.

use thiserror::Error;

/// Failure to move an [`Envelope`](crate::Envelope) on or off the wire.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame was not a JSON object of the form `{"type": .., "data": ..}`.
    #[error("malformed envelope: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The envelope carried an empty `type`.
    #[error("envelope has an empty type")]
    EmptyType,
    /// The payload could not be serialized.
    #[error("failed to encode payload: {0}")]
    Encode(#[source] serde_json::Error),
}
