//! Realtime protocol definitions.
//!
//! Every frame in either direction is a JSON text frame holding a single
//! envelope:
//!
//! ```json
//! { "type": "alert.new", "data": { "id": "a-17", "severity": "critical" } }
//! ```
//!
//! `type` selects the dispatch bucket on the receiving side. `data` is opaque
//! at this layer; consumers decode it into their own types.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// Well-known message types pushed by the console backend.
pub mod kinds {
    pub const ALERT_NEW: &str = "alert.new";
    pub const ALERT_CANCELLED: &str = "alert.cancelled";
    pub const INCIDENT_UPDATED: &str = "incident.updated";
    pub const FEEDBACK_NEW: &str = "feedback.new";

    /// Types the watch tool subscribes to when none are given.
    pub const DEFAULT_WATCH: [&str; 4] = [ALERT_NEW, ALERT_CANCELLED, INCIDENT_UPDATED, FEEDBACK_NEW];
}

/// A single wire message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    /// Absent on the wire decodes as `null`.
    #[serde(default)]
    pub data: Value,
}

impl Envelope {
    /// Build an envelope from any serializable payload.
    pub fn new<T: Serialize + ?Sized>(kind: impl Into<String>, data: &T) -> Result<Self, ProtocolError> {
        let data = serde_json::to_value(data).map_err(ProtocolError::Encode)?;
        Ok(Self {
            kind: kind.into(),
            data,
        })
    }

    /// Parse an inbound text frame.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        if envelope.kind.is_empty() {
            return Err(ProtocolError::EmptyType);
        }
        Ok(envelope)
    }

    /// Serialize to the text frame sent on the wire.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    /// Decode the payload into a concrete type.
    pub fn data_as<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.data)
    }
}

/// Check if a host is a local/development address.
pub fn is_local_address(host: &str) -> bool {
    let host_part = host.split(':').next().unwrap_or(host);
    host_part == "localhost"
        || host_part == "127.0.0.1"
        || host_part == "0.0.0.0"
        || host_part.starts_with("192.168.")
        || host_part.starts_with("10.")
}
