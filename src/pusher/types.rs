use bon::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::Result;

/// Sent by the broker once the socket is ready; carries the socket id.
pub const CONNECTION_ESTABLISHED: &str = "pusher:connection_established";
/// Sent by the client to join a channel.
pub const SUBSCRIBE: &str = "pusher:subscribe";
/// Sent by the broker to probe liveness.
pub const PING: &str = "pusher:ping";
/// Keepalive sent by the client, periodically and in answer to [`PING`].
pub const PONG: &str = "pusher:pong";
/// Sent by the broker when it rejects something the client did.
pub const ERROR: &str = "pusher:error";

/// One message on the wire.
///
/// `channel` is empty for connection-level control frames. `data` is passed through
/// untouched; the broker usually sends it as a JSON-encoded string, see
/// [`Frame::parse_data`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Builder)]
pub struct Frame {
    /// Event name, e.g. `pusher:ping` or an application event
    #[builder(into)]
    pub event: String,
    /// Channel the event belongs to
    #[builder(default, into)]
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub channel: String,
    /// Event payload
    #[builder(default)]
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Frame {
    /// Keepalive frame.
    #[must_use]
    pub fn pong() -> Self {
        Self {
            event: PONG.to_owned(),
            channel: String::new(),
            data: json!({}),
        }
    }

    /// Request to join `channel`.
    #[must_use]
    pub fn subscribe(channel: &str) -> Self {
        Self {
            event: SUBSCRIBE.to_owned(),
            channel: channel.to_owned(),
            data: json!({ "channel": channel }),
        }
    }

    /// Whether this frame is connection-level rather than channel-scoped.
    #[must_use]
    pub fn is_control(&self) -> bool {
        self.channel.is_empty()
    }

    /// Decode `data` into `T`, whether it arrived as a JSON-encoded string or as a
    /// structured value.
    pub fn parse_data<T: DeserializeOwned>(&self) -> Result<T> {
        match &self.data {
            Value::String(encoded) => Ok(serde_json::from_str(encoded)?),
            structured => Ok(T::deserialize(structured)?),
        }
    }
}

/// Payload of [`CONNECTION_ESTABLISHED`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionEstablished {
    /// Broker-assigned identifier of this socket
    pub socket_id: String,
    /// Seconds of silence after which the broker expects a ping
    #[serde(default)]
    pub activity_timeout: Option<u64>,
}

/// Payload of [`ERROR`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteError {
    /// Pusher error code; absent for generic errors
    #[serde(default)]
    pub code: Option<u16>,
    /// Human-readable description
    #[serde(default)]
    pub message: String,
}
