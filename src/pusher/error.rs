#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;

/// Failures that happen after a [`Connection`](super::Connection) is up.
///
/// None of these stop the connection. They are published on
/// [`Connection::errors`](super::Connection::errors) so callers can observe them.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PusherError {
    /// Reading from the socket failed; reported at most once per report interval
    Receive {
        /// Description of the underlying failure
        reason: String,
    },
    /// An outbound frame could not be written
    Send {
        /// Event of the frame that was dropped
        event: String,
        /// Description of the underlying failure
        reason: String,
    },
    /// A bound handler panicked while handling a frame
    HandlerPanicked {
        /// Channel the frame was routed to
        channel: String,
        /// Event the handler was bound to
        event: String,
        /// Panic payload, when it was a string
        message: String,
    },
    /// The broker sent `pusher:error`
    Remote {
        /// Pusher error code, if any
        code: Option<u16>,
        /// Broker's description
        message: String,
    },
}

impl fmt::Display for PusherError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Receive { reason } => write!(f, "Error reading data from socket: {reason}"),
            Self::Send { event, reason } => write!(f, "Failed to send {event}: {reason}"),
            Self::HandlerPanicked {
                channel,
                event,
                message,
            } => write!(f, "Handler for {event} on '{channel}' panicked: {message}"),
            Self::Remote {
                code: Some(code),
                message,
            } => write!(f, "Broker error {code}: {message}"),
            Self::Remote {
                code: None,
                message,
            } => write!(f, "Broker error: {message}"),
        }
    }
}

impl StdError for PusherError {}

impl From<PusherError> for crate::error::Error {
    fn from(e: PusherError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}
