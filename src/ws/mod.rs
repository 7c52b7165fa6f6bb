//! Core WebSocket infrastructure.
//!
//! This module knows nothing about the Pusher protocol: it moves JSON messages over
//! a single WebSocket and leaves their meaning to the caller.
//!
//! # Architecture
//!
//! - [`Transport`]: Duplex message stream contract (send, receive, close)
//! - [`WsTransport`]: tokio-tungstenite implementation with optional HTTP proxy tunnelling
//! - [`Config`](config::Config): Heartbeat, retry and proxy settings
//!
//! # Example
//!
//! ```ignore
//! let transport = WsTransport::connect(&endpoint, config.proxy.as_deref()).await?;
//! Transport::<Frame>::send(&transport, &Frame::pong()).await?;
//! ```

pub mod config;
pub mod error;
pub mod traits;
pub mod transport;

#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use traits::*;
pub use transport::WsTransport;
