//! Pusher Channels protocol over a single WebSocket.
//!
//! A [`Connection`] owns the socket and every [`Channel`] opened on it. Frames from
//! the broker are routed by channel name and then by event name to the handlers
//! bound with [`Channel::bind`].
//!
//! # Example
//!
//! ```rust, no_run
//! use pusher_client::pusher::{Connection, Endpoint};
//! use pusher_client::ws::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let endpoint = Endpoint::builder().cluster("eu").build();
//!     let connection = Connection::connect("abc123", &endpoint, Config::default()).await?;
//!
//!     let orders = connection.channel("orders");
//!     orders.bind("item_sold", |data| println!("{data}"));
//!
//!     let mut errors = connection.errors();
//!     while let Ok(error) = errors.recv().await {
//!         eprintln!("{error}");
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod client;
pub mod endpoint;
pub mod error;
pub mod types;

pub use channel::{Channel, Handler};
pub use client::{Connection, ConnectionState};
pub use endpoint::Endpoint;
pub use error::PusherError;
pub use types::{ConnectionEstablished, Frame, RemoteError};
