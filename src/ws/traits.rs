//! Core traits for generic WebSocket infrastructure.

use async_trait::async_trait;

use crate::Result;

/// A duplex stream of structured messages.
///
/// The connection engine is written against this contract rather than a concrete
/// socket so that it can be driven by [`WsTransport`](super::transport::WsTransport)
/// in production and by an in-memory double in tests.
///
/// Implementations must be safe to call concurrently: `send` may be called while a
/// `receive` is pending, and concurrent `send`s must not interleave on the wire.
///
/// # Example
///
/// ```ignore
/// pub struct Loopback(tokio::sync::Mutex<Vec<Frame>>);
///
/// #[async_trait]
/// impl Transport<Frame> for Loopback {
///     async fn send(&self, message: &Frame) -> Result<()> { /* ... */ }
///     async fn receive(&self) -> Result<Frame> { /* ... */ }
///     async fn close(&self) -> Result<()> { /* ... */ }
/// }
/// ```
#[async_trait]
pub trait Transport<M>: Send + Sync + 'static {
    /// Write one message.
    async fn send(&self, message: &M) -> Result<()>;

    /// Wait for the next message.
    ///
    /// An error does not imply the transport is unusable; callers may retry.
    async fn receive(&self) -> Result<M>;

    /// Close the underlying stream. Later sends and receives fail.
    async fn close(&self) -> Result<()>;
}
