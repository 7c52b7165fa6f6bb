use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::{DashMap, Entry};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior, interval_at, sleep};
use tokio_util::sync::CancellationToken;

use super::channel::Channel;
use super::endpoint::Endpoint;
use super::error::PusherError;
use super::types::{
    CONNECTION_ESTABLISHED, ConnectionEstablished, ERROR, Frame, PING, RemoteError,
};
use crate::Result;
use crate::error::Error;
use crate::ws::config::Config;
use crate::ws::{Transport, WsTransport};

/// Broadcast channel capacity for runtime errors.
const ERROR_CAPACITY: usize = 64;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket is open, broker has not confirmed it yet
    Connecting,
    /// Broker sent `pusher:connection_established`
    Connected {
        /// Broker-assigned socket identifier
        socket_id: String,
        /// When the confirmation arrived
        since: std::time::Instant,
    },
    /// [`Connection::disconnect`] was called
    Disconnected,
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// A single socket to the broker, multiplexing any number of [`Channel`]s.
///
/// Two background tasks run for the life of the connection: a writer, which drains
/// outbound frames and sends a `pusher:pong` every heartbeat interval, and a reader,
/// which routes every inbound frame to the channel of the same name. A failed read
/// never ends the reader; it pauses for the retry interval and reads again. Both
/// tasks stop on [`Connection::disconnect`] or when the last handle is dropped.
///
/// # Example
///
/// ```rust, no_run
/// use std::time::Duration;
///
/// use pusher_client::pusher::{Connection, Endpoint};
/// use pusher_client::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> pusher_client::Result<()> {
///     let connection = Connection::connect("abc123", &Endpoint::default(), Config::default()).await?;
///
///     connection.channel("orders").bind("item_sold", |data| {
///         println!("sold: {data}");
///     });
///
///     tokio::time::sleep(Duration::from_secs(60)).await;
///     connection.disconnect().await
/// }
/// ```
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    /// Application key the socket was opened for
    key: String,
    /// Shared with the background tasks
    transport: Arc<dyn Transport<Frame>>,
    /// Every channel by name; the implicit channel has the empty name
    channels: DashMap<String, Arc<Channel>>,
    /// Frames for the writer task
    outbound_tx: mpsc::UnboundedSender<Frame>,
    /// Watch channel sender for state changes
    state_tx: watch::Sender<ConnectionState>,
    /// Runtime failures, for anyone listening
    errors_tx: broadcast::Sender<PusherError>,
    /// Stops both background tasks
    cancel: CancellationToken,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl Connection {
    /// Dial the broker and start the background tasks.
    ///
    /// Dial and proxy failures are returned; nothing is retried.
    pub async fn connect(key: &str, endpoint: &Endpoint, config: Config) -> Result<Self> {
        let url = endpoint.url(key)?;
        let transport = WsTransport::connect(&url, config.proxy.as_deref()).await?;

        Self::with_transport(key, config, Arc::new(transport))
    }

    /// Start a connection over an already-established transport.
    ///
    /// Must be called within a Tokio runtime.
    pub fn with_transport(
        key: &str,
        config: Config,
        transport: Arc<dyn Transport<Frame>>,
    ) -> Result<Self> {
        if key.is_empty() {
            return Err(Error::validation("identity key must not be empty"));
        }
        if config.heartbeat_interval.is_zero() {
            return Err(Error::validation("heartbeat interval must be non-zero"));
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (state_tx, _) = watch::channel(ConnectionState::Connecting);
        let (errors_tx, _) = broadcast::channel(ERROR_CAPACITY);
        let cancel = CancellationToken::new();

        let channels = DashMap::new();
        channels.insert(String::new(), Arc::new(Channel::new("")));

        let inner = Arc::new(ConnectionInner {
            key: key.to_owned(),
            transport: Arc::clone(&transport),
            channels,
            outbound_tx,
            state_tx,
            errors_tx: errors_tx.clone(),
            cancel: cancel.clone(),
        });

        tokio::spawn(Self::write_loop(
            Arc::clone(&transport),
            outbound_rx,
            config.heartbeat_interval,
            errors_tx.clone(),
            cancel.clone(),
        ));
        tokio::spawn(Self::receive_loop(
            Arc::downgrade(&inner),
            transport,
            config,
            errors_tx,
            cancel,
        ));

        #[cfg(feature = "tracing")]
        tracing::debug!(%key, "Connection started");

        Ok(Self { inner })
    }

    /// Drain outbound frames and send a keepalive every `heartbeat_interval`.
    async fn write_loop(
        transport: Arc<dyn Transport<Frame>>,
        mut outbound_rx: mpsc::UnboundedReceiver<Frame>,
        heartbeat_interval: Duration,
        errors_tx: broadcast::Sender<PusherError>,
        cancel: CancellationToken,
    ) {
        let mut heartbeat = interval_at(Instant::now() + heartbeat_interval, heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let frame = tokio::select! {
                () = cancel.cancelled() => break,
                _ = heartbeat.tick() => Frame::pong(),
                Some(frame) = outbound_rx.recv() => frame,
            };

            let sent = tokio::select! {
                () = cancel.cancelled() => break,
                sent = transport.send(&frame) => sent,
            };

            if let Err(e) = sent {
                #[cfg(feature = "tracing")]
                tracing::warn!(event = %frame.event, error = %e, "Failed to send frame");

                _ = errors_tx.send(PusherError::Send {
                    event: frame.event,
                    reason: e.to_string(),
                });
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Writer stopped");
    }

    /// Read frames forever, routing each one, backing off after failed reads.
    async fn receive_loop(
        inner: Weak<ConnectionInner>,
        transport: Arc<dyn Transport<Frame>>,
        config: Config,
        errors_tx: broadcast::Sender<PusherError>,
        cancel: CancellationToken,
    ) {
        let mut throttle = ReportThrottle::new(config.error_report_interval);

        loop {
            let received = tokio::select! {
                () = cancel.cancelled() => break,
                received = transport.receive() => received,
            };

            match received {
                Ok(frame) => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    inner.process_frame(&frame);
                }
                Err(e) => {
                    if throttle.should_report(Instant::now()) {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(error = %e, "Error reading data from socket");

                        _ = errors_tx.send(PusherError::Receive {
                            reason: e.to_string(),
                        });
                    }

                    tokio::select! {
                        () = cancel.cancelled() => break,
                        () = sleep(config.retry_interval) => {}
                    }
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Reader stopped");
    }

    /// Get the channel called `name`, subscribing to it on first use.
    ///
    /// Exactly one subscribe frame is sent per name, however many callers race here.
    /// The empty name returns the implicit channel without subscribing.
    #[must_use]
    pub fn channel(&self, name: &str) -> Arc<Channel> {
        match self.inner.channels.entry(name.to_owned()) {
            Entry::Occupied(entry) => Arc::clone(entry.get()),
            Entry::Vacant(entry) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(channel = %name, "Subscribing to channel");

                // Enqueue while holding the entry lock so a racing caller sees the channel
                // only once its subscribe is on its way.
                self.inner.enqueue(Frame::subscribe(name));
                Arc::clone(entry.insert(Arc::new(Channel::new(name))).value())
            }
        }
    }

    /// Names of all channels, the implicit `""` included.
    #[must_use]
    pub fn channels(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .channels
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort_unstable();
        names
    }

    /// Stop the background tasks and close the socket.
    ///
    /// Returns the transport's close error, if any. The connection cannot be reused.
    pub async fn disconnect(&self) -> Result<()> {
        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.inner.key, "Disconnecting");

        self.inner.cancel.cancel();
        self.inner
            .state_tx
            .send_replace(ConnectionState::Disconnected);
        self.inner.transport.close().await
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.inner.key
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.inner.state_tx.borrow().clone()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    /// Socket id assigned by the broker, once connected.
    #[must_use]
    pub fn socket_id(&self) -> Option<String> {
        match &*self.inner.state_tx.borrow() {
            ConnectionState::Connected { socket_id, .. } => Some(socket_id.clone()),
            _ => None,
        }
    }

    /// Subscribe to runtime failures.
    ///
    /// Only failures that happen after this call are delivered.
    #[must_use]
    pub fn errors(&self) -> broadcast::Receiver<PusherError> {
        self.inner.errors_tx.subscribe()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("key", &self.inner.key)
            .field("state", &*self.inner.state_tx.borrow())
            .field("channels", &self.channels())
            .finish_non_exhaustive()
    }
}

impl ConnectionInner {
    /// React to connection-level events, then hand the frame to its channel.
    fn process_frame(&self, frame: &Frame) {
        #[cfg(feature = "tracing")]
        tracing::trace!(event = %frame.event, channel = %frame.channel, "Routing frame");

        if frame.is_control() {
            match frame.event.as_str() {
                CONNECTION_ESTABLISHED => self.on_established(frame),
                PING => self.enqueue(Frame::pong()),
                ERROR => self.on_remote_error(frame),
                _ => {}
            }
        }

        // Clone out of the map so handlers can open channels without deadlocking.
        let channel = self
            .channels
            .get(&frame.channel)
            .map(|entry| Arc::clone(entry.value()));

        let Some(channel) = channel else {
            #[cfg(feature = "tracing")]
            tracing::trace!(channel = %frame.channel, "No such channel, dropping frame");
            return;
        };

        for message in channel.dispatch(frame) {
            #[cfg(feature = "tracing")]
            tracing::error!(channel = %frame.channel, event = %frame.event, %message, "Handler panicked");

            _ = self.errors_tx.send(PusherError::HandlerPanicked {
                channel: frame.channel.clone(),
                event: frame.event.clone(),
                message,
            });
        }
    }

    fn on_established(&self, frame: &Frame) {
        match frame.parse_data::<ConnectionEstablished>() {
            Ok(established) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(socket_id = %established.socket_id, "Connection established");

                self.state_tx.send_replace(ConnectionState::Connected {
                    socket_id: established.socket_id,
                    since: std::time::Instant::now(),
                });
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(error = %e, "Malformed connection_established payload");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    fn on_remote_error(&self, frame: &Frame) {
        let remote = frame
            .parse_data::<RemoteError>()
            .unwrap_or_else(|_| RemoteError {
                code: None,
                message: frame.data.to_string(),
            });

        #[cfg(feature = "tracing")]
        tracing::error!(code = ?remote.code, message = %remote.message, "Broker reported an error");

        _ = self.errors_tx.send(PusherError::Remote {
            code: remote.code,
            message: remote.message,
        });
    }

    fn enqueue(&self, frame: Frame) {
        if let Err(mpsc::error::SendError(frame)) = self.outbound_tx.send(frame) {
            #[cfg(feature = "tracing")]
            tracing::warn!(event = %frame.event, "Writer stopped, dropping frame");

            _ = self.errors_tx.send(PusherError::Send {
                event: frame.event,
                reason: "connection is shut down".to_owned(),
            });
        }
    }
}

/// Lets one report through per `interval`; the first one always passes, so a socket
/// that is broken from the start is reported right away rather than after `interval`.
#[derive(Debug)]
struct ReportThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ReportThrottle {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    fn should_report(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}
