use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};

use async_http_proxy::{http_connect_tokio, http_connect_tokio_with_basic_auth};
use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, client_async_tls, connect_async, tungstenite::Message,
};
use url::{Host, Url};

use super::error::WsError;
use super::traits::Transport;
use crate::Result;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// JSON-over-WebSocket [`Transport`].
///
/// The socket is split once at dial time. Writes and reads are guarded by separate
/// mutexes, so concurrent senders are serialized one frame at a time while a pending
/// read never blocks a write or a close.
pub struct WsTransport {
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
    closed: AtomicBool,
}

impl WsTransport {
    /// Dial `endpoint`, tunnelling through `proxy` when one is given.
    ///
    /// Only `http://` proxies are supported; credentials in the proxy URL are sent as
    /// `Proxy-Authorization: Basic`.
    pub async fn connect(endpoint: &Url, proxy: Option<&str>) -> Result<Self> {
        let ws_stream = match proxy {
            Some(proxy) => {
                let proxy = Url::parse(proxy)?;

                #[cfg(feature = "tracing")]
                tracing::debug!(%endpoint, proxy = %redacted(&proxy), "Dialing WebSocket through proxy");

                let tunnel = open_tunnel(endpoint, &proxy).await?;
                let (ws_stream, _) = client_async_tls(endpoint.as_str(), tunnel).await?;
                ws_stream
            }
            None => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%endpoint, "Dialing WebSocket");

                let (ws_stream, _) = connect_async(endpoint.as_str()).await?;
                ws_stream
            }
        };

        let (sink, stream) = ws_stream.split();
        Ok(Self {
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        })
    }

    /// Whether [`Transport::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<M> Transport<M> for WsTransport
where
    M: Serialize + DeserializeOwned + Debug + Send + Sync + 'static,
{
    async fn send(&self, message: &M) -> Result<()> {
        if self.is_closed() {
            return Err(WsError::ConnectionClosed.into());
        }

        let json = serde_json::to_string(message)?;

        #[cfg(feature = "tracing")]
        tracing::trace!(%json, "Sending WebSocket text message");

        self.sink.lock().await.send(Message::Text(json.into())).await?;
        Ok(())
    }

    async fn receive(&self) -> Result<M> {
        if self.is_closed() {
            return Err(WsError::ConnectionClosed.into());
        }

        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    #[cfg(feature = "tracing")]
                    tracing::trace!(text = %text.as_str(), "Received WebSocket text message");

                    return serde_json::from_str(text.as_str())
                        .map_err(|e| Error::from(WsError::MessageParse(e)));
                }
                Some(Ok(Message::Close(_))) | None => {
                    return Err(WsError::ConnectionClosed.into());
                }
                Some(Err(e)) => return Err(e.into()),
                Some(Ok(_)) => {
                    // Control frames are answered by tungstenite; binary frames carry nothing for us.
                }
            }
        }
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("Closing WebSocket");

        self.sink.lock().await.close().await?;
        Ok(())
    }
}

/// Open a raw TCP tunnel to `endpoint` via an HTTP `CONNECT` request to `proxy`.
async fn open_tunnel(endpoint: &Url, proxy: &Url) -> Result<TcpStream> {
    if proxy.scheme() != "http" {
        return Err(WsError::UnsupportedProxyScheme(proxy.scheme().to_owned()).into());
    }

    let proxy_port = proxy.port_or_known_default().unwrap_or(80);
    // Connect by parsed host: `host_str` keeps the brackets around IPv6 literals.
    let mut stream = match proxy.host() {
        Some(Host::Ipv4(addr)) => TcpStream::connect((addr, proxy_port)).await?,
        Some(Host::Ipv6(addr)) => TcpStream::connect((addr, proxy_port)).await?,
        Some(Host::Domain(domain)) => TcpStream::connect((domain, proxy_port)).await?,
        None => return Err(Error::validation("proxy URL has no host")),
    };

    let target_host = endpoint
        .host_str()
        .ok_or_else(|| Error::validation("endpoint URL has no host"))?;
    let target_port = endpoint
        .port_or_known_default()
        .ok_or_else(|| Error::validation("endpoint URL has no port"))?;

    let tunnel = if proxy.username().is_empty() {
        http_connect_tokio(&mut stream, target_host, target_port).await
    } else {
        http_connect_tokio_with_basic_auth(
            &mut stream,
            target_host,
            target_port,
            proxy.username(),
            proxy.password().unwrap_or_default(),
        )
        .await
    };
    tunnel.map_err(WsError::Proxy)?;

    Ok(stream)
}

#[cfg(feature = "tracing")]
fn redacted(proxy: &Url) -> String {
    let mut proxy = proxy.clone();
    if proxy.password().is_some() {
        _ = proxy.set_password(Some("***"));
    }
    proxy.to_string()
}
