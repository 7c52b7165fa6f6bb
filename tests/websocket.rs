#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests"
)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt as _, StreamExt as _};
use pusher_client::error::Kind;
use pusher_client::pusher::{Connection, ConnectionState, Endpoint, Frame, PusherError};
use pusher_client::ws::config::Config;
use pusher_client::ws::{Transport, WsError, WsTransport};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};

/// Sent through [`MockWsServer::send`] to make the server close every socket.
const CLOSE: &str = "__close__";

/// Mock Pusher broker.
struct MockWsServer {
    addr: SocketAddr,
    /// Broadcast messages to ALL connected clients
    message_tx: broadcast::Sender<String>,
    /// Text frames received from clients
    received_rx: mpsc::UnboundedReceiver<String>,
    /// Request path and query of each WebSocket handshake
    path_rx: mpsc::UnboundedReceiver<String>,
}

impl MockWsServer {
    /// Start a mock WebSocket server on a random port.
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<String>(100);
        let (received_tx, received_rx) = mpsc::unbounded_channel::<String>();
        let (path_tx, path_rx) = mpsc::unbounded_channel::<String>();

        let broadcast_tx = message_tx.clone();

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                let path_tx = path_tx.clone();
                let capture_path = move |request: &Request, response: Response| {
                    drop(path_tx.send(request.uri().to_string()));
                    Ok(response)
                };
                let Ok(ws_stream) = tokio_tungstenite::accept_hdr_async(stream, capture_path).await
                else {
                    continue;
                };

                let (mut write, mut read) = ws_stream.split();
                let received_tx = received_tx.clone();
                let mut msg_rx = broadcast_tx.subscribe();

                tokio::spawn(async move {
                    loop {
                        tokio::select! {
                            msg = read.next() => {
                                match msg {
                                    Some(Ok(Message::Text(text))) => {
                                        drop(received_tx.send(text.to_string()));
                                    }
                                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                                        drop(received_tx.send(CLOSE.to_owned()));
                                        break;
                                    }
                                    Some(Ok(_)) => {}
                                }
                            }
                            msg = msg_rx.recv() => {
                                match msg {
                                    Ok(text) if text == CLOSE => {
                                        drop(write.send(Message::Close(None)).await);
                                        break;
                                    }
                                    Ok(text) => {
                                        if write.send(Message::Text(text.into())).await.is_err() {
                                            break;
                                        }
                                    }
                                    Err(_) => break,
                                }
                            }
                        }
                    }
                });
            }
        });

        Self {
            addr,
            message_tx,
            received_rx,
            path_rx,
        }
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint::builder()
            .host("127.0.0.1")
            .port(self.addr.port())
            .build()
    }

    /// Send a message to all connected clients.
    fn send(&self, message: &Value) {
        drop(self.message_tx.send(message.to_string()));
    }

    /// Receive the next frame a client sent.
    async fn recv(&mut self) -> Option<Value> {
        let text = timeout(Duration::from_secs(2), self.received_rx.recv())
            .await
            .ok()
            .flatten()?;
        if text == CLOSE {
            return Some(Value::String(CLOSE.to_owned()));
        }
        serde_json::from_str(&text).ok()
    }

    async fn recv_path(&mut self) -> Option<String> {
        timeout(Duration::from_secs(2), self.path_rx.recv())
            .await
            .ok()
            .flatten()
    }
}

/// Mock HTTP proxy that accepts one `CONNECT` per socket and tunnels it to `target`.
async fn start_proxy(target: SocketAddr) -> (SocketAddr, mpsc::UnboundedReceiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (head_tx, head_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((mut client, _)) = listener.accept().await {
            let head_tx = head_tx.clone();
            tokio::spawn(async move {
                let mut head = Vec::new();
                while !head.ends_with(b"\r\n\r\n") {
                    head.push(client.read_u8().await.unwrap());
                }
                drop(head_tx.send(String::from_utf8(head).unwrap()));

                let mut upstream = TcpStream::connect(target).await.unwrap();
                client
                    .write_all(b"HTTP/1.1 200 Connection established\r\n\r\n")
                    .await
                    .unwrap();
                drop(tokio::io::copy_bidirectional(&mut client, &mut upstream).await);
            });
        }
    });

    (addr, head_rx)
}

fn recorder(
    connection: &Connection,
    channel: &str,
    event: &str,
) -> mpsc::UnboundedReceiver<Value> {
    let (tx, rx) = mpsc::unbounded_channel();
    connection.channel(channel).bind(event, move |data| {
        drop(tx.send(data.clone()));
    });
    rx
}

mod connection {
    use super::*;

    #[tokio::test]
    async fn dials_app_path_and_subscribes() {
        let mut server = MockWsServer::start().await;

        let connection = Connection::connect("abc123", &server.endpoint(), Config::default())
            .await
            .unwrap();
        assert_eq!(
            server.recv_path().await.as_deref(),
            Some("/app/abc123?protocol=7")
        );

        let first = connection.channel("orders");
        let second = connection.channel("orders");
        assert!(Arc::ptr_eq(&first, &second), "same channel for same name");

        let subscribe = server.recv().await.unwrap();
        assert_eq!(subscribe["event"], "pusher:subscribe");
        assert_eq!(subscribe["channel"], "orders");
        assert_eq!(subscribe["data"]["channel"], "orders");

        drop(connection.channel("invoices"));
        let next = server.recv().await.unwrap();
        assert_eq!(
            next["data"]["channel"], "invoices",
            "orders must not be subscribed twice"
        );
    }

    #[tokio::test]
    async fn delivers_event_to_bound_handler() {
        let mut server = MockWsServer::start().await;
        let connection = Connection::connect("abc123", &server.endpoint(), Config::default())
            .await
            .unwrap();

        let mut sold = recorder(&connection, "orders", "item_sold");
        server.recv().await.unwrap();

        server.send(&json!({
            "event": "pusher:connection_established",
            "data": "{\"socket_id\":\"123.456\",\"activity_timeout\":120}"
        }));
        server.send(&json!({
            "event": "item_sold",
            "channel": "orders",
            "data": "{\"id\":42}"
        }));

        let data = timeout(Duration::from_secs(2), sold.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(data, json!("{\"id\":42}"));
        assert_eq!(connection.socket_id().as_deref(), Some("123.456"));
    }

    #[tokio::test]
    async fn control_frame_without_handler_is_ignored() {
        let mut server = MockWsServer::start().await;
        let connection = Connection::connect("abc123", &server.endpoint(), Config::default())
            .await
            .unwrap();
        let mut errors = connection.errors();
        let mut sold = recorder(&connection, "orders", "item_sold");
        server.recv().await.unwrap();

        server.send(&json!({
            "event": "pusher:connection_established",
            "data": "{\"socket_id\":\"1.2\"}"
        }));
        server.send(&json!({ "event": "item_sold", "channel": "orders", "data": "done" }));

        timeout(Duration::from_secs(2), sold.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(errors.try_recv().is_err(), "no error for unhandled frames");
    }

    #[tokio::test]
    async fn answers_server_ping() {
        let mut server = MockWsServer::start().await;
        let connection = Connection::connect("abc123", &server.endpoint(), Config::default())
            .await
            .unwrap();
        drop(connection.channel("orders"));
        server.recv().await.unwrap();

        server.send(&json!({ "event": "pusher:ping", "data": {} }));

        let pong = server.recv().await.unwrap();
        assert_eq!(pong, json!({ "event": "pusher:pong", "data": {} }));
    }

    #[tokio::test]
    async fn heartbeat_follows_configured_interval() {
        let mut server = MockWsServer::start().await;
        let config = Config::builder()
            .heartbeat_interval(Duration::from_millis(200))
            .build();
        let _connection = Connection::connect("abc123", &server.endpoint(), config)
            .await
            .unwrap();

        let pong = server.recv().await.unwrap();
        assert_eq!(pong["event"], "pusher:pong");
    }

    #[tokio::test]
    async fn server_close_is_reported_not_fatal() {
        let mut server = MockWsServer::start().await;
        let connection = Connection::connect("abc123", &server.endpoint(), Config::default())
            .await
            .unwrap();
        let mut errors = connection.errors();
        drop(connection.channel("orders"));
        server.recv().await.unwrap();

        drop(server.message_tx.send(CLOSE.to_owned()));

        let error = timeout(Duration::from_secs(2), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(
            matches!(error, PusherError::Receive { .. }),
            "expected a receive error, got {error:?}"
        );
        assert_ne!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn disconnect_closes_socket() {
        let mut server = MockWsServer::start().await;
        let connection = Connection::connect("abc123", &server.endpoint(), Config::default())
            .await
            .unwrap();
        drop(connection.channel("orders"));
        server.recv().await.unwrap();

        connection.disconnect().await.unwrap();

        assert_eq!(server.recv().await, Some(Value::String(CLOSE.to_owned())));
        assert_eq!(connection.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn tunnels_through_http_proxy() {
        let mut server = MockWsServer::start().await;
        let (proxy, mut heads) = start_proxy(server.addr).await;
        let config = Config::builder().proxy(format!("http://{proxy}")).build();

        let connection = Connection::connect("abc123", &server.endpoint(), config)
            .await
            .unwrap();
        drop(connection.channel("orders"));

        let head = timeout(Duration::from_secs(2), heads.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(
            head.starts_with(&format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n", server.addr.port())),
            "unexpected proxy request: {head}"
        );
        assert_eq!(server.recv().await.unwrap()["event"], "pusher:subscribe");
    }

    #[tokio::test]
    async fn bad_proxy_url_fails_construction() {
        let server = MockWsServer::start().await;
        let config = Config::builder().proxy("not a url").build();

        let error = Connection::connect("abc123", &server.endpoint(), config)
            .await
            .unwrap_err();

        assert_eq!(error.kind(), Kind::Internal);
    }

    #[tokio::test]
    async fn dial_failure_fails_construction() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let endpoint = Endpoint::builder().host("127.0.0.1").port(port).build();

        let error = Connection::connect("abc123", &endpoint, Config::default())
            .await
            .unwrap_err();

        assert_eq!(error.kind(), Kind::WebSocket);
    }
}

mod transport {
    use super::*;

    #[tokio::test]
    async fn close_then_send_and_receive_fail() {
        let server = MockWsServer::start().await;
        let url = server.endpoint().url("abc123").unwrap();
        let transport = WsTransport::connect(&url, None).await.unwrap();

        Transport::<Frame>::close(&transport).await.unwrap();

        let send = Transport::<Frame>::send(&transport, &Frame::pong()).await.unwrap_err();
        assert!(
            matches!(send.downcast_ref::<WsError>(), Some(WsError::ConnectionClosed)),
            "send after close should fail, got {send:?}"
        );
        let receive = Transport::<Frame>::receive(&transport).await.unwrap_err();
        assert!(
            matches!(receive.downcast_ref::<WsError>(), Some(WsError::ConnectionClosed)),
            "receive after close should fail, got {receive:?}"
        );
    }

    #[tokio::test]
    async fn malformed_frame_is_a_receive_error() {
        let mut server = MockWsServer::start().await;
        let url = server.endpoint().url("abc123").unwrap();
        let transport = WsTransport::connect(&url, None).await.unwrap();

        // Wait until the server has subscribed this socket to broadcasts.
        Transport::<Frame>::send(&transport, &Frame::pong()).await.unwrap();
        server.recv().await.unwrap();

        drop(server.message_tx.send("{not json".to_owned()));
        let error = Transport::<Frame>::receive(&transport).await.unwrap_err();
        assert!(
            matches!(error.downcast_ref::<WsError>(), Some(WsError::MessageParse(_))),
            "expected parse error, got {error:?}"
        );

        server.send(&json!({ "event": "pusher:ping" }));
        let frame = Transport::<Frame>::receive(&transport).await.unwrap();
        assert_eq!(frame.event, "pusher:ping", "transport stays usable after a bad frame");
    }
}
