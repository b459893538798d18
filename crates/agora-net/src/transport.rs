//! Transport seam and its WebSocket implementation.
//!
//! The session task only talks to [`Connector`] and [`Connection`], so the
//! wire framing stays owned by the transport. [`WsConnector`] speaks the chat
//! server's JSON-over-WebSocket protocol.

use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use agora_shared::constants::{IDLE_TIMEOUT_SECS, WS_PATH, WS_SUBPROTOCOL};
use agora_shared::{InboundFrame, OutboundFrame, ProtocolError, RoomId};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("No traffic for {0:?}, connection considered dead")]
    IdleTimeout(Duration),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

impl TransportError {
    /// Whether the connection is unusable after this error.
    ///
    /// Protocol errors only affect a single frame.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, TransportError::Protocol(_))
    }
}

/// Opens connections to a chat room.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, room: &RoomId) -> Result<Box<dyn Connection>, TransportError>;
}

/// A single open connection. Never reused after it fails or closes.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError>;

    /// Next inbound frame, or `None` once the server closed the connection.
    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>>;

    async fn close(&mut self);
}

/// Connects to `{server}/api/chat/ws?room=<room>`.
#[derive(Debug, Clone)]
pub struct WsConnector {
    endpoint: Url,
    auth_token: Option<String>,
    idle_timeout: Duration,
}

impl WsConnector {
    /// Build from the console's base URL (`http(s)://` or `ws(s)://`).
    pub fn new(server_url: &Url, auth_token: Option<String>) -> Result<Self, TransportError> {
        let mut endpoint = server_url.clone();
        let scheme = match server_url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => {
                return Err(TransportError::Connect(format!(
                    "unsupported URL scheme: {other}"
                )))
            }
        };
        endpoint
            .set_scheme(scheme)
            .map_err(|_| TransportError::Connect(format!("cannot use scheme {scheme}")))?;
        Ok(Self {
            endpoint: join_endpoint(&endpoint, WS_PATH),
            auth_token,
            idle_timeout: Duration::from_secs(IDLE_TIMEOUT_SECS),
        })
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn endpoint_for(&self, room: &RoomId) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut().append_pair("room", room.as_str());
        url
    }
}

/// `path` appended to the base URL's own path, without query or fragment.
pub(crate) fn join_endpoint(base: &Url, path: &str) -> Url {
    let mut url = base.clone();
    let prefix = base.path().trim_end_matches('/');
    url.set_path(&format!("{prefix}{path}"));
    url.set_query(None);
    url.set_fragment(None);
    url
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, room: &RoomId) -> Result<Box<dyn Connection>, TransportError> {
        let url = self.endpoint_for(room);
        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(
            header::SEC_WEBSOCKET_PROTOCOL,
            HeaderValue::from_static(WS_SUBPROTOCOL),
        );
        if let Some(ref token) = self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| TransportError::Connect(format!("invalid auth token: {e}")))?;
            request.headers_mut().insert(header::AUTHORIZATION, value);
        }

        let (stream, response) = tokio_tungstenite::connect_async(request).await?;
        info!(
            url = %url,
            status = %response.status(),
            "WebSocket connection established"
        );

        Ok(Box::new(WsConnection {
            stream,
            idle_timeout: self.idle_timeout,
        }))
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    idle_timeout: Duration,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: &OutboundFrame) -> Result<(), TransportError> {
        let json = frame.to_json()?;
        self.stream.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<InboundFrame, TransportError>> {
        loop {
            // Server pings count as traffic; tungstenite answers them itself.
            let message = match tokio::time::timeout(self.idle_timeout, self.stream.next()).await {
                Err(_) => return Some(Err(TransportError::IdleTimeout(self.idle_timeout))),
                Ok(None) => return None,
                Ok(Some(Err(e))) => return Some(Err(e.into())),
                Ok(Some(Ok(message))) => message,
            };

            match message {
                Message::Text(text) => {
                    return Some(InboundFrame::from_json(&text).map_err(TransportError::from))
                }
                Message::Binary(data) => {
                    return Some(Err(ProtocolError::Unexpected(format!(
                        "binary frame of {} bytes",
                        data.len()
                    ))
                    .into()))
                }
                Message::Close(frame) => {
                    debug!(frame = ?frame, "Server closed WebSocket");
                    return None;
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => continue,
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            debug!(error = %e, "WebSocket close handshake failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

    use super::*;
    use agora_shared::protocol::AnnouncementData;
    use agora_shared::Envelope;

    #[test]
    fn test_endpoint_from_http_url() {
        let base = Url::parse("https://console.example.com/?x=1#top").unwrap();
        let connector = WsConnector::new(&base, None).unwrap();
        let url = connector.endpoint_for(&RoomId::new("global"));
        assert_eq!(url.as_str(), "wss://console.example.com/api/chat/ws?room=global");
    }

    #[test]
    fn test_endpoint_keeps_base_path() {
        let base = Url::parse("https://example.com/console/").unwrap();
        let connector = WsConnector::new(&base, None).unwrap();
        let url = connector.endpoint_for(&RoomId::new("global"));
        assert_eq!(url.as_str(), "wss://example.com/console/api/chat/ws?room=global");
    }

    #[test]
    fn test_endpoint_keeps_port_and_encodes_room() {
        let base = Url::parse("http://localhost:3000").unwrap();
        let connector = WsConnector::new(&base, Some("t".into())).unwrap();
        let url = connector.endpoint_for(&RoomId::new("dev ops"));
        assert_eq!(url.as_str(), "ws://localhost:3000/api/chat/ws?room=dev+ops");
    }

    #[test]
    fn test_rejects_unknown_scheme() {
        let base = Url::parse("ftp://example.com").unwrap();
        assert!(WsConnector::new(&base, None).is_err());
    }

    #[test]
    fn test_protocol_errors_are_not_fatal() {
        let err: TransportError = ProtocolError::Unexpected("x".into()).into();
        assert!(!err.is_fatal());
        assert!(TransportError::IdleTimeout(Duration::from_secs(1)).is_fatal());
    }

    /// What the server saw in the upgrade request.
    #[derive(Debug, Default, Clone)]
    struct Handshake {
        uri: String,
        protocol: Option<String>,
        authorization: Option<String>,
    }

    async fn listen() -> (TcpListener, Url) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let base = Url::parse(&format!("http://{addr}")).unwrap();
        (listener, base)
    }

    /// Accept one WebSocket client, agreeing to the chat subprotocol.
    async fn accept(
        listener: &TcpListener,
        seen: Arc<Mutex<Handshake>>,
    ) -> WebSocketStream<TcpStream> {
        let (tcp, _) = listener.accept().await.unwrap();
        let callback = move |req: &Request, mut resp: Response| -> Result<Response, ErrorResponse> {
            let header_str = |name: header::HeaderName| {
                req.headers()
                    .get(name)
                    .and_then(|v: &HeaderValue| v.to_str().ok())
                    .map(str::to_owned)
            };
            *seen.lock().unwrap() = Handshake {
                uri: req.uri().to_string(),
                protocol: header_str(header::SEC_WEBSOCKET_PROTOCOL),
                authorization: header_str(header::AUTHORIZATION),
            };
            resp.headers_mut().insert(
                header::SEC_WEBSOCKET_PROTOCOL,
                HeaderValue::from_static(WS_SUBPROTOCOL),
            );
            Ok(resp)
        };
        tokio_tungstenite::accept_hdr_async(tcp, callback).await.unwrap()
    }

    fn announcement(text: &str) -> Message {
        Message::Text(format!(
            r#"{{"type":"announcement","data":{{"announcement":"{text}"}}}}"#
        ))
    }

    #[tokio::test]
    async fn test_ws_handshake_and_frames() {
        let (listener, base) = listen().await;
        let seen = Arc::new(Mutex::new(Handshake::default()));

        let server = {
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut ws = accept(&listener, seen).await;
                ws.send(Message::Ping(vec![1])).await.unwrap();
                ws.send(announcement("hello")).await.unwrap();
                ws.send(Message::Binary(vec![1, 2, 3])).await.unwrap();

                let sent = loop {
                    match ws.next().await {
                        Some(Ok(Message::Text(text))) => break text,
                        Some(Ok(_)) => continue,
                        other => panic!("client went away: {other:?}"),
                    }
                };
                ws.send(Message::Close(None)).await.unwrap();
                sent
            })
        };

        let connector = WsConnector::new(&base, Some("secret".into())).unwrap();
        let mut conn = connector.connect(&RoomId::new("global")).await.unwrap();

        let first = conn.recv().await.unwrap().unwrap();
        assert_eq!(
            first,
            InboundFrame::Announcement(AnnouncementData {
                announcement: "hello".into()
            })
        );

        let err = conn.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::Protocol(_)));
        assert!(!err.is_fatal());

        let frame = OutboundFrame::Send(Envelope {
            content: "hi".into(),
            room: RoomId::new("global"),
            attachments: vec![],
        });
        conn.send(&frame).await.unwrap();

        assert!(conn.recv().await.is_none());

        let sent = server.await.unwrap();
        let received: OutboundFrame = serde_json::from_str(&sent).unwrap();
        assert_eq!(received, frame);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.uri, "/api/chat/ws?room=global");
        assert_eq!(seen.protocol.as_deref(), Some(WS_SUBPROTOCOL));
        assert_eq!(seen.authorization.as_deref(), Some("Bearer secret"));
    }

    #[tokio::test]
    async fn test_ws_without_token_sends_no_authorization() {
        let (listener, base) = listen().await;
        let seen = Arc::new(Mutex::new(Handshake::default()));

        let server = {
            let seen = seen.clone();
            tokio::spawn(async move {
                let mut ws = accept(&listener, seen).await;
                ws.close(None).await.unwrap();
            })
        };

        let connector = WsConnector::new(&base, None).unwrap();
        let mut conn = connector.connect(&RoomId::new("dev")).await.unwrap();
        assert!(conn.recv().await.is_none());
        server.await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(seen.uri, "/api/chat/ws?room=dev");
        assert_eq!(seen.protocol.as_deref(), Some(WS_SUBPROTOCOL));
        assert_eq!(seen.authorization, None);
    }

    #[tokio::test]
    async fn test_ws_silence_is_fatal_idle_timeout() {
        let (listener, base) = listen().await;
        let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let ws = accept(&listener, Arc::default()).await;
            // Hold the connection open without sending anything.
            let _ = done_rx.await;
            drop(ws);
        });

        let idle = Duration::from_millis(200);
        let connector = WsConnector::new(&base, None).unwrap().with_idle_timeout(idle);
        let mut conn = connector.connect(&RoomId::new("global")).await.unwrap();

        let err = conn.recv().await.unwrap().unwrap_err();
        assert!(matches!(err, TransportError::IdleTimeout(d) if d == idle));
        assert!(err.is_fatal());

        let _ = done_tx.send(());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_ws_refused_connection_is_error() {
        let (listener, base) = listen().await;
        drop(listener);

        let connector = WsConnector::new(&base, None).unwrap();
        assert!(connector.connect(&RoomId::new("global")).await.is_err());
    }
}
