//! Direct WebSocket transport using `tokio-tungstenite`.
//!
//! Where no negotiated peer link is available, a room channel can run
//! over a plain WebSocket to a forwarding server instead. The server is
//! expected to route text frames between the peers of a room; this
//! transport only dials, pumps frames, and reports status.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use peerlink_protocol::{PeerId, RoomId};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message;

use crate::{Connector, Transport, TransportError, TransportEvent};

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
    Message,
>;

/// A [`Transport`] over a client WebSocket connection.
pub struct WebSocketTransport {
    url: String,
    open: Arc<AtomicBool>,
    sink: Arc<Mutex<Option<WsSink>>>,
}

impl WebSocketTransport {
    /// Creates a transport that will dial `url` on [`connect`].
    ///
    /// [`connect`]: Transport::connect
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            open: Arc::new(AtomicBool::new(false)),
            sink: Arc::new(Mutex::new(None)),
        }
    }
}

impl Transport for WebSocketTransport {
    async fn connect(
        &mut self,
    ) -> Result<mpsc::UnboundedReceiver<TransportEvent>, TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(&self.url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(url = %self.url, "WebSocket connected");

        let (sink, mut stream) = ws.split();
        *self.sink.lock().await = Some(sink);
        self.open.store(true, Ordering::SeqCst);

        let (tx, rx) = mpsc::unbounded_channel();
        // Handshake completion is the open signal for a WebSocket.
        let _ = tx.send(TransportEvent::Open);

        let open = Arc::clone(&self.open);
        tokio::spawn(async move {
            loop {
                let event = match stream.next().await {
                    Some(Ok(Message::Text(text))) => {
                        TransportEvent::Message(text.to_string())
                    }
                    Some(Ok(Message::Binary(data))) => {
                        match String::from_utf8(data.into()) {
                            Ok(text) => TransportEvent::Message(text),
                            Err(_) => TransportEvent::Error(
                                "non-UTF-8 binary frame".into(),
                            ),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        open.store(false, Ordering::SeqCst);
                        let _ = tx.send(TransportEvent::Closed);
                        break;
                    }
                    Some(Ok(_)) => continue, // skip ping/pong/frame
                    Some(Err(e)) => {
                        open.store(false, Ordering::SeqCst);
                        let _ = tx.send(TransportEvent::Error(e.to_string()));
                        let _ = tx.send(TransportEvent::Closed);
                        break;
                    }
                };
                if tx.send(event).is_err() {
                    break;
                }
            }
        });

        Ok(rx)
    }

    async fn send(&self, payload: &str) {
        if !self.is_open() {
            tracing::warn!(url = %self.url, "channel not open, dropping payload");
            return;
        }
        let mut sink = self.sink.lock().await;
        if let Some(sink) = sink.as_mut() {
            if let Err(e) = sink.send(Message::Text(payload.into())).await {
                tracing::warn!(url = %self.url, error = %e, "send failed");
            }
        }
    }

    async fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        let mut sink = self.sink.lock().await;
        if let Some(sink) = sink.as_mut() {
            let _ = sink.send(Message::Close(None)).await;
        }
        *sink = None;
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// [`Connector`] producing [`WebSocketTransport`]s.
///
/// Dials `{base_url}/{room}/{peer}` for each channel, so the forwarding
/// server can key its routing on the path alone.
pub struct WebSocketConnector {
    base_url: String,
}

impl WebSocketConnector {
    /// Creates a connector for a forwarding server
    /// (e.g. `ws://127.0.0.1:9000/rooms`). A trailing slash is stripped.
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self { base_url }
    }
}

impl Connector for WebSocketConnector {
    type Transport = WebSocketTransport;

    async fn open(
        &self,
        room: &RoomId,
        peer: &PeerId,
    ) -> Result<WebSocketTransport, TransportError> {
        Ok(WebSocketTransport::new(format!(
            "{}/{room}/{peer}",
            self.base_url
        )))
    }
}
