//! WebSocket client link using `tokio-tungstenite`.
//!
//! The stream is split so that a pending `recv` never holds the lock a
//! concurrent `send` needs.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Link, LinkId, TransportError, next_link_id};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// A WebSocket connection to the broker.
pub struct WebSocketLink {
    id: LinkId,
    url: String,
    sink: Mutex<SplitSink<WsStream, Message>>,
    stream: Mutex<SplitStream<WsStream>>,
}

impl WebSocketLink {
    /// Connects to `url` (`ws://` or `wss://`).
    pub async fn connect(url: &str) -> Result<Self, TransportError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            TransportError::ConnectFailed(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                e,
            ))
        })?;
        let id = next_link_id();
        tracing::debug!(%id, url, "WebSocket link connected");
        let (sink, stream) = ws.split();
        Ok(Self {
            id,
            url: url.to_string(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
        })
    }
}

impl Link for WebSocketLink {
    async fn send(&self, data: &[u8]) -> Result<(), TransportError> {
        let msg = Message::Binary(data.to_vec().into());
        self.sink.lock().await.send(msg).await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(Some(data.into())),
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue, // skip text/ping/pong/frame
                Some(Err(e)) => {
                    return Err(TransportError::ReceiveFailed(std::io::Error::new(
                        std::io::ErrorKind::ConnectionReset,
                        e,
                    )));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.sink.lock().await.close().await.map_err(|e| {
            TransportError::SendFailed(std::io::Error::new(std::io::ErrorKind::BrokenPipe, e))
        })
    }

    fn id(&self) -> LinkId {
        self.id
    }

    fn peer(&self) -> String {
        self.url.clone()
    }
}
