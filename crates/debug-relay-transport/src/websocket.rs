//! WebSocket relay client.

use std::time::Duration;

use async_trait::async_trait;
use debug_relay_core::{Gateway, SessionId};
use futures::{SinkExt, StreamExt, stream::SplitStream};
use tokio::{net::TcpStream, sync::mpsc, task::JoinHandle};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

use crate::{
    protocol::Envelope,
    relay::{RelayConnection, RelayConnector, RelayError, relay_path},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How long `close` waits for the close frame to be flushed.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

/// Connects to the gateway's websocket relay.
#[derive(Debug, Clone)]
pub struct WsRelayConnector {
    ws_base: String,
}

impl WsRelayConnector {
    /// Create a connector for the given gateway.
    #[must_use]
    pub fn new(gateway: &Gateway) -> Self {
        Self {
            ws_base: gateway.ws_base(),
        }
    }

    /// Full websocket URL for a session.
    #[must_use]
    pub fn url_for(&self, session_id: &SessionId) -> String {
        format!("{}{}", self.ws_base, relay_path(session_id))
    }
}

#[async_trait]
impl RelayConnector for WsRelayConnector {
    type Connection = WsRelayConnection;

    async fn connect(&self, session_id: &SessionId) -> Result<WsRelayConnection, RelayError> {
        let url = self.url_for(session_id);
        tracing::debug!(%url, "Connecting to relay");

        let (ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| RelayError::Connect(format!("{url}: {e}")))?;

        tracing::info!(%session_id, "Relay connected");
        Ok(WsRelayConnection::new(ws_stream))
    }
}

/// Open websocket relay connection.
///
/// Outbound frames go through a writer task so `send` never waits on the
/// socket; inbound frames are read on demand by `recv`.
pub struct WsRelayConnection {
    tx: mpsc::UnboundedSender<Message>,
    reader: SplitStream<WsStream>,
    send_task: JoinHandle<()>,
}

impl WsRelayConnection {
    fn new(ws_stream: WsStream) -> Self {
        let (mut ws_sender, reader) = ws_stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

        let send_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let closing = matches!(msg, Message::Close(_));
                if let Err(e) = ws_sender.send(msg).await {
                    tracing::debug!("Relay write failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
        });

        Self {
            tx,
            reader,
            send_task,
        }
    }
}

#[async_trait]
impl RelayConnection for WsRelayConnection {
    async fn send(&mut self, envelope: &Envelope) -> Result<(), RelayError> {
        let json = envelope.to_json()?;
        self.tx
            .send(Message::Text(json))
            .map_err(|_| RelayError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<Envelope>, RelayError> {
        while let Some(msg) = self.reader.next().await {
            let text = match msg {
                Ok(Message::Text(text)) => text,
                Ok(Message::Binary(data)) => match String::from_utf8(data) {
                    Ok(s) => s,
                    Err(_) => continue,
                },
                Ok(Message::Close(_)) => return Ok(None),
                Ok(_) => continue,
                Err(e) => return Err(RelayError::Transport(e.to_string())),
            };

            match Envelope::parse(&text) {
                Ok(envelope) => return Ok(Some(envelope)),
                Err(e) => {
                    tracing::warn!("Dropping relay frame: {e}");
                }
            }
        }
        Ok(None)
    }

    async fn close(&mut self) {
        if self.tx.send(Message::Close(None)).is_ok()
            && tokio::time::timeout(CLOSE_TIMEOUT, &mut self.send_task)
                .await
                .is_err()
        {
            tracing::debug!("Relay close frame not flushed in time");
        }
        self.send_task.abort();
    }
}

impl Drop for WsRelayConnection {
    fn drop(&mut self) {
        self.send_task.abort();
    }
}
