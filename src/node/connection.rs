use super::{Node, NodeMessage, NodeState};
use crate::model::incoming::IncomingEvent;
use crate::model::outgoing::OutgoingEvent;
use crate::model::Event;
use crate::snowflake::Snowflake;
use futures_util::{FutureExt, SinkExt, StreamExt};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use http::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace, warn};

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Failure to establish a [`Connection`].
pub(super) enum ConnectError {
    /// A transport-level failure (DNS, TCP, TLS, HTTP handshake rejection).
    Transport(tokio_tungstenite::tungstenite::Error),
    /// The socket opened but was closed again before the handshake could
    /// be considered complete (a resume-key negotiation that never went
    /// through, or a close frame arriving before anything else did).
    ClosedDuringInit,
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectError {
    fn from(source: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Transport(source)
    }
}

/// The live half of a node's WebSocket session: owns the socket and the
/// channel player ops arrive on.
pub(super) struct Connection {
    socket: WsStream,
    outgoing_rx: UnboundedReceiver<OutgoingEvent>,
    outgoing_tx: UnboundedSender<OutgoingEvent>,
    messages_tx: UnboundedSender<NodeMessage>,
}

impl Connection {
    /// Perform the initial WebSocket handshake for `node`.
    pub(super) async fn connect(node: Node, user_id: Snowflake) -> Result<Self, ConnectError> {
        let socket = open_socket(&node, &user_id).await?;
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();

        let mut connection = Self { socket, outgoing_rx, outgoing_tx, messages_tx: node.messages_tx() };

        if let Some(resume) = node.config().resume.as_ref() {
            let configure = serde_json::json!({
                "op": "configureResuming",
                "key": resume.key,
                "timeout": (resume.timeout_ms as f64 / 1000.0).round() as u64,
            });
            let text = serde_json::to_string(&configure).unwrap_or_default();
            if connection.socket.send(Message::Text(text)).await.is_err() {
                return Err(ConnectError::ClosedDuringInit);
            }
        }

        // A server that rejects the session after the WebSocket upgrade
        // (rather than at the HTTP handshake) closes immediately; catch
        // that before handing the connection off as healthy.
        if let Some(Ok(Message::Close(_))) = connection.socket.next().now_or_never().flatten() {
            return Err(ConnectError::ClosedDuringInit);
        }

        Ok(connection)
    }

    /// A clone-able sender that [`Node::send`] uses to enqueue outgoing
    /// player ops onto this connection.
    pub(super) fn sender(&self) -> UnboundedSender<OutgoingEvent> {
        self.outgoing_tx.clone()
    }

    /// Drive the connection until it closes, then, unless the node was
    /// killed, hand reconnection back to [`Node::spawn`]'s own bounded
    /// retry loop rather than retrying here.
    pub(super) async fn run(mut self, node: Node, user_id: Snowflake) {
        if node.is_killed() {
            let _ = self.socket.send(Message::Close(None)).await;
            return;
        }

        loop {
            tokio::select! {
                () = node.killed() => {
                    let _ = self.socket.send(Message::Close(None)).await;
                    return;
                }
                incoming = self.socket.next() => match incoming {
                    Some(Ok(message)) => {
                        if !self.incoming(&node, message).await {
                            break;
                        }
                    }
                    Some(Err(source)) => {
                        warn!(node_id = node.id(), %source, "websocket error");
                        break;
                    }
                    None => {
                        debug!(node_id = node.id(), "connection closed");
                        break;
                    }
                },
                outgoing = self.outgoing_rx.recv() => match outgoing {
                    Some(event) => {
                        let text = match serde_json::to_string(&event) {
                            Ok(text) => text,
                            Err(source) => {
                                warn!(node_id = node.id(), %source, "failed to serialize outgoing payload");
                                continue;
                            }
                        };
                        trace!(node_id = node.id(), %text, "sending payload");
                        if self.socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        debug!(node_id = node.id(), "outgoing channel closed, node dropped or killed");
                        return;
                    }
                },
            }
        }

        if node.is_killed() {
            return;
        }

        node.transition(NodeState::Disconnected);
        if let Err(error) = node.spawn(&user_id).await {
            warn!(node_id = node.id(), %error, "automatic reconnect failed");
        }
    }

    /// Handle a single incoming WebSocket frame. Returns `false` if the
    /// connection should be considered closed.
    async fn incoming(&mut self, node: &Node, message: Message) -> bool {
        match message {
            Message::Close(frame) => {
                debug!(node_id = node.id(), ?frame, "node closed the connection");
                let _ = self.socket.send(Message::Close(None)).await;
                false
            }
            Message::Ping(data) => {
                let _ = self.socket.send(Message::Pong(data)).await;
                true
            }
            Message::Pong(_) => true,
            Message::Text(text) => {
                self.dispatch(node, &text);
                true
            }
            Message::Binary(data) => {
                if let Ok(text) = String::from_utf8(data) {
                    self.dispatch(node, &text);
                }
                true
            }
        }
    }

    fn dispatch(&self, node: &Node, text: &str) {
        let Ok(value) = serde_json::from_str::<serde_json::Value>(text) else {
            warn!(node_id = node.id(), "received non-JSON payload, ignoring");
            return;
        };

        match value.get("op").and_then(serde_json::Value::as_str) {
            Some("stats") => match serde_json::from_value(value) {
                Ok(IncomingEvent::Stats(stats)) => node.set_stats(stats),
                _ => warn!(node_id = node.id(), "failed to parse stats payload"),
            },
            Some("playerUpdate") => match serde_json::from_value(value) {
                Ok(IncomingEvent::PlayerUpdate(update)) => {
                    let _ = self.messages_tx.send(NodeMessage::PlayerUpdate(update));
                }
                _ => warn!(node_id = node.id(), "failed to parse playerUpdate payload"),
            },
            Some("event") => match serde_json::from_value::<Event>(value) {
                Ok(event) => {
                    let _ = self.messages_tx.send(NodeMessage::Event(event));
                }
                Err(source) => warn!(node_id = node.id(), %source, "failed to parse event payload"),
            },
            Some(other) => debug!(node_id = node.id(), opcode = other, "ignoring unrecognized opcode"),
            None => warn!(node_id = node.id(), "received payload without an opcode"),
        }
    }
}

async fn open_socket(
    node: &Node,
    user_id: &Snowflake,
) -> Result<WsStream, tokio_tungstenite::tungstenite::Error> {
    let config = node.config();

    let mut builder = Request::builder()
        .uri(config.ws_url())
        .header("Authorization", &config.password)
        .header("User-Id", user_id.as_str())
        .header("Client-Name", &config.client_name);

    if let Some(resume) = config.resume.as_ref() {
        builder = builder.header("Resume-Key", &resume.key);
    }

    let request = builder
        .body(())
        .map_err(|source| tokio_tungstenite::tungstenite::Error::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, source)))?;

    let (socket, _response) = tokio_tungstenite::connect_async(request).await?;
    Ok(socket)
}
