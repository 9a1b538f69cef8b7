//! A single resilient WebSocket+REST connection to a Lavalink server.

mod connection;
mod rest;

use self::connection::{ConnectError, Connection};
use crate::model::incoming::{PlayerUpdate, Stats};
use crate::model::outgoing::OutgoingEvent;
use crate::model::Event;
use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Notify;
use tracing::{debug, warn};

pub use self::rest::{RequestError, RequestOptions};

/// Resumable-session configuration for a [`Node`].
///
/// When set, a dropped WebSocket connection can be resumed within
/// `timeout_ms` of disconnecting: Lavalink buffers player events instead
/// of destroying players, and they are flushed once the node reconnects.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub struct ResumeConfig {
    /// Key identifying the session to resume, sent as the `Resume-Key`
    /// header on connect.
    pub key: String,
    /// How long, in milliseconds, Lavalink should retain the session
    /// after a disconnect.
    pub timeout_ms: u64,
}

impl ResumeConfig {
    /// Create a new resume configuration with the default 60 second
    /// timeout.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), timeout_ms: 60_000 }
    }
}

/// Configuration for connecting to and authenticating with a single
/// Lavalink node.
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub struct NodeConfig {
    /// Hostname or IP address of the node, without a scheme or port.
    pub host: String,
    /// Port the node listens on.
    pub port: u16,
    /// Whether to connect over TLS (`wss`/`https`).
    pub secure: bool,
    /// Password configured on the node.
    pub password: String,
    /// Client name sent as the `Client-Name` header.
    pub client_name: String,
    /// Resumable-session configuration, if resuming is desired.
    pub resume: Option<ResumeConfig>,
    /// Maximum number of connection attempts [`Node::spawn`] will make
    /// before giving up.
    pub spawn_max_attempts: u32,
    /// Delay, in milliseconds, between spawn attempts.
    pub spawn_attempt_delay_ms: u64,
    /// Headers sent with every REST request issued through
    /// [`Node::request`], besides `Authorization`.
    pub default_request_headers: Vec<(String, String)>,
    /// Default timeout, in milliseconds, for REST requests that don't
    /// specify their own.
    pub default_request_timeout_ms: u64,
}

impl NodeConfig {
    /// Create a node configuration with default spawn/timeout settings
    /// and no resuming.
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>, client_name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            secure: false,
            password: password.into(),
            client_name: client_name.into(),
            resume: None,
            spawn_max_attempts: 5,
            spawn_attempt_delay_ms: 5_000,
            default_request_headers: Vec::new(),
            default_request_timeout_ms: 10_000,
        }
    }

    fn ws_url(&self) -> String {
        let scheme = if self.secure { "wss" } else { "ws" };
        format!("{scheme}://{}:{}/", self.host, self.port)
    }

    pub(crate) fn http_base_url(&self) -> String {
        let scheme = if self.secure { "https" } else { "http" };
        format!("{scheme}://{}:{}", self.host, self.port)
    }
}

/// Lifecycle state of a [`Node`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[non_exhaustive]
pub enum NodeState {
    /// No connection attempt is in progress and none has succeeded.
    Idle,
    /// [`Node::spawn`] is in progress: a connection attempt is underway
    /// and has not yet succeeded or exhausted its retries.
    Connecting,
    /// The node is connected and accepting player ops.
    Running,
    /// The connection was lost and an automatic reconnect is underway.
    Disconnected,
}

impl NodeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Connecting,
            2 => Self::Running,
            _ => Self::Disconnected,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Idle => 0,
            Self::Connecting => 1,
            Self::Running => 2,
            Self::Disconnected => 3,
        }
    }
}

/// A message emitted by a node's connection task: either a lifecycle
/// transition or a payload that must be demultiplexed by guild id, which
/// only the [`Manager`] can do since it owns the player set.
///
/// [`Manager`]: crate::manager::Manager
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
pub enum NodeMessage {
    /// The node's [`NodeState`] changed.
    StateChanged(NodeState),
    /// A player's position was updated.
    PlayerUpdate(PlayerUpdate),
    /// A track or voice-websocket event occurred for a player.
    Event(Event),
}

/// Error produced by node operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum NodeError {
    /// [`Node::spawn`] was called while a previous call was still in
    /// progress.
    AlreadyConnecting,
    /// [`Node::kill`] interrupted an in-progress [`Node::spawn`].
    InterruptedByKill,
    /// The WebSocket connection closed before the handshake completed.
    ClosedDuringInit,
    /// [`Node::spawn`] exhausted `spawn_max_attempts` without a
    /// successful connection.
    MaxSpawnAttempts {
        /// The underlying error from the final attempt.
        source: Box<tokio_tungstenite::tungstenite::Error>,
    },
    /// [`Node::send`] was called while the node was not [`NodeState::Running`].
    SendWithoutOpenSocket,
    /// Serializing an outgoing payload failed.
    SerializingPayload {
        /// Reason for the error.
        source: serde_json::Error,
    },
    /// A REST request failed.
    Rest(RequestError),
    /// The node rejected the WebSocket handshake with an unauthorized
    /// status, which is never worth retrying.
    Unauthorized,
    /// [`Node::spawn`] was called before the embedder's `ChatAdapter`
    /// reported a bot user id, which is required for the `User-Id`
    /// handshake header.
    MissingUserId,
}

impl Display for NodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::AlreadyConnecting => f.write_str("a spawn is already in progress for this node"),
            Self::InterruptedByKill => f.write_str("node was killed while connecting"),
            Self::ClosedDuringInit => f.write_str("connection closed before the handshake completed"),
            Self::MaxSpawnAttempts { .. } => f.write_str("exhausted maximum spawn attempts"),
            Self::SendWithoutOpenSocket => f.write_str("node is not running, so no payload can be sent"),
            Self::SerializingPayload { .. } => f.write_str("failed to serialize an outgoing payload"),
            Self::Rest(source) => Display::fmt(source, f),
            Self::Unauthorized => f.write_str("node rejected the connection as unauthorized"),
            Self::MissingUserId => f.write_str("cannot spawn before the adapter reports a bot user id"),
        }
    }
}

impl StdError for NodeError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::MaxSpawnAttempts { source } => Some(&**source),
            Self::SerializingPayload { source } => Some(source),
            Self::Rest(source) => Some(source),
            Self::AlreadyConnecting
            | Self::InterruptedByKill
            | Self::ClosedDuringInit
            | Self::SendWithoutOpenSocket
            | Self::Unauthorized
            | Self::MissingUserId => None,
        }
    }
}

impl From<RequestError> for NodeError {
    fn from(source: RequestError) -> Self {
        Self::Rest(source)
    }
}

pub(crate) fn is_unauthorized(error: &tokio_tungstenite::tungstenite::Error) -> bool {
    matches!(
        error,
        tokio_tungstenite::tungstenite::Error::Http(response)
            if response.status().as_u16() == 401
    )
}

#[derive(Debug, Default)]
struct NodeStatsCell(std::sync::Mutex<Option<Stats>>);

struct NodeRef {
    id: u64,
    config: NodeConfig,
    state: AtomicU8,
    kill_latch: AtomicBool,
    kill_signal: Notify,
    stats: NodeStatsCell,
    sender: tokio::sync::Mutex<Option<UnboundedSender<OutgoingEvent>>>,
    messages_tx: UnboundedSender<NodeMessage>,
    messages_rx: tokio::sync::Mutex<Option<UnboundedReceiver<NodeMessage>>>,
    http: reqwest::Client,
}

/// A single, resilient connection to a Lavalink server.
///
/// Cloning a `Node` is cheap; every clone refers to the same underlying
/// connection.
#[derive(Clone)]
pub struct Node(Arc<NodeRef>);

impl Node {
    /// Construct a new node in [`NodeState::Idle`]. Call [`Node::spawn`]
    /// to begin connecting.
    pub fn new(id: u64, config: NodeConfig) -> Self {
        let http = reqwest::Client::builder()
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let (messages_tx, messages_rx) = mpsc::unbounded_channel();

        Self(Arc::new(NodeRef {
            id,
            config,
            state: AtomicU8::new(NodeState::Idle.as_u8()),
            kill_latch: AtomicBool::new(false),
            kill_signal: Notify::new(),
            stats: NodeStatsCell::default(),
            sender: tokio::sync::Mutex::new(None),
            messages_tx,
            messages_rx: tokio::sync::Mutex::new(Some(messages_rx)),
            http,
        }))
    }

    /// This node's id, unique within the owning [`Manager`].
    ///
    /// [`Manager`]: crate::manager::Manager
    pub const fn id(&self) -> u64 {
        self.0.id
    }

    /// This node's configuration.
    pub const fn config(&self) -> &NodeConfig {
        &self.0.config
    }

    /// This node's current lifecycle state.
    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.0.state.load(Ordering::Acquire))
    }

    /// Store `state` and emit [`NodeMessage::StateChanged`] for it. Every
    /// lifecycle transition goes through here so a caller polling the
    /// [`NodeMessage`] stream observes the same sequence `state()` would.
    fn transition(&self, state: NodeState) {
        self.0.state.store(state.as_u8(), Ordering::Release);
        let _ = self.0.messages_tx.send(NodeMessage::StateChanged(state));
    }

    pub(crate) fn is_killed(&self) -> bool {
        self.0.kill_latch.load(Ordering::Acquire)
    }

    /// Resolves the next time [`Node::kill`] is called on this node (or
    /// any clone of it).
    fn killed(&self) -> impl std::future::Future<Output = ()> + '_ {
        self.0.kill_signal.notified()
    }

    fn messages_tx(&self) -> UnboundedSender<NodeMessage> {
        self.0.messages_tx.clone()
    }

    /// The most recently received statistics for this node, if any have
    /// arrived yet.
    pub fn stats(&self) -> Option<Stats> {
        *self.0.stats.0.lock().expect("stats mutex poisoned")
    }

    fn set_stats(&self, stats: Stats) {
        *self.0.stats.0.lock().expect("stats mutex poisoned") = Some(stats);
    }

    /// The system-load component used by [`ManagerOptions::least_load_sort`]
    /// `System`, normalized by core count. `None` if no stats have arrived.
    ///
    /// [`ManagerOptions::least_load_sort`]: crate::manager::ManagerOptions::least_load_sort
    pub fn system_load_ratio(&self) -> Option<f64> {
        self.stats().map(|stats| stats.cpu.system_load)
    }

    /// The lavalink-load component used by
    /// [`ManagerOptions::least_load_sort`] `Lavalink`. `None` if no stats
    /// have arrived.
    ///
    /// [`ManagerOptions::least_load_sort`]: crate::manager::ManagerOptions::least_load_sort
    pub fn lavalink_load_ratio(&self) -> Option<f64> {
        self.stats().map(|stats| stats.cpu.lavalink_load)
    }

    /// Begin connecting to the Lavalink server, retrying up to
    /// `spawn_max_attempts` times with `spawn_attempt_delay_ms` between
    /// attempts. This is the node's sole reconnection mechanism: an
    /// unsolicited disconnect after a successful spawn re-enters this same
    /// bounded loop rather than running a separate retry path.
    ///
    /// On the very first successful spawn, returns a receiver of
    /// [`NodeMessage`]s the caller (normally a [`Manager`]) must poll to
    /// keep the connection alive and to learn about demultiplexable
    /// payloads. Later, automatic re-spawns after a drop reuse that same
    /// channel and return `Ok(None)`, since the original receiver is
    /// already being polled.
    ///
    /// [`Manager`]: crate::manager::Manager
    pub async fn spawn(&self, user_id: &Snowflake) -> Result<Option<UnboundedReceiver<NodeMessage>>, NodeError> {
        if self.state() == NodeState::Connecting {
            return Err(NodeError::AlreadyConnecting);
        }

        self.0.kill_latch.store(false, Ordering::Release);
        self.transition(NodeState::Connecting);

        let mut attempt = 0u32;
        let connection = loop {
            if self.0.kill_latch.load(Ordering::Acquire) {
                self.transition(NodeState::Idle);
                return Err(NodeError::InterruptedByKill);
            }

            attempt += 1;
            match Connection::connect(self.clone(), user_id.clone()).await {
                Ok(connection) => break connection,
                Err(ConnectError::ClosedDuringInit) => {
                    self.transition(NodeState::Idle);
                    return Err(NodeError::ClosedDuringInit);
                }
                Err(ConnectError::Transport(source)) if is_unauthorized(&source) => {
                    self.transition(NodeState::Idle);
                    return Err(NodeError::Unauthorized);
                }
                Err(ConnectError::Transport(source)) if attempt >= self.0.config.spawn_max_attempts => {
                    self.transition(NodeState::Idle);
                    return Err(NodeError::MaxSpawnAttempts { source: Box::new(source) });
                }
                Err(ConnectError::Transport(source)) => {
                    warn!(node_id = self.0.id, attempt, %source, "spawn attempt failed, retrying");
                    tokio::time::sleep(Duration::from_millis(self.0.config.spawn_attempt_delay_ms)).await;
                }
            }
        };

        *self.0.sender.lock().await = Some(connection.sender());
        self.transition(NodeState::Running);

        let messages_rx = self.0.messages_rx.lock().await.take();

        let node = self.clone();
        let user_id = user_id.clone();
        tokio::spawn(async move { connection.run(node, user_id).await });

        debug!(node_id = self.0.id, "node running");
        Ok(messages_rx)
    }

    /// Close the connection, if any, and transition to [`NodeState::Idle`].
    ///
    /// Interrupts an in-progress [`Node::spawn`] call (including an
    /// automatic re-spawn after an unsolicited disconnect), which will
    /// return [`NodeError::InterruptedByKill`], and signals the live
    /// connection task, if any, to close its socket and stop.
    pub async fn kill(&self) {
        self.0.kill_latch.store(true, Ordering::Release);
        self.0.kill_signal.notify_waiters();
        *self.0.sender.lock().await = None;
        self.transition(NodeState::Idle);
    }

    /// Serialize and send a player op to this node.
    ///
    /// # Errors
    ///
    /// Returns [`NodeError::SendWithoutOpenSocket`] if this node is not
    /// [`NodeState::Running`].
    pub async fn send(&self, event: impl Into<OutgoingEvent>) -> Result<(), NodeError> {
        if self.state() != NodeState::Running {
            return Err(NodeError::SendWithoutOpenSocket);
        }

        let event = event.into();
        let guard = self.0.sender.lock().await;
        let sender = guard.as_ref().ok_or(NodeError::SendWithoutOpenSocket)?;

        sender.send(event).map_err(|_| NodeError::SendWithoutOpenSocket)
    }

    /// Issue a REST request against this node, returning the deserialized
    /// JSON body.
    pub async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: reqwest::Method,
        route: &str,
        options: RequestOptions<'_>,
    ) -> Result<T, NodeError> {
        rest::execute(self, method, route, options).await.map_err(NodeError::from)
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.0.http
    }
}

#[cfg(test)]
mod tests {
    use super::{NodeConfig, NodeError, NodeState, ResumeConfig};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(NodeConfig: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(ResumeConfig: Clone, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(NodeState: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(NodeError: Debug, Send, Sync, std::error::Error);

    #[test]
    fn ws_url_uses_scheme_from_secure_flag() {
        let mut config = NodeConfig::new("localhost", 2333, "youshallnotpass", "test");
        assert_eq!("ws://localhost:2333/", config.ws_url());
        config.secure = true;
        assert_eq!("wss://localhost:2333/", config.ws_url());
    }

    #[test]
    fn http_base_url_uses_scheme_from_secure_flag() {
        let mut config = NodeConfig::new("localhost", 2333, "youshallnotpass", "test");
        assert_eq!("http://localhost:2333", config.http_base_url());
        config.secure = true;
        assert_eq!("https://localhost:2333", config.http_base_url());
    }

    #[test]
    fn node_state_u8_round_trips() {
        for state in [NodeState::Idle, NodeState::Connecting, NodeState::Running, NodeState::Disconnected] {
            assert_eq!(state, NodeState::from_u8(state.as_u8()));
        }
    }
}
