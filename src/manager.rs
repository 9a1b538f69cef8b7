//! Owns the node pool and player pool, routes by load, and demultiplexes
//! voice-gateway events to the right player.

use crate::adapter::{ChatAdapter, VoiceServerUpdate, VoiceStateUpdate};
use crate::model::incoming::{LoadType, LoadedTracks, TrackException, TrackInfo};
use crate::model::outgoing::VoiceUpdate;
use crate::node::{Node, NodeConfig, NodeError, NodeMessage, NodeState, RequestOptions};
use crate::player::{Player, PlayerOptions};
use crate::snowflake::Snowflake;
use crate::track::Track;
use dashmap::DashMap;
use serde_json::json;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::Arc;
use tracing::{debug, warn};

/// Source to prefix bare search terms with when resolving a [`Manager::search`]
/// query that isn't already a URL.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum SearchSource {
    /// Search YouTube (`ytsearch:`).
    YouTube,
    /// Search SoundCloud (`scsearch:`).
    SoundCloud,
}

impl SearchSource {
    const fn prefix(self) -> &'static str {
        match self {
            Self::YouTube => "ytsearch:",
            Self::SoundCloud => "scsearch:",
        }
    }
}

/// Which statistic [`Manager::available_nodes`] sorts nodes by.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum LeastLoadSort {
    /// Sort by the host system's CPU load.
    System,
    /// Sort by the Lavalink process's own reported CPU load.
    Lavalink,
}

/// Options controlling [`Manager`] construction and default behavior.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct ManagerOptions {
    /// Client name reported to every node and used as the default
    /// [`PlayerOptions`] owner name.
    pub client_name: String,
    /// Default search source used by [`Manager::search`] when the query
    /// is not already a URL and no source is given explicitly.
    pub default_search_source: SearchSource,
    /// Statistic [`Manager::available_nodes`] sorts on.
    pub least_load_sort: LeastLoadSort,
    /// Configuration for every node this manager should own.
    pub node_configs: Vec<NodeConfig>,
}

impl ManagerOptions {
    /// Create manager options for `node_configs` with the spec defaults:
    /// client name `"@distype/lavalink"`, [`SearchSource::YouTube`], and
    /// [`LeastLoadSort::System`].
    pub fn new(node_configs: Vec<NodeConfig>) -> Self {
        Self {
            client_name: "@distype/lavalink".to_owned(),
            default_search_source: SearchSource::YouTube,
            least_load_sort: LeastLoadSort::System,
            node_configs,
        }
    }
}

/// Error produced by manager operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum ManagerError {
    /// No nodes are currently [`NodeState::Running`] to service a request.
    NoNodesAvailable,
    /// A REST response was missing the data the caller needed (e.g. an
    /// empty `/decodetracks` array).
    NoResponseData,
    /// The caller passed an invalid argument (e.g. an empty track list to
    /// [`Manager::decode_tracks`]).
    InvalidArgument(&'static str),
    /// A node-level REST or WebSocket error occurred while servicing the
    /// request.
    Node(NodeError),
    /// The server reported that loading tracks failed.
    LoadFailed(TrackException),
}

impl Display for ManagerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::NoNodesAvailable => f.write_str("no nodes are currently available"),
            Self::NoResponseData => f.write_str("node response did not contain the expected data"),
            Self::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
            Self::Node(source) => Display::fmt(source, f),
            Self::LoadFailed(exception) => write!(f, "load failed: {}", exception.message.as_deref().unwrap_or("unknown reason")),
        }
    }
}

impl StdError for ManagerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Node(source) => Some(source),
            Self::NoNodesAvailable | Self::NoResponseData | Self::InvalidArgument(_) | Self::LoadFailed(_) => None,
        }
    }
}

impl From<NodeError> for ManagerError {
    fn from(source: NodeError) -> Self {
        Self::Node(source)
    }
}

struct ManagerRef {
    adapter: Arc<dyn ChatAdapter>,
    nodes: DashMap<u64, Node>,
    players: DashMap<Snowflake, Player>,
    options: ManagerOptions,
}

/// Owns every [`Node`] and [`Player`] for a running bot, routing new
/// players to the least-loaded node and forwarding voice-gateway events
/// to the player they belong to.
///
/// Cloning a `Manager` is cheap; every clone refers to the same
/// underlying pools.
#[derive(Clone)]
pub struct Manager(Arc<ManagerRef>);

impl Manager {
    /// Construct a manager with one [`Node`] per entry in
    /// `options.node_configs`, and subscribe `adapter`'s voice-gateway
    /// events into it.
    ///
    /// Does not connect any node; call [`Manager::spawn_nodes`]
    /// afterwards.
    pub async fn new(options: ManagerOptions, adapter: Arc<dyn ChatAdapter>) -> Self {
        let nodes = DashMap::new();
        for (id, config) in options.node_configs.iter().cloned().enumerate() {
            nodes.insert(id as u64, Node::new(id as u64, config));
        }

        let manager = Self(Arc::new(ManagerRef {
            adapter,
            nodes,
            players: DashMap::new(),
            options,
        }));

        manager.0.adapter.clone().subscribe_voice_updates(manager.clone()).await;
        manager
    }

    /// The [`ChatAdapter`] this manager was constructed with.
    pub fn adapter(&self) -> &Arc<dyn ChatAdapter> {
        &self.0.adapter
    }

    /// This manager's configured options.
    pub fn options(&self) -> &ManagerOptions {
        &self.0.options
    }

    /// Call [`Node::spawn`] on every owned node concurrently, returning
    /// each node's outcome in unspecified order.
    pub async fn spawn_nodes(&self) -> Vec<(u64, Result<(), NodeError>)> {
        let nodes: Vec<Node> = self.0.nodes.iter().map(|entry| entry.value().clone()).collect();
        let user_id = self.0.adapter.bot_id().await.ok();

        let futures = nodes.into_iter().map(|node| {
            let manager = self.clone();
            let user_id = user_id.clone();
            async move {
                let id = node.id();
                let Some(user_id) = user_id else {
                    return (id, Err(NodeError::MissingUserId));
                };
                match node.spawn(&user_id).await {
                    Ok(Some(messages)) => {
                        manager.spawn_message_pump(node, messages);
                        (id, Ok(()))
                    }
                    Ok(None) => (id, Ok(())),
                    Err(error) => (id, Err(error)),
                }
            }
        });

        futures_util::future::join_all(futures).await
    }

    fn spawn_message_pump(&self, node: Node, mut messages: tokio::sync::mpsc::UnboundedReceiver<NodeMessage>) {
        let manager = self.clone();
        tokio::spawn(async move {
            while let Some(message) = messages.recv().await {
                match message {
                    NodeMessage::StateChanged(state) => {
                        debug!(node_id = node.id(), ?state, "node state changed");
                    }
                    NodeMessage::PlayerUpdate(update) => {
                        if let Some(player) = manager.0.players.get(&update.guild_id) {
                            player.handle_player_update(update.state);
                        }
                    }
                    NodeMessage::Event(event) => {
                        if let Some(player) = manager.0.players.get(event.guild_id()) {
                            player.handle_event(event, &manager).await;
                        }
                    }
                }
            }
        });
    }

    /// Snapshot of nodes currently in [`NodeState::Running`], sorted
    /// ascending by load. The first element, if any, is the scheduling
    /// winner for a new player.
    pub fn available_nodes(&self) -> Vec<Node> {
        let mut nodes: Vec<Node> = self
            .0
            .nodes
            .iter()
            .map(|entry| entry.value().clone())
            .filter(|node| node.state() == NodeState::Running)
            .collect();

        nodes.sort_by(|a, b| self.load_key(a).total_cmp(&self.load_key(b)));
        nodes
    }

    fn load_key(&self, node: &Node) -> f64 {
        let ratio = match self.0.options.least_load_sort {
            LeastLoadSort::System => node.system_load_ratio(),
            LeastLoadSort::Lavalink => node.lavalink_load_ratio(),
        };
        let cores = node.stats().map_or(1, |stats| stats.cpu.cores.max(1)) as f64;
        ratio.unwrap_or(0.0) / cores
    }

    /// Look up an existing player for `guild_id`, if one exists.
    pub fn player(&self, guild_id: &Snowflake) -> Option<Player> {
        self.0.players.get(guild_id).map(|entry| entry.value().clone())
    }

    /// Get the existing player for `guild_id`, or create one attached to
    /// the least-loaded available node.
    pub fn create_player(
        &self,
        guild_id: Snowflake,
        voice_channel_id: Snowflake,
        text_channel_id: Option<Snowflake>,
        options: PlayerOptions,
    ) -> Result<Player, ManagerError> {
        if let Some(player) = self.player(&guild_id) {
            return Ok(player);
        }

        let node = self.available_nodes().into_iter().next().ok_or(ManagerError::NoNodesAvailable)?;
        let player = Player::new(guild_id.clone(), voice_channel_id, text_channel_id, node, options);
        self.0.players.insert(guild_id, player.clone());
        Ok(player)
    }

    /// Remove and forget a player. Called by [`Player::destroy`] once it
    /// has finished tearing itself down.
    pub(crate) fn remove_player(&self, guild_id: &Snowflake) {
        self.0.players.remove(guild_id);
    }

    /// Search for tracks matching `query`, using a node selected by
    /// [`Manager::available_nodes`].
    ///
    /// If `query` looks like a URL (starts with `http://` or `https://`)
    /// it is sent verbatim as the identifier; otherwise it is prefixed
    /// with the given or default [`SearchSource`].
    pub async fn search(
        &self,
        query: &str,
        source: Option<SearchSource>,
    ) -> Result<LoadedTracks, ManagerError> {
        let node = self.available_nodes().into_iter().next().ok_or(ManagerError::NoNodesAvailable)?;

        let identifier = if query.starts_with("http://") || query.starts_with("https://") {
            query.to_owned()
        } else {
            let source = source.unwrap_or(self.0.options.default_search_source);
            format!("{}{}", source.prefix(), query)
        };

        let loaded: LoadedTracks = node
            .request(
                reqwest::Method::GET,
                "/loadtracks",
                RequestOptions { query: Some(&[("identifier", identifier.as_str())]), ..Default::default() },
            )
            .await?;

        if loaded.load_type == LoadType::LoadFailed {
            if let Some(exception) = loaded.exception.clone() {
                return Err(ManagerError::LoadFailed(exception));
            }
        }

        Ok(loaded)
    }

    /// Decode one or more base64 track strings back into [`Track`]s.
    ///
    /// A single input uses `GET /decodetrack`; two or more use
    /// `POST /decodetracks` in a single round trip.
    pub async fn decode_tracks(&self, encoded: &[String]) -> Result<Vec<Track>, ManagerError> {
        if encoded.is_empty() {
            return Err(ManagerError::InvalidArgument("decode_tracks requires at least one track"));
        }

        let node = self.available_nodes().into_iter().next().ok_or(ManagerError::NoNodesAvailable)?;

        if let [only] = encoded {
            let info: TrackInfo = node
                .request(
                    reqwest::Method::GET,
                    "/decodetrack",
                    RequestOptions { query: Some(&[("track", only.as_str())]), ..Default::default() },
                )
                .await?;
            return Ok(vec![Track::from_info(only.clone(), info, None)]);
        }

        let body = json!(encoded);
        let infos: Vec<TrackInfo> = node
            .request(reqwest::Method::POST, "/decodetracks", RequestOptions { body: Some(&body), ..Default::default() })
            .await?;

        if infos.len() != encoded.len() {
            return Err(ManagerError::NoResponseData);
        }

        Ok(encoded
            .iter()
            .cloned()
            .zip(infos)
            .map(|(encoded, info)| Track::from_info(encoded, info, None))
            .collect())
    }

    /// Handle a VOICE_SERVER_UPDATE from the chat gateway: pair it with
    /// the guild's current session id and forward a `voiceUpdate` op to
    /// the owning player's node.
    ///
    /// Errors (no such player, no session id yet) are swallowed, matching
    /// the chat gateway's tendency to retransmit voice server updates.
    pub async fn handle_voice_server_update(&self, payload: VoiceServerUpdate) {
        let Some(player) = self.player(&payload.guild_id) else {
            debug!(guild_id = %payload.guild_id, "voice server update for a guild with no player, ignoring");
            return;
        };

        let Ok(session_id) = self.0.adapter.guild_shard_session_id(&payload.guild_id).await else {
            warn!(guild_id = %payload.guild_id, "no shard session id available for voice server update");
            return;
        };

        let update = VoiceUpdate::from((payload.guild_id.clone(), session_id, payload));
        if let Err(source) = player.node().send(update).await {
            warn!(guild_id = %payload.guild_id, %source, "failed to forward voice server update");
        }
    }

    /// Handle a VOICE_STATE_UPDATE from the chat gateway: if it concerns
    /// the bot's own user in a guild with a player, forward it to that
    /// player's [`Player::handle_move`].
    ///
    /// [`Player::handle_move`]: crate::player::Player::handle_move
    pub async fn handle_voice_state_update(&self, payload: VoiceStateUpdate) {
        let Ok(bot_id) = self.0.adapter.bot_id().await else {
            return;
        };
        if payload.user_id != bot_id {
            return;
        }

        let Some(player) = self.player(&payload.guild_id) else {
            return;
        };

        player.handle_move(payload, self).await;
    }
}

#[cfg(test)]
mod tests {
    use super::{LeastLoadSort, Manager, ManagerError, ManagerOptions, SearchSource};
    use crate::adapter::{AdapterError, ChatAdapter, Permissions};
    use crate::player::PlayerOptions;
    use crate::snowflake::Snowflake;
    use async_trait::async_trait;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;
    use std::sync::Arc;

    assert_impl_all!(ManagerOptions: Clone, Debug, Send, Sync);
    assert_impl_all!(ManagerError: Debug, Send, Sync, std::error::Error);
    assert_impl_all!(SearchSource: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(LeastLoadSort: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn search_source_prefixes() {
        assert_eq!("ytsearch:", SearchSource::YouTube.prefix());
        assert_eq!("scsearch:", SearchSource::SoundCloud.prefix());
    }

    struct MockAdapter;

    #[async_trait]
    impl ChatAdapter for MockAdapter {
        async fn bot_id(&self) -> Result<Snowflake, AdapterError> {
            Ok(Snowflake::new("1"))
        }

        async fn guild_shard_session_id(&self, _guild_id: &Snowflake) -> Result<String, AdapterError> {
            Ok("session".to_owned())
        }

        async fn has_perms(
            &self,
            _guild_id: &Snowflake,
            _channel_id: Option<&Snowflake>,
        ) -> Result<Permissions, AdapterError> {
            Ok(Permissions::all())
        }

        async fn is_stage(&self, _guild_id: &Snowflake, _channel_id: &Snowflake) -> Result<bool, AdapterError> {
            Ok(false)
        }

        async fn modify_current_user_voice_state(
            &self,
            _guild_id: &Snowflake,
            _channel_id: &Snowflake,
            _suppress: Option<bool>,
            _request_to_speak_timestamp: Option<String>,
        ) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn update_voice_state(
            &self,
            _guild_id: &Snowflake,
            _channel_id: Option<&Snowflake>,
            _self_mute: bool,
            _self_deaf: bool,
        ) -> Result<(), AdapterError> {
            Ok(())
        }

        async fn subscribe_voice_updates(&self, _manager: Manager) {}
    }

    fn mock_options() -> ManagerOptions {
        ManagerOptions {
            client_name: "test".to_owned(),
            default_search_source: SearchSource::YouTube,
            least_load_sort: LeastLoadSort::System,
            node_configs: Vec::new(),
        }
    }

    #[tokio::test]
    async fn manager_with_no_nodes_has_no_available_nodes() {
        let manager = Manager::new(mock_options(), Arc::new(MockAdapter)).await;
        assert!(manager.available_nodes().is_empty());
        assert!(manager.spawn_nodes().await.is_empty());
    }

    #[tokio::test]
    async fn create_player_without_nodes_fails() {
        let manager = Manager::new(mock_options(), Arc::new(MockAdapter)).await;
        let error = manager
            .create_player(Snowflake::new("guild"), Snowflake::new("channel"), None, PlayerOptions::default())
            .unwrap_err();
        assert!(matches!(error, ManagerError::NoNodesAvailable));
    }

    #[tokio::test]
    async fn search_without_nodes_fails() {
        let manager = Manager::new(mock_options(), Arc::new(MockAdapter)).await;
        let error = manager.search("foo", None).await.unwrap_err();
        assert!(matches!(error, ManagerError::NoNodesAvailable));
    }

    #[tokio::test]
    async fn decode_tracks_rejects_empty_input_before_checking_nodes() {
        let manager = Manager::new(mock_options(), Arc::new(MockAdapter)).await;
        let error = manager.decode_tracks(&[]).await.unwrap_err();
        assert!(matches!(error, ManagerError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn player_lookup_is_none_for_unknown_guild() {
        let manager = Manager::new(mock_options(), Arc::new(MockAdapter)).await;
        assert!(manager.player(&Snowflake::new("guild")).is_none());
    }
}
