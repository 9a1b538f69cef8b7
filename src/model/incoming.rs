//! Events, player updates, stats, and REST track DTOs received from a
//! Lavalink node.

use crate::snowflake::Snowflake;
use serde::{Deserialize, Deserializer, Serialize};

/// Any payload received from a node over its WebSocket, besides `event`
/// bodies which are represented by [`Event`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "camelCase")]
#[non_exhaustive]
pub enum IncomingEvent {
    /// A player's position and timestamp were updated.
    PlayerUpdate(PlayerUpdate),
    /// A node's statistics were updated.
    Stats(Stats),
}

/// Dispatched when a player's position changes, roughly once every five
/// seconds while playing.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PlayerUpdate {
    /// Guild ID of the player.
    pub guild_id: Snowflake,
    /// New state of the player.
    pub state: PlayerUpdateState,
}

/// New state of a player, included in a [`PlayerUpdate`].
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct PlayerUpdateState {
    /// Unix timestamp in milliseconds of the update.
    pub time: i64,
    /// Position of the track in milliseconds.
    pub position: i64,
}

/// Statistics about a node and the players connected to it, sent every
/// minute.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Stats {
    /// CPU information about a node.
    pub cpu: StatsCpu,
    /// Frame statistics about a node, absent during the first minute a
    /// node is up.
    pub frame_stats: Option<StatsFrames>,
    /// Memory information about a node.
    pub memory: StatsMemory,
    /// Number of players on a node.
    pub players: u64,
    /// Number of players playing on a node.
    pub playing_players: u64,
    /// How long a node has been running, in milliseconds.
    pub uptime: u64,
}

/// CPU information about a node, sent in [`Stats`].
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct StatsCpu {
    /// Number of CPU cores the system running the node has.
    pub cores: usize,
    /// Recent CPU load of the Lavalink server.
    pub lavalink_load: f64,
    /// Recent CPU load of the system running the node.
    pub system_load: f64,
}

/// Frame statistics about a node, sent in [`Stats`] once a node has been up
/// for at least a minute.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct StatsFrames {
    /// Average number of frames sent per minute.
    pub sent: i64,
    /// Average number of frames nulled per minute.
    pub nulled: i64,
    /// Average number of frames deficit per minute.
    pub deficit: i64,
}

/// Memory information about a node, sent in [`Stats`].
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct StatsMemory {
    /// Memory allocated, in bytes.
    pub allocated: u64,
    /// Memory free, in bytes.
    pub free: u64,
    /// Memory reservable, in bytes.
    pub reservable: u64,
    /// Memory used, in bytes.
    pub used: u64,
}

/// An event emitted by a node about a guild's player, dispatched as a
/// `event` opcode and demultiplexed by guild id before reaching a
/// [`Player`].
///
/// [`Player`]: crate::player::Player
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type")]
#[non_exhaustive]
pub enum Event {
    /// A track ended, successfully or not.
    TrackEndEvent(TrackEndEvent),
    /// A track threw an exception during playback.
    TrackExceptionEvent(TrackExceptionEvent),
    /// A track started playing.
    TrackStartEvent(TrackStartEvent),
    /// A track got stuck while playing.
    TrackStuckEvent(TrackStuckEvent),
    /// A player's voice websocket connection to Discord's voice servers
    /// was closed.
    WebSocketClosedEvent(WebSocketClosedEvent),
}

impl Event {
    /// The guild id the event pertains to, present on every variant.
    pub fn guild_id(&self) -> &Snowflake {
        match self {
            Self::TrackEndEvent(e) => &e.guild_id,
            Self::TrackExceptionEvent(e) => &e.guild_id,
            Self::TrackStartEvent(e) => &e.guild_id,
            Self::TrackStuckEvent(e) => &e.guild_id,
            Self::WebSocketClosedEvent(e) => &e.guild_id,
        }
    }
}

/// A track finished playing.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TrackEndEvent {
    /// Guild id of the player.
    pub guild_id: Snowflake,
    /// Base64-encoded track that ended playing.
    pub track: String,
    /// Reason the track ended.
    pub reason: TrackEndReason,
}

/// Reason a track ended, included in [`TrackEndEvent`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[non_exhaustive]
pub enum TrackEndReason {
    /// The track finished normally.
    Finished,
    /// The track failed to load.
    LoadFailed,
    /// The track was cleanly stopped, most likely by a `stop` op.
    Stopped,
    /// The track was stopped because the player was paused for too long.
    Cleanup,
    /// The track was replaced by another `play` op without `noReplace`.
    Replaced,
}

impl TrackEndReason {
    /// Whether Lavalink will not automatically start the next track and
    /// the queue must advance itself.
    pub const fn may_start_next(self) -> bool {
        !matches!(self, Self::Stopped | Self::Replaced)
    }
}

/// A track threw an exception during playback.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TrackExceptionEvent {
    /// Guild id of the player.
    pub guild_id: Snowflake,
    /// Base64-encoded track that threw the exception.
    pub track: String,
    /// Details about the exception.
    pub exception: TrackException,
}

/// Details about a [`TrackExceptionEvent`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct TrackException {
    /// Human-readable message describing the exception.
    pub message: Option<String>,
    /// Severity of the exception.
    pub severity: TrackExceptionSeverity,
    /// Class of the underlying Java exception, if known.
    pub cause: Option<String>,
}

/// Severity of a [`TrackException`].
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
#[non_exhaustive]
pub enum TrackExceptionSeverity {
    /// The cause is known and usually caused by outside factors, such as
    /// a track being region-locked.
    Common,
    /// The cause might not be exactly known, but is possibly caused by
    /// outside factors.
    Suspicious,
    /// The cause is unknown and most likely a Lavalink bug.
    Fault,
}

/// A track started playing.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TrackStartEvent {
    /// Guild id of the player.
    pub guild_id: Snowflake,
    /// Base64-encoded track that started playing.
    pub track: String,
}

/// A track got stuck while playing.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TrackStuckEvent {
    /// Guild id of the player.
    pub guild_id: Snowflake,
    /// Base64-encoded track that got stuck.
    pub track: String,
    /// Threshold in milliseconds that was exceeded.
    pub threshold_ms: u64,
}

/// A player's voice websocket connection to Discord's voice servers was
/// closed.
///
/// See [Discord Docs/Voice Close Event Codes].
///
/// [Discord Docs/Voice Close Event Codes]: https://discord.com/developers/docs/topics/opcodes-and-status-codes#voice-voice-close-event-codes
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct WebSocketClosedEvent {
    /// Guild id of the player.
    pub guild_id: Snowflake,
    /// Close code as given by Discord.
    pub code: u64,
    /// Reason the voice websocket was closed.
    pub reason: String,
    /// Whether the connection was closed by Discord.
    pub by_remote: bool,
}

/// Type of search result or load failure returned by `/loadtracks`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum LoadType {
    /// A single track was loaded.
    TrackLoaded,
    /// A playlist was loaded.
    PlaylistLoaded,
    /// A list of search results was loaded.
    SearchResult,
    /// There were no matches for the given identifier.
    NoMatches,
    /// Loading the identifier failed with an exception.
    LoadFailed,
}

/// Response body of `/loadtracks`.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct LoadedTracks {
    /// Type of the response.
    pub load_type: LoadType,
    /// Information about the loaded playlist, if any.
    pub playlist_info: Option<PlaylistInfo>,
    /// Tracks that were loaded.
    pub tracks: Vec<LoadedTrack>,
    /// Exception, present when `load_type` is [`LoadType::LoadFailed`].
    pub exception: Option<TrackException>,
}

/// A single track within a [`LoadedTracks`] response.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct LoadedTrack {
    /// Information about the track.
    pub info: TrackInfo,
    /// Base64-encoded track.
    pub track: String,
}

/// Information about a track, used both in `/loadtracks` responses and
/// `/decodetrack(s)` responses.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct TrackInfo {
    /// Author of the track.
    pub author: Option<String>,
    /// Source-assigned identifier of the track.
    pub identifier: String,
    /// Whether the track can be seeked within.
    pub is_seekable: bool,
    /// Whether the track is a live stream.
    pub is_stream: bool,
    /// Length of the track, in milliseconds.
    pub length: u64,
    /// Current position of the track, in milliseconds.
    #[serde(default)]
    pub position: u64,
    /// Title of the track.
    pub title: Option<String>,
    /// URI of the track's source, if any.
    pub uri: Option<String>,
    /// Name of the source that produced the track.
    pub source_name: Option<String>,
}

/// Information about a loaded playlist, present in [`LoadedTracks`] when
/// its [`LoadType`] is [`LoadType::PlaylistLoaded`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct PlaylistInfo {
    /// Name of the playlist.
    pub name: Option<String>,
    /// Index, within `tracks`, of the track selected by the identifier
    /// that was loaded, if any. Lavalink represents "none selected" as a
    /// negative number, which is normalized to `None` here.
    #[serde(default, deserialize_with = "deserialize_selected_track")]
    pub selected_track: Option<u64>,
}

fn deserialize_selected_track<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    Ok(Option::<i64>::deserialize(deserializer)?.and_then(|value| u64::try_from(value).ok()))
}

#[cfg(test)]
mod tests {
    use super::{
        Event, LoadType, LoadedTrack, LoadedTracks, PlayerUpdate, PlayerUpdateState, PlaylistInfo, Stats, StatsCpu,
        StatsFrames, StatsMemory, TrackEndEvent, TrackEndReason, TrackException, TrackExceptionEvent,
        TrackExceptionSeverity, TrackInfo, TrackStartEvent, TrackStuckEvent, WebSocketClosedEvent,
    };
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(PlayerUpdate: Clone, Copy, Debug, PartialEq, Send, Sync);
    assert_impl_all!(PlayerUpdateState: Clone, Copy, Debug, PartialEq, Send, Sync);
    assert_impl_all!(Stats: Clone, Copy, Debug, PartialEq, Send, Sync);
    assert_impl_all!(StatsCpu: Clone, Copy, Debug, PartialEq, Send, Sync);
    assert_impl_all!(StatsFrames: Clone, Copy, Debug, PartialEq, Send, Sync);
    assert_impl_all!(StatsMemory: Clone, Copy, Debug, PartialEq, Send, Sync);
    assert_impl_all!(Event: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(TrackEndEvent: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(TrackException: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(TrackExceptionEvent: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(TrackStartEvent: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(TrackStuckEvent: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(WebSocketClosedEvent: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(LoadedTracks: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(LoadedTrack: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(TrackInfo: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(PlaylistInfo: Clone, Debug, PartialEq, Send, Sync);

    #[test]
    fn track_end_reason_replaced_does_not_advance() {
        assert!(!TrackEndReason::Replaced.may_start_next());
        assert!(!TrackEndReason::Stopped.may_start_next());
        assert!(TrackEndReason::Finished.may_start_next());
        assert!(TrackEndReason::LoadFailed.may_start_next());
        assert!(TrackEndReason::Cleanup.may_start_next());
    }

    #[test]
    fn negative_selected_track_normalizes_to_none() {
        let value = serde_json::json!({ "name": "a playlist", "selectedTrack": -1 });
        let info: PlaylistInfo = serde_json::from_value(value).unwrap();
        assert_eq!(None, info.selected_track);
    }

    #[test]
    fn positive_selected_track_is_kept() {
        let value = serde_json::json!({ "name": "a playlist", "selectedTrack": 2 });
        let info: PlaylistInfo = serde_json::from_value(value).unwrap();
        assert_eq!(Some(2), info.selected_track);
    }

    #[test]
    fn event_guild_id_reads_through_every_variant() {
        let event = Event::TrackStartEvent(TrackStartEvent {
            guild_id: crate::snowflake::Snowflake::new("1"),
            track: "track".into(),
        });
        assert_eq!("1", event.guild_id().as_str());
    }

    #[test]
    fn load_type_round_trips_screaming_snake_case() {
        let json = serde_json::to_string(&LoadType::PlaylistLoaded).unwrap();
        assert_eq!(r#""PLAYLIST_LOADED""#, json);
    }

    #[test]
    fn exception_severity_round_trips_uppercase() {
        let json = serde_json::to_string(&TrackExceptionSeverity::Suspicious).unwrap();
        assert_eq!(r#""SUSPICIOUS""#, json);
    }
}
