//! A per-guild audio session: queue, loop modes, voice attachment, and
//! translation of Lavalink events into player events.

mod connect;
mod resolve;

use crate::adapter::AdapterError;
use crate::manager::{Manager, ManagerError};
use crate::model::incoming::{Event, PlayerUpdateState, TrackEndReason, TrackException, TrackStuckEvent};
use crate::model::outgoing::{Pause, Play, Seek, Stop, Volume};
use crate::node::{Node, NodeError};
use crate::snowflake::Snowflake;
use crate::track::{QueueItem, Track};
use rand::seq::SliceRandom;
use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU16, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{broadcast, Notify};
use tracing::{debug, warn};

pub use self::resolve::ResolveError;

/// Playback-lifecycle state of a [`Player`].
///
/// Ordered: `Disconnected < Connected < Paused < Playing`, which operation
/// guards rely on (`state >= Connected`, etc).
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[non_exhaustive]
pub enum PlayerState {
    /// Not connected to a voice channel.
    Disconnected = 0,
    /// Connected to a voice channel, nothing queued or playing.
    Connected = 1,
    /// Connected, with a track loaded but paused.
    Paused = 2,
    /// Connected and actively playing a track.
    Playing = 3,
}

impl PlayerState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Disconnected,
            1 => Self::Connected,
            2 => Self::Paused,
            _ => Self::Playing,
        }
    }
}

/// How the queue advances and repeats.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum LoopMode {
    /// Advance normally; stop once the queue is exhausted.
    Off,
    /// Replay the current track indefinitely.
    Single,
    /// Advance normally, wrapping back to the start once exhausted.
    Queue,
}

impl LoopMode {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Off,
            1 => Self::Single,
            _ => Self::Queue,
        }
    }

    const fn as_u8(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Single => 1,
            Self::Queue => 2,
        }
    }
}

/// What happens to a player when its voice channel is changed or removed
/// out from under it.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum MoveBehavior {
    /// Destroy the player.
    Destroy,
    /// Pause the player and wait to be moved back or destroyed.
    Pause,
}

/// Options controlling a single [`Player`]'s voice-connection behavior.
#[derive(Clone, Debug)]
#[non_exhaustive]
pub struct PlayerOptions {
    /// How long to wait for [`Player::connect`] to observe a matching
    /// voice state update before failing.
    pub connection_timeout_ms: u64,
    /// Whether to self-deafen when connecting.
    pub self_deafen: bool,
    /// Whether to self-mute when connecting.
    pub self_mute: bool,
    /// Whether to prefer immediately becoming a stage speaker (requires
    /// the mute-members-equivalent permission) over requesting to speak.
    pub become_speaker: bool,
    /// Behavior when moved to a different non-stage channel.
    pub move_behavior: MoveBehavior,
    /// Behavior when demoted to a stage audience member.
    pub stage_move_behavior: MoveBehavior,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            connection_timeout_ms: 15_000,
            self_deafen: true,
            self_mute: false,
            become_speaker: true,
            move_behavior: MoveBehavior::Destroy,
            stage_move_behavior: MoveBehavior::Pause,
        }
    }
}

/// Lifecycle and track events a [`Player`] emits. Subscribe with
/// [`Player::subscribe`].
#[derive(Clone, Debug)]
#[non_exhaustive]
pub enum PlayerEvent {
    /// The player finished connecting to its voice channel.
    VoiceConnected,
    /// The player was moved to a different voice channel.
    VoiceMoved {
        /// The channel the player is now in.
        channel_id: Snowflake,
    },
    /// A track started playing.
    TrackStart {
        /// The track that started.
        track: Track,
    },
    /// A track stopped playing.
    TrackEnd {
        /// The track that ended.
        track: Track,
        /// Why it ended.
        reason: TrackEndReason,
    },
    /// A track threw an exception during playback.
    TrackException {
        /// The track that threw.
        track: Track,
        /// Details of the exception.
        exception: TrackException,
    },
    /// A track got stuck and was skipped.
    TrackStuck {
        /// The track that got stuck.
        track: Track,
        /// The threshold, in milliseconds, that was exceeded.
        threshold_ms: u64,
    },
    /// The node's voice websocket connection closed.
    WebSocketClosed {
        /// Close code reported by the voice gateway.
        code: u64,
        /// Reason reported by the voice gateway.
        reason: String,
        /// Whether the remote end closed the connection.
        by_remote: bool,
    },
    /// The player was paused.
    Paused,
    /// The player was resumed.
    Resumed,
    /// A non-fatal error occurred while processing the queue (e.g. a
    /// `TrackPartial` failed to resolve).
    Error {
        /// Human-readable description of the error.
        message: String,
    },
    /// The player was destroyed.
    Destroyed {
        /// Reason given for the destruction, if any.
        reason: Option<String>,
    },
}

/// Error produced by player operations.
#[derive(Debug)]
#[non_exhaustive]
pub enum PlayerError {
    /// The operation requires a different [`PlayerState`] than the one
    /// the player is currently in (e.g. `play` while `Disconnected`).
    StateConflict {
        /// The state the player was actually in.
        actual: PlayerState,
    },
    /// [`Player::connect`] was called while a connection was already in
    /// progress.
    AlreadyConnecting,
    /// [`Player::connect`] did not observe a matching voice state update
    /// before `connection_timeout_ms` elapsed.
    ConnectionTimeout,
    /// The bot lacks the permissions required to join or speak in the
    /// target channel.
    MissingPermissions,
    /// [`Player::seek`] was given a negative position.
    InvalidSeek,
    /// [`Player::skip`] was given an out-of-range index.
    InvalidSkipIndex,
    /// [`Player::set_volume`] was given a value outside `0..=1000`.
    VolumeOutOfRange,
    /// A queued [`TrackPartial`](crate::track::TrackPartial) could not be
    /// resolved to a playable track.
    InvalidTrack(ResolveError),
    /// A call into the [`ChatAdapter`](crate::adapter::ChatAdapter) failed.
    Adapter(AdapterError),
    /// A node-level send or REST call failed.
    Node(NodeError),
    /// A manager-level call (search, decode) failed.
    Manager(ManagerError),
}

impl Display for PlayerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::StateConflict { actual } => write!(f, "operation not valid in state {actual:?}"),
            Self::AlreadyConnecting => f.write_str("a connection attempt is already in progress"),
            Self::ConnectionTimeout => f.write_str("timed out waiting to join the voice channel"),
            Self::MissingPermissions => f.write_str("missing permissions required to join or speak"),
            Self::InvalidSeek => f.write_str("seek position must not be negative"),
            Self::InvalidSkipIndex => f.write_str("skip index out of range"),
            Self::VolumeOutOfRange => f.write_str("volume must be between 0 and 1000"),
            Self::InvalidTrack(source) => Display::fmt(source, f),
            Self::Adapter(source) => Display::fmt(source, f),
            Self::Node(source) => Display::fmt(source, f),
            Self::Manager(source) => Display::fmt(source, f),
        }
    }
}

impl StdError for PlayerError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::InvalidTrack(source) => Some(source),
            Self::Adapter(source) => Some(source),
            Self::Node(source) => Some(source),
            Self::Manager(source) => Some(source),
            Self::StateConflict { .. }
            | Self::AlreadyConnecting
            | Self::ConnectionTimeout
            | Self::MissingPermissions
            | Self::InvalidSeek
            | Self::InvalidSkipIndex
            | Self::VolumeOutOfRange => None,
        }
    }
}

impl From<AdapterError> for PlayerError {
    fn from(source: AdapterError) -> Self {
        Self::Adapter(source)
    }
}

impl From<NodeError> for PlayerError {
    fn from(source: NodeError) -> Self {
        Self::Node(source)
    }
}

impl From<ManagerError> for PlayerError {
    fn from(source: ManagerError) -> Self {
        Self::Manager(source)
    }
}

impl From<ResolveError> for PlayerError {
    fn from(source: ResolveError) -> Self {
        Self::InvalidTrack(source)
    }
}

const VOLUME_MIN: i64 = 0;
const VOLUME_MAX: i64 = 1000;
const VOLUME_DEFAULT: i64 = 100;
const NO_POSITION: i64 = -1;

struct PlayerRef {
    guild_id: Snowflake,
    voice_channel_id: RwLock<Snowflake>,
    text_channel_id: RwLock<Option<Snowflake>>,
    options: PlayerOptions,
    node: Node,
    state: AtomicU8,
    loop_mode: AtomicU8,
    volume: AtomicU16,
    track_position_ms: AtomicI64,
    is_stage: AtomicBool,
    is_speaker: AtomicBool,
    sent_paused_play: AtomicBool,
    connecting: AtomicBool,
    voice_connected: Notify,
    destroyed: Notify,
    queue: Mutex<Vec<QueueItem>>,
    queue_position: Mutex<Option<usize>>,
    filters: Mutex<serde_json::Map<String, serde_json::Value>>,
    events: broadcast::Sender<PlayerEvent>,
}

/// A per-guild audio session.
///
/// Cloning a `Player` is cheap; every clone refers to the same underlying
/// session. Obtain one from [`Manager::create_player`] or
/// [`Manager::player`].
///
/// [`Manager::create_player`]: crate::manager::Manager::create_player
/// [`Manager::player`]: crate::manager::Manager::player
#[derive(Clone)]
pub struct Player(Arc<PlayerRef>);

impl Player {
    pub(crate) fn new(
        guild_id: Snowflake,
        voice_channel_id: Snowflake,
        text_channel_id: Option<Snowflake>,
        node: Node,
        options: PlayerOptions,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self(Arc::new(PlayerRef {
            guild_id,
            voice_channel_id: RwLock::new(voice_channel_id),
            text_channel_id: RwLock::new(text_channel_id),
            options,
            node,
            state: AtomicU8::new(PlayerState::Disconnected as u8),
            loop_mode: AtomicU8::new(LoopMode::Off.as_u8()),
            volume: AtomicU16::new(VOLUME_DEFAULT as u16),
            track_position_ms: AtomicI64::new(NO_POSITION),
            is_stage: AtomicBool::new(false),
            is_speaker: AtomicBool::new(false),
            sent_paused_play: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            voice_connected: Notify::new(),
            destroyed: Notify::new(),
            queue: Mutex::new(Vec::new()),
            queue_position: Mutex::new(None),
            filters: Mutex::new(serde_json::Map::new()),
            events,
        }))
    }

    /// The guild this player belongs to.
    pub fn guild_id(&self) -> &Snowflake {
        &self.0.guild_id
    }

    /// The voice channel this player is attached to.
    pub fn voice_channel_id(&self) -> Snowflake {
        self.0.voice_channel_id.read().expect("voice_channel_id lock poisoned").clone()
    }

    /// The text channel commands for this player are associated with, if
    /// any.
    pub fn text_channel_id(&self) -> Option<Snowflake> {
        self.0.text_channel_id.read().expect("text_channel_id lock poisoned").clone()
    }

    /// The node this player sends ops to.
    pub fn node(&self) -> &Node {
        &self.0.node
    }

    /// This player's current lifecycle state.
    pub fn state(&self) -> PlayerState {
        PlayerState::from_u8(self.0.state.load(Ordering::Acquire))
    }

    fn set_state(&self, state: PlayerState) {
        self.0.state.store(state as u8, Ordering::Release);
    }

    /// This player's current loop mode.
    pub fn loop_mode(&self) -> LoopMode {
        LoopMode::from_u8(self.0.loop_mode.load(Ordering::Acquire))
    }

    /// Set the loop mode. Takes effect the next time the queue advances.
    pub fn set_loop_mode(&self, mode: LoopMode) {
        self.0.loop_mode.store(mode.as_u8(), Ordering::Release);
    }

    /// This player's current volume, between 0 and 1000 inclusive.
    pub fn volume(&self) -> i64 {
        self.0.volume.load(Ordering::Acquire) as i64
    }

    /// This player's current track position in milliseconds, if a track
    /// is loaded and has reported a position.
    pub fn track_position_ms(&self) -> Option<i64> {
        match self.0.track_position_ms.load(Ordering::Acquire) {
            NO_POSITION => None,
            position => Some(position),
        }
    }

    fn clear_track_position(&self) {
        self.0.track_position_ms.store(NO_POSITION, Ordering::Release);
    }

    /// Whether the voice channel this player is connected to is a stage
    /// channel.
    pub fn is_stage(&self) -> bool {
        self.0.is_stage.load(Ordering::Acquire)
    }

    /// Whether the player is currently a stage speaker (meaningless
    /// outside a stage channel).
    pub fn is_speaker(&self) -> bool {
        self.0.is_speaker.load(Ordering::Acquire)
    }

    /// A snapshot of the current queue.
    pub fn queue(&self) -> Vec<QueueItem> {
        self.0.queue.lock().expect("queue lock poisoned").clone()
    }

    /// The index within [`Player::queue`] of the currently playing or
    /// paused track, if any.
    pub fn queue_position(&self) -> Option<usize> {
        *self.0.queue_position.lock().expect("queue_position lock poisoned")
    }

    /// Subscribe to this player's lifecycle and track events.
    pub fn subscribe(&self) -> broadcast::Receiver<PlayerEvent> {
        self.0.events.subscribe()
    }

    fn emit(&self, event: PlayerEvent) {
        let _ = self.0.events.send(event);
    }

    fn require_connected(&self) -> Result<(), PlayerError> {
        let actual = self.state();
        if actual >= PlayerState::Connected {
            Ok(())
        } else {
            Err(PlayerError::StateConflict { actual })
        }
    }

    fn current_track_index(&self) -> Option<usize> {
        self.queue_position()
    }

    fn current_item(&self) -> Option<QueueItem> {
        let position = self.current_track_index()?;
        self.0.queue.lock().expect("queue lock poisoned").get(position).cloned()
    }

    /// Append one or more tracks or partials to the queue. If nothing is
    /// currently loaded, starts playing the first newly-added item, applying
    /// `options` to that initial play only.
    pub async fn play(
        &self,
        items: Vec<QueueItem>,
        options: Option<PlayOptions>,
        manager: &Manager,
    ) -> Result<(), PlayerError> {
        self.require_connected()?;
        if items.is_empty() {
            return Ok(());
        }

        let start_index = {
            let mut queue = self.0.queue.lock().expect("queue lock poisoned");
            let start_index = queue.len();
            queue.extend(items);
            start_index
        };

        let should_start = self.state() == PlayerState::Connected;
        if should_start {
            *self.0.queue_position.lock().expect("queue_position lock poisoned") = Some(start_index);
            self.play_current(manager, options).await?;
        }

        Ok(())
    }

    async fn play_current(&self, manager: &Manager, options: Option<PlayOptions>) -> Result<(), PlayerError> {
        let Some(position) = self.current_track_index() else {
            return Ok(());
        };

        let item = {
            let queue = self.0.queue.lock().expect("queue lock poisoned");
            queue.get(position).cloned()
        };
        let Some(item) = item else {
            return Ok(());
        };

        let track = match item {
            QueueItem::Track(track) => track,
            QueueItem::Partial(partial) => {
                let track = resolve::resolve(&partial, manager).await?;
                let mut queue = self.0.queue.lock().expect("queue lock poisoned");
                if let Some(slot) = queue.get_mut(position) {
                    *slot = QueueItem::Track(track.clone());
                }
                track
            }
        };

        self.send_play(track, options).await
    }

    async fn send_play(&self, track: Track, options: Option<PlayOptions>) -> Result<(), PlayerError> {
        let mut play = Play::from((self.0.guild_id.clone(), track.encoded.clone()));
        let requested_volume = options.as_ref().and_then(|options| options.volume);

        if let Some(options) = options {
            play.start_time = options.start_time_ms;
            play.end_time = options.end_time_ms;
        }

        if let Some(volume) = requested_volume {
            if !(VOLUME_MIN..=VOLUME_MAX).contains(&volume) {
                return Err(PlayerError::VolumeOutOfRange);
            }
            self.0.volume.store(volume as u16, Ordering::Release);
            if volume != VOLUME_DEFAULT {
                play.volume = Some(volume);
            }
        } else {
            let current = self.volume();
            if current != VOLUME_DEFAULT {
                play.volume = Some(current);
            }
        }

        if self.is_stage() && !self.is_speaker() {
            play.pause = Some(true);
        }

        if play.pause == Some(true) {
            self.0.sent_paused_play.store(true, Ordering::Release);
        } else {
            self.0.sent_paused_play.store(false, Ordering::Release);
        }

        self.0.node.send(play).await?;
        Ok(())
    }

    /// Skip to a specific queue index, or advance to the next track per
    /// [`LoopMode`] if `index` is `None`.
    pub async fn skip(&self, index: Option<usize>, manager: &Manager) -> Result<(), PlayerError> {
        self.require_connected()?;
        self.0.node.send(Stop::from(self.0.guild_id.clone())).await?;

        match index {
            Some(index) => {
                let len = self.0.queue.lock().expect("queue lock poisoned").len();
                if index >= len {
                    return Err(PlayerError::InvalidSkipIndex);
                }
                *self.0.queue_position.lock().expect("queue_position lock poisoned") = Some(index);
                self.clear_track_position();
                self.play_current(manager, None).await
            }
            None => self.advance_queue(manager).await,
        }
    }

    /// Fisher-Yates shuffle the queue and begin playing from the start.
    pub async fn shuffle(&self, manager: &Manager) -> Result<(), PlayerError> {
        self.require_connected()?;
        self.0.node.send(Stop::from(self.0.guild_id.clone())).await?;

        {
            let mut queue = self.0.queue.lock().expect("queue lock poisoned");
            queue.shuffle(&mut rand::thread_rng());
        }
        *self.0.queue_position.lock().expect("queue_position lock poisoned") = Some(0);
        self.clear_track_position();
        self.play_current(manager, None).await
    }

    /// Seek the current track to `position_ms`.
    pub async fn seek(&self, position_ms: i64) -> Result<(), PlayerError> {
        self.require_connected()?;
        if position_ms < 0 {
            return Err(PlayerError::InvalidSeek);
        }
        self.0.node.send(Seek::from((self.0.guild_id.clone(), position_ms))).await?;
        Ok(())
    }

    /// Pause playback.
    pub async fn pause(&self) -> Result<(), PlayerError> {
        self.require_connected()?;
        self.0.node.send(Pause::from((self.0.guild_id.clone(), true))).await?;
        self.set_state(PlayerState::Paused);
        self.emit(PlayerEvent::Paused);
        Ok(())
    }

    /// Resume playback.
    pub async fn resume(&self) -> Result<(), PlayerError> {
        self.require_connected()?;
        self.0.node.send(Pause::from((self.0.guild_id.clone(), false))).await?;
        self.set_state(PlayerState::Playing);
        self.emit(PlayerEvent::Resumed);
        Ok(())
    }

    /// Stop the current track without advancing the queue.
    pub async fn stop(&self) -> Result<(), PlayerError> {
        self.require_connected()?;
        self.0.node.send(Stop::from(self.0.guild_id.clone())).await?;
        self.clear_track_position();
        self.set_state(PlayerState::Connected);
        *self.0.queue_position.lock().expect("queue_position lock poisoned") = None;
        Ok(())
    }

    /// Remove the track at `index` from the queue. If it is the currently
    /// playing track and `advance` is true, the queue advances; otherwise
    /// playback stops.
    pub async fn remove(&self, index: usize, advance: bool, manager: &Manager) -> Result<(), PlayerError> {
        self.require_connected()?;
        let was_current = {
            let mut queue = self.0.queue.lock().expect("queue lock poisoned");
            if index >= queue.len() {
                return Err(PlayerError::InvalidSkipIndex);
            }
            queue.remove(index);
            self.current_track_index() == Some(index)
        };

        if was_current {
            if advance {
                self.advance_queue(manager).await
            } else {
                self.stop().await
            }
        } else {
            Ok(())
        }
    }

    /// Clear the queue, optionally stopping the current track too. When
    /// `stop` is false, the currently playing track (if any) is kept.
    pub async fn clear(&self, stop: bool) -> Result<(), PlayerError> {
        self.require_connected()?;
        let current = self.current_item();

        if stop {
            self.stop().await?;
            *self.0.queue.lock().expect("queue lock poisoned") = Vec::new();
        } else {
            let mut queue = self.0.queue.lock().expect("queue lock poisoned");
            *queue = current.into_iter().collect();
            *self.0.queue_position.lock().expect("queue_position lock poisoned") = if queue.is_empty() { None } else { Some(0) };
        }

        Ok(())
    }

    /// Set the volume, between 0 and 1000 inclusive.
    pub async fn set_volume(&self, volume: i64) -> Result<(), PlayerError> {
        self.require_connected()?;
        if !(VOLUME_MIN..=VOLUME_MAX).contains(&volume) {
            return Err(PlayerError::VolumeOutOfRange);
        }
        self.0.node.send(Volume::from((self.0.guild_id.clone(), volume))).await?;
        self.0.volume.store(volume as u16, Ordering::Release);
        Ok(())
    }

    /// Replace the filter chain. An empty map clears every filter.
    pub async fn set_filters(&self, filters: serde_json::Map<String, serde_json::Value>) -> Result<(), PlayerError> {
        self.require_connected()?;
        let payload = crate::model::outgoing::Filters::from((self.0.guild_id.clone(), filters.clone()));
        self.0.node.send(payload).await?;
        *self.0.filters.lock().expect("filters lock poisoned") = filters;
        Ok(())
    }

    /// Destroy the player: disconnect from voice (if connected), tell the
    /// node to discard it, and remove it from the owning [`Manager`].
    pub async fn destroy(&self, reason: Option<String>, manager: &Manager) {
        if self.state() >= PlayerState::Connected {
            let guild_id = self.0.guild_id.clone();
            if let Err(source) = manager
                .adapter()
                .update_voice_state(&guild_id, None, self.0.options.self_mute, self.0.options.self_deafen)
                .await
            {
                warn!(guild_id = %guild_id, %source, "failed to send voice disconnect during destroy");
            }
        }

        if let Err(source) = self.0.node.send(Stop::from(self.0.guild_id.clone())).await {
            debug!(guild_id = %self.0.guild_id, %source, "best-effort stop failed during destroy");
        }
        if let Err(source) = self.0.node.send(crate::model::outgoing::Destroy::from(self.0.guild_id.clone())).await {
            debug!(guild_id = %self.0.guild_id, %source, "best-effort destroy op failed");
        }

        *self.0.queue.lock().expect("queue lock poisoned") = Vec::new();
        *self.0.queue_position.lock().expect("queue_position lock poisoned") = None;
        self.set_state(PlayerState::Disconnected);
        self.0.destroyed.notify_waiters();

        manager.remove_player(&self.0.guild_id);
        self.emit(PlayerEvent::Destroyed { reason });
    }

    /// Advance the queue per the current [`LoopMode`], resolving and
    /// playing the next track. Skips tracks that fail to resolve or play,
    /// emitting [`PlayerEvent::Error`] for each.
    async fn advance_queue(&self, manager: &Manager) -> Result<(), PlayerError> {
        if self.state() < PlayerState::Connected {
            debug!(guild_id = %self.0.guild_id, "advance_queue called while disconnected, ignoring");
            return Ok(());
        }

        // Set for one iteration after a single-looped track fails to play,
        // so that iteration steps past it instead of retrying it forever.
        // Does not touch the player's stored loop mode.
        let mut skip_single_loop = false;

        loop {
            let len = self.0.queue.lock().expect("queue lock poisoned").len();
            let mut position_guard = self.0.queue_position.lock().expect("queue_position lock poisoned");

            let single_loop = self.loop_mode() == LoopMode::Single && !skip_single_loop;
            skip_single_loop = false;

            *position_guard = match *position_guard {
                None => Some(0),
                Some(current) if single_loop => Some(current),
                Some(current) => {
                    let next = current + 1;
                    if next >= len && self.loop_mode() == LoopMode::Queue {
                        Some(0)
                    } else {
                        Some(next)
                    }
                }
            };
            let position = *position_guard;
            drop(position_guard);

            let in_range = position.is_some_and(|position| position < len);
            if !in_range {
                *self.0.queue_position.lock().expect("queue_position lock poisoned") = None;
                self.clear_track_position();
                if self.state() > PlayerState::Connected {
                    self.0.node.send(Stop::from(self.0.guild_id.clone())).await.ok();
                }
                self.set_state(PlayerState::Connected);
                return Ok(());
            }

            match self.play_current(manager, None).await {
                Ok(()) => return Ok(()),
                Err(error) => {
                    warn!(guild_id = %self.0.guild_id, %error, "failed to play next track, skipping");
                    self.emit(PlayerEvent::Error { message: error.to_string() });
                    if self.loop_mode() == LoopMode::Single {
                        skip_single_loop = true;
                    }
                    continue;
                }
            }
        }
    }

    /// Apply a [`PlayerUpdateState`] received from the node.
    pub(crate) fn handle_player_update(&self, state: PlayerUpdateState) {
        self.0.track_position_ms.store(state.position, Ordering::Release);
    }

    /// Translate an [`Event`] received from the node into the
    /// corresponding [`PlayerEvent`], updating internal state as needed.
    pub(crate) async fn handle_event(&self, event: Event, manager: &Manager) {
        match event {
            Event::TrackStartEvent(start) => {
                if let Some(track) = self.decorate_track(&start.track, manager).await {
                    if self.0.sent_paused_play.swap(false, Ordering::AcqRel) {
                        self.set_state(PlayerState::Paused);
                        self.emit(PlayerEvent::Paused);
                    } else {
                        self.set_state(PlayerState::Playing);
                    }
                    self.emit(PlayerEvent::TrackStart { track });
                }
            }
            Event::TrackEndEvent(end) => {
                let track = self.decorate_track(&end.track, manager).await;
                self.clear_track_position();
                self.set_state(PlayerState::Connected);
                if let Some(track) = track {
                    self.emit(PlayerEvent::TrackEnd { track, reason: end.reason });
                }
                if end.reason.may_start_next() {
                    if let Err(error) = self.advance_queue(manager).await {
                        warn!(guild_id = %self.0.guild_id, %error, "failed to advance queue after track end");
                    }
                }
            }
            Event::TrackExceptionEvent(exception) => {
                if let Some(track) = self.decorate_track(&exception.track, manager).await {
                    self.emit(PlayerEvent::TrackException { track, exception: exception.exception });
                }
            }
            Event::TrackStuckEvent(TrackStuckEvent { track, threshold_ms, .. }) => {
                if let Some(decorated) = self.decorate_track(&track, manager).await {
                    self.emit(PlayerEvent::TrackStuck { track: decorated, threshold_ms });
                }
                if let Err(source) = self.0.node.send(Stop::from(self.0.guild_id.clone())).await {
                    warn!(guild_id = %self.0.guild_id, %source, "failed to stop stuck track");
                }
                if let Err(error) = self.advance_queue(manager).await {
                    warn!(guild_id = %self.0.guild_id, %error, "failed to advance queue after stuck track");
                }
            }
            Event::WebSocketClosedEvent(closed) => {
                self.emit(PlayerEvent::WebSocketClosed {
                    code: closed.code,
                    reason: closed.reason,
                    by_remote: closed.by_remote,
                });
            }
        }
    }

    async fn decorate_track(&self, encoded: &str, manager: &Manager) -> Option<Track> {
        if let Some(QueueItem::Track(track)) = self
            .queue()
            .into_iter()
            .find(|item| item.as_track().is_some_and(|track| track.encoded == encoded))
        {
            return Some(track);
        }

        match manager.decode_tracks(std::slice::from_ref(&encoded.to_owned())).await {
            Ok(mut tracks) if !tracks.is_empty() => Some(tracks.remove(0)),
            Ok(_) => None,
            Err(source) => {
                warn!(guild_id = %self.0.guild_id, %source, "failed to decode track for event");
                None
            }
        }
    }
}

/// Per-play overrides for [`Player::play`].
#[derive(Clone, Copy, Debug, Default)]
#[non_exhaustive]
pub struct PlayOptions {
    /// Milliseconds into the track to start at.
    pub start_time_ms: Option<u64>,
    /// Milliseconds into the track to stop at.
    pub end_time_ms: Option<u64>,
    /// Volume to play the track at, between 0 and 1000 inclusive. Stored as
    /// the player's new volume regardless of whether it equals the default
    /// (100), which is simply omitted from the wire payload.
    pub volume: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::{LoopMode, Player, PlayerError, PlayerEvent, PlayerOptions, PlayerState};
    use crate::node::{Node, NodeConfig};
    use crate::snowflake::Snowflake;
    use crate::track::{QueueItem, Track};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(PlayerState: Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd, Send, Sync);
    assert_impl_all!(LoopMode: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(PlayerOptions: Clone, Debug, Send, Sync);
    assert_impl_all!(PlayerEvent: Clone, Debug, Send, Sync);
    assert_impl_all!(PlayerError: Debug, Send, Sync, std::error::Error);

    #[test]
    fn player_state_ordering_matches_lifecycle() {
        assert!(PlayerState::Disconnected < PlayerState::Connected);
        assert!(PlayerState::Connected < PlayerState::Paused);
        assert!(PlayerState::Paused < PlayerState::Playing);
    }

    #[test]
    fn player_options_default_matches_spec() {
        let options = PlayerOptions::default();
        assert_eq!(15_000, options.connection_timeout_ms);
        assert!(options.self_deafen);
        assert!(!options.self_mute);
    }

    fn sample_track(identifier: &str) -> Track {
        Track {
            encoded: format!("encoded-{identifier}"),
            identifier: identifier.to_owned(),
            author: None,
            length_ms: 1000,
            is_stream: false,
            position_ms: 0,
            title: None,
            uri: None,
            source_name: None,
            requester: None,
        }
    }

    fn make_player(state: PlayerState) -> Player {
        let node = Node::new(0, NodeConfig::new("localhost", 2333, "youshallnotpass", "test"));
        let player = Player::new(Snowflake::new("guild"), Snowflake::new("channel"), None, node, PlayerOptions::default());
        player.set_state(state);
        player
    }

    #[tokio::test]
    async fn operations_require_connected_state() {
        let player = make_player(PlayerState::Disconnected);
        let error = player.clear(false).await.unwrap_err();
        assert!(matches!(error, PlayerError::StateConflict { actual: PlayerState::Disconnected }));
    }

    #[tokio::test]
    async fn set_volume_rejects_out_of_range_values() {
        let player = make_player(PlayerState::Connected);
        let error = player.set_volume(1001).await.unwrap_err();
        assert!(matches!(error, PlayerError::VolumeOutOfRange));
        assert_eq!(100, player.volume(), "rejected volume must not be applied");
    }

    #[tokio::test]
    async fn seek_rejects_negative_position() {
        let player = make_player(PlayerState::Connected);
        let error = player.seek(-1).await.unwrap_err();
        assert!(matches!(error, PlayerError::InvalidSeek));
    }

    #[test]
    fn set_loop_mode_is_idempotent() {
        let player = make_player(PlayerState::Connected);
        player.set_loop_mode(LoopMode::Queue);
        player.set_loop_mode(LoopMode::Queue);
        assert_eq!(LoopMode::Queue, player.loop_mode());
    }

    #[tokio::test]
    async fn clear_without_stop_keeps_only_the_current_track() {
        let player = make_player(PlayerState::Playing);
        let current = QueueItem::Track(sample_track("2"));
        *player.0.queue.lock().unwrap() =
            vec![QueueItem::Track(sample_track("1")), current.clone(), QueueItem::Track(sample_track("3"))];
        *player.0.queue_position.lock().unwrap() = Some(1);

        player.clear(false).await.unwrap();

        assert_eq!(vec![current], player.queue());
        assert_eq!(Some(0), player.queue_position());
    }
}
