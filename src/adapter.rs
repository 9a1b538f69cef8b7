//! The single external boundary between this crate and a concrete
//! chat-gateway library.
//!
//! Everything this crate needs from "the bot" — its own user id, voice
//! permission checks, stage-channel mutation, and opcode-4 sending — is
//! expressed as the [`ChatAdapter`] trait. The embedder implements it once
//! against whatever gateway crate they use; this crate never names one.

use crate::manager::Manager;
use crate::snowflake::Snowflake;
use async_trait::async_trait;
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::error::Error as StdError;
use std::fmt::{Display, Formatter, Result as FmtResult};

bitflags! {
    /// The subset of chat-platform voice permissions this crate cares
    /// about, modeled after `twilight_model::guild::Permissions` but scoped
    /// to what [`Player::connect`] and stage choreography need.
    ///
    /// [`Player::connect`]: crate::player::Player::connect
    #[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
    #[serde(transparent)]
    pub struct Permissions: u32 {
        /// Permission to connect to a voice channel.
        const CONNECT = 1 << 0;
        /// Permission to embed links in messages.
        const EMBED_LINKS = 1 << 1;
        /// Permission to mute members, which also grants the ability to
        /// promote oneself to a stage speaker without requesting.
        const MUTE_MEMBERS = 1 << 2;
        /// Permission to request to speak on a stage channel.
        const REQUEST_TO_SPEAK = 1 << 3;
        /// Permission to send messages.
        const SEND_MESSAGES = 1 << 4;
        /// Permission to speak in a voice channel.
        const SPEAK = 1 << 5;
        /// Permission to view a channel at all.
        const VIEW_CHANNEL = 1 << 6;
    }
}

/// A chat-gateway VOICE_SERVER_UPDATE payload, reduced to the fields the
/// Lavalink wire protocol's `voiceUpdate` op needs.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VoiceServerUpdate {
    /// Voice connection token.
    pub token: String,
    /// Guild this voice server update is for.
    pub guild_id: Snowflake,
    /// Voice server host, without a protocol or port.
    pub endpoint: Option<String>,
}

/// A chat-gateway VOICE_STATE_UPDATE payload, reduced to the fields the
/// [`Manager`] and [`Player`] need to track voice-channel membership and
/// stage speaker state.
///
/// [`Player`]: crate::player::Player
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct VoiceStateUpdate {
    /// Guild this voice state is for.
    pub guild_id: Snowflake,
    /// User this voice state belongs to.
    pub user_id: Snowflake,
    /// Channel the user is now connected to, if any.
    pub channel_id: Option<Snowflake>,
    /// Session id used to build a `voiceUpdate` payload.
    pub session_id: String,
    /// Whether the user's voice state is server-suppressed (stage
    /// audience versus speaker).
    pub suppress: bool,
    /// Timestamp of the user's most recent request to speak, if any.
    pub request_to_speak_timestamp: Option<String>,
}

/// Error produced when the adapter cannot answer a query because the
/// underlying gateway connection has not reached the necessary state yet
/// (for example, the bot's own user id is unknown before `READY`).
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub struct AdapterError {
    kind: AdapterErrorKind,
}

impl AdapterError {
    /// Create a new adapter error of the given kind.
    pub const fn new(kind: AdapterErrorKind) -> Self {
        Self { kind }
    }

    /// The kind of error that occurred.
    pub const fn kind(&self) -> &AdapterErrorKind {
        &self.kind
    }
}

impl Display for AdapterError {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.kind {
            AdapterErrorKind::GatewayUserUndefined => {
                f.write_str("bot user id is not yet known (gateway not ready)")
            }
            AdapterErrorKind::ShardSessionUndefined { guild_id } => {
                write!(f, "no shard session established for guild {guild_id}")
            }
            AdapterErrorKind::UnknownChannel { channel_id } => {
                write!(f, "channel {channel_id} is not known to the adapter")
            }
        }
    }
}

impl StdError for AdapterError {}

/// The reason an [`AdapterError`] occurred.
#[derive(Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum AdapterErrorKind {
    /// The bot's own user id has not been observed yet.
    GatewayUserUndefined,
    /// No shard session id is known for the given guild.
    ShardSessionUndefined {
        /// Guild the session was requested for.
        guild_id: Snowflake,
    },
    /// A channel id was referenced that the adapter has no record of.
    UnknownChannel {
        /// The unrecognized channel.
        channel_id: Snowflake,
    },
}

/// Capability set the embedder implements to let this crate interact with
/// the chat platform without depending on a specific gateway crate.
///
/// All methods are `async` so that an implementation backed by a remote
/// gateway (rather than in-process cache) remains possible; this trait is
/// object-safe and is always held as `Arc<dyn ChatAdapter>`.
#[async_trait]
pub trait ChatAdapter: Send + Sync {
    /// The bot's own user id.
    async fn bot_id(&self) -> Result<Snowflake, AdapterError>;

    /// The current voice-gateway session id for the bot's shard in the
    /// given guild, used to build `voiceUpdate` payloads.
    async fn guild_shard_session_id(&self, guild_id: &Snowflake) -> Result<String, AdapterError>;

    /// The bot's effective permissions in `channel_id` (or guild-wide if
    /// `channel_id` is `None`).
    async fn has_perms(
        &self,
        guild_id: &Snowflake,
        channel_id: Option<&Snowflake>,
    ) -> Result<Permissions, AdapterError>;

    /// Whether `channel_id` is a stage channel.
    async fn is_stage(&self, guild_id: &Snowflake, channel_id: &Snowflake) -> Result<bool, AdapterError>;

    /// Mutate the bot's own voice state in a stage channel: promote to or
    /// demote from speaker, or register a request to speak.
    async fn modify_current_user_voice_state(
        &self,
        guild_id: &Snowflake,
        channel_id: &Snowflake,
        suppress: Option<bool>,
        request_to_speak_timestamp: Option<String>,
    ) -> Result<(), AdapterError>;

    /// Send an opcode-4 voice state update over the chat gateway.
    async fn update_voice_state(
        &self,
        guild_id: &Snowflake,
        channel_id: Option<&Snowflake>,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<(), AdapterError>;

    /// Wire the adapter's VOICE_SERVER_UPDATE and VOICE_STATE_UPDATE
    /// streams into `manager`'s handlers. Called once, at construction
    /// time, by [`Manager::new`].
    async fn subscribe_voice_updates(&self, manager: Manager);
}

#[cfg(test)]
mod tests {
    use super::{AdapterError, AdapterErrorKind, ChatAdapter, Permissions, VoiceServerUpdate, VoiceStateUpdate};
    use static_assertions::{assert_impl_all, assert_obj_safe};
    use std::fmt::Debug;

    assert_impl_all!(Permissions: Clone, Copy, Debug, Eq, Send, Sync);
    assert_impl_all!(VoiceServerUpdate: Clone, Debug, Send, Sync);
    assert_impl_all!(VoiceStateUpdate: Clone, Debug, Send, Sync);
    assert_impl_all!(AdapterError: Clone, Debug, Send, Sync, std::error::Error);
    assert_obj_safe!(ChatAdapter);

    #[test]
    fn permissions_are_bitwise_composable() {
        let p = Permissions::CONNECT | Permissions::SPEAK;
        assert!(p.contains(Permissions::CONNECT));
        assert!(p.contains(Permissions::SPEAK));
        assert!(!p.contains(Permissions::MUTE_MEMBERS));
    }

    #[test]
    fn adapter_error_display_mentions_guild() {
        let guild_id = crate::snowflake::Snowflake::new("1");
        let err = AdapterError::new(AdapterErrorKind::ShardSessionUndefined {
            guild_id: guild_id.clone(),
        });
        assert!(err.to_string().contains(guild_id.as_str()));
    }
}
