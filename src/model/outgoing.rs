//! Player ops sent from this crate to a Lavalink node.

use super::Opcode;
use crate::adapter::VoiceServerUpdate;
use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// Any outgoing player op, ready to be serialized as a single JSON text
/// frame and sent over a node's WebSocket.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
#[non_exhaustive]
pub enum OutgoingEvent {
    /// Destroy a player.
    Destroy(Destroy),
    /// Configure a player's equalizer.
    Equalizer(Equalizer),
    /// Configure a player's filter chain.
    Filters(Filters),
    /// Pause or resume a player.
    Pause(Pause),
    /// Play a track.
    Play(Play),
    /// Seek a player's current track.
    Seek(Seek),
    /// Stop a player.
    Stop(Stop),
    /// Provide a voice server update for a player.
    VoiceUpdate(VoiceUpdate),
    /// Set a player's volume.
    Volume(Volume),
}

/// Destroy a player from a node.
///
/// Lavalink will stop the track and remove the player. Sent in response to
/// [`Player::destroy`].
///
/// [`Player::destroy`]: crate::player::Player::destroy
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Destroy {
    /// Opcode of the event.
    pub op: Opcode,
    /// Guild ID of the player.
    pub guild_id: Snowflake,
}

impl From<Snowflake> for Destroy {
    fn from(guild_id: Snowflake) -> Self {
        Self { op: Opcode::Destroy, guild_id }
    }
}

impl From<Destroy> for OutgoingEvent {
    fn from(event: Destroy) -> Self {
        Self::Destroy(event)
    }
}

/// A single equalizer band configuration.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct EqualizerBand {
    /// Band, between 0 and 14 inclusive.
    pub band: i64,
    /// Gain, between -0.25 and 1.0 inclusive.
    pub gain: f64,
}

impl From<(i64, f64)> for EqualizerBand {
    fn from((band, gain): (i64, f64)) -> Self {
        Self { band, gain }
    }
}

/// Configure a player's equalizer.
///
/// Send an empty list of bands to reset the equalizer.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Equalizer {
    /// Equalizer bands.
    pub bands: Vec<EqualizerBand>,
    /// Opcode of the event.
    pub op: Opcode,
    /// Guild ID of the player.
    pub guild_id: Snowflake,
}

impl From<(Snowflake, Vec<EqualizerBand>)> for Equalizer {
    fn from((guild_id, bands): (Snowflake, Vec<EqualizerBand>)) -> Self {
        Self { bands, op: Opcode::Equalizer, guild_id }
    }
}

impl From<Equalizer> for OutgoingEvent {
    fn from(event: Equalizer) -> Self {
        Self::Equalizer(event)
    }
}

/// Configure a player's filter chain.
///
/// `{}` clears every configured filter. Fields are kept as raw JSON since
/// the filter schema (timescale, tremolo, karaoke, etc.) is a Lavalink
/// server concern this crate only passes through.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Filters {
    /// Opcode of the event.
    pub op: Opcode,
    /// Guild ID of the player.
    pub guild_id: Snowflake,
    /// Filter configuration, flattened into the payload.
    #[serde(flatten)]
    pub filters: serde_json::Map<String, serde_json::Value>,
}

impl From<(Snowflake, serde_json::Map<String, serde_json::Value>)> for Filters {
    fn from((guild_id, filters): (Snowflake, serde_json::Map<String, serde_json::Value>)) -> Self {
        Self { op: Opcode::Filters, guild_id, filters }
    }
}

impl From<Filters> for OutgoingEvent {
    fn from(event: Filters) -> Self {
        Self::Filters(event)
    }
}

/// Pause or resume a player.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Pause {
    /// Opcode of the event.
    pub op: Opcode,
    /// Guild ID of the player.
    pub guild_id: Snowflake,
    /// Whether the player should be paused.
    pub pause: bool,
}

impl From<(Snowflake, bool)> for Pause {
    fn from((guild_id, pause): (Snowflake, bool)) -> Self {
        Self { op: Opcode::Pause, guild_id, pause }
    }
}

impl From<Pause> for OutgoingEvent {
    fn from(event: Pause) -> Self {
        Self::Pause(event)
    }
}

/// Play a track, optionally replacing any currently-playing track.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Play {
    /// Milliseconds to stop the track at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<u64>,
    /// Guild ID of the player.
    pub guild_id: Snowflake,
    /// Whether the currently playing track, if any, should be kept.
    pub no_replace: bool,
    /// Opcode of the event.
    pub op: Opcode,
    /// Whether to immediately pause the newly-started track.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause: Option<bool>,
    /// Milliseconds to start the track at.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u64>,
    /// Base64-encoded track to play.
    pub track: String,
    /// Volume to play the track at, between 0 and 1000 inclusive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<i64>,
}

impl From<(Snowflake, String)> for Play {
    fn from((guild_id, track): (Snowflake, String)) -> Self {
        Self {
            end_time: None,
            guild_id,
            no_replace: true,
            op: Opcode::Play,
            pause: None,
            start_time: None,
            track,
            volume: None,
        }
    }
}

impl From<Play> for OutgoingEvent {
    fn from(event: Play) -> Self {
        Self::Play(event)
    }
}

/// Seek a player's currently playing track.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Seek {
    /// Opcode of the event.
    pub op: Opcode,
    /// Guild ID of the player.
    pub guild_id: Snowflake,
    /// Position in milliseconds to seek to.
    pub position: i64,
}

impl From<(Snowflake, i64)> for Seek {
    fn from((guild_id, position): (Snowflake, i64)) -> Self {
        Self { op: Opcode::Seek, guild_id, position }
    }
}

impl From<Seek> for OutgoingEvent {
    fn from(event: Seek) -> Self {
        Self::Seek(event)
    }
}

/// Stop a player's currently playing track.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Stop {
    /// Opcode of the event.
    pub op: Opcode,
    /// Guild ID of the player.
    pub guild_id: Snowflake,
}

impl From<Snowflake> for Stop {
    fn from(guild_id: Snowflake) -> Self {
        Self { op: Opcode::Stop, guild_id }
    }
}

impl From<Stop> for OutgoingEvent {
    fn from(event: Stop) -> Self {
        Self::Stop(event)
    }
}

/// Provide a voice server update, received from the chat gateway, to a
/// node so it can establish a voice websocket connection.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct VoiceUpdate {
    /// Opcode of the event.
    pub op: Opcode,
    /// Guild ID of the player.
    pub guild_id: Snowflake,
    /// Session ID for the voice connection.
    pub session_id: String,
    /// Voice server update received from the chat gateway.
    pub event: VoiceServerUpdate,
}

impl From<(Snowflake, String, VoiceServerUpdate)> for VoiceUpdate {
    fn from((guild_id, session_id, event): (Snowflake, String, VoiceServerUpdate)) -> Self {
        Self { op: Opcode::VoiceUpdate, guild_id, session_id, event }
    }
}

impl From<VoiceUpdate> for OutgoingEvent {
    fn from(event: VoiceUpdate) -> Self {
        Self::VoiceUpdate(event)
    }
}

/// Set a player's volume.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct Volume {
    /// Opcode of the event.
    pub op: Opcode,
    /// Guild ID of the player.
    pub guild_id: Snowflake,
    /// Volume, between 0 and 1000 inclusive, where 100 is the default.
    pub volume: i64,
}

impl From<(Snowflake, i64)> for Volume {
    fn from((guild_id, volume): (Snowflake, i64)) -> Self {
        Self { op: Opcode::Volume, guild_id, volume }
    }
}

impl From<Volume> for OutgoingEvent {
    fn from(event: Volume) -> Self {
        Self::Volume(event)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Destroy, Equalizer, EqualizerBand, Filters, Opcode, OutgoingEvent, Pause, Play, Seek, Stop, VoiceUpdate, Volume,
    };
    use static_assertions::{assert_fields, assert_impl_all};
    use std::fmt::Debug;

    assert_impl_all!(OutgoingEvent: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(Destroy: Clone, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(Equalizer: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(EqualizerBand: Clone, Copy, Debug, PartialEq, Send, Sync);
    assert_impl_all!(Filters: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(Pause: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(Play: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(Seek: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(Stop: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);
    assert_impl_all!(VoiceUpdate: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(Volume: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    assert_fields!(Play: guild_id, no_replace, op, track);

    #[test]
    fn play_from_tuple_defaults_no_replace() {
        let play = Play::from((crate::snowflake::Snowflake::new("1"), "track".to_owned()));
        assert!(play.no_replace);
        assert!(play.pause.is_none());
    }

    #[test]
    fn equalizer_band_from_tuple() {
        let band = EqualizerBand::from((3, 0.25));
        assert_eq!(3, band.band);
        assert!((band.gain - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn volume_round_trips_wire_tokens() {
        use serde_test::{assert_tokens, Token};
        let volume = Volume { op: Opcode::Volume, guild_id: crate::snowflake::Snowflake::new("1"), volume: 100 };
        assert_tokens(
            &volume,
            &[
                Token::Struct { name: "Volume", len: 3 },
                Token::Str("op"),
                Token::UnitVariant { name: "Opcode", variant: "volume" },
                Token::Str("guildId"),
                Token::Str("1"),
                Token::Str("volume"),
                Token::I64(100),
                Token::StructEnd,
            ],
        );
    }

    #[test]
    fn stop_round_trips_wire_tokens() {
        use serde_test::{assert_tokens, Token};
        let stop = Stop { op: Opcode::Stop, guild_id: crate::snowflake::Snowflake::new("42") };
        assert_tokens(
            &stop,
            &[
                Token::Struct { name: "Stop", len: 2 },
                Token::Str("op"),
                Token::UnitVariant { name: "Opcode", variant: "stop" },
                Token::Str("guildId"),
                Token::Str("42"),
                Token::StructEnd,
            ],
        );
    }
}
