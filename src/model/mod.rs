//! The Lavalink v3 wire protocol: outgoing player ops, incoming events and
//! stats, and the REST track DTOs shared by both.

pub mod incoming;
pub mod outgoing;

pub use self::incoming::Event;

use serde::{Deserialize, Serialize};

/// Opcode discriminant shared by every outgoing player op.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Opcode {
    /// [`Destroy`]
    ///
    /// [`Destroy`]: outgoing::Destroy
    Destroy,
    /// [`Equalizer`]
    ///
    /// [`Equalizer`]: outgoing::Equalizer
    Equalizer,
    /// [`Filters`]
    ///
    /// [`Filters`]: outgoing::Filters
    Filters,
    /// [`Pause`]
    ///
    /// [`Pause`]: outgoing::Pause
    Pause,
    /// [`Play`]
    ///
    /// [`Play`]: outgoing::Play
    Play,
    /// [`PlayerUpdate`]
    ///
    /// [`PlayerUpdate`]: incoming::PlayerUpdate
    PlayerUpdate,
    /// [`Seek`]
    ///
    /// [`Seek`]: outgoing::Seek
    Seek,
    /// [`Stats`]
    ///
    /// [`Stats`]: incoming::Stats
    Stats,
    /// [`Stop`]
    ///
    /// [`Stop`]: outgoing::Stop
    Stop,
    /// [`VoiceUpdate`]
    ///
    /// [`VoiceUpdate`]: outgoing::VoiceUpdate
    VoiceUpdate,
    /// [`Volume`]
    ///
    /// [`Volume`]: outgoing::Volume
    Volume,
}

#[cfg(test)]
mod tests {
    use super::Opcode;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Opcode: Clone, Copy, Debug, Eq, PartialEq, Send, Sync);

    #[test]
    fn opcode_serializes_camel_case() {
        let json = serde_json::to_string(&Opcode::PlayerUpdate).unwrap();
        assert_eq!(r#""playerUpdate""#, json);
    }

    #[test]
    fn opcode_round_trips_wire_tokens() {
        use serde_test::{assert_tokens, Token};
        assert_tokens(&Opcode::Stop, &[Token::UnitVariant { name: "Opcode", variant: "stop" }]);
        assert_tokens(&Opcode::VoiceUpdate, &[Token::UnitVariant { name: "Opcode", variant: "voiceUpdate" }]);
    }
}
