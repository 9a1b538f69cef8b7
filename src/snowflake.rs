//! Opaque identifier for chat-platform entities (guilds, channels, users).

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};

/// An opaque unique identifier for a guild, channel, or user on the chat
/// platform the embedder's [`ChatAdapter`] talks to.
///
/// The client never parses or interprets the contents of a `Snowflake`; it
/// only uses it as a map key and echoes it back into outgoing Lavalink
/// payloads and [`ChatAdapter`] calls.
///
/// [`ChatAdapter`]: crate::adapter::ChatAdapter
#[derive(Clone, Debug, Default, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
#[serde(transparent)]
pub struct Snowflake(
    /// The raw identifier string, as given by the chat platform.
    pub Box<str>,
);

impl Snowflake {
    /// Create a new snowflake from any string-like value.
    pub fn new(id: impl Into<Box<str>>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for Snowflake {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(&self.0)
    }
}

impl From<String> for Snowflake {
    fn from(id: String) -> Self {
        Self(id.into_boxed_str())
    }
}

impl From<&str> for Snowflake {
    fn from(id: &str) -> Self {
        Self(id.into())
    }
}

impl AsRef<str> for Snowflake {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::Snowflake;
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;
    use std::hash::Hash;

    assert_impl_all!(Snowflake: Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Send, Sync);

    #[test]
    fn display_matches_inner() {
        let id = Snowflake::new("123456789");
        assert_eq!("123456789", id.to_string());
        assert_eq!("123456789", id.as_str());
    }

    #[test]
    fn equality_and_hash_are_by_value() {
        assert_eq!(Snowflake::new("1"), Snowflake::from("1".to_owned()));
    }
}
