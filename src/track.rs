//! Resolved and unresolved media descriptors.

use crate::snowflake::Snowflake;
use serde::{Deserialize, Serialize};

/// A track resolved against a Lavalink node: it carries the base64-encoded
/// payload the server needs to play it, plus the metadata Lavalink
/// extracted from the source.
///
/// The `encoded` field is opaque to this crate; it is never decoded here
/// (decoding audio is explicitly out of scope).
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct Track {
    /// Base64-encoded track, as returned by `/loadtracks` or
    /// `/decodetrack(s)`.
    pub encoded: String,
    /// Track identifier assigned by its source (e.g. a YouTube video id).
    pub identifier: String,
    /// Track author, if known.
    pub author: Option<String>,
    /// Track length in milliseconds.
    pub length_ms: u64,
    /// Whether the track is a live stream with no known end.
    pub is_stream: bool,
    /// Current playback position in milliseconds, as last reported.
    pub position_ms: u64,
    /// Track title.
    pub title: Option<String>,
    /// Source URI, if the source exposes one.
    pub uri: Option<String>,
    /// Name of the source that produced the track (e.g. `"youtube"`).
    pub source_name: Option<String>,
    /// Id of the user who queued this track, if the caller supplied one.
    pub requester: Option<Snowflake>,
}

impl Track {
    /// Build a track from Lavalink REST `TrackInfo` plus the accompanying
    /// encoded payload and an optional requester id.
    pub(crate) fn from_info(
        encoded: String,
        info: crate::model::incoming::TrackInfo,
        requester: Option<Snowflake>,
    ) -> Self {
        Self {
            encoded,
            identifier: info.identifier,
            author: info.author,
            length_ms: info.length,
            is_stream: info.is_stream,
            position_ms: info.position,
            title: info.title,
            uri: info.uri,
            source_name: info.source_name,
            requester,
        }
    }
}

/// A queued track that has not yet been resolved to a concrete [`Track`].
///
/// `TrackPartial`s are created by callers who only know a title (and
/// perhaps an author or expected length) and want the queue to resolve
/// the best match lazily, right before playback, via [`Manager::search`].
///
/// [`Manager::search`]: crate::manager::Manager::search
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[non_exhaustive]
pub struct TrackPartial {
    /// Title to search for.
    pub title: String,
    /// Id of the user who queued this track.
    pub requester: Option<Snowflake>,
    /// Author to prefer among search results, if known.
    pub author: Option<String>,
    /// Expected track length in milliseconds, used as a secondary
    /// preference signal when no author is given.
    pub length_ms: Option<u64>,
}

/// Either a resolved [`Track`] or an unresolved [`TrackPartial`] sitting in
/// a player's queue.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueueItem {
    /// A fully resolved track, ready to be played as-is.
    Track(Track),
    /// A track description awaiting resolution.
    Partial(TrackPartial),
}

impl QueueItem {
    /// The item's requester, regardless of resolution state.
    pub fn requester(&self) -> Option<&Snowflake> {
        match self {
            Self::Track(t) => t.requester.as_ref(),
            Self::Partial(p) => p.requester.as_ref(),
        }
    }

    /// The resolved track, if this item is already resolved.
    pub fn as_track(&self) -> Option<&Track> {
        match self {
            Self::Track(t) => Some(t),
            Self::Partial(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{QueueItem, Track, TrackPartial};
    use static_assertions::assert_impl_all;
    use std::fmt::Debug;

    assert_impl_all!(Track: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(TrackPartial: Clone, Debug, PartialEq, Send, Sync);
    assert_impl_all!(QueueItem: Clone, Debug, PartialEq, Send, Sync);

    #[test]
    fn queue_item_requester_reads_through_either_variant() {
        let requester = crate::snowflake::Snowflake::new("1");
        let partial = QueueItem::Partial(TrackPartial {
            title: "song".into(),
            requester: Some(requester.clone()),
            author: None,
            length_ms: None,
        });
        assert_eq!(Some(&requester), partial.requester());
        assert!(partial.as_track().is_none());
    }
}
