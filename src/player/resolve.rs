//! Turning a [`TrackPartial`] into a concrete [`Track`] by searching and
//! picking the best candidate.

use crate::manager::{Manager, ManagerError};
use crate::model::incoming::LoadType;
use crate::track::{Track, TrackPartial};
use regex::Regex;
use std::sync::OnceLock;

/// Error produced when a [`TrackPartial`] cannot be resolved to a
/// concrete [`Track`].
#[derive(Debug)]
#[non_exhaustive]
pub enum ResolveError {
    /// The search returned no usable results.
    NoResults,
    /// The search itself failed.
    Search(ManagerError),
}

impl std::fmt::Display for ResolveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoResults => f.write_str("search returned no usable results"),
            Self::Search(source) => std::fmt::Display::fmt(source, f),
        }
    }
}

impl std::error::Error for ResolveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Search(source) => Some(source),
            Self::NoResults => None,
        }
    }
}

impl From<ManagerError> for ResolveError {
    fn from(source: ManagerError) -> Self {
        Self::Search(source)
    }
}

/// Resolve `partial` against `manager`'s search facade.
///
/// Builds the search query as `"<title> - <author>"` when an author is
/// known, else just `<title>`. Among [`LoadType::SearchResult`] hits,
/// prefers (in order): a track whose author or title matches
/// `^<author>$` or `^<author> - Topic$` case-insensitively; failing that,
/// a track whose length falls within `[expected - 2000, expected + 200]`
/// milliseconds; failing that, the first result.
pub(crate) async fn resolve(partial: &TrackPartial, manager: &Manager) -> Result<Track, ResolveError> {
    let query = match partial.author.as_deref() {
        Some(author) => format!("{} - {author}", partial.title),
        None => partial.title.clone(),
    };

    let loaded = manager.search(&query, None).await?;
    if loaded.load_type != LoadType::SearchResult || loaded.tracks.is_empty() {
        return Err(ResolveError::NoResults);
    }

    let mut candidates: Vec<Track> = loaded
        .tracks
        .into_iter()
        .map(|loaded_track| Track::from_info(loaded_track.track, loaded_track.info, partial.requester.clone()))
        .collect();

    if let Some(author) = partial.author.as_deref() {
        if let Some(pos) = candidates.iter().position(|track| author_matches(track, author)) {
            return Ok(candidates.swap_remove(pos));
        }
    } else if let Some(expected) = partial.length_ms {
        let lower = expected.saturating_sub(2_000);
        let upper = expected.saturating_add(200);
        if let Some(pos) = candidates.iter().position(|track| (lower..=upper).contains(&track.length_ms)) {
            return Ok(candidates.swap_remove(pos));
        }
    }

    Ok(candidates.remove(0))
}

fn author_matches(track: &Track, author: &str) -> bool {
    let Some(pattern) = author_pattern(author) else {
        return false;
    };

    track.author.as_deref().is_some_and(|value| pattern.is_match(value))
        || track.title.as_deref().is_some_and(|value| pattern.is_match(value))
}

fn author_pattern(author: &str) -> Option<Regex> {
    static CACHE: OnceLock<std::sync::Mutex<std::collections::HashMap<String, Regex>>> = OnceLock::new();
    let cache = CACHE.get_or_init(Default::default);

    let mut guard = cache.lock().expect("author pattern cache poisoned");
    if let Some(regex) = guard.get(author) {
        return Some(regex.clone());
    }

    let pattern = format!(r"(?i)^{}( - Topic)?$", regex::escape(author));
    let regex = Regex::new(&pattern).ok()?;
    guard.insert(author.to_owned(), regex.clone());
    Some(regex)
}

#[cfg(test)]
mod tests {
    use super::author_matches;
    use crate::track::Track;

    fn track(author: Option<&str>, title: Option<&str>, length_ms: u64) -> Track {
        Track {
            encoded: "abc".into(),
            identifier: "id".into(),
            author: author.map(str::to_owned),
            length_ms,
            is_stream: false,
            position_ms: 0,
            title: title.map(str::to_owned),
            uri: None,
            source_name: None,
            requester: None,
        }
    }

    #[test]
    fn author_matches_exact_name() {
        let t = track(Some("Rick Astley"), Some("Never Gonna Give You Up"), 212_000);
        assert!(author_matches(&t, "Rick Astley"));
    }

    #[test]
    fn author_matches_topic_channel_suffix() {
        let t = track(Some("Rick Astley - Topic"), Some("Never Gonna Give You Up"), 212_000);
        assert!(author_matches(&t, "Rick Astley"));
    }

    #[test]
    fn author_matches_is_case_insensitive() {
        let t = track(Some("rick astley"), None, 212_000);
        assert!(author_matches(&t, "Rick Astley"));
    }

    #[test]
    fn author_mismatch_does_not_match() {
        let t = track(Some("Someone Else"), Some("A Cover"), 212_000);
        assert!(!author_matches(&t, "Rick Astley"));
    }
}
