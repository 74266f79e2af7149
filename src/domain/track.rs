use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{hash::PlayId, normalize_text};

pub const UNKNOWN_TITLE: &str = "Unknown";
pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

/// Dedup key of a song: normalized `artist‖title`.
///
/// Cosmetic differences (case, extra spaces) do not produce a new identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackIdentity(String);

impl TrackIdentity {
    pub fn new(artist: &str, title: &str) -> Self {
        Self(format!(
            "{}\u{2016}{}",
            normalize_text(artist),
            normalize_text(title)
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TrackIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What is playing, as reported by one successful poll.
///
/// Never mutated in place; [`TrackSnapshot::with_artwork`] returns a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackSnapshot {
    pub identity: TrackIdentity,
    pub play_id: PlayId,
    pub title: String,
    pub artist: String,
    pub album: Option<String>,
    pub started_at: DateTime<Utc>,
    /// false when the feed had no start time and `started_at` is the fetch time
    pub start_reported: bool,
    pub duration_seconds: Option<u32>,
    pub genre: Option<String>,
    pub year: Option<i32>,
    /// raw `cover` value from the feed: either a URL or an artwork id
    pub artwork_ref: Option<String>,
    pub artwork_url: Option<String>,
}

impl TrackSnapshot {
    pub fn new(artist: &str, title: &str, started_at: DateTime<Utc>) -> Self {
        let identity = TrackIdentity::new(artist, title);
        let play_id = PlayId::derive(&identity, started_at);
        Self {
            identity,
            play_id,
            title: title.to_string(),
            artist: artist.to_string(),
            album: None,
            started_at,
            start_reported: false,
            duration_seconds: None,
            genre: None,
            year: None,
            artwork_ref: None,
            artwork_url: None,
        }
    }

    pub fn with_artwork(&self, url: Option<String>) -> Self {
        Self {
            artwork_url: url,
            ..self.clone()
        }
    }

    /// Same song and same play event.
    ///
    /// Start times only take part when both sides got them from the feed,
    /// a start time synthesized at fetch time says nothing about the play.
    pub fn same_play(&self, other: &TrackSnapshot) -> bool {
        if self.identity != other.identity {
            return false;
        }
        if self.start_reported && other.start_reported {
            return self.started_at == other.started_at;
        }
        true
    }
}
