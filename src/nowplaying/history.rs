//! Recently played tracks, kept in memory for the lifetime of the process.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Mutex, PoisonError},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    hash::PlayId,
    track::{TrackIdentity, TrackSnapshot},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayRecord {
    pub play_id: PlayId,
    pub identity: TrackIdentity,
    pub artist: String,
    pub title: String,
    pub artwork_url: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl From<&TrackSnapshot> for PlayRecord {
    fn from(track: &TrackSnapshot) -> Self {
        Self {
            play_id: track.play_id.clone(),
            identity: track.identity.clone(),
            artist: track.artist.clone(),
            title: track.title.clone(),
            artwork_url: track.artwork_url.clone(),
            started_at: track.started_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayCount {
    pub artist: String,
    pub title: String,
    pub plays: usize,
    pub last_played: DateTime<Utc>,
}

pub struct PlayHistory {
    capacity: usize,
    plays: Mutex<VecDeque<PlayRecord>>,
}

impl PlayHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            plays: Mutex::new(VecDeque::new()),
        }
    }

    /// Appends a play unless it is the one already at the head.
    pub fn record(&self, track: &TrackSnapshot) {
        let mut plays = self.plays.lock().unwrap_or_else(PoisonError::into_inner);
        if plays.back().is_some_and(|last| last.play_id == track.play_id) {
            return;
        }
        if plays.len() >= self.capacity {
            plays.pop_front();
        }
        plays.push_back(PlayRecord::from(track));
    }

    /// Newest first.
    pub fn recent(&self, limit: usize) -> Vec<PlayRecord> {
        let plays = self.plays.lock().unwrap_or_else(PoisonError::into_inner);
        plays.iter().rev().take(limit).cloned().collect()
    }

    /// Most played songs, ties broken by the most recent play.
    pub fn top(&self, limit: usize) -> Vec<PlayCount> {
        let plays = self.plays.lock().unwrap_or_else(PoisonError::into_inner);

        let mut counts: HashMap<&TrackIdentity, PlayCount> = HashMap::new();
        for play in plays.iter() {
            counts
                .entry(&play.identity)
                .and_modify(|count| {
                    count.plays += 1;
                    count.last_played = count.last_played.max(play.started_at);
                })
                .or_insert_with(|| PlayCount {
                    artist: play.artist.clone(),
                    title: play.title.clone(),
                    plays: 1,
                    last_played: play.started_at,
                });
        }

        let mut counts = counts.into_values().collect::<Vec<_>>();
        counts.sort_by(|a, b| {
            b.plays
                .cmp(&a.plays)
                .then_with(|| b.last_played.cmp(&a.last_played))
        });
        counts.truncate(limit);
        counts
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};

    use super::*;

    fn play(artist: &str, title: &str, minute: i64) -> TrackSnapshot {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap() + Duration::minutes(minute);
        TrackSnapshot::new(artist, title, at)
    }

    #[test]
    fn test_recent_is_newest_first_and_bounded() {
        let history = PlayHistory::new(2);
        history.record(&play("A", "1", 0));
        history.record(&play("B", "2", 5));
        history.record(&play("C", "3", 10));

        let recent = history.recent(10);

        assert_eq!(
            recent.iter().map(|p| p.title.as_str()).collect::<Vec<_>>(),
            vec!["3", "2"]
        );
    }

    #[test]
    fn test_same_play_recorded_once() {
        let history = PlayHistory::new(10);
        let track = play("A", "1", 0);
        history.record(&track);
        history.record(&track);

        assert_eq!(history.recent(10).len(), 1);
    }

    #[test]
    fn test_top_counts_plays_per_song() {
        let history = PlayHistory::new(10);
        history.record(&play("A", "Song", 0));
        history.record(&play("B", "Other", 5));
        history.record(&play("a", "song", 10));
        history.record(&play("C", "Third", 15));

        let top = history.top(2);

        assert_eq!(top.len(), 2);
        assert_eq!(top[0].artist, "A");
        assert_eq!(top[0].plays, 2);
        // one play each, most recent wins the tie
        assert_eq!(top[1].title, "Third");
    }
}
