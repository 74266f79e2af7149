use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::track::TrackSnapshot;

/// Complete "what is on air right now" record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationState {
    pub current_track: Option<TrackSnapshot>,
    pub station_name: String,
    pub listener_count: u32,
    pub is_live: bool,
    pub last_update: DateTime<Utc>,
}

impl StationState {
    /// Neutral state rendered as "connecting / no data".
    pub fn fallback(station_name: &str, at: DateTime<Utc>) -> Self {
        Self {
            current_track: None,
            station_name: station_name.to_string(),
            listener_count: 0,
            is_live: false,
            last_update: at,
        }
    }

    /// Whether replacing `self` with `other` changes anything observers render.
    pub fn differs_from(&self, other: &StationState) -> bool {
        let track_changed = match (&self.current_track, &other.current_track) {
            (None, None) => false,
            (Some(a), Some(b)) => !a.same_play(b) || a.artwork_url != b.artwork_url,
            _ => true,
        };

        track_changed
            || self.listener_count != other.listener_count
            || self.is_live != other.is_live
            || self.station_name != other.station_name
    }
}
