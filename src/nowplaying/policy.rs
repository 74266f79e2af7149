use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::{
    config::Polling,
    domain::{station::StationState, track::TrackSnapshot},
};

/// Timing rules for polling and for deciding when fetched data replaces what is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RevalidationPolicy {
    pub poll_interval: Duration,
    pub fetch_timeout: Duration,
    /// lifetime of the server-side pre-fetched snapshot
    pub prefetch_ttl: Duration,
    /// how long a known track survives failing polls before the fallback is shown
    pub stale_after: Duration,
}

impl Default for RevalidationPolicy {
    fn default() -> Self {
        Self::from_config(&Polling::default())
    }
}

impl RevalidationPolicy {
    pub fn from_config(config: &Polling) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.interval_secs),
            fetch_timeout: Duration::from_secs(config.timeout_secs),
            prefetch_ttl: Duration::from_secs(config.prefetch_ttl_secs),
            stale_after: Duration::from_secs(config.stale_after_secs),
        }
    }

    /// Whether `fetched` describes a different play than `current`.
    pub fn supersedes(current: Option<&TrackSnapshot>, fetched: Option<&TrackSnapshot>) -> bool {
        match (current, fetched) {
            (None, None) => false,
            (Some(current), Some(fetched)) => !current.same_play(fetched),
            _ => true,
        }
    }

    /// Keeps the current snapshot when the fetched one is the same play.
    ///
    /// This preserves the resolved artwork, the original start time and the play id
    /// across polls that carry no new information about the track.
    pub fn reconcile(current: &StationState, fetched: StationState) -> StationState {
        let kept = match (&current.current_track, &fetched.current_track) {
            (Some(known), Some(new)) if known.same_play(new) => Some(known.clone()),
            _ => None,
        };
        match kept {
            Some(track) => StationState {
                current_track: Some(track),
                ..fetched
            },
            None => fetched,
        }
    }

    /// After a failed poll: whether `current` is too old to keep showing.
    ///
    /// Age counts from `last_success`, the last poll that reached the station,
    /// whether or not it changed the state. Without any successful poll yet the
    /// seeded state is kept.
    pub fn is_stale(
        &self,
        current: &StationState,
        last_success: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> bool {
        if current.current_track.is_none() && !current.is_live && current.listener_count == 0 {
            // already neutral, nothing to clear
            return false;
        }
        let Some(last_success) = last_success else {
            return false;
        };
        let age = now.signed_duration_since(last_success);
        age.to_std().is_ok_and(|age| age >= self.stale_after)
    }
}
