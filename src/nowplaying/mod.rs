//! Now-playing synchronization: polls the station feed, keeps the live state,
//! and resolves cover art for new tracks.

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{info, warn};

use crate::{
    config::Config,
    domain::{
        station::StationState,
        track::{TrackSnapshot, UNKNOWN_ARTIST, UNKNOWN_TITLE},
    },
    nowplaying::{
        artwork::ArtworkResolver,
        error::SyncError,
        fetcher::Fetcher,
        history::PlayHistory,
        lookup::{ArtworkLookup, HttpArtworkLookup, NoLookup},
        policy::RevalidationPolicy,
        state::{ApplyOutcome, PollTicket, StateHolder},
    },
};

pub mod artwork;
pub mod error;
pub mod fetcher;
pub mod history;
pub mod lookup;
mod normalize;
pub mod policy;
pub mod prefetch;
pub mod scheduler;
pub mod state;

/// The synchronizer: fetcher → state holder → artwork resolver → observers.
pub struct NowPlaying {
    fetcher: Arc<Fetcher>,
    holder: StateHolder,
    resolver: ArtworkResolver,
    history: PlayHistory,
    policy: RevalidationPolicy,
    /// when a poll last reached the station, changed state or not
    last_success: Mutex<Option<DateTime<Utc>>>,
}

impl NowPlaying {
    pub fn new(
        fetcher: Arc<Fetcher>,
        resolver: ArtworkResolver,
        history: PlayHistory,
        policy: RevalidationPolicy,
        initial: Option<StationState>,
    ) -> Self {
        let holder = StateHolder::with_initial(initial, fetcher.fallback());
        if let Some(track) = &holder.get_state().current_track {
            history.record(track);
        }
        Self {
            fetcher,
            holder,
            resolver,
            history,
            policy,
            last_success: Mutex::new(None),
        }
    }

    /// Wires the HTTP-backed fetcher and artwork lookup described by `config`.
    pub fn from_config(config: &Config, fetcher: Arc<Fetcher>, initial: Option<StationState>) -> Self {
        let policy = RevalidationPolicy::from_config(&config.polling);
        Self::new(
            fetcher,
            artwork_resolver(config, policy.fetch_timeout),
            PlayHistory::new(config.history.capacity),
            policy,
            initial,
        )
    }

    pub fn state(&self) -> Arc<StationState> {
        self.holder.get_state()
    }

    pub fn holder(&self) -> &StateHolder {
        &self.holder
    }

    pub fn resolver(&self) -> &ArtworkResolver {
        &self.resolver
    }

    pub fn history(&self) -> &PlayHistory {
        &self.history
    }

    pub fn policy(&self) -> &RevalidationPolicy {
        &self.policy
    }

    /// One poll: fetch within the timeout, then apply or degrade.
    pub fn poll_once(&self) -> ApplyOutcome {
        let ticket = self.holder.issue_ticket();
        match self.fetcher.try_fetch_within(self.policy.fetch_timeout) {
            Ok(fetched) => {
                self.mark_success(fetched.last_update);
                self.apply_fetched(ticket, fetched)
            }
            Err(e) => self.apply_failure(ticket, e),
        }
    }

    pub fn apply_fetched(&self, ticket: PollTicket, fetched: StationState) -> ApplyOutcome {
        if self.holder.is_superseded(ticket) {
            return ApplyOutcome::Stale;
        }

        let current = self.holder.get_state();
        let mut merged = RevalidationPolicy::reconcile(&current, fetched);
        let new_play =
            RevalidationPolicy::supersedes(current.current_track.as_ref(), merged.current_track.as_ref());

        let resolved = merged
            .current_track
            .as_ref()
            .filter(|track| new_play || track.artwork_url.is_none())
            .map(|track| self.with_artwork(track));
        if resolved.is_some() {
            merged.current_track = resolved;
        }

        let outcome = self.holder.apply_polled(ticket, merged);
        if outcome == ApplyOutcome::Replaced {
            match &self.holder.get_state().current_track {
                Some(track) if new_play => {
                    info!("now playing: {} - {}", track.artist, track.title);
                    self.history.record(track);
                }
                None if new_play => info!("nothing playing"),
                _ => {}
            }
        }
        outcome
    }

    /// Keeps what is shown unless it has outlived the staleness window.
    pub fn apply_failure(&self, ticket: PollTicket, err: SyncError) -> ApplyOutcome {
        warn!("poll {:?} failed: {}", ticket, err);
        let current = self.holder.get_state();
        if self.policy.is_stale(&current, self.last_success(), Utc::now()) {
            warn!("now playing data is stale, showing fallback");
            self.holder.apply_polled(ticket, self.fetcher.fallback())
        } else {
            ApplyOutcome::Unchanged
        }
    }

    fn last_success(&self) -> Option<DateTime<Utc>> {
        *self.last_success.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mark_success(&self, at: DateTime<Utc>) {
        let mut last = self.last_success.lock().unwrap_or_else(PoisonError::into_inner);
        if last.is_none_or(|last| at > last) {
            *last = Some(at);
        }
    }

    fn with_artwork(&self, track: &TrackSnapshot) -> TrackSnapshot {
        let artist = Some(track.artist.as_str()).filter(|a| *a != UNKNOWN_ARTIST);
        let title = Some(track.title.as_str()).filter(|t| *t != UNKNOWN_TITLE);
        let url = self
            .resolver
            .resolve_artwork(track.artwork_ref.as_deref(), artist, title);
        track.with_artwork(url)
    }
}

fn artwork_resolver(config: &Config, timeout: Duration) -> ArtworkResolver {
    let lookup: Box<dyn ArtworkLookup> = match &config.artwork.lookup_url {
        Some(url) => Box::new(HttpArtworkLookup::new(url.clone(), timeout)),
        None => Box::new(NoLookup),
    };
    ArtworkResolver::from_config(lookup, &config.artwork)
}
