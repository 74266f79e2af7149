use std::{
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, Instant},
};

use log::{debug, warn};

use crate::{domain::station::StationState, nowplaying::fetcher::Fetcher};

/// Server-side snapshot revalidated on its own schedule, independent of the poll loop.
///
/// Used to render the first view before any client poll has run.
pub struct PrefetchCache {
    fetcher: Arc<Fetcher>,
    ttl: Duration,
    slot: Mutex<Option<(Instant, StationState)>>,
}

impl PrefetchCache {
    pub fn new(fetcher: Arc<Fetcher>, ttl: Duration) -> Self {
        Self {
            fetcher,
            ttl,
            slot: Mutex::new(None),
        }
    }

    /// Cached snapshot if younger than the TTL, otherwise a fresh fetch.
    ///
    /// A failed revalidation serves the last good snapshot, or the fallback when there is none.
    /// Concurrent callers wait on the same revalidation.
    pub fn get(&self) -> StationState {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some((fetched_at, state)) = slot.as_ref() {
            if fetched_at.elapsed() < self.ttl {
                return state.clone();
            }
        }

        match self.fetcher.try_fetch() {
            Ok(state) => {
                debug!("prefetch snapshot revalidated");
                *slot = Some((Instant::now(), state.clone()));
                state
            }
            Err(e) => {
                warn!("prefetch revalidation failed: {}", e);
                match slot.as_ref() {
                    Some((_, state)) => state.clone(),
                    None => self.fetcher.fallback(),
                }
            }
        }
    }
}
