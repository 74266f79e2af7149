//! Cover art resolution with a bounded, negative-caching, single-flight cache.

use std::{
    collections::HashMap,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread,
    time::{Duration, Instant},
};

use log::{debug, warn};
use serde::Serialize;

use crate::{
    domain::normalize_text,
    nowplaying::lookup::{ArtworkLookup, ArtworkRequest},
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtworkKey {
    Id(String),
    /// normalized `artist-title`
    Composite(String),
}

impl ArtworkKey {
    /// `None` when there is nothing to look up by.
    pub fn for_request(id: Option<&str>, artist: Option<&str>, title: Option<&str>) -> Option<Self> {
        if let Some(id) = id.map(str::trim).filter(|id| !id.is_empty()) {
            return Some(Self::Id(id.to_string()));
        }
        let artist = artist.map(normalize_text).filter(|a| !a.is_empty())?;
        let title = title.map(normalize_text).filter(|t| !t.is_empty())?;
        Some(Self::Composite(format!("{artist}-{title}")))
    }
}

#[derive(Debug, Clone)]
pub struct ArtworkCacheEntry {
    pub key: ArtworkKey,
    /// `None` records that the lookup found nothing
    pub url: Option<String>,
    pub resolved_at: Instant,
    last_used: u64,
}

#[derive(Debug, PartialEq, Eq)]
pub enum CacheLookup {
    Hit(Option<String>),
    Miss,
}

/// LRU map of resolved artwork with an optional time-to-live.
pub struct ArtworkCache {
    entries: HashMap<ArtworkKey, ArtworkCacheEntry>,
    capacity: usize,
    ttl: Option<Duration>,
    tick: u64,
}

impl ArtworkCache {
    pub fn new(capacity: usize, ttl: Option<Duration>) -> Self {
        Self {
            entries: HashMap::new(),
            capacity: capacity.max(1),
            ttl,
            tick: 0,
        }
    }

    pub fn get(&mut self, key: &ArtworkKey) -> CacheLookup {
        self.tick += 1;
        let tick = self.tick;
        let ttl = self.ttl;
        if let Some(entry) = self.entries.get_mut(key) {
            if !ttl.is_some_and(|ttl| entry.resolved_at.elapsed() >= ttl) {
                entry.last_used = tick;
                return CacheLookup::Hit(entry.url.clone());
            }
        } else {
            return CacheLookup::Miss;
        }
        // expired
        self.entries.remove(key);
        CacheLookup::Miss
    }

    pub fn insert(&mut self, key: ArtworkKey, url: Option<String>) {
        self.tick += 1;
        if !self.entries.contains_key(&key) && self.entries.len() >= self.capacity {
            self.evict_least_recent();
        }
        let entry = ArtworkCacheEntry {
            key: key.clone(),
            url,
            resolved_at: Instant::now(),
            last_used: self.tick,
        };
        self.entries.insert(key, entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn evict_least_recent(&mut self) {
        let oldest = self
            .entries
            .values()
            .min_by_key(|entry| entry.last_used)
            .map(|entry| entry.key.clone());
        if let Some(key) = oldest {
            debug!("evicting artwork cache entry {:?}", key);
            self.entries.remove(&key);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// callers that attached to an in-flight lookup instead of starting one
    pub coalesced: u64,
    pub lookup_errors: u64,
    pub entries: usize,
}

enum FlightState {
    Pending,
    Done(Option<String>),
}

struct Flight {
    state: Mutex<FlightState>,
    done: Condvar,
}

impl Flight {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            done: Condvar::new(),
        }
    }

    fn wait(&self) -> Option<String> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            if let FlightState::Done(url) = &*state {
                return url.clone();
            }
            state = self
                .done
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn finish(&self, url: Option<String>) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = FlightState::Done(url);
        self.done.notify_all();
    }
}

struct ResolverState {
    cache: ArtworkCache,
    pending: HashMap<ArtworkKey, Arc<Flight>>,
    stats: CacheStats,
}

enum Role {
    Leader(Arc<Flight>),
    Follower(Arc<Flight>),
}

/// Resolves cover art: feed-supplied reference first, then the lookup service.
///
/// Results, including "nothing found" and lookup failures, are cached per key.
/// Concurrent callers for the same key share one lookup.
pub struct ArtworkResolver {
    lookup: Box<dyn ArtworkLookup>,
    id_url_template: Option<String>,
    debounce: Duration,
    state: Mutex<ResolverState>,
}

impl ArtworkResolver {
    pub fn new(
        lookup: Box<dyn ArtworkLookup>,
        cache: ArtworkCache,
        id_url_template: Option<String>,
        debounce: Duration,
    ) -> Self {
        Self {
            lookup,
            id_url_template,
            debounce,
            state: Mutex::new(ResolverState {
                cache,
                pending: HashMap::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    pub fn from_config(lookup: Box<dyn ArtworkLookup>, config: &crate::config::Artwork) -> Self {
        Self::new(
            lookup,
            ArtworkCache::new(config.capacity, config.ttl()),
            config.id_url_template.clone(),
            config.debounce(),
        )
    }

    pub fn resolve_artwork(
        &self,
        id_or_url: Option<&str>,
        artist: Option<&str>,
        title: Option<&str>,
    ) -> Option<String> {
        let reference = id_or_url.map(str::trim).filter(|r| !r.is_empty());
        if let Some(reference) = reference {
            if is_url(reference) {
                return Some(reference.to_string());
            }
            if let Some(template) = &self.id_url_template {
                return Some(template.replace("{id}", reference));
            }
        }

        let key = ArtworkKey::for_request(reference, artist, title)?;

        let role = {
            let mut state = self.state();
            if let CacheLookup::Hit(url) = state.cache.get(&key) {
                state.stats.hits += 1;
                return url;
            }
            match state.pending.get(&key).cloned() {
                Some(flight) => {
                    state.stats.coalesced += 1;
                    Role::Follower(flight)
                }
                None => {
                    state.stats.misses += 1;
                    let flight = Arc::new(Flight::new());
                    state.pending.insert(key.clone(), Arc::clone(&flight));
                    Role::Leader(flight)
                }
            }
        };

        match role {
            Role::Follower(flight) => flight.wait(),
            Role::Leader(flight) => {
                let mut guard = FlightGuard {
                    resolver: self,
                    key,
                    flight,
                    url: None,
                };
                if !self.debounce.is_zero() {
                    thread::sleep(self.debounce);
                }
                let request = ArtworkRequest {
                    artwork_id: reference.map(str::to_string),
                    artist: artist.map(str::to_string),
                    title: title.map(str::to_string),
                };
                guard.url = self.lookup_once(&request);
                guard.url.clone()
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state();
        CacheStats {
            entries: state.cache.len(),
            ..state.stats
        }
    }

    fn lookup_once(&self, request: &ArtworkRequest) -> Option<String> {
        match self.lookup.lookup(request) {
            Ok(response) => response.url.filter(|url| !url.trim().is_empty()),
            Err(e) => {
                warn!("artwork lookup for {:?} failed, caching as absent: {}", request, e);
                self.state().stats.lookup_errors += 1;
                None
            }
        }
    }

    fn state(&self) -> MutexGuard<'_, ResolverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Publishes the leader's result on drop, so followers wake up even if the lookup panics.
struct FlightGuard<'a> {
    resolver: &'a ArtworkResolver,
    key: ArtworkKey,
    flight: Arc<Flight>,
    url: Option<String>,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        {
            let mut state = self.resolver.state();
            state.cache.insert(self.key.clone(), self.url.clone());
            state.pending.remove(&self.key);
        }
        self.flight.finish(self.url.take());
    }
}

fn is_url(reference: &str) -> bool {
    reference.starts_with("http://") || reference.starts_with("https://")
}
