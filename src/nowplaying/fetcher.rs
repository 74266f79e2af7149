use std::{
    sync::{Arc, mpsc},
    thread,
    time::Duration,
};

use chrono::Utc;
use log::{debug, warn};
use serde_json::Value;

use crate::{
    config,
    domain::station::StationState,
    nowplaying::{error::SyncError, normalize::normalize_payload},
};

const DEFAULT_USER_AGENT: &str = concat!("stationdeck/", env!("CARGO_PKG_VERSION"));

/// Remote endpoint describing what the station is playing.
pub trait MetadataSource: Send + Sync {
    fn fetch_raw(&self) -> Result<Value, SyncError>;
}

pub struct HttpMetadataSource {
    agent: ureq::Agent,
    url: String,
}

impl HttpMetadataSource {
    pub fn new(url: impl Into<String>, timeout: Duration, user_agent: Option<&str>) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(user_agent.unwrap_or(DEFAULT_USER_AGENT))
            .build();
        Self {
            agent,
            url: url.into(),
        }
    }
}

impl MetadataSource for HttpMetadataSource {
    fn fetch_raw(&self) -> Result<Value, SyncError> {
        let response = self
            .agent
            .get(&self.url)
            .set("Accept", "application/json")
            .call()?;
        Ok(response.into_json()?)
    }
}

/// Polls the metadata source and normalizes what it returns.
pub struct Fetcher {
    source: Box<dyn MetadataSource>,
    station_name: String,
}

impl Fetcher {
    pub fn new(source: Box<dyn MetadataSource>, station_name: impl Into<String>) -> Self {
        Self {
            source,
            station_name: station_name.into(),
        }
    }

    pub fn from_config(station: &config::Station, timeout: Duration) -> Self {
        let source = HttpMetadataSource::new(
            station.metadata_url.clone(),
            timeout,
            station.user_agent.as_deref(),
        );
        Self::new(Box::new(source), station.name.clone())
    }

    pub fn try_fetch(&self) -> Result<StationState, SyncError> {
        let raw = self.source.fetch_raw()?;
        let state = normalize_payload(&raw, &self.station_name, Utc::now())?;
        debug!(
            "fetched now playing: {:?}, live: {}, listeners: {}",
            state.current_track.as_ref().map(|t| t.identity.as_str()),
            state.is_live,
            state.listener_count
        );
        Ok(state)
    }

    /// Like [`Fetcher::try_fetch`] but gives up after `timeout`.
    ///
    /// The abandoned request keeps running on its own thread and its result is dropped.
    pub fn try_fetch_within(self: &Arc<Self>, timeout: Duration) -> Result<StationState, SyncError> {
        let (tx, rx) = mpsc::channel();
        let fetcher = Arc::clone(self);
        thread::Builder::new()
            .name("now-playing-fetch".into())
            .spawn(move || {
                // receiver is gone when the caller timed out
                let _ = tx.send(fetcher.try_fetch());
            })
            .map_err(|e| SyncError::Network(format!("could not spawn fetch: {e}")))?;

        rx.recv_timeout(timeout)
            .map_err(|_| SyncError::Timeout(timeout))?
    }

    /// Never fails: errors are logged and turned into the neutral fallback state.
    pub fn fetch_now_playing(&self) -> StationState {
        match self.try_fetch() {
            Ok(state) => state,
            Err(e) => {
                warn!("now playing fetch failed, using fallback: {}", e);
                self.fallback()
            }
        }
    }

    pub fn fallback(&self) -> StationState {
        StationState::fallback(&self.station_name, Utc::now())
    }
}
