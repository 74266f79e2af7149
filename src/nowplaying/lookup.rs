use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::nowplaying::error::SyncError;

/// Query sent to the artwork lookup service.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtworkRequest {
    pub artwork_id: Option<String>,
    pub artist: Option<String>,
    pub title: Option<String>,
}

/// Where the lookup service found the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtworkSource {
    Archive,
    Itunes,
    Lastfm,
    Station,
    #[serde(other)]
    None,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ArtworkLookupResponse {
    pub url: Option<String>,
    pub source: ArtworkSource,
}

/// Secondary art-lookup service keyed by artwork id or artist/title.
pub trait ArtworkLookup: Send + Sync {
    fn lookup(&self, request: &ArtworkRequest) -> Result<ArtworkLookupResponse, SyncError>;
}

pub struct HttpArtworkLookup {
    agent: ureq::Agent,
    url: String,
}

impl HttpArtworkLookup {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            url: url.into(),
        }
    }
}

impl ArtworkLookup for HttpArtworkLookup {
    fn lookup(&self, request: &ArtworkRequest) -> Result<ArtworkLookupResponse, SyncError> {
        let mut call = self.agent.get(&self.url).set("Accept", "application/json");
        if let Some(id) = &request.artwork_id {
            call = call.query("artworkId", id);
        }
        if let Some(artist) = &request.artist {
            call = call.query("artist", artist);
        }
        if let Some(title) = &request.title {
            call = call.query("title", title);
        }

        let response: ArtworkLookupResponse = call.call()?.into_json()?;
        debug!(
            "artwork lookup {:?} -> {:?} from {:?}",
            request,
            response.url,
            response.source
        );
        Ok(response)
    }
}

/// Lookup used when no service is configured: every request resolves to nothing.
pub struct NoLookup;

impl ArtworkLookup for NoLookup {
    fn lookup(&self, _request: &ArtworkRequest) -> Result<ArtworkLookupResponse, SyncError> {
        Ok(ArtworkLookupResponse {
            url: None,
            source: ArtworkSource::None,
        })
    }
}
