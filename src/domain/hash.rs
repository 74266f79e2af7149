use std::fmt::Display;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::track::TrackIdentity;

/// Identifies one play event.
///
/// Two plays of the same song share a [`TrackIdentity`] but get different play ids.
/// When the station feed carries its own id it is used verbatim,
/// otherwise the id is derived from the identity and the start time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayId(String);

impl PlayId {
    pub fn upstream(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn derive(identity: &TrackIdentity, started_at: DateTime<Utc>) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(identity.as_str().as_bytes());
        hasher.update(&started_at.timestamp_millis().to_be_bytes());
        let hex = hasher.finalize().to_hex();
        Self(hex[..16].to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for PlayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
