//! Maps the station feed's loosely typed JSON onto [`StationState`].
//!
//! The feed is inconsistent: numbers may arrive as strings, the live flag as
//! `"true"`, and several fields go by more than one name. Everything here is a
//! pure function of the payload and the fetch time.

use chrono::{DateTime, TimeZone, Utc};
use serde_json::{Map, Value};

use crate::{
    domain::{
        hash::PlayId,
        station::StationState,
        track::{TrackIdentity, TrackSnapshot, UNKNOWN_ARTIST, UNKNOWN_TITLE},
    },
    nowplaying::error::SyncError,
};

const ARTIST: &[&str] = &["artist", "artist_name"];
const TITLE: &[&str] = &["title", "song"];
const ALBUM: &[&str] = &["album"];
const COVER: &[&str] = &["cover", "cover_url", "artwork"];
const DURATION: &[&str] = &["duration", "duration_seconds"];
const GENRE: &[&str] = &["genre"];
const YEAR: &[&str] = &["year"];
const STATION_NAME: &[&str] = &["station_name", "station"];
const LISTENERS: &[&str] = &["listeners", "listener_count"];
const IS_LIVE: &[&str] = &["is_live", "live"];
const STARTED_AT: &[&str] = &["started_at", "start_time"];
const PLAY_ID: &[&str] = &["id", "play_id"];

/// epoch values above this are milliseconds
const MILLIS_THRESHOLD: i64 = 100_000_000_000;

pub fn normalize_payload(
    raw: &Value,
    fallback_name: &str,
    fetched_at: DateTime<Utc>,
) -> Result<StationState, SyncError> {
    let obj = raw
        .as_object()
        .ok_or_else(|| SyncError::Parse(format!("expected a JSON object, got {}", kind(raw))))?;

    let station_name = field(obj, STATION_NAME)
        .and_then(text)
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| fallback_name.to_string());

    Ok(StationState {
        current_track: track(obj, fetched_at),
        station_name,
        listener_count: field(obj, LISTENERS).map(listeners).unwrap_or(0),
        is_live: field(obj, IS_LIVE).and_then(flag).unwrap_or(false),
        last_update: fetched_at,
    })
}

fn track(obj: &Map<String, Value>, fetched_at: DateTime<Utc>) -> Option<TrackSnapshot> {
    // both fields must be present; blank values fall back to sentinels
    let artist = field(obj, ARTIST).and_then(text)?;
    let title = field(obj, TITLE).and_then(text)?;
    let artist = non_blank(artist).unwrap_or_else(|| UNKNOWN_ARTIST.to_string());
    let title = non_blank(title).unwrap_or_else(|| UNKNOWN_TITLE.to_string());

    let reported_start = field(obj, STARTED_AT).and_then(timestamp);
    let started_at = reported_start.unwrap_or(fetched_at);
    let identity = TrackIdentity::new(&artist, &title);
    let play_id = field(obj, PLAY_ID)
        .and_then(text)
        .and_then(non_blank)
        .map(PlayId::upstream)
        .unwrap_or_else(|| PlayId::derive(&identity, started_at));

    Some(TrackSnapshot {
        identity,
        play_id,
        title,
        artist,
        album: field(obj, ALBUM).and_then(text).and_then(non_blank),
        started_at,
        start_reported: reported_start.is_some(),
        duration_seconds: field(obj, DURATION).and_then(duration),
        genre: field(obj, GENRE).and_then(text).and_then(non_blank),
        year: field(obj, YEAR).and_then(year),
        artwork_ref: field(obj, COVER).and_then(text).and_then(non_blank),
        artwork_url: None,
    })
}

/// first alias that is present and not null
fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|name| obj.get(*name))
        .find(|v| !v.is_null())
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank(value: String) -> Option<String> {
    if value.is_empty() { None } else { Some(value) }
}

fn number(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

fn duration(value: &Value) -> Option<u32> {
    if let Value::String(s) = value {
        if let Some((minutes, seconds)) = s.trim().split_once(':') {
            let minutes = minutes.parse::<u32>().ok()?;
            let seconds = seconds.parse::<u32>().ok().filter(|s| *s < 60)?;
            return minutes.checked_mul(60)?.checked_add(seconds);
        }
    }
    number(value)
        .filter(|n| *n >= 0.0 && *n <= u32::MAX as f64)
        .map(|n| n.round() as u32)
}

fn year(value: &Value) -> Option<i32> {
    let parsed = match value {
        // "1999-04-01" and "1999" both carry the year up front
        Value::String(s) => s.trim().get(..4).and_then(|y| y.parse::<i32>().ok()),
        _ => number(value).map(|n| n as i32),
    };
    parsed.filter(|y| *y > 0)
}

fn listeners(value: &Value) -> u32 {
    let value = match value {
        Value::Object(obj) => match field(obj, &["current", "total"]) {
            Some(v) => v,
            None => return 0,
        },
        other => other,
    };
    number(value)
        .filter(|n| *n > 0.0)
        .map(|n| n.min(u32::MAX as f64) as u32)
        .unwrap_or(0)
}

fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" | "" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn timestamp(value: &Value) -> Option<DateTime<Utc>> {
    if let Value::String(s) = value {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(s.trim()) {
            return Some(parsed.with_timezone(&Utc));
        }
    }
    let raw = number(value)? as i64;
    if raw <= 0 {
        return None;
    }
    if raw > MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(raw).single()
    } else {
        Utc.timestamp_opt(raw, 0).single()
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
