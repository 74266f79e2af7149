use anyhow::Context;
use serde::Deserialize;
use std::{path::Path, time::Duration};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub version: u32,
    pub station: Station,
    #[serde(default)]
    pub polling: Polling,
    #[serde(default)]
    pub artwork: Artwork,
    pub cms: Option<Cms>,
    #[serde(default)]
    pub history: History,
    pub http: HttpConfig,
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.to_string_lossy()))?;
        toml::from_str(&contents).with_context(|| "Failed to parse config TOML")
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Station {
    /// endpoint returning the now-playing JSON
    pub metadata_url: String,
    /// used when the feed does not name the station
    pub name: String,
    pub user_agent: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Polling {
    pub interval_secs: u64,
    pub timeout_secs: u64,
    pub prefetch_ttl_secs: u64,
    pub stale_after_secs: u64,
}

impl Default for Polling {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            timeout_secs: 5,
            prefetch_ttl_secs: 60,
            stale_after_secs: 90,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Artwork {
    pub lookup_url: Option<String>,
    /// e.g. `https://img.example.com/covers/{id}.jpg`
    pub id_url_template: Option<String>,
    pub capacity: usize,
    pub ttl_secs: Option<u64>,
    pub debounce_ms: u64,
}

impl Default for Artwork {
    fn default() -> Self {
        Self {
            lookup_url: None,
            id_url_template: None,
            capacity: 512,
            ttl_secs: None,
            debounce_ms: 100,
        }
    }
}

impl Artwork {
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Cms {
    pub query_url: String,
    pub token: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
}

fn default_page_size() -> usize {
    10
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct History {
    pub capacity: usize,
}

impl Default for History {
    fn default() -> Self {
        Self { capacity: 200 }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpConfig {
    pub bind_addr: String,
    pub port: u16,
}
