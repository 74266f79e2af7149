use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rouille::{Request, Response};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Duration};

use crate::{
    cms::{ArticleQuery, CmsClient, CmsError},
    config::HttpConfig,
    http::error::ApiError,
    nowplaying::{NowPlaying, prefetch::PrefetchCache, scheduler::Poller},
};

const DEFAULT_WAIT_SECS: u64 = 25;
const MAX_WAIT_SECS: u64 = 60;
const DEFAULT_HISTORY_LIMIT: usize = 20;

pub struct HttpServer {
    now_playing: Arc<NowPlaying>,
    prefetch: Arc<PrefetchCache>,
    poller: Option<Poller>,
    cms: Option<CmsClient>,
    pub config: HttpConfig,
}

impl HttpServer {
    pub fn new(
        now_playing: Arc<NowPlaying>,
        prefetch: Arc<PrefetchCache>,
        poller: Option<Poller>,
        cms: Option<CmsClient>,
        config: HttpConfig,
    ) -> Self {
        Self {
            now_playing,
            prefetch,
            poller,
            cms,
            config,
        }
    }

    pub fn run(self) {
        let addr = format!("{}:{}", self.config.bind_addr, self.config.port);
        rouille::start_server(addr, move |request| self.handle_request(request));
    }

    fn handle_request(&self, request: &Request) -> Response {
        Self::log_request(request);

        let response = rouille::router!(request,
            (GET) (/nowplaying) => {
                Response::json(&*self.now_playing.state())
            },
            (GET) (/nowplaying/snapshot) => {
                Response::json(&self.prefetch.get())
            },
            (GET) (/nowplaying/wait) => {
                self.handle_wait(request)
            },
            (POST) (/nowplaying/attach) => {
                self.with_poller(Poller::attach)
            },
            (POST) (/nowplaying/detach) => {
                self.with_poller(Poller::detach)
            },
            (POST) (/nowplaying/refresh) => {
                self.with_poller(Poller::refresh)
            },
            (GET) (/artwork) => {
                Self::respond(self.handle_artwork(request))
            },
            (GET) (/artwork/stats) => {
                Response::json(&self.now_playing.resolver().stats())
            },
            (GET) (/history) => {
                Self::respond(self.handle_history(request))
            },
            (GET) (/history/top) => {
                Self::respond(self.handle_top(request))
            },
            (GET) (/articles) => {
                Self::respond(self.handle_articles(request))
            },
            _ => Response::empty_404()
        );

        info!("Response: {} {}", request.method(), response.status_code);
        response
    }

    fn log_request(request: &Request) {
        info!("{} {}", request.method(), request.url());
    }

    fn respond(result: Result<Response, ApiError>) -> Response {
        match result {
            Ok(r) => r,
            Err(e) => e.into_response(),
        }
    }

    /// Long poll: answers once the state is newer than `since`, or when `timeout` runs out.
    ///
    /// The waiting client counts as an attached consumer for the duration of the request.
    /// Malformed parameters fall back to their defaults so the widget always gets a state.
    fn handle_wait(&self, request: &Request) -> Response {
        let since = request.get_param("since").and_then(|raw| {
            match DateTime::parse_from_rfc3339(&raw) {
                Ok(since) => Some(since.with_timezone(&Utc)),
                Err(_) => {
                    warn!("ignoring malformed since timestamp: {raw}");
                    None
                }
            }
        });
        let timeout = Duration::from_secs(
            u64_param(request, "timeout", DEFAULT_WAIT_SECS)
                .unwrap_or(DEFAULT_WAIT_SECS)
                .min(MAX_WAIT_SECS),
        );

        let updates = self.now_playing.holder().subscribe();
        let current = self.now_playing.state();
        if since.is_none_or(|since| current.last_update > since) {
            return Response::json(&*current);
        }

        if let Some(poller) = &self.poller {
            poller.attach();
        }
        let state = updates.recv_timeout(timeout).unwrap_or(current);
        if let Some(poller) = &self.poller {
            poller.detach();
        }

        Response::json(&*state)
    }

    /// Without a running poller there is nothing to drive, the call is a no-op.
    fn with_poller(&self, action: fn(&Poller)) -> Response {
        match &self.poller {
            Some(poller) => action(poller),
            None => debug!("no poller running, ignoring consumer signal"),
        }
        Response::empty_204()
    }

    fn handle_artwork(&self, request: &Request) -> Result<Response, ApiError> {
        let id = request.get_param("id");
        let artist = request.get_param("artist");
        let title = request.get_param("title");
        if id.is_none() && (artist.is_none() || title.is_none()) {
            return Err(ApiError::BadRequest(
                "expected id, or artist and title".into(),
            ));
        }

        let url = self.now_playing.resolver().resolve_artwork(
            id.as_deref(),
            artist.as_deref(),
            title.as_deref(),
        );
        Ok(Response::json(&ArtworkResponse { url }))
    }

    fn handle_history(&self, request: &Request) -> Result<Response, ApiError> {
        let limit = usize_param(request, "limit", DEFAULT_HISTORY_LIMIT)?;
        Ok(Response::json(&self.now_playing.history().recent(limit)))
    }

    fn handle_top(&self, request: &Request) -> Result<Response, ApiError> {
        let limit = usize_param(request, "limit", DEFAULT_HISTORY_LIMIT)?;
        Ok(Response::json(&self.now_playing.history().top(limit)))
    }

    fn handle_articles(&self, request: &Request) -> Result<Response, ApiError> {
        let cms = self.cms.as_ref().ok_or(CmsError::Disabled)?;
        let query = ArticleQuery {
            offset: usize_param(request, "offset", 0)?,
            limit: usize_param(request, "limit", cms.page_size())?,
            category: request.get_param("category"),
            tag: request.get_param("tag"),
        };
        Ok(Response::json(&cms.articles(&query)?))
    }
}

fn u64_param(request: &Request, name: &str, default: u64) -> Result<u64, ApiError> {
    match request.get_param(name) {
        None => Ok(default),
        Some(raw) => raw
            .parse()
            .map_err(|_| ApiError::BadRequest(format!("{name} must be a non-negative integer"))),
    }
}

fn usize_param(request: &Request, name: &str, default: usize) -> Result<usize, ApiError> {
    u64_param(request, name, default as u64).map(|v| v as usize)
}

#[derive(Serialize, Deserialize)]
struct ArtworkResponse {
    url: Option<String>,
}

#[cfg(test)]
pub fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: rouille::Response,
) -> anyhow::Result<T> {
    Ok(serde_json::from_reader(
        response.data.into_reader_and_size().0,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::HttpConfig,
        domain::station::StationState,
        nowplaying::{
            fetcher::{Fetcher, tests::ScriptedSource},
            history::{PlayCount, PlayRecord},
            tests::now_playing,
        },
    };

    use rouille::Request;
    use serde_json::json;
    use std::io::Read;

    pub fn parse_text_response(response: rouille::Response) -> String {
        let mut buf = String::new();
        let mut reader = response.data.into_reader_and_size().0;
        let _ = reader.read_to_string(&mut buf);
        buf
    }

    fn create_server(poll_payload: serde_json::Value) -> HttpServer {
        let (now_playing, _) = now_playing(vec![(Duration::ZERO, Ok(poll_payload.clone()))], None);
        let prefetch_fetcher = Fetcher::new(
            Box::new(ScriptedSource::new(vec![(Duration::ZERO, Ok(poll_payload))])),
            "Example FM",
        );

        HttpServer {
            now_playing: Arc::new(now_playing),
            prefetch: Arc::new(PrefetchCache::new(
                Arc::new(prefetch_fetcher),
                Duration::from_secs(60),
            )),
            poller: None,
            cms: None,
            config: HttpConfig {
                bind_addr: "0.0.0.0".to_string(),
                port: 8080,
            },
        }
    }

    fn get(server: &HttpServer, url: &str) -> Response {
        server.handle_request(&Request::fake_http("GET", url, vec![], vec![]))
    }

    fn elephant() -> serde_json::Value {
        json!({
            "artist": "Tame Impala",
            "title": "Elephant",
            "duration": "285",
            "is_live": "true",
            "listeners": 42
        })
    }

    #[test]
    fn test_now_playing_returns_live_state() -> anyhow::Result<()> {
        let server = create_server(elephant());
        server.now_playing.poll_once();

        let response = get(&server, "/nowplaying");

        assert_eq!(response.status_code, 200);
        let body: StationState = parse_json_response(response)?;
        assert!(body.is_live);
        assert_eq!(body.listener_count, 42);
        let track = body.current_track.unwrap();
        assert_eq!(track.duration_seconds, Some(285));
        assert_eq!(track.artwork_url.as_deref(), Some("https://covers/Elephant.jpg"));

        Ok(())
    }

    #[test]
    fn test_now_playing_before_first_poll_is_empty() -> anyhow::Result<()> {
        let server = create_server(elephant());

        let response = get(&server, "/nowplaying");

        assert_eq!(response.status_code, 200);
        let body: StationState = parse_json_response(response)?;
        assert!(body.current_track.is_none());
        assert_eq!(body.station_name, "Example FM");

        Ok(())
    }

    #[test]
    fn test_snapshot_uses_prefetch() -> anyhow::Result<()> {
        let server = create_server(elephant());

        let response = get(&server, "/nowplaying/snapshot");

        assert_eq!(response.status_code, 200);
        let body: StationState = parse_json_response(response)?;
        assert_eq!(body.current_track.map(|t| t.title), Some("Elephant".into()));
        // the prefetch path does not touch the live state
        assert!(server.now_playing.state().current_track.is_none());

        Ok(())
    }

    #[test]
    fn test_wait_answers_immediately_when_newer() -> anyhow::Result<()> {
        let server = create_server(elephant());
        server.now_playing.poll_once();

        let response = get(&server, "/nowplaying/wait?since=2000-01-01T00:00:00Z&timeout=5");

        assert_eq!(response.status_code, 200);
        let body: StationState = parse_json_response(response)?;
        assert!(body.current_track.is_some());

        Ok(())
    }

    #[test]
    fn test_wait_times_out_with_current_state() -> anyhow::Result<()> {
        let server = create_server(elephant());
        server.now_playing.poll_once();
        let since = server.now_playing.state().last_update.to_rfc3339();

        let response = get(
            &server,
            &format!("/nowplaying/wait?since={}&timeout=0", since.replace('+', "%2B")),
        );

        assert_eq!(response.status_code, 200);
        let body: StationState = parse_json_response(response)?;
        assert_eq!(body.last_update.to_rfc3339(), since);

        Ok(())
    }

    #[test]
    fn test_wait_ignores_bad_parameters() -> anyhow::Result<()> {
        let server = create_server(elephant());
        server.now_playing.poll_once();

        let response = get(&server, "/nowplaying/wait?since=yesterday&timeout=soon");

        assert_eq!(response.status_code, 200);
        let body: StationState = parse_json_response(response)?;
        assert!(body.current_track.is_some());

        Ok(())
    }

    #[test]
    fn test_consumer_signals_without_poller_are_noops() {
        let server = create_server(elephant());

        for path in ["/nowplaying/attach", "/nowplaying/detach", "/nowplaying/refresh"] {
            let request = Request::fake_http("POST", path, vec![], vec![]);
            assert_eq!(server.handle_request(&request).status_code, 204);
        }
    }

    #[test]
    fn test_refresh_polls_through_poller() -> anyhow::Result<()> {
        let mut server = create_server(elephant());
        let updates = server.now_playing.holder().subscribe();
        server.poller = Some(Poller::spawn(Arc::clone(&server.now_playing))?);

        let request = Request::fake_http("POST", "/nowplaying/refresh", vec![], vec![]);
        assert_eq!(server.handle_request(&request).status_code, 204);

        let state = updates.recv_timeout(Duration::from_secs(2))?;
        assert_eq!(state.current_track.as_ref().map(|t| t.title.as_str()), Some("Elephant"));

        Ok(())
    }

    #[test]
    fn test_artwork_lookup() -> anyhow::Result<()> {
        let server = create_server(elephant());

        let response = get(&server, "/artwork?artist=Khruangbin&title=Maria");

        assert_eq!(response.status_code, 200);
        let body: ArtworkResponse = parse_json_response(response)?;
        assert_eq!(body.url.as_deref(), Some("https://covers/Maria.jpg"));

        let stats: serde_json::Value = parse_json_response(get(&server, "/artwork/stats"))?;
        assert_eq!(stats["misses"], 1);
        assert_eq!(stats["entries"], 1);

        Ok(())
    }

    #[test]
    fn test_artwork_requires_key() {
        let server = create_server(elephant());

        let response = get(&server, "/artwork?artist=Khruangbin");

        assert_eq!(response.status_code, 400);
    }

    #[test]
    fn test_history_lists_recent_and_top() -> anyhow::Result<()> {
        let server = create_server(elephant());
        server.now_playing.poll_once();

        let recent: Vec<PlayRecord> = parse_json_response(get(&server, "/history?limit=5"))?;
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].title, "Elephant");

        let top: Vec<PlayCount> = parse_json_response(get(&server, "/history/top"))?;
        assert_eq!(top[0].plays, 1);

        Ok(())
    }

    #[test]
    fn test_history_rejects_bad_limit() {
        let server = create_server(elephant());

        let response = get(&server, "/history?limit=-1");

        assert_eq!(response.status_code, 400);
    }

    #[test]
    fn test_articles_without_cms_is_unavailable() {
        let server = create_server(elephant());

        let response = get(&server, "/articles");

        assert_eq!(response.status_code, 503);
        assert!(parse_text_response(response).contains("not configured"));
    }

    #[test]
    fn test_unknown_route() {
        let server = create_server(elephant());

        assert_eq!(get(&server, "/tracks/123").status_code, 404);
    }
}
