use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc, time::Duration};

use crate::{
    cms::{ArticleQuery, CmsClient},
    config::{self, Config},
    domain::station::StationState,
    http::server::HttpServer,
    nowplaying::{
        NowPlaying, fetcher::Fetcher, policy::RevalidationPolicy, prefetch::PrefetchCache,
        scheduler::Poller,
    },
};

#[derive(Parser)]
#[command(name = "stationdeck")]
#[command(version = "0.1")]
#[command(about = "Now-playing sync and site glue for an internet radio station")]
pub struct Cli {
    /// Path to the config TOML file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Poll the station and serve now-playing, artwork, history and articles over HTTP
    Serve,
    /// Fetch what is playing right now
    Now,
    /// Keep polling and print every change
    Watch,
    /// Resolve cover art for a track
    Artwork {
        #[arg(long)]
        artist: Option<String>,
        #[arg(long)]
        title: Option<String>,
        /// Artwork id or URL reported by the station feed
        #[arg(long)]
        id: Option<String>,
    },
    /// List CMS articles
    Articles {
        #[arg(long, default_value_t = 0)]
        offset: usize,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        tag: Option<String>,
    },
}

/// Entrypoint for CLI
pub fn run() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;
    let policy = RevalidationPolicy::from_config(&cfg.polling);
    let fetcher = Arc::new(Fetcher::from_config(&cfg.station, policy.fetch_timeout));

    match cli.command {
        Commands::Serve => {
            let prefetch = Arc::new(PrefetchCache::new(Arc::clone(&fetcher), policy.prefetch_ttl));
            let initial = prefetch.get();
            let now_playing = Arc::new(NowPlaying::from_config(&cfg, fetcher, Some(initial)));

            let poller = Poller::spawn(Arc::clone(&now_playing)).context("Failed to start poller")?;
            // the server itself is a permanent consumer
            poller.attach();

            let cms = cfg.cms.as_ref().map(|c| CmsClient::new(c, policy.fetch_timeout));
            let http_server = HttpServer::new(now_playing, prefetch, Some(poller), cms, cfg.http);

            println!(
                "HTTP server running at http://{}:{}",
                http_server.config.bind_addr, http_server.config.port
            );
            http_server.run();
        }

        Commands::Now => {
            print_state(&fetcher.fetch_now_playing());
        }

        Commands::Watch => {
            let now_playing = Arc::new(NowPlaying::from_config(&cfg, fetcher, None));
            let updates = now_playing.holder().subscribe();
            let poller = Poller::spawn(Arc::clone(&now_playing)).context("Failed to start poller")?;
            poller.attach();

            for state in updates {
                print_state(&state);
            }
        }

        Commands::Artwork { artist, title, id } => {
            let now_playing = NowPlaying::from_config(&cfg, fetcher, None);
            let url = now_playing.resolver().resolve_artwork(
                id.as_deref(),
                artist.as_deref(),
                title.as_deref(),
            );
            match url {
                Some(url) => println!("{url}"),
                None => println!("No artwork found"),
            }
        }

        Commands::Articles {
            offset,
            limit,
            category,
            tag,
        } => {
            let cms_config: &config::Cms = cfg
                .cms
                .as_ref()
                .context("No [cms] section in config")?;
            let client = CmsClient::new(cms_config, Duration::from_secs(cfg.polling.timeout_secs));
            let page = client.articles(&ArticleQuery {
                offset,
                limit: limit.unwrap_or(client.page_size()),
                category,
                tag,
            })?;

            println!("{} articles in total:", page.total);
            for article in &page.articles {
                let date = article
                    .published_at
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .unwrap_or_else(|| "undated".into());
                println!("  [{}] {} (/{})", date, article.title, article.slug);
            }
        }
    }

    Ok(())
}

fn print_state(state: &StationState) {
    let live = if state.is_live { " LIVE" } else { "" };
    println!(
        "{}{} - {} listeners",
        state.station_name, live, state.listener_count
    );
    match &state.current_track {
        Some(track) => {
            println!("  {} - {}", track.artist, track.title);
            if let Some(album) = &track.album {
                println!("  album: {album}");
            }
            if let Some(url) = &track.artwork_url {
                println!("  artwork: {url}");
            }
        }
        None => println!("  nothing playing"),
    }
}
