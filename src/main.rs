use crate::cli::run;

pub mod cli;
pub mod cms;
mod config;
pub mod domain;
pub mod http;
pub mod nowplaying;

fn main() -> anyhow::Result<()> {
    run()
}
