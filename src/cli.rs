//! CLI argument definitions using clap derive macros.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;

use crawl_fetcher::{FetchConfig, FetchResult};

/// Default number of fetches in flight.
pub const DEFAULT_CONCURRENCY: u8 = 10;

/// Fetch pages through the crawl worker's pooled HTTP fetcher.
///
/// Each URL is fetched once and reported on its own line with its result kind,
/// status code and body size.
#[derive(Parser, Debug)]
#[command(name = "crawl-fetch")]
#[command(author, version, about)]
pub struct Args {
    /// URLs to fetch (read from stdin when omitted)
    pub urls: Vec<String>,

    /// JSON file with fetch settings (flags below override it)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long)]
    pub quiet: bool,

    /// Maximum concurrent fetches (1-100)
    #[arg(short = 'c', long, default_value_t = DEFAULT_CONCURRENCY, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub concurrency: u8,

    /// Maximum pooled connections per host
    #[arg(long, value_parser = clap::value_parser!(u16).range(1..))]
    pub max_per_host: Option<u16>,

    /// Maximum body size in bytes; larger pages are reported as too_big
    #[arg(long, value_name = "BYTES", value_parser = clap::value_parser!(u64).range(1..))]
    pub max_size: Option<u64>,

    /// Allow https URLs
    #[arg(long)]
    pub include_https: bool,

    /// Report 301/302 responses instead of following them
    #[arg(long)]
    pub no_follow_redirects: bool,

    /// User-Agent request header
    #[arg(long)]
    pub user_agent: Option<String>,

    /// Print one JSON object per URL
    #[arg(long)]
    pub json: bool,
}

impl Args {
    /// Builds the fetch configuration from `--config` and the override flags.
    pub fn fetch_config(&self) -> Result<FetchConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => FetchConfig::default(),
        };

        if let Some(max_per_host) = self.max_per_host {
            config.max_connections_per_host = usize::from(max_per_host);
            config.max_total_connections = config
                .max_total_connections
                .max(config.max_connections_per_host);
        }
        if let Some(max_size) = self.max_size {
            config.max_download_size_bytes = max_size;
        }
        if self.include_https {
            config.include_https = true;
        }
        if self.no_follow_redirects {
            config.follow_redirects = false;
        }
        if let Some(user_agent) = &self.user_agent {
            config.user_agent.clone_from(user_agent);
        }

        config.validate().context("invalid fetch configuration")?;
        Ok(config)
    }
}

fn load_config(path: &Path) -> Result<FetchConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))
}

/// Formats one result line.
pub fn render(url: &str, result: &FetchResult, as_json: bool) -> String {
    if as_json {
        let moved_to = match result {
            FetchResult::Redirect { moved_to, .. } => Some(moved_to.as_str()),
            _ => None,
        };
        json!({
            "url": url,
            "kind": result.kind(),
            "status": result.status_code(),
            "bytes": result.body().map(|body| body.len()),
            "fetched_url": result.fetched_url(),
            "moved_to": moved_to,
        })
        .to_string()
    } else {
        format!("{}\t{}\t{url}\t{result}", result.status_code(), result.kind())
    }
}
