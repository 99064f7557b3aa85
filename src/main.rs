//! CLI entry point for crawl-fetch.

use std::io::{self, IsTerminal, Read};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use crawl_fetcher::{FetchClient, FetchRequest};
use tokio::sync::Semaphore;
use tracing::{debug, info};

mod cli;

use cli::Args;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let urls = read_urls(&args.urls)?;
    if urls.is_empty() {
        info!("No URLs provided. Pass them as arguments or pipe them via stdin.");
        return Ok(());
    }

    let config = args.fetch_config()?;
    let client = Arc::new(FetchClient::new(config).context("failed to create fetch client")?);
    let semaphore = Arc::new(Semaphore::new(usize::from(args.concurrency)));

    info!(urls = urls.len(), concurrency = args.concurrency, "crawl-fetch starting");

    let mut handles = Vec::with_capacity(urls.len());
    for url in urls {
        let client = Arc::clone(&client);
        let semaphore = Arc::clone(&semaphore);
        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await?;
            let result = client.fetch(&FetchRequest::new(url.as_str())).await;
            Ok::<_, anyhow::Error>((url, result))
        }));
    }

    // Results are printed in input order.
    let total = handles.len();
    let mut fetched = 0usize;
    for handle in handles {
        let (url, result) = handle.await.context("fetch task panicked")??;
        if result.is_ok() {
            fetched += 1;
        }
        println!("{}", cli::render(&url, &result, args.json));
    }

    let stats = client.pool_stats();
    client.shutdown().await;

    info!(
        fetched,
        total,
        connections_opened = stats.opened,
        "crawl-fetch complete"
    );

    Ok(())
}

/// Returns the URLs from the arguments, or from stdin when none were given.
fn read_urls(from_args: &[String]) -> Result<Vec<String>> {
    let raw = if !from_args.is_empty() {
        from_args.join("\n")
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        String::new()
    };

    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
