//! A3S Proxy Pool CLI - run and inspect a self-maintaining proxy pool.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use a3s_proxy_pool::{
    config::DEFAULT_USER_AGENT, CandidateSource, Endpoint, FetchPolicy, HttpSource,
    HttpValidator, PageFetcher, PoolConfig, ProxiedFetcher, ProxyPool, Validator,
};

/// A3S Proxy Pool - self-maintaining proxy pool CLI
#[derive(Parser)]
#[command(name = "proxy-pool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Maintain a pool and print its stats until interrupted
    Run {
        /// Config file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Seconds between stats lines
        #[arg(short, long, default_value = "30")]
        interval: u64,
    },

    /// Print the candidates one directory page yields
    Scrape {
        /// Directory page URL
        url: String,

        /// Request timeout in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,
    },

    /// Check whether one proxy forwards traffic
    Probe {
        /// Proxy endpoint (e.g., http://1.2.3.4:8080)
        endpoint: String,

        /// Page fetched through the proxy
        #[arg(long, default_value = "https://www.baidu.com")]
        target: String,

        /// Probe timeout in seconds
        #[arg(short, long, default_value = "5")]
        timeout: u64,
    },

    /// Fetch a URL through the pool
    Fetch {
        /// URL to fetch
        url: String,

        /// Config file (TOML or JSON)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Go direct when no proxy is available
        #[arg(long)]
        direct_fallback: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Run { config, interval } => run_pool(load_config(config)?, interval).await,
        Commands::Scrape { url, timeout } => scrape(&url, timeout).await,
        Commands::Probe {
            endpoint,
            target,
            timeout,
        } => probe(&endpoint, target, timeout).await,
        Commands::Fetch {
            url,
            config,
            direct_fallback,
        } => fetch(&url, load_config(config)?, direct_fallback).await,
    }
}

fn load_config(path: Option<PathBuf>) -> Result<PoolConfig> {
    Ok(match path {
        Some(path) => PoolConfig::from_file(path)?,
        None => PoolConfig::default(),
    })
}

async fn run_pool(config: PoolConfig, interval: u64) -> Result<()> {
    let pool = ProxyPool::new(config)?;
    pool.start().await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let stats = pool.stats().await;
                println!("{}", serde_json::to_string(&stats)?);
            }
        }
    }

    pool.shutdown().await;
    Ok(())
}

async fn scrape(url: &str, timeout: u64) -> Result<()> {
    let source = HttpSource::new(Duration::from_secs(timeout), DEFAULT_USER_AGENT)?;
    let candidates = source.fetch_candidates(url).await;
    for candidate in &candidates {
        println!("{}", candidate);
    }
    eprintln!("{} candidates", candidates.len());
    Ok(())
}

async fn probe(endpoint: &str, target: String, timeout: u64) -> Result<()> {
    let endpoint: Endpoint = endpoint.parse()?;
    let validator = HttpValidator::new(target, Duration::from_secs(timeout));
    let live = validator.is_live(&endpoint).await;
    println!("{}\t{}", endpoint, if live { "live" } else { "dead" });
    Ok(())
}

async fn fetch(url: &str, config: PoolConfig, direct_fallback: bool) -> Result<()> {
    let pool = Arc::new(ProxyPool::new(config)?);
    pool.start().await?;

    let policy = FetchPolicy {
        direct_fallback,
        ..Default::default()
    };
    let fetcher = ProxiedFetcher::new(Arc::clone(&pool), policy)?;
    let result = fetcher.fetch(url).await;
    pool.shutdown().await;

    println!("{}", result?);
    Ok(())
}
