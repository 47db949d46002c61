//! # a3s-proxy-pool
//!
//! A self-maintaining pool of outbound proxy endpoints shared by many
//! concurrent crawlers.
//!
//! The pool provides:
//!
//! - Candidate scraping from free proxy directory pages
//! - Bounded-concurrency liveness probing
//! - A FIFO checkout/report protocol with deduplicated membership
//! - A background maintenance task that refills below a low-water mark and
//!   periodically revalidates members
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use a3s_proxy_pool::{PoolConfig, ProxyPool};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let pool = ProxyPool::new(PoolConfig::default())?;
//!     pool.start().await?;
//!
//!     let endpoint = pool.checkout(Duration::from_secs(10)).await?;
//!     let client = ProxyPool::create_client(&endpoint, "my-crawler", Duration::from_secs(10))?;
//!     let ok = client.get("https://example.com").send().await.is_ok();
//!     pool.report(endpoint, ok).await;
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

mod error;

pub mod config;
pub mod endpoint;
pub mod fetcher;
pub mod fetcher_http;
pub mod jitter;
pub mod maintenance;
pub mod pool;
pub mod source;
pub mod store;
pub mod validator;

pub use config::PoolConfig;
pub use endpoint::{Endpoint, Scheme};
pub use error::{PoolError, Result};
pub use fetcher::{FetchPolicy, PageFetcher};
pub use fetcher_http::{HttpFetcher, ProxiedFetcher};
pub use jitter::JitterPolicy;
pub use maintenance::{MaintenanceHandle, Maintainer, RefillReport, RevalidationReport};
pub use pool::ProxyPool;
pub use source::{extract_candidates, CandidateSource, HttpSource, SourceTemplate, StaticSource};
pub use store::{PoolStats, PoolStore};
pub use validator::{validate_all, HttpValidator, Validator};
