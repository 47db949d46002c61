//! Page fetcher abstraction for crawlers consuming the pool.

use std::time::Duration;

use async_trait::async_trait;

use crate::jitter::JitterPolicy;
use crate::Result;

/// How a pooled fetch retries.
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    /// Attempts before giving up.
    pub max_attempts: u32,
    /// How long one attempt waits for an endpoint.
    pub checkout_timeout: Duration,
    /// Timeout of the request made through the endpoint.
    pub request_timeout: Duration,
    /// Pause between attempts.
    pub backoff: JitterPolicy,
    /// Fetch without a proxy when the pool has nothing to offer.
    pub direct_fallback: bool,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            checkout_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            backoff: JitterPolicy::new(2000, 5000),
            direct_fallback: false,
        }
    }
}

/// Trait for fetching the body of a URL.
///
/// All configuration (user-agent, timeouts, retries) is set at construction
/// time; `fetch` is a simple URL-in, body-out interface.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches the body of the given URL.
    async fn fetch(&self, url: &str) -> Result<String>;
}
