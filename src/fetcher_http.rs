//! HTTP page fetchers: direct and through the proxy pool.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::config::DEFAULT_USER_AGENT;
use crate::endpoint::Endpoint;
use crate::fetcher::{FetchPolicy, PageFetcher};
use crate::pool::ProxyPool;
use crate::{PoolError, Result};

async fn get_text(client: &Client, url: &str) -> Result<String> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.text().await?)
}

/// A page fetcher that goes out directly, without any proxy.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Creates an `HttpFetcher` with the given User-Agent and timeout.
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self { client })
    }

    /// Creates an `HttpFetcher` with a custom reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        get_text(&self.client, url).await
    }
}

/// A page fetcher that borrows an endpoint from the pool for every attempt.
///
/// Each attempt checks out an endpoint, fetches through it and reports the
/// outcome: a 2xx body is a success, anything else a failure that evicts the
/// endpoint. Attempts are separated by the policy's backoff.
pub struct ProxiedFetcher {
    pool: Arc<ProxyPool>,
    policy: FetchPolicy,
    user_agent: String,
    direct: Option<HttpFetcher>,
}

impl ProxiedFetcher {
    /// Creates a fetcher over `pool` with the given policy.
    pub fn new(pool: Arc<ProxyPool>, policy: FetchPolicy) -> Result<Self> {
        let direct = if policy.direct_fallback {
            Some(HttpFetcher::new(DEFAULT_USER_AGENT, policy.request_timeout)?)
        } else {
            None
        };
        Ok(Self {
            pool,
            policy,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            direct,
        })
    }

    /// Sets the User-Agent used for proxied requests.
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    async fn fetch_through(&self, endpoint: &Endpoint, url: &str) -> Result<String> {
        let client =
            ProxyPool::create_client(endpoint, &self.user_agent, self.policy.request_timeout)?;
        get_text(&client, url).await
    }

    async fn attempt(&self, url: &str) -> Result<String> {
        match self.pool.checkout(self.policy.checkout_timeout).await {
            Ok(endpoint) => match self.fetch_through(&endpoint, url).await {
                Ok(body) => {
                    self.pool.report(endpoint, true).await;
                    Ok(body)
                }
                Err(e) => {
                    self.pool.report(endpoint, false).await;
                    Err(e)
                }
            },
            Err(e) if e.is_timeout() => match &self.direct {
                Some(direct) => {
                    debug!("No proxy available, fetching {} directly", url);
                    direct.fetch(url).await
                }
                None => Err(e),
            },
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl PageFetcher for ProxiedFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let attempts = self.policy.max_attempts.max(1);
        for attempt in 1..=attempts {
            match self.attempt(url).await {
                Ok(body) => return Ok(body),
                Err(e) => warn!("Fetch failed ({}/{}): {}, error: {}", attempt, attempts, url, e),
            }
            if attempt < attempts {
                self.policy.backoff.sleep().await;
            }
        }
        Err(PoolError::PoolExhausted(attempts))
    }
}
