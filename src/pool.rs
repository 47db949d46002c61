//! Consumer-facing proxy pool.
//!
//! [`ProxyPool`] bundles a [`PoolStore`] with its maintenance task. Crawlers
//! only ever `checkout` an endpoint, do their work through it, and `report`
//! the outcome. Every successful checkout must be reported; without a
//! configured lease timeout an unreported endpoint is never offered again.

use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::PoolConfig;
use crate::endpoint::Endpoint;
use crate::maintenance::{MaintenanceHandle, Maintainer};
use crate::source::{CandidateSource, HttpSource};
use crate::store::{PoolStats, PoolStore};
use crate::validator::{HttpValidator, Validator};
use crate::{PoolError, Result};

/// A self-maintaining pool of proxy endpoints.
pub struct ProxyPool {
    config: PoolConfig,
    store: Arc<PoolStore>,
    source: Arc<dyn CandidateSource>,
    validator: Arc<dyn Validator>,
    maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl ProxyPool {
    /// Creates a pool that scrapes and probes over HTTP.
    pub fn new(config: PoolConfig) -> Result<Self> {
        config.validate()?;
        let source = HttpSource::new(config.source_timeout(), &config.user_agent)?;
        let validator = HttpValidator::new(config.probe_target.clone(), config.probe_timeout());
        Self::with_components(config, Arc::new(source), Arc::new(validator))
    }

    /// Creates a pool with custom source and validator implementations.
    pub fn with_components(
        config: PoolConfig,
        source: Arc<dyn CandidateSource>,
        validator: Arc<dyn Validator>,
    ) -> Result<Self> {
        config.validate()?;
        let store = PoolStore::new(config.low_water_mark).with_lease_timeout(config.lease_timeout());
        Ok(Self {
            config,
            store: Arc::new(store),
            source,
            validator,
            maintenance: Mutex::new(None),
        })
    }

    /// Starts the maintenance task. Does nothing if it is already running.
    pub async fn start(&self) -> Result<()> {
        let mut maintenance = self.maintenance.lock().await;
        if maintenance.as_ref().is_some_and(|h| !h.is_finished()) {
            return Ok(());
        }

        let maintainer = Maintainer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.source),
            Arc::clone(&self.validator),
            &self.config,
        )?;
        *maintenance = Some(maintainer.spawn());
        info!(
            "Proxy pool started (low-water mark {}, {} sources)",
            self.config.low_water_mark,
            self.config.sources.len()
        );
        Ok(())
    }

    /// Stops the maintenance task and waits for it to exit.
    pub async fn shutdown(&self) {
        let handle = self.maintenance.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
            info!("Proxy pool stopped");
        }
    }

    /// Whether the maintenance task is running.
    pub async fn is_running(&self) -> bool {
        self.maintenance
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Borrows an endpoint, waiting up to `timeout`.
    ///
    /// [`PoolError::CheckoutTimeout`] is an ordinary outcome: retry later,
    /// go direct, or fail the work item.
    pub async fn checkout(&self, timeout: Duration) -> Result<Endpoint> {
        self.store.checkout(timeout).await
    }

    /// Returns a borrowed endpoint with the outcome of its use.
    pub async fn report(&self, endpoint: Endpoint, success: bool) {
        self.store.report(endpoint, success).await
    }

    /// Seeds the pool with an endpoint, bypassing validation.
    pub async fn insert(&self, endpoint: Endpoint) -> bool {
        self.store.insert(endpoint).await
    }

    /// Number of endpoints ready for checkout.
    pub fn size(&self) -> usize {
        self.store.size()
    }

    /// Snapshot of pool counters.
    pub async fn stats(&self) -> PoolStats {
        self.store.stats().await
    }

    /// The underlying store, for sharing with other components.
    pub fn store(&self) -> &Arc<PoolStore> {
        &self.store
    }

    /// The configuration this pool was built with.
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Creates a reqwest client that sends everything through `endpoint`.
    pub fn create_client(
        endpoint: &Endpoint,
        user_agent: &str,
        timeout: Duration,
    ) -> Result<Client> {
        debug!("Using proxy: {}", endpoint);
        Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .proxy(endpoint.to_proxy()?)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| PoolError::Other(format!("Failed to create HTTP client: {}", e)))
    }
}

impl Drop for ProxyPool {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.get_mut().take() {
            handle.cancel();
        }
    }
}
