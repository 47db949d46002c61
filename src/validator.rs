//! Endpoint liveness probing.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::endpoint::Endpoint;
use crate::{PoolError, Result};

/// Decides whether an endpoint currently forwards traffic.
///
/// Implementations must not touch pool state and must be safe to call many
/// times concurrently. Every failure mode maps to `false`.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Returns true if the endpoint is usable right now.
    async fn is_live(&self, endpoint: &Endpoint) -> bool;
}

/// Probes a fixed target page through the endpoint and expects HTTP 200.
pub struct HttpValidator {
    probe_target: String,
    timeout: Duration,
}

impl HttpValidator {
    /// Creates a validator probing `probe_target` with the given timeout.
    pub fn new(probe_target: impl Into<String>, timeout: Duration) -> Self {
        Self {
            probe_target: probe_target.into(),
            timeout,
        }
    }

    /// The page fetched through each candidate.
    pub fn probe_target(&self) -> &str {
        &self.probe_target
    }

    async fn probe(&self, endpoint: &Endpoint) -> Result<StatusCode> {
        let client = Client::builder()
            .proxy(endpoint.to_proxy()?)
            .timeout(self.timeout)
            .danger_accept_invalid_certs(true)
            .build()?;
        let response = client.get(&self.probe_target).send().await?;
        Ok(response.status())
    }
}

#[async_trait]
impl Validator for HttpValidator {
    async fn is_live(&self, endpoint: &Endpoint) -> bool {
        let reason = match self.probe(endpoint).await {
            Ok(StatusCode::OK) => return true,
            Ok(status) => format!("status {}", status),
            Err(e) => e.to_string(),
        };
        let failure = PoolError::ProbeFailure {
            endpoint: endpoint.url(),
            reason,
        };
        debug!("{}", failure);
        false
    }
}

/// Probes every candidate with at most `concurrency` probes in flight.
///
/// Returns `(endpoint, live)` verdicts in candidate order. A probe task that
/// panics aborts the batch with [`PoolError::MaintenanceCycle`].
pub async fn validate_all(
    validator: Arc<dyn Validator>,
    candidates: Vec<Endpoint>,
    concurrency: usize,
) -> Result<Vec<(Endpoint, bool)>> {
    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut tasks = JoinSet::new();

    for (index, endpoint) in candidates.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let validator = Arc::clone(&validator);
        tasks.spawn(async move {
            let live = match semaphore.acquire_owned().await {
                Ok(_permit) => validator.is_live(&endpoint).await,
                Err(_) => false,
            };
            (index, endpoint, live)
        });
    }

    let mut verdicts = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        let verdict =
            joined.map_err(|e| PoolError::MaintenanceCycle(format!("probe task failed: {}", e)))?;
        verdicts.push(verdict);
    }

    verdicts.sort_by_key(|(index, _, _)| *index);
    Ok(verdicts
        .into_iter()
        .map(|(_, endpoint, live)| (endpoint, live))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SetValidator {
        live: HashSet<Endpoint>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl SetValidator {
        fn new(live: Vec<Endpoint>) -> Self {
            Self {
                live: live.into_iter().collect(),
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Validator for SetValidator {
        async fn is_live(&self, endpoint: &Endpoint) -> bool {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.live.contains(endpoint)
        }
    }

    struct PanickingValidator;

    #[async_trait]
    impl Validator for PanickingValidator {
        async fn is_live(&self, _endpoint: &Endpoint) -> bool {
            panic!("probe exploded");
        }
    }

    fn endpoints(n: u16) -> Vec<Endpoint> {
        (1..=n).map(|p| Endpoint::new("10.0.0.1", 8000 + p)).collect()
    }

    #[tokio::test]
    async fn test_validate_all_keeps_order_and_verdicts() {
        let all = endpoints(6);
        let live = vec![all[1].clone(), all[4].clone()];
        let validator = Arc::new(SetValidator::new(live));

        let verdicts = validate_all(validator, all.clone(), 3).await.unwrap();
        let order: Vec<_> = verdicts.iter().map(|(ep, _)| ep.clone()).collect();
        assert_eq!(order, all);
        let survivors: Vec<_> = verdicts
            .into_iter()
            .filter(|(_, live)| *live)
            .map(|(ep, _)| ep)
            .collect();
        assert_eq!(survivors, vec![all[1].clone(), all[4].clone()]);
    }

    #[tokio::test]
    async fn test_validate_all_bounds_concurrency() {
        let validator = Arc::new(SetValidator::new(vec![]));
        validate_all(validator.clone(), endpoints(20), 4).await.unwrap();
        let peak = validator.peak.load(Ordering::SeqCst);
        assert!(peak <= 4, "peak concurrency was {}", peak);
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn test_validate_all_empty() {
        let validator = Arc::new(SetValidator::new(vec![]));
        assert!(validate_all(validator, vec![], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_validate_all_panicking_probe() {
        let result = validate_all(Arc::new(PanickingValidator), endpoints(2), 2).await;
        assert!(matches!(result, Err(PoolError::MaintenanceCycle(_))));
    }

    #[tokio::test]
    async fn test_http_validator_unreachable_proxy_is_dead() {
        // Nothing listens on port 9 of the loopback interface.
        let validator = HttpValidator::new("http://example.com", Duration::from_millis(500));
        assert!(!validator.is_live(&Endpoint::new("127.0.0.1", 9)).await);
    }
}
