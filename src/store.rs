//! Shared pool state: the available queue and the known set.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::endpoint::Endpoint;
use crate::{PoolError, Result};

#[derive(Debug, Default)]
struct Inner {
    /// Endpoints eligible for checkout, oldest first.
    available: VecDeque<Endpoint>,
    /// Every tracked endpoint, available or checked out.
    known: HashSet<Endpoint>,
    /// Checkout times, recorded only when a lease timeout is set.
    leases: HashMap<Endpoint, Instant>,
}

impl Inner {
    fn enqueue(&mut self, endpoint: Endpoint) -> bool {
        if !self.known.contains(&endpoint) || self.available.contains(&endpoint) {
            return false;
        }
        self.available.push_back(endpoint);
        true
    }

    fn forget(&mut self, endpoint: &Endpoint) -> bool {
        self.leases.remove(endpoint);
        self.available.retain(|e| e != endpoint);
        self.known.remove(endpoint)
    }
}

/// Point-in-time counters of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub available: usize,
    pub known: usize,
    pub checked_out: usize,
    pub low_water_mark: usize,
    pub refill_in_flight: bool,
}

/// Concurrent store of endpoints believed to be live.
///
/// All mutations go through one short-held lock that is never kept across
/// network I/O. `known` always contains every endpoint in `available`, and no
/// endpoint is queued twice.
pub struct PoolStore {
    inner: Mutex<Inner>,
    available_len: AtomicUsize,
    refill_in_flight: AtomicBool,
    low_water_mark: usize,
    lease_timeout: Option<Duration>,
    endpoint_ready: Notify,
    refill_wanted: Notify,
}

/// Marks a refill cycle as running; cleared on drop.
pub struct RefillGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for RefillGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

impl PoolStore {
    /// Creates an empty store with the given low-water mark.
    pub fn new(low_water_mark: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available_len: AtomicUsize::new(0),
            refill_in_flight: AtomicBool::new(false),
            low_water_mark,
            lease_timeout: None,
            endpoint_ready: Notify::new(),
            refill_wanted: Notify::new(),
        }
    }

    /// Tracks checkouts and lets revalidation forget ones held too long.
    pub fn with_lease_timeout(mut self, lease_timeout: Option<Duration>) -> Self {
        self.lease_timeout = lease_timeout;
        self
    }

    /// Takes the oldest available endpoint, waiting up to `timeout`.
    ///
    /// An empty pool asks the maintenance loop for a refill before waiting.
    /// The endpoint stays known but is not offered again until reported.
    pub async fn checkout(&self, timeout: Duration) -> Result<Endpoint> {
        // Timeouts too large for an instant wait without a deadline.
        let deadline = Instant::now().checked_add(timeout);
        let mut refill_requested = false;

        loop {
            // Register before looking so an insert between the check and the
            // wait is not missed.
            let ready = self.endpoint_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();

            if let Some(endpoint) = self.try_checkout().await {
                return Ok(endpoint);
            }

            if !refill_requested {
                self.request_refill();
                refill_requested = true;
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, ready).await.is_err() {
                        debug!("Checkout timed out after {:?}", timeout);
                        return Err(PoolError::CheckoutTimeout(timeout));
                    }
                }
                None => ready.await,
            }
        }
    }

    /// Takes the oldest available endpoint without waiting.
    pub async fn try_checkout(&self) -> Option<Endpoint> {
        let mut inner = self.inner.lock().await;
        let endpoint = inner.available.pop_front()?;
        self.available_len.store(inner.available.len(), Ordering::SeqCst);
        if self.lease_timeout.is_some() {
            inner.leases.insert(endpoint.clone(), Instant::now());
        }
        Some(endpoint)
    }

    /// Returns a checked-out endpoint.
    ///
    /// Success requeues it at the back; repeated success reports leave a
    /// single queued copy, and an endpoint that was dropped meanwhile stays
    /// dropped. Failure forgets it entirely.
    pub async fn report(&self, endpoint: Endpoint, success: bool) {
        let mut inner = self.inner.lock().await;
        inner.leases.remove(&endpoint);

        if success {
            let queued = inner.enqueue(endpoint.clone());
            self.available_len.store(inner.available.len(), Ordering::SeqCst);
            drop(inner);
            if queued {
                self.endpoint_ready.notify_waiters();
            } else {
                debug!("Success report for {} ignored", endpoint);
            }
        } else if inner.forget(&endpoint) {
            self.available_len.store(inner.available.len(), Ordering::SeqCst);
            info!("Proxy {} failed in use, removed", endpoint);
        }
    }

    /// Admits a new endpoint. Returns false if it is already known.
    pub async fn insert(&self, endpoint: Endpoint) -> bool {
        let mut inner = self.inner.lock().await;
        if !inner.known.insert(endpoint.clone()) {
            return false;
        }
        inner.available.push_back(endpoint);
        self.available_len.store(inner.available.len(), Ordering::SeqCst);
        drop(inner);

        self.endpoint_ready.notify_waiters();
        true
    }

    /// Number of endpoints currently available. Never blocks.
    pub fn size(&self) -> usize {
        self.available_len.load(Ordering::SeqCst)
    }

    /// The configured low-water mark.
    pub fn low_water_mark(&self) -> usize {
        self.low_water_mark
    }

    /// Whether the available count is under the low-water mark.
    pub fn is_below_low_water(&self) -> bool {
        self.size() < self.low_water_mark
    }

    /// Number of tracked endpoints, including checked-out ones.
    pub async fn known_len(&self) -> usize {
        self.inner.lock().await.known.len()
    }

    /// Whether the endpoint is tracked.
    pub async fn is_known(&self, endpoint: &Endpoint) -> bool {
        self.inner.lock().await.known.contains(endpoint)
    }

    /// Snapshot of the store counters.
    pub async fn stats(&self) -> PoolStats {
        let inner = self.inner.lock().await;
        PoolStats {
            available: inner.available.len(),
            known: inner.known.len(),
            checked_out: inner.known.len().saturating_sub(inner.available.len()),
            low_water_mark: self.low_water_mark,
            refill_in_flight: self.is_refill_in_flight(),
        }
    }

    /// Removes every available endpoint for revalidation. They stay known.
    pub(crate) async fn drain_available(&self) -> Vec<Endpoint> {
        let mut inner = self.inner.lock().await;
        let drained: Vec<Endpoint> = inner.available.drain(..).collect();
        self.available_len.store(0, Ordering::SeqCst);
        drained
    }

    /// Requeues revalidated endpoints that are still known.
    pub(crate) async fn restore(&self, survivors: Vec<Endpoint>) -> usize {
        let mut inner = self.inner.lock().await;
        let restored = survivors
            .into_iter()
            .filter(|endpoint| inner.enqueue(endpoint.clone()))
            .count();
        self.available_len.store(inner.available.len(), Ordering::SeqCst);
        drop(inner);

        if restored > 0 {
            self.endpoint_ready.notify_waiters();
        }
        restored
    }

    /// Forgets an endpoint. Returns true if it was known.
    pub(crate) async fn evict(&self, endpoint: &Endpoint) -> bool {
        let mut inner = self.inner.lock().await;
        let removed = inner.forget(endpoint);
        self.available_len.store(inner.available.len(), Ordering::SeqCst);
        removed
    }

    /// Forgets endpoints whose checkout outlived the lease timeout.
    pub(crate) async fn reclaim_expired_leases(&self) -> Vec<Endpoint> {
        let Some(lease_timeout) = self.lease_timeout else {
            return Vec::new();
        };

        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let expired: Vec<Endpoint> = inner
            .leases
            .iter()
            .filter(|(_, since)| now.duration_since(**since) >= lease_timeout)
            .map(|(endpoint, _)| endpoint.clone())
            .collect();

        for endpoint in &expired {
            inner.forget(endpoint);
        }
        self.available_len.store(inner.available.len(), Ordering::SeqCst);
        expired
    }

    /// Claims the single refill slot, or `None` if a refill is running.
    pub fn try_begin_refill(&self) -> Option<RefillGuard<'_>> {
        self.refill_in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RefillGuard {
                flag: &self.refill_in_flight,
            })
    }

    /// Whether a refill cycle currently holds the slot.
    pub fn is_refill_in_flight(&self) -> bool {
        self.refill_in_flight.load(Ordering::SeqCst)
    }

    /// Asks the maintenance loop for a refill unless one is running.
    pub fn request_refill(&self) {
        if !self.is_refill_in_flight() {
            self.refill_wanted.notify_one();
        }
    }

    /// Resolves once a refill has been requested.
    pub async fn refill_requested(&self) {
        self.refill_wanted.notified().await;
    }
}
