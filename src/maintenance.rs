//! Background maintenance: refilling from sources and revalidating members.
//!
//! A single [`Maintainer`] task runs per pool. Every `check_interval` it
//! refills when the store is under its low-water mark and then re-probes all
//! available endpoints. A checkout that finds the store empty wakes it early
//! for a refill. Failures of one source or probe never abort a cycle; an
//! unexpected cycle error is logged and retried after a cooldown.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::PoolConfig;
use crate::endpoint::Endpoint;
use crate::jitter::JitterPolicy;
use crate::source::{CandidateSource, SourceTemplate};
use crate::store::PoolStore;
use crate::validator::{validate_all, Validator};
use crate::Result;

/// Stages of a refill cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillPhase {
    Idle,
    Fetching,
    Validating,
    Merging,
}

impl fmt::Display for RefillPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RefillPhase::Idle => "idle",
            RefillPhase::Fetching => "fetching",
            RefillPhase::Validating => "validating",
            RefillPhase::Merging => "merging",
        };
        f.write_str(name)
    }
}

/// Outcome of one refill attempt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefillReport {
    /// True when the cycle did not run (pool full enough or refill running).
    pub skipped: bool,
    /// Distinct, previously unknown candidates collected from sources.
    pub candidates: usize,
    /// Candidates that passed validation.
    pub validated: usize,
    /// Survivors actually admitted into the store.
    pub inserted: usize,
}

impl RefillReport {
    fn skipped() -> Self {
        Self {
            skipped: true,
            ..Default::default()
        }
    }
}

/// Outcome of one revalidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RevalidationReport {
    pub checked: usize,
    pub survived: usize,
    pub evicted: usize,
    pub reclaimed: usize,
}

enum Trigger {
    Tick,
    Requested,
}

/// Counts consecutive refills that admitted nothing.
#[derive(Debug)]
struct StallTracker {
    warn_after: u32,
    empty_refills: u32,
}

impl StallTracker {
    fn new(warn_after: u32) -> Self {
        Self {
            warn_after: warn_after.max(1),
            empty_refills: 0,
        }
    }

    /// Records a completed refill. Returns true when a warning is due.
    fn record(&mut self, inserted: usize) -> bool {
        if inserted > 0 {
            self.empty_refills = 0;
            return false;
        }
        self.empty_refills += 1;
        self.empty_refills % self.warn_after == 0
    }

    fn empty_refills(&self) -> u32 {
        self.empty_refills
    }
}

/// Drives refill and revalidation cycles for one store.
pub struct Maintainer {
    store: Arc<PoolStore>,
    source: Arc<dyn CandidateSource>,
    validator: Arc<dyn Validator>,
    sources: Vec<SourceTemplate>,
    pages_per_source: u32,
    source_jitter: JitterPolicy,
    validator_concurrency: usize,
    check_interval: Duration,
    error_cooldown: Duration,
    stall_warn_after: u32,
}

impl Maintainer {
    /// Creates a maintainer for `store` using the given collaborators.
    pub fn new(
        store: Arc<PoolStore>,
        source: Arc<dyn CandidateSource>,
        validator: Arc<dyn Validator>,
        config: &PoolConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            source,
            validator,
            sources: config.source_templates()?,
            pages_per_source: config.pages_per_source,
            source_jitter: config.source_jitter,
            validator_concurrency: config.validator_concurrency,
            check_interval: config.check_interval(),
            error_cooldown: config.error_cooldown(),
            stall_warn_after: config.stall_warn_after,
        })
    }

    /// The store this maintainer keeps filled.
    pub fn store(&self) -> &Arc<PoolStore> {
        &self.store
    }

    /// Refills if the store is under its low-water mark.
    ///
    /// `triggered` marks a request from an empty-pool checkout, which refills
    /// whenever the store is empty even with a zero low-water mark. Does
    /// nothing, without touching the network, while another refill holds the
    /// slot.
    pub async fn refill_if_needed(&self, triggered: bool) -> Result<RefillReport> {
        let wanted = self.store.is_below_low_water() || (triggered && self.store.size() == 0);
        if !wanted {
            debug!(
                "Pool size {} meets low-water mark {}",
                self.store.size(),
                self.store.low_water_mark()
            );
            return Ok(RefillReport::skipped());
        }
        self.refill_cycle().await
    }

    /// Runs one refill cycle unconditionally, unless one is already running.
    pub async fn refill_cycle(&self) -> Result<RefillReport> {
        let Some(_guard) = self.store.try_begin_refill() else {
            debug!("Refill already in flight, skipping");
            return Ok(RefillReport::skipped());
        };

        info!(
            "Refilling proxy pool ({}/{})",
            self.store.size(),
            self.store.low_water_mark()
        );

        debug!(phase = %RefillPhase::Fetching);
        let fetched = join_all(self.sources.iter().map(|s| self.fetch_source(s))).await;

        let mut seen = HashSet::new();
        let mut candidates = Vec::new();
        for endpoint in fetched.into_iter().flatten() {
            if seen.insert(endpoint.clone()) && !self.store.is_known(&endpoint).await {
                candidates.push(endpoint);
            }
        }
        info!("Fetched {} new candidates, validating", candidates.len());

        debug!(phase = %RefillPhase::Validating);
        let candidate_count = candidates.len();
        let verdicts = validate_all(
            Arc::clone(&self.validator),
            candidates,
            self.validator_concurrency,
        )
        .await?;

        debug!(phase = %RefillPhase::Merging);
        let mut validated = 0;
        let mut inserted = 0;
        for (endpoint, live) in verdicts {
            if !live {
                continue;
            }
            validated += 1;
            if self.store.insert(endpoint).await {
                inserted += 1;
            }
        }

        info!(
            "Refill complete: {}/{} candidates admitted, pool size {}",
            inserted,
            candidate_count,
            self.store.size()
        );
        debug!(phase = %RefillPhase::Idle);

        Ok(RefillReport {
            skipped: false,
            candidates: candidate_count,
            validated,
            inserted,
        })
    }

    /// Fetches every page of one source, pausing between pages.
    async fn fetch_source(&self, template: &SourceTemplate) -> Vec<Endpoint> {
        let mut candidates = Vec::new();
        for (page, url) in template.expand(self.pages_per_source).iter().enumerate() {
            if page > 0 {
                self.source_jitter.sleep().await;
            }
            candidates.extend(self.source.fetch_candidates(url).await);
        }
        candidates
    }

    /// Re-probes every available endpoint and drops the ones that fail.
    ///
    /// The available queue is drained first, so concurrent checkouts see a
    /// smaller pool rather than unverified entries. Checked-out endpoints are
    /// not touched, except that expired leases are forgotten when configured.
    pub async fn revalidate_cycle(&self) -> Result<RevalidationReport> {
        let reclaimed = self.store.reclaim_expired_leases().await;
        if !reclaimed.is_empty() {
            warn!("Forgot {} proxies never reported back", reclaimed.len());
        }

        let drained = self.store.drain_available().await;
        if drained.is_empty() {
            return Ok(RevalidationReport {
                reclaimed: reclaimed.len(),
                ..Default::default()
            });
        }

        info!("Revalidating {} proxies", drained.len());
        let checked = drained.len();
        let verdicts = match validate_all(
            Arc::clone(&self.validator),
            drained.clone(),
            self.validator_concurrency,
        )
        .await
        {
            Ok(verdicts) => verdicts,
            Err(e) => {
                self.store.restore(drained).await;
                return Err(e);
            }
        };

        let mut survivors = Vec::new();
        let mut evicted = 0;
        for (endpoint, live) in verdicts {
            if live {
                survivors.push(endpoint);
            } else if self.store.evict(&endpoint).await {
                evicted += 1;
            }
        }
        let survived = self.store.restore(survivors).await;

        info!("Revalidation complete: {}/{} proxies alive", survived, checked);
        Ok(RevalidationReport {
            checked,
            survived,
            evicted,
            reclaimed: reclaimed.len(),
        })
    }

    /// Runs until `cancel` fires. Never returns early on error.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.check_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stalls = StallTracker::new(self.stall_warn_after);

        info!("Proxy pool maintenance started");
        loop {
            let trigger = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => Trigger::Tick,
                _ = self.store.refill_requested() => Trigger::Requested,
            };

            let Some(result) = self.handle(trigger, &cancel).await else {
                break;
            };

            match result {
                Ok(report) if !report.skipped => {
                    if stalls.record(report.inserted) {
                        warn!(
                            "No proxies admitted in {} consecutive refills, pool size {}",
                            stalls.empty_refills(),
                            self.store.size()
                        );
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    error!("Maintenance cycle failed: {}", e);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.error_cooldown) => {}
                    }
                    // Checkouts that asked during the failed cycle were dropped.
                    self.store.request_refill();
                }
            }
        }
        info!("Proxy pool maintenance stopped");
    }

    /// Runs one cycle, or returns `None` if cancelled during the refill.
    ///
    /// Revalidation is never cancelled once started: it holds the drained
    /// endpoints and must requeue them.
    async fn handle(
        &self,
        trigger: Trigger,
        cancel: &CancellationToken,
    ) -> Option<Result<RefillReport>> {
        let triggered = matches!(trigger, Trigger::Requested);
        let refill = tokio::select! {
            _ = cancel.cancelled() => return None,
            result = self.refill_if_needed(triggered) => result,
        };
        if triggered {
            return Some(refill);
        }

        let report = match refill {
            Ok(report) => report,
            Err(e) => return Some(Err(e)),
        };
        Some(self.revalidate_cycle().await.map(|_| report))
    }

    /// Spawns [`run`](Self::run) on the current runtime.
    pub fn spawn(self) -> MaintenanceHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        MaintenanceHandle { cancel, task }
    }
}

/// Handle to a running maintenance task.
pub struct MaintenanceHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MaintenanceHandle {
    /// Whether the task has exited.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Signals the task to stop without waiting.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancels the task and waits for it to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!("Maintenance task ended abnormally: {}", e);
        }
    }
}
