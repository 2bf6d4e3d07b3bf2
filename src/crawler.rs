//! Crawl orchestration: dequeue → resolve neighbors → ingest → repeat.

use crate::bootstrap::{self, BootstrapError, BootstrapOutcome};
use crate::client::{LocatorClient, LocatorError};
use crate::frontier::FrontierQueue;
use crate::ingest::Ingestor;
use crate::scan::NetworkScanner;
use crate::store::{Store, StoreError};
use crate::types::Bssid;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;

#[derive(Debug, Error)]
pub enum CrawlerError {
    #[error("client error: {0}")]
    Client(#[from] LocatorError),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("bootstrap error: {0}")]
    Bootstrap(#[from] BootstrapError),
}

/// Statistics for the crawler.
#[derive(Debug, Default)]
pub struct CrawlerStats {
    pub resolutions: AtomicU64,
    pub pings_written: AtomicU64,
    pub empty_results: AtomicU64,
    pub errors: AtomicU64,
    pub last_resolution_ms: AtomicU64,
}

impl CrawlerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            resolutions: self.resolutions.load(Ordering::Relaxed),
            pings_written: self.pings_written.load(Ordering::Relaxed),
            empty_results: self.empty_results.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_resolution_ms: self.last_resolution_ms.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub resolutions: u64,
    pub pings_written: u64,
    pub empty_results: u64,
    pub errors: u64,
    pub last_resolution_ms: u64,
}

/// Configuration for the crawler.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Concurrent worker loops sharing the frontier.
    pub workers: usize,
    /// Wait between iterations of one worker.
    pub pace: Duration,
    /// Wait after an exhausted or failed bootstrap before trying again.
    pub bootstrap_cooldown: Duration,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            pace: Duration::from_secs(5),
            bootstrap_cooldown: Duration::from_secs(600),
        }
    }
}

/// The crawl orchestrator. One instance drives any number of worker loops
/// against the shared frontier; resolver and store failures on one entry
/// are logged and the crawl moves on.
pub struct Crawler {
    inner: Arc<CrawlerInner>,
}

struct CrawlerInner {
    client: LocatorClient,
    store: Store,
    frontier: FrontierQueue,
    ingestor: Ingestor,
    scanner: Box<dyn NetworkScanner>,
    config: CrawlerConfig,
    stats: Arc<CrawlerStats>,
    running: AtomicBool,
}

impl Crawler {
    pub fn new(
        client: LocatorClient,
        store: Store,
        frontier: FrontierQueue,
        ingestor: Ingestor,
        scanner: Box<dyn NetworkScanner>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            inner: Arc::new(CrawlerInner {
                client,
                store,
                frontier,
                ingestor,
                scanner,
                config,
                stats: Arc::new(CrawlerStats::new()),
                running: AtomicBool::new(false),
            }),
        }
    }

    pub fn stats(&self) -> Arc<CrawlerStats> {
        Arc::clone(&self.inner.stats)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Relaxed)
    }

    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    /// Run worker loops until the frontier drains or [`Crawler::stop`].
    pub async fn run(&self) -> Result<(), CrawlerError> {
        self.inner.running.store(true, Ordering::SeqCst);

        let mut workers = Vec::with_capacity(self.inner.config.workers.max(1));
        for worker_id in 0..self.inner.config.workers.max(1) {
            let inner = Arc::clone(&self.inner);
            workers.push(tokio::spawn(async move {
                inner.worker_loop(worker_id).await;
            }));
        }

        for worker in workers {
            let _ = worker.await;
        }

        self.inner.running.store(false, Ordering::SeqCst);
        Ok(())
    }
}

impl CrawlerInner {
    async fn worker_loop(&self, worker_id: usize) {
        tracing::info!("worker {} started", worker_id);

        while self.running.load(Ordering::Relaxed) {
            match self.frontier.dequeue_one().await {
                Ok(Some(seed)) => {
                    tracing::info!("worker {} processing queued seed {}", worker_id, seed);
                    self.resolve_and_ingest(seed).await;
                }
                Ok(None) => match self.store.device_count().await {
                    Ok(0) => {
                        if !self.try_bootstrap().await {
                            continue;
                        }
                    }
                    Ok(known) => {
                        tracing::info!(
                            "worker {}: frontier drained with {} devices known; crawl finished",
                            worker_id,
                            known
                        );
                        break;
                    }
                    Err(err) => {
                        tracing::error!("worker {}: device count failed: {}", worker_id, err);
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    }
                },
                Err(err) => {
                    tracing::error!("worker {}: dequeue failed: {}", worker_id, err);
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                }
            }

            sleep(self.config.pace).await;
        }

        tracing::info!("worker {} stopped", worker_id);
    }

    /// Returns false when the caller should skip its pacing sleep because a
    /// cooldown was already applied.
    async fn try_bootstrap(&self) -> bool {
        match bootstrap::run(self.scanner.as_ref(), &self.client, &self.ingestor).await {
            Ok(BootstrapOutcome::Seeded { seed, pings }) => {
                tracing::info!("bootstrap seeded {} pings from {}", pings, seed);
                true
            }
            Ok(BootstrapOutcome::Exhausted) => {
                tracing::warn!(
                    "bootstrap exhausted; cooling down for {:?}",
                    self.config.bootstrap_cooldown
                );
                sleep(self.config.bootstrap_cooldown).await;
                false
            }
            Err(err) => {
                tracing::error!(
                    "bootstrap failed: {}; cooling down for {:?}",
                    err,
                    self.config.bootstrap_cooldown
                );
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                sleep(self.config.bootstrap_cooldown).await;
                false
            }
        }
    }

    async fn resolve_and_ingest(&self, seed: Bssid) {
        let start = Instant::now();
        let scrape_time = Utc::now();

        match self.client.find_nearby(seed).await {
            Ok(locations) if locations.is_empty() => {
                tracing::warn!("no valid locations returned for seed {}", seed);
                self.stats.empty_results.fetch_add(1, Ordering::Relaxed);
            }
            Ok(locations) => match self.ingestor.ingest(&locations, scrape_time).await {
                Ok(written) => {
                    tracing::info!(
                        "seed {} added {} pings, queued {} devices to check",
                        seed,
                        written,
                        locations.len()
                    );
                    self.stats
                        .pings_written
                        .fetch_add(written as u64, Ordering::Relaxed);
                }
                Err(err) => {
                    tracing::error!("ingest failed for seed {}: {}", seed, err);
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                }
            },
            Err(err @ LocatorError::Denied { .. }) => {
                tracing::warn!("seed {} rejected without retry: {}", seed, err);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                tracing::error!("resolution failed for seed {}: {}", seed, err);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.stats.resolutions.fetch_add(1, Ordering::Relaxed);
        self.stats
            .last_resolution_ms
            .store(start.elapsed().as_millis() as u64, Ordering::Relaxed);
    }
}
