//! Price cache with stale-while-revalidate reads and a single background
//! refresh worker.
//!
//! Readers never wait on the network. Symbols that are missing or older than
//! the TTL are added to a pending set; one worker task drains that set in
//! batches and calls the [`PriceFetcher`]. A symbol is pending at most once,
//! so concurrent readers asking for the same symbol share one upstream fetch.

use crate::core::price::{PriceFetcher, PriceMap, normalize_symbol};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

const DEFAULT_BACKOFF_FLOOR: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_CEILING: Duration = Duration::from_secs(30);
const STOP_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    price: Option<f64>,
    fetched_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    pending: HashSet<String>,
    shutdown: bool,
}

struct Shared {
    state: Mutex<CacheState>,
    wake: Notify,
    fetcher: Arc<dyn PriceFetcher>,
}

impl Shared {
    fn lock(&self) -> std::sync::MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct PriceCache {
    ttl: Duration,
    backoff_floor: Duration,
    backoff_ceiling: Duration,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PriceCache {
    pub fn new(fetcher: Arc<dyn PriceFetcher>, ttl: Duration) -> Self {
        Self {
            ttl: ttl.max(Duration::from_secs(1)),
            backoff_floor: DEFAULT_BACKOFF_FLOOR,
            backoff_ceiling: DEFAULT_BACKOFF_CEILING,
            shared: Arc::new(Shared {
                state: Mutex::new(CacheState::default()),
                wake: Notify::new(),
                fetcher,
            }),
            worker: Mutex::new(None),
        }
    }

    /// Overrides the retry delays used after a failed batch.
    pub fn with_backoff(mut self, floor: Duration, ceiling: Duration) -> Self {
        self.backoff_floor = floor;
        self.backoff_ceiling = ceiling.max(floor);
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Best-effort prices for `symbols`.
    ///
    /// Fresh entries are returned as is. Stale entries are still returned and,
    /// with `schedule_refresh`, queued for the worker. Symbols never fetched
    /// are left out of the result and queued the same way. Must be called from
    /// within a tokio runtime since it may start the worker.
    pub fn get_many<I, S>(&self, symbols: I, schedule_refresh: bool) -> PriceMap
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut unique: Vec<String> = Vec::new();
        for symbol in symbols {
            if let Some(symbol) = normalize_symbol(symbol.as_ref()) {
                if !unique.contains(&symbol) {
                    unique.push(symbol);
                }
            }
        }

        let now = Instant::now();
        let mut results = PriceMap::new();
        let mut queued = 0usize;
        let shutdown = {
            let mut state = self.shared.lock();
            for symbol in unique {
                let entry = state.entries.get(&symbol).copied();
                if let Some(entry) = entry {
                    results.insert(symbol.clone(), entry.price);
                    if now.duration_since(entry.fetched_at) <= self.ttl {
                        debug!("Price cache HIT for {}", symbol);
                        continue;
                    }
                    debug!("Price cache STALE for {}", symbol);
                } else {
                    debug!("Price cache MISS for {}", symbol);
                }
                if schedule_refresh && state.pending.insert(symbol) {
                    queued += 1;
                }
            }
            state.shutdown
        };

        if queued > 0 && !shutdown {
            self.ensure_worker();
            self.shared.wake.notify_one();
        }
        results
    }

    /// Stores a price fetched out of band and clears any pending refresh.
    pub fn prime(&self, symbol: &str, price: Option<f64>) {
        let Some(symbol) = normalize_symbol(symbol) else {
            return;
        };
        let mut state = self.shared.lock();
        state.pending.remove(&symbol);
        state.entries.insert(
            symbol,
            CacheEntry {
                price,
                fetched_at: Instant::now(),
            },
        );
    }

    /// Number of symbols waiting for the worker.
    pub fn pending_len(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Signals shutdown and waits briefly for the worker to exit.
    pub async fn stop(&self) {
        self.shared.lock().shutdown = true;
        self.shared.wake.notify_one();

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut handle) = handle {
            if tokio::time::timeout(STOP_GRACE, &mut handle).await.is_err() {
                warn!("Price cache worker did not stop in time, aborting");
                handle.abort();
            }
        }
        debug!("Price cache stopped");
    }

    fn ensure_worker(&self) {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        if worker.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        debug!("Starting price cache worker");
        let shared = Arc::clone(&self.shared);
        *worker = Some(tokio::spawn(run_worker(
            shared,
            self.backoff_floor,
            self.backoff_ceiling,
        )));
    }
}

impl Drop for PriceCache {
    fn drop(&mut self) {
        if let Some(handle) = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            handle.abort();
        }
    }
}

/// Drains the pending set batch by batch until shutdown.
async fn run_worker(shared: Arc<Shared>, floor: Duration, ceiling: Duration) {
    let mut retry_delay = floor;
    loop {
        let batch: Vec<String> = {
            let mut state = shared.lock();
            if state.shutdown {
                break;
            }
            state.pending.drain().collect()
        };
        if batch.is_empty() {
            shared.wake.notified().await;
            continue;
        }

        let started = Instant::now();
        match shared.fetcher.fetch_prices(&batch).await {
            Ok(prices) => {
                retry_delay = floor;
                let fetched_at = Instant::now();
                let mut state = shared.lock();
                for symbol in &batch {
                    let price = prices.get(symbol).copied().flatten();
                    state
                        .entries
                        .insert(symbol.clone(), CacheEntry { price, fetched_at });
                }
                info!(
                    "Price cache refreshed {} symbols in {:.1}ms",
                    batch.len(),
                    started.elapsed().as_secs_f64() * 1000.0
                );
            }
            Err(e) => {
                warn!(
                    "Price batch fetch failed for {} symbols: {}. Retrying in {:?}",
                    batch.len(),
                    e,
                    retry_delay
                );
                shared.lock().pending.extend(batch);
                tokio::time::sleep(retry_delay).await;
                retry_delay = (retry_delay * 2).min(ceiling);
            }
        }
    }
    debug!("Price cache worker exiting");
}
