/// Process-wide read-through cache of region reference tables.
///
/// ## Behavior
/// - A region's table is loaded from the store at most once per process
///   while it stays cached. Concurrent first requests for the same region
///   share one load (single-flight); requests for different regions load in
///   parallel.
/// - Only found tables are cached. "Not found" and store failures are
///   returned to the caller and retried on the next request.
/// - No TTL. Reference tables change at most once per baseline rebuild, so
///   entries live until `invalidate` or `invalidate_all`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use tracing::{debug, info};

use super::{ReferenceError, ReferenceStore, ReferenceTable};

/// Counters for cache activity.
#[derive(Debug, Default)]
pub struct CacheStats {
    /// Requests served from the cache.
    pub hits: AtomicU64,
    /// Requests that found no cached table.
    pub misses: AtomicU64,
    /// Store loads actually performed.
    pub loads: AtomicU64,
    /// Loads that returned "not found".
    pub not_found: AtomicU64,
    /// Loads that failed.
    pub failures: AtomicU64,
}

impl CacheStats {
    /// Cache hit rate as a percentage (0-100).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            (hits as f64 / total as f64) * 100.0
        }
    }

    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }
}

pub struct ReferenceCache {
    store: Arc<dyn ReferenceStore>,
    tables: RwLock<HashMap<String, Arc<ReferenceTable>>>,
    /// One lock per region with a load in progress.
    inflight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    stats: CacheStats,
}

impl ReferenceCache {
    pub fn new(store: Arc<dyn ReferenceStore>) -> Self {
        Self {
            store,
            tables: RwLock::new(HashMap::new()),
            inflight: Mutex::new(HashMap::new()),
            stats: CacheStats::default(),
        }
    }

    /// Returns the cached table for `region`, loading it on first use.
    ///
    /// `Ok(None)` means the store has no table for the region.
    pub fn get(&self, region: &str) -> Result<Option<Arc<ReferenceTable>>, ReferenceError> {
        if let Some(table) = self.cached(region) {
            self.stats.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(table));
        }

        let flight = self.flight_lock(region);
        let result = {
            let _guard = flight.lock().unwrap_or_else(PoisonError::into_inner);

            // Another caller may have finished the load while we waited.
            if let Some(table) = self.cached(region) {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                Ok(Some(table))
            } else {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                self.load(region)
            }
        };

        self.release_flight(region, flight);
        result
    }

    /// Drops the cached table for `region`, if any.
    pub fn invalidate(&self, region: &str) -> bool {
        let removed = self
            .tables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(region)
            .is_some();
        if removed {
            info!(region, "Reference table invalidated");
        }
        removed
    }

    pub fn invalidate_all(&self) {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let count = tables.len();
        tables.clear();
        info!(count, "All reference tables invalidated");
    }

    /// Regions currently cached, sorted.
    pub fn cached_regions(&self) -> Vec<String> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let mut regions: Vec<String> = tables.keys().cloned().collect();
        regions.sort();
        regions
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    pub fn store_description(&self) -> String {
        self.store.describe()
    }

    fn cached(&self, region: &str) -> Option<Arc<ReferenceTable>> {
        self.tables
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(region)
            .cloned()
    }

    fn flight_lock(&self, region: &str) -> Arc<Mutex<()>> {
        self.inflight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(region.to_string())
            .or_default()
            .clone()
    }

    /// Forgets the flight lock once no other caller holds a handle to it.
    ///
    /// Handles are only handed out under the `inflight` lock, so the count
    /// taken here cannot grow underneath us.
    fn release_flight(&self, region: &str, flight: Arc<Mutex<()>>) {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        drop(flight);
        let idle = inflight
            .get(region)
            .is_some_and(|entry| Arc::strong_count(entry) == 1);
        if idle {
            inflight.remove(region);
        }
    }

    /// Performs the store load. Caller holds the region's flight lock.
    fn load(&self, region: &str) -> Result<Option<Arc<ReferenceTable>>, ReferenceError> {
        self.stats.loads.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();

        match self.store.load(region) {
            Ok(Some(table)) => {
                let table = Arc::new(table);
                info!(
                    region,
                    sites = table.site_count(),
                    rows = table.row_count(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Loaded reference table"
                );
                self.tables
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(region.to_string(), Arc::clone(&table));
                Ok(Some(table))
            }
            Ok(None) => {
                self.stats.not_found.fetch_add(1, Ordering::Relaxed);
                debug!(region, store = %self.store.describe(), "No reference table for region");
                Ok(None)
            }
            Err(e) => {
                self.stats.failures.fetch_add(1, Ordering::Relaxed);
                Err(e)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
