//! Bounded, TTL-aware query result cache.
//!
//! A thin shell around [`lru::LruCache`] adding:
//!
//! - **Per-entry TTL**: entries past their TTL read as misses (lazy expiry
//!   on read, plus [`ResultCache::sweep`] / a background sweeper thread to
//!   reclaim space).
//! - **Single-flight herd collapse**: concurrent misses on the same key
//!   converge to one computation; the rest block on a condvar and receive
//!   the cached value.
//!
//! The cache stores value copies and never hands out shared mutable state.
//! It also never surfaces errors of its own; anything unexpected degrades
//! to a miss. Invalidation is purely TTL-driven: removals elsewhere in the
//! system are not propagated here, so results may be stale for up to one
//! TTL (a documented trade-off, not a bug).

use lru::LruCache;
use muse_observe::{CacheEvt, EngineEvent, Meter, NoopMeter};
use parking_lot::{Condvar, Mutex};
use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cache sizing and expiry parameters.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries before LRU eviction.
    pub capacity: usize,
    /// Time after which an entry reads as a miss.
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 4096,
            ttl: Duration::from_secs(300),
        }
    }
}

/// Counters exposed by [`ResultCache::stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub len: usize,
}

struct Entry<V> {
    value: V,
    inserted_at: Instant,
}

enum FlightState<V> {
    Pending,
    Done(V),
    Failed,
}

struct Flight<V> {
    state: Mutex<FlightState<V>>,
    cond: Condvar,
}

impl<V> Flight<V> {
    fn new() -> Self {
        Self {
            state: Mutex::new(FlightState::Pending),
            cond: Condvar::new(),
        }
    }
}

/// Bounded LRU + TTL cache with single-flight population.
pub struct ResultCache<K, V> {
    entries: Mutex<LruCache<K, Entry<V>>>,
    inflight: Mutex<HashMap<K, Arc<Flight<V>>>>,
    ttl: Duration,
    hits: AtomicU64,
    misses: AtomicU64,
    meter: Arc<dyn Meter>,
}

impl<K, V> ResultCache<K, V>
where
    K: Hash + Eq + Clone,
    V: Clone,
{
    /// Create a cache with a no-op meter.
    pub fn new(config: CacheConfig) -> Self {
        Self::with_meter(config, Arc::new(NoopMeter))
    }

    /// Create a cache that reports through the given meter.
    pub fn with_meter(config: CacheConfig, meter: Arc<dyn Meter>) -> Self {
        let capacity = match NonZeroUsize::new(config.capacity) {
            Some(capacity) => capacity,
            None => NonZeroUsize::MIN,
        };

        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            inflight: Mutex::new(HashMap::new()),
            ttl: config.ttl,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            meter,
        }
    }

    /// Look up a key. Expired entries are dropped and read as misses.
    pub fn get(&self, key: &K) -> Option<V> {
        let mut entries = self.entries.lock();
        let expired = match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.pop(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert a value, replacing any previous entry for the key.
    pub fn put(&self, key: K, value: V) {
        let mut entries = self.entries.lock();
        entries.put(
            key,
            Entry {
                value,
                inserted_at: Instant::now(),
            },
        );
    }

    /// Read-through lookup with herd collapse.
    ///
    /// On a miss, exactly one caller per key runs `compute`; concurrent
    /// callers for the same key block until the result lands in the cache
    /// and then share it. When the computation fails, its error goes to
    /// the leading caller and one waiter at a time takes over leadership.
    pub fn get_or_compute<E>(
        &self,
        key: K,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        if let Some(value) = self.get(&key) {
            return Ok(value);
        }

        loop {
            enum Role<V> {
                Lead(Arc<Flight<V>>),
                Wait(Arc<Flight<V>>),
            }

            let role = {
                let mut inflight = self.inflight.lock();
                match inflight.get(&key) {
                    Some(flight) => Role::Wait(Arc::clone(flight)),
                    None => {
                        let flight = Arc::new(Flight::new());
                        inflight.insert(key.clone(), Arc::clone(&flight));
                        Role::Lead(flight)
                    }
                }
            };

            match role {
                Role::Lead(flight) => return self.lead(key, flight, compute),
                Role::Wait(flight) => {
                    if let Some(value) = Self::await_flight(&flight) {
                        return Ok(value);
                    }
                    // The leader failed. Check the cache once more (another
                    // leader may have finished meanwhile), then contend for
                    // leadership ourselves.
                    if let Some(value) = self.get(&key) {
                        return Ok(value);
                    }
                }
            }
        }
    }

    fn lead<E>(
        &self,
        key: K,
        flight: Arc<Flight<V>>,
        compute: impl FnOnce() -> Result<V, E>,
    ) -> Result<V, E> {
        let result = compute();

        if let Ok(value) = &result {
            self.put(key.clone(), value.clone());
        }

        {
            let mut inflight = self.inflight.lock();
            inflight.remove(&key);
        }

        {
            let mut state = flight.state.lock();
            *state = match &result {
                Ok(value) => FlightState::Done(value.clone()),
                Err(_) => FlightState::Failed,
            };
            flight.cond.notify_all();
        }

        result
    }

    fn await_flight(flight: &Flight<V>) -> Option<V> {
        let mut state = flight.state.lock();
        loop {
            match &*state {
                FlightState::Done(value) => return Some(value.clone()),
                FlightState::Failed => return None,
                FlightState::Pending => {}
            }
            flight.cond.wait(&mut state);
        }
    }

    /// Drop every expired entry. Returns how many were reclaimed.
    pub fn sweep(&self) -> usize {
        let expired: Vec<K> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(_, entry)| entry.inserted_at.elapsed() > self.ttl)
                .map(|(key, _)| key.clone())
                .collect()
        };

        let mut entries = self.entries.lock();
        let mut removed = 0;
        for key in &expired {
            if entries.pop(key).is_some() {
                removed += 1;
            }
        }
        drop(entries);

        self.meter.emit(EngineEvent::Cache(CacheEvt {
            name: "results",
            hit_ratio: self.hit_ratio(),
        }));
        removed
    }

    /// Hits over total lookups, 0.0 before any lookup.
    pub fn hit_ratio(&self) -> f32 {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            return 0.0;
        }
        hits as f32 / total as f32
    }

    /// Counter snapshot.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            len: self.entries.lock().len(),
        }
    }

    /// Number of live (possibly expired, not yet swept) entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> ResultCache<K, V>
where
    K: Hash + Eq + Clone + Send + 'static,
    V: Clone + Send + 'static,
{
    /// Start a background thread that sweeps expired entries.
    ///
    /// Returns a handle that stops and joins the thread when dropped. A
    /// spawn failure is the caller's signal to fall back to lazy expiry
    /// only.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
    ) -> std::io::Result<SweeperHandle> {
        let cache = Arc::clone(self);
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);

        let thread = std::thread::Builder::new()
            .name("muse-cache-sweeper".to_string())
            .spawn(move || {
                while !stop_flag.load(Ordering::Relaxed) {
                    std::thread::park_timeout(interval);
                    if stop_flag.load(Ordering::Relaxed) {
                        break;
                    }
                    let removed = cache.sweep();
                    if removed > 0 {
                        tracing::debug!(removed, "cache sweep reclaimed expired entries");
                    }
                }
            })?;

        Ok(SweeperHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Owns the background sweeper thread; dropping it stops the thread.
pub struct SweeperHandle {
    stop: Arc<AtomicBool>,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            thread.thread().unpark();
            let _ = thread.join();
        }
    }
}
