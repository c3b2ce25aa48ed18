//! Time-bounded LRU cache with single-flight loading.
//!
//! Both the geocode cache and the distance cache are instances of
//! [`TtlCache`]. The cache is an explicitly owned object: callers create it,
//! wrap it in an `Arc` and hand it to the resolver or matrix builder, so tests
//! can start from an empty or pre-seeded cache.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::trace;

const DEFAULT_TTL_SECS: u64 = 24 * 60 * 60;
const DEFAULT_CAPACITY: usize = 10_000;

/// Source of the current instant. Injected so tests can move time forward.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Mutex::new(Instant::now()),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *lock(&self.now)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_secs: u64,
    pub capacity: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL_SECS,
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// How the result of a load is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Store with the cache's default TTL.
    Store,
    /// Store with a specific TTL (e.g. short-lived negative entries).
    StoreFor(Duration),
    /// Hand the value to waiting callers but do not store it.
    Skip,
}

struct Entry<V> {
    value: V,
    expires_at: Instant,
    last_used: u64,
}

struct CacheState<K, V> {
    entries: HashMap<K, Entry<V>>,
    /// Access tick -> key, oldest first.
    recency: BTreeMap<u64, K>,
    tick: u64,
}

impl<K: Eq + Hash + Clone, V> CacheState<K, V> {
    fn touch(&mut self, key: &K) {
        self.tick += 1;
        let tick = self.tick;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.last_used);
            entry.last_used = tick;
            self.recency.insert(tick, key.clone());
        }
    }

    fn remove(&mut self, key: &K) {
        if let Some(entry) = self.entries.remove(key) {
            self.recency.remove(&entry.last_used);
        }
    }

    fn evict_lru(&mut self) {
        if let Some((_, key)) = self.recency.pop_first() {
            self.entries.remove(&key);
        }
    }
}

/// One in-flight load. Followers block on `ready` until the leader publishes.
struct Flight<V> {
    outcome: Mutex<FlightOutcome<V>>,
    ready: Condvar,
}

enum FlightOutcome<V> {
    Pending,
    Done(V),
    Abandoned,
}

impl<V: Clone> Flight<V> {
    fn new() -> Self {
        Self {
            outcome: Mutex::new(FlightOutcome::Pending),
            ready: Condvar::new(),
        }
    }

    fn publish(&self, outcome: FlightOutcome<V>) {
        *lock(&self.outcome) = outcome;
        self.ready.notify_all();
    }

    /// `None` means the leader gave up (panicked) and the caller should retry.
    fn wait(&self) -> Option<V> {
        let mut outcome = lock(&self.outcome);
        loop {
            match &*outcome {
                FlightOutcome::Pending => {
                    outcome = self
                        .ready
                        .wait(outcome)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                FlightOutcome::Done(value) => return Some(value.clone()),
                FlightOutcome::Abandoned => return None,
            }
        }
    }
}

/// Removes the flight marker when the leader finishes, even by unwinding.
struct FlightGuard<'a, K: Eq + Hash + Clone, V: Clone> {
    cache: &'a TtlCache<K, V>,
    key: &'a K,
    flight: Arc<Flight<V>>,
    finished: bool,
}

impl<K: Eq + Hash + Clone, V: Clone> FlightGuard<'_, K, V> {
    fn finish(mut self, value: V) {
        self.flight.publish(FlightOutcome::Done(value));
        self.finished = true;
    }
}

impl<K: Eq + Hash + Clone, V: Clone> Drop for FlightGuard<'_, K, V> {
    fn drop(&mut self) {
        if !self.finished {
            self.flight.publish(FlightOutcome::Abandoned);
        }
        lock(&self.cache.flights).remove(self.key);
    }
}

/// Thread-safe TTL + LRU cache.
pub struct TtlCache<K, V> {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    state: Mutex<CacheState<K, V>>,
    flights: Mutex<HashMap<K, Arc<Flight<V>>>>,
}

impl<K, V> fmt::Debug for TtlCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TtlCache")
            .field("config", &self.config)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl<K, V> TtlCache<K, V>
where
    K: Eq + Hash + Clone + fmt::Debug,
    V: Clone,
{
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Mutex::new(CacheState {
                entries: HashMap::new(),
                recency: BTreeMap::new(),
                tick: 0,
            }),
            flights: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> CacheConfig {
        self.config
    }

    /// Fresh value for `key`, if any. Expired entries are dropped, never served.
    pub fn get(&self, key: &K) -> Option<V> {
        let now = self.clock.now();
        let mut state = lock(&self.state);
        let expired = match state.entries.get(key) {
            None => return None,
            Some(entry) => now >= entry.expires_at,
        };
        if expired {
            trace!(?key, "cache entry expired");
            state.remove(key);
            return None;
        }
        state.touch(key);
        state.entries.get(key).map(|entry| entry.value.clone())
    }

    pub fn insert(&self, key: K, value: V) {
        self.insert_for(key, value, self.config.ttl());
    }

    pub fn insert_for(&self, key: K, value: V, ttl: Duration) {
        if self.config.capacity == 0 {
            return;
        }
        let expires_at = self.clock.now() + ttl;
        let mut state = lock(&self.state);
        state.remove(&key);
        while state.entries.len() >= self.config.capacity {
            state.evict_lru();
        }
        state.tick += 1;
        let tick = state.tick;
        state.recency.insert(tick, key.clone());
        state.entries.insert(
            key,
            Entry {
                value,
                expires_at,
                last_used: tick,
            },
        );
    }

    pub fn len(&self) -> usize {
        lock(&self.state).entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut state = lock(&self.state);
        state.entries.clear();
        state.recency.clear();
    }

    /// Return the cached value or run `load` exactly once per key.
    ///
    /// Concurrent callers for a key that is already loading block until the
    /// first caller publishes its result, then receive a clone of it.
    pub fn get_or_load<F>(&self, key: K, load: F) -> V
    where
        F: FnOnce() -> (V, Admission),
    {
        loop {
            if let Some(value) = self.get(&key) {
                return value;
            }

            let (flight, leader) = {
                let mut flights = lock(&self.flights);
                // A leader may have finished between the lookup above and this lock.
                if let Some(value) = self.get(&key) {
                    return value;
                }
                match flights.get(&key) {
                    Some(flight) => (Arc::clone(flight), false),
                    None => {
                        let flight = Arc::new(Flight::new());
                        flights.insert(key.clone(), Arc::clone(&flight));
                        (flight, true)
                    }
                }
            };

            if !leader {
                trace!(?key, "joining in-flight load");
                match flight.wait() {
                    Some(value) => return value,
                    None => continue,
                }
            }

            let guard = FlightGuard {
                cache: self,
                key: &key,
                flight,
                finished: false,
            };
            let (value, admission) = load();
            match admission {
                Admission::Store => self.insert(key.clone(), value.clone()),
                Admission::StoreFor(ttl) => self.insert_for(key.clone(), value.clone(), ttl),
                Admission::Skip => {}
            }
            guard.finish(value.clone());
            return value;
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
