//! Per-principal resolution cache
//!
//! Entries live in a [`DashMap`] so readers of different principals never
//! contend on one lock. Staleness is guarded by a global epoch: a reader takes
//! a [`CacheTicket`] before it reads the store and may only publish its result
//! if no invalidation happened since. The epoch check and the insert run under
//! the entry's shard lock, and invalidation bumps the epoch before removing the
//! entry, so a result computed before a mutation can never outlive it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::resolver::ResolvedGrants;
use crate::types::Principal;

/// Cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of principals kept in the cache
    pub capacity: usize,

    /// Optional time-to-live, for stores that other processes also write to
    pub ttl: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: None,
        }
    }
}

/// Proof of the cache epoch observed before a store read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheTicket(u64);

/// Cached entry with insertion time
#[derive(Clone)]
struct CachedEntry {
    grants: Arc<ResolvedGrants>,
    cached_at: Instant,
}

impl CachedEntry {
    fn new(grants: Arc<ResolvedGrants>) -> Self {
        Self {
            grants,
            cached_at: Instant::now(),
        }
    }

    fn is_expired(&self, ttl: Option<Duration>) -> bool {
        ttl.is_some_and(|ttl| self.cached_at.elapsed() > ttl)
    }
}

/// Memoized [`ResolvedGrants`] keyed by principal
pub struct AbilityCache {
    entries: DashMap<Principal, CachedEntry>,
    epoch: AtomicU64,
    config: CacheConfig,
    hits: AtomicU64,
    misses: AtomicU64,
    expirations: AtomicU64,
    invalidations: AtomicU64,
}

impl AbilityCache {
    /// Create an empty cache
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            epoch: AtomicU64::new(0),
            config,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    /// Observe the current epoch; take this before reading the store
    pub fn ticket(&self) -> CacheTicket {
        CacheTicket(self.epoch.load(Ordering::SeqCst))
    }

    /// Get the cached grants of `principal`
    pub fn get(&self, principal: &Principal) -> Option<Arc<ResolvedGrants>> {
        if let Some(entry) = self.entries.get(principal) {
            if entry.is_expired(self.config.ttl) {
                drop(entry);
                self.entries.remove(principal);
                self.expirations.fetch_add(1, Ordering::Relaxed);
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }

            self.hits.fetch_add(1, Ordering::Relaxed);
            return Some(Arc::clone(&entry.grants));
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Store grants resolved under `ticket`
    ///
    /// Returns false (and stores nothing) if any invalidation happened after
    /// the ticket was taken, or if the cache is disabled by zero capacity.
    pub fn put(&self, principal: &Principal, ticket: CacheTicket, grants: Arc<ResolvedGrants>) -> bool {
        if self.config.capacity == 0 {
            return false;
        }

        if !self.entries.contains_key(principal) && self.entries.len() >= self.config.capacity {
            self.evict_some();
        }

        match self.entries.entry(principal.clone()) {
            Entry::Occupied(mut occupied) => {
                if self.epoch.load(Ordering::SeqCst) != ticket.0 {
                    return false;
                }
                occupied.insert(CachedEntry::new(grants));
            }
            Entry::Vacant(vacant) => {
                if self.epoch.load(Ordering::SeqCst) != ticket.0 {
                    return false;
                }
                vacant.insert(CachedEntry::new(grants));
            }
        }
        true
    }

    /// Drop the entry of `principal` and void outstanding tickets
    pub fn invalidate(&self, principal: &Principal) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.remove(principal);
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Drop every entry and void outstanding tickets
    pub fn clear(&self) {
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.entries.clear();
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Whether an entry for `principal` is present
    pub fn contains(&self, principal: &Principal) -> bool {
        self.entries.contains_key(principal)
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expirations: self.expirations.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
            entries: self.entries.len(),
            max_entries: self.config.capacity,
        }
    }

    /// Evict roughly a tenth of the entries
    fn evict_some(&self) {
        let to_remove = (self.config.capacity / 10).max(1);
        let victims: Vec<Principal> = self
            .entries
            .iter()
            .take(to_remove)
            .map(|entry| entry.key().clone())
            .collect();

        for principal in victims {
            self.entries.remove(&principal);
        }
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub expirations: u64,
    pub invalidations: u64,
    pub entries: usize,
    pub max_entries: usize,
}

impl CacheStats {
    /// Calculate cache hit rate
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
