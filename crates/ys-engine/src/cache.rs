//! Cache for unscaled aggregation results.
//!
//! Keys are structured (dataset, selection, weight, variable, binning), not
//! sanitized strings, so two requests hit the same entry exactly when every
//! field compares equal. Cached values are always *unscaled*: scale factors
//! are applied by the caller after retrieval, so the same entry serves
//! requests at any scale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use ys_core::{Distribution, Result, ValueWithError};

/// Bin edges hashed by their `f64` bit patterns, so edges compare exactly
/// (no epsilon) and NaN edges never alias distinct binnings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BinningSignature(Vec<u64>);

impl BinningSignature {
    /// Signature of a concrete edge list.
    pub fn from_edges(edges: &[f64]) -> Self {
        Self(edges.iter().map(|e| e.to_bits()).collect())
    }
}

/// Identity of one unscaled aggregation.
///
/// `variable` and `binning` are `None` for event-count entries and set for
/// distribution entries.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Dataset identifier of the backing store.
    pub dataset: String,
    /// Canonical selection name.
    pub selection: String,
    /// Full weight expression text.
    pub weight: String,
    /// Variable expression, for distribution entries.
    pub variable: Option<String>,
    /// Binning signature, for distribution entries.
    pub binning: Option<BinningSignature>,
}

impl CacheKey {
    /// Key for a cached event count.
    pub fn count(dataset: &str, selection: &str, weight: &str) -> Self {
        Self {
            dataset: dataset.to_string(),
            selection: selection.to_string(),
            weight: weight.to_string(),
            variable: None,
            binning: None,
        }
    }

    /// Key for a cached distribution.
    pub fn distribution(
        dataset: &str,
        selection: &str,
        weight: &str,
        variable: &str,
        bin_edges: &[f64],
    ) -> Self {
        Self {
            dataset: dataset.to_string(),
            selection: selection.to_string(),
            weight: weight.to_string(),
            variable: Some(variable.to_string()),
            binning: Some(BinningSignature::from_edges(bin_edges)),
        }
    }
}

/// Hit/miss counters, readable at any time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that ran the underlying aggregation.
    pub misses: u64,
}

impl CacheStats {
    /// Fraction of lookups answered from the cache (0 when none yet).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Shared cache of unscaled counts and distributions.
///
/// An instance is injected into every estimator that should share results;
/// there is no global cache. Writes are idempotent (a racing second insert
/// for the same key is dropped) and a failed aggregation never writes.
#[derive(Debug, Default)]
pub struct AggregationCache {
    counts: RwLock<HashMap<CacheKey, ValueWithError>>,
    distributions: RwLock<HashMap<CacheKey, Distribution>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AggregationCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a count, running `aggregate` on a miss. The result of a
    /// successful aggregation is stored before being returned; an `Err` is
    /// propagated without touching the cache.
    pub fn count_or_insert_with<F>(&self, key: &CacheKey, aggregate: F) -> Result<ValueWithError>
    where
        F: FnOnce() -> Result<ValueWithError>,
    {
        if let Some(hit) = self.counts.read().ok().and_then(|m| m.get(key).copied()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("cache hit (count): {} | {}", key.dataset, key.selection);
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        log::trace!("cache miss (count): {} | {}", key.dataset, key.selection);
        let value = aggregate()?;
        if let Ok(mut map) = self.counts.write() {
            map.entry(key.clone()).or_insert(value);
        }
        Ok(value)
    }

    /// Look up a distribution, running `aggregate` on a miss. Same insert
    /// and failure behavior as [`count_or_insert_with`].
    ///
    /// [`count_or_insert_with`]: AggregationCache::count_or_insert_with
    pub fn distribution_or_insert_with<F>(&self, key: &CacheKey, aggregate: F) -> Result<Distribution>
    where
        F: FnOnce() -> Result<Distribution>,
    {
        if let Some(hit) = self.distributions.read().ok().and_then(|m| m.get(key).cloned()) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            log::trace!("cache hit (dist): {} | {}", key.dataset, key.selection);
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        log::trace!("cache miss (dist): {} | {}", key.dataset, key.selection);
        let dist = aggregate()?;
        if let Ok(mut map) = self.distributions.write() {
            map.entry(key.clone()).or_insert_with(|| dist.clone());
        }
        Ok(dist)
    }

    /// Number of stored entries (counts + distributions).
    pub fn len(&self) -> usize {
        let counts = self.counts.read().map(|m| m.len()).unwrap_or(0);
        let dists = self.distributions.read().map(|m| m.len()).unwrap_or(0);
        counts + dists
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    /// Drop every entry. Counters are kept.
    pub fn clear(&self) {
        if let Ok(mut map) = self.counts.write() {
            map.clear();
        }
        if let Ok(mut map) = self.distributions.write() {
            map.clear();
        }
    }
}
