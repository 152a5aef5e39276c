//! Memoized functions.
//!
//! The cache is unbounded: entries live as long as the [`Memoized`] value or
//! until [`Memoized::clear`].

use super::options::PipelineConfig;
use super::step::{Step, StepValue};
use dashmap::DashMap;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A cache key derived from a value's JSON form.
///
/// Lets values that are not `Hash + Eq` (floats, nested maps) key a
/// [`Memoized`] cache. Map keys are sorted before hashing, so equal values
/// give equal keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StructuralKey(String);

impl StructuralKey {
    /// Derives the key for `value`.
    pub fn of<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        let canonical = serde_json::to_vec(&serde_json::to_value(value)?)?;
        Ok(Self(hex::encode(Sha256::digest(&canonical))))
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Cache statistics, collected when [`PipelineConfig::collect_stats`] is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemoStats {
    /// Calls answered from the cache.
    pub hits: u64,
    /// Calls that ran the function.
    pub misses: u64,
    /// Entries currently cached.
    pub entries: usize,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
}

/// A function whose successful results are cached by argument.
pub struct Memoized<K, V, F> {
    func: F,
    cache: DashMap<K, V>,
    counters: Option<Counters>,
}

/// Wraps `func` in an unbounded cache.
///
/// Only `Ok` results are cached; a failing call runs again next time.
pub fn memoize<K, V, F>(func: F, config: &PipelineConfig) -> Memoized<K, V, F>
where
    K: Hash + Eq + Clone,
    V: Clone,
    F: Fn(K) -> anyhow::Result<V>,
{
    Memoized {
        func,
        cache: DashMap::new(),
        counters: config.collect_stats.then(Counters::default),
    }
}

impl<K, V, F> Memoized<K, V, F>
where
    K: Hash + Eq + Clone,
    V: Clone,
    F: Fn(K) -> anyhow::Result<V>,
{
    /// Returns the cached result for `key`, computing it on a miss.
    pub fn call(&self, key: K) -> anyhow::Result<V> {
        if let Some(value) = self.cache.get(&key) {
            if let Some(counters) = &self.counters {
                counters.hits.fetch_add(1, Ordering::Relaxed);
            }
            return Ok(value.clone());
        }

        if let Some(counters) = &self.counters {
            counters.misses.fetch_add(1, Ordering::Relaxed);
        }
        let value = (self.func)(key.clone())?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }

    /// Drops every cached entry.
    pub fn clear(&self) {
        self.cache.clear();
    }

    /// Returns the number of cached entries.
    pub fn len(&self) -> usize {
        self.cache.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Returns statistics, or `None` when they are not being collected.
    pub fn stats(&self) -> Option<MemoStats> {
        self.counters.as_ref().map(|counters| MemoStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            entries: self.cache.len(),
        })
    }
}

impl<K, V, F> Memoized<K, V, F>
where
    K: StepValue + Hash + Eq + Sync,
    V: StepValue + Sync,
    F: Fn(K) -> anyhow::Result<V> + Send + Sync + 'static,
{
    /// Turns the shared function into a pipeline step.
    pub fn into_step(self: Arc<Self>) -> Step<K, V> {
        Step::new(move |key| self.call(key))
    }
}

impl<K, V, F> std::fmt::Debug for Memoized<K, V, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Memoized")
            .field("collect_stats", &self.counters.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::pipe;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_second_call_hits_cache() {
        let runs = AtomicUsize::new(0);
        let square = memoize(
            |x: u64| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(x * x)
            },
            &PipelineConfig::new().with_collect_stats(true),
        );

        assert_eq!(square.call(4).unwrap(), 16);
        assert_eq!(square.call(4).unwrap(), 16);
        assert_eq!(square.call(5).unwrap(), 25);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(
            square.stats(),
            Some(MemoStats {
                hits: 1,
                misses: 2,
                entries: 2
            })
        );

        square.clear();
        assert!(square.is_empty());
    }

    #[test]
    fn test_stats_off_by_default() {
        let identity = memoize(|x: u8| Ok(x), &PipelineConfig::default());
        identity.call(1).unwrap();
        assert_eq!(identity.stats(), None);
        assert_eq!(identity.len(), 1);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let runs = AtomicUsize::new(0);
        let flaky = memoize(
            |x: i32| {
                if runs.fetch_add(1, Ordering::SeqCst) == 0 {
                    anyhow::bail!("first call fails");
                }
                Ok(x)
            },
            &PipelineConfig::default(),
        );

        assert!(flaky.call(1).is_err());
        assert_eq!(flaky.call(1).unwrap(), 1);
        assert_eq!(flaky.len(), 1);
    }

    #[test]
    fn test_structural_key_ignores_map_order() {
        let mut a = HashMap::new();
        a.insert("x", 1.5);
        a.insert("y", 2.5);
        let mut b = HashMap::new();
        b.insert("y", 2.5);
        b.insert("x", 1.5);

        let key_a = StructuralKey::of(&a).unwrap();
        assert_eq!(key_a, StructuralKey::of(&b).unwrap());
        assert_eq!(key_a.as_str().len(), 64);
        assert_ne!(key_a, StructuralKey::of(&[1.5, 2.5]).unwrap());
    }

    #[test]
    fn test_memoized_step_in_pipeline() {
        let memo = Arc::new(memoize(
            |s: String| Ok(s.len().to_string()),
            &PipelineConfig::new().with_collect_stats(true),
        ));
        let pipeline = pipe([Arc::clone(&memo).into_step()]).unwrap();

        assert_eq!(pipeline.run("abc".to_string()).unwrap(), "3");
        assert_eq!(pipeline.run("abc".to_string()).unwrap(), "3");
        assert_eq!(memo.stats().map(|stats| stats.hits), Some(1));
    }
}
