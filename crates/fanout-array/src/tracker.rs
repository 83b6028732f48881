//! Cache-aware sizing.
//!
//! Backends number sub-executions densely from zero. When some original
//! indices are already cached, the submitted array is smaller, and each
//! sub-execution recovers its original index through `index_lookup`:
//! `index_lookup[compacted] = original`.

use fanout_core::BitSet;

/// Sizing derived from a set of catalog hits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheTracking {
  /// Original indices that must run (and be cached afterwards).
  pub indexes_to_cache: BitSet,
  pub execution_array_size: u64,
  /// Original index for each compacted position, strictly increasing.
  pub index_lookup: Vec<u64>,
}

impl CacheTracking {
  /// `hits` must have length `original_size`; bits beyond it are ignored.
  pub fn from_hits(original_size: usize, hits: &BitSet) -> Self {
    let mut indexes_to_cache = BitSet::new(original_size);
    for index in 0..original_size {
      if !hits.is_set(index) {
        indexes_to_cache.set(index);
      }
    }
    Self::from_indexes_to_cache(indexes_to_cache)
  }

  /// Nothing cached: every index runs, with the identity mapping.
  pub fn no_hits(original_size: usize) -> Self {
    Self::from_indexes_to_cache(BitSet::full(original_size))
  }

  pub fn from_indexes_to_cache(indexes_to_cache: BitSet) -> Self {
    let index_lookup = index_lookup(&indexes_to_cache);
    Self {
      execution_array_size: index_lookup.len() as u64,
      indexes_to_cache,
      index_lookup,
    }
  }

  pub fn all_cached(&self) -> bool {
    self.execution_array_size == 0
  }
}

/// Original index of every compacted position, in order.
pub fn index_lookup(indexes_to_cache: &BitSet) -> Vec<u64> {
  indexes_to_cache.iter_set().map(|index| index as u64).collect()
}

/// Original index that compacted position `compacted` stands for.
pub fn original_index(indexes_to_cache: &BitSet, compacted: usize) -> Option<usize> {
  indexes_to_cache.iter_set().nth(compacted)
}
