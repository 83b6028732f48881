use std::collections::BTreeMap;

use fanout_core::{CompactArray, Phase};
use serde::{Deserialize, Serialize};

/// Count of sub-jobs per phase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArraySummary(BTreeMap<Phase, u64>);

impl ArraySummary {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn inc(&mut self, phase: Phase) {
    *self.0.entry(phase).or_insert(0) += 1;
  }

  pub fn count(&self, phase: Phase) -> u64 {
    self.0.get(&phase).copied().unwrap_or(0)
  }

  pub fn total(&self) -> u64 {
    self.0.values().sum()
  }

  pub fn iter(&self) -> impl Iterator<Item = (Phase, u64)> + '_ {
    self.0.iter().map(|(phase, count)| (*phase, *count))
  }

  /// Changes whenever any sub-job moves to a later phase.
  pub fn version(&self) -> u32 {
    self
      .iter()
      .map(|(phase, count)| u32::from(phase.ordinal()).saturating_mul(count as u32))
      .fold(0u32, u32::saturating_add)
  }
}

/// Aggregate and per-index view of an array's sub-jobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayStatus {
  pub summary: ArraySummary,
  /// Phase ordinal per compacted index.
  pub detailed: CompactArray,
}

impl ArrayStatus {
  /// Status for `len` sub-jobs. The detailed array starts zeroed
  /// (`Undefined`) and is wide enough to hold any phase ordinal.
  pub fn new(len: usize) -> Self {
    Self {
      summary: ArraySummary::new(),
      detailed: CompactArray::new(len, Phase::PermanentFailure.ordinal().into()),
    }
  }

  pub fn phase_at(&self, index: usize) -> Phase {
    Phase::from_ordinal(self.detailed.get(index))
  }
}
