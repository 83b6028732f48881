use serde::{Deserialize, Serialize};

/// Phase of a single execution as reported by a backend.
///
/// The discriminants are stable: they are packed into compact arrays and
/// summed into phase versions, so new phases must be appended.
#[derive(
  Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Phase {
  #[default]
  Undefined = 0,
  NotReady = 1,
  WaitingForResources = 2,
  Queued = 3,
  Initializing = 4,
  Running = 5,
  Success = 6,
  RetryableFailure = 7,
  PermanentFailure = 8,
}

impl Phase {
  /// All phases in ordinal order.
  pub const ALL: [Phase; 9] = [
    Phase::Undefined,
    Phase::NotReady,
    Phase::WaitingForResources,
    Phase::Queued,
    Phase::Initializing,
    Phase::Running,
    Phase::Success,
    Phase::RetryableFailure,
    Phase::PermanentFailure,
  ];

  pub fn ordinal(self) -> u8 {
    self as u8
  }

  /// Inverse of [`Phase::ordinal`]. Unknown ordinals map to `Undefined`.
  pub fn from_ordinal(ordinal: u64) -> Self {
    Self::ALL
      .get(ordinal as usize)
      .copied()
      .unwrap_or(Phase::Undefined)
  }

  pub fn is_terminal(self) -> bool {
    matches!(
      self,
      Phase::Success | Phase::RetryableFailure | Phase::PermanentFailure
    )
  }

  pub fn is_success(self) -> bool {
    self == Phase::Success
  }

  pub fn is_failure(self) -> bool {
    matches!(self, Phase::RetryableFailure | Phase::PermanentFailure)
  }

  pub fn is_waiting_for_resources(self) -> bool {
    self == Phase::WaitingForResources
  }
}

impl std::fmt::Display for Phase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    std::fmt::Debug::fmt(self, f)
  }
}
