use serde::{Deserialize, Serialize};

/// Token bucket parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
  /// Sustained requests per second.
  pub qps: f64,
  /// Requests allowed in a single burst.
  pub burst: u32,
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    Self { qps: 10.0, burst: 20 }
  }
}
