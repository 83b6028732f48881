//! Rate limiting for calls leaving the process, on top of `governor`.

use std::num::NonZeroU32;
use std::time::Duration;

use fanout_config::RateLimitConfig;
use governor::{DefaultDirectRateLimiter, Quota};
use tracing::debug;

/// Allows `qps` calls per second on average, with bursts of up to `burst`.
pub struct RateLimiter {
  name: String,
  qps: f64,
  burst: NonZeroU32,
  limiter: DefaultDirectRateLimiter,
}

impl RateLimiter {
  /// Create a limiter with its full burst available. Values that do not
  /// describe a usable rate fall back to one call per second.
  pub fn new(name: impl Into<String>, qps: f64, burst: u32) -> Self {
    let qps = if qps > 0.0 && qps.is_finite() { qps } else { 1.0 };
    let burst = NonZeroU32::new(burst).unwrap_or(NonZeroU32::MIN);
    let quota = Duration::try_from_secs_f64(1.0 / qps)
      .ok()
      .and_then(Quota::with_period)
      .unwrap_or_else(|| Quota::per_second(NonZeroU32::MIN))
      .allow_burst(burst);

    Self {
      name: name.into(),
      qps,
      burst,
      limiter: governor::RateLimiter::direct(quota),
    }
  }

  pub fn from_config(name: impl Into<String>, config: &RateLimitConfig) -> Self {
    Self::new(name, config.qps, config.burst)
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  /// Take a permit without waiting.
  pub fn try_acquire(&self) -> bool {
    self.limiter.check().is_ok()
  }

  /// Wait until a permit is available and take it.
  pub async fn acquire(&self) {
    if self.try_acquire() {
      return;
    }
    debug!(limiter = %self.name, qps = self.qps, "rate_limited");
    self.limiter.until_ready().await;
  }
}

impl std::fmt::Debug for RateLimiter {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("RateLimiter")
      .field("name", &self.name)
      .field("qps", &self.qps)
      .field("burst", &self.burst)
      .finish()
  }
}
