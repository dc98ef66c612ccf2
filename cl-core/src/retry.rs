//! # Retry Policy
//!
//! Bounded retries with linear backoff, parameterized per call site. An
//! operation is attempted at most `max_attempts` times and only errors the
//! predicate accepts are retried; exhaustion turns the last error into a
//! [`ClError::FatalRemoteError`].

use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::error::{self, ClError};

/// How often and how patiently to retry an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
  pub max_attempts: u32,
  /// Delay before the first retry.
  pub base_delay: Duration,
  /// Added to the delay for every further retry.
  pub step: Duration,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self::new(3)
  }
}

impl RetryPolicy {
  /// `max_attempts` tries with no delay in between.
  pub const fn new(max_attempts: u32) -> Self {
    Self {
      max_attempts,
      base_delay: Duration::ZERO,
      step: Duration::ZERO,
    }
  }

  pub const fn with_backoff(mut self, base_delay: Duration, step: Duration) -> Self {
    self.base_delay = base_delay;
    self.step = step;
    self
  }

  /// Calls to the try-job scheduling service: 3 attempts, 0.5s then +1.5s.
  pub const fn buildbucket() -> Self {
    Self::new(3).with_backoff(Duration::from_millis(500), Duration::from_millis(1500))
  }

  /// Review server requests that hit a 5xx: 3 attempts, 1s then +1s.
  pub const fn review_server() -> Self {
    Self::new(3).with_backoff(Duration::from_secs(1), Duration::from_secs(1))
  }

  /// git push/fetch during landing: 3 attempts, no delay.
  pub const fn git_push() -> Self {
    Self::new(3)
  }

  /// Delay before retry number `retry` (0-based).
  pub fn delay_for(&self, retry: u32) -> Duration {
    self.base_delay + self.step * retry
  }

  /// Run `op` until it succeeds, fails with a non-retryable error, or the
  /// attempts run out. `op` receives the 0-based attempt number.
  pub fn run<T>(
    &self,
    operation: &str,
    mut op: impl FnMut(u32) -> Result<T>,
    retryable: impl Fn(&anyhow::Error) -> bool,
  ) -> Result<T> {
    let mut attempt = 0;
    loop {
      match op(attempt) {
        Ok(value) => return Ok(value),
        Err(err) => {
          let delay = self.next_step(operation, attempt, err, &retryable)?;
          if !delay.is_zero() {
            std::thread::sleep(delay);
          }
          attempt += 1;
        }
      }
    }
  }

  /// Async counterpart of [`RetryPolicy::run`], sleeping on the tokio timer.
  pub async fn run_async<T, F, Fut>(&self, operation: &str, mut op: F, retryable: impl Fn(&anyhow::Error) -> bool) -> Result<T>
  where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
  {
    let mut attempt = 0;
    loop {
      match op(attempt).await {
        Ok(value) => return Ok(value),
        Err(err) => {
          let delay = self.next_step(operation, attempt, err, &retryable)?;
          if !delay.is_zero() {
            tokio::time::sleep(delay).await;
          }
          attempt += 1;
        }
      }
    }
  }

  /// Decide what follows a failed attempt: `Err` to give up, otherwise the
  /// delay before the next attempt.
  fn next_step(
    &self,
    operation: &str,
    attempt: u32,
    err: anyhow::Error,
    retryable: &impl Fn(&anyhow::Error) -> bool,
  ) -> Result<Duration> {
    if !retryable(&err) {
      debug!("{operation}: non-retryable failure on attempt {}", attempt + 1);
      return Err(err);
    }
    let attempts_left = self.max_attempts.saturating_sub(attempt + 1);
    if attempts_left == 0 {
      return Err(
        ClError::fatal_remote(format!(
          "{operation} failed after {} attempts: {err:#}",
          self.max_attempts
        ))
        .into(),
      );
    }
    warn!("Transient failure when {operation}: {err:#}. Retrying, {attempts_left} attempts left...");
    Ok(self.delay_for(attempt))
  }
}

/// Retry predicate accepting errors classified as transient.
pub fn transient_only(err: &anyhow::Error) -> bool {
  error::is_transient(err)
}
