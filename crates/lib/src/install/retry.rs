//! Bounded retry for transient registry failures.

use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::types::RetryPolicy;
use crate::registry::{BackendError, RegistryError};

/// Run `op` until it succeeds, fails with a non-retryable error, or the attempt budget is spent.
///
/// Backoff doubles after each failure, capped at `policy.max_backoff`.
pub(crate) async fn with_retry<T, F, Fut>(
  policy: &RetryPolicy,
  cancel: &CancellationToken,
  what: &str,
  mut op: F,
) -> Result<T, RegistryError>
where
  F: FnMut() -> Fut,
  Fut: Future<Output = Result<T, RegistryError>>,
{
  let max_attempts = policy.max_attempts.max(1);
  let mut backoff = policy.initial_backoff;
  let mut attempt = 1;

  loop {
    match op().await {
      Ok(value) => return Ok(value),
      Err(e) if e.is_retryable() && attempt < max_attempts => {
        warn!(operation = what, attempt, max_attempts, backoff = ?backoff, error = %e, "retrying");
        tokio::select! {
          _ = cancel.cancelled() => return Err(RegistryError::Backend(BackendError::Cancelled)),
          _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(policy.max_backoff);
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}
