//! Bounded exponential backoff around fallible async operations.
//!
//! Imports only from `crate::domain`.

use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use tracing::warn;

use crate::domain::error::{ConfigurationError, EngineError};
use crate::domain::workflow::RetryPolicy;

/// Upper bound of the random delay added to every backoff.
const MAX_JITTER: Duration = Duration::from_millis(50);

/// The typed engine error somewhere in `err`'s chain, if any.
#[must_use]
pub fn engine_error(err: &anyhow::Error) -> Option<&EngineError> {
    err.chain().find_map(|e| e.downcast_ref::<EngineError>())
}

/// True when the chain holds a transient engine error.
#[must_use]
pub fn is_transient(err: &anyhow::Error) -> bool {
    engine_error(err).is_some_and(EngineError::is_transient)
}

/// True when the chain holds a configuration error. Those are never retried.
#[must_use]
pub fn is_configuration_error(err: &anyhow::Error) -> bool {
    err.chain()
        .any(|e| e.downcast_ref::<ConfigurationError>().is_some())
}

/// Retry `op` while it fails with a transient engine error.
///
/// # Errors
///
/// Returns the first non-transient error, or the last error once
/// `policy.max_attempts` is exhausted.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &str, op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_when(policy, label, is_transient, op)
        .await
        .map_err(|(err, _)| err)
}

/// Retry `op` while `retryable` accepts its error.
///
/// On failure returns the final error together with the number of attempts
/// made.
///
/// # Errors
///
/// Returns the first error `retryable` rejects, or the last error once
/// `policy.max_attempts` is exhausted.
pub async fn retry_when<T, F, Fut, P>(
    policy: &RetryPolicy,
    label: &str,
    retryable: P,
    mut op: F,
) -> std::result::Result<T, (anyhow::Error, u32)>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    P: Fn(&anyhow::Error) -> bool,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if retryable(&err) && policy.allows_another(attempts) => {
                let delay = policy.delay_for(attempts) + jitter();
                warn!(
                    op = label,
                    attempt = attempts,
                    max_attempts = policy.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %format!("{err:#}"),
                    "retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err((err, attempts)),
        }
    }
}

/// Random delay in `0..MAX_JITTER` so concurrent retries do not align.
fn jitter() -> Duration {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let mut hasher = RandomState::new().build_hasher();
    hasher.write_u128(
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or(0),
    );
    let max = u64::try_from(MAX_JITTER.as_millis()).unwrap_or(u64::MAX);
    Duration::from_millis(hasher.finish() % max.max(1))
}
