//! Bounded retry wrappers for provider calls
//!
//! Only the failure kinds named here are retried. Everything else
//! propagates on the first error.

use crate::error::ProviderError;
use crate::provider::{ProviderClient, ProviderResult, RetryConfig};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempts allowed when a call fails with `Unauthorized`: one refresh, one retry
pub const AUTH_MAX_ATTEMPTS: u32 = 2;

/// Run `call`, refreshing credentials once on `Unauthorized` and backing off
/// on `RateLimited` up to `config.max_attempts` attempts.
pub async fn call_provider<T, F, Fut>(
    provider: &dyn ProviderClient,
    config: &RetryConfig,
    operation: &str,
    mut call: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
{
    let mut auth_attempts = 0u32;
    let mut rate_limited = 0u32;

    loop {
        match call().await {
            Ok(value) => return Ok(value),
            Err(ProviderError::Unauthorized(message)) => {
                auth_attempts += 1;
                if auth_attempts >= AUTH_MAX_ATTEMPTS {
                    return Err(ProviderError::Unauthorized(message));
                }
                warn!(
                    provider = provider.name(),
                    operation, "Unauthorized ({}), refreshing credentials", message
                );
                provider.refresh_credentials().await?;
            }
            Err(ProviderError::RateLimited {
                message,
                retry_after,
            }) => {
                rate_limited += 1;
                if rate_limited >= config.max_attempts {
                    return Err(ProviderError::RateLimited {
                        message,
                        retry_after,
                    });
                }
                let delay = retry_after
                    .unwrap_or_else(|| config.delay_for_attempt(rate_limited - 1))
                    .min(config.max_delay);
                warn!(
                    provider = provider.name(),
                    operation,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited ({}), backing off",
                    message
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// [`call_provider`] for describe calls: a `NotFound` answer reads as absent
pub async fn describe_provider<T, F, Fut>(
    provider: &dyn ProviderClient,
    config: &RetryConfig,
    operation: &str,
    call: F,
) -> ProviderResult<Option<T>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<Option<T>>>,
{
    match call_provider(provider, config, operation, call).await {
        Err(ProviderError::NotFound(message)) => {
            debug!(operation, "Not found ({}), treating as absent", message);
            Ok(None)
        }
        other => other,
    }
}

/// Retry `call` while `should_retry` accepts the error, at most `max_attempts` times
pub async fn retry_when<T, F, Fut, P>(
    max_attempts: u32,
    delay: Duration,
    operation: &str,
    should_retry: P,
    mut call: F,
) -> ProviderResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ProviderResult<T>>,
    P: Fn(&ProviderError) -> bool,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < max_attempts && should_retry(&e) => {
                warn!(operation, attempt, "{}, retrying", e);
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
