//! Exponential backoff for retryable provider failures.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::RetryConfig;
use crate::error::ProviderError;

use super::ProviderKind;

/// Upper bound on any configured delay (one day).
const MAX_DELAY_SECS: f64 = 86_400.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub enabled: bool,
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub exponential_base: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        let initial_delay = Duration::from_secs_f64(config.initial_delay.clamp(0.0, MAX_DELAY_SECS));
        let max_delay =
            Duration::from_secs_f64(config.max_delay.clamp(0.0, MAX_DELAY_SECS)).max(initial_delay);
        Self {
            enabled: config.enabled,
            max_retries: config.max_retries,
            initial_delay,
            max_delay,
            exponential_base: config.exponential_base.max(1.0),
        }
    }

    /// Policy that makes exactly one attempt.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Total number of attempts, first call included.
    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }

    /// Delay before the `retry`-th retry (1-based), raised to the vendor's
    /// retry-after when given and capped at `max_delay`.
    pub fn delay_for(&self, retry: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = retry.saturating_sub(1).min(63) as i32;
        let secs = self.initial_delay.as_secs_f64() * self.exponential_base.powi(exponent);
        let backoff = Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()).max(0.0));
        match retry_after {
            Some(hint) => backoff.max(hint).min(self.max_delay),
            None => backoff,
        }
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, provider: ProviderKind, mut op: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 1_u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !error.is_retryable() || attempt >= max_attempts {
                        return Err(error);
                    }

                    let delay = self.delay_for(attempt, error.retry_after());
                    warn!(
                        provider = %provider,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying provider call after transient failure"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn instant_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            enabled: true,
            max_retries,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            exponential_base: 2.0,
        }
    }

    fn quota() -> ProviderError {
        ProviderError::Quota {
            provider: ProviderKind::AnthropicCompatible,
            message: "slow down".into(),
            retry_after: None,
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy {
            enabled: true,
            max_retries: 5,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            exponential_base: 2.0,
        };
        assert_eq!(policy.delay_for(1, None), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2, None), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3, None), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4, None), Duration::from_secs(5));
        assert_eq!(policy.delay_for(1, Some(Duration::from_secs(3))), Duration::from_secs(3));
        assert_eq!(policy.delay_for(1, Some(Duration::from_secs(30))), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_retryable_errors_use_every_attempt() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = instant_policy(3)
            .run(ProviderKind::AnthropicCompatible, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(quota())
            })
            .await;
        assert_eq!(result.unwrap_err(), quota());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_non_retryable_error_surfaces_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = instant_policy(3)
            .run(ProviderKind::OpenAiCompatible, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProviderError::Auth {
                    provider: ProviderKind::OpenAiCompatible,
                    message: "bad key".into(),
                })
            })
            .await;
        assert!(matches!(result, Err(ProviderError::Auth { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = instant_policy(2)
            .run(ProviderKind::ZaiCodingPlan, || async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(ProviderError::Transport {
                        provider: ProviderKind::ZaiCodingPlan,
                        message: "reset".into(),
                    })
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_disabled_policy_makes_one_attempt() {
        assert_eq!(RetryPolicy::disabled().max_attempts(), 1);
        assert_eq!(instant_policy(3).max_attempts(), 4);
    }
}
