//! Retry composer stacking backoff policy, per-attempt timeout and breaker
//!
//! A [`ResilientCall`] owns the cross-cutting pieces of one named call path:
//! how often to retry, how long each attempt may run, and which breaker
//! guards the dependency. The operation itself is supplied per call.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::breaker::{BreakerRegistry, CircuitBreaker};
use crate::error::{ResilienceError, ResilienceResult};
use crate::timeout::try_with_timeout;

/// Backoff schedule for retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Ceiling applied to the exponential delay
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Fraction of the delay added as random jitter (0.0 disables)
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    /// Delay after the given 1-based attempt number
    ///
    /// Attempt 1 waits `initial_delay`, attempt 2 waits
    /// `initial_delay * multiplier`, and so on, capped at `max_delay` before
    /// jitter is added.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = raw.min(self.max_delay.as_millis() as f64);
        let jittered = if self.jitter > 0.0 {
            capped * (1.0 + rand::thread_rng().gen::<f64>() * self.jitter)
        } else {
            capped
        };
        Duration::from_millis(jittered as u64)
    }
}

/// Decides whether a failed attempt is worth retrying
pub type RetryPredicate = Arc<dyn Fn(&ResilienceError) -> bool + Send + Sync>;

/// Default retryability classification
///
/// Timeouts and open circuits are final: retrying into a stuck dependency
/// just holds the caller hostage. Failures whose message looks like an
/// authorization, validation or not-found problem will fail identically on
/// every attempt, so they are final too. Everything else is assumed
/// transient.
pub fn default_retry_predicate(error: &ResilienceError) -> bool {
    match error {
        ResilienceError::Timeout { .. } | ResilienceError::CircuitOpen { .. } => false,
        other => {
            let message = other.to_string().to_lowercase();
            const FINAL_MARKERS: [&str; 8] = [
                "unauthorized",
                "forbidden",
                "authentication",
                "invalid api key",
                "validation",
                "invalid request",
                "bad request",
                "not found",
            ];
            !FINAL_MARKERS.iter().any(|marker| message.contains(marker))
        }
    }
}

/// A named call path with retry, timeout and breaker applied around it
pub struct ResilientCall {
    name: String,
    policy: RetryPolicy,
    attempt_timeout: Option<Duration>,
    breakers: Option<Arc<BreakerRegistry>>,
    breaker_name: Option<String>,
    predicate: RetryPredicate,
}

impl ResilientCall {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            policy: RetryPolicy::default(),
            attempt_timeout: None,
            breakers: None,
            breaker_name: None,
            predicate: Arc::new(default_retry_predicate),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Bound each individual attempt, not the whole retry loop
    pub fn with_attempt_timeout(mut self, limit: Duration) -> Self {
        self.attempt_timeout = Some(limit);
        self
    }

    /// Guard attempts with a breaker from this registry, keyed by the call
    /// name unless overridden via [`Self::with_breaker_name`]
    pub fn with_breakers(mut self, registry: Arc<BreakerRegistry>) -> Self {
        self.breakers = Some(registry);
        self
    }

    pub fn with_breaker_name(mut self, name: impl Into<String>) -> Self {
        self.breaker_name = Some(name.into());
        self
    }

    pub fn with_predicate(mut self, predicate: RetryPredicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the operation until it succeeds, a final error occurs, or the
    /// attempt budget runs out (the last error propagates unchanged)
    pub async fn run<T, F, Fut>(&self, mut op: F) -> ResilienceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        let breaker = self
            .breakers
            .as_ref()
            .map(|registry| registry.get_or_create(self.breaker_name.as_deref().unwrap_or(&self.name)));

        let mut attempt = 0;
        loop {
            attempt += 1;
            let error = match self.attempt(breaker.as_deref(), &mut op).await {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::debug!(call = %self.name, attempt, "call recovered after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !(self.predicate)(&error) {
                tracing::debug!(call = %self.name, attempt, error = %error, "error is final, not retrying");
                return Err(error);
            }
            if attempt >= self.policy.max_attempts {
                tracing::warn!(
                    call = %self.name,
                    attempts = attempt,
                    error = %error,
                    "retry budget exhausted"
                );
                return Err(error);
            }

            let delay = self.policy.delay_for(attempt);
            tracing::debug!(
                call = %self.name,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    async fn attempt<T, F, Fut>(
        &self,
        breaker: Option<&CircuitBreaker>,
        op: &mut F,
    ) -> ResilienceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        if let Some(breaker) = breaker {
            breaker.try_acquire()?;
        }

        let result = match self.attempt_timeout {
            Some(limit) => try_with_timeout(&self.name, limit, op()).await,
            None => op().await,
        };

        if let Some(breaker) = breaker {
            match &result {
                Ok(_) => breaker.record_success(),
                Err(_) => breaker.record_failure(),
            }
        }
        result
    }

    /// Run the primary operation with full protection, invoking the fallback
    /// once if it ultimately fails
    pub async fn run_with_fallback<T, F, Fut, G, Gut>(
        &self,
        primary: F,
        fallback: G,
    ) -> ResilienceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
        G: FnOnce() -> Gut,
        Gut: Future<Output = ResilienceResult<T>>,
    {
        match self.run(primary).await {
            Ok(value) => Ok(value),
            Err(error) => {
                tracing::warn!(call = %self.name, error = %error, "primary failed, using fallback");
                fallback().await
            }
        }
    }
}

/// Serves the last good result while the dependency is down
///
/// Wraps a [`ResilientCall`]: successes refresh the cache, and a failure
/// within `ttl` of the last success is answered from the cache instead of
/// propagating.
pub struct CachedFallback<T> {
    ttl: Duration,
    slot: Mutex<Option<(Instant, T)>>,
}

impl<T: Clone> CachedFallback<T> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slot: Mutex::new(None),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Option<(Instant, T)>> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn run<F, Fut>(&self, call: &ResilientCall, op: F) -> ResilienceResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        match call.run(op).await {
            Ok(value) => {
                *self.slot() = Some((Instant::now(), value.clone()));
                Ok(value)
            }
            Err(error) => {
                let cached = {
                    let slot = self.slot();
                    slot.as_ref().and_then(|(stored_at, value)| {
                        (stored_at.elapsed() <= self.ttl).then(|| value.clone())
                    })
                };
                match cached {
                    Some(value) => {
                        tracing::warn!(
                            call = %call.name(),
                            error = %error,
                            "serving cached result inside TTL window"
                        );
                        Ok(value)
                    }
                    None => Err(error),
                }
            }
        }
    }
}
