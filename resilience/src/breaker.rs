//! Circuit breakers keyed by dependency name
//!
//! A breaker sits in front of calls to one dependency and trips after a run
//! of consecutive failures, rejecting further calls until a reset timeout has
//! passed. The first call after the timeout is let through as a probe; enough
//! probe successes close the circuit again, a single probe failure reopens it.
//!
//! State transitions:
//! - Closed: calls flow; `failure_threshold` consecutive failures → Open
//! - Open: calls rejected; after `reset_timeout` the next admission → HalfOpen
//! - HalfOpen: calls flow; `success_threshold` successes → Closed,
//!   any failure → Open

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::error::{ResilienceError, ResilienceResult};

/// Tuning knobs for one circuit breaker
#[derive(Debug, Clone)]
pub struct BreakerConfig {
    /// Consecutive failures in the closed state that trip the circuit
    pub failure_threshold: u32,
    /// How long the circuit stays open before admitting a probe
    pub reset_timeout: Duration,
    /// Probe successes required to close the circuit again
    pub success_threshold: u32,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
        }
    }
}

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Point-in-time breaker counters for logs and stats queries
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub total_calls: u64,
    pub total_successes: u64,
    pub total_failures: u64,
    pub rejected_calls: u64,
    pub opened_count: u64,
    pub last_failure_ms_ago: Option<u64>,
}

/// Called on every state change with (name, from, to)
pub type TransitionHook = Arc<dyn Fn(&str, CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    total_calls: u64,
    total_successes: u64,
    total_failures: u64,
    rejected_calls: u64,
    opened_count: u64,
    opened_at: Option<Instant>,
    last_failure_at: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            consecutive_successes: 0,
            total_calls: 0,
            total_successes: 0,
            total_failures: 0,
            rejected_calls: 0,
            opened_count: 0,
            opened_at: None,
            last_failure_at: None,
        }
    }
}

/// Circuit breaker protecting calls to one named dependency
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
    on_transition: Option<TransitionHook>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner::new()),
            on_transition: None,
        }
    }

    pub fn with_transition_hook(mut self, hook: TransitionHook) -> Self {
        self.on_transition = Some(hook);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn fire_transition(&self, from: CircuitState, to: CircuitState) {
        tracing::debug!(breaker = %self.name, %from, %to, "circuit state change");
        if let Some(hook) = &self.on_transition {
            hook(&self.name, from, to);
        }
    }

    /// Check whether a call may proceed right now
    ///
    /// In the open state this is where the reset timeout is evaluated: once
    /// it has elapsed the circuit moves to half-open and this admission is
    /// allowed through as the probe.
    pub fn try_acquire(&self) -> ResilienceResult<()> {
        let transition = {
            let mut inner = self.lock();
            match inner.state {
                CircuitState::Closed | CircuitState::HalfOpen => None,
                CircuitState::Open => {
                    let elapsed = inner.opened_at.map(|at| at.elapsed());
                    match elapsed {
                        Some(elapsed) if elapsed >= self.config.reset_timeout => {
                            inner.state = CircuitState::HalfOpen;
                            inner.consecutive_successes = 0;
                            Some((CircuitState::Open, CircuitState::HalfOpen))
                        }
                        _ => {
                            inner.rejected_calls += 1;
                            let stats = self.stats_locked(&inner);
                            return Err(ResilienceError::CircuitOpen {
                                name: self.name.clone(),
                                stats,
                            });
                        }
                    }
                }
            }
        };

        if let Some((from, to)) = transition {
            self.fire_transition(from, to);
        }
        Ok(())
    }

    /// Record a successful call against this breaker
    pub fn record_success(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.total_calls += 1;
            inner.total_successes += 1;
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures = 0;
                    inner.consecutive_successes += 1;
                    None
                }
                CircuitState::HalfOpen => {
                    inner.consecutive_successes += 1;
                    if inner.consecutive_successes >= self.config.success_threshold {
                        inner.state = CircuitState::Closed;
                        inner.consecutive_failures = 0;
                        inner.opened_at = None;
                        Some((CircuitState::HalfOpen, CircuitState::Closed))
                    } else {
                        None
                    }
                }
                // Late completion from a call admitted before the trip
                CircuitState::Open => None,
            }
        };

        if let Some((from, to)) = transition {
            self.fire_transition(from, to);
        }
    }

    /// Record a failed call against this breaker
    pub fn record_failure(&self) {
        let transition = {
            let mut inner = self.lock();
            inner.total_calls += 1;
            inner.total_failures += 1;
            inner.last_failure_at = Some(Instant::now());
            match inner.state {
                CircuitState::Closed => {
                    inner.consecutive_failures += 1;
                    inner.consecutive_successes = 0;
                    if inner.consecutive_failures >= self.config.failure_threshold {
                        inner.state = CircuitState::Open;
                        inner.opened_at = Some(Instant::now());
                        inner.opened_count += 1;
                        Some((CircuitState::Closed, CircuitState::Open))
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    inner.opened_count += 1;
                    inner.consecutive_failures += 1;
                    inner.consecutive_successes = 0;
                    Some((CircuitState::HalfOpen, CircuitState::Open))
                }
                CircuitState::Open => None,
            }
        };

        if let Some((from, to)) = transition {
            self.fire_transition(from, to);
        }
    }

    /// Run an operation through this breaker, recording its outcome
    pub async fn call<F, Fut, T>(&self, op: F) -> ResilienceResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = ResilienceResult<T>>,
    {
        self.try_acquire()?;
        let result = op().await;
        match &result {
            Ok(_) => self.record_success(),
            Err(_) => self.record_failure(),
        }
        result
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        self.stats_locked(&inner)
    }

    fn stats_locked(&self, inner: &BreakerInner) -> BreakerStats {
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            consecutive_successes: inner.consecutive_successes,
            total_calls: inner.total_calls,
            total_successes: inner.total_successes,
            total_failures: inner.total_failures,
            rejected_calls: inner.rejected_calls,
            opened_count: inner.opened_count,
            last_failure_ms_ago: inner.last_failure_at.map(|at| at.elapsed().as_millis() as u64),
        }
    }

    /// Return to a pristine closed state, dropping all counters
    pub fn reset(&self) {
        let transition = {
            let mut inner = self.lock();
            let from = inner.state;
            *inner = BreakerInner::new();
            if from != CircuitState::Closed {
                Some((from, CircuitState::Closed))
            } else {
                None
            }
        };

        if let Some((from, to)) = transition {
            self.fire_transition(from, to);
        }
    }
}

/// Explicit collection of breakers keyed by dependency name
///
/// Owned by whoever composes the call paths rather than hidden in a global,
/// so tests can build a fresh registry and reset it at will.
pub struct BreakerRegistry {
    default_config: BreakerConfig,
    on_transition: Option<TransitionHook>,
    breakers: Mutex<HashMap<String, Arc<CircuitBreaker>>>,
}

impl BreakerRegistry {
    pub fn new(default_config: BreakerConfig) -> Self {
        Self {
            default_config,
            on_transition: None,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    /// Install a hook applied to every breaker created after this call
    pub fn with_transition_hook(mut self, hook: TransitionHook) -> Self {
        self.on_transition = Some(hook);
        self
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<CircuitBreaker>>> {
        self.breakers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Fetch the breaker for a dependency, creating it with the default
    /// config on first use
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        let mut map = self.map();
        if let Some(existing) = map.get(name) {
            return Arc::clone(existing);
        }

        let mut breaker = CircuitBreaker::new(name, self.default_config.clone());
        if let Some(hook) = &self.on_transition {
            breaker = breaker.with_transition_hook(Arc::clone(hook));
        }
        let breaker = Arc::new(breaker);
        map.insert(name.to_string(), Arc::clone(&breaker));
        breaker
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.map().get(name).cloned()
    }

    pub fn all_stats(&self) -> Vec<BreakerStats> {
        self.map().values().map(|b| b.stats()).collect()
    }

    /// Reset every breaker back to closed
    pub fn reset_all(&self) {
        for breaker in self.map().values() {
            breaker.reset();
        }
    }
}

impl Default for BreakerRegistry {
    fn default() -> Self {
        Self::new(BreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::advance;

    fn test_config() -> BreakerConfig {
        BreakerConfig {
            failure_threshold: 3,
            reset_timeout: Duration::from_millis(500),
            success_threshold: 2,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_opens_after_exact_failure_threshold() {
        let breaker = CircuitBreaker::new("db", test_config());

        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Closed);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);
        assert_eq!(breaker.stats().opened_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_closed_success_resets_failure_streak() {
        let breaker = CircuitBreaker::new("db", test_config());

        breaker.record_failure();
        breaker.record_failure();
        breaker.record_success();
        breaker.record_failure();
        breaker.record_failure();

        // Streak was broken, so 2 + 2 failures never reach the threshold
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_rejects_without_invoking_operation() {
        let breaker = CircuitBreaker::new("db", test_config());
        for _ in 0..3 {
            breaker.record_failure();
        }

        let invocations = AtomicU32::new(0);
        let result = breaker
            .call(|| async {
                invocations.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ResilienceError>(1)
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::CircuitOpen { .. })));
        assert_eq!(invocations.load(Ordering::SeqCst), 0);
        assert_eq!(breaker.stats().rejected_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_admitted_after_reset_timeout() {
        let breaker = CircuitBreaker::new("db", test_config());
        for _ in 0..3 {
            breaker.record_failure();
        }

        // Still inside the reset window
        advance(Duration::from_millis(499)).await;
        assert!(breaker.try_acquire().is_err());

        // Window elapsed: the next admission is the probe
        advance(Duration::from_millis(2)).await;
        assert!(breaker.try_acquire().is_ok());
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_closes_after_success_threshold() {
        let breaker = CircuitBreaker::new("db", test_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        advance(Duration::from_millis(501)).await;
        breaker.try_acquire().unwrap();

        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("db", test_config());
        for _ in 0..3 {
            breaker.record_failure();
        }
        advance(Duration::from_millis(501)).await;
        breaker.try_acquire().unwrap();
        assert_eq!(breaker.state(), CircuitState::HalfOpen);

        breaker.record_failure();
        assert_eq!(breaker.state(), CircuitState::Open);

        // Reopening restarts the reset window
        advance(Duration::from_millis(100)).await;
        assert!(breaker.try_acquire().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_hook_fires() {
        let transitions = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&transitions);
        let hook: TransitionHook = Arc::new(move |name: &str, from, to| {
            seen.lock().unwrap().push((name.to_string(), from, to));
        });

        let breaker = CircuitBreaker::new("db", test_config()).with_transition_hook(hook);
        for _ in 0..3 {
            breaker.record_failure();
        }

        let recorded = transitions.lock().unwrap();
        assert_eq!(
            recorded.as_slice(),
            &[("db".to_string(), CircuitState::Closed, CircuitState::Open)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_returns_same_breaker_for_name() {
        let registry = BreakerRegistry::new(test_config());

        let a = registry.get_or_create("db");
        let b = registry.get_or_create("db");
        a.record_failure();

        assert_eq!(b.stats().total_failures, 1);
        assert!(registry.get("http").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registry_reset_all() {
        let registry = BreakerRegistry::new(test_config());
        let breaker = registry.get_or_create("db");
        for _ in 0..3 {
            breaker.record_failure();
        }
        assert_eq!(breaker.state(), CircuitState::Open);

        registry.reset_all();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.stats().total_failures, 0);
    }
}
