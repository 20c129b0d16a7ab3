//! Fault-tolerance primitives for the supervision system
//!
//! Standalone building blocks with no knowledge of processes or transports:
//! - `timeout`: deadline wrapper for async operations
//! - `breaker`: circuit breakers keyed by dependency name
//! - `queue`: bounded queues with overflow strategies and watermarks
//! - `retry`: retry composer stacking policy, timeout and breaker

pub mod breaker;
pub mod error;
pub mod queue;
pub mod retry;
pub mod timeout;

pub use breaker::{BreakerConfig, BreakerRegistry, BreakerStats, CircuitBreaker, CircuitState};
pub use error::{ResilienceError, ResilienceResult};
pub use queue::{AsyncBoundedQueue, BoundedQueue, OverflowStrategy, PriorityQueue, QueueCounters};
pub use retry::{default_retry_predicate, CachedFallback, ResilientCall, RetryPolicy};
pub use timeout::{try_with_timeout, with_deadline, with_timeout, with_timeout_cleanup};
