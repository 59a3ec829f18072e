//! Process-local resilience primitives: the pieces every provider call is
//! wrapped in before it reaches a gateway.
//!
//! # Modules
//!
//! - [`breaker`] — per-provider circuit breaker (C1)
//! - [`retry`] — exponential-with-jitter retry policy (C2)
//! - [`health`] — background health checker with a latched status (C3)
//! - [`idempotency`] — at-most-once request keeper (C7)
//! - [`rate_limit`] — token-bucket rate limiter (C13)

pub mod breaker;
pub mod health;
pub mod idempotency;
pub mod rate_limit;
pub mod retry;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use health::{HealthChecker, HealthStatus};
pub use idempotency::{IdempotencyDecision, IdempotencyKeeper, SweeperHandle};
pub use rate_limit::{RateLimiter, RateLimiterConfig};
pub use retry::{retry, BackoffType, RetryPolicy};
