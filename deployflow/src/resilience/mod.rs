//! Resilience primitives wrapped around every gateway call.
//!
//! Calls are composed as Retry → Circuit Breaker → Gateway: the retry
//! handler sees breaker rejections as transient connectivity failures and
//! backs off before trying again.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{
    is_countable, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerState, CircuitState,
    OperationClass,
};
pub use retry::{
    decide, jittered, FailureClass, RetryAttempt, RetryConfig, RetryDecision, RetryHandler,
    RetryObserver, RetryOverrides,
};
