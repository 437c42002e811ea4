//! Reliability patterns for durable execution
//!
//! This module provides:
//! - [`RetryPolicy`] - Configurable retry with exponential backoff
//! - [`CircuitBreakerConfig`] - Circuit breaker configuration
//! - [`DistributedCircuitBreaker`] - Circuit breaker state shared via the event store
//! - [`TimeoutManager`] - Schedule-to-start/start-to-close/heartbeat/schedule-to-close timeout checks

mod circuit_breaker;
mod distributed_circuit_breaker;
mod retry;
mod timeout;

pub use circuit_breaker::{CircuitBreakerConfig, CircuitState};
pub use distributed_circuit_breaker::{
    CircuitBreakerError, CircuitBreakerPermit, DistributedCircuitBreaker,
};
pub use retry::RetryPolicy;
pub use timeout::{
    evaluate_task_timeout, TaskTimingInfo, TimeoutConfig, TimeoutError, TimeoutManager, TimeoutType,
};
