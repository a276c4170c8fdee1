//! Outbound relay to the conversions API.
//!
//! Takes stored events off a bounded queue and sends each one with
//! exponential backoff. Token rejections disable the tenant through a
//! per-tenant circuit breaker so a revoked integration stops generating
//! traffic until its cooldown passes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod circuit;
pub mod client;
pub mod error;
pub mod payload;
pub mod relay;
pub mod retry;
pub mod worker_pool;

pub use circuit::{CircuitBreaker, CircuitConfig, CircuitState};
pub use client::{CapiClient, ClientConfig};
pub use error::{ErrorCategory, RelayError, Result};
pub use relay::{RelayOutcome, RelayStats, RelayStatsSnapshot, Relayer};
pub use retry::{BackoffStrategy, RetryDecision, RetryPolicy};
pub use worker_pool::{RelayQueue, RelayQueueConfig, WorkerPool};
