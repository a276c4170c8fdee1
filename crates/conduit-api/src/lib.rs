//! HTTP surface of the conversions relay.
//!
//! Two ingestion paths share one pipeline: the event endpoint for pixel and
//! server-side calls, and the purchase webhook for e-commerce platforms.
//! Both persist through the dedup guard and hand accepted events to the
//! relay queue without waiting for delivery.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod platforms;
pub mod server;
pub mod signature;
pub mod validation;

mod pipeline;

use std::{sync::Arc, time::Duration};

use conduit_core::{CredentialStore, DedupGuard, EventStore, SharedClock};
use conduit_relay::RelayQueue;

pub use config::Config;
pub use error::ApiError;
pub use server::{create_router, start_server};

/// Per-request limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestLimits {
    /// Largest accepted request body.
    pub max_payload_bytes: usize,
    /// Largest accepted batch.
    pub max_batch_size: usize,
    /// Allowed skew between a webhook timestamp and server time.
    pub webhook_tolerance: Duration,
    /// Time budget for a whole request.
    pub request_timeout: Duration,
}

impl Default for RequestLimits {
    fn default() -> Self {
        Self {
            max_payload_bytes: 1024 * 1024,
            max_batch_size: 500,
            webhook_tolerance: Duration::from_secs(300),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// Two-tier dedup over the event store.
    pub dedup: Arc<DedupGuard>,
    /// Durable event store, also pinged by readiness checks.
    pub events: Arc<dyn EventStore>,
    /// Tenant credentials.
    pub credentials: Arc<dyn CredentialStore>,
    /// Producer side of the relay queue.
    pub relay_queue: RelayQueue,
    /// Time source.
    pub clock: SharedClock,
    /// Request limits.
    pub limits: RequestLimits,
}
