//! HTTP request handlers.
//!
//! - `ingest` - event ingestion, single and batch
//! - `webhook` - authenticated purchase webhooks
//! - `health` - health, readiness and liveness endpoints
//!
//! Failures leave every handler as an [`crate::ApiError`] carrying a code
//! from the taxonomy (E1001-E3001).

pub mod health;
pub mod ingest;
pub mod webhook;

pub use health::{health_check, liveness_check, readiness_check};
pub use ingest::ingest_events;
pub use webhook::purchase_webhook;
