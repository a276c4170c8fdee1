//! Core domain for the conversions relay.
//!
//! Provides the canonical event model, PII canonicalization, two-tier
//! deduplication, credential encryption and storage. The relay and HTTP
//! crates build on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dedup;
pub mod error;
pub mod models;
pub mod pii;
pub mod secrets;
pub mod storage;
pub mod store;
pub mod time;

pub use dedup::{Admission, DedupConfig, DedupGuard, DedupTier};
pub use error::{ConduitError, CoreError, Result};
pub use models::{
    Event, EventId, EventSource, IngestStatus, InsertOutcome, TenantCredential, TenantKey,
    UserData,
};
pub use secrets::SecretCipher;
pub use store::{CredentialStore, EventStore};
pub use time::{Clock, RealClock, SharedClock, TestClock};
