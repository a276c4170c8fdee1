//! Attempt sequence for a single event.
//!
//! Order of operations: circuit check, credential resolution, payload
//! build, then up to `max_attempts` sends with backoff between them. An
//! access token rejection stops the sequence and disables the tenant; any
//! other exhausted or terminal failure drops the event with an error log.
//! Nothing here is ever reported back to the HTTP caller.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::SystemTime,
};

use conduit_core::{CredentialStore, Event, SharedClock, TenantCredential, TenantKey};
use tracing::{debug, error, info, instrument, warn};

use crate::{
    circuit::CircuitBreaker,
    client::CapiClient,
    error::{ErrorCategory, RelayError, Result},
    payload::{server_event, CapiRequest},
    retry::{RetryDecision, RetryPolicy},
};

const MIN_TOKEN_LEN: usize = 20;
const MAX_TOKEN_LEN: usize = 1024;
const MIN_PIXEL_ID_LEN: usize = 5;
const MAX_PIXEL_ID_LEN: usize = 32;

/// Final result of relaying one event.
#[derive(Debug, Clone)]
pub enum RelayOutcome {
    /// Downstream accepted the event.
    Delivered {
        /// Attempts used, including the successful one
        attempts: u32,
    },
    /// No outbound call was made.
    Skipped {
        /// Why the event was not sent
        reason: RelayError,
    },
    /// Sent but never accepted; the event is dropped.
    Dropped {
        /// Attempts made
        attempts: u32,
        /// Last failure
        error: RelayError,
    },
    /// Token rejected; the tenant is disabled until the deadline.
    TenantDisabled {
        /// Attempts made
        attempts: u32,
        /// End of the cooldown
        until: SystemTime,
    },
}

impl RelayOutcome {
    /// Returns true if the event reached the downstream API.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }

    /// Number of outbound requests made.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Delivered { attempts }
            | Self::Dropped { attempts, .. }
            | Self::TenantDisabled { attempts, .. } => *attempts,
            Self::Skipped { .. } => 0,
        }
    }
}

/// Process-wide relay counters.
#[derive(Debug, Default)]
pub struct RelayStats {
    attempts: AtomicU64,
    delivered: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    tenants_disabled: AtomicU64,
}

/// Point-in-time copy of [`RelayStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStatsSnapshot {
    /// Outbound requests made.
    pub attempts: u64,
    /// Events accepted downstream.
    pub delivered: u64,
    /// Events not sent at all.
    pub skipped: u64,
    /// Events given up on.
    pub dropped: u64,
    /// Circuit trips.
    pub tenants_disabled: u64,
}

impl RelayStats {
    /// Returns current counter values.
    pub fn snapshot(&self) -> RelayStatsSnapshot {
        RelayStatsSnapshot {
            attempts: self.attempts.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            tenants_disabled: self.tenants_disabled.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &RelayOutcome) {
        self.attempts.fetch_add(u64::from(outcome.attempts()), Ordering::Relaxed);
        let counter = match outcome {
            RelayOutcome::Delivered { .. } => &self.delivered,
            RelayOutcome::Skipped { .. } => &self.skipped,
            RelayOutcome::Dropped { .. } => &self.dropped,
            RelayOutcome::TenantDisabled { .. } => &self.tenants_disabled,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Relays events to the conversions API.
pub struct Relayer {
    client: CapiClient,
    credentials: Arc<dyn CredentialStore>,
    circuit: CircuitBreaker,
    policy: RetryPolicy,
    clock: SharedClock,
    stats: Arc<RelayStats>,
}

impl Relayer {
    /// Creates a relayer.
    pub fn new(
        client: CapiClient,
        credentials: Arc<dyn CredentialStore>,
        circuit: CircuitBreaker,
        policy: RetryPolicy,
        clock: SharedClock,
    ) -> Self {
        Self { client, credentials, circuit, policy, clock, stats: Arc::new(RelayStats::default()) }
    }

    /// Returns the circuit breaker.
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// Returns the relay counters.
    pub fn stats(&self) -> Arc<RelayStats> {
        self.stats.clone()
    }

    /// Stores rotated credentials and lifts a token-rejection cooldown.
    ///
    /// # Errors
    ///
    /// Returns `RelayError::InvalidCredentials` if the new credentials fail
    /// structural checks and `RelayError::Store` if the write fails. The
    /// circuit is left untouched in both cases.
    #[instrument(name = "reauthenticate", skip_all, fields(tenant_key = %credential.tenant_key))]
    pub async fn reauthenticate(&self, credential: &TenantCredential) -> Result<()> {
        validate_credentials(credential)?;
        self.credentials
            .upsert(credential)
            .await
            .map_err(|e| RelayError::Store { message: e.to_string() })?;
        self.circuit.reset(&credential.tenant_key).await;

        info!("credentials replaced, relay re-enabled");
        Ok(())
    }

    /// Relays one event, retrying transient failures.
    #[instrument(
        name = "relay",
        skip(self, event),
        fields(
            tenant_key = %event.tenant_key,
            event_id = %event.event_id,
            event_name = %event.event_name,
        )
    )]
    pub async fn relay(&self, event: &Event) -> RelayOutcome {
        let outcome = self.relay_inner(event).await;
        self.stats.record(&outcome);

        match &outcome {
            RelayOutcome::Delivered { attempts } => {
                info!(attempts, "event relayed");
            },
            RelayOutcome::Skipped { reason } => match reason {
                RelayError::CircuitOpen { .. } => debug!("relay skipped: tenant disabled"),
                other => warn!(
                    error = %other,
                    category = %ErrorCategory::from(other),
                    "relay skipped"
                ),
            },
            RelayOutcome::Dropped { attempts, error } => {
                error!(
                    attempts,
                    error = %error,
                    category = %ErrorCategory::from(error),
                    "relay failed, event dropped"
                );
            },
            RelayOutcome::TenantDisabled { attempts, .. } => {
                error!(attempts, "access token rejected, event dropped and tenant disabled");
            },
        }

        outcome
    }

    async fn relay_inner(&self, event: &Event) -> RelayOutcome {
        if let Err(reason) = self.circuit.check(&event.tenant_key).await {
            return RelayOutcome::Skipped { reason };
        }

        let credential = match self.resolve_credentials(&event.tenant_key).await {
            Ok(credential) => credential,
            Err(reason) => return RelayOutcome::Skipped { reason },
        };

        let request = CapiRequest::single(server_event(event), &credential);
        let mut attempt = 0;

        loop {
            attempt += 1;

            let error = match self.client.send(&credential.pixel_id, &request, attempt).await {
                Ok(response) => {
                    debug!(
                        attempt,
                        status = response.status_code,
                        events_received = response.events_received,
                        fbtrace_id = response.fbtrace_id.as_deref().unwrap_or(""),
                        "attempt succeeded"
                    );
                    return RelayOutcome::Delivered { attempts: attempt };
                },
                Err(error) => error,
            };

            if error.is_auth_failure() {
                let until = self.circuit.trip(&event.tenant_key).await;
                return RelayOutcome::TenantDisabled { attempts: attempt, until };
            }

            match self.policy.decide(attempt, &error) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        attempt,
                        error = %error,
                        delay_ms = delay.as_millis(),
                        "attempt failed, retrying"
                    );
                    self.clock.sleep(delay).await;

                    if let Err(reason) = self.circuit.check(&event.tenant_key).await {
                        return RelayOutcome::Dropped { attempts: attempt, error: reason };
                    }
                },
                RetryDecision::GiveUp { reason } => {
                    debug!(attempt, reason = %reason, "giving up");
                    return RelayOutcome::Dropped { attempts: attempt, error };
                },
            }
        }
    }

    async fn resolve_credentials(&self, tenant_key: &TenantKey) -> Result<TenantCredential> {
        let credential = self
            .credentials
            .find(tenant_key)
            .await
            .map_err(|e| RelayError::Store { message: e.to_string() })?
            .filter(|c| c.enabled)
            .ok_or_else(|| RelayError::MissingCredentials { tenant_key: tenant_key.to_string() })?;

        validate_credentials(&credential)?;
        Ok(credential)
    }
}

/// Structural checks that catch corrupted or mis-pasted credentials before
/// they reach the downstream API.
///
/// # Errors
///
/// Returns `RelayError::InvalidCredentials` naming the failed check.
pub fn validate_credentials(credential: &TenantCredential) -> Result<()> {
    let tenant = credential.tenant_key.as_str();
    let token = &credential.access_token;

    if !(MIN_TOKEN_LEN..=MAX_TOKEN_LEN).contains(&token.len()) {
        return Err(RelayError::invalid_credentials(tenant, "access token has implausible length"));
    }
    if token.chars().any(char::is_whitespace) {
        return Err(RelayError::invalid_credentials(tenant, "access token contains whitespace"));
    }
    if !token.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '|')) {
        return Err(RelayError::invalid_credentials(
            tenant,
            "access token contains unexpected characters",
        ));
    }

    let pixel = &credential.pixel_id;
    if !(MIN_PIXEL_ID_LEN..=MAX_PIXEL_ID_LEN).contains(&pixel.len())
        || !pixel.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(RelayError::invalid_credentials(tenant, "pixel id must be 5-32 digits"));
    }

    Ok(())
}
