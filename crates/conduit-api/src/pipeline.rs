//! Steps shared by the ingestion and webhook handlers after validation.

use conduit_core::{Admission, ConduitError, Event, IngestStatus, TenantCredential, TenantKey};
use tracing::{debug, info};

use crate::AppState;

/// Looks up the tenant's credential record.
pub(crate) async fn credential(
    state: &AppState,
    tenant_key: &TenantKey,
) -> Result<Option<TenantCredential>, ConduitError> {
    Ok(state.credentials.find(tenant_key).await?)
}

/// Dedups, stores and queues an event for a tenant with an enabled
/// integration.
///
/// A full relay queue does not fail the request: the event is stored, and
/// the queue has already logged the skipped relay.
pub(crate) async fn accept(state: &AppState, event: Event) -> Result<IngestStatus, ConduitError> {
    match state.dedup.admit(&event).await? {
        Admission::Duplicate(tier) => {
            debug!(
                tenant_key = %event.tenant_key,
                event_id = %event.event_id,
                tier = ?tier,
                "duplicate event ignored"
            );
            Ok(IngestStatus::IgnoredDuplicate)
        },
        Admission::Accepted => {
            info!(
                tenant_key = %event.tenant_key,
                event_id = %event.event_id,
                event_name = %event.event_name,
                source = %event.source,
                "event accepted"
            );
            if let Err(e) = state.relay_queue.enqueue(event) {
                debug!(error = %e, "event stored but not queued for relay");
            }
            Ok(IngestStatus::Received)
        },
    }
}
