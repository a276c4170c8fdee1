//! Store traits used by the pipeline.
//!
//! The dedup guard, the relay and the HTTP handlers only see these traits.
//! Production wires the PostgreSQL adapters; tests use the in-memory
//! implementations in [`memory`], which also support injected failures.

use std::{future::Future, pin::Pin, sync::Arc};

use crate::{
    error::Result,
    models::{Event, InsertOutcome, TenantCredential, TenantKey},
    secrets::SecretCipher,
    storage::{credentials::SealedCredential, Storage},
};

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Durable event storage.
pub trait EventStore: Send + Sync + 'static {
    /// Inserts the event unless `(tenant_key, event_id)` already exists.
    ///
    /// A present key is reported as `InsertOutcome::Duplicate`, never as an
    /// error.
    fn insert_if_absent<'a>(&'a self, event: &'a Event) -> StoreFuture<'a, InsertOutcome>;

    /// Verifies the backing store is reachable.
    fn health_check(&self) -> StoreFuture<'_, ()>;
}

/// Tenant credential lookup with decrypt-on-read.
pub trait CredentialStore: Send + Sync + 'static {
    /// Returns the tenant's decrypted credentials, if configured.
    fn find<'a>(&'a self, tenant_key: &'a TenantKey) -> StoreFuture<'a, Option<TenantCredential>>;

    /// Creates or replaces the tenant's credentials.
    fn upsert<'a>(&'a self, credential: &'a TenantCredential) -> StoreFuture<'a, ()>;
}

/// Event store backed by the `events` table.
pub struct PgEventStore {
    storage: Arc<Storage>,
}

impl PgEventStore {
    /// Creates a new adapter.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

impl EventStore for PgEventStore {
    fn insert_if_absent<'a>(&'a self, event: &'a Event) -> StoreFuture<'a, InsertOutcome> {
        Box::pin(async move { self.storage.events.insert_if_absent(event).await })
    }

    fn health_check(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.storage.health_check().await })
    }
}

/// Credential store backed by `tenant_credentials`, decrypting on every read.
pub struct PgCredentialStore {
    storage: Arc<Storage>,
    cipher: SecretCipher,
}

impl PgCredentialStore {
    /// Creates a new adapter.
    pub fn new(storage: Arc<Storage>, cipher: SecretCipher) -> Self {
        Self { storage, cipher }
    }

    fn open(&self, sealed: SealedCredential) -> Result<TenantCredential> {
        Ok(TenantCredential {
            access_token: self.cipher.decrypt(&sealed.access_token_sealed)?,
            webhook_secret: sealed
                .webhook_secret_sealed
                .as_deref()
                .map(|s| self.cipher.decrypt(s))
                .transpose()?,
            tenant_key: sealed.tenant_key,
            pixel_id: sealed.pixel_id,
            test_event_code: sealed.test_event_code,
            enabled: sealed.enabled,
        })
    }

    fn seal(&self, credential: &TenantCredential) -> Result<SealedCredential> {
        Ok(SealedCredential {
            tenant_key: credential.tenant_key.clone(),
            pixel_id: credential.pixel_id.clone(),
            access_token_sealed: self.cipher.encrypt(&credential.access_token)?,
            webhook_secret_sealed: credential
                .webhook_secret
                .as_deref()
                .map(|s| self.cipher.encrypt(s))
                .transpose()?,
            test_event_code: credential.test_event_code.clone(),
            enabled: credential.enabled,
        })
    }
}

impl CredentialStore for PgCredentialStore {
    fn find<'a>(&'a self, tenant_key: &'a TenantKey) -> StoreFuture<'a, Option<TenantCredential>> {
        Box::pin(async move {
            let sealed = self.storage.credentials.find(tenant_key).await?;
            sealed.map(|s| self.open(s)).transpose()
        })
    }

    fn upsert<'a>(&'a self, credential: &'a TenantCredential) -> StoreFuture<'a, ()> {
        Box::pin(async move {
            let sealed = self.seal(credential)?;
            self.storage.credentials.upsert(&sealed).await?;
            Ok(())
        })
    }
}

pub mod memory {
    //! In-memory stores for tests and local runs without a database.

    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    use tokio::sync::RwLock;

    use super::{CredentialStore, EventStore, StoreFuture};
    use crate::{
        error::CoreError,
        models::{Event, EventId, InsertOutcome, TenantCredential, TenantKey},
    };

    /// Event store keeping rows in a map.
    ///
    /// `fail_inserts_with` makes every insert fail until cleared, for
    /// exercising the persistence-failure path.
    #[derive(Clone, Default)]
    pub struct InMemoryEventStore {
        events: Arc<RwLock<HashMap<(TenantKey, EventId), Event>>>,
        insert_error: Arc<RwLock<Option<String>>>,
        insert_calls: Arc<AtomicUsize>,
    }

    impl InMemoryEventStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes subsequent inserts fail with a database error.
        pub async fn fail_inserts_with(&self, message: impl Into<String>) {
            *self.insert_error.write().await = Some(message.into());
        }

        /// Restores normal insert behavior.
        pub async fn clear_failures(&self) {
            *self.insert_error.write().await = None;
        }

        /// Number of stored events.
        pub async fn len(&self) -> usize {
            self.events.read().await.len()
        }

        /// Returns true if nothing is stored.
        pub async fn is_empty(&self) -> bool {
            self.events.read().await.is_empty()
        }

        /// Returns a stored event.
        pub async fn get(&self, tenant_key: &TenantKey, event_id: &EventId) -> Option<Event> {
            self.events.read().await.get(&(tenant_key.clone(), event_id.clone())).cloned()
        }

        /// Number of insert calls, including duplicates and failures.
        pub fn insert_calls(&self) -> usize {
            self.insert_calls.load(Ordering::Relaxed)
        }
    }

    impl EventStore for InMemoryEventStore {
        fn insert_if_absent<'a>(&'a self, event: &'a Event) -> StoreFuture<'a, InsertOutcome> {
            Box::pin(async move {
                self.insert_calls.fetch_add(1, Ordering::Relaxed);

                if let Some(message) = self.insert_error.read().await.clone() {
                    return Err(CoreError::Database(message));
                }

                let key = (event.tenant_key.clone(), event.event_id.clone());
                let mut events = self.events.write().await;
                if events.contains_key(&key) {
                    return Ok(InsertOutcome::Duplicate);
                }
                events.insert(key, event.clone());
                Ok(InsertOutcome::Inserted)
            })
        }

        fn health_check(&self) -> StoreFuture<'_, ()> {
            Box::pin(async move {
                match self.insert_error.read().await.clone() {
                    Some(message) => Err(CoreError::Database(message)),
                    None => Ok(()),
                }
            })
        }
    }

    /// Credential store keeping plaintext records in a map.
    #[derive(Clone, Default)]
    pub struct InMemoryCredentialStore {
        credentials: Arc<RwLock<HashMap<TenantKey, TenantCredential>>>,
        lookup_error: Arc<RwLock<Option<String>>>,
        lookups: Arc<AtomicUsize>,
    }

    impl InMemoryCredentialStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Makes subsequent lookups fail with a database error.
        pub async fn fail_lookups_with(&self, message: impl Into<String>) {
            *self.lookup_error.write().await = Some(message.into());
        }

        /// Restores normal lookup behavior.
        pub async fn clear_failures(&self) {
            *self.lookup_error.write().await = None;
        }

        /// Removes a tenant's credentials.
        pub async fn remove(&self, tenant_key: &TenantKey) {
            self.credentials.write().await.remove(tenant_key);
        }

        /// Number of `find` calls served.
        pub fn lookups(&self) -> usize {
            self.lookups.load(Ordering::Relaxed)
        }
    }

    impl CredentialStore for InMemoryCredentialStore {
        fn find<'a>(
            &'a self,
            tenant_key: &'a TenantKey,
        ) -> StoreFuture<'a, Option<TenantCredential>> {
            Box::pin(async move {
                self.lookups.fetch_add(1, Ordering::Relaxed);
                if let Some(message) = self.lookup_error.read().await.clone() {
                    return Err(CoreError::Database(message));
                }
                Ok(self.credentials.read().await.get(tenant_key).cloned())
            })
        }

        fn upsert<'a>(&'a self, credential: &'a TenantCredential) -> StoreFuture<'a, ()> {
            Box::pin(async move {
                self.credentials
                    .write()
                    .await
                    .insert(credential.tenant_key.clone(), credential.clone());
                Ok(())
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{json, Map};

    use super::{memory::*, *};
    use crate::models::{EventId, EventSource, UserData};

    fn event(tenant: &str, id: &str) -> Event {
        Event {
            tenant_key: TenantKey::from(tenant),
            event_name: "Lead".into(),
            event_id: EventId::from(id),
            event_time: 1_700_000_000,
            event_source_url: None,
            user_data: UserData::default(),
            custom_data: Map::new(),
            raw_payload: json!({}),
            source: EventSource::Pixel,
            received_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn memory_store_reports_duplicates_per_tenant() {
        let store = InMemoryEventStore::new();

        assert_eq!(store.insert_if_absent(&event("t1", "e1")).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.insert_if_absent(&event("t1", "e1")).await.unwrap(), InsertOutcome::Duplicate);
        assert_eq!(store.insert_if_absent(&event("t2", "e1")).await.unwrap(), InsertOutcome::Inserted);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn memory_store_injected_failure() {
        let store = InMemoryEventStore::new();
        store.fail_inserts_with("connection reset").await;

        assert!(store.insert_if_absent(&event("t1", "e1")).await.is_err());
        assert!(store.is_empty().await);

        store.clear_failures().await;
        assert!(store.insert_if_absent(&event("t1", "e1")).await.is_ok());
    }

    #[tokio::test]
    async fn memory_credentials_round_trip() {
        let store = InMemoryCredentialStore::new();
        let credential = TenantCredential {
            tenant_key: TenantKey::from("t1"),
            pixel_id: "1234567890".into(),
            access_token: "EAABsecretsecretsecret".into(),
            webhook_secret: None,
            test_event_code: None,
            enabled: true,
        };

        store.upsert(&credential).await.unwrap();
        assert_eq!(store.find(&TenantKey::from("t1")).await.unwrap(), Some(credential));
        assert_eq!(store.find(&TenantKey::from("t2")).await.unwrap(), None);
        assert_eq!(store.lookups(), 2);
    }
}
