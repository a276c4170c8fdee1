//! Two-tier event deduplication.
//!
//! The fast tier is a bounded, TTL-limited map local to this process. It
//! saves a database round trip for hot replays but is never the only check:
//! the durable tier is the uniqueness-constrained insert, which catches
//! replays across restarts and across instances.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, PoisonError},
    time::{Duration, SystemTime},
};

use tracing::{debug, warn};

use crate::{
    error::Result,
    models::{Event, EventId, InsertOutcome, TenantKey},
    store::EventStore,
    time::SharedClock,
};

/// Fast-tier sizing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DedupConfig {
    /// Maximum remembered keys; oldest are evicted first.
    pub capacity: usize,
    /// How long a key is remembered.
    pub ttl: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { capacity: 100_000, ttl: Duration::from_secs(24 * 60 * 60) }
    }
}

/// Which tier recognized a duplicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupTier {
    /// Process-local map.
    Fast,
    /// Uniqueness constraint in storage.
    Durable,
}

/// Outcome of [`DedupGuard::admit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New event, now durably stored; relay it.
    Accepted,
    /// Already seen; do nothing.
    Duplicate(DedupTier),
}

type Key = (TenantKey, EventId);

#[derive(Debug, Default)]
struct FastTier {
    seen: HashMap<Key, SystemTime>,
    order: VecDeque<(Key, SystemTime)>,
}

impl FastTier {
    /// Returns whether the key is present and fresh.
    fn contains(&mut self, key: &Key, now: SystemTime, ttl: Duration) -> bool {
        self.purge_expired(now, ttl);
        self.seen.contains_key(key)
    }

    /// Remembers the key, evicting the oldest entries at capacity.
    fn mark(&mut self, key: Key, now: SystemTime, config: DedupConfig) {
        self.purge_expired(now, config.ttl);
        if self.seen.contains_key(&key) {
            return;
        }

        while self.seen.len() >= config.capacity.max(1) {
            if !self.evict_oldest() {
                break;
            }
        }

        self.seen.insert(key.clone(), now);
        self.order.push_back((key, now));
    }

    fn purge_expired(&mut self, now: SystemTime, ttl: Duration) {
        while let Some((_, seen_at)) = self.order.front() {
            let expired = now.duration_since(*seen_at).map(|age| age >= ttl).unwrap_or(false);
            if !expired {
                break;
            }
            self.evict_oldest();
        }
    }

    /// Pops the oldest order entry, dropping the key if the entry is current.
    fn evict_oldest(&mut self) -> bool {
        let Some((key, seen_at)) = self.order.pop_front() else {
            return false;
        };
        if self.seen.get(&key) == Some(&seen_at) {
            self.seen.remove(&key);
        }
        true
    }
}

/// Deduplication guard owning the fast tier and a handle to the durable one.
pub struct DedupGuard {
    config: DedupConfig,
    fast: Mutex<FastTier>,
    store: Arc<dyn EventStore>,
    clock: SharedClock,
}

impl DedupGuard {
    /// Creates a guard over the given event store.
    pub fn new(config: DedupConfig, store: Arc<dyn EventStore>, clock: SharedClock) -> Self {
        Self { config, fast: Mutex::new(FastTier::default()), store, clock }
    }

    /// Checks and marks the key in the fast tier only.
    ///
    /// Returns true if the key was seen in this process within the TTL.
    /// A false result is not proof of novelty. Marks are shared with
    /// [`Self::admit`], which the ingest pipeline uses instead.
    pub fn is_duplicate(&self, tenant_key: &TenantKey, event_id: &EventId) -> bool {
        let key = (tenant_key.clone(), event_id.clone());
        let now = self.clock.now_system();
        let mut fast = self.fast.lock().unwrap_or_else(PoisonError::into_inner);
        if fast.contains(&key, now, self.config.ttl) {
            return true;
        }
        fast.mark(key, now, self.config);
        false
    }

    /// Runs both tiers and durably stores the event if it is new.
    ///
    /// The fast tier only learns a key after the durable insert reports it
    /// inserted or present. Concurrent first-time requests for one key both
    /// reach the store, where the uniqueness constraint picks the winner.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the insert fails. Nothing is remembered,
    /// so a client retry is evaluated afresh.
    pub async fn admit(&self, event: &Event) -> Result<Admission> {
        if self.seen_recently(&event.tenant_key, &event.event_id) {
            debug!(
                tenant_key = %event.tenant_key,
                event_id = %event.event_id,
                "duplicate caught by fast tier"
            );
            return Ok(Admission::Duplicate(DedupTier::Fast));
        }

        let outcome = self.store.insert_if_absent(event).await.inspect_err(|e| {
            warn!(
                tenant_key = %event.tenant_key,
                event_id = %event.event_id,
                error = %e,
                "event insert failed"
            );
        })?;
        self.remember(&event.tenant_key, &event.event_id);

        match outcome {
            InsertOutcome::Inserted => Ok(Admission::Accepted),
            InsertOutcome::Duplicate => {
                debug!(
                    tenant_key = %event.tenant_key,
                    event_id = %event.event_id,
                    "duplicate caught by durable tier"
                );
                Ok(Admission::Duplicate(DedupTier::Durable))
            },
        }
    }

    /// Number of keys currently remembered by the fast tier.
    pub fn fast_tier_len(&self) -> usize {
        self.fast.lock().unwrap_or_else(PoisonError::into_inner).seen.len()
    }

    fn seen_recently(&self, tenant_key: &TenantKey, event_id: &EventId) -> bool {
        let now = self.clock.now_system();
        let mut fast = self.fast.lock().unwrap_or_else(PoisonError::into_inner);
        fast.contains(&(tenant_key.clone(), event_id.clone()), now, self.config.ttl)
    }

    fn remember(&self, tenant_key: &TenantKey, event_id: &EventId) {
        let now = self.clock.now_system();
        let mut fast = self.fast.lock().unwrap_or_else(PoisonError::into_inner);
        fast.mark((tenant_key.clone(), event_id.clone()), now, self.config);
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::{json, Map};

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::{
        error::CoreError,
        models::{EventSource, UserData},
        store::{memory::InMemoryEventStore, StoreFuture},
        time::TestClock,
    };

    fn event(id: &str) -> Event {
        Event {
            tenant_key: TenantKey::from("tenant-a"),
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

    fn guard(config: DedupConfig) -> (DedupGuard, InMemoryEventStore, TestClock) {
        let store = InMemoryEventStore::new();
        let clock = TestClock::at_unix(1_700_000_000);
        let guard = DedupGuard::new(config, Arc::new(store.clone()), clock.shared());
        (guard, store, clock)
    }

    #[tokio::test]
    async fn second_admit_is_fast_tier_duplicate() {
        let (guard, store, _) = guard(DedupConfig::default());

        assert_eq!(guard.admit(&event("e1")).await.unwrap(), Admission::Accepted);
        assert_eq!(
            guard.admit(&event("e1")).await.unwrap(),
            Admission::Duplicate(DedupTier::Fast)
        );
        assert_eq!(store.insert_calls(), 1);
    }

    #[tokio::test]
    async fn durable_tier_catches_what_fast_tier_forgot() {
        let (guard, store, clock) =
            guard(DedupConfig { capacity: 10, ttl: Duration::from_secs(60) });

        guard.admit(&event("e1")).await.unwrap();
        clock.advance(Duration::from_secs(61));

        assert_eq!(
            guard.admit(&event("e1")).await.unwrap(),
            Admission::Duplicate(DedupTier::Durable)
        );
        assert_eq!(store.insert_calls(), 2);
    }

    #[tokio::test]
    async fn fresh_guard_still_rejects_stored_event() {
        let store = InMemoryEventStore::new();
        let clock = TestClock::new();
        let first = DedupGuard::new(DedupConfig::default(), Arc::new(store.clone()), clock.shared());
        let restarted =
            DedupGuard::new(DedupConfig::default(), Arc::new(store.clone()), clock.shared());

        assert_eq!(first.admit(&event("e1")).await.unwrap(), Admission::Accepted);
        assert_eq!(
            restarted.admit(&event("e1")).await.unwrap(),
            Admission::Duplicate(DedupTier::Durable)
        );
    }

    #[tokio::test]
    async fn failed_insert_is_not_remembered() {
        let (guard, store, _) = guard(DedupConfig::default());

        store.fail_inserts_with("connection reset").await;
        assert!(guard.admit(&event("e1")).await.is_err());
        assert_eq!(guard.fast_tier_len(), 0);

        store.clear_failures().await;
        assert_eq!(guard.admit(&event("e1")).await.unwrap(), Admission::Accepted);
    }

    #[tokio::test]
    async fn fast_tier_evicts_oldest_at_capacity() {
        let (guard, _, _) = guard(DedupConfig { capacity: 2, ttl: Duration::from_secs(3600) });

        for id in ["a", "b", "c"] {
            assert_eq!(guard.admit(&event(id)).await.unwrap(), Admission::Accepted);
        }
        assert_eq!(guard.fast_tier_len(), 2);

        assert_eq!(
            guard.admit(&event("c")).await.unwrap(),
            Admission::Duplicate(DedupTier::Fast)
        );
        assert_eq!(
            guard.admit(&event("a")).await.unwrap(),
            Admission::Duplicate(DedupTier::Durable)
        );
    }

    #[test]
    fn is_duplicate_marks_per_tenant() {
        let (guard, _, _) = guard(DedupConfig::default());
        let id = EventId::from("shared-id");

        assert!(!guard.is_duplicate(&TenantKey::from("t1"), &id));
        assert!(!guard.is_duplicate(&TenantKey::from("t2"), &id));
        assert!(guard.is_duplicate(&TenantKey::from("t1"), &id));
        assert_eq!(guard.fast_tier_len(), 2);
    }

    /// Store whose inserts hang for a while and then fail.
    struct StallingStore {
        stall: Duration,
        calls: AtomicUsize,
    }

    impl EventStore for StallingStore {
        fn insert_if_absent<'a>(&'a self, _event: &'a Event) -> StoreFuture<'a, InsertOutcome> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.stall).await;
                Err(CoreError::Database("connection reset".into()))
            })
        }

        fn health_check(&self) -> StoreFuture<'_, ()> {
            Box::pin(async { Ok(()) })
        }
    }

    #[tokio::test]
    async fn retry_during_failing_insert_is_not_reported_duplicate() {
        let store =
            Arc::new(StallingStore { stall: Duration::from_millis(200), calls: AtomicUsize::new(0) });
        let guard = Arc::new(DedupGuard::new(
            DedupConfig::default(),
            store.clone(),
            TestClock::new().shared(),
        ));

        let first = tokio::spawn({
            let guard = guard.clone();
            async move { guard.admit(&event("e1")).await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        let second = guard.admit(&event("e1")).await;

        assert!(first.await.unwrap().is_err());
        assert!(second.is_err(), "retry answered without storage: {second:?}");
        assert_eq!(store.calls.load(Ordering::SeqCst), 2);
        assert_eq!(guard.fast_tier_len(), 0);
    }
}
