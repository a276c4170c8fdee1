//! Per-tenant circuit breaker for rejected access tokens.
//!
//! A rejected token will keep being rejected until the tenant
//! re-authenticates, so the breaker opens on the first auth failure and
//! stays open for a fixed cooldown. There is no half-open probing: once the
//! deadline passes the tenant is simply eligible again.
//!
//! ```text
//!   ┌──────────┐   auth failure    ┌────────────────────┐
//!   │  CLOSED  │ ────────────────▶ │ OPEN(until=now+cd) │
//!   └──────────┘                   └────────────────────┘
//!        ▲                                   │
//!        └────────── now >= until ───────────┘
//! ```

use std::{
    collections::HashMap,
    fmt,
    sync::Arc,
    time::{Duration, SystemTime},
};

use conduit_core::{SharedClock, TenantKey};
use tokio::sync::Mutex;
use tracing::warn;

use crate::error::{RelayError, Result};

/// Circuit breaker configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitConfig {
    /// How long a tenant stays disabled after an auth failure.
    pub cooldown: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self { cooldown: Duration::from_secs(60 * 60) }
    }
}

/// Current state of a tenant's circuit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Relays allowed.
    Closed,
    /// Relays skipped until the deadline.
    Open {
        /// When the tenant becomes eligible again
        until: SystemTime,
    },
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open { .. } => write!(f, "open"),
        }
    }
}

/// Tracks disablement deadlines for all tenants.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    disabled_until: Arc<Mutex<HashMap<TenantKey, SystemTime>>>,
    clock: SharedClock,
}

impl CircuitBreaker {
    /// Creates a breaker with every tenant closed.
    pub fn new(config: CircuitConfig, clock: SharedClock) -> Self {
        Self { config, disabled_until: Arc::new(Mutex::new(HashMap::new())), clock }
    }

    /// Returns the tenant's current state, clearing an expired deadline.
    pub async fn state(&self, tenant_key: &TenantKey) -> CircuitState {
        let now = self.clock.now_system();
        let mut disabled = self.disabled_until.lock().await;

        match disabled.get(tenant_key).copied() {
            Some(until) if until > now => CircuitState::Open { until },
            Some(_) => {
                disabled.remove(tenant_key);
                CircuitState::Closed
            },
            None => CircuitState::Closed,
        }
    }

    /// Fails with `RelayError::CircuitOpen` if the tenant is disabled.
    ///
    /// # Errors
    ///
    /// Returns `CircuitOpen` while the tenant's deadline is in the future.
    pub async fn check(&self, tenant_key: &TenantKey) -> Result<()> {
        match self.state(tenant_key).await {
            CircuitState::Closed => Ok(()),
            CircuitState::Open { .. } => Err(RelayError::circuit_open(tenant_key.as_str())),
        }
    }

    /// Opens the tenant's circuit for the configured cooldown.
    ///
    /// Returns the new deadline. Tripping an already open circuit extends it.
    pub async fn trip(&self, tenant_key: &TenantKey) -> SystemTime {
        let until = self.clock.now_system() + self.config.cooldown;
        self.disabled_until.lock().await.insert(tenant_key.clone(), until);

        warn!(
            tenant_key = %tenant_key,
            cooldown_secs = self.config.cooldown.as_secs(),
            "tenant relay disabled after access token rejection"
        );

        until
    }

    /// Closes the tenant's circuit immediately.
    pub async fn reset(&self, tenant_key: &TenantKey) {
        self.disabled_until.lock().await.remove(tenant_key);
    }

    /// Number of tenants currently disabled.
    pub async fn open_count(&self) -> usize {
        let now = self.clock.now_system();
        self.disabled_until.lock().await.values().filter(|until| **until > now).count()
    }
}

#[cfg(test)]
mod tests {
    use conduit_core::TestClock;

    use super::*;

    fn breaker() -> (CircuitBreaker, TestClock) {
        let clock = TestClock::at_unix(1_700_000_000);
        let breaker = CircuitBreaker::new(
            CircuitConfig { cooldown: Duration::from_secs(3600) },
            clock.shared(),
        );
        (breaker, clock)
    }

    #[tokio::test]
    async fn tenants_start_closed() {
        let (breaker, _) = breaker();
        assert_eq!(breaker.state(&TenantKey::from("t1")).await, CircuitState::Closed);
        assert!(breaker.check(&TenantKey::from("t1")).await.is_ok());
    }

    #[tokio::test]
    async fn trip_opens_until_cooldown_elapses() {
        let (breaker, clock) = breaker();
        let tenant = TenantKey::from("t1");

        let until = breaker.trip(&tenant).await;
        assert_eq!(breaker.state(&tenant).await, CircuitState::Open { until });
        assert!(matches!(breaker.check(&tenant).await, Err(RelayError::CircuitOpen { .. })));

        clock.advance(Duration::from_secs(3599));
        assert!(breaker.check(&tenant).await.is_err());

        clock.advance(Duration::from_secs(1));
        assert!(breaker.check(&tenant).await.is_ok());
        assert_eq!(breaker.open_count().await, 0);
    }

    #[tokio::test]
    async fn circuits_are_isolated_per_tenant() {
        let (breaker, _) = breaker();

        breaker.trip(&TenantKey::from("t1")).await;

        assert!(breaker.check(&TenantKey::from("t1")).await.is_err());
        assert!(breaker.check(&TenantKey::from("t2")).await.is_ok());
        assert_eq!(breaker.open_count().await, 1);
    }

    #[tokio::test]
    async fn reset_closes_immediately() {
        let (breaker, _) = breaker();
        let tenant = TenantKey::from("t1");

        breaker.trip(&tenant).await;
        breaker.reset(&tenant).await;

        assert_eq!(breaker.state(&tenant).await, CircuitState::Closed);
    }
}
