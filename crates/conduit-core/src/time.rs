//! Clock abstraction shared by the relay, the circuit breaker and webhook
//! timestamp checks.
//!
//! Production code runs on [`RealClock`]. Tests inject [`TestClock`] so that
//! cooldowns and backoff sleeps complete without waiting.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// Source of wall-clock time and sleeping.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current wall-clock time.
    fn now_system(&self) -> SystemTime;

    /// Sleeps for the specified duration.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Returns whole seconds since the Unix epoch.
    fn unix_seconds(&self) -> i64 {
        let secs = self.now_system().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
        i64::try_from(secs).unwrap_or(i64::MAX)
    }
}

/// Clock backed by the operating system and tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a shared real clock.
    pub fn shared() -> SharedClock {
        Arc::new(Self)
    }
}

impl Clock for RealClock {
    fn now_system(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Manually driven clock.
///
/// Cloned handles share the same time. `sleep` advances the clock by the
/// requested duration and yields once, so code that backs off completes
/// immediately while still observing the elapsed time.
#[derive(Debug, Clone)]
pub struct TestClock {
    system_ns: Arc<AtomicU64>,
    slept_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        Self::with_start_time(SystemTime::now())
    }

    /// Creates a test clock starting at a specific time.
    pub fn with_start_time(start: SystemTime) -> Self {
        Self {
            system_ns: Arc::new(AtomicU64::new(to_nanos(
                start.duration_since(UNIX_EPOCH).unwrap_or_default(),
            ))),
            slept_ns: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Creates a test clock at the given Unix timestamp.
    pub fn at_unix(seconds: u64) -> Self {
        Self::with_start_time(UNIX_EPOCH + Duration::from_secs(seconds))
    }

    /// Moves time forward.
    pub fn advance(&self, duration: Duration) {
        self.system_ns.fetch_add(to_nanos(duration), Ordering::AcqRel);
    }

    /// Total time spent in `sleep` calls.
    pub fn total_slept(&self) -> Duration {
        Duration::from_nanos(self.slept_ns.load(Ordering::Acquire))
    }

    /// Returns this clock as a shared trait object handle.
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_system(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.system_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.slept_ns.fetch_add(to_nanos(duration), Ordering::AcqRel);
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

fn to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX)
}
