//! The external capability interfaces the core consumes (spec §6):
//! clock, delayer and backoff function. Conditions live in
//! [`crate::modifier::condition`]; the store-cache/creator/logger/memory-
//! pressure capabilities live next to the components that use them
//! ([`crate::client`]).

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Wall-clock timestamp used for `*_last_updated_at` bookkeeping.
///
/// Plain `chrono::DateTime<Utc>` rather than `std::time::Instant`: state
/// reducers reconcile "last updated" across processes/restarts in the
/// systems this core targets, so a calendar timestamp is the useful unit,
/// matching the teacher's `TaskRecord::expires_at` (`chrono::DateTime<Utc>`).
pub type Timestamp = DateTime<Utc>;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A source of the current time (spec §6).
///
/// Must be monotonic-enough that `max(a, b)` over two readings is
/// meaningful for reconciling "last updated" timestamps.
pub trait Clock: Send + Sync + 'static {
    /// The current time.
    fn now(&self) -> Timestamp;
}

/// The system wall clock, used unless a modifier overrides it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// A cancellable sleep (spec §6), substitutable in tests so retry/backoff
/// delays don't actually slow the test suite down.
pub trait Delayer: Send + Sync + 'static {
    /// Sleeps for `seconds`, yielding control back to the runtime.
    fn sleep<'a>(&'a self, seconds: f64) -> BoxFuture<'a, ()>;
}

/// Sleeps via the ambient tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioDelayer;

impl Delayer for TokioDelayer {
    fn sleep<'a>(&'a self, seconds: f64) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.0))).await;
        })
    }
}

/// Delays by zero every time. Used by tests that want deterministic,
/// instantaneous retries.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDelayer;

impl Delayer for NoopDelayer {
    fn sleep<'a>(&'a self, _seconds: f64) -> BoxFuture<'a, ()> {
        Box::pin(async move {})
    }
}

/// `(attempt) -> seconds` (spec §6). `attempt` is 1-based (first retry is
/// attempt 1).
pub type BackoffFn = Arc<dyn Fn(u32) -> f64 + Send + Sync>;
