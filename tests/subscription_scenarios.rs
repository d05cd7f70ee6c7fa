//! Scenario test for subscription-triggered cancellation (spec §8
//! scenario 6).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use query_core::context::Context;
use query_core::continuation::Continuation;
use query_core::error::CoreError;
use query_core::operation::Operation;
use query_core::path::Path;
use query_core::state::query::QueryState;
use query_core::store::{Store, StoreObserver};

struct SleepForever;

#[async_trait]
impl Operation<i32, String> for SleepForever {
    fn path(&self) -> Path {
        Path::new(["sleep-q"])
    }

    async fn run(
        &self,
        _ctx: Context,
        _continuation: Continuation<i32, String>,
    ) -> Result<i32, CoreError<String>> {
        std::future::pending::<Result<i32, CoreError<String>>>().await
    }
}

struct CountingObserver {
    run_started: Arc<AtomicUsize>,
    run_ended: Arc<AtomicUsize>,
}

impl StoreObserver<i32, String> for CountingObserver {
    fn on_run_started(&self) {
        self.run_started.fetch_add(1, Ordering::SeqCst);
    }

    fn on_run_ended(&self) {
        self.run_ended.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn cancelling_subscription_cancels_the_in_flight_run() {
    let store = Store::new(Arc::new(SleepForever), Context::new(), QueryState::<i32, String>::new()).await;

    let run_started = Arc::new(AtomicUsize::new(0));
    let run_ended = Arc::new(AtomicUsize::new(0));
    let observer = Arc::new(CountingObserver {
        run_started: run_started.clone(),
        run_ended: run_ended.clone(),
    });

    let subscription = store.subscribe(observer);
    assert_eq!(run_started.load(Ordering::SeqCst), 1);

    subscription.cancel();

    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
    tokio::time::sleep(Duration::from_millis(20)).await;

    let error_is_cancelled = store.with_exclusive_access(|s| s.error.as_ref().map(|e| e.is_cancelled()));
    assert_eq!(error_is_cancelled, Some(true));
    assert!(!store.with_exclusive_access(|s| s.is_loading()));

    // The only subscriber unsubscribed itself by cancelling, so it never
    // observes the run actually settling.
    assert_eq!(run_ended.load(Ordering::SeqCst), 0);
}
