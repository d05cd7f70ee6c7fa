//! Scenario tests for the plain `Query` operation variant (spec §8
//! scenarios 1-2).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use query_core::context::{Context, RetryIndexKey};
use query_core::continuation::Continuation;
use query_core::error::CoreError;
use query_core::modifier::dedup::{always_equivalent, Dedup};
use query_core::modifier::retry::Retry;
use query_core::modifier::{backoff, with_modifier};
use query_core::operation::Operation;
use query_core::path::Path;
use query_core::state::query::QueryState;
use query_core::store::Store;
use query_core::capability::NoopDelayer;

struct CountingFetch {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Operation<i32, String> for CountingFetch {
    fn path(&self) -> Path {
        Path::new(["dedup-q"])
    }

    async fn run(
        &self,
        _ctx: Context,
        _continuation: Continuation<i32, String>,
    ) -> Result<i32, CoreError<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(99)
    }
}

#[tokio::test]
async fn dedup_hit_collapses_to_one_underlying_call() {
    let calls = Arc::new(AtomicUsize::new(0));
    let base: Arc<dyn Operation<i32, String>> = Arc::new(CountingFetch { calls: calls.clone() });
    let op = with_modifier(base, Dedup::new(always_equivalent()));
    let store = Store::new(op, Context::new(), QueryState::<i32, String>::new()).await;

    let store1 = store.clone();
    let store2 = store.clone();
    let run1 = tokio::spawn(async move { store1.run(None).await });
    let run2 = tokio::spawn(async move { store2.run(None).await });

    let (r1, r2) = tokio::join!(run1, run2);
    assert_eq!(r1.unwrap().unwrap(), 99);
    assert_eq!(r2.unwrap().unwrap(), 99);
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(store.with_exclusive_access(|s| s.value_update_count), 1);
}

struct FlakyThenSucceeds {
    attempts: Arc<AtomicUsize>,
    observed_indices: Arc<Mutex<Vec<u32>>>,
}

#[async_trait]
impl Operation<String, String> for FlakyThenSucceeds {
    fn path(&self) -> Path {
        Path::new(["retry-q"])
    }

    async fn run(
        &self,
        ctx: Context,
        _continuation: Continuation<String, String>,
    ) -> Result<String, CoreError<String>> {
        self.observed_indices.lock().push(ctx.get::<RetryIndexKey>());
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < 2 {
            Err(CoreError::Operation("boom".to_string()))
        } else {
            Ok("Y".to_string())
        }
    }
}

#[tokio::test]
async fn retry_with_backoff_succeeds_on_third_attempt() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let observed_indices = Arc::new(Mutex::new(Vec::new()));
    let base: Arc<dyn Operation<String, String>> = Arc::new(FlakyThenSucceeds {
        attempts: attempts.clone(),
        observed_indices: observed_indices.clone(),
    });
    let op = with_modifier(
        base,
        Retry::new(3)
            .with_backoff(backoff::constant(Duration::ZERO))
            .with_delayer(Arc::new(NoopDelayer)),
    );
    let store = Store::new(op, Context::new(), QueryState::<String, String>::new()).await;

    let result = store.run(None).await;

    assert_eq!(result.unwrap(), "Y");
    assert_eq!(*observed_indices.lock(), vec![0, 1, 2]);
    assert_eq!(store.with_exclusive_access(|s| s.error_update_count), 0);
    assert_eq!(store.with_exclusive_access(|s| s.value_update_count), 1);
}
