//! Joins concurrent equivalent runs onto one in-flight operation body
//! (spec §4.4 "Dedup(equiv)").
//!
//! Entries self-remove once their shared work completes. Waiters that
//! join an existing entry observe the *originator's* context (spec §5
//! "Dedup preserves first-caller semantics"); dropping a waiter never
//! cancels the shared work, only dropping the last reference does
//! (`futures::future::Shared`'s own drop semantics give us this for
//! free).

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::{FutureExt, Shared};
use tracing::debug;

use crate::context::Context;
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::operation::Operation;

use super::Modifier;

/// `(candidate_context, new_context) -> bool`.
pub type EquivFn = Arc<dyn Fn(&Context, &Context) -> bool + Send + Sync>;

/// An equiv that joins every concurrent run unconditionally -- the right
/// default for a plain query, where the store's path already
/// disambiguates distinct operations.
pub fn always_equivalent() -> EquivFn {
    Arc::new(|_a, _b| true)
}

/// An equiv comparing the paging-request descriptor in context (spec
/// §4.5: "the default `equiv` compares the paging-request descriptor
/// derived from context").
pub fn paging_request_equiv<PID>() -> EquivFn
where
    PID: PartialEq + Clone + Send + Sync + 'static,
{
    Arc::new(|a, b| {
        a.get::<crate::operation::PagingRequestKey<PID>>()
            == b.get::<crate::operation::PagingRequestKey<PID>>()
    })
}

type SharedResult<V, E> = Shared<Pin<Box<dyn Future<Output = Result<V, CoreError<E>>> + Send>>>;

struct Entry<V, E> {
    id: u64,
    context: Context,
    handle: SharedResult<V, E>,
}

/// Deduplicates concurrent runs whose contexts compare equal under
/// `equiv`.
pub struct Dedup<V, E> {
    equiv: EquivFn,
    entries: DashMap<u64, Entry<V, E>>,
    next_id: AtomicU64,
}

impl<V, E> Dedup<V, E> {
    pub fn new(equiv: EquivFn) -> Self {
        Self {
            equiv,
            entries: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for Dedup<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    async fn run(
        &self,
        ctx: Context,
        inner: Arc<dyn Operation<V, E>>,
        continuation: Continuation<V, E>,
    ) -> Result<V, CoreError<E>> {
        let existing = self
            .entries
            .iter()
            .find(|e| (self.equiv)(&e.context, &ctx))
            .map(|e| (e.id, e.handle.clone()));

        if let Some((id, handle)) = existing {
            debug!(entry = id, "joining in-flight run");
            return handle.await;
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let originator_ctx = ctx.clone();
        let fut: Pin<Box<dyn Future<Output = Result<V, CoreError<E>>> + Send>> =
            Box::pin(async move { inner.run(originator_ctx, continuation).await });
        let shared = fut.shared();

        self.entries.insert(
            id,
            Entry {
                id,
                context: ctx,
                handle: shared.clone(),
            },
        );

        let result = shared.await;
        self.entries.remove(&id);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct CountingOp {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Operation<i32, String> for CountingOp {
        fn path(&self) -> Path {
            Path::new(["q"])
        }

        async fn run(
            &self,
            _ctx: Context,
            _continuation: Continuation<i32, String>,
        ) -> Result<i32, CoreError<String>> {
            self.calls.fetch_add(1, AtomicOrdering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            Ok(42)
        }
    }

    #[tokio::test]
    async fn concurrent_equivalent_runs_share_one_invocation() {
        let calls = Arc::new(AtomicUsize::new(0));
        let inner: Arc<dyn Operation<i32, String>> = Arc::new(CountingOp {
            calls: calls.clone(),
        });
        let dedup = Arc::new(Dedup::new(always_equivalent()));

        let ctx = Context::new();
        let continuation_for =
            |ctx: Context| Continuation::new(ctx, Arc::new(|_result: Result<i32, CoreError<String>>, _ctx| {}));

        let d1 = dedup.clone();
        let i1 = inner.clone();
        let c1 = ctx.clone();
        let call1 = tokio::spawn(async move { d1.run(c1.clone(), i1, continuation_for(c1)).await });

        let d2 = dedup.clone();
        let i2 = inner.clone();
        let c2 = ctx.clone();
        let call2 = tokio::spawn(async move { d2.run(c2.clone(), i2, continuation_for(c2)).await });

        let (r1, r2) = tokio::join!(call1, call2);
        assert_eq!(r1.unwrap().unwrap(), 42);
        assert_eq!(r2.unwrap().unwrap(), 42);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }
}
