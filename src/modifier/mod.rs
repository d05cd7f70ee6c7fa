//! Composable wrappers around an operation's `run` (spec §4.4 "Modifier
//! Composition").
//!
//! `op.modifier(a).modifier(b)` builds a tree where `b` outermost wraps
//! `a`, which wraps the base operation: calling [`ModifiedOperation::run`]
//! enters `b` first, which decides when (and whether) to call through to
//! `a`, which decides when to call the base operation.

pub mod backoff;
pub mod clock;
pub mod condition;
pub mod controller;
pub mod dedup;
pub mod delayer;
pub mod reactive;
pub mod retry;
pub mod stale;
pub mod task_config;

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::operation::Operation;
use crate::path::Path;

/// A single layer in a modifier chain.
#[async_trait]
pub trait Modifier<V, E>: Send + Sync + 'static
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Called once, outer-to-inner, when the owning store is created.
    /// Modifiers that publish ambient defaults (backoff, clock, delayer,
    /// task configuration) override this; most don't need to.
    fn setup(&self, _ctx: &mut Context, _inner: &dyn Operation<V, E>) {}

    /// Runs this layer. Call `inner.run(ctx, continuation)` to proceed
    /// to the wrapped operation; a modifier that never calls through
    /// short-circuits the chain (e.g. `Suspend` while its condition is
    /// false).
    async fn run(
        &self,
        ctx: Context,
        inner: Arc<dyn Operation<V, E>>,
        continuation: Continuation<V, E>,
    ) -> Result<V, CoreError<E>>;
}

/// An [`Operation`] produced by wrapping `inner` with `modifier`.
pub struct ModifiedOperation<V, E> {
    inner: Arc<dyn Operation<V, E>>,
    modifier: Arc<dyn Modifier<V, E>>,
}

#[async_trait]
impl<V, E> Operation<V, E> for ModifiedOperation<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn path(&self) -> Path {
        self.inner.path()
    }

    async fn run(&self, ctx: Context, continuation: Continuation<V, E>) -> Result<V, CoreError<E>> {
        self.modifier.run(ctx, self.inner.clone(), continuation).await
    }

    fn setup(&self, ctx: &mut Context) {
        self.modifier.setup(ctx, &*self.inner);
        self.inner.setup(ctx);
    }
}

/// Builder extension adding `.modifier(...)` to any operation handle.
pub trait OperationExt<V, E>: Operation<V, E> + Sized
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Wraps `self` with `modifier`, which becomes the new outermost
    /// layer.
    fn modifier(self: Arc<Self>, modifier: impl Modifier<V, E>) -> Arc<dyn Operation<V, E>> {
        Arc::new(ModifiedOperation {
            inner: self,
            modifier: Arc::new(modifier),
        })
    }
}

impl<V, E, T> OperationExt<V, E> for T
where
    T: Operation<V, E>,
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
}

/// Same as [`OperationExt::modifier`] but starting from an already
/// type-erased `Arc<dyn Operation<V, E>>`, which has no static `Self` to
/// hang the extension trait off of.
pub fn with_modifier<V, E>(
    op: Arc<dyn Operation<V, E>>,
    modifier: impl Modifier<V, E>,
) -> Arc<dyn Operation<V, E>>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    Arc::new(ModifiedOperation {
        inner: op,
        modifier: Arc::new(modifier),
    })
}
