//! Grants the operation a long-lived external handle to yield values,
//! errors, and refetch requests into the store from outside any single
//! run (spec §4.4 "Controller", §6 "Controller").
//!
//! Unlike the other modifiers, a controller's lifetime is the *store's*,
//! not a single run's: attaching happens once, when the store is
//! created, not every time `run` is called. [`Controller::setup`]
//! therefore doesn't wrap `run` at all -- it queues an attachment
//! request that [`crate::store::Store::new`] drains once it has a
//! [`ControllerTarget`] to hand out.

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, ContextKey};
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::operation::Operation;
use crate::subscription::Subscription;

use super::Modifier;

/// What a [`Controller`]'s body is allowed to do to its store.
pub trait ControllerTarget<V, E>: Send + Sync + 'static {
    /// Publishes a value or error as if a controller-driven `run` had
    /// just completed (spec's `set_result`).
    fn yield_value(&self, result: Result<V, CoreError<E>>, ctx: Option<Context>);
    /// Requests a fresh `run`, as if a subscriber-triggered refetch
    /// fired.
    fn yield_refetch(&self);
    /// Resets the store's state (spec's `reset_state`).
    fn reset_state(&self, ctx: Option<Context>);
    /// The store's context at the moment of the call.
    fn context(&self) -> Context;
    /// The store's current subscriber count.
    fn subscriber_count(&self) -> usize;
    /// Whether the store's current value is stale right now.
    fn is_stale(&self) -> bool;
}

/// The handle passed to a controller body.
pub struct ControllerHandle<V, E> {
    target: Arc<dyn ControllerTarget<V, E>>,
}

impl<V, E> ControllerHandle<V, E> {
    pub fn new(target: Arc<dyn ControllerTarget<V, E>>) -> Self {
        Self { target }
    }

    pub fn yield_value(&self, result: Result<V, CoreError<E>>, ctx: Option<Context>) {
        self.target.yield_value(result, ctx);
    }

    pub fn yield_refetch(&self) {
        self.target.yield_refetch();
    }

    pub fn reset_state(&self, ctx: Option<Context>) {
        self.target.reset_state(ctx);
    }

    pub fn context(&self) -> Context {
        self.target.context()
    }

    pub fn subscriber_count(&self) -> usize {
        self.target.subscriber_count()
    }

    pub fn is_stale(&self) -> bool {
        self.target.is_stale()
    }
}

impl<V, E> Clone for ControllerHandle<V, E> {
    fn clone(&self) -> Self {
        Self {
            target: self.target.clone(),
        }
    }
}

/// A controller body: given a handle, returns a [`Subscription`] that
/// tears down whatever external driving it installed (spec §6
/// "returns a `Subscription` invoked on teardown").
#[async_trait]
pub trait ControllerBody<V, E>: Send + Sync + 'static {
    async fn attach(&self, handle: ControllerHandle<V, E>) -> Subscription;
}

type AttachFn<V, E> =
    Arc<dyn Fn(ControllerHandle<V, E>) -> Pin<Box<dyn Future<Output = Subscription> + Send>> + Send + Sync>;

/// One queued attachment request, drained by `Store::new`.
pub struct PendingAttachment<V, E> {
    pub attach: AttachFn<V, E>,
}

impl<V, E> Clone for PendingAttachment<V, E> {
    fn clone(&self) -> Self {
        Self {
            attach: self.attach.clone(),
        }
    }
}

/// Per-`(V, E)` queue of controller attachments requested during setup.
pub struct ControllerAttachmentsKey<V, E>(PhantomData<(V, E)>);

impl<V, E> ContextKey for ControllerAttachmentsKey<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    type Value = Vec<PendingAttachment<V, E>>;
    fn default_value() -> Self::Value {
        Vec::new()
    }
}

/// The `Controller` modifier itself.
pub struct Controller<B> {
    body: Arc<B>,
}

impl<B> Controller<B> {
    pub fn new(body: B) -> Self {
        Self {
            body: Arc::new(body),
        }
    }
}

#[async_trait]
impl<V, E, B> Modifier<V, E> for Controller<B>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
    B: ControllerBody<V, E>,
{
    fn setup(&self, ctx: &mut Context, _inner: &dyn Operation<V, E>) {
        let body = self.body.clone();
        let mut pending = ctx.get::<ControllerAttachmentsKey<V, E>>();
        pending.push(PendingAttachment {
            attach: Arc::new(move |handle| {
                let body = body.clone();
                Box::pin(async move { body.attach(handle).await })
            }),
        });
        ctx.set::<ControllerAttachmentsKey<V, E>>(pending);
    }

    async fn run(
        &self,
        ctx: Context,
        inner: Arc<dyn Operation<V, E>>,
        continuation: Continuation<V, E>,
    ) -> Result<V, CoreError<E>> {
        inner.run(ctx, continuation).await
    }
}
