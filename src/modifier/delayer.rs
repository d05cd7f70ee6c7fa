//! Overrides the ambient sleep mechanism (spec §4.4 "Delayer"), letting
//! tests substitute an instantaneous delayer so retry/backoff delays
//! don't slow the suite down.

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::Delayer as DelayerCapability;
use crate::context::{Context, DelayerKey};
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::operation::Operation;

use super::Modifier;

pub struct Delayer {
    delayer: Arc<dyn DelayerCapability>,
}

impl Delayer {
    pub fn new(delayer: Arc<dyn DelayerCapability>) -> Self {
        Self { delayer }
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for Delayer
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn setup(&self, ctx: &mut Context, _inner: &dyn Operation<V, E>) {
        ctx.set::<DelayerKey>(self.delayer.clone());
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
