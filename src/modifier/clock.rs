//! Overrides the wall-clock source used for timestamps (spec §4.4
//! "Clock").

use std::sync::Arc;

use async_trait::async_trait;

use crate::capability::Clock as ClockCapability;
use crate::context::{ClockKey, Context};
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::operation::Operation;

use super::Modifier;

pub struct Clock {
    clock: Arc<dyn ClockCapability>,
}

impl Clock {
    pub fn new(clock: Arc<dyn ClockCapability>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for Clock
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn setup(&self, ctx: &mut Context, _inner: &dyn Operation<V, E>) {
        ctx.set::<ClockKey>(self.clock.clone());
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
