//! Sets executor hints consumed when launching a task's handle (spec
//! §4.4 "TaskConfiguration(cfg)").

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, TaskConfig, TaskConfigKey};
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::operation::Operation;

use super::Modifier;

pub struct TaskConfiguration {
    config: TaskConfig,
}

impl TaskConfiguration {
    pub fn new(config: TaskConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for TaskConfiguration
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn setup(&self, ctx: &mut Context, _inner: &dyn Operation<V, E>) {
        ctx.set::<TaskConfigKey>(self.config.clone());
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
