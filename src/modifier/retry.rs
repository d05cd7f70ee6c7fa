//! Retries the inner operation on failure, with a configurable limit,
//! backoff, and delayer (spec §4.4 "Retry(limit, backoff?, delayer?)").
//!
//! Cancellation always propagates immediately; only retry reacts to
//! ordinary operation errors by looping (spec §7 "Propagation policy").

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::capability::{BackoffFn, Delayer};
use crate::context::{BackoffKey, Context, DelayerKey, RetryIndexKey, RetryLimitKey};
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::operation::Operation;

use super::Modifier;

/// Retries up to `limit` times, re-raising the final error. `backoff`
/// and `delayer` default to whatever is already in context (so nested
/// `Retry`s or a sibling `Backoff`/`Delayer` modifier still apply) unless
/// explicitly overridden here.
pub struct Retry {
    limit: u32,
    backoff: Option<BackoffFn>,
    delayer: Option<Arc<dyn Delayer>>,
}

impl Retry {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            backoff: None,
            delayer: None,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, backoff: BackoffFn) -> Self {
        self.backoff = Some(backoff);
        self
    }

    #[must_use]
    pub fn with_delayer(mut self, delayer: Arc<dyn Delayer>) -> Self {
        self.delayer = Some(delayer);
        self
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for Retry
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn setup(&self, ctx: &mut Context, _inner: &dyn Operation<V, E>) {
        ctx.set::<RetryLimitKey>(self.limit);
        if let Some(backoff) = &self.backoff {
            ctx.set::<BackoffKey>(backoff.clone());
        }
        if let Some(delayer) = &self.delayer {
            ctx.set::<DelayerKey>(delayer.clone());
        }
    }

    async fn run(
        &self,
        ctx: Context,
        inner: Arc<dyn Operation<V, E>>,
        continuation: Continuation<V, E>,
    ) -> Result<V, CoreError<E>> {
        let backoff = self.backoff.clone().unwrap_or_else(|| ctx.get::<BackoffKey>());
        let delayer = self.delayer.clone().unwrap_or_else(|| ctx.get::<DelayerKey>());

        let mut attempt: u32 = 0;
        loop {
            let mut run_ctx = ctx.clone();
            run_ctx.set::<RetryIndexKey>(attempt);
            run_ctx.set::<RetryLimitKey>(self.limit);

            match inner.run(run_ctx, continuation.clone()).await {
                Ok(v) => return Ok(v),
                Err(err) if err.is_cancelled() => return Err(err),
                Err(err) if attempt < self.limit => {
                    debug!(attempt, limit = self.limit, "retrying after failure");
                    let seconds = backoff(attempt + 1);
                    delayer.sleep(seconds).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

/// `true` iff `ctx`'s `retry_index` equals its `retry_limit` -- the
/// derived "is this the last retry attempt" signal (spec §4.4).
pub fn is_last_retry_attempt(ctx: &Context) -> bool {
    ctx.get::<RetryIndexKey>() == ctx.get::<RetryLimitKey>()
}
