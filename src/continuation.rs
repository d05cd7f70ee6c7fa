//! Intermediate-value publishing during an operation run (spec §4.6).
//!
//! Every `run`/`fetch_page` body receives a [`Continuation`]. Calling
//! [`Continuation::yield_result`] publishes a value or error without
//! ending the run; the final `Result` returned by the body is reported
//! separately, tagged [`ResultUpdateReason::ReturnedFinalResult`].

use std::sync::Arc;

use crate::context::Context;
use crate::error::CoreError;

/// Why a result reached the store's subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultUpdateReason {
    /// Published via [`Continuation::yield_result`] mid-run.
    Yielded,
    /// The final `Result` the operation body returned.
    ReturnedFinalResult,
}

/// A single intermediate (or final) publication.
pub struct Yielded<V, E> {
    pub result: Result<V, CoreError<E>>,
    pub context: Context,
}

type YieldSink<V, E> = Arc<dyn Fn(Result<V, CoreError<E>>, Context) + Send + Sync>;

/// Handle passed to an operation body so it can publish intermediate
/// results before returning its final one.
pub struct Continuation<V, E> {
    sink: YieldSink<V, E>,
    context: Context,
}

impl<V, E> Continuation<V, E> {
    /// Builds a continuation that forwards every yield to `sink` along
    /// with the context in effect at yield time (defaulting to the
    /// continuation's own context when the caller passes `None`).
    pub fn new(context: Context, sink: YieldSink<V, E>) -> Self {
        Self { sink, context }
    }

    /// The context this continuation was constructed with.
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// Publishes an intermediate result. `ctx` overrides the context the
    /// yield is attributed to (used by controllers yielding from outside
    /// a run); `None` uses this continuation's own context.
    pub fn yield_result(&self, result: Result<V, CoreError<E>>, ctx: Option<Context>) {
        (self.sink)(result, ctx.unwrap_or_else(|| self.context.clone()));
    }
}

impl<V, E> Clone for Continuation<V, E> {
    fn clone(&self) -> Self {
        Self {
            sink: self.sink.clone(),
            context: self.context.clone(),
        }
    }
}
