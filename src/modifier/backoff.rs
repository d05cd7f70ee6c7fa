//! Backoff functions consulted between retry attempts (spec §4.4
//! "Backoff(function)").
//!
//! Each constructor returns a [`BackoffFn`] -- `(attempt: u32) -> seconds`
//! with `attempt` 1-based (the first retry is attempt 1). Any of them can
//! be wrapped in [`jittered`] for a uniform-random delay in `[0, f(n))`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::capability::BackoffFn;
use crate::context::{BackoffKey, Context};
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::operation::Operation;

use super::Modifier;

/// Always waits the same duration.
pub fn constant(delay: Duration) -> BackoffFn {
    let seconds = delay.as_secs_f64();
    Arc::new(move |_attempt| seconds)
}

/// Waits `step * attempt`.
pub fn linear(step: Duration) -> BackoffFn {
    let seconds = step.as_secs_f64();
    Arc::new(move |attempt| seconds * f64::from(attempt))
}

/// Waits `base * 2^(attempt-1)`.
pub fn exponential(base: Duration) -> BackoffFn {
    let seconds = base.as_secs_f64();
    Arc::new(move |attempt| seconds * 2f64.powi(attempt.saturating_sub(1) as i32))
}

/// Waits `base * fib(attempt)` (`fib(1) = fib(2) = 1`).
pub fn fibonacci(base: Duration) -> BackoffFn {
    let seconds = base.as_secs_f64();
    Arc::new(move |attempt| seconds * fib(attempt) as f64)
}

fn fib(n: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 0..n {
        let next = a + b;
        a = b;
        b = next;
    }
    a
}

/// Wraps `f` so each call returns a uniform random value in `[0, f(n))`
/// instead of `f(n)` itself.
pub fn jittered(f: BackoffFn) -> BackoffFn {
    Arc::new(move |attempt| {
        let upper = f(attempt);
        if upper <= 0.0 {
            return 0.0;
        }
        rand::thread_rng().gen_range(0.0..upper)
    })
}

/// Overrides the context's backoff function for this store and
/// everything nested inside it (spec §4.4 "Backoff(function)").
pub struct Backoff {
    function: BackoffFn,
}

impl Backoff {
    pub fn new(function: BackoffFn) -> Self {
        Self { function }
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for Backoff
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn setup(&self, ctx: &mut Context, _inner: &dyn Operation<V, E>) {
        ctx.set::<BackoffKey>(self.function.clone());
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_ignores_attempt() {
        let f = constant(Duration::from_secs(2));
        assert_eq!(f(1), 2.0);
        assert_eq!(f(5), 2.0);
    }

    #[test]
    fn linear_scales_with_attempt() {
        let f = linear(Duration::from_secs(1));
        assert_eq!(f(3), 3.0);
    }

    #[test]
    fn exponential_doubles_each_attempt() {
        let f = exponential(Duration::from_secs(1));
        assert_eq!(f(1), 1.0);
        assert_eq!(f(2), 2.0);
        assert_eq!(f(3), 4.0);
    }

    #[test]
    fn fibonacci_matches_sequence() {
        let f = fibonacci(Duration::from_secs(1));
        assert_eq!(f(1), 1.0);
        assert_eq!(f(2), 1.0);
        assert_eq!(f(3), 2.0);
        assert_eq!(f(4), 3.0);
        assert_eq!(f(5), 5.0);
    }

    #[test]
    fn jittered_stays_in_bounds() {
        let f = jittered(constant(Duration::from_secs(1)));
        for attempt in 1..10 {
            let v = f(attempt);
            assert!((0.0..1.0).contains(&v));
        }
    }
}
