//! Registers a staleness predicate (spec §4.4 "Stale(predicate)").
//!
//! `stale(after: d)` is the common case: the value is stale once `now -
//! value_last_updated_at > d`. Attaching more than one `stale*` modifier
//! composes by logical OR -- every predicate is appended to
//! [`StalePredicatesKey`](crate::context::StalePredicatesKey), and the
//! store considers the state stale iff any of them says so.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::capability::Timestamp;
use crate::context::{Context, StalePredicate, StalePredicatesKey};
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::operation::Operation;

use super::Modifier;

pub struct Stale {
    predicate: StalePredicate,
}

impl Stale {
    /// Registers an arbitrary predicate.
    pub fn new(predicate: StalePredicate) -> Self {
        Self { predicate }
    }

    /// Stale once `now - value_last_updated_at > after`.
    pub fn after(after: Duration) -> Self {
        Self::new(Arc::new(move |now: Timestamp, last_updated_at| {
            match last_updated_at {
                None => true,
                Some(last) => (now - last)
                    .to_std()
                    .map(|elapsed| elapsed > after)
                    .unwrap_or(false),
            }
        }))
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for Stale
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn setup(&self, ctx: &mut Context, _inner: &dyn Operation<V, E>) {
        let mut predicates = ctx.get::<StalePredicatesKey>();
        predicates.push(self.predicate.clone());
        ctx.set::<StalePredicatesKey>(predicates);
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

/// `true` iff any registered predicate considers the state stale.
pub fn is_stale(ctx: &Context, now: Timestamp, value_last_updated_at: Option<Timestamp>) -> bool {
    ctx.get::<StalePredicatesKey>()
        .iter()
        .any(|p| p(now, value_last_updated_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn never_updated_is_stale() {
        let ctx = Context::new();
        assert!(is_stale(&ctx, Utc::now(), None));
    }

    #[test]
    fn within_window_is_not_stale() {
        let mut ctx = Context::new();
        let mut predicates = ctx.get::<StalePredicatesKey>();
        predicates.clear();
        predicates.push(Stale::after(Duration::from_secs(60)).predicate);
        ctx.set::<StalePredicatesKey>(predicates);
        assert!(!is_stale(&ctx, Utc::now(), Some(Utc::now())));
    }
}
