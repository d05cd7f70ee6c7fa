//! External boolean capability with immediate-and-change notification
//! (spec §4.9, §6 "Condition").
//!
//! Conditions drive `enable_automatic_execution(only_when:)`,
//! `stale_when`, `suspend(on:)`, and `refetch_on_change(of:)`. They are
//! composable with `&&`, `||`, `!`.

use std::sync::Arc;

use crate::context::Context;
use crate::subscription::Subscription;

/// An external boolean signal.
///
/// `subscribe` must invoke `handler` once immediately with the current
/// value, then again on every subsequent change -- callers rely on this
/// to avoid a separate initial `is_satisfied` probe racing the first
/// notification.
pub trait Condition: Send + Sync + 'static {
    /// The condition's value right now.
    fn is_satisfied(&self, ctx: &Context) -> bool;

    /// Registers `handler`, invoked immediately and on every change.
    /// Dropping/cancelling the returned [`Subscription`] stops further
    /// invocations.
    fn subscribe(
        &self,
        ctx: &Context,
        handler: Arc<dyn Fn(bool) + Send + Sync>,
    ) -> Subscription;
}

/// Always satisfied; the default for `enable_automatic_execution` when
/// no `only_when` condition is supplied.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

impl Condition for Always {
    fn is_satisfied(&self, _ctx: &Context) -> bool {
        true
    }

    fn subscribe(&self, _ctx: &Context, handler: Arc<dyn Fn(bool) + Send + Sync>) -> Subscription {
        handler(true);
        Subscription::empty()
    }
}

struct And(Arc<dyn Condition>, Arc<dyn Condition>);

impl Condition for And {
    fn is_satisfied(&self, ctx: &Context) -> bool {
        self.0.is_satisfied(ctx) && self.1.is_satisfied(ctx)
    }

    fn subscribe(&self, ctx: &Context, handler: Arc<dyn Fn(bool) + Send + Sync>) -> Subscription {
        combine_pair(&self.0, &self.1, ctx, handler, |a, b| a && b)
    }
}

struct Or(Arc<dyn Condition>, Arc<dyn Condition>);

impl Condition for Or {
    fn is_satisfied(&self, ctx: &Context) -> bool {
        self.0.is_satisfied(ctx) || self.1.is_satisfied(ctx)
    }

    fn subscribe(&self, ctx: &Context, handler: Arc<dyn Fn(bool) + Send + Sync>) -> Subscription {
        combine_pair(&self.0, &self.1, ctx, handler, |a, b| a || b)
    }
}

struct Not(Arc<dyn Condition>);

impl Condition for Not {
    fn is_satisfied(&self, ctx: &Context) -> bool {
        !self.0.is_satisfied(ctx)
    }

    fn subscribe(&self, ctx: &Context, handler: Arc<dyn Fn(bool) + Send + Sync>) -> Subscription {
        self.0.subscribe(ctx, Arc::new(move |v| handler(!v)))
    }
}

fn combine_pair(
    left: &Arc<dyn Condition>,
    right: &Arc<dyn Condition>,
    ctx: &Context,
    handler: Arc<dyn Fn(bool) + Send + Sync>,
    combine: fn(bool, bool) -> bool,
) -> Subscription {
    let left_state = parking_lot::Mutex::new(left.is_satisfied(ctx));
    let right_state = parking_lot::Mutex::new(right.is_satisfied(ctx));
    let left_state = Arc::new(left_state);
    let right_state = Arc::new(right_state);

    let ls = left_state.clone();
    let rs = right_state.clone();
    let h1 = handler.clone();
    let left_sub = left.subscribe(
        ctx,
        Arc::new(move |v| {
            *ls.lock() = v;
            h1(combine(v, *rs.lock()));
        }),
    );

    let ls = left_state;
    let rs = right_state;
    let right_sub = right.subscribe(
        ctx,
        Arc::new(move |v| {
            *rs.lock() = v;
            handler(combine(*ls.lock(), v));
        }),
    );

    Subscription::combined([left_sub, right_sub])
}

/// Extension methods building composite conditions, mirroring `&&`/`||`/`!`.
pub trait ConditionExt: Condition + Sized + 'static {
    fn and(self, other: impl Condition) -> Arc<dyn Condition>
    where
        Self: Sized,
    {
        Arc::new(And(Arc::new(self), Arc::new(other)))
    }

    fn or(self, other: impl Condition) -> Arc<dyn Condition>
    where
        Self: Sized,
    {
        Arc::new(Or(Arc::new(self), Arc::new(other)))
    }

    fn negate(self) -> Arc<dyn Condition>
    where
        Self: Sized,
    {
        Arc::new(Not(Arc::new(self)))
    }
}

impl<T: Condition + Sized + 'static> ConditionExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixed(AtomicBool);

    impl Condition for Fixed {
        fn is_satisfied(&self, _ctx: &Context) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        fn subscribe(
            &self,
            _ctx: &Context,
            handler: Arc<dyn Fn(bool) + Send + Sync>,
        ) -> Subscription {
            handler(self.0.load(Ordering::SeqCst));
            Subscription::empty()
        }
    }

    #[test]
    fn always_is_satisfied() {
        let ctx = Context::new();
        assert!(Always.is_satisfied(&ctx));
    }

    #[test]
    fn and_requires_both() {
        let ctx = Context::new();
        let a = Fixed(AtomicBool::new(true));
        let b = Fixed(AtomicBool::new(false));
        let combined = a.and(b);
        assert!(!combined.is_satisfied(&ctx));
    }

    #[test]
    fn negate_flips_value() {
        let ctx = Context::new();
        let a = Fixed(AtomicBool::new(true));
        assert!(!a.negate().is_satisfied(&ctx));
    }
}
