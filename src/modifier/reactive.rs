//! Modifiers driven by an external [`Condition`] (spec §4.4 "SuspendOn",
//! "RefetchOnChange", "StaleWhen", §4.9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::context::{AutomaticExecutionConditionKey, Context, StalePredicate, StalePredicatesKey};
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::operation::Operation;
use crate::subscription::Subscription;

use super::condition::Condition;
use super::controller::{Controller, ControllerBody, ControllerHandle};
use super::Modifier;

/// Blocks a run until `condition` first becomes true (spec §4.9
/// "suspend(on:) blocks the run until the condition first becomes
/// true"). A cancellation racing the suspend is handled by
/// [`crate::task::Task::run_if_needed`]'s own select against the task's
/// cancellation token, which drops this future (and with it the
/// condition subscription) and surfaces `Cancelled` -- this modifier
/// doesn't need to watch for cancellation itself.
pub struct SuspendOn {
    condition: Arc<dyn Condition>,
}

impl SuspendOn {
    pub fn new(condition: impl Condition) -> Self {
        Self {
            condition: Arc::new(condition),
        }
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for SuspendOn
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    async fn run(
        &self,
        ctx: Context,
        inner: Arc<dyn Operation<V, E>>,
        continuation: Continuation<V, E>,
    ) -> Result<V, CoreError<E>> {
        wait_for_true(&*self.condition, &ctx).await;
        inner.run(ctx, continuation).await
    }
}

/// Resolves once `condition` reports (or transitions to) `true`.
/// `Condition::subscribe` invokes its handler immediately with the
/// current value, so this resolves right away when the condition is
/// already satisfied.
async fn wait_for_true(condition: &dyn Condition, ctx: &Context) {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let _subscription = condition.subscribe(
        ctx,
        Arc::new(move |satisfied| {
            if satisfied {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(());
                }
            }
        }),
    );
    let _ = rx.await;
}

/// Registers a [`StalePredicate`] tracking `condition`'s current value
/// instead of a time window (spec's `stale_when(condition:)`). The
/// predicate closure ignores its `(now, value_last_updated_at)`
/// arguments and reads the condition's last-notified value instead,
/// since [`StalePredicate`] has no context parameter to re-evaluate
/// `condition.is_satisfied` against.
pub struct StaleWhen {
    condition: Arc<dyn Condition>,
    satisfied: Arc<AtomicBool>,
    subscription: Mutex<Option<Subscription>>,
}

impl StaleWhen {
    pub fn new(condition: impl Condition) -> Self {
        Self {
            condition: Arc::new(condition),
            satisfied: Arc::new(AtomicBool::new(false)),
            subscription: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for StaleWhen
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn setup(&self, ctx: &mut Context, _inner: &dyn Operation<V, E>) {
        let satisfied = self.satisfied.clone();
        let sub = self.condition.subscribe(
            ctx,
            Arc::new(move |value| {
                satisfied.store(value, Ordering::SeqCst);
            }),
        );
        *self.subscription.lock() = Some(sub);

        let satisfied = self.satisfied.clone();
        let predicate: StalePredicate = Arc::new(move |_now, _last_updated_at| satisfied.load(Ordering::SeqCst));
        let mut predicates = ctx.get::<StalePredicatesKey>();
        predicates.push(predicate);
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

/// Refetches when `condition` transitions false→true, but only while the
/// store has subscribers and its value is stale (spec §4.9
/// "refetch_on_change"). Built atop [`Controller`] since reacting outside
/// any single run needs a long-lived handle into the store.
struct RefetchOnChangeBody {
    condition: Arc<dyn Condition>,
}

#[async_trait]
impl<V, E> ControllerBody<V, E> for RefetchOnChangeBody
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    async fn attach(&self, handle: ControllerHandle<V, E>) -> Subscription {
        let ctx = handle.context();
        let previous = Arc::new(AtomicBool::new(self.condition.is_satisfied(&ctx)));
        self.condition.subscribe(
            &ctx,
            Arc::new(move |value| {
                let was_satisfied = previous.swap(value, Ordering::SeqCst);
                if !was_satisfied && value && handle.subscriber_count() > 0 && handle.is_stale() {
                    handle.yield_refetch();
                }
            }),
        )
    }
}

pub struct RefetchOnChange {
    inner: Controller<RefetchOnChangeBody>,
}

impl RefetchOnChange {
    pub fn new(condition: impl Condition) -> Self {
        Self {
            inner: Controller::new(RefetchOnChangeBody {
                condition: Arc::new(condition),
            }),
        }
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for RefetchOnChange
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn setup(&self, ctx: &mut Context, inner: &dyn Operation<V, E>) {
        Modifier::<V, E>::setup(&self.inner, ctx, inner);
    }

    async fn run(
        &self,
        ctx: Context,
        inner: Arc<dyn Operation<V, E>>,
        continuation: Continuation<V, E>,
    ) -> Result<V, CoreError<E>> {
        Modifier::<V, E>::run(&self.inner, ctx, inner, continuation).await
    }
}

/// Installs (or clears) the condition gating implicit, subscription-
/// triggered runs (spec's `enable_automatic_execution(only_when:)`,
/// read back by [`crate::store::Store::subscribe`]). With no condition,
/// automatic execution stays unconditionally enabled -- the default
/// already assumed when [`AutomaticExecutionConditionKey`] is unset.
pub struct EnableAutomaticExecution {
    only_when: Option<Arc<dyn Condition>>,
}

impl EnableAutomaticExecution {
    /// Always enabled; equivalent to never attaching this modifier.
    pub fn always() -> Self {
        Self { only_when: None }
    }

    /// Enabled only while `condition` is satisfied.
    pub fn only_when(condition: impl Condition) -> Self {
        Self {
            only_when: Some(Arc::new(condition)),
        }
    }
}

#[async_trait]
impl<V, E> Modifier<V, E> for EnableAutomaticExecution
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    fn setup(&self, ctx: &mut Context, _inner: &dyn Operation<V, E>) {
        ctx.set::<AutomaticExecutionConditionKey>(self.only_when.clone());
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
    use crate::path::Path;

    struct Echo;

    #[async_trait]
    impl Operation<i32, String> for Echo {
        fn path(&self) -> Path {
            Path::new(["q"])
        }

        async fn run(&self, _ctx: Context, _continuation: Continuation<i32, String>) -> Result<i32, CoreError<String>> {
            Ok(1)
        }
    }

    struct Fixed(AtomicBool);

    impl Condition for Fixed {
        fn is_satisfied(&self, _ctx: &Context) -> bool {
            self.0.load(Ordering::SeqCst)
        }

        fn subscribe(&self, _ctx: &Context, handler: Arc<dyn Fn(bool) + Send + Sync>) -> Subscription {
            handler(self.0.load(Ordering::SeqCst));
            Subscription::empty()
        }
    }

    #[tokio::test]
    async fn suspend_on_already_true_runs_immediately() {
        let modifier = SuspendOn::new(Fixed(AtomicBool::new(true)));
        let inner: Arc<dyn Operation<i32, String>> = Arc::new(Echo);
        let ctx = Context::new();
        let continuation = Continuation::new(ctx.clone(), Arc::new(|_r: Result<i32, CoreError<String>>, _c| {}));
        let result = modifier.run(ctx, inner, continuation).await;
        assert_eq!(result.unwrap(), 1);
    }

    #[test]
    fn enable_automatic_execution_only_when_writes_condition() {
        let modifier = EnableAutomaticExecution::only_when(Fixed(AtomicBool::new(false)));
        let mut ctx = Context::new();
        let inner = Echo;
        Modifier::<i32, String>::setup(&modifier, &mut ctx, &inner);
        let condition = ctx.get::<AutomaticExecutionConditionKey>();
        assert!(condition.is_some());
        assert!(!condition.unwrap().is_satisfied(&ctx));
    }

    #[test]
    fn stale_when_predicate_follows_condition() {
        let condition = Fixed(AtomicBool::new(false));
        let modifier = StaleWhen::new(condition);
        let mut ctx = Context::new();
        let inner = Echo;
        Modifier::<i32, String>::setup(&modifier, &mut ctx, &inner);
        let predicates = ctx.get::<StalePredicatesKey>();
        assert!(!predicates.last().unwrap()(chrono::Utc::now(), None));
    }

    #[test]
    fn refetch_on_change_counts_as_a_controller_attachment() {
        use crate::modifier::controller::ControllerAttachmentsKey;

        let modifier = RefetchOnChange::new(Fixed(AtomicBool::new(false)));
        let mut ctx = Context::new();
        let inner = Echo;
        Modifier::<i32, String>::setup(&modifier, &mut ctx, &inner);
        let pending = ctx.get::<ControllerAttachmentsKey<i32, String>>();
        assert_eq!(pending.len(), 1);
    }
}
