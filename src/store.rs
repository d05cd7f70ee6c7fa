//! Per-operation state container, subscriber registry, task scheduler
//! and event dispatcher (spec §3 "Store", §4.7).

use std::any::Any;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::context::{Context, MutationArgsKey, RunningTaskIdKey};
use crate::continuation::{Continuation, ResultUpdateReason};
use crate::error::CoreError;
use crate::modifier::controller::{ControllerAttachmentsKey, ControllerHandle, ControllerTarget};
use crate::modifier::stale;
use crate::operation::{Operation, PagingRequestKey};
use crate::path::Path;
use crate::state::mutation::MutationState;
use crate::state::paginated::{Page, PaginatedState, PagingRequest};
use crate::state::{OpaqueState, Reducer};
use crate::subscription::Subscription;
use crate::task::{Task, TaskId};

/// Observer callbacks dispatched for each run (spec §4.7 "Event dispatch
/// order"). All methods default to doing nothing so a handler can
/// implement only what it needs.
pub trait StoreObserver<V, E>: Send + Sync + 'static {
    fn on_state_changed(&self) {}
    fn on_run_started(&self) {}
    fn on_result_received(&self, _result: &Result<V, CoreError<E>>, _reason: ResultUpdateReason) {}
    /// Fired alongside `on_result_received` for a yield during a
    /// single-page paginated fetch (initial/next/previous, not an
    /// all-pages aggregate), spec §4.6. Never fired for non-paginated
    /// stores.
    fn on_page_result_received(&self, _result: &Result<V, CoreError<E>>, _reason: ResultUpdateReason) {}
    fn on_run_ended(&self) {}
}

struct SubscriberEntry<V, E> {
    id: u64,
    handler: Arc<dyn StoreObserver<V, E>>,
}

/// Reducer-independent surface the [`crate::client::Client`] uses to
/// enumerate stores without naming their concrete `Reducer` type.
pub trait AnyStore: Send + Sync + 'static {
    fn path(&self) -> Path;
    fn state_type_name(&self) -> &'static str;
    fn is_loading(&self) -> bool;
    fn subscriber_count(&self) -> usize;
    /// Recovers the concrete `Arc<Store<S>>` behind an `Arc<dyn AnyStore>`
    /// (via `Arc<dyn Any>::downcast`), since `&dyn Any` alone can't hand
    /// back an owned `Arc` to the caller.
    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Owns one operation's state, a subscriber registry, and the operation
/// (with all modifiers applied). Reference-identified: the client keeps
/// stores by `Arc<Store<S>>`, never by value.
pub struct Store<S: Reducer> {
    operation: Arc<dyn Operation<S::Value, S::Error>>,
    base_context: Mutex<Context>,
    state: Mutex<S>,
    subscribers: Mutex<Vec<SubscriberEntry<S::Value, S::Error>>>,
    next_subscriber_id: AtomicU64,
    implicit_run: Mutex<Option<Task<S::Value, S::Error>>>,
    controller_subscriptions: Mutex<Vec<Subscription>>,
    /// The single in-flight run, if any, shared across every concurrent
    /// `run`/`run_task` caller whose context the reducer's
    /// [`Reducer::run_equiv`] considers the same request (spec §8 "Dedup
    /// hit": two un-awaited `run()` calls before the first resolves
    /// observe one task, one `value_update_count` increment -- but a
    /// concurrent call requesting something else, e.g. a paginated
    /// `previous` fetch while a `next` fetch is in flight, must launch
    /// its own task, not join the other's). A request-body-level `Dedup`
    /// modifier collapses the operation's own work; this collapses the
    /// task-and-counter bookkeeping around it.
    current_run: Mutex<Option<(Context, Task<S::Value, S::Error>)>>,
    /// Set right after construction, so code that only has `&self` (e.g.
    /// the [`ControllerTarget`] impl's `yield_refetch`) can still recover
    /// an `Arc<Self>` to launch a run.
    self_ref: Mutex<Weak<Self>>,
}

impl<S> Store<S>
where
    S: Reducer,
{
    /// Builds a store, runs the operation's modifier `setup` chain once
    /// (outer-to-inner) over `context`, and attaches any queued
    /// controllers.
    pub async fn new(operation: Arc<dyn Operation<S::Value, S::Error>>, mut context: Context, initial_state: S) -> Arc<Self> {
        operation.setup(&mut context);

        let store = Arc::new(Self {
            operation,
            base_context: Mutex::new(context.clone()),
            state: Mutex::new(initial_state),
            subscribers: Mutex::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
            implicit_run: Mutex::new(None),
            controller_subscriptions: Mutex::new(Vec::new()),
            current_run: Mutex::new(None),
            self_ref: Mutex::new(Weak::new()),
        });

        *store.self_ref.lock() = Arc::downgrade(&store);

        let pending = context.get::<ControllerAttachmentsKey<S::Value, S::Error>>();
        if !pending.is_empty() {
            let target: Arc<dyn ControllerTarget<S::Value, S::Error>> = store.clone();
            let mut subs = Vec::with_capacity(pending.len());
            for attachment in pending {
                let handle = ControllerHandle::new(target.clone());
                subs.push((attachment.attach)(handle).await);
            }
            *store.controller_subscriptions.lock() = subs;
        }

        store
    }

    /// The context new runs are overlaid onto.
    pub fn context(&self) -> Context {
        self.base_context.lock().clone()
    }

    fn merged_context(&self, overlay: Option<Context>) -> Context {
        overlay.unwrap_or_else(|| self.context())
    }

    fn state_guard(&self) -> MutexGuard<'_, S> {
        self.state.lock()
    }

    /// Runs `f` while holding the store's lock, so compound
    /// read-modify-write sequences are atomic (spec §4.7
    /// "with_exclusive_access").
    pub fn with_exclusive_access<T>(&self, f: impl FnOnce(&mut S) -> T) -> T {
        let mut guard = self.state_guard();
        f(&mut guard)
    }

    fn notify_state_changed(&self) {
        let handlers: Vec<_> = self
            .subscribers
            .lock()
            .iter()
            .map(|e| e.handler.clone())
            .collect();
        for handler in handlers {
            handler.on_state_changed();
        }
    }

    /// Adds `handler`. If this is the first subscriber and the store's
    /// current value is stale, implicitly launches a run (spec §4.7
    /// "subscribe").
    pub fn subscribe(self: &Arc<Self>, handler: Arc<dyn StoreObserver<S::Value, S::Error>>) -> Subscription
    where
        S::Value: Clone,
        S::Error: Clone,
    {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::Relaxed);
        let was_empty = {
            let mut subs = self.subscribers.lock();
            let was_empty = subs.is_empty();
            subs.push(SubscriberEntry { id, handler });
            was_empty
        };

        if was_empty && self.is_automatic_execution_enabled() && self.is_stale() {
            let task = self.clone().run_task(None);
            *self.implicit_run.lock() = Some(task.clone());
            tokio::spawn(async move {
                let _ = task.run_if_needed().await;
            });
        }

        let store = self.clone();
        Subscription::closure(move || {
            let should_cancel_implicit = {
                let mut subs = store.subscribers.lock();
                subs.retain(|e| e.id != id);
                subs.is_empty()
            };
            if should_cancel_implicit {
                if let Some(task) = store.implicit_run.lock().take() {
                    task.cancel();
                }
            }
        })
    }

    /// `true` unless an `enable_automatic_execution(only_when:)` modifier
    /// installed a condition that currently says otherwise.
    fn is_automatic_execution_enabled(&self) -> bool {
        let ctx = self.context();
        match ctx.get::<crate::context::AutomaticExecutionConditionKey>() {
            Some(condition) => condition.is_satisfied(&ctx),
            None => true,
        }
    }

    /// `true` iff any registered staleness predicate says so (spec §4.4
    /// "Stale", §9).
    pub fn is_stale(&self) -> bool
    where
        S::Value: Clone,
    {
        let ctx = self.context();
        let now = ctx.get::<crate::context::ClockKey>().now();
        let last_updated = self.with_exclusive_access(|state| state.value_last_updated_at());
        stale::is_stale(&ctx, now, last_updated)
    }

    /// Constructs a task for this run without awaiting it: the store's
    /// context overlaid with `ctx_override`, scheduled via the reducer
    /// and wired to update/finish/dispatch on completion.
    pub fn run_task(self: Arc<Self>, ctx_override: Option<Context>) -> Task<S::Value, S::Error>
    where
        S::Value: Clone,
        S::Error: Clone,
    {
        let run_ctx = self.merged_context(ctx_override);

        let mut current = self.current_run.lock();
        if let Some((existing_ctx, existing_task)) = current.as_ref() {
            let same_request = self.with_exclusive_access(|state| state.run_equiv(existing_ctx, &run_ctx));
            if same_request && !existing_task.is_finished_sync() && !existing_task.is_cancelled() {
                return existing_task.clone();
            }
        }

        let operation = self.operation.clone();
        let store_for_work = self.clone();

        let task_ctx = run_ctx.clone();
        let task = Task::new(task_ctx, move |task_id, ctx| {
            let operation = operation.clone();
            let sink_store = store_for_work.clone();
            async move {
                let mut running_ctx = ctx.clone();
                running_ctx.set::<RunningTaskIdKey>(Some(task_id));

                let continuation = Continuation::new(
                    running_ctx.clone(),
                    Arc::new(move |result: Result<S::Value, CoreError<S::Error>>, yield_ctx: Context| {
                        sink_store.handle_yield(result, &yield_ctx, false);
                    }),
                );

                operation.run(running_ctx, continuation).await
            }
        });

        *current = Some((run_ctx, task.clone()));
        drop(current);

        self.with_exclusive_access(|state| state.schedule(&task));
        debug!(path = %self.operation.path(), task = %task.id(), "task scheduled");
        self.notify_state_changed();
        self.dispatch_run_started();

        let finish_store = self.clone();
        let finish_task = task.clone();
        tokio::spawn(async move {
            let result = finish_task.run_if_needed().await;
            finish_store.complete(finish_task.id(), result);
        });

        task
    }

    fn handle_yield(self: &Arc<Self>, result: Result<S::Value, CoreError<S::Error>>, ctx: &Context, via_controller: bool) {
        let now = ctx.get::<crate::context::ClockKey>().now();
        self.with_exclusive_access(|state| state.update_by_context(&result, ctx, now, via_controller));
        self.dispatch_result(&result, ResultUpdateReason::Yielded);
        if self.with_exclusive_access(|state| state.is_single_page_fetch(ctx)) {
            self.dispatch_page_result(&result, ResultUpdateReason::Yielded);
        }
        self.notify_state_changed();
    }

    fn complete(self: &Arc<Self>, task_id: TaskId, result: Result<S::Value, CoreError<S::Error>>) {
        debug!(path = %self.operation.path(), task = %task_id, ok = result.is_ok(), "task completed");
        let now = self.context().get::<crate::context::ClockKey>().now();
        self.with_exclusive_access(|state| state.update_for_task(task_id, &result, now));
        self.dispatch_result(&result, ResultUpdateReason::ReturnedFinalResult);
        self.with_exclusive_access(|state| state.finish(task_id));
        {
            let mut current = self.current_run.lock();
            if current.as_ref().map(|(_, t)| t.id()) == Some(task_id) {
                *current = None;
            }
        }
        self.notify_state_changed();
        self.dispatch_run_ended();
    }

    fn dispatch_run_started(&self) {
        let handlers: Vec<_> = self.subscribers.lock().iter().map(|e| e.handler.clone()).collect();
        for h in handlers {
            h.on_run_started();
        }
    }

    fn dispatch_run_ended(&self) {
        let handlers: Vec<_> = self.subscribers.lock().iter().map(|e| e.handler.clone()).collect();
        for h in handlers {
            h.on_run_ended();
        }
    }

    fn dispatch_result(&self, result: &Result<S::Value, CoreError<S::Error>>, reason: ResultUpdateReason) {
        let handlers: Vec<_> = self.subscribers.lock().iter().map(|e| e.handler.clone()).collect();
        for h in handlers {
            h.on_result_received(result, reason);
        }
    }

    fn dispatch_page_result(&self, result: &Result<S::Value, CoreError<S::Error>>, reason: ResultUpdateReason) {
        let handlers: Vec<_> = self.subscribers.lock().iter().map(|e| e.handler.clone()).collect();
        for h in handlers {
            h.on_page_result_received(result, reason);
        }
    }

    /// Creates a task and awaits it (spec §4.7 "run").
    pub async fn run(self: &Arc<Self>, ctx: Option<Context>) -> Result<S::Value, CoreError<S::Error>>
    where
        S::Value: Clone,
        S::Error: Clone,
    {
        self.clone().run_task(ctx).run_if_needed().await
    }

    /// Directly writes into the state (reducer `update`-by-context),
    /// as used by controllers (spec §4.7 "set_result").
    pub fn set_result(self: &Arc<Self>, result: Result<S::Value, CoreError<S::Error>>, ctx: Option<Context>) {
        let ctx = self.merged_context(ctx);
        self.handle_yield(result, &ctx, true);
    }

    /// Shorthand for `set_result(Ok(v))`.
    pub fn set_current_value(self: &Arc<Self>, value: S::Value) {
        self.set_result(Ok(value), None);
    }

    /// Calls reducer `reset`, cancels the tasks it returns, and
    /// re-initializes counters/timestamps (spec §4.7 "reset_state").
    pub fn reset_state(&self, ctx: Option<Context>) -> Vec<TaskId> {
        let ctx = self.merged_context(ctx);
        let cancelled = self.with_exclusive_access(|state| state.reset(&ctx));
        debug!(path = %self.operation.path(), cancelled = cancelled.len(), "store reset");
        self.notify_state_changed();
        cancelled
    }
}

impl<PID, PV, E> Store<PaginatedState<PID, PV, E>>
where
    PID: Clone + Eq + Hash + Send + Sync + 'static,
    PV: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Fetches the page after the last one held, or the initial page if
    /// none has landed yet (spec §4.5 "Paginated", §8 scenario 3
    /// "next-after-initial").
    pub async fn fetch_next_page(self: &Arc<Self>) -> Result<Page<PID, PV>, CoreError<E>> {
        let paging = self.with_exclusive_access(|state| {
            if state.pages().is_empty() {
                PagingRequest::Initial
            } else {
                state
                    .next_page_id
                    .clone()
                    .map(PagingRequest::Next)
                    .unwrap_or(PagingRequest::Initial)
            }
        });
        self.run_paging(paging).await
    }

    /// Fetches the page before the first one held.
    pub async fn fetch_previous_page(self: &Arc<Self>) -> Result<Page<PID, PV>, CoreError<E>> {
        let paging = self.with_exclusive_access(|state| {
            if state.pages().is_empty() {
                PagingRequest::Initial
            } else {
                state
                    .previous_page_id
                    .clone()
                    .map(PagingRequest::Previous)
                    .unwrap_or(PagingRequest::Initial)
            }
        });
        self.run_paging(paging).await
    }

    /// Refetches every page currently held, in order -- including ones
    /// only reachable by a previous-page fetch -- preserving their
    /// positions (spec §8 scenario 4 "refetch all preserves order").
    /// Does not resume a cancelled all-pages run from where it left off
    /// -- see [`crate::operation::PaginatedOperation`]'s doc comment.
    pub async fn refetch_all(self: &Arc<Self>) -> Result<Page<PID, PV>, CoreError<E>> {
        let known_ids = self.with_exclusive_access(|state| {
            state.pages().iter().map(|p| p.id.clone()).collect::<Vec<_>>()
        });
        self.run_paging(PagingRequest::All(known_ids)).await
    }

    async fn run_paging(self: &Arc<Self>, paging: PagingRequest<PID>) -> Result<Page<PID, PV>, CoreError<E>> {
        let ctx = self.context().with::<PagingRequestKey<PID>>(Some(paging));
        self.run(Some(ctx)).await
    }
}

impl<Args, V, E> Store<MutationState<Args, V, E>>
where
    Args: Clone + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    /// Runs the mutation with `args` (spec §4.5 "Mutation").
    pub async fn mutate(self: &Arc<Self>, args: Args) -> Result<V, CoreError<E>> {
        let ctx = self.context().with::<MutationArgsKey<Args>>(Some(args));
        self.run(Some(ctx)).await
    }

    /// Re-runs the mutation with the arguments of the most recent
    /// invocation (spec §4.5 "retry-latest"). Fails with
    /// [`CoreError::NoArguments`] if no mutation has ever run.
    pub async fn retry_latest(self: &Arc<Self>) -> Result<V, CoreError<E>> {
        let Some(args) = self.with_exclusive_access(|state| state.last_arguments().cloned()) else {
            return Err(CoreError::NoArguments);
        };
        self.mutate(args).await
    }
}

impl<S> AnyStore for Store<S>
where
    S: Reducer,
{
    fn path(&self) -> Path {
        self.operation.path()
    }

    fn state_type_name(&self) -> &'static str {
        self.with_exclusive_access(|state| state.state_type_name())
    }

    fn is_loading(&self) -> bool {
        self.with_exclusive_access(|state| state.is_loading())
    }

    fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

impl<S> ControllerTarget<S::Value, S::Error> for Store<S>
where
    S: Reducer,
    S::Value: Clone,
    S::Error: Clone,
{
    fn yield_value(&self, result: Result<S::Value, CoreError<S::Error>>, ctx: Option<Context>) {
        let Some(store) = self.self_ref.lock().upgrade() else {
            warn!("controller-requested yield after the store was dropped; ignored");
            return;
        };
        let ctx = store.merged_context(ctx);
        store.handle_yield(result, &ctx, true);
    }

    fn yield_refetch(&self) {
        let Some(store) = self.self_ref.lock().upgrade() else {
            warn!("controller-requested refetch after the store was dropped; ignored");
            return;
        };
        let task = store.run_task(None);
        tokio::spawn(async move {
            let _ = task.run_if_needed().await;
        });
    }

    fn reset_state(&self, ctx: Option<Context>) {
        let _ = Store::reset_state(self, ctx);
    }

    fn context(&self) -> Context {
        self.context()
    }

    fn subscriber_count(&self) -> usize {
        AnyStore::subscriber_count(self)
    }

    fn is_stale(&self) -> bool {
        Store::is_stale(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::query::QueryState;

    struct Echo;

    #[async_trait::async_trait]
    impl Operation<i32, String> for Echo {
        fn path(&self) -> Path {
            Path::new(["echo"])
        }

        async fn run(
            &self,
            _ctx: Context,
            _continuation: Continuation<i32, String>,
        ) -> Result<i32, CoreError<String>> {
            Ok(7)
        }
    }

    #[tokio::test]
    async fn run_writes_value_into_state() {
        let store = Store::new(Arc::new(Echo), Context::new(), QueryState::<i32, String>::new()).await;
        let result = store.run(None).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(store.with_exclusive_access(|s| s.current_value.clone()), Some(7));
    }
}
