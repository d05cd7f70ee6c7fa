//! Lazy, shareable, cancellable unit of async work with memoized results
//! (spec §3, §4.1).
//!
//! A [`Task`] is a thin value wrapping an `Arc` to its shared state
//! machine: copies (including the result of [`Task::map`]) observe the
//! same progress and compare equal under `==`/`Hash`. The work itself
//! runs at most once, no matter how many times `run_if_needed` is
//! called or from how many copies.

use std::any::Any;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tokio::sync::{oneshot, watch, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::CoreError;

/// Monotonically-assigned task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Builds an arbitrary id for reducer unit tests that exercise
    /// active-task bookkeeping without spinning up a real `Task`.
    #[cfg(test)]
    pub fn for_test(n: u64) -> Self {
        Self(n)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Registry letting a task await a dependency by id alone, regardless of
/// the dependency's `V`/`E` type (`schedule_after` only records ids, so
/// the awaiting side cannot hold a typed handle to every dependency).
fn completion_registry() -> &'static DashMap<TaskId, watch::Receiver<bool>> {
    static REGISTRY: OnceLock<DashMap<TaskId, watch::Receiver<bool>>> = OnceLock::new();
    REGISTRY.get_or_init(DashMap::new)
}

type AnyResult<E> = Result<Arc<dyn Any + Send + Sync>, CoreError<E>>;
type BoxWork<E> = Box<
    dyn FnOnce(TaskId, Context) -> Pin<Box<dyn Future<Output = AnyResult<E>> + Send>> + Send,
>;

enum RunState<E> {
    Idle,
    Running,
    Finished(Result<Arc<dyn Any + Send + Sync>, CoreError<E>>),
}

struct TaskInner<E> {
    id: TaskId,
    context: Context,
    work: AsyncMutex<Option<BoxWork<E>>>,
    state: AsyncMutex<RunState<E>>,
    cancel: CancellationToken,
    dependencies: parking_lot::Mutex<Vec<TaskId>>,
    // Fired exactly once, when the state transitions to `Finished`.
    done_tx: AsyncMutex<Option<Vec<oneshot::Sender<()>>>>,
    finished_flag: watch::Sender<bool>,
}

/// A lazy unit of work, identified by [`TaskId`] and sharing its state
/// machine across every clone and every [`Task::map`] result.
///
/// `V` is the type observers see after the transform chain is applied;
/// the underlying work always produces a type-erased value internally so
/// `map` can be composed without re-specifying the original's type.
pub struct Task<V, E> {
    inner: Arc<TaskInner<E>>,
    transform: Arc<dyn Fn(Arc<dyn Any + Send + Sync>) -> Arc<dyn Any + Send + Sync> + Send + Sync>,
    _marker: std::marker::PhantomData<fn() -> V>,
}

impl<V, E> Clone for Task<V, E> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            transform: self.transform.clone(),
            _marker: std::marker::PhantomData,
        }
    }
}

impl<V, E> PartialEq for Task<V, E> {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl<V, E> Eq for Task<V, E> {}

impl<V, E> std::hash::Hash for Task<V, E> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.inner.id.hash(state);
    }
}

impl<V, E> fmt::Debug for Task<V, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.inner.id).finish()
    }
}

impl<V, E> Task<V, E>
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Constructs a new, unstarted task from a context and a work
    /// closure.
    pub fn new<F, Fut>(context: Context, work: F) -> Self
    where
        F: FnOnce(TaskId, Context) -> Fut + Send + 'static,
        Fut: Future<Output = Result<V, CoreError<E>>> + Send + 'static,
    {
        let id = TaskId::next();
        let boxed: BoxWork<E> = Box::new(move |id, ctx| {
            Box::pin(async move {
                work(id, ctx)
                    .await
                    .map(|v| Arc::new(v) as Arc<dyn Any + Send + Sync>)
            })
        });
        let (finished_flag, finished_rx) = watch::channel(false);
        completion_registry().insert(id, finished_rx);
        Self {
            inner: Arc::new(TaskInner {
                id,
                context,
                work: AsyncMutex::new(Some(boxed)),
                state: AsyncMutex::new(RunState::Idle),
                cancel: CancellationToken::new(),
                dependencies: parking_lot::Mutex::new(Vec::new()),
                done_tx: AsyncMutex::new(Some(Vec::new())),
                finished_flag,
            }),
            transform: Arc::new(|v| v),
            _marker: std::marker::PhantomData,
        }
    }

    /// This task's identity.
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// The context the task was constructed with.
    pub fn context(&self) -> &Context {
        &self.inner.context
    }

    /// Appends `dependency` to this task's dependency list (deduplicated
    /// by id). Before its work runs, the task awaits every dependency's
    /// completion, ignoring their results.
    pub fn schedule_after<V2, E2>(&self, dependency: &Task<V2, E2>) {
        self.schedule_after_id(dependency.inner.id);
    }

    /// `schedule_after` for several dependencies at once.
    pub fn schedule_after_many<'a, V2, E2>(
        &self,
        dependencies: impl IntoIterator<Item = &'a Task<V2, E2>>,
    ) where
        V2: 'a,
        E2: 'a,
    {
        for dep in dependencies {
            self.schedule_after(dep);
        }
    }

    /// As [`Self::schedule_after`], taking a bare id rather than a typed
    /// `Task` handle -- for callers (reducer scheduling rules) that only
    /// retain ids of other in-flight tasks, not their handles.
    pub fn schedule_after_id(&self, dependency: TaskId) {
        if dependency == self.inner.id {
            warn!(task = %self.inner.id, "task scheduled after itself, ignoring");
            return;
        }
        let mut deps = self.inner.dependencies.lock();
        if !deps.contains(&dependency) {
            deps.push(dependency);
        }
    }

    /// `schedule_after_id` for several dependencies at once.
    pub fn schedule_after_many_ids(&self, dependencies: impl IntoIterator<Item = TaskId>) {
        for dep in dependencies {
            self.schedule_after_id(dep);
        }
    }

    /// Composes `f` onto this task's transform, producing a new `Task`
    /// that shares this one's id, context, and state machine -- they
    /// compare and hash equal, and cancelling either cancels both.
    pub fn map<V2, F>(&self, f: F) -> Task<V2, E>
    where
        V: Clone,
        F: Fn(V) -> V2 + Send + Sync + 'static,
        V2: Send + Sync + 'static,
    {
        let prior = self.transform.clone();
        Task {
            inner: self.inner.clone(),
            transform: Arc::new(move |erased| {
                let v = prior(erased);
                let v = v
                    .downcast_ref::<V>()
                    .expect("task transform chain type mismatch");
                Arc::new(f(v.clone())) as Arc<dyn Any + Send + Sync>
            }),
            _marker: std::marker::PhantomData,
        }
    }

    /// Cancels the shared handle. If the task has not started, it
    /// transitions straight to `Finished(Err(Cancelled))` without ever
    /// launching the work.
    pub fn cancel(&self) {
        self.inner.cancel.cancel();
    }

    /// `true` once [`cancel`](Self::cancel) has been called on this task
    /// or any copy of it.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// `true` once `run_if_needed` has been called at least once.
    pub async fn has_started(&self) -> bool {
        !matches!(*self.inner.state.lock().await, RunState::Idle)
    }

    /// `true` while the work is in flight.
    pub async fn is_running(&self) -> bool {
        matches!(*self.inner.state.lock().await, RunState::Running)
    }

    /// `true` once the task has produced (or been denied) a result.
    pub async fn is_finished(&self) -> bool {
        matches!(*self.inner.state.lock().await, RunState::Finished(_))
    }

    /// As [`Task::is_finished`], but synchronous -- reads the completion
    /// watch channel rather than locking `state`, for callers (like
    /// [`crate::store::Store::run_task`]'s in-flight check) that cannot
    /// await.
    pub fn is_finished_sync(&self) -> bool {
        *self.inner.finished_flag.borrow()
    }

    /// The memoized result, if the task has finished.
    pub async fn finished_result(&self) -> Option<Result<V, CoreError<E>>>
    where
        V: Clone,
        E: Clone,
    {
        match &*self.inner.state.lock().await {
            RunState::Finished(result) => Some(self.apply_transform(result.clone())),
            _ => None,
        }
    }

    fn apply_transform(&self, result: AnyResult<E>) -> Result<V, CoreError<E>>
    where
        V: Clone,
    {
        result.map(|erased| {
            let transformed = (self.transform)(erased);
            transformed
                .downcast_ref::<V>()
                .expect("task transform produced the wrong type")
                .clone()
        })
    }

    /// Launches the work on first call; subsequent calls (from any copy,
    /// concurrently or not) await the same in-flight handle or return the
    /// memoized result.
    pub async fn run_if_needed(&self) -> Result<V, CoreError<E>>
    where
        V: Clone,
        E: Clone,
    {
        if self.inner.cancel.is_cancelled() {
            self.finish_with(Err(CoreError::Cancelled)).await;
            return Err(CoreError::Cancelled);
        }

        let work = {
            let mut guard = self.inner.state.lock().await;
            match &*guard {
                RunState::Finished(result) => return self.apply_transform(result.clone()),
                RunState::Running => None,
                RunState::Idle => {
                    *guard = RunState::Running;
                    self.inner.work.lock().await.take()
                }
            }
        };

        let Some(work) = work else {
            self.await_finish().await;
            let guard = self.inner.state.lock().await;
            return match &*guard {
                RunState::Finished(result) => self.apply_transform(result.clone()),
                _ => unreachable!("await_finish only returns once Finished"),
            };
        };

        self.await_dependencies().await;

        if self.inner.cancel.is_cancelled() {
            self.finish_with(Err(CoreError::Cancelled)).await;
            return Err(CoreError::Cancelled);
        }

        debug!(task = %self.inner.id, "task running");
        let ctx = self.inner.context.clone();
        let id = self.inner.id;
        let result = tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(CoreError::Cancelled),
            r = work(id, ctx) => r,
        };
        self.finish_with(result.clone()).await;
        self.apply_transform(result)
    }

    async fn await_dependencies(&self) {
        // Dependency results are ignored; we only wait for them to
        // settle, via the process-wide completion registry (dependencies
        // are recorded by id only, so the awaiting side may not hold a
        // typed `Task<V2, E2>` handle for every one of them).
        let deps = self.inner.dependencies.lock().clone();
        if cfg!(debug_assertions) && deps.contains(&self.inner.id) {
            warn!(task = %self.inner.id, "circular task dependency detected");
        }
        for dep in deps {
            let rx = completion_registry().get(&dep).map(|r| r.clone());
            if let Some(mut rx) = rx {
                let _ = rx.wait_for(|finished| *finished).await;
            }
        }
    }

    async fn await_finish(&self) {
        let rx = {
            let mut subs = self.inner.done_tx.lock().await;
            match subs.as_mut() {
                Some(senders) => {
                    let (tx, rx) = oneshot::channel();
                    senders.push(tx);
                    Some(rx)
                }
                None => None,
            }
        };
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }

    async fn finish_with(&self, result: Result<Arc<dyn Any + Send + Sync>, CoreError<E>>) {
        let mut guard = self.inner.state.lock().await;
        if matches!(*guard, RunState::Finished(_)) {
            return;
        }
        *guard = RunState::Finished(result);
        drop(guard);
        let _ = self.inner.finished_flag.send(true);
        if let Some(senders) = self.inner.done_tx.lock().await.take() {
            for tx in senders {
                let _ = tx.send(());
            }
        }
    }
}

impl<V, E> Drop for Task<V, E> {
    fn drop(&mut self) {
        // Only the last copy's drop should evict the registry entry;
        // cheap to check via the inner Arc's strong count since all
        // copies (and `map` results) share one `Arc<TaskInner<E>>`.
        if Arc::strong_count(&self.inner) == 1 {
            completion_registry().remove(&self.inner.id);
        }
    }
}

/// A set of task ids, used by state reducers to track active tasks
/// (spec §3 "active_tasks: IdSet<Task>").
#[derive(Debug, Clone, Default)]
pub struct TaskIdSet(HashSet<TaskId>);

impl TaskIdSet {
    pub fn new() -> Self {
        Self(HashSet::new())
    }

    pub fn insert(&mut self, id: TaskId) -> bool {
        self.0.insert(id)
    }

    pub fn remove(&mut self, id: TaskId) -> bool {
        self.0.remove(&id)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.0.contains(&id)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskId> {
        self.0.iter()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = TaskId> + '_ {
        self.0.drain()
    }
}
