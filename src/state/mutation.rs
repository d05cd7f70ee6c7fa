//! Mutation state reducer: `M<Args,V>` (spec §3, §4.5 "Mutation").

use crate::capability::Timestamp;
use crate::context::{ClockKey, Context, MutationArgsKey};
use crate::error::CoreError;
use crate::task::{Task, TaskId, TaskIdSet};

use super::Reducer;

/// One invocation of a mutation's `run`.
#[derive(Debug, Clone)]
pub struct HistoryEntry<Args, V, E> {
    pub task_id: TaskId,
    pub arguments: Args,
    pub start_time: Timestamp,
    pub current_result: Option<Result<V, CoreError<E>>>,
    pub last_updated_at: Option<Timestamp>,
    pub status: HistoryStatus,
}

/// The status of a single history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    Loading,
    Success,
    Failure,
}

/// The state backing a mutation operation.
///
/// `current_value`/`error`/`is_loading` are derived from `history.last`,
/// reconciled with any later yielded intermediate value by timestamp
/// (spec §8 "current_value == history.last.status.success_value unless a
/// later yielded result supersedes it by timestamp").
#[derive(Debug, Clone)]
pub struct MutationState<Args, V, E> {
    history: Vec<HistoryEntry<Args, V, E>>,
    active_tasks: TaskIdSet,
}

impl<Args, V, E> MutationState<Args, V, E> {
    pub fn new() -> Self {
        Self {
            history: Vec::new(),
            active_tasks: TaskIdSet::new(),
        }
    }

    pub fn history(&self) -> &[HistoryEntry<Args, V, E>] {
        &self.history
    }

    /// The arguments of the most recent invocation, for retry-latest
    /// semantics (spec §4.5 "Mutation").
    pub fn last_arguments(&self) -> Option<&Args> {
        self.history.last().map(|e| &e.arguments)
    }

    /// Starts a new history entry for `task`, called by the operation
    /// adapter before launching the task's work (not part of `schedule`,
    /// since the arguments are only known to the mutation adapter).
    pub fn begin(&mut self, task_id: TaskId, arguments: Args, now: Timestamp) {
        self.history.push(HistoryEntry {
            task_id,
            arguments,
            start_time: now,
            current_result: None,
            last_updated_at: None,
            status: HistoryStatus::Loading,
        });
    }

    pub fn is_loading(&self) -> bool {
        !self.active_tasks.is_empty()
    }

    /// The last entry's resolved value, if it succeeded (and no later
    /// yield overrode it with a newer timestamp).
    pub fn current_value(&self) -> Option<&V> {
        self.history.last().and_then(|e| match &e.current_result {
            Some(Ok(v)) => Some(v),
            _ => None,
        })
    }

    pub fn error(&self) -> Option<&CoreError<E>> {
        self.history.last().and_then(|e| match &e.current_result {
            Some(Err(err)) => Some(err),
            _ => None,
        })
    }

    fn apply(
        &mut self,
        task_id: TaskId,
        result: &Result<V, CoreError<E>>,
        now: Timestamp,
    ) where
        V: Clone,
        E: Clone,
    {
        let Some(entry) = self.history.iter_mut().find(|e| e.task_id == task_id) else {
            return;
        };
        let supersedes = entry
            .last_updated_at
            .map(|previous| now >= previous)
            .unwrap_or(true);
        if !supersedes {
            return;
        }
        entry.current_result = Some(result.clone());
        entry.last_updated_at = Some(now);
        entry.status = match result {
            Ok(_) => HistoryStatus::Success,
            Err(_) => HistoryStatus::Failure,
        };
    }
}

impl<Args, V, E> Default for MutationState<Args, V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Args, V, E> Reducer for MutationState<Args, V, E>
where
    Args: Clone + PartialEq + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Value = V;
    type Error = E;

    fn schedule(&mut self, task: &Task<V, E>) {
        self.active_tasks.insert(task.id());
        // The operation adapter places the invocation's arguments into
        // context before the store schedules the task; without this the
        // reducer would never open a history entry for it to fill in.
        if let Some(args) = task.context().get::<MutationArgsKey<Args>>() {
            let now = task.context().get::<ClockKey>().now();
            self.begin(task.id(), args, now);
        }
    }

    /// Compares the mutation arguments in context, so a concurrent
    /// `mutate(args=B)` never collapses onto an in-flight
    /// `mutate(args=A)` via [`crate::store::Store::run_task`]'s
    /// single-slot cache.
    fn run_equiv(&self, existing: &Context, new: &Context) -> bool {
        existing.get::<MutationArgsKey<Args>>() == new.get::<MutationArgsKey<Args>>()
    }

    fn update_for_task(&mut self, task_id: TaskId, result: &Result<V, CoreError<E>>, now: Timestamp) {
        self.apply(task_id, result, now);
    }

    fn update_by_context(
        &mut self,
        result: &Result<V, CoreError<E>>,
        _ctx: &Context,
        now: Timestamp,
        _via_controller: bool,
    ) {
        if let Some(task_id) = self.history.last().map(|e| e.task_id) {
            self.apply(task_id, result, now);
        }
    }

    fn finish(&mut self, task_id: TaskId) {
        self.active_tasks.remove(task_id);
    }

    fn reset(&mut self, _ctx: &Context) -> Vec<TaskId> {
        let cancelled: Vec<TaskId> = self.active_tasks.iter().copied().collect();
        *self = Self::new();
        cancelled
    }

    fn is_loading(&self) -> bool {
        MutationState::is_loading(self)
    }

    fn active_task_ids(&self) -> Vec<TaskId> {
        self.active_tasks.iter().copied().collect()
    }

    fn value_last_updated_at(&self) -> Option<Timestamp> {
        self.history.last().and_then(|e| e.last_updated_at)
    }
}
