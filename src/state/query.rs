//! Query state reducer: `Q<V,E>` (spec §3, §4.5 "Query").

use crate::capability::Timestamp;
use crate::context::Context;
use crate::error::CoreError;
use crate::task::{Task, TaskId, TaskIdSet};

use super::Reducer;

/// The state backing a one-shot query operation.
#[derive(Debug, Clone)]
pub struct QueryState<V, E> {
    pub current_value: Option<V>,
    pub initial_value: Option<V>,
    pub value_update_count: u64,
    pub value_last_updated_at: Option<Timestamp>,
    pub error: Option<CoreError<E>>,
    pub error_update_count: u64,
    pub error_last_updated_at: Option<Timestamp>,
    active_tasks: TaskIdSet,
}

impl<V, E> QueryState<V, E> {
    /// A fresh state with no value, no error, and no active tasks.
    pub fn new() -> Self {
        Self {
            current_value: None,
            initial_value: None,
            value_update_count: 0,
            value_last_updated_at: None,
            error: None,
            error_update_count: 0,
            error_last_updated_at: None,
            active_tasks: TaskIdSet::new(),
        }
    }

    /// Seeds `current_value`/`initial_value` without counting as an
    /// update (used by `StoreCreator::create` for a pre-populated cache
    /// entry).
    pub fn with_initial_value(mut self, value: V) -> Self
    where
        V: Clone,
    {
        self.initial_value = Some(value.clone());
        self.current_value = Some(value);
        self
    }

    /// `true` iff at least one active task exists.
    pub fn is_loading(&self) -> bool {
        !self.active_tasks.is_empty()
    }
}

impl<V, E> Default for QueryState<V, E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V, E> Reducer for QueryState<V, E>
where
    V: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Value = V;
    type Error = E;

    fn schedule(&mut self, task: &Task<V, E>) {
        self.active_tasks.insert(task.id());
    }

    fn update_for_task(
        &mut self,
        _task_id: TaskId,
        result: &Result<V, CoreError<E>>,
        now: Timestamp,
    ) {
        self.apply(result, now, true, false);
    }

    fn update_by_context(
        &mut self,
        result: &Result<V, CoreError<E>>,
        _ctx: &Context,
        now: Timestamp,
        via_controller: bool,
    ) {
        self.apply(result, now, false, via_controller);
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
        QueryState::is_loading(self)
    }

    fn active_task_ids(&self) -> Vec<TaskId> {
        self.active_tasks.iter().copied().collect()
    }

    fn value_last_updated_at(&self) -> Option<Timestamp> {
        self.value_last_updated_at
    }
}

impl<V, E> QueryState<V, E>
where
    V: Clone,
    E: Clone,
{
    /// `count` distinguishes a task's final result (counters bump) from a
    /// mid-run yield or controller write (value/error still update, but
    /// `*_update_count` is reserved for results a run actually settles on,
    /// per spec §9's "yielded failure" open question). `clears_error`
    /// governs whether a success clears a standing `error`: true for a
    /// task's own final result and for a controller-sourced yield, false
    /// for a task's own mid-run yield (spec §4.5 "Query" -- a subsequent
    /// success does not clear `error` automatically unless a controller
    /// explicitly yields it).
    fn apply(&mut self, result: &Result<V, CoreError<E>>, now: Timestamp, count: bool, clears_error: bool) {
        match result {
            Ok(value) => {
                self.current_value = Some(value.clone());
                if clears_error {
                    self.error = None;
                }
                self.value_last_updated_at = Some(now);
                if count {
                    self.value_update_count += 1;
                }
            }
            Err(err) => {
                self.error = Some(err.clone());
                self.error_last_updated_at = Some(now);
                if count {
                    self.error_update_count += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn now() -> Timestamp {
        Utc::now()
    }

    #[test]
    fn task_success_updates_value_but_preserves_standing_error() {
        let mut state: QueryState<i32, String> = QueryState::new();
        state.apply(&Err(CoreError::Operation("boom".into())), now(), true, false);
        assert!(state.error.is_some());
        state.apply(&Ok(42), now(), true, false);
        assert_eq!(state.current_value, Some(42));
        assert!(state.error.is_some());
        assert_eq!(state.value_update_count, 1);
    }

    #[test]
    fn controller_success_clears_standing_error() {
        let mut state: QueryState<i32, String> = QueryState::new();
        state.apply(&Err(CoreError::Operation("boom".into())), now(), true, false);
        assert!(state.error.is_some());
        state.apply(&Ok(42), now(), false, true);
        assert_eq!(state.current_value, Some(42));
        assert!(state.error.is_none());
    }

    #[test]
    fn failure_preserves_current_value() {
        let mut state: QueryState<i32, String> = QueryState::new();
        state.apply(&Ok(1), now(), true, true);
        state.apply(&Err(CoreError::Operation("boom".into())), now(), true, true);
        assert_eq!(state.current_value, Some(1));
        assert!(state.error.is_some());
        assert_eq!(state.error_update_count, 1);
    }

    #[test]
    fn yielded_result_updates_value_without_counting() {
        let mut state: QueryState<i32, String> = QueryState::new();
        state.apply(&Ok(1), now(), false, false);
        assert_eq!(state.current_value, Some(1));
        assert_eq!(state.value_update_count, 0);
    }

    #[test]
    fn reset_clears_active_tasks_and_returns_them() {
        let mut state: QueryState<i32, String> = QueryState::new();
        state.active_tasks.insert(TaskId::for_test(1));
        let cancelled = Reducer::reset(&mut state, &Context::new());
        assert_eq!(cancelled.len(), 1);
        assert!(!Reducer::is_loading(&state));
    }
}
