//! The reducer protocol shared by the three [`OperationState`] variants
//! (spec §3 "OperationState (variant)", §9 "Dynamic dispatch over
//! heterogeneous state").
//!
//! A concrete reducer (`query::QueryState`, `paginated::PaginatedState`,
//! `mutation::MutationState`) owns one operation's typed state and knows
//! how to fold task lifecycle events into it. [`OpaqueState`] is the
//! reducer-independent handle the [`crate::client::Client`] uses for
//! pattern-matching scans across stores of unrelated concrete types.

pub mod mutation;
pub mod paginated;
pub mod query;

use crate::capability::Timestamp;
use crate::context::Context;
use crate::error::CoreError;
use crate::task::{Task, TaskId};

/// The typed reducer protocol every `OperationState` variant implements.
///
/// Reducer methods are always called while the owning
/// [`crate::store::Store`] holds its exclusive lock (spec §5); they must
/// not block on anything beyond in-memory bookkeeping.
pub trait Reducer: Send + Sync + 'static {
    /// The value a successful task run produces.
    type Value: Clone + Send + Sync + 'static;
    /// The operation's own error type.
    type Error: Clone + Send + Sync + 'static;

    /// Called before a task is started; may attach dependencies on
    /// conflicting in-flight tasks (e.g. paginated ordering rules) and
    /// must record `task` in the relevant active-task set.
    fn schedule(&mut self, task: &Task<Self::Value, Self::Error>);

    /// Whether a request made with context `new` should be considered
    /// the same in-flight run as one already running under context
    /// `existing`, for [`crate::store::Store::run_task`]'s single-slot
    /// `current_run` cache (spec §8 "Dedup hit" -- this coalesces the
    /// *task and counter bookkeeping* around a run; the `Dedup` modifier
    /// separately coalesces the operation body itself, the way
    /// `crate::modifier::dedup::EquivFn` does). Defaults to "always the
    /// same run", correct for a plain query where the store's path
    /// already disambiguates distinct requests; `PaginatedState` and
    /// `MutationState` override this to compare their own request
    /// discriminant (paging direction, mutation arguments) instead.
    fn run_equiv(&self, existing: &Context, new: &Context) -> bool {
        let _ = (existing, new);
        true
    }

    /// Called when a task produces its final result.
    fn update_for_task(
        &mut self,
        task_id: TaskId,
        result: &Result<Self::Value, CoreError<Self::Error>>,
        now: Timestamp,
    );

    /// Called when a value/error is written outside of a task's final
    /// result: either a task's own mid-run yield, or a controller
    /// explicitly writing through [`crate::store::Store::set_result`].
    /// `via_controller` distinguishes the two -- spec §4.5 "Query":
    /// a subsequent success only clears a standing `error` when it comes
    /// from the latter.
    fn update_by_context(
        &mut self,
        result: &Result<Self::Value, CoreError<Self::Error>>,
        ctx: &Context,
        now: Timestamp,
        via_controller: bool,
    );

    /// Removes `task_id` from every active-task set it appears in.
    fn finish(&mut self, task_id: TaskId);

    /// Re-initializes the state to its starting values and returns every
    /// task id that was active, for the caller to cancel.
    fn reset(&mut self, ctx: &Context) -> Vec<TaskId>;

    /// `true` iff at least one task is active (spec invariant: `
    /// active_tasks.size() > 0 ⟺ is_loading == true`).
    fn is_loading(&self) -> bool;

    /// When the current value was last written, for
    /// [`crate::store::Store::is_stale`]'s time-based staleness check
    /// (spec §4.4 "Stale"). Defaults to "never updated", which is
    /// conservatively always-stale; `QueryState`, `PaginatedState`, and
    /// `MutationState` override this to read their own last-updated
    /// timestamp.
    fn value_last_updated_at(&self) -> Option<Timestamp> {
        None
    }

    /// `true` iff `ctx` describes a single-page paginated fetch (initial/
    /// next/previous) rather than an all-pages aggregate one -- gates
    /// [`crate::store::StoreObserver::on_page_result_received`] (spec
    /// §4.6). The default, for reducers with no notion of pages, never
    /// fires it.
    fn is_single_page_fetch(&self, ctx: &Context) -> bool {
        let _ = ctx;
        false
    }

    /// Every task id currently tracked as active, across all of this
    /// reducer's active-task sets.
    fn active_task_ids(&self) -> Vec<TaskId>;
}

/// Reducer-independent view used by the client to enumerate stores
/// without knowing their concrete `Value`/`Error` types.
pub trait OpaqueState: Send + Sync + 'static {
    /// `true` iff at least one task is active.
    fn is_loading(&self) -> bool;
    /// Count of currently-active tasks.
    fn active_task_count(&self) -> usize;
    /// A stable name for the concrete state type, used for the
    /// duplicate-path-different-type diagnostic (spec §3 "Invariants").
    fn state_type_name(&self) -> &'static str;
}

impl<R: Reducer> OpaqueState for R {
    fn is_loading(&self) -> bool {
        Reducer::is_loading(self)
    }

    fn active_task_count(&self) -> usize {
        self.active_task_ids().len()
    }

    fn state_type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
