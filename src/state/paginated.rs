//! Paginated state reducer: `P<PID,PV,E>` (spec §3, §4.5 "Paginated").

use std::collections::HashMap;

use crate::capability::Timestamp;
use crate::context::Context;
use crate::error::CoreError;
use crate::operation::PagingRequestKey;
use crate::task::{Task, TaskId, TaskIdSet};

use super::Reducer;

/// One fetched page, identified by `PID`. `next_id`/`previous_id` are
/// filled in by [`crate::operation::PaginatedOperation`] from the
/// request's `page_id_after`/`page_id_before`, and folded into
/// `next_page_id`/`previous_page_id` here as each page lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<PID, PV> {
    pub id: PID,
    pub value: PV,
    pub next_id: Option<PID>,
    pub previous_id: Option<PID>,
}

/// Which direction a paginated run is fetching in; placed into context by
/// the store before scheduling (spec §4.5 "paging request").
///
/// `All`'s payload is the set of page ids already known at request time,
/// in order -- an empty list means "nothing fetched yet, discover
/// forward from the initial page"; a non-empty list means "refetch
/// exactly these ids, in this order" (spec §8 scenario 4 "refetch all
/// preserves order", which must also revisit pages reached by a
/// previous-page fetch, not just those reachable by walking forward
/// from `initial_page_id`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagingRequest<PID> {
    Initial,
    Next(PID),
    Previous(PID),
    All(Vec<PID>),
}

/// The state backing a paginated query operation.
///
/// `pages` is kept deduplicated by `id` and ordered by insertion position
/// relative to `initial_page_id` (spec invariant, §3/§8).
#[derive(Debug, Clone)]
pub struct PaginatedState<PID, PV, E> {
    pages: Vec<Page<PID, PV>>,
    positions: HashMap<PID, usize>,
    pub next_page_id: Option<PID>,
    pub previous_page_id: Option<PID>,
    pub error: Option<CoreError<E>>,
    pub error_last_updated_at: Option<Timestamp>,
    pub value_last_updated_at: Option<Timestamp>,
    initial_tasks: TaskIdSet,
    next_tasks: TaskIdSet,
    previous_tasks: TaskIdSet,
    all_tasks: TaskIdSet,
}

impl<PID, PV, E> PaginatedState<PID, PV, E>
where
    PID: Clone + Eq + std::hash::Hash,
{
    pub fn new() -> Self {
        Self {
            pages: Vec::new(),
            positions: HashMap::new(),
            next_page_id: None,
            previous_page_id: None,
            error: None,
            error_last_updated_at: None,
            value_last_updated_at: None,
            initial_tasks: TaskIdSet::new(),
            next_tasks: TaskIdSet::new(),
            previous_tasks: TaskIdSet::new(),
            all_tasks: TaskIdSet::new(),
        }
    }

    /// The pages in insertion order, deduplicated by id.
    pub fn pages(&self) -> &[Page<PID, PV>] {
        &self.pages
    }

    pub fn has_next_page(&self) -> bool {
        self.next_page_id.is_some()
    }

    pub fn has_previous_page(&self) -> bool {
        self.previous_page_id.is_some()
    }

    /// Inserts or replaces `page`, preserving existing order for a
    /// replace and appending for a new id. Does not touch
    /// `next_page_id`/`previous_page_id` -- see [`Self::apply_result`],
    /// which knows which end of the range `page` landed on.
    fn upsert(&mut self, page: Page<PID, PV>) {
        if let Some(&idx) = self.positions.get(&page.id) {
            self.pages[idx] = page;
        } else {
            self.positions.insert(page.id.clone(), self.pages.len());
            self.pages.push(page);
        }
    }

    /// Folds one fetched `page` into the range, updating only the cursor
    /// at the end it landed on: a tail fetch (initial/next/all) advances
    /// `next_page_id`; a head fetch (previous) advances
    /// `previous_page_id` and splices the page in front rather than
    /// appending (spec §8 scenario 4 "refetch all preserves order").
    fn apply_result(&mut self, page: Page<PID, PV>, is_previous: bool) {
        let was_empty = self.pages.is_empty();
        if is_previous && !was_empty {
            let head_id = self.pages[0].id.clone();
            self.previous_page_id = page.previous_id.clone();
            self.insert_before(page, &head_id);
        } else {
            self.next_page_id = page.next_id.clone();
            if was_empty {
                self.previous_page_id = page.previous_id.clone();
            }
            self.upsert(page);
        }
    }

    /// Inserts `page` immediately before the page currently at
    /// `before_id`, used by `previous(first_id)` to splice a page at the
    /// front without disturbing the rest of the order.
    pub fn insert_before(&mut self, page: Page<PID, PV>, before_id: &PID) {
        if self.positions.contains_key(&page.id) {
            self.upsert(page);
            return;
        }
        let at = self.positions.get(before_id).copied().unwrap_or(0);
        self.pages.insert(at, page);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.positions.clear();
        for (idx, page) in self.pages.iter().enumerate() {
            self.positions.insert(page.id.clone(), idx);
        }
    }

    pub fn is_loading(&self) -> bool {
        !(self.initial_tasks.is_empty()
            && self.next_tasks.is_empty()
            && self.previous_tasks.is_empty()
            && self.all_tasks.is_empty())
    }
}

impl<PID, PV, E> Default for PaginatedState<PID, PV, E>
where
    PID: Clone + Eq + std::hash::Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<PID, PV, E> Reducer for PaginatedState<PID, PV, E>
where
    PID: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    PV: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + 'static,
{
    type Value = Page<PID, PV>;
    type Error = E;

    fn schedule(&mut self, task: &Task<Page<PID, PV>, E>) {
        // The bucket is derived from the paging request the store placed
        // into the task's context before scheduling it (spec §4.5
        // "Scheduling rules") -- a bare `schedule` with no such request
        // defaults to tracking it as an initial-page task. Next/previous
        // tasks wait on every initial/all task already in flight; an
        // all-pages task waits on every initial/next/previous task
        // already in flight -- enforcing the ordering spec §4.1/§4.5
        // require without blocking unrelated buckets against each other.
        match task.context().get::<PagingRequestKey<PID>>() {
            Some(PagingRequest::Next(_)) => {
                task.schedule_after_many_ids(self.initial_tasks.iter().chain(self.all_tasks.iter()).copied());
                self.next_tasks.insert(task.id())
            }
            Some(PagingRequest::Previous(_)) => {
                task.schedule_after_many_ids(self.initial_tasks.iter().chain(self.all_tasks.iter()).copied());
                self.previous_tasks.insert(task.id())
            }
            Some(PagingRequest::All(_)) => {
                task.schedule_after_many_ids(
                    self.initial_tasks
                        .iter()
                        .chain(self.next_tasks.iter())
                        .chain(self.previous_tasks.iter())
                        .copied(),
                );
                self.all_tasks.insert(task.id())
            }
            _ => self.initial_tasks.insert(task.id()),
        };
    }

    /// Compares the paging-request descriptor in context, so a
    /// concurrent request fetching a *different* page (or direction)
    /// never collapses onto an in-flight one via
    /// [`crate::store::Store::run_task`]'s single-slot cache (spec §8
    /// "parallel next/previous" -- `fetch_next_page` must not silently
    /// return a concurrently in-flight `fetch_previous_page`'s result).
    fn run_equiv(&self, existing: &Context, new: &Context) -> bool {
        existing.get::<PagingRequestKey<PID>>() == new.get::<PagingRequestKey<PID>>()
    }

    fn update_for_task(
        &mut self,
        task_id: TaskId,
        result: &Result<Page<PID, PV>, CoreError<E>>,
        now: Timestamp,
    ) {
        match result {
            Ok(page) => {
                let is_previous = self.previous_tasks.contains(task_id);
                self.apply_result(page.clone(), is_previous);
                self.value_last_updated_at = Some(now);
            }
            Err(err) => {
                self.error = Some(err.clone());
                self.error_last_updated_at = Some(now);
            }
        }
    }

    fn update_by_context(
        &mut self,
        result: &Result<Page<PID, PV>, CoreError<E>>,
        ctx: &Context,
        now: Timestamp,
        _via_controller: bool,
    ) {
        match result {
            Ok(page) => {
                let is_previous = matches!(
                    ctx.get::<PagingRequestKey<PID>>(),
                    Some(PagingRequest::Previous(_))
                );
                self.apply_result(page.clone(), is_previous);
                self.value_last_updated_at = Some(now);
            }
            Err(err) => {
                self.error = Some(err.clone());
                self.error_last_updated_at = Some(now);
            }
        }
    }

    fn finish(&mut self, task_id: TaskId) {
        self.initial_tasks.remove(task_id);
        self.next_tasks.remove(task_id);
        self.previous_tasks.remove(task_id);
        self.all_tasks.remove(task_id);
    }

    fn reset(&mut self, _ctx: &Context) -> Vec<TaskId> {
        let mut cancelled: Vec<TaskId> = Vec::new();
        cancelled.extend(self.initial_tasks.drain());
        cancelled.extend(self.next_tasks.drain());
        cancelled.extend(self.previous_tasks.drain());
        cancelled.extend(self.all_tasks.drain());
        *self = Self::new();
        cancelled
    }

    fn is_loading(&self) -> bool {
        PaginatedState::is_loading(self)
    }

    fn active_task_ids(&self) -> Vec<TaskId> {
        self.initial_tasks
            .iter()
            .chain(self.next_tasks.iter())
            .chain(self.previous_tasks.iter())
            .chain(self.all_tasks.iter())
            .copied()
            .collect()
    }

    fn value_last_updated_at(&self) -> Option<Timestamp> {
        self.value_last_updated_at
    }

    fn is_single_page_fetch(&self, ctx: &Context) -> bool {
        !matches!(ctx.get::<PagingRequestKey<PID>>(), Some(PagingRequest::All(_)))
    }
}

impl<PID, PV, E> PaginatedState<PID, PV, E>
where
    PID: Clone + Eq + std::hash::Hash + Send + Sync + 'static,
    PV: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// Schedules `task` into the next-page bucket; the caller is
    /// responsible for the ordering dependency (`schedule_after` every
    /// initial/all task, spec §4.5 "Scheduling rules").
    pub fn schedule_next(&mut self, task: &Task<Page<PID, PV>, E>) {
        self.next_tasks.insert(task.id());
    }

    pub fn schedule_previous(&mut self, task: &Task<Page<PID, PV>, E>) {
        self.previous_tasks.insert(task.id());
    }

    pub fn schedule_all(&mut self, task: &Task<Page<PID, PV>, E>) {
        self.all_tasks.insert(task.id());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(id: i64, value: &str) -> Page<i64, String> {
        Page {
            id,
            value: value.into(),
            next_id: None,
            previous_id: None,
        }
    }

    #[test]
    fn pages_stay_ordered_and_deduplicated() {
        let mut state: PaginatedState<i64, String, String> = PaginatedState::new();
        state.upsert(page(0, "a"));
        state.upsert(page(1, "b"));
        state.upsert(page(0, "a2"));
        assert_eq!(state.pages().len(), 2);
        assert_eq!(state.pages()[0].value, "a2");
        assert_eq!(state.pages()[1].id, 1);
    }

    #[test]
    fn insert_before_splices_without_disturbing_order() {
        let mut state: PaginatedState<i64, String, String> = PaginatedState::new();
        state.upsert(page(0, "e"));
        state.upsert(page(1, "f"));
        state.insert_before(page(-1, "d"), &0);
        let ids: Vec<i64> = state.pages().iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![-1, 0, 1]);
    }
}
