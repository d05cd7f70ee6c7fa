//! The operation trait family: the uniform `run` entry point
//! ([`Operation`]) plus the three app-facing request traits
//! (`QueryRequest`, `PaginatedRequest`, `MutationRequest`) whose adapters
//! implement it (spec §4.5, §6 "user-visible surface").

use std::hash::Hash;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::{Context, MutationArgsKey};
use crate::continuation::Continuation;
use crate::error::CoreError;
use crate::path::Path;
use crate::state::paginated::{Page, PagingRequest};

/// The uniform entry point every modifier wraps and every store
/// ultimately calls (spec §4.4 "Modifier Composition").
#[async_trait]
pub trait Operation<V, E>: Send + Sync + 'static
where
    V: Send + Sync + 'static,
    E: Send + Sync + 'static,
{
    /// The cache key this operation's store is addressed by.
    fn path(&self) -> Path;

    /// Runs the operation body once, publishing intermediate results
    /// through `continuation` before returning the final one.
    async fn run(&self, ctx: Context, continuation: Continuation<V, E>) -> Result<V, CoreError<E>>;

    /// Invoked once when a store is created, outer-to-inner across the
    /// modifier chain (spec §4.4: "so each modifier may publish defaults
    /// into the context that inner layers observe"). Base operations
    /// have nothing to set up.
    fn setup(&self, _ctx: &mut Context) {}
}

/// A one-shot query (spec §4.5 "Query").
#[async_trait]
pub trait QueryRequest: Send + Sync + 'static {
    type Value: Clone + Send + Sync + 'static;
    type Error: Clone + Send + Sync + 'static;

    fn path(&self) -> Path;

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Self::Value, Self::Error>,
    ) -> Result<Self::Value, CoreError<Self::Error>>;
}

/// Adapts a [`QueryRequest`] into the uniform [`Operation`] interface.
pub struct QueryOperation<Q>(pub Arc<Q>);

#[async_trait]
impl<Q> Operation<Q::Value, Q::Error> for QueryOperation<Q>
where
    Q: QueryRequest,
{
    fn path(&self) -> Path {
        self.0.path()
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Q::Value, Q::Error>,
    ) -> Result<Q::Value, CoreError<Q::Error>> {
        self.0.run(ctx, continuation).await
    }
}

/// A paginated query (spec §4.5 "Paginated"). Adapters dispatch `run` on
/// the [`PagingRequest`] found in context.
#[async_trait]
pub trait PaginatedRequest: Send + Sync + 'static {
    type PageId: Clone + Eq + Hash + Send + Sync + 'static;
    type PageValue: Clone + Send + Sync + 'static;
    type Error: Clone + Send + Sync + 'static;

    fn path(&self) -> Path;

    /// The id of the first page ever fetched for this operation.
    fn initial_page_id(&self) -> Self::PageId;

    /// The id of the page that follows `page`, or `None` at the end.
    fn page_id_after(
        &self,
        page: &Page<Self::PageId, Self::PageValue>,
        paging: &PagingRequest<Self::PageId>,
        ctx: &Context,
    ) -> Option<Self::PageId>;

    /// The id of the page that precedes `page`, or `None` at the start.
    fn page_id_before(
        &self,
        page: &Page<Self::PageId, Self::PageValue>,
        paging: &PagingRequest<Self::PageId>,
        ctx: &Context,
    ) -> Option<Self::PageId>;

    /// Fetches one page's value.
    async fn fetch_page(
        &self,
        paging: &PagingRequest<Self::PageId>,
        ctx: Context,
        continuation: Continuation<Self::PageValue, Self::Error>,
    ) -> Result<Self::PageValue, CoreError<Self::Error>>;
}

/// Per-`PID` context key carrying the in-flight paging request
/// descriptor (spec §3 "page-fetch type"), set by the store before
/// scheduling a paginated task.
pub struct PagingRequestKey<PID>(PhantomData<PID>);

impl<PID: Clone + Send + Sync + 'static> crate::context::ContextKey for PagingRequestKey<PID> {
    type Value = Option<PagingRequest<PID>>;
    fn default_value() -> Self::Value {
        None
    }
}

/// Adapts a [`PaginatedRequest`] into the uniform [`Operation`]
/// interface: `run` dispatches on the store-supplied
/// [`PagingRequestKey`], fetching exactly the page(s) the request asks
/// for. `PagingRequest::All(ids)` refetches every id the store already
/// knows about (or, if none are known yet, discovers forward from
/// `initial_page_id`), yielding each as it lands and returning the last
/// (spec §9 "Paginated all-pages resumption" -- see
/// [`crate::store::Store::refetch_all`]'s doc comment for the
/// resumption simplification taken here).
pub struct PaginatedOperation<P>(pub Arc<P>);

#[async_trait]
impl<P> Operation<Page<P::PageId, P::PageValue>, P::Error> for PaginatedOperation<P>
where
    P: PaginatedRequest,
{
    fn path(&self) -> Path {
        self.0.path()
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<Page<P::PageId, P::PageValue>, P::Error>,
    ) -> Result<Page<P::PageId, P::PageValue>, CoreError<P::Error>> {
        let paging = ctx
            .get::<PagingRequestKey<P::PageId>>()
            .unwrap_or(PagingRequest::Initial);

        if matches!(paging, PagingRequest::All(_)) {
            return self.run_all(ctx, continuation).await;
        }

        self.fetch_one(&paging, ctx, continuation).await
    }
}

impl<P> PaginatedOperation<P>
where
    P: PaginatedRequest,
{
    /// Fetches exactly the page `paging` describes, resolving its
    /// `next_id`/`previous_id` against the pages immediately adjacent to
    /// it in the request's own ordering.
    async fn fetch_one(
        &self,
        paging: &PagingRequest<P::PageId>,
        ctx: Context,
        continuation: Continuation<Page<P::PageId, P::PageValue>, P::Error>,
    ) -> Result<Page<P::PageId, P::PageValue>, CoreError<P::Error>> {
        let page_id = match paging {
            PagingRequest::Initial => self.0.initial_page_id(),
            PagingRequest::Next(id) | PagingRequest::Previous(id) => id.clone(),
            PagingRequest::All(_) => unreachable!("run_all fetches by explicit id, never by All"),
        };

        let (value_tx, value_ctx) = (continuation.clone(), ctx.clone());
        let fetch_id = page_id.clone();
        let page_continuation = Continuation::new(
            value_ctx,
            Arc::new(move |result: Result<P::PageValue, CoreError<P::Error>>, yield_ctx| {
                let tagged = result.map(|value| Page {
                    id: fetch_id.clone(),
                    value,
                    next_id: None,
                    previous_id: None,
                });
                value_tx.yield_result(tagged, Some(yield_ctx));
            }),
        );

        let value = self.0.fetch_page(paging, ctx.clone(), page_continuation).await?;
        let bare = Page {
            id: page_id,
            value,
            next_id: None,
            previous_id: None,
        };
        let next_id = self.0.page_id_after(&bare, paging, &ctx);
        let previous_id = self.0.page_id_before(&bare, paging, &ctx);
        Ok(Page {
            next_id,
            previous_id,
            ..bare
        })
    }

    /// Refetches every page the run is asked for, publishing each one as
    /// it lands and returning the last as the run's final, aggregate
    /// result (spec §8 scenario 4 "one result event per page plus one
    /// aggregate event"). With no ids supplied (nothing fetched yet) this
    /// discovers pages forward from `initial_page_id` until the range
    /// ends; with ids supplied it revisits exactly those, in order --
    /// including ones only reachable by a previous-page fetch, which a
    /// pure forward walk from `initial_page_id` would miss.
    ///
    /// Simplification: does not persist progress across a cancelled run
    /// -- a re-issued `refetch_all` after cancellation restarts from
    /// scratch rather than resuming mid-sequence (see DESIGN.md).
    async fn run_all(
        &self,
        ctx: Context,
        continuation: Continuation<Page<P::PageId, P::PageValue>, P::Error>,
    ) -> Result<Page<P::PageId, P::PageValue>, CoreError<P::Error>> {
        let known_ids = match ctx.get::<PagingRequestKey<P::PageId>>() {
            Some(PagingRequest::All(ids)) => ids,
            _ => Vec::new(),
        };

        let mut last: Option<Page<P::PageId, P::PageValue>> = None;

        if known_ids.is_empty() {
            let mut current = PagingRequest::Initial;
            loop {
                let page = self.fetch_one(&current, ctx.clone(), continuation.clone()).await?;
                continuation.yield_result(Ok(page.clone()), Some(ctx.clone()));
                let next = page.next_id.clone();
                last = Some(page);
                match next {
                    Some(id) => current = PagingRequest::Next(id),
                    None => break,
                }
            }
        } else {
            for id in known_ids {
                let paging = PagingRequest::Next(id);
                let page = self.fetch_one(&paging, ctx.clone(), continuation.clone()).await?;
                continuation.yield_result(Ok(page.clone()), Some(ctx.clone()));
                last = Some(page);
            }
        }

        // At least one of the two branches above always runs its body
        // once before falling through: `known_ids` empty means the
        // discovery loop fetches `initial_page_id` unconditionally, and
        // non-empty means the `for` loop has at least one iteration.
        Ok(last.expect("at least one page is always fetched"))
    }
}

/// An argument-driven mutation (spec §4.5 "Mutation").
#[async_trait]
pub trait MutationRequest: Send + Sync + 'static {
    type Args: Clone + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;
    type Error: Clone + Send + Sync + 'static;

    fn path(&self) -> Path;

    async fn mutate(
        &self,
        args: Self::Args,
        ctx: Context,
        continuation: Continuation<Self::Value, Self::Error>,
    ) -> Result<Self::Value, CoreError<Self::Error>>;
}

/// Adapts a [`MutationRequest`] into the uniform [`Operation`]
/// interface. Reads `ctx.mutation_args`; the retry-latest fallback
/// (using the last history entry's arguments when none are supplied) is
/// the store's responsibility, since only the store's state knows the
/// history (spec §4.5, §9 "Mutation argument plumbing").
pub struct MutationOperation<M>(pub Arc<M>);

#[async_trait]
impl<M> Operation<M::Value, M::Error> for MutationOperation<M>
where
    M: MutationRequest,
{
    fn path(&self) -> Path {
        self.0.path()
    }

    async fn run(
        &self,
        ctx: Context,
        continuation: Continuation<M::Value, M::Error>,
    ) -> Result<M::Value, CoreError<M::Error>> {
        let Some(args) = ctx.get::<MutationArgsKey<M::Args>>() else {
            return Err(CoreError::NoArguments);
        };
        self.0.mutate(args, ctx, continuation).await
    }
}
