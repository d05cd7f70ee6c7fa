//! Scenario tests for the `Paginated` operation variant (spec §8
//! scenarios 3-4).

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use query_core::context::Context;
use query_core::continuation::Continuation;
use query_core::error::CoreError;
use query_core::operation::{PaginatedOperation, PaginatedRequest};
use query_core::path::Path;
use query_core::state::paginated::{Page, PagingRequest};
use query_core::state::paginated::PaginatedState;
use query_core::store::Store;

/// A paginated source over an ordered, mutable list of `(id, value)`
/// entries, with a fixed initial id independent of the list's order
/// (so a "previous" fetch can land before the initial page, as in
/// scenario 4).
struct OrderedSource {
    entries: Mutex<Vec<(i64, String)>>,
    initial_id: i64,
}

impl OrderedSource {
    fn new(entries: Vec<(i64, String)>, initial_id: i64) -> Self {
        Self {
            entries: Mutex::new(entries),
            initial_id,
        }
    }

    fn set(&self, entries: Vec<(i64, String)>) {
        *self.entries.lock() = entries;
    }

    fn value_of(&self, id: i64) -> Option<String> {
        self.entries.lock().iter().find(|(i, _)| *i == id).map(|(_, v)| v.clone())
    }

    fn index_of(&self, id: i64) -> Option<usize> {
        self.entries.lock().iter().position(|(i, _)| *i == id)
    }

    fn id_at(&self, idx: usize) -> Option<i64> {
        self.entries.lock().get(idx).map(|(i, _)| *i)
    }
}

struct PagedSource(Arc<OrderedSource>);

#[async_trait]
impl PaginatedRequest for PagedSource {
    type PageId = i64;
    type PageValue = String;
    type Error = String;

    fn path(&self) -> Path {
        Path::new(["paged"])
    }

    fn initial_page_id(&self) -> i64 {
        self.0.initial_id
    }

    fn page_id_after(
        &self,
        page: &Page<i64, String>,
        _paging: &PagingRequest<i64>,
        _ctx: &Context,
    ) -> Option<i64> {
        let idx = self.0.index_of(page.id)?;
        self.0.id_at(idx + 1)
    }

    fn page_id_before(
        &self,
        page: &Page<i64, String>,
        _paging: &PagingRequest<i64>,
        _ctx: &Context,
    ) -> Option<i64> {
        let idx = self.0.index_of(page.id)?;
        if idx == 0 {
            None
        } else {
            self.0.id_at(idx - 1)
        }
    }

    async fn fetch_page(
        &self,
        paging: &PagingRequest<i64>,
        _ctx: Context,
        _continuation: Continuation<String, String>,
    ) -> Result<String, CoreError<String>> {
        let id = match paging {
            PagingRequest::Initial => self.initial_page_id(),
            PagingRequest::Next(id) | PagingRequest::Previous(id) => *id,
            PagingRequest::All(_) => unreachable!("PaginatedOperation::run_all never fetches via All directly"),
        };
        self.0
            .value_of(id)
            .ok_or_else(|| CoreError::Operation(format!("no page {id}")))
    }
}

async fn make_store(
    source: Arc<OrderedSource>,
) -> Arc<Store<PaginatedState<i64, String, String>>> {
    let request = Arc::new(PagedSource(source));
    let op: Arc<dyn query_core::operation::Operation<Page<i64, String>, String>> =
        Arc::new(PaginatedOperation(request));
    Store::new(op, Context::new(), PaginatedState::new()).await
}

#[tokio::test]
async fn next_after_initial_appends_and_clears_next_cursor() {
    let source = Arc::new(OrderedSource::new(vec![(0, "a".into()), (1, "b".into())], 0));
    let store = make_store(source).await;

    let first = store.fetch_next_page().await.unwrap();
    assert_eq!(first.id, 0);
    assert_eq!(first.value, "a");
    assert!(store.with_exclusive_access(|s| s.has_next_page()));

    let second = store.fetch_next_page().await.unwrap();
    assert_eq!(second.id, 1);
    assert_eq!(second.value, "b");

    let ids: Vec<i64> = store.with_exclusive_access(|s| s.pages().iter().map(|p| p.id).collect());
    assert_eq!(ids, vec![0, 1]);
    assert!(!store.with_exclusive_access(|s| s.has_next_page()));
}

#[tokio::test]
async fn refetch_all_preserves_order_across_initial_next_and_previous() {
    let source = Arc::new(OrderedSource::new(
        vec![(-1, "d".into()), (0, "e".into()), (1, "f".into())],
        0,
    ));
    let store = make_store(source.clone()).await;

    store.fetch_next_page().await.unwrap();
    store.fetch_next_page().await.unwrap();
    store.fetch_previous_page().await.unwrap();

    let ids: Vec<i64> = store.with_exclusive_access(|s| s.pages().iter().map(|p| p.id).collect());
    assert_eq!(ids, vec![-1, 0, 1]);

    source.set(vec![(-1, "d2".into()), (0, "e2".into()), (1, "f2".into())]);

    let last = store.refetch_all().await.unwrap();
    assert_eq!(last.id, 1);
    assert_eq!(last.value, "f2");

    let pages = store.with_exclusive_access(|s| s.pages().to_vec());
    let values: Vec<(i64, String)> = pages.into_iter().map(|p| (p.id, p.value)).collect();
    assert_eq!(
        values,
        vec![(-1, "d2".to_string()), (0, "e2".to_string()), (1, "f2".to_string())]
    );
}
