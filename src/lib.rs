//! An asynchronous operation state-management engine: a generic,
//! client-side core for fetching, caching and mutating data, independent
//! of any particular transport or UI framework.
//!
//! # Overview
//!
//! Applications describe *what* to fetch or mutate by implementing
//! [`operation::QueryRequest`], [`operation::PaginatedRequest`], or
//! [`operation::MutationRequest`]; the [`client::Client`] owns one
//! [`store::Store`] per cache [`path::Path`], each holding a typed
//! [`state::Reducer`] (`QueryState`, `PaginatedState`, `MutationState`)
//! and dispatching lifecycle events to subscribers as runs progress
//! ([`continuation::Continuation`], [`task::Task`]).
//!
//! Cross-cutting behavior -- retries, deduplication, staleness,
//! externally-driven updates -- is added by wrapping an operation with a
//! [`modifier::Modifier`] rather than baking it into the operation body.
//!
//! # Module Organization
//!
//! - [`path`] - cache-key addressing (`Path`, `PathSegment`)
//! - [`context`] - typed heterogeneous per-run configuration (`Context`)
//! - [`capability`] - clock/delayer/backoff seams the core consumes
//! - [`subscription`] - idempotent cancellation handles
//! - [`continuation`] - intermediate-value publishing during a run
//! - [`task`] - lazy, memoized, cancellable async unit of work
//! - [`error`] - `CoreError<E>`, the core's own error variants
//! - [`operation`] - the uniform `Operation` trait and the three
//!   app-facing request traits
//! - [`state`] - the `Reducer` protocol and the three concrete state
//!   machines (query, paginated, mutation)
//! - [`modifier`] - composable wrappers (retry, dedup, stale, backoff,
//!   clock, delayer, task configuration, controller, condition-driven
//!   suspend/refetch/stale/automatic-execution)
//! - [`store`] - per-operation state container, scheduler, event
//!   dispatcher
//! - [`client`] - path-addressed store collection with pluggable
//!   caching, creation, and eviction

pub mod capability;
pub mod context;
pub mod continuation;
pub mod error;
pub mod modifier;
pub mod operation;
pub mod path;
pub mod state;
pub mod subscription;
pub mod task;

pub mod client;
pub mod store;

pub use client::{Client, ClientConfig, ClientHandle, StoreCache, StoreCreator};
pub use context::{Context, ContextKey};
pub use continuation::{Continuation, ResultUpdateReason};
pub use error::CoreError;
pub use operation::{
    MutationOperation, MutationRequest, Operation, OperationExt, PaginatedOperation,
    PaginatedRequest, QueryOperation, QueryRequest,
};
pub use path::{Path, PathSegment};
pub use state::mutation::MutationState;
pub use state::paginated::{Page, PaginatedState, PagingRequest};
pub use state::query::QueryState;
pub use state::Reducer;
pub use store::{AnyStore, Store, StoreObserver};
pub use subscription::Subscription;
pub use task::{Task, TaskId};
