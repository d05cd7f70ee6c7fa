//! Typed heterogeneous context propagated through every layer.
//!
//! [`Context`] is a value-semantic map from statically-declared
//! [`ContextKey`]s to typed values, with structural sharing on write: a
//! clone is cheap until one of the clones is mutated, at which point only
//! that clone's backing map is duplicated ([`Arc::make_mut`]).
//!
//! Reading an unset key returns [`ContextKey::default_value`] without
//! touching storage -- the default is materialized lazily, never written.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::capability::{BackoffFn, Clock, Delayer, SystemClock, TokioDelayer};
use crate::client::ClientHandle;
use crate::modifier::condition::Condition;
use crate::task::TaskId;

/// A statically-declared context key.
///
/// Implement this for a unit struct to register a new well-known
/// context slot; `Value` must be cheap to clone since [`Context::get`]
/// clones out of the map (or materializes `default_value()`) on every
/// read.
///
/// # Examples
///
/// ```
/// use query_core::context::{Context, ContextKey};
///
/// struct RequestLabel;
/// impl ContextKey for RequestLabel {
///     type Value = &'static str;
///     fn default_value() -> Self::Value {
///         "unlabeled"
///     }
/// }
///
/// let ctx = Context::new();
/// assert_eq!(ctx.get::<RequestLabel>(), "unlabeled");
/// let ctx = ctx.with::<RequestLabel>("checkout");
/// assert_eq!(ctx.get::<RequestLabel>(), "checkout");
/// ```
pub trait ContextKey: 'static {
    /// The type stored under this key.
    type Value: Clone + Send + Sync + 'static;

    /// The value returned when the key has never been written.
    fn default_value() -> Self::Value;
}

/// Copy-on-write heterogeneous map carrying per-run configuration and
/// ambient services.
///
/// Contexts are deeply clonable: mutating a clone (via [`Context::set`]
/// or [`Context::with`]) never affects the original, and cloning itself
/// is an `Arc` bump, not a deep copy.
#[derive(Clone)]
pub struct Context {
    values: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            values: Arc::new(HashMap::new()),
        }
    }
}

impl Context {
    /// An empty context; every key reads as its default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads the value for `K`, or `K::default_value()` if never set.
    pub fn get<K: ContextKey>(&self) -> K::Value {
        self.values
            .get(&TypeId::of::<K>())
            .and_then(|v| v.downcast_ref::<K::Value>())
            .cloned()
            .unwrap_or_else(K::default_value)
    }

    /// Writes `value` under `K`, cloning the backing map only if it is
    /// currently shared with another `Context`.
    pub fn set<K: ContextKey>(&mut self, value: K::Value) {
        let map = Arc::make_mut(&mut self.values);
        map.insert(TypeId::of::<K>(), Arc::new(value));
    }

    /// Builder-style [`Context::set`].
    #[must_use]
    pub fn with<K: ContextKey>(mut self, value: K::Value) -> Self {
        self.set::<K>(value);
        self
    }

    /// `true` iff `K` has ever been explicitly written on this context
    /// (as opposed to reading as its default).
    pub fn contains<K: ContextKey>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<K>())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("entries", &self.values.len())
            .finish()
    }
}

// ---- Well-known keys (spec §3 "Context") ----

/// Overrides the wall-clock source used for timestamps.
pub struct ClockKey;
impl ContextKey for ClockKey {
    type Value = Arc<dyn Clock>;
    fn default_value() -> Self::Value {
        Arc::new(SystemClock)
    }
}

/// Overrides the ambient sleep mechanism.
pub struct DelayerKey;
impl ContextKey for DelayerKey {
    type Value = Arc<dyn Delayer>;
    fn default_value() -> Self::Value {
        Arc::new(TokioDelayer)
    }
}

/// The backoff function consulted between retry attempts.
pub struct BackoffKey;
impl ContextKey for BackoffKey {
    type Value = BackoffFn;
    fn default_value() -> Self::Value {
        crate::modifier::backoff::exponential(std::time::Duration::from_millis(200))
    }
}

/// 0-based index of the retry attempt currently in flight (0 on the
/// first attempt, published by [`crate::modifier::retry::Retry`]).
pub struct RetryIndexKey;
impl ContextKey for RetryIndexKey {
    type Value = u32;
    fn default_value() -> Self::Value {
        0
    }
}

/// The configured retry limit, published by
/// [`crate::modifier::retry::Retry`] so inner layers can compute
/// `is_last_retry_attempt`.
pub struct RetryLimitKey;
impl ContextKey for RetryLimitKey {
    type Value = u32;
    fn default_value() -> Self::Value {
        0
    }
}

/// Advisory task priority (spec §4.4 `TaskConfiguration`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskPriority {
    Low,
    #[default]
    Normal,
    High,
}

/// Execution hints attached to a task run (spec §4.4), consulted only
/// for diagnostics/tracing -- nothing in this crate owns a thread pool,
/// per the non-goal in spec.md §1.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskConfig {
    /// Human-readable name for tracing spans.
    pub name: Option<String>,
    /// Relative scheduling priority; advisory only.
    pub priority: TaskPriority,
    /// Name of an externally-registered executor, if the embedding
    /// application dispatches work across more than one.
    pub executor: Option<String>,
}

/// Per-run executor hints.
pub struct TaskConfigKey;
impl ContextKey for TaskConfigKey {
    type Value = TaskConfig;
    fn default_value() -> Self::Value {
        TaskConfig::default()
    }
}

/// Weak back-reference to the owning [`crate::client::Client`], so
/// operations can reach the client without creating an ownership cycle
/// (client owns stores, stores own contexts).
pub struct ClientBackRefKey;
impl ContextKey for ClientBackRefKey {
    type Value = Option<ClientHandle>;
    fn default_value() -> Self::Value {
        None
    }
}

/// The id of the task currently executing this context's `run`, if any.
pub struct RunningTaskIdKey;
impl ContextKey for RunningTaskIdKey {
    type Value = Option<TaskId>;
    fn default_value() -> Self::Value {
        None
    }
}

/// The automatic-execution condition installed by
/// `enable_automatic_execution(only_when:)`; `None` means always enabled.
pub struct AutomaticExecutionConditionKey;
impl ContextKey for AutomaticExecutionConditionKey {
    type Value = Option<Arc<dyn Condition>>;
    fn default_value() -> Self::Value {
        None
    }
}

/// Per-argument-type mutation arguments (spec §4.5, §9 "Mutation argument
/// plumbing"): keyed by the concrete `Args` type rather than a single
/// untyped slot, so unrelated mutations sharing one context never collide.
pub struct MutationArgsKey<Args>(PhantomData<Args>);
impl<Args: Clone + Send + Sync + 'static> ContextKey for MutationArgsKey<Args> {
    type Value = Option<Args>;
    fn default_value() -> Self::Value {
        None
    }
}

/// `(now, value_last_updated_at) -> bool`. Registered by `stale*`
/// modifiers; multiple predicates compose by logical OR (spec §4.4
/// "Stale(predicate)").
pub type StalePredicate = Arc<dyn Fn(crate::capability::Timestamp, Option<crate::capability::Timestamp>) -> bool + Send + Sync>;

/// The accumulated set of staleness predicates. The built-in default
/// predicate (`value_last_updated_at == None` is stale, spec §9 "Open
/// questions") is always present so a store that never fetched is
/// considered stale even before any `stale*` modifier is attached.
pub struct StalePredicatesKey;
impl ContextKey for StalePredicatesKey {
    type Value = Vec<StalePredicate>;
    fn default_value() -> Self::Value {
        vec![Arc::new(|_now, last_updated_at| last_updated_at.is_none())]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_key_reads_default() {
        let ctx = Context::new();
        assert_eq!(ctx.get::<RetryIndexKey>(), 0);
    }

    #[test]
    fn set_is_visible_to_self_not_to_prior_clones() {
        let original = Context::new();
        let clone = original.clone();
        let mutated = clone.with::<RetryIndexKey>(3);
        assert_eq!(original.get::<RetryIndexKey>(), 0);
        assert_eq!(mutated.get::<RetryIndexKey>(), 3);
    }

    #[test]
    fn contains_distinguishes_default_from_explicit() {
        let ctx = Context::new();
        assert!(!ctx.contains::<RetryIndexKey>());
        let ctx = ctx.with::<RetryIndexKey>(0);
        assert!(ctx.contains::<RetryIndexKey>());
    }

    #[test]
    fn mutation_args_key_is_scoped_per_type() {
        #[derive(Clone)]
        struct CreateArgs {
            name: String,
        }
        #[derive(Clone)]
        struct DeleteArgs {
            id: u64,
        }

        let ctx = Context::new()
            .with::<MutationArgsKey<CreateArgs>>(Some(CreateArgs {
                name: "a".into(),
            }))
            .with::<MutationArgsKey<DeleteArgs>>(Some(DeleteArgs { id: 7 }));

        assert_eq!(ctx.get::<MutationArgsKey<CreateArgs>>().unwrap().name, "a");
        assert_eq!(ctx.get::<MutationArgsKey<DeleteArgs>>().unwrap().id, 7);
    }
}
