//! Crate-wide error types.
//!
//! Operation bodies raise their own error type `E`; everything the core
//! itself can fail with (cancellation, missing mutation arguments, a
//! path reused at a different type) is folded into [`CoreError`] so
//! callers have one place to match on "did the core stop this, or did
//! my operation fail".

use std::fmt;

use crate::path::Path;

/// Errors the core itself can raise, independent of any operation's own
/// error type `E`.
///
/// # Examples
///
/// ```
/// use query_core::error::CoreError;
///
/// let err: CoreError<std::io::Error> = CoreError::Cancelled;
/// assert!(err.is_cancelled());
/// ```
#[derive(Debug)]
pub enum CoreError<E> {
    /// The distinguished cancellation sentinel (spec §7.2). Always takes
    /// priority over retry: a cancelled run is never retried.
    Cancelled,

    /// A mutation's `run` found no `mutation_args` in context and no
    /// prior history entry to retry.
    NoArguments,

    /// A store already exists at this path under a different operation
    /// type. The caller's new store is not retained.
    DuplicatePathType {
        /// The path both stores were registered under.
        path: Path,
        /// The state type name already recorded for `path`.
        expected: &'static str,
        /// The state type name the caller tried to register.
        found: &'static str,
    },

    /// The operation body's own error.
    Operation(E),
}

impl<E> CoreError<E> {
    /// Returns `true` for the cancellation sentinel.
    ///
    /// # Examples
    ///
    /// ```
    /// use query_core::error::CoreError;
    ///
    /// let err: CoreError<&str> = CoreError::Operation("boom");
    /// assert!(!err.is_cancelled());
    /// ```
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns the wrapped operation error, if this is an
    /// [`CoreError::Operation`].
    pub fn operation_error(&self) -> Option<&E> {
        match self {
            Self::Operation(e) => Some(e),
            _ => None,
        }
    }

    /// Maps the operation error type, leaving core variants untouched.
    pub fn map_operation<F, U>(self, f: F) -> CoreError<U>
    where
        F: FnOnce(E) -> U,
    {
        match self {
            Self::Cancelled => CoreError::Cancelled,
            Self::NoArguments => CoreError::NoArguments,
            Self::DuplicatePathType {
                path,
                expected,
                found,
            } => CoreError::DuplicatePathType {
                path,
                expected,
                found,
            },
            Self::Operation(e) => CoreError::Operation(f(e)),
        }
    }
}

impl<E: Clone> Clone for CoreError<E> {
    fn clone(&self) -> Self {
        match self {
            Self::Cancelled => Self::Cancelled,
            Self::NoArguments => Self::NoArguments,
            Self::DuplicatePathType {
                path,
                expected,
                found,
            } => Self::DuplicatePathType {
                path: path.clone(),
                expected,
                found,
            },
            Self::Operation(e) => Self::Operation(e.clone()),
        }
    }
}

impl<E: fmt::Display> fmt::Display for CoreError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::NoArguments => write!(
                f,
                "mutation has no arguments in context and no history to retry"
            ),
            Self::DuplicatePathType {
                path,
                expected,
                found,
            } => write!(
                f,
                "path {path:?} already holds a {expected} store, refusing to register a {found} store"
            ),
            Self::Operation(e) => write!(f, "{e}"),
        }
    }
}

impl<E: fmt::Debug + fmt::Display> std::error::Error for CoreError<E> {}

/// Result alias for operation bodies: `Ok(V)` or the operation's own
/// error type `E` (not yet wrapped in [`CoreError`] -- that happens at
/// the store/task boundary).
pub type OperationResult<V, E> = Result<V, E>;
