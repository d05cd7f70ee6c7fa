//! Cache-key addressing for operations.
//!
//! A [`Path`] is an ordered sequence of hashable [`PathSegment`]s. Two
//! paths are equal iff their segment sequences are equal; paths form the
//! key space the [`Client`](crate::client::Client) indexes stores by.

use std::fmt;
use std::sync::Arc;

/// A single element of a [`Path`].
///
/// Kept small and `Clone`-cheap (string segments are `Arc<str>`) since
/// paths are hashed on every store lookup.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    /// A string token, e.g. a resource name (`"users"`).
    Str(Arc<str>),
    /// A signed integer token, e.g. a record id.
    Int(i64),
    /// An unsigned integer token.
    UInt(u64),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Str(s) => write!(f, "{s}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::UInt(u) => write!(f, "{u}"),
        }
    }
}

impl From<&str> for PathSegment {
    fn from(value: &str) -> Self {
        Self::Str(Arc::from(value))
    }
}

impl From<String> for PathSegment {
    fn from(value: String) -> Self {
        Self::Str(Arc::from(value))
    }
}

impl From<i64> for PathSegment {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for PathSegment {
    fn from(value: u64) -> Self {
        Self::UInt(value)
    }
}

/// An ordered, hashable identifier addressing one operation instance.
///
/// Two paths are equal iff their element sequences are equal (order
/// matters: `["users", 1]` != `[1, "users"]`).
///
/// # Examples
///
/// ```
/// use query_core::path::Path;
///
/// let users = Path::new(["users"]);
/// let user_one = users.clone().join(1i64);
/// assert!(users.is_prefix_of(&user_one));
/// assert!(!user_one.is_prefix_of(&users));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Path {
    segments: Arc<Vec<PathSegment>>,
}

impl Path {
    /// Builds a path from an ordered list of segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<PathSegment>,
    {
        Self {
            segments: Arc::new(segments.into_iter().map(Into::into).collect()),
        }
    }

    /// The empty path (matches everything as a prefix).
    pub fn root() -> Self {
        Self::default()
    }

    /// Appends one segment, returning a new path.
    #[must_use]
    pub fn join<S: Into<PathSegment>>(&self, segment: S) -> Self {
        let mut segments = (*self.segments).clone();
        segments.push(segment.into());
        Self {
            segments: Arc::new(segments),
        }
    }

    /// The path's segments, in order.
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// `true` iff `self`'s segments are a prefix of `other`'s (including
    /// the case where they are equal).
    ///
    /// # Examples
    ///
    /// ```
    /// use query_core::path::Path;
    ///
    /// let root = Path::root();
    /// let leaf = Path::new(["a", "b"]);
    /// assert!(root.is_prefix_of(&leaf));
    /// assert!(leaf.is_prefix_of(&leaf));
    /// ```
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        self.segments.len() <= other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/")?;
        for (i, seg) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, "/")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_paths_hash_and_compare_equal() {
        let a = Path::new(["users", "1"]);
        let b = Path::new(["users".to_string(), "1".to_string()]);
        assert_eq!(a, b);
    }

    #[test]
    fn order_matters() {
        let a = Path::new(["a", "b"]);
        let b = Path::new(["b", "a"]);
        assert_ne!(a, b);
    }

    #[test]
    fn prefix_matching() {
        let users = Path::new(["users"]);
        let user_one = users.join(1i64);
        let posts = Path::new(["posts"]);
        assert!(users.is_prefix_of(&user_one));
        assert!(!posts.is_prefix_of(&user_one));
        assert!(Path::root().is_prefix_of(&user_one));
    }

    #[test]
    fn display_renders_segments() {
        let p = Path::new(["users"]).join(42i64);
        assert_eq!(p.to_string(), "/users/42");
    }
}
