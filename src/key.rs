//! Structured cache keys.
//!
//! A [`CacheKey`] is an ordered list of primitive segments such as
//! `["products", 42]`. Keys are compared structurally and form a prefix
//! lattice: `["products"]` is a prefix of `["products", 42]`, which is what
//! invalidation matches against.

use std::fmt;

use serde_json::Value;

/// A single primitive segment of a [`CacheKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeySegment {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for KeySegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            // JSON string escaping keeps the rendering unambiguous
            Self::Str(s) => write!(f, "{}", Value::from(s.as_str())),
        }
    }
}

impl From<&str> for KeySegment {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for KeySegment {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<&String> for KeySegment {
    fn from(value: &String) -> Self {
        Self::Str(value.clone())
    }
}

impl From<bool> for KeySegment {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for KeySegment {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for KeySegment {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for KeySegment {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl<T: Into<KeySegment>> From<Option<T>> for KeySegment {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Identifies a cached resource.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    segments: Vec<KeySegment>,
}

impl CacheKey {
    /// Creates a key from already converted segments.
    #[must_use]
    pub const fn from_segments(segments: Vec<KeySegment>) -> Self {
        Self { segments }
    }

    /// Returns a new key with `segment` appended.
    #[must_use]
    pub fn child(mut self, segment: impl Into<KeySegment>) -> Self {
        self.segments.push(segment.into());
        self
    }

    /// Returns `true` if `prefix` matches the leading segments of this key.
    ///
    /// Every key is a prefix of itself and the empty key is a prefix of
    /// every key.
    pub fn starts_with(&self, prefix: &Self) -> bool {
        self.segments.starts_with(&prefix.segments)
    }

    pub fn segments(&self) -> &[KeySegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{segment}")?;
        }
        f.write_str("]")
    }
}

impl<S: Into<KeySegment>, const N: usize> From<[S; N]> for CacheKey {
    fn from(segments: [S; N]) -> Self {
        segments.into_iter().collect()
    }
}

impl<S: Into<KeySegment>> FromIterator<S> for CacheKey {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            segments: iter.into_iter().map(Into::into).collect(),
        }
    }
}

/// Builds a [`CacheKey`] from a list of mixed primitive segments.
///
/// ```
/// use storefront_query::cache_key;
///
/// let key = cache_key!["products", 42];
/// assert_eq!(key.to_string(), r#"["products",42]"#);
/// assert!(key.starts_with(&cache_key!["products"]));
/// ```
#[macro_export]
macro_rules! cache_key {
    () => {
        $crate::key::CacheKey::default()
    };
    ($($segment:expr),+ $(,)?) => {
        $crate::key::CacheKey::from_segments(vec![$($crate::key::KeySegment::from($segment)),+])
    };
}
