//! Path values.
//!
//! An [`FsPath`] is an immutable, parent-linked path: its segments live in one
//! shared allocation and a parent is the same allocation viewed one segment
//! shorter. Comparison is case-insensitive by default; [`PathCase`] selects
//! the case-sensitive variant where a caller needs it.

use crate::{error::Result, Error};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Cow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

/// How path segments are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PathCase {
    /// Segments compare equal when their lowercase forms match (default)
    #[default]
    Insensitive,
    /// Segments compare byte-for-byte
    Sensitive,
}

impl PathCase {
    /// Compare two segments.
    pub fn eq_segment(self, a: &str, b: &str) -> bool {
        match self {
            PathCase::Sensitive => a == b,
            PathCase::Insensitive => a
                .chars()
                .flat_map(char::to_lowercase)
                .eq(b.chars().flat_map(char::to_lowercase)),
        }
    }

    /// Key under which a segment is stored in case-folded maps.
    pub fn fold<'a>(self, segment: &'a str) -> Cow<'a, str> {
        match self {
            PathCase::Sensitive => Cow::Borrowed(segment),
            // Per character, like `eq_segment` and `Hash`
            PathCase::Insensitive => {
                if segment.chars().flat_map(char::to_lowercase).eq(segment.chars()) {
                    Cow::Borrowed(segment)
                } else {
                    Cow::Owned(segment.chars().flat_map(char::to_lowercase).collect())
                }
            }
        }
    }
}

/// An immutable filesystem path made of name segments.
///
/// The empty path (no segments) stands for "the root" of whatever container
/// the path is used with.
#[derive(Clone)]
pub struct FsPath {
    segments: Arc<[Arc<str>]>,
    len: usize,
}

impl FsPath {
    /// The empty path.
    pub fn root() -> Self {
        Self {
            segments: Arc::from(Vec::new()),
            len: 0,
        }
    }

    /// Build a path from already-split segments.
    pub fn from_segments<I, S>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts: Vec<Arc<str>> = Vec::new();
        for segment in segments {
            let segment = segment.as_ref();
            validate_segment(segment)?;
            parts.push(Arc::from(segment));
        }
        let len = parts.len();
        Ok(Self {
            segments: Arc::from(parts),
            len,
        })
    }

    /// Parse a `/`- or `\`-separated path. Empty segments are skipped.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_segments(text.split(['/', '\\']).filter(|s| !s.is_empty()))
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.len
    }

    /// Whether this is the empty path.
    pub fn is_root(&self) -> bool {
        self.len == 0
    }

    /// The last segment, if any.
    pub fn name(&self) -> Option<&str> {
        self.len.checked_sub(1).map(|i| &*self.segments[i])
    }

    /// The containing path. Shares storage with `self`.
    pub fn parent(&self) -> Option<FsPath> {
        self.len.checked_sub(1).map(|len| Self {
            segments: Arc::clone(&self.segments),
            len,
        })
    }

    /// Iterate segments from the outermost to the leaf.
    pub fn segments(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator + '_ {
        self.segments[..self.len].iter().map(|s| &**s)
    }

    /// Iterate ancestors from the direct parent up to the empty path.
    pub fn ancestors(&self) -> impl Iterator<Item = FsPath> + '_ {
        (0..self.len).rev().map(move |len| Self {
            segments: Arc::clone(&self.segments),
            len,
        })
    }

    /// Append one segment.
    pub fn join(&self, name: &str) -> Result<FsPath> {
        validate_segment(name)?;
        let mut parts: Vec<Arc<str>> = self.segments[..self.len].to_vec();
        parts.push(Arc::from(name));
        let len = parts.len();
        Ok(Self {
            segments: Arc::from(parts),
            len,
        })
    }

    /// Append a segment that is already known to be valid.
    pub(crate) fn join_unchecked(&self, name: &Arc<str>) -> FsPath {
        let mut parts: Vec<Arc<str>> = self.segments[..self.len].to_vec();
        parts.push(Arc::clone(name));
        let len = parts.len();
        Self {
            segments: Arc::from(parts),
            len,
        }
    }

    /// Append every segment of `suffix`.
    pub fn join_path(&self, suffix: &FsPath) -> FsPath {
        if suffix.is_root() {
            return self.clone();
        }
        let mut parts: Vec<Arc<str>> = self.segments[..self.len].to_vec();
        parts.extend(suffix.segments[..suffix.len].iter().cloned());
        let len = parts.len();
        Self {
            segments: Arc::from(parts),
            len,
        }
    }

    /// Same path with its last segment replaced.
    pub fn with_name(&self, name: &str) -> Result<FsPath> {
        match self.parent() {
            Some(parent) => parent.join(name),
            None => Err(Error::InvalidArgument("the empty path has no name".into())),
        }
    }

    /// Compare under an explicit case rule.
    pub fn eq_with(&self, other: &FsPath, case: PathCase) -> bool {
        self.len == other.len
            && self
                .segments()
                .zip(other.segments())
                .all(|(a, b)| case.eq_segment(a, b))
    }

    /// Whether `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &FsPath, case: PathCase) -> bool {
        prefix.len <= self.len
            && self
                .segments()
                .zip(prefix.segments())
                .all(|(a, b)| case.eq_segment(a, b))
    }

    /// The part of this path below `prefix`, as a relative path.
    pub fn strip_prefix(&self, prefix: &FsPath, case: PathCase) -> Option<FsPath> {
        if !self.starts_with(prefix, case) {
            return None;
        }
        let rest: Vec<Arc<str>> = self.segments[prefix.len..self.len].to_vec();
        let len = rest.len();
        Some(Self {
            segments: Arc::from(rest),
            len,
        })
    }

    /// Swap the `from` prefix of this path for `to`, keeping the relative suffix.
    pub fn replace_prefix(&self, from: &FsPath, to: &FsPath, case: PathCase) -> Option<FsPath> {
        self.strip_prefix(from, case).map(|rest| to.join_path(&rest))
    }

    /// The deepest path that is an ancestor-or-self of both paths.
    pub fn common_ancestor(&self, other: &FsPath, case: PathCase) -> FsPath {
        let shared = self
            .segments()
            .zip(other.segments())
            .take_while(|(a, b)| case.eq_segment(a, b))
            .count();
        Self {
            segments: Arc::clone(&self.segments),
            len: shared,
        }
    }

    /// Render with a custom separator.
    pub fn to_string_with(&self, separator: char) -> String {
        let mut out = String::new();
        for (i, segment) in self.segments().enumerate() {
            if i > 0 {
                out.push(separator);
            }
            out.push_str(segment);
        }
        out
    }
}

fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() || segment == "." || segment == ".." {
        return Err(Error::InvalidArgument(format!(
            "invalid path segment '{segment}'"
        )));
    }
    if segment.contains(['/', '\\']) {
        return Err(Error::InvalidArgument(format!(
            "path segment '{segment}' contains a separator"
        )));
    }
    Ok(())
}

impl Default for FsPath {
    fn default() -> Self {
        Self::root()
    }
}

impl PartialEq for FsPath {
    fn eq(&self, other: &Self) -> bool {
        self.eq_with(other, PathCase::Insensitive)
    }
}

impl Eq for FsPath {}

impl Hash for FsPath {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len.hash(state);
        for segment in self.segments() {
            for c in segment.chars().flat_map(char::to_lowercase) {
                c.hash(state);
            }
            state.write_u8(0xff);
        }
    }
}

impl fmt::Display for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with('/'))
    }
}

impl fmt::Debug for FsPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FsPath({self})")
    }
}

impl FromStr for FsPath {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Serialize for FsPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FsPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        FsPath::parse(&text).map_err(serde::de::Error::custom)
    }
}
