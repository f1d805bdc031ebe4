//! Configuration paths
//!
//! Provides [`ConfigPath`] for addressing subtrees of a device datastore.
//! A path always starts at a namespace-qualified root element and may descend
//! through child elements and keyed list entries.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;

/// One step of a [`ConfigPath`]
///
/// A plain segment names a container or leaf. A keyed segment selects one
/// entry of a list, e.g. `subscription[subscription-identifier=anx-1]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Segment {
    name: String,
    key: Option<(String, String)>,
}

impl Segment {
    /// Plain element segment
    #[inline]
    #[must_use]
    pub fn element(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            key: None,
        }
    }

    /// List entry segment selected by a key leaf
    #[inline]
    #[must_use]
    pub fn entry(
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            key: Some((key.into(), value.into())),
        }
    }

    /// Element name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key leaf name and value, for list entries
    #[inline]
    #[must_use]
    pub fn key(&self) -> Option<(&str, &str)> {
        self.key.as_ref().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.key {
            Some((key, value)) => write!(f, "{}[{}={}]", self.name, key, value),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Path to a configuration subtree
///
/// Rendered in Clark notation: `{namespace}root/child/entry[key=value]`.
///
/// # Invariants
/// - `segments` is never empty; the first segment is the subtree root element
/// - the root segment is never keyed
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConfigPath {
    namespace: String,
    segments: Vec<Segment>,
}

impl ConfigPath {
    /// Path to a top-level subtree identified by namespace + element name
    #[inline]
    #[must_use]
    pub fn subtree(namespace: impl Into<String>, element: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            segments: vec![Segment::element(element)],
        }
    }

    /// Append a plain element segment, returning new path
    #[inline]
    #[must_use]
    pub fn child(&self, name: impl Into<String>) -> Self {
        let mut new = self.clone();
        new.segments.push(Segment::element(name));
        new
    }

    /// Append a keyed list entry segment, returning new path
    #[inline]
    #[must_use]
    pub fn entry(
        &self,
        name: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        let mut new = self.clone();
        new.segments.push(Segment::entry(name, key, value));
        new
    }

    /// Namespace of the subtree root
    #[inline]
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Root element name
    #[inline]
    #[must_use]
    pub fn root_element(&self) -> &str {
        self.segments[0].name()
    }

    /// All segments, root first
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Last segment
    #[inline]
    #[must_use]
    pub fn last(&self) -> &Segment {
        &self.segments[self.segments.len() - 1]
    }

    /// Number of segments (root included)
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    /// Always false; a path names at least its root element
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether this path addresses a whole subtree
    #[inline]
    #[must_use]
    pub fn is_subtree_root(&self) -> bool {
        self.segments.len() == 1
    }

    /// Parent path (`None` for a subtree root)
    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.is_subtree_root() {
            None
        } else {
            Some(Self {
                namespace: self.namespace.clone(),
                segments: self.segments[..self.segments.len() - 1].to_vec(),
            })
        }
    }

    /// Path to the subtree root this path lives in
    #[inline]
    #[must_use]
    pub fn subtree_root(&self) -> Self {
        Self {
            namespace: self.namespace.clone(),
            segments: vec![self.segments[0].clone()],
        }
    }

    /// Check if this path is a prefix of another
    #[inline]
    #[must_use]
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        self.namespace == other.namespace
            && self.segments.len() <= other.segments.len()
            && self.segments == other.segments[..self.segments.len()]
    }
}

impl Display for ConfigPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}", self.namespace)?;
        for (i, segment) in self.segments.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

impl FromStr for ConfigPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s.strip_prefix('{').ok_or(PathError::MissingNamespace)?;
        let close = rest.find('}').ok_or(PathError::MissingNamespace)?;
        let namespace = &rest[..close];
        if namespace.is_empty() {
            return Err(PathError::MissingNamespace);
        }

        let mut segments = Vec::new();
        for raw in split_segments(&rest[close + 1..])? {
            segments.push(parse_segment(raw)?);
        }
        if segments.is_empty() {
            return Err(PathError::EmptySegment);
        }
        if segments[0].key.is_some() {
            return Err(PathError::KeyedRoot(segments[0].to_string()));
        }

        Ok(Self {
            namespace: namespace.to_string(),
            segments,
        })
    }
}

// Splits on '/' outside of key predicates.
fn split_segments(s: &str) -> Result<Vec<&str>, PathError> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| PathError::InvalidSegment(s.to_string()))?;
            }
            '/' if depth == 0 => {
                parts.push(&s[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(PathError::InvalidSegment(s.to_string()));
    }
    parts.push(&s[start..]);
    Ok(parts)
}

fn parse_segment(raw: &str) -> Result<Segment, PathError> {
    if raw.is_empty() {
        return Err(PathError::EmptySegment);
    }
    let Some(open) = raw.find('[') else {
        return Ok(Segment::element(raw));
    };
    let name = &raw[..open];
    let predicate = raw[open + 1..]
        .strip_suffix(']')
        .ok_or_else(|| PathError::InvalidSegment(raw.to_string()))?;
    let (key, value) = predicate
        .split_once('=')
        .ok_or_else(|| PathError::InvalidSegment(raw.to_string()))?;
    if name.is_empty() || key.is_empty() {
        return Err(PathError::InvalidSegment(raw.to_string()));
    }
    Ok(Segment::entry(name, key, value))
}

/// Errors related to configuration paths
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Path does not start with `{namespace}`
    #[error("path must start with a {{namespace}} prefix")]
    MissingNamespace,

    /// Empty segment in path
    #[error("path contains empty segment")]
    EmptySegment,

    /// Malformed segment or key predicate
    #[error("invalid segment: {0}")]
    InvalidSegment(String),

    /// Root element carries a key predicate
    #[error("subtree root cannot be keyed: {0}")]
    KeyedRoot(String),
}
