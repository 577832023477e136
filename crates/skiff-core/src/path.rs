//! Object path model
//!
//! The backend namespace is flat and two-level: a container name plus an
//! object name that may itself contain `/` separators. Client paths are
//! parsed into that shape once, up front, so every adapter operation works
//! on a validated `ObjectPath` instead of a raw string.

use crate::error::Error;
use crate::{MAX_PATH_LEN, MAX_SEGMENT_LEN};

/// A parsed client path.
///
/// Segment 0 is the container; the remaining segments joined by `/` form
/// the object name. Zero segments is the account root.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectPath {
    Root,
    Container(String),
    Object { container: String, name: String },
}

impl ObjectPath {
    /// Parse a `/`-joined client path.
    ///
    /// Empty and `.` segments are dropped; `..`, NUL bytes, and oversized
    /// components are rejected rather than resolved.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        if raw.len() > MAX_PATH_LEN {
            return Err(Error::unsupported("path too long"));
        }
        if raw.contains('\0') {
            return Err(Error::unsupported("path contains NUL byte"));
        }

        let mut segments = Vec::new();
        for seg in raw.split('/') {
            match seg {
                "" | "." => continue,
                ".." => return Err(Error::unsupported("parent traversal not allowed")),
                s if s.len() > MAX_SEGMENT_LEN => {
                    return Err(Error::unsupported("path segment too long"))
                }
                s => segments.push(s),
            }
        }
        Ok(Self::from_segments(&segments))
    }

    /// Build a path from pre-split segments (the FTP shell contract hands
    /// paths over segment-by-segment).
    pub fn from_segments<S: AsRef<str>>(segments: &[S]) -> Self {
        match segments {
            [] => ObjectPath::Root,
            [container] => ObjectPath::Container(container.as_ref().to_string()),
            [container, rest @ ..] => ObjectPath::Object {
                container: container.as_ref().to_string(),
                name: rest
                    .iter()
                    .map(|s| s.as_ref())
                    .collect::<Vec<_>>()
                    .join("/"),
            },
        }
    }

    pub fn is_root(&self) -> bool {
        matches!(self, ObjectPath::Root)
    }

    /// Container name, if any.
    pub fn container(&self) -> Option<&str> {
        match self {
            ObjectPath::Root => None,
            ObjectPath::Container(c) => Some(c),
            ObjectPath::Object { container, .. } => Some(container),
        }
    }

    /// Object name within the container, if any.
    pub fn object(&self) -> Option<&str> {
        match self {
            ObjectPath::Object { name, .. } => Some(name),
            _ => None,
        }
    }

    /// Number of path segments (0 for root, 1 for a container, >= 2 for
    /// an object).
    pub fn depth(&self) -> usize {
        match self {
            ObjectPath::Root => 0,
            ObjectPath::Container(_) => 1,
            ObjectPath::Object { name, .. } => 1 + name.split('/').count(),
        }
    }

    /// Listing prefix for children of this path: `None` at the container
    /// level, `"name/"` below it.
    pub fn child_prefix(&self) -> Option<String> {
        self.object().map(|name| format!("{name}/"))
    }

    /// Final path segment, used as the display name in listings.
    pub fn basename(&self) -> Option<&str> {
        match self {
            ObjectPath::Root => None,
            ObjectPath::Container(c) => Some(c),
            ObjectPath::Object { name, .. } => name.rsplit('/').next(),
        }
    }

    /// Normalized absolute form, e.g. `/container/a/b`.
    pub fn to_absolute(&self) -> String {
        match self {
            ObjectPath::Root => "/".to_string(),
            ObjectPath::Container(c) => format!("/{c}"),
            ObjectPath::Object { container, name } => format!("/{container}/{name}"),
        }
    }
}

impl std::fmt::Display for ObjectPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_absolute())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_root() {
        assert_eq!(ObjectPath::parse("").unwrap(), ObjectPath::Root);
        assert_eq!(ObjectPath::parse("/").unwrap(), ObjectPath::Root);
        assert_eq!(ObjectPath::parse("//").unwrap(), ObjectPath::Root);
        assert_eq!(ObjectPath::parse("/./").unwrap(), ObjectPath::Root);
    }

    #[test]
    fn test_parse_container() {
        assert_eq!(
            ObjectPath::parse("/photos").unwrap(),
            ObjectPath::Container("photos".into())
        );
        assert_eq!(
            ObjectPath::parse("photos/").unwrap(),
            ObjectPath::Container("photos".into())
        );
    }

    #[test]
    fn test_parse_object() {
        let p = ObjectPath::parse("/photos/2024/trip.jpg").unwrap();
        assert_eq!(p.container(), Some("photos"));
        assert_eq!(p.object(), Some("2024/trip.jpg"));
        assert_eq!(p.depth(), 3);
        assert_eq!(p.basename(), Some("trip.jpg"));
        assert_eq!(p.child_prefix().as_deref(), Some("2024/trip.jpg/"));
    }

    #[test]
    fn test_parse_collapses_redundant_separators() {
        let p = ObjectPath::parse("//photos//./a//b").unwrap();
        assert_eq!(p.to_absolute(), "/photos/a/b");
    }

    #[test]
    fn test_parse_rejects_traversal() {
        assert!(ObjectPath::parse("../etc").is_err());
        assert!(ObjectPath::parse("photos/../other").is_err());
    }

    #[test]
    fn test_parse_rejects_nul() {
        assert!(ObjectPath::parse("photos/a\0b").is_err());
    }

    #[test]
    fn test_parse_rejects_oversized() {
        let long = "a".repeat(MAX_SEGMENT_LEN + 1);
        assert!(ObjectPath::parse(&long).is_err());
        let deep = "x/".repeat(MAX_PATH_LEN);
        assert!(ObjectPath::parse(&deep).is_err());
    }

    #[test]
    fn test_from_segments() {
        assert_eq!(ObjectPath::from_segments::<&str>(&[]), ObjectPath::Root);
        assert_eq!(
            ObjectPath::from_segments(&["t", "a", "b"]),
            ObjectPath::Object {
                container: "t".into(),
                name: "a/b".into()
            }
        );
    }

    #[test]
    fn test_display_roundtrip() {
        for raw in ["/", "/t", "/t/a", "/t/a/b"] {
            let p = ObjectPath::parse(raw).unwrap();
            assert_eq!(p.to_absolute(), *raw);
        }
    }
}
