//! Position: the serializable cursor addressing a task instance
//!
//! Every reachable runtime state maps to exactly one position. A position is
//! an ordered list of segments (container field names, list indexes, loop
//! iteration indexes and task names) and round-trips through a flat
//! JSON-Pointer-like string (`/do/1/loop/for/3/do/0/inner`) so it can be
//! persisted with an instance and resumed after a process restart.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use snafu::prelude::*;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Invalid position string: {input}"))]
    InvalidPosition { input: String },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One step of a position path.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Segment {
    /// List index or loop iteration index.
    Index(usize),
    /// Container field (`do`, `try`, `catch`, `for`, `fork`, `branches`)
    /// or a task/branch name.
    Name(String),
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Index(i) => write!(f, "{i}"),
            Segment::Name(name) => write!(f, "{name}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Position {
    segments: Vec<Segment>,
}

impl Position {
    #[must_use]
    pub fn root() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn push_name(&mut self, name: impl Into<String>) {
        self.segments.push(Segment::Name(name.into()));
    }

    pub fn push_index(&mut self, index: usize) {
        self.segments.push(Segment::Index(index));
    }

    pub fn pop(&mut self) -> Option<Segment> {
        self.segments.pop()
    }

    /// Position extended by the given segments.
    #[must_use]
    pub fn child(&self, segments: &[Segment]) -> Self {
        let mut child = self.clone();
        child.segments.extend_from_slice(segments);
        child
    }

    /// Address of a task within a container list rooted at this position:
    /// `<self>/<index>/<name>`.
    #[must_use]
    pub fn task(&self, index: usize, name: &str) -> Self {
        self.child(&[Segment::Index(index), Segment::Name(name.to_string())])
    }

    /// Truncated copy keeping the first `len` segments.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            segments: self.segments.iter().take(len).cloned().collect(),
        }
    }

    /// The enclosing container list address, i.e. this position without the
    /// trailing `<index>/<name>` pair. `None` at the root list.
    #[must_use]
    pub fn container(&self) -> Option<Self> {
        if self.segments.len() < 3 {
            return None;
        }
        Some(self.prefix(self.segments.len() - 2))
    }

    /// Replace the trailing `<index>/<name>` pair, staying in the same scope.
    #[must_use]
    pub fn sibling(&self, index: usize, name: &str) -> Self {
        let mut sibling = self.prefix(self.segments.len().saturating_sub(2));
        sibling.push_index(index);
        sibling.push_name(name);
        sibling
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.segments.is_empty() {
            return write!(f, "/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for Position {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if !s.starts_with('/') {
            return Err(Error::InvalidPosition { input: s.to_string() });
        }
        let mut segments = Vec::new();
        for part in s.split('/').skip(1) {
            if part.is_empty() {
                continue;
            }
            match part.parse::<usize>() {
                Ok(index) => segments.push(Segment::Index(index)),
                Err(_) => segments.push(Segment::Name(part.to_string())),
            }
        }
        Ok(Self { segments })
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_flat_string() {
        let mut pos = Position::root();
        pos.push_name("do");
        pos.push_index(1);
        pos.push_name("loop");
        pos.push_name("for");
        pos.push_index(3);
        pos.push_name("do");
        pos.push_index(0);
        pos.push_name("inner");

        let s = pos.to_string();
        assert_eq!(s, "/do/1/loop/for/3/do/0/inner");
        let parsed: Position = s.parse().expect("parses back");
        assert_eq!(parsed, pos);
    }

    #[test]
    fn test_container_strips_index_name_pair() {
        let pos: Position = "/do/1/task".parse().expect("valid");
        let container = pos.container().expect("has container");
        assert_eq!(container.to_string(), "/do");
    }

    #[test]
    fn test_sibling_replaces_tail() {
        let pos: Position = "/do/1/a/try/0/x".parse().expect("valid");
        assert_eq!(pos.sibling(2, "y").to_string(), "/do/1/a/try/2/y");
    }

    #[test]
    fn test_positions_are_comparable() {
        let a: Position = "/do/0/a".parse().expect("valid");
        let b: Position = "/do/1/b".parse().expect("valid");
        assert!(a < b);
    }

    #[test]
    fn test_rejects_relative_paths() {
        assert!("do/0/a".parse::<Position>().is_err());
    }
}
