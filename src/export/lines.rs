//! Output line bookkeeping
//!
//! The manifest records where each section of the file starts. Lines are
//! numbered from 1; line 1 is always the header.

use crate::model::ElementKind;

/// Kind of record occupying an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Node,
    Relationship,
    Path,
    Trailer,
}

impl From<ElementKind> for LineKind {
    fn from(kind: ElementKind) -> Self {
        match kind {
            ElementKind::Node => LineKind::Node,
            ElementKind::Relationship => LineKind::Relationship,
            ElementKind::Path => LineKind::Path,
        }
    }
}

/// Position in the output file. Advancing returns a new value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineTrackingState {
    current_line: u64,
    first_node_line: Option<u64>,
    first_relationship_line: Option<u64>,
    first_path_line: Option<u64>,
    first_trailer_line: Option<u64>,
}

impl LineTrackingState {
    /// State right after the header line.
    pub fn after_header() -> Self {
        Self {
            current_line: 1,
            first_node_line: None,
            first_relationship_line: None,
            first_path_line: None,
            first_trailer_line: None,
        }
    }

    /// Number of the last line written.
    pub fn current_line(&self) -> u64 {
        self.current_line
    }

    /// Number the next written line will get.
    pub fn next_line(&self) -> u64 {
        self.current_line + 1
    }

    /// Account for one more line of `kind`.
    #[must_use]
    pub fn advance(self, kind: LineKind) -> Self {
        let line = self.next_line();
        let mut next = Self {
            current_line: line,
            ..self
        };
        let first = match kind {
            LineKind::Node => &mut next.first_node_line,
            LineKind::Relationship => &mut next.first_relationship_line,
            LineKind::Path => &mut next.first_path_line,
            LineKind::Trailer => &mut next.first_trailer_line,
        };
        first.get_or_insert(line);
        next
    }

    pub fn first_line(&self, kind: LineKind) -> Option<u64> {
        match kind {
            LineKind::Node => self.first_node_line,
            LineKind::Relationship => self.first_relationship_line,
            LineKind::Path => self.first_path_line,
            LineKind::Trailer => self.first_trailer_line,
        }
    }
}

impl Default for LineTrackingState {
    fn default() -> Self {
        Self::after_header()
    }
}
