//! Graph elements

use crate::error::{QueryError, Result};

use super::value::GraphValue;

/// Properties of a node or relationship, in source order.
///
/// Backed by a vector rather than a hash map: order is kept stable in the
/// output and repeated keys survive until the encoder deduplicates them.
#[derive(Debug, Clone, Default)]
pub struct PropertyMap(Vec<(String, GraphValue)>);

impl PropertyMap {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Append a property. Existing keys are not replaced.
    pub fn insert(&mut self, key: impl Into<String>, value: GraphValue) {
        self.0.push((key.into(), value));
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<GraphValue>) -> Self {
        self.insert(key, value.into());
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &GraphValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, GraphValue)> for PropertyMap {
    fn from_iter<I: IntoIterator<Item = (K, GraphValue)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// A labelled vertex.
#[derive(Debug, Clone, Default)]
pub struct Node {
    /// Numeric identity, used for ordering and keyset pagination
    pub id: i64,
    /// Backend-specific opaque identity, when the backend has one
    pub element_id: Option<String>,
    pub labels: Vec<String>,
    pub properties: PropertyMap,
}

/// A typed, directed edge between two nodes.
#[derive(Debug, Clone, Default)]
pub struct Relationship {
    pub id: i64,
    pub element_id: Option<String>,
    pub rel_type: String,
    pub start: i64,
    pub end: i64,
    pub properties: PropertyMap,
}

/// An alternating walk of nodes and relationships.
#[derive(Debug, Clone, Default)]
pub struct Path {
    nodes: Vec<Node>,
    relationships: Vec<Relationship>,
}

impl Path {
    /// Build a path, checking that it has exactly one relationship fewer
    /// than nodes (or is empty).
    pub fn new(nodes: Vec<Node>, relationships: Vec<Relationship>) -> Result<Self> {
        let consistent = if nodes.is_empty() {
            relationships.is_empty()
        } else {
            relationships.len() + 1 == nodes.len()
        };
        if !consistent {
            return Err(QueryError::InvalidResult(format!(
                "path with {} nodes cannot have {} relationships",
                nodes.len(),
                relationships.len()
            ))
            .into());
        }
        Ok(Self {
            nodes,
            relationships,
        })
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Number of relationships traversed.
    pub fn len(&self) -> usize {
        self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// One exportable graph element.
#[derive(Debug, Clone)]
pub enum GraphElement {
    Node(Node),
    Relationship(Relationship),
    Path(Path),
}

/// Kind of record a row produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    Node,
    Relationship,
    Path,
}

impl ElementKind {
    /// Value of the `type` field in output records.
    pub fn as_str(&self) -> &'static str {
        match self {
            ElementKind::Node => "node",
            ElementKind::Relationship => "relationship",
            ElementKind::Path => "path",
        }
    }
}

/// A row as delivered by a backend.
///
/// Backends decode rows eagerly; when labels or properties cannot be
/// decoded the row is still delivered as `Unreadable` so the export keeps
/// one output line per source element.
#[derive(Debug, Clone)]
pub enum SourceRow {
    Element(GraphElement),
    Unreadable {
        kind: ElementKind,
        id: Option<i64>,
        reason: String,
    },
}

impl SourceRow {
    pub fn kind(&self) -> ElementKind {
        match self {
            SourceRow::Element(GraphElement::Node(_)) => ElementKind::Node,
            SourceRow::Element(GraphElement::Relationship(_)) => ElementKind::Relationship,
            SourceRow::Element(GraphElement::Path(_)) => ElementKind::Path,
            SourceRow::Unreadable { kind, .. } => *kind,
        }
    }

    /// Numeric identity used as the keyset cursor, if any.
    pub fn id(&self) -> Option<i64> {
        match self {
            SourceRow::Element(GraphElement::Node(n)) => Some(n.id),
            SourceRow::Element(GraphElement::Relationship(r)) => Some(r.id),
            SourceRow::Element(GraphElement::Path(p)) => p.nodes().first().map(|n| n.id),
            SourceRow::Unreadable { id, .. } => *id,
        }
    }
}

impl From<Node> for SourceRow {
    fn from(node: Node) -> Self {
        SourceRow::Element(GraphElement::Node(node))
    }
}

impl From<Relationship> for SourceRow {
    fn from(rel: Relationship) -> Self {
        SourceRow::Element(GraphElement::Relationship(rel))
    }
}
