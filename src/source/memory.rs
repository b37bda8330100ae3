//! In-process graph backend
//!
//! Holds rows in memory and serves them through the same paging contract as
//! a real database. Failures can be injected into page fetches, metadata
//! collection and the connectivity check.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use super::{GraphSource, PageCursor, PageRequest, SourceMetadata};
use crate::error::{ExportError, QueryError, Result};
use crate::model::{ElementKind, GraphElement, Node, Relationship, SourceRow};

/// In-memory graph
pub struct MemoryGraph {
    database: String,
    nodes: Vec<SourceRow>,
    relationships: Vec<SourceRow>,
    keyset: bool,
    report_schema: bool,
    page_failures: Mutex<VecDeque<ExportError>>,
    metadata_failure: Mutex<Option<ExportError>>,
    connectivity_failure: Mutex<Option<ExportError>>,
    pages_fetched: AtomicUsize,
}

impl MemoryGraph {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            nodes: Vec::new(),
            relationships: Vec::new(),
            keyset: true,
            report_schema: true,
            page_failures: Mutex::new(VecDeque::new()),
            metadata_failure: Mutex::new(None),
            connectivity_failure: Mutex::new(None),
            pages_fetched: AtomicUsize::new(0),
        }
    }

    pub fn with_node(self, node: Node) -> Self {
        self.with_row(node.into())
    }

    pub fn with_relationship(self, rel: Relationship) -> Self {
        self.with_row(rel.into())
    }

    /// Add any row, including unreadable ones. Rows are kept ordered by id.
    pub fn with_row(mut self, row: SourceRow) -> Self {
        let rows = match row.kind() {
            ElementKind::Relationship => &mut self.relationships,
            ElementKind::Node | ElementKind::Path => &mut self.nodes,
        };
        rows.push(row);
        rows.sort_by_key(|r| r.id().unwrap_or(i64::MIN));
        self
    }

    /// Serve pages by offset only.
    pub fn without_keyset(mut self) -> Self {
        self.keyset = false;
        self
    }

    /// Make the next page fetches fail with `errors`, in order.
    pub fn fail_next_pages(&self, errors: impl IntoIterator<Item = ExportError>) {
        if let Ok(mut queue) = self.page_failures.lock() {
            queue.extend(errors);
        }
    }

    /// Report no labels or relationship types in metadata, as a graph that
    /// changed after its schema was read would.
    pub fn without_schema(mut self) -> Self {
        self.report_schema = false;
        self
    }

    /// Make the next metadata collection fail with `error`.
    pub fn fail_metadata(&self, error: ExportError) {
        if let Ok(mut slot) = self.metadata_failure.lock() {
            *slot = Some(error);
        }
    }

    /// Make the next connectivity check fail with `error`.
    pub fn fail_connectivity(&self, error: ExportError) {
        if let Ok(mut slot) = self.connectivity_failure.lock() {
            *slot = Some(error);
        }
    }

    /// Page fetch attempts so far, failed ones included.
    pub fn pages_fetched(&self) -> usize {
        self.pages_fetched.load(Ordering::Relaxed)
    }

    fn rows(&self, kind: ElementKind) -> &[SourceRow] {
        match kind {
            ElementKind::Relationship => &self.relationships,
            ElementKind::Node | ElementKind::Path => &self.nodes,
        }
    }

    fn elements(&self) -> impl Iterator<Item = &GraphElement> {
        self.nodes
            .iter()
            .chain(self.relationships.iter())
            .filter_map(|row| match row {
                SourceRow::Element(element) => Some(element),
                SourceRow::Unreadable { .. } => None,
            })
    }
}

#[async_trait]
impl GraphSource for MemoryGraph {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }

    fn supports_keyset(&self) -> bool {
        self.keyset
    }

    async fn verify_connectivity(&self) -> Result<()> {
        let failure = self
            .connectivity_failure
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn count(&self, kind: ElementKind) -> Result<u64> {
        Ok(self.rows(kind).len() as u64)
    }

    async fn fetch_page(&self, kind: ElementKind, request: PageRequest) -> Result<Vec<SourceRow>> {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
        let injected = self
            .page_failures
            .lock()
            .ok()
            .and_then(|mut queue| queue.pop_front());
        if let Some(e) = injected {
            return Err(e);
        }

        let rows = self.rows(kind);
        let page = match request.cursor {
            PageCursor::Keyset { after } => {
                if !self.keyset {
                    return Err(QueryError::ExecutionFailed {
                        code: None,
                        message: "keyset pagination is not supported".to_string(),
                    }
                    .into());
                }
                let start = match after {
                    Some(after) => rows.partition_point(|r| r.id().unwrap_or(i64::MIN) <= after),
                    None => 0,
                };
                &rows[start..]
            }
            PageCursor::Offset { skip } => {
                let skip = usize::try_from(skip).unwrap_or(usize::MAX).min(rows.len());
                &rows[skip..]
            }
        };
        Ok(page.iter().take(request.limit).cloned().collect())
    }

    async fn collect_metadata(&self) -> Result<SourceMetadata> {
        let failure = self
            .metadata_failure
            .lock()
            .ok()
            .and_then(|mut slot| slot.take());
        if let Some(e) = failure {
            return Err(e);
        }

        let mut labels = BTreeSet::new();
        let mut types = BTreeSet::new();
        let mut keys = BTreeSet::new();
        for element in self.elements() {
            match element {
                GraphElement::Node(n) => {
                    labels.extend(n.labels.iter().cloned());
                    keys.extend(n.properties.iter().map(|(k, _)| k.to_string()));
                }
                GraphElement::Relationship(r) => {
                    types.insert(r.rel_type.clone());
                    keys.extend(r.properties.iter().map(|(k, _)| k.to_string()));
                }
                GraphElement::Path(_) => {}
            }
        }
        if !self.report_schema {
            labels.clear();
            types.clear();
        }
        Ok(SourceMetadata {
            labels: labels.into_iter().collect(),
            relationship_types: types.into_iter().collect(),
            property_keys: keys.into_iter().collect(),
            details: serde_json::json!({ "backend": "memory" }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;
    use crate::model::PropertyMap;

    fn graph() -> MemoryGraph {
        let mut g = MemoryGraph::new("neo4j");
        for id in [5, 1, 3] {
            g = g.with_node(Node {
                id,
                labels: vec![format!("L{id}")],
                properties: PropertyMap::new().with("n", id),
                ..Default::default()
            });
        }
        g.with_relationship(Relationship {
            id: 1,
            rel_type: "R".to_string(),
            start: 1,
            end: 3,
            ..Default::default()
        })
    }

    fn ids(rows: &[SourceRow]) -> Vec<i64> {
        rows.iter().filter_map(|r| r.id()).collect()
    }

    #[tokio::test]
    async fn test_keyset_pages() {
        let g = graph();
        let first = PageRequest {
            cursor: PageCursor::Keyset { after: None },
            limit: 2,
        };
        let page = g.fetch_page(ElementKind::Node, first).await.unwrap();
        assert_eq!(ids(&page), vec![1, 3]);

        let next = PageRequest {
            cursor: PageCursor::Keyset { after: Some(3) },
            limit: 2,
        };
        let page = g.fetch_page(ElementKind::Node, next).await.unwrap();
        assert_eq!(ids(&page), vec![5]);
    }

    #[tokio::test]
    async fn test_offset_pages() {
        let g = graph().without_keyset();
        assert!(!g.supports_keyset());
        let request = PageRequest {
            cursor: PageCursor::Offset { skip: 2 },
            limit: 10,
        };
        let page = g.fetch_page(ElementKind::Node, request).await.unwrap();
        assert_eq!(ids(&page), vec![5]);
        let past_end = PageRequest {
            cursor: PageCursor::Offset { skip: 10 },
            limit: 10,
        };
        assert!(g.fetch_page(ElementKind::Node, past_end).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let g = graph();
        g.fail_next_pages([ConnectionError::ServiceUnavailable("down".into()).into()]);
        let request = PageRequest {
            cursor: PageCursor::Keyset { after: None },
            limit: 10,
        };
        assert!(g.fetch_page(ElementKind::Relationship, request).await.is_err());
        let page = g.fetch_page(ElementKind::Relationship, request).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(g.pages_fetched(), 2);

        g.fail_connectivity(ConnectionError::ConnectionFailed("refused".into()).into());
        assert!(g.verify_connectivity().await.is_err());
        assert!(g.verify_connectivity().await.is_ok());
    }

    #[tokio::test]
    async fn test_metadata() {
        let g = graph();
        assert_eq!(g.count(ElementKind::Node).await.unwrap(), 3);
        let meta = g.collect_metadata().await.unwrap();
        assert_eq!(meta.labels, vec!["L1", "L3", "L5"]);
        assert_eq!(meta.relationship_types, vec!["R"]);
        assert_eq!(meta.property_keys, vec!["n"]);
        assert_eq!(meta.details["backend"], "memory");
    }

    #[tokio::test]
    async fn test_metadata_failure_is_injected_once() {
        let g = graph();
        g.fail_metadata(QueryError::InvalidResult("no procedures".into()).into());
        assert!(g.collect_metadata().await.is_err());
        let meta = g.collect_metadata().await.unwrap();
        assert_eq!(meta.labels, vec!["L1", "L3", "L5"]);
    }

    #[tokio::test]
    async fn test_without_schema_hides_labels_and_types() {
        let meta = graph().without_schema().collect_metadata().await.unwrap();
        assert!(meta.labels.is_empty());
        assert!(meta.relationship_types.is_empty());
        assert_eq!(meta.property_keys, vec!["n"]);
    }
}
