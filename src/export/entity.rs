//! One JSON line per graph element
//!
//! The writer only produces bytes into a caller-owned buffer; the caller
//! appends the newline and owns the file. Every property value is encoded
//! with its own depth budget starting at zero.

use serde::Serialize;

use crate::config::EncodingLimits;
use crate::encoder::{
    EncodingIssue, KeyDeduplicator, SerializationDepth, ValueEncoder, truncate_chars, write_json,
};
use crate::model::{ElementKind, GraphElement, Node, Path, PropertyMap, Relationship, SourceRow};

/// What was written for one row.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityReport {
    pub kind: ElementKind,
    pub id: Option<i64>,
    /// Labels as written for a node, or the relationship type
    pub labels: Vec<String>,
    /// Values degraded while encoding
    pub issues: Vec<EncodingIssue>,
    /// Why the row could not be exported in full
    pub error: Option<String>,
}

impl EntityReport {
    fn new(kind: ElementKind, id: Option<i64>) -> Self {
        Self {
            kind,
            id,
            labels: Vec::new(),
            issues: Vec::new(),
            error: None,
        }
    }
}

/// How much of a path is written, chosen by its node count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PathMode {
    /// Nodes and relationships with properties
    Full,
    /// Identities, labels and types without properties
    Compact,
    /// Identities only
    IdsOnly,
}

impl PathMode {
    pub fn for_node_count(count: usize, limits: &EncodingLimits) -> Self {
        if count <= limits.path_full_threshold {
            PathMode::Full
        } else if count <= limits.path_compact_threshold {
            PathMode::Compact
        } else {
            PathMode::IdsOnly
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PathMode::Full => "full",
            PathMode::Compact => "compact",
            PathMode::IdsOnly => "ids_only",
        }
    }
}

#[derive(Serialize)]
struct ItemsShown {
    #[serde(rename = "_total_items")]
    total_items: usize,
    #[serde(rename = "_shown_items")]
    shown_items: usize,
}

/// Writer for node, relationship and path records
pub struct EntityWriter<'a> {
    encoder: ValueEncoder<'a>,
    export_id: &'a str,
}

impl<'a> EntityWriter<'a> {
    pub fn new(limits: &'a EncodingLimits, export_id: &'a str) -> Self {
        Self {
            encoder: ValueEncoder::new(limits),
            export_id,
        }
    }

    fn limits(&self) -> &EncodingLimits {
        self.encoder.limits()
    }

    /// Write the record for one source row, without the trailing newline.
    pub fn write_row(&mut self, buf: &mut Vec<u8>, row: &SourceRow) -> EntityReport {
        match row {
            SourceRow::Element(GraphElement::Node(node)) => self.write_node(buf, node),
            SourceRow::Element(GraphElement::Relationship(rel)) => {
                self.write_relationship(buf, rel)
            }
            SourceRow::Element(GraphElement::Path(path)) => self.write_path(buf, path),
            SourceRow::Unreadable { kind, id, reason } => {
                self.write_unreadable(buf, *kind, *id, reason)
            }
        }
    }

    pub fn write_node(&mut self, buf: &mut Vec<u8>, node: &Node) -> EntityReport {
        let mut report = EntityReport::new(ElementKind::Node, Some(node.id));
        self.write_prologue(buf, ElementKind::Node, Some(node.id), node.element_id.as_deref());
        buf.push(b',');
        report.labels = self.write_labels(buf, &node.labels, &mut report.issues);
        buf.extend_from_slice(b",\"properties\":");
        self.write_properties(buf, &node.properties);
        buf.push(b'}');
        report.issues.extend(self.encoder.take_issues());
        report
    }

    pub fn write_relationship(&mut self, buf: &mut Vec<u8>, rel: &Relationship) -> EntityReport {
        let mut report = EntityReport::new(ElementKind::Relationship, Some(rel.id));
        self.write_prologue(
            buf,
            ElementKind::Relationship,
            Some(rel.id),
            rel.element_id.as_deref(),
        );
        buf.push(b',');
        let label = self.write_relationship_fields(buf, rel);
        buf.extend_from_slice(b",\"properties\":");
        self.write_properties(buf, &rel.properties);
        buf.push(b'}');
        report.labels.push(label);
        report.issues.extend(self.encoder.take_issues());
        report
    }

    /// Write a path, choosing its mode from the node count.
    pub fn write_path(&mut self, buf: &mut Vec<u8>, path: &Path) -> EntityReport {
        let mut report = EntityReport::new(ElementKind::Path, path.nodes().first().map(|n| n.id));
        let mode = PathMode::for_node_count(path.nodes().len(), self.limits());
        let shown_nodes = path.nodes().len().min(self.limits().max_path_length);
        let nodes = &path.nodes()[..shown_nodes];
        let rels = &path.relationships()[..shown_nodes.saturating_sub(1)];

        buf.extend_from_slice(b"{\"type\":\"path\",\"export_id\":");
        write_json(buf, self.export_id);
        buf.extend_from_slice(b",\"length\":");
        push_int(buf, path.len() as i64);
        buf.extend_from_slice(b",\"mode\":");
        write_json(buf, mode.as_str());

        if shown_nodes < path.nodes().len() {
            buf.extend_from_slice(b",\"truncated\":");
            push_serialized(
                buf,
                &ItemsShown {
                    total_items: path.nodes().len(),
                    shown_items: shown_nodes,
                },
            );
            report.issues.push(EncodingIssue::Truncated {
                reason: "path_too_long",
                depth: 0,
            });
        }

        match mode {
            PathMode::IdsOnly => {
                buf.extend_from_slice(b",\"node_ids\":");
                push_id_list(buf, nodes.iter().map(|n| n.id));
                buf.extend_from_slice(b",\"relationship_ids\":");
                push_id_list(buf, rels.iter().map(|r| r.id));
            }
            PathMode::Full | PathMode::Compact => {
                let with_properties = mode == PathMode::Full;
                buf.extend_from_slice(b",\"nodes\":[");
                for (i, node) in nodes.iter().enumerate() {
                    if i > 0 {
                        buf.push(b',');
                    }
                    buf.extend_from_slice(b"{\"id\":");
                    push_int(buf, node.id);
                    buf.push(b',');
                    self.write_labels(buf, &node.labels, &mut report.issues);
                    if with_properties {
                        buf.extend_from_slice(b",\"properties\":");
                        self.write_properties(buf, &node.properties);
                    }
                    buf.push(b'}');
                }
                buf.extend_from_slice(b"],\"relationships\":[");
                for (i, rel) in rels.iter().enumerate() {
                    if i > 0 {
                        buf.push(b',');
                    }
                    buf.extend_from_slice(b"{\"id\":");
                    push_int(buf, rel.id);
                    buf.push(b',');
                    self.write_relationship_fields(buf, rel);
                    if with_properties {
                        buf.extend_from_slice(b",\"properties\":");
                        self.write_properties(buf, &rel.properties);
                    }
                    buf.push(b'}');
                }
                buf.push(b']');
            }
        }
        buf.push(b'}');
        report.issues.extend(self.encoder.take_issues());
        report
    }

    /// Placeholder record for a row the backend could not decode.
    fn write_unreadable(
        &mut self,
        buf: &mut Vec<u8>,
        kind: ElementKind,
        id: Option<i64>,
        reason: &str,
    ) -> EntityReport {
        let mut report = EntityReport::new(kind, id);
        self.write_prologue(buf, kind, id, None);
        buf.extend_from_slice(b",\"_export_error\":");
        write_json(buf, reason);
        buf.push(b'}');
        report.error = Some(reason.to_string());
        report
    }

    /// `{"type":…,"id":…[,"element_id":…],"export_id":…`
    fn write_prologue(
        &self,
        buf: &mut Vec<u8>,
        kind: ElementKind,
        id: Option<i64>,
        element_id: Option<&str>,
    ) {
        buf.extend_from_slice(b"{\"type\":");
        write_json(buf, kind.as_str());
        buf.extend_from_slice(b",\"id\":");
        match id {
            Some(id) => push_int(buf, id),
            None => buf.extend_from_slice(b"null"),
        }
        if let Some(element_id) = element_id {
            buf.extend_from_slice(b",\"element_id\":");
            write_json(buf, element_id);
        }
        buf.extend_from_slice(b",\"export_id\":");
        write_json(buf, self.export_id);
    }

    /// `"labels":[…][,"labels_truncated":{…}]`; returns the labels as written.
    fn write_labels(
        &self,
        buf: &mut Vec<u8>,
        labels: &[String],
        issues: &mut Vec<EncodingIssue>,
    ) -> Vec<String> {
        let limits = self.limits();
        let shown: Vec<String> = labels
            .iter()
            .take(limits.max_labels_per_node)
            .map(|l| truncate_chars(l, limits.max_label_length).to_string())
            .collect();

        buf.extend_from_slice(b"\"labels\":[");
        for (i, label) in shown.iter().enumerate() {
            if i > 0 {
                buf.push(b',');
            }
            write_json(buf, label);
        }
        buf.push(b']');

        if shown.len() < labels.len() {
            buf.extend_from_slice(b",\"labels_truncated\":");
            push_serialized(
                buf,
                &ItemsShown {
                    total_items: labels.len(),
                    shown_items: shown.len(),
                },
            );
            issues.push(EncodingIssue::Truncated {
                reason: "too_many_labels",
                depth: 0,
            });
        }
        shown
    }

    /// `"label":…,"start":…,"end":…`; returns the type as written.
    fn write_relationship_fields(&self, buf: &mut Vec<u8>, rel: &Relationship) -> String {
        let label = truncate_chars(&rel.rel_type, self.limits().max_label_length).to_string();
        buf.extend_from_slice(b"\"label\":");
        write_json(buf, &label);
        buf.extend_from_slice(b",\"start\":");
        push_int(buf, rel.start);
        buf.extend_from_slice(b",\"end\":");
        push_int(buf, rel.end);
        label
    }

    fn write_properties(&mut self, buf: &mut Vec<u8>, properties: &PropertyMap) {
        let mut keys = KeyDeduplicator::new();
        buf.push(b'{');
        for (i, (key, value)) in properties.iter().enumerate() {
            if i > 0 {
                buf.push(b',');
            }
            let key = self.encoder.property_key(&mut keys, key);
            self.encoder.write_key(buf, &key);
            self.encoder.encode(buf, value, SerializationDepth::zero());
        }
        buf.push(b'}');
    }
}

fn push_int(buf: &mut Vec<u8>, n: i64) {
    buf.extend_from_slice(n.to_string().as_bytes());
}

fn push_id_list(buf: &mut Vec<u8>, ids: impl Iterator<Item = i64>) {
    buf.push(b'[');
    for (i, id) in ids.enumerate() {
        if i > 0 {
            buf.push(b',');
        }
        push_int(buf, id);
    }
    buf.push(b']');
}

fn push_serialized<T: Serialize>(buf: &mut Vec<u8>, value: &T) {
    let mark = buf.len();
    if serde_json::to_writer(&mut *buf, value).is_err() {
        buf.truncate(mark);
        buf.extend_from_slice(b"null");
    }
}
