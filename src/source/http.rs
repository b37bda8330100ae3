//! Neo4j HTTP transactional endpoint
//!
//! Statements are sent to `POST /db/<database>/tx/commit`, one auto-commit
//! transaction per request. Rows are requested in the `row` result format
//! and decoded into the graph model. Server-reported errors are classified
//! by their status code.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use tracing::debug;

use super::{GraphSource, PageCursor, PageRequest, SourceMetadata};
use crate::config::ConnectionConfig;
use crate::error::neo4j::{ErrorInfo, classify};
use crate::error::{ConnectionError, ExportError, QueryError, Result};
use crate::model::{ElementKind, GraphValue, Node, PropertyMap, Relationship, SourceRow};

const NODE_COLUMNS: &str = "id(n), elementId(n), labels(n), properties(n)";
const RELATIONSHIP_COLUMNS: &str =
    "id(r), elementId(r), type(r), id(startNode(r)), id(endNode(r)), properties(r)";

#[derive(Serialize)]
struct TxRequest<'a> {
    statements: Vec<Statement<'a>>,
}

#[derive(Serialize)]
struct Statement<'a> {
    statement: &'a str,
    parameters: JsonValue,
    #[serde(rename = "resultDataContents")]
    result_data_contents: [&'static str; 1],
}

impl<'a> Statement<'a> {
    fn new(statement: &'a str, parameters: JsonValue) -> Self {
        Self {
            statement,
            parameters,
            result_data_contents: ["row"],
        }
    }
}

#[derive(Debug, Deserialize)]
struct TxResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ErrorInfo>,
}

#[derive(Debug, Default, Deserialize)]
struct StatementResult {
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    #[serde(default)]
    row: Vec<JsonValue>,
}

impl TxResponse {
    /// Results of a successful request; the first server error otherwise.
    fn into_results(self) -> Result<Vec<StatementResult>> {
        match self.errors.first() {
            Some(info) => Err(classify(info)),
            None => Ok(self.results),
        }
    }
}

/// Graph source backed by the Neo4j HTTP API
pub struct HttpGraphSource {
    client: reqwest::Client,
    endpoint: String,
    database: String,
    username: Option<String>,
    password: Option<String>,
}

impl HttpGraphSource {
    /// Create a client for the configured endpoint
    ///
    /// # Arguments
    /// * `config` - Endpoint, database, credentials and connect timeout
    ///
    /// # Returns
    /// * `Result<Self>` - New source, or an error for an unusable endpoint
    pub fn new(config: &ConnectionConfig) -> Result<Self> {
        let endpoint = config.endpoint.trim_end_matches('/').to_string();
        if reqwest::Url::parse(&endpoint).is_err() {
            return Err(ConnectionError::InvalidEndpoint(config.endpoint.clone()).into());
        }
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout))
            .build()?;
        Ok(Self {
            client,
            endpoint,
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn commit_url(&self) -> String {
        format!("{}/db/{}/tx/commit", self.endpoint, self.database)
    }

    async fn run(&self, statements: Vec<Statement<'_>>) -> Result<Vec<StatementResult>> {
        let mut request = self
            .client
            .post(self.commit_url())
            .json(&TxRequest { statements });
        if let Some(ref user) = self.username {
            request = request.basic_auth(user, self.password.as_deref());
        }
        let response = request.send().await?.error_for_status()?;
        let body: TxResponse = response.json().await?;
        body.into_results()
    }

    async fn run_one(&self, statement: &str, parameters: JsonValue) -> Result<StatementResult> {
        let mut results = self.run(vec![Statement::new(statement, parameters)]).await?;
        if results.is_empty() {
            return Err(QueryError::InvalidResult("response carried no result".to_string()).into());
        }
        Ok(results.swap_remove(0))
    }
}

#[async_trait]
impl GraphSource for HttpGraphSource {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }

    async fn verify_connectivity(&self) -> Result<()> {
        let result = self
            .run_one("RETURN 1", json!({}))
            .await
            .map_err(|e| match e {
                ExportError::Connection(ConnectionError::ConnectionFailed(msg)) => {
                    ConnectionError::VerificationFailed(msg).into()
                }
                other => other,
            })?;
        debug!("Connectivity verified ({} rows)", result.data.len());
        Ok(())
    }

    async fn count(&self, kind: ElementKind) -> Result<u64> {
        let statement = match kind {
            ElementKind::Relationship => "MATCH ()-[r]->() RETURN count(r)",
            ElementKind::Node | ElementKind::Path => "MATCH (n) RETURN count(n)",
        };
        let result = self.run_one(statement, json!({})).await?;
        result
            .data
            .first()
            .and_then(|row| row.row.first())
            .and_then(JsonValue::as_u64)
            .ok_or_else(|| QueryError::InvalidResult("count returned no number".to_string()).into())
    }

    async fn fetch_page(&self, kind: ElementKind, request: PageRequest) -> Result<Vec<SourceRow>> {
        let statement = page_statement(kind, request.cursor);
        let parameters = match request.cursor {
            PageCursor::Keyset { after } => json!({ "after": after.unwrap_or(-1), "limit": request.limit }),
            PageCursor::Offset { skip } => json!({ "skip": skip, "limit": request.limit }),
        };
        let result = self.run_one(&statement, parameters).await?;
        Ok(result
            .data
            .iter()
            .map(|data| match kind {
                ElementKind::Relationship => decode_relationship(&data.row),
                ElementKind::Node | ElementKind::Path => decode_node(&data.row),
            })
            .collect())
    }

    async fn collect_metadata(&self) -> Result<SourceMetadata> {
        let results = self
            .run(vec![
                Statement::new("CALL db.labels() YIELD label RETURN label", json!({})),
                Statement::new(
                    "CALL db.relationshipTypes() YIELD relationshipType RETURN relationshipType",
                    json!({}),
                ),
                Statement::new("CALL db.propertyKeys() YIELD propertyKey RETURN propertyKey", json!({})),
                Statement::new(
                    "CALL dbms.components() YIELD name, versions, edition RETURN name, versions, edition",
                    json!({}),
                ),
            ])
            .await?;

        let column = |index: usize| -> Vec<String> {
            results
                .get(index)
                .map(|r| {
                    r.data
                        .iter()
                        .filter_map(|d| d.row.first().and_then(JsonValue::as_str))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default()
        };
        let components: Vec<JsonValue> = results
            .get(3)
            .map(|r| {
                r.data
                    .iter()
                    .map(|d| {
                        json!({
                            "name": d.row.first(),
                            "versions": d.row.get(1),
                            "edition": d.row.get(2),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(SourceMetadata {
            labels: column(0),
            relationship_types: column(1),
            property_keys: column(2),
            details: json!({ "backend": "neo4j-http", "components": components }),
        })
    }
}

fn page_statement(kind: ElementKind, cursor: PageCursor) -> String {
    let (pattern, var, columns) = match kind {
        ElementKind::Relationship => ("()-[r]->()", "r", RELATIONSHIP_COLUMNS),
        ElementKind::Node | ElementKind::Path => ("(n)", "n", NODE_COLUMNS),
    };
    match cursor {
        PageCursor::Keyset { .. } => format!(
            "MATCH {pattern} WHERE id({var}) > $after RETURN {columns} ORDER BY id({var}) LIMIT $limit"
        ),
        PageCursor::Offset { .. } => format!(
            "MATCH {pattern} RETURN {columns} ORDER BY id({var}) SKIP $skip LIMIT $limit"
        ),
    }
}

/// JSON as returned by the endpoint, as a graph value.
fn json_to_value(value: &JsonValue) -> GraphValue {
    match value {
        JsonValue::Null => GraphValue::Null,
        JsonValue::Bool(b) => GraphValue::Bool(*b),
        JsonValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                GraphValue::Int64(i)
            } else if let Some(u) = n.as_u64() {
                GraphValue::UInt64(u)
            } else {
                GraphValue::Float64(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        JsonValue::String(s) => GraphValue::String(s.clone()),
        JsonValue::Array(items) => GraphValue::List(items.iter().map(json_to_value).collect()),
        JsonValue::Object(map) => GraphValue::map(map.iter().map(|(k, v)| (k.as_str(), json_to_value(v)))),
    }
}

fn decode_properties(value: Option<&JsonValue>) -> std::result::Result<PropertyMap, String> {
    match value {
        Some(JsonValue::Object(map)) => Ok(map
            .iter()
            .map(|(k, v)| (k.as_str(), json_to_value(v)))
            .collect()),
        Some(JsonValue::Null) | None => Ok(PropertyMap::new()),
        Some(other) => Err(format!("properties are not a map: {other}")),
    }
}

fn unreadable(kind: ElementKind, id: Option<i64>, reason: String) -> SourceRow {
    SourceRow::Unreadable { kind, id, reason }
}

/// `[id, elementId, labels, properties]`
fn decode_node(row: &[JsonValue]) -> SourceRow {
    let Some(id) = row.first().and_then(JsonValue::as_i64) else {
        return unreadable(ElementKind::Node, None, "node row without id".to_string());
    };
    let labels = match row.get(2) {
        Some(JsonValue::Array(items)) => items
            .iter()
            .map(|l| l.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>(),
        _ => None,
    };
    let Some(labels) = labels else {
        return unreadable(ElementKind::Node, Some(id), "labels could not be decoded".to_string());
    };
    match decode_properties(row.get(3)) {
        Ok(properties) => Node {
            id,
            element_id: row.get(1).and_then(JsonValue::as_str).map(str::to_string),
            labels,
            properties,
        }
        .into(),
        Err(reason) => unreadable(ElementKind::Node, Some(id), reason),
    }
}

/// `[id, elementId, type, startId, endId, properties]`
fn decode_relationship(row: &[JsonValue]) -> SourceRow {
    let Some(id) = row.first().and_then(JsonValue::as_i64) else {
        return unreadable(ElementKind::Relationship, None, "relationship row without id".to_string());
    };
    let rel_type = row.get(2).and_then(JsonValue::as_str);
    let start = row.get(3).and_then(JsonValue::as_i64);
    let end = row.get(4).and_then(JsonValue::as_i64);
    let (Some(rel_type), Some(start), Some(end)) = (rel_type, start, end) else {
        return unreadable(
            ElementKind::Relationship,
            Some(id),
            "type or endpoints could not be decoded".to_string(),
        );
    };
    match decode_properties(row.get(5)) {
        Ok(properties) => Relationship {
            id,
            element_id: row.get(1).and_then(JsonValue::as_str).map(str::to_string),
            rel_type: rel_type.to_string(),
            start,
            end,
            properties,
        }
        .into(),
        Err(reason) => unreadable(ElementKind::Relationship, Some(id), reason),
    }
}
