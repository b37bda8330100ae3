//! Graph values

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime};

use super::entity::{Node, Path, Relationship};

/// A value stored in a node or relationship property, or nested inside one.
#[derive(Debug, Clone)]
pub enum GraphValue {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float32(f32),
    Float64(f64),
    Bytes(Vec<u8>),
    String(String),
    Date(NaiveDate),
    LocalTime(NaiveTime),
    /// Time of day with a UTC offset
    Time(NaiveTime, FixedOffset),
    LocalDateTime(NaiveDateTime),
    DateTime(DateTime<FixedOffset>),
    Duration(GraphDuration),
    Point(Point),
    List(Vec<GraphValue>),
    /// Key/value pairs in source order. Keys are arbitrary values and may repeat.
    Map(Vec<(GraphValue, GraphValue)>),
    Node(Box<Node>),
    Relationship(Box<Relationship>),
    Path(Box<Path>),
    Foreign(Arc<dyn ForeignValue>),
}

/// A calendar-aware duration, split the way graph databases store it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GraphDuration {
    pub months: i64,
    pub days: i64,
    pub seconds: i64,
    pub nanos: i32,
}

/// A spatial point in a coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub srid: u32,
    pub x: f64,
    pub y: f64,
    pub z: Option<f64>,
}

/// A backend value outside the closed `GraphValue` set.
///
/// Implementors describe themselves so the encoder can emit a diagnostic
/// object. A value that knows how to express itself as a `GraphValue` can
/// return it from `to_graph_value`; a conversion error is reported in the
/// output instead of aborting the export.
pub trait ForeignValue: fmt::Debug + Send + Sync {
    /// Runtime type name of the value
    fn type_name(&self) -> &str;

    /// Where the type comes from (driver, plugin, module)
    fn origin(&self) -> &str;

    /// Optional conversion into a known value
    fn to_graph_value(&self) -> Option<Result<GraphValue, String>> {
        None
    }
}

impl GraphValue {
    /// Short runtime type name used in sentinels and diagnostics.
    pub fn type_name(&self) -> &str {
        match self {
            GraphValue::Null => "null",
            GraphValue::Bool(_) => "boolean",
            GraphValue::Int8(_) => "int8",
            GraphValue::Int16(_) => "int16",
            GraphValue::Int32(_) => "int32",
            GraphValue::Int64(_) => "int64",
            GraphValue::UInt8(_) => "uint8",
            GraphValue::UInt16(_) => "uint16",
            GraphValue::UInt32(_) => "uint32",
            GraphValue::UInt64(_) => "uint64",
            GraphValue::Float32(_) => "float32",
            GraphValue::Float64(_) => "float64",
            GraphValue::Bytes(_) => "bytes",
            GraphValue::String(_) => "string",
            GraphValue::Date(_) => "date",
            GraphValue::LocalTime(_) => "local_time",
            GraphValue::Time(..) => "time",
            GraphValue::LocalDateTime(_) => "local_datetime",
            GraphValue::DateTime(_) => "datetime",
            GraphValue::Duration(_) => "duration",
            GraphValue::Point(_) => "point",
            GraphValue::List(_) => "list",
            GraphValue::Map(_) => "map",
            GraphValue::Node(_) => "node",
            GraphValue::Relationship(_) => "relationship",
            GraphValue::Path(_) => "path",
            GraphValue::Foreign(v) => v.type_name(),
        }
    }

    /// Whether encoding this value descends one level deeper.
    pub fn is_collection(&self) -> bool {
        matches!(self, GraphValue::List(_) | GraphValue::Map(_))
    }

    /// Build a map value from string keys.
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, GraphValue)>,
    {
        GraphValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (GraphValue::String(k.into()), v))
                .collect(),
        )
    }
}

impl From<&str> for GraphValue {
    fn from(s: &str) -> Self {
        GraphValue::String(s.to_string())
    }
}

impl From<String> for GraphValue {
    fn from(s: String) -> Self {
        GraphValue::String(s)
    }
}

impl From<i64> for GraphValue {
    fn from(n: i64) -> Self {
        GraphValue::Int64(n)
    }
}

impl From<f64> for GraphValue {
    fn from(f: f64) -> Self {
        GraphValue::Float64(f)
    }
}

impl From<bool> for GraphValue {
    fn from(b: bool) -> Self {
        GraphValue::Bool(b)
    }
}

impl From<Vec<GraphValue>> for GraphValue {
    fn from(items: Vec<GraphValue>) -> Self {
        GraphValue::List(items)
    }
}

impl GraphDuration {
    /// ISO-8601 form, e.g. `P14M3DT12.500000000S`.
    pub fn to_iso8601(&self) -> String {
        let mut out = format!("P{}M{}DT", self.months, self.days);
        if self.nanos == 0 {
            out.push_str(&format!("{}S", self.seconds));
        } else {
            // Nanos carry the sign of the whole duration
            let negative = self.seconds < 0 || self.nanos < 0;
            let secs = self.seconds.unsigned_abs();
            let nanos = self.nanos.unsigned_abs();
            let sign = if negative { "-" } else { "" };
            out.push_str(&format!("{sign}{secs}.{nanos:09}S"));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_iso8601() {
        let d = GraphDuration {
            months: 14,
            days: 3,
            seconds: 12,
            nanos: 500_000_000,
        };
        assert_eq!(d.to_iso8601(), "P14M3DT12.500000000S");
        assert_eq!(GraphDuration::default().to_iso8601(), "P0M0DT0S");
    }

    #[test]
    fn test_type_names() {
        assert_eq!(GraphValue::Null.type_name(), "null");
        assert_eq!(GraphValue::from(vec![]).type_name(), "list");
        assert!(GraphValue::map([("a", GraphValue::Null)]).is_collection());
    }
}
