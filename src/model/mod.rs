//! Property graph data model
//!
//! Plain data types shared by every stage of an export:
//! - `GraphValue`: the closed set of values a property can hold
//! - `Node`, `Relationship`, `Path`: the graph elements a backend yields
//! - `ForeignValue`: extension point for backend-specific values the
//!   encoder does not know natively
//!
//! Nothing here performs I/O.

mod entity;
mod value;

pub use entity::{ElementKind, GraphElement, Node, Path, PropertyMap, Relationship, SourceRow};
pub use value::{ForeignValue, GraphDuration, GraphValue, Point};
