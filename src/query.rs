//! Firestore-shaped references, query descriptors and snapshots.
//!
//! Queries are plain values: a collection path plus a list of tagged
//! constraints. Building one never performs I/O; the document layer turns
//! it into a single `POST /firestore/query` call.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

use crate::error::{AdapterError, Result};

// ---------------------------------------------------------------------------
// References
// ---------------------------------------------------------------------------

pub(crate) fn clean_path(path: &str) -> String {
    path.split('/')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Path with each segment percent-encoded, for use in a URL.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionRef {
    path: String,
}

impl CollectionRef {
    pub fn new(path: &str) -> Self {
        Self {
            path: clean_path(path),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Collection id (last path segment).
    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    pub fn doc(&self, id: &str) -> DocumentRef {
        DocumentRef::new(&format!("{}/{}", self.path, id))
    }

    /// Unfiltered query over the whole collection.
    pub fn query(&self) -> Query {
        Query::new(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DocumentRef {
    path: String,
}

impl DocumentRef {
    pub fn new(path: &str) -> Self {
        Self {
            path: clean_path(path),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn id(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// Collection containing this document.
    pub fn parent(&self) -> CollectionRef {
        match self.path.rsplit_once('/') {
            Some((parent, _)) => CollectionRef::new(parent),
            None => CollectionRef::new(""),
        }
    }

    /// Subcollection under this document.
    pub fn collection(&self, id: &str) -> CollectionRef {
        CollectionRef::new(&format!("{}/{}", self.path, id))
    }
}

pub fn collection(path: &str) -> CollectionRef {
    CollectionRef::new(path)
}

pub fn doc(path: &str) -> DocumentRef {
    DocumentRef::new(path)
}

// ---------------------------------------------------------------------------
// Constraints
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WhereOp {
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = "<=")]
    LessThanOrEqual,
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = ">=")]
    GreaterThanOrEqual,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
}

impl WhereOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            WhereOp::Equal => "==",
            WhereOp::NotEqual => "!=",
            WhereOp::LessThan => "<",
            WhereOp::LessThanOrEqual => "<=",
            WhereOp::GreaterThan => ">",
            WhereOp::GreaterThanOrEqual => ">=",
            WhereOp::ArrayContains => "array-contains",
            WhereOp::ArrayContainsAny => "array-contains-any",
            WhereOp::In => "in",
            WhereOp::NotIn => "not-in",
        }
    }
}

impl fmt::Display for WhereOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WhereOp {
    type Err = AdapterError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.trim() {
            "==" => WhereOp::Equal,
            "!=" => WhereOp::NotEqual,
            "<" => WhereOp::LessThan,
            "<=" => WhereOp::LessThanOrEqual,
            ">" => WhereOp::GreaterThan,
            ">=" => WhereOp::GreaterThanOrEqual,
            "array-contains" => WhereOp::ArrayContains,
            "array-contains-any" => WhereOp::ArrayContainsAny,
            "in" => WhereOp::In,
            "not-in" => WhereOp::NotIn,
            other => {
                return Err(AdapterError::InvalidArgument(format!(
                    "unsupported where operator {other:?}"
                )))
            }
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Asc,
    Desc,
}

/// One query constraint, serialised as `{"type": "where" | "orderBy" | "limit", ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum QueryConstraint {
    Where {
        field: String,
        op: WhereOp,
        value: Value,
    },
    OrderBy {
        field: String,
        direction: Direction,
    },
    Limit {
        limit: u32,
    },
}

pub fn where_(field: &str, op: WhereOp, value: impl Into<Value>) -> QueryConstraint {
    QueryConstraint::Where {
        field: field.to_string(),
        op,
        value: value.into(),
    }
}

pub fn order_by(field: &str, direction: Direction) -> QueryConstraint {
    QueryConstraint::OrderBy {
        field: field.to_string(),
        direction,
    }
}

pub fn limit(n: u32) -> QueryConstraint {
    QueryConstraint::Limit { limit: n }
}

// ---------------------------------------------------------------------------
// Query descriptor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Query {
    path: String,
    constraints: Vec<QueryConstraint>,
}

impl Query {
    pub fn new(collection: &CollectionRef) -> Self {
        Self {
            path: collection.path().to_string(),
            constraints: Vec::new(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn constraints(&self) -> &[QueryConstraint] {
        &self.constraints
    }

    /// A new query with `constraint` appended.
    pub fn with(mut self, constraint: QueryConstraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn where_(self, field: &str, op: WhereOp, value: impl Into<Value>) -> Self {
        self.with(where_(field, op, value))
    }

    pub fn order_by(self, field: &str, direction: Direction) -> Self {
        self.with(order_by(field, direction))
    }

    pub fn limit(self, n: u32) -> Self {
        self.with(limit(n))
    }
}

/// Query over `collection` with the given constraints, in order.
pub fn query(
    collection: &CollectionRef,
    constraints: impl IntoIterator<Item = QueryConstraint>,
) -> Query {
    constraints
        .into_iter()
        .fold(Query::new(collection), Query::with)
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// A point-in-time read of one document.
///
/// [`DocumentSnapshot::not_found`] (empty id, empty data) stands for a
/// missing document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSnapshot {
    id: String,
    data: Map<String, Value>,
}

impl DocumentSnapshot {
    pub fn new(id: impl Into<String>, data: Map<String, Value>) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }

    pub fn not_found() -> Self {
        Self::default()
    }

    pub fn exists(&self) -> bool {
        !self.id.is_empty() || !self.data.is_empty()
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.data.get(field)
    }

    pub fn into_data(self) -> Map<String, Value> {
        self.data
    }

    /// Deserialize the document body into `T`.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.data.clone()))
            .map_err(|e| AdapterError::InvalidResponse(format!("document {}: {e}", self.id)))
    }

    /// Parse one `{id, data}` wire object.
    pub(crate) fn from_wire(value: Value) -> Result<Self> {
        #[derive(Deserialize)]
        struct WireDocument {
            #[serde(default)]
            id: Option<String>,
            #[serde(default)]
            data: Option<Value>,
        }

        let wire: WireDocument = serde_json::from_value(value)
            .map_err(|e| AdapterError::InvalidResponse(format!("document: {e}")))?;
        let data = match wire.data {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(other) => {
                return Err(AdapterError::InvalidResponse(format!(
                    "document data must be an object, got {other}"
                )))
            }
        };
        Ok(Self::new(wire.id.unwrap_or_default(), data))
    }
}

/// Result of running a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QuerySnapshot {
    docs: Vec<DocumentSnapshot>,
}

impl QuerySnapshot {
    pub fn new(docs: Vec<DocumentSnapshot>) -> Self {
        Self { docs }
    }

    pub fn docs(&self) -> &[DocumentSnapshot] {
        &self.docs
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DocumentSnapshot> {
        self.docs.iter()
    }

    /// Parse a query response: a JSON array of `{id, data}`, or the same
    /// array under `docs`.
    pub(crate) fn from_wire(value: Value) -> Result<Self> {
        let items = match value {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            Value::Object(mut obj) => match obj.remove("docs") {
                Some(Value::Array(items)) => items,
                _ => {
                    return Err(AdapterError::InvalidResponse(
                        "query response must be an array of documents".into(),
                    ))
                }
            },
            other => {
                return Err(AdapterError::InvalidResponse(format!(
                    "query response must be an array, got {other}"
                )))
            }
        };
        let docs = items
            .into_iter()
            .map(DocumentSnapshot::from_wire)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { docs })
    }
}

impl IntoIterator for QuerySnapshot {
    type Item = DocumentSnapshot;
    type IntoIter = std::vec::IntoIter<DocumentSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.into_iter()
    }
}

impl<'a> IntoIterator for &'a QuerySnapshot {
    type Item = &'a DocumentSnapshot;
    type IntoIter = std::slice::Iter<'a, DocumentSnapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.iter()
    }
}
