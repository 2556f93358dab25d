//! Row and streaming types for query results.

use std::collections::HashMap;
use std::pin::Pin;

use futures::Stream;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Error;

/// Parameters staged for a Cypher query.
///
/// A map of parameter keys to JSON values. Keys become rows of the
/// staging table; values are read back inside Cypher through the
/// staging functions.
pub type Params = HashMap<String, JsonValue>;

/// A stream of rows from a query result.
///
/// Uses `futures::Stream` for memory-efficient iteration over large result
/// sets. Rows are fetched on-demand, not loaded all at once.
pub type RowStream<'a> = Pin<Box<dyn Stream<Item = Result<Row, Error>> + Send + 'a>>;

/// Deserializes one JSON value, naming the offending key on failure.
fn decode_json<T: DeserializeOwned>(key: &str, value: &JsonValue) -> Result<T, Error> {
    serde_json::from_value(value.clone())
        .map_err(|e| Error::Internal(format!("failed to deserialize '{}': {}", key, e)))
}

/// Required property lookup on a vertex or edge properties object.
fn property<T: DeserializeOwned>(properties: &JsonValue, key: &str) -> Result<T, Error> {
    match properties.get(key) {
        Some(value) => decode_json(key, value),
        None => Err(Error::Internal(format!("property not found: {}", key))),
    }
}

/// Optional property lookup; absent and null both come back as `None`.
fn property_opt<T: DeserializeOwned>(
    properties: &JsonValue,
    key: &str,
) -> Result<Option<T>, Error> {
    match properties.get(key) {
        Some(value) if !value.is_null() => decode_json(key, value).map(Some),
        _ => Ok(None),
    }
}

// ----------------------------------------------------------------------------
// Graph Types: Vertex, Edge
// ----------------------------------------------------------------------------

/// A graph vertex from a Cypher query result.
///
/// Represents a vertex with its engine-internal id, label, and properties
/// (the `{"id": …, "label": …, "properties": …}` shape AGE produces once
/// the `::vertex` suffix is stripped).
///
/// # Example
///
/// ```ignore
/// let v: Vertex = row.get("v")?;
/// let name: String = v.get("name")?;
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vertex {
    /// Engine-internal graph id (not the application-level id).
    #[serde(alias = "id")]
    pub graph_id: i64,
    /// Vertex label (e.g., "Person").
    pub label: String,
    /// Vertex properties as a JSON object.
    pub properties: JsonValue,
}

impl Vertex {
    /// Gets a property value by name, deserializing to the requested type.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        property(&self.properties, key)
    }

    /// Gets a property value, returning `None` if it doesn't exist.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        property_opt(&self.properties, key)
    }

    /// Returns the raw JSON value for a property.
    pub fn get_raw(&self, key: &str) -> Option<&JsonValue> {
        self.properties.get(key)
    }

    /// Names of all properties on this vertex.
    pub fn property_names(&self) -> impl Iterator<Item = &str> {
        self.properties
            .as_object()
            .into_iter()
            .flat_map(|object| object.keys())
            .map(String::as_str)
    }
}

/// A graph edge from a Cypher query result.
///
/// Represents a directed edge between two vertices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Edge {
    /// Engine-internal graph id.
    #[serde(alias = "id")]
    pub graph_id: i64,
    /// Edge label (e.g., "KNOWS").
    pub label: String,
    /// Start vertex's internal id.
    pub start_id: i64,
    /// End vertex's internal id.
    pub end_id: i64,
    /// Edge properties.
    pub properties: JsonValue,
}

impl Edge {
    /// Gets a property value by name.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        property(&self.properties, key)
    }

    /// Gets a property value, returning `None` if it doesn't exist.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        property_opt(&self.properties, key)
    }
}

/// A single row from a query result.
///
/// Contains column values as JSON, keyed by the caller's output aliases,
/// with typed extraction via [`Row::get`].
#[derive(Debug, Clone)]
pub struct Row {
    data: HashMap<String, JsonValue>,
}

impl Row {
    /// Creates a new row from a map of column names to values.
    pub fn new(data: HashMap<String, JsonValue>) -> Self {
        Self { data }
    }

    /// Gets a value from the row by column name, deserializing to the
    /// requested type.
    ///
    /// # Errors
    ///
    /// Returns an error if the key is not found or if deserialization fails.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<T, Error> {
        match self.data.get(key) {
            Some(value) => decode_json(key, value),
            None => Err(Error::Internal(format!("column not found: {}", key))),
        }
    }

    /// Gets a value from the row, with absent and null columns both
    /// mapped to `None`.
    ///
    /// Still returns an error if a present value fails to deserialize.
    pub fn get_opt<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, Error> {
        match self.data.get(key) {
            Some(value) if !value.is_null() => decode_json(key, value).map(Some),
            _ => Ok(None),
        }
    }

    /// Returns the raw JSON value for a column, if it exists.
    pub fn get_raw(&self, key: &str) -> Option<&JsonValue> {
        self.data.get(key)
    }

    /// Returns all column names in this row.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// Returns the number of columns in this row.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Consumes the row and returns the underlying data map.
    pub fn into_inner(self) -> HashMap<String, JsonValue> {
        self.data
    }
}

impl FromIterator<(String, JsonValue)> for Row {
    fn from_iter<I: IntoIterator<Item = (String, JsonValue)>>(columns: I) -> Self {
        Self {
            data: columns.into_iter().collect(),
        }
    }
}
