//! In-memory representation of the declared graph shape.
//!
//! A [`GraphSchema`] is immutable after construction and cheap to share.
//! Label maps preserve declaration order; the loader processes labels in
//! that order, which keeps loads deterministic.

mod validator;

pub use validator::{
    validate_edge_rows, validate_vertex_rows, ValidationReport, Violation, ViolationCode,
};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::staging::valid_identifier;

/// Primitive kind of a declared property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PropertyKind {
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Object,
    Array,
}

/// Optional value constraints on a property.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Constraints {
    /// Inclusive lower bound for numeric kinds.
    pub min: Option<f64>,
    /// Inclusive upper bound for numeric kinds.
    pub max: Option<f64>,
    /// Closed set of permitted values.
    #[serde(rename = "enum")]
    pub one_of: Option<Vec<JsonValue>>,
    /// Regular expression a string value must match.
    pub pattern: Option<String>,
    /// Named format (`date`, `date-time`, `email`, `uri`).
    pub format: Option<String>,
}

/// A declared property: kind plus constraints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyDef {
    #[serde(rename = "type")]
    pub kind: PropertyKind,
    #[serde(flatten)]
    pub constraints: Constraints,
}

impl PropertyDef {
    pub fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            constraints: Constraints::default(),
        }
    }
}

/// Declared shape of a vertex label.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VertexSpec {
    #[serde(default)]
    pub properties: IndexMap<String, PropertyDef>,
    /// Property names that must be present and non-null in every row.
    #[serde(default)]
    pub required: Vec<String>,
}

/// Declared shape of an edge label, including its endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeSpec {
    #[serde(default)]
    pub properties: IndexMap<String, PropertyDef>,
    #[serde(default)]
    pub required: Vec<String>,
    /// Vertex label at the edge's tail.
    #[serde(alias = "fromVertex")]
    pub from_vertex: String,
    /// Vertex label at the edge's head.
    #[serde(alias = "toVertex")]
    pub to_vertex: String,
}

/// A versioned graph schema: vertex and edge labels in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphSchema {
    pub version: String,
    #[serde(default)]
    pub vertices: IndexMap<String, VertexSpec>,
    #[serde(default)]
    pub edges: IndexMap<String, EdgeSpec>,
}

impl GraphSchema {
    /// Parses and checks a schema from a JSON document.
    pub fn from_json(value: JsonValue) -> Result<Self, Error> {
        let schema: GraphSchema = serde_json::from_value(value)
            .map_err(|e| Error::Config(format!("invalid schema document: {}", e)))?;
        schema.check()?;
        Ok(schema)
    }

    /// Parses and checks a schema from JSON text.
    pub fn from_json_str(text: &str) -> Result<Self, Error> {
        let schema: GraphSchema = serde_json::from_str(text)
            .map_err(|e| Error::Config(format!("invalid schema document: {}", e)))?;
        schema.check()?;
        Ok(schema)
    }

    /// Structural invariants: labels are identifiers, edge endpoints
    /// exist, required properties are declared, patterns compile.
    pub fn check(&self) -> Result<(), Error> {
        for (label, spec) in &self.vertices {
            if !valid_identifier(label) {
                return Err(Error::Config(format!(
                    "vertex label '{}' is not a valid identifier",
                    label
                )));
            }
            check_spec_properties(label, &spec.properties, &spec.required)?;
        }

        for (label, spec) in &self.edges {
            if !valid_identifier(label) {
                return Err(Error::Config(format!(
                    "edge label '{}' is not a valid identifier",
                    label
                )));
            }
            check_spec_properties(label, &spec.properties, &spec.required)?;

            if !self.vertices.contains_key(&spec.from_vertex) {
                return Err(Error::Config(format!(
                    "edge '{}' references unknown from-vertex label '{}'",
                    label, spec.from_vertex
                )));
            }
            if !self.vertices.contains_key(&spec.to_vertex) {
                return Err(Error::Config(format!(
                    "edge '{}' references unknown to-vertex label '{}'",
                    label, spec.to_vertex
                )));
            }
        }

        Ok(())
    }

    pub fn vertex(&self, label: &str) -> Option<&VertexSpec> {
        self.vertices.get(label)
    }

    pub fn edge(&self, label: &str) -> Option<&EdgeSpec> {
        self.edges.get(label)
    }

    /// Vertex labels in declaration order.
    pub fn vertex_labels(&self) -> impl Iterator<Item = &str> {
        self.vertices.keys().map(|s| s.as_str())
    }

    /// Edge labels in declaration order.
    pub fn edge_labels(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(|s| s.as_str())
    }
}

fn check_spec_properties(
    label: &str,
    properties: &IndexMap<String, PropertyDef>,
    required: &[String],
) -> Result<(), Error> {
    for name in required {
        if !properties.contains_key(name) {
            return Err(Error::Config(format!(
                "label '{}' requires undeclared property '{}'",
                label, name
            )));
        }
    }

    for (name, def) in properties {
        if let Some(pattern) = &def.constraints.pattern {
            regex::Regex::new(pattern).map_err(|e| {
                Error::Config(format!(
                    "label '{}' property '{}' has invalid pattern: {}",
                    label, name, e
                ))
            })?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn person_knows_schema() -> JsonValue {
        json!({
            "version": "1.0.0",
            "vertices": {
                "Person": {
                    "properties": {
                        "id": {"type": "integer"},
                        "name": {"type": "string"},
                        "age": {"type": "integer", "min": 0}
                    },
                    "required": ["name"]
                },
                "City": {
                    "properties": {"name": {"type": "string"}},
                    "required": ["name"]
                }
            },
            "edges": {
                "KNOWS": {
                    "fromVertex": "Person",
                    "toVertex": "Person",
                    "properties": {"since": {"type": "date"}}
                }
            }
        })
    }

    #[test]
    fn test_parse_preserves_declaration_order() {
        let schema = GraphSchema::from_json(person_knows_schema()).unwrap();
        let labels: Vec<_> = schema.vertex_labels().collect();
        assert_eq!(labels, vec!["Person", "City"]);
        assert_eq!(schema.version, "1.0.0");
    }

    #[test]
    fn test_edge_endpoints_resolved() {
        let schema = GraphSchema::from_json(person_knows_schema()).unwrap();
        let knows = schema.edge("KNOWS").unwrap();
        assert_eq!(knows.from_vertex, "Person");
        assert_eq!(knows.to_vertex, "Person");
    }

    #[test]
    fn test_unknown_endpoint_rejected() {
        let doc = json!({
            "version": "1",
            "vertices": {"Person": {}},
            "edges": {
                "LIVES_IN": {"fromVertex": "Person", "toVertex": "City"}
            }
        });
        let err = GraphSchema::from_json(doc).unwrap_err();
        assert!(err.to_string().contains("unknown to-vertex label 'City'"));
    }

    #[test]
    fn test_required_property_must_be_declared() {
        let doc = json!({
            "version": "1",
            "vertices": {
                "Person": {"required": ["name"]}
            }
        });
        let err = GraphSchema::from_json(doc).unwrap_err();
        assert!(err.to_string().contains("undeclared property 'name'"));
    }

    #[test]
    fn test_bad_label_rejected() {
        let doc = json!({
            "version": "1",
            "vertices": {"Bad Label": {}}
        });
        assert!(GraphSchema::from_json(doc).is_err());
    }

    #[test]
    fn test_bad_pattern_rejected() {
        let doc = json!({
            "version": "1",
            "vertices": {
                "Person": {
                    "properties": {"code": {"type": "string", "pattern": "(unclosed"}}
                }
            }
        });
        assert!(GraphSchema::from_json(doc).is_err());
    }

    #[test]
    fn test_snake_case_endpoint_aliases() {
        let doc = json!({
            "version": "1",
            "vertices": {"Person": {}},
            "edges": {
                "KNOWS": {"from_vertex": "Person", "to_vertex": "Person"}
            }
        });
        assert!(GraphSchema::from_json(doc).is_ok());
    }
}
