//! Row validation against a declared schema.
//!
//! The validator reports every violation in a single pass, keyed by row
//! index, so the loader can decide to fail fast or drop offending rows.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::Serialize;
use serde_json::Value as JsonValue;

use super::{EdgeSpec, PropertyDef, PropertyKind, VertexSpec};

/// Machine-readable violation categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationCode {
    /// Row is not a JSON object.
    NotAnObject,
    /// A required property is absent or null.
    MissingRequired,
    /// Value does not conform to the declared kind.
    WrongKind,
    /// Numeric value outside min/max.
    OutOfRange,
    /// Value not in the declared enumeration.
    NotInEnum,
    /// String does not match the declared pattern.
    PatternMismatch,
    /// String does not satisfy the declared format.
    BadFormat,
    /// Edge row lacks a usable `from` or `to` endpoint id.
    MissingEndpointField,
    /// Property not declared in the schema. Warning, not error.
    UnknownProperty,
}

/// One rule violation on one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub row_index: usize,
    pub property: Option<String>,
    pub code: ViolationCode,
    pub message: String,
}

/// Everything the validator found for one label's rows.
#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub errors: Vec<Violation>,
    pub warnings: Vec<Violation>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Indices of rows with at least one error, ascending.
    pub fn offending_rows(&self) -> BTreeSet<usize> {
        self.errors.iter().map(|v| v.row_index).collect()
    }

    fn error(&mut self, row_index: usize, property: Option<&str>, code: ViolationCode, message: String) {
        self.errors.push(Violation {
            row_index,
            property: property.map(str::to_string),
            code,
            message,
        });
    }

    fn warn(&mut self, row_index: usize, property: &str, message: String) {
        self.warnings.push(Violation {
            row_index,
            property: Some(property.to_string()),
            code: ViolationCode::UnknownProperty,
            message,
        });
    }
}

/// Validates vertex rows against their spec. Reports all violations.
pub fn validate_vertex_rows(spec: &VertexSpec, rows: &[JsonValue]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut patterns = PatternCache::default();

    for (row_index, row) in rows.iter().enumerate() {
        let Some(object) = row.as_object() else {
            report.error(
                row_index,
                None,
                ViolationCode::NotAnObject,
                "vertex row must be a JSON object".into(),
            );
            continue;
        };
        validate_object(
            &spec.properties,
            &spec.required,
            object,
            row_index,
            &mut report,
            &mut patterns,
        );
    }

    report
}

/// Validates edge rows: endpoint ids plus declared properties.
///
/// An edge row is `{"from": …, "to": …, "properties": {…}}`; the ids are
/// the caller-chosen external ids of the endpoint vertices.
pub fn validate_edge_rows(spec: &EdgeSpec, rows: &[JsonValue]) -> ValidationReport {
    let mut report = ValidationReport::default();
    let mut patterns = PatternCache::default();

    for (row_index, row) in rows.iter().enumerate() {
        let Some(object) = row.as_object() else {
            report.error(
                row_index,
                None,
                ViolationCode::NotAnObject,
                "edge row must be a JSON object".into(),
            );
            continue;
        };

        for endpoint in ["from", "to"] {
            match object.get(endpoint) {
                Some(v) if v.is_string() || v.is_number() => {}
                Some(_) => report.error(
                    row_index,
                    Some(endpoint),
                    ViolationCode::MissingEndpointField,
                    format!("'{}' must be a string or number id", endpoint),
                ),
                None => report.error(
                    row_index,
                    Some(endpoint),
                    ViolationCode::MissingEndpointField,
                    format!("edge row is missing '{}'", endpoint),
                ),
            }
        }

        match object.get("properties") {
            None | Some(JsonValue::Null) => {
                // Properties are optional; required properties then fail below
                let empty = serde_json::Map::new();
                validate_object(
                    &spec.properties,
                    &spec.required,
                    &empty,
                    row_index,
                    &mut report,
                    &mut patterns,
                );
            }
            Some(JsonValue::Object(props)) => {
                validate_object(
                    &spec.properties,
                    &spec.required,
                    props,
                    row_index,
                    &mut report,
                    &mut patterns,
                );
            }
            Some(_) => report.error(
                row_index,
                Some("properties"),
                ViolationCode::NotAnObject,
                "edge 'properties' must be a JSON object".into(),
            ),
        }
    }

    report
}

#[derive(Default)]
struct PatternCache {
    compiled: HashMap<String, Regex>,
}

impl PatternCache {
    /// Patterns were compiled once during schema check; failures here
    /// only happen for schemas built without [`GraphSchema::check`].
    fn matches(&mut self, pattern: &str, value: &str) -> Option<bool> {
        if !self.compiled.contains_key(pattern) {
            let regex = Regex::new(pattern).ok()?;
            self.compiled.insert(pattern.to_string(), regex);
        }
        self.compiled.get(pattern).map(|r| r.is_match(value))
    }
}

fn validate_object(
    properties: &indexmap::IndexMap<String, PropertyDef>,
    required: &[String],
    object: &serde_json::Map<String, JsonValue>,
    row_index: usize,
    report: &mut ValidationReport,
    patterns: &mut PatternCache,
) {
    for name in required {
        match object.get(name) {
            None | Some(JsonValue::Null) => report.error(
                row_index,
                Some(name),
                ViolationCode::MissingRequired,
                format!("required property '{}' is missing or null", name),
            ),
            Some(_) => {}
        }
    }

    for (name, value) in object {
        let Some(def) = properties.get(name) else {
            // The engine stores undeclared properties; surface as warning
            report.warn(
                row_index,
                name,
                format!("property '{}' is not declared in the schema", name),
            );
            continue;
        };

        if value.is_null() {
            // Nullness of required properties was handled above
            continue;
        }

        if !kind_matches(def.kind, value) {
            report.error(
                row_index,
                Some(name),
                ViolationCode::WrongKind,
                format!(
                    "property '{}' expected kind {:?}, got {}",
                    name,
                    def.kind,
                    json_type_name(value)
                ),
            );
            continue;
        }

        check_constraints(def, name, value, row_index, report, patterns);
    }
}

/// Kind conformance. Numeric kinds accept integers; dates accept
/// ISO-8601 strings.
fn kind_matches(kind: PropertyKind, value: &JsonValue) -> bool {
    match kind {
        PropertyKind::String => value.is_string(),
        PropertyKind::Integer => value.is_i64() || value.is_u64(),
        PropertyKind::Number => value.is_number(),
        PropertyKind::Boolean => value.is_boolean(),
        PropertyKind::Date => value.as_str().map(is_iso8601).unwrap_or(false),
        PropertyKind::Object => value.is_object(),
        PropertyKind::Array => value.is_array(),
    }
}

fn is_iso8601(text: &str) -> bool {
    DateTime::parse_from_rfc3339(text).is_ok()
        || NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
        || NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
}

fn check_constraints(
    def: &PropertyDef,
    name: &str,
    value: &JsonValue,
    row_index: usize,
    report: &mut ValidationReport,
    patterns: &mut PatternCache,
) {
    let constraints = &def.constraints;

    if let Some(number) = value.as_f64() {
        if let Some(min) = constraints.min {
            if number < min {
                report.error(
                    row_index,
                    Some(name),
                    ViolationCode::OutOfRange,
                    format!("property '{}' value {} is below minimum {}", name, number, min),
                );
            }
        }
        if let Some(max) = constraints.max {
            if number > max {
                report.error(
                    row_index,
                    Some(name),
                    ViolationCode::OutOfRange,
                    format!("property '{}' value {} exceeds maximum {}", name, number, max),
                );
            }
        }
    }

    if let Some(allowed) = &constraints.one_of {
        if !allowed.contains(value) {
            report.error(
                row_index,
                Some(name),
                ViolationCode::NotInEnum,
                format!("property '{}' value is not in the declared enumeration", name),
            );
        }
    }

    if let Some(text) = value.as_str() {
        if let Some(pattern) = &constraints.pattern {
            if patterns.matches(pattern, text) == Some(false) {
                report.error(
                    row_index,
                    Some(name),
                    ViolationCode::PatternMismatch,
                    format!("property '{}' does not match pattern '{}'", name, pattern),
                );
            }
        }

        if let Some(format) = &constraints.format {
            if !format_matches(format, text) {
                report.error(
                    row_index,
                    Some(name),
                    ViolationCode::BadFormat,
                    format!("property '{}' is not a valid {}", name, format),
                );
            }
        }
    }
}

fn format_matches(format: &str, text: &str) -> bool {
    match format {
        "date" => NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok(),
        "date-time" => DateTime::parse_from_rfc3339(text).is_ok(),
        "email" => {
            static EMAIL: once_cell::sync::Lazy<Regex> = once_cell::sync::Lazy::new(|| {
                Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static regex")
            });
            EMAIL.is_match(text)
        }
        "uri" => text.contains("://"),
        // Unknown formats are not enforced
        _ => true,
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}
