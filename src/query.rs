//! Fluent Cypher query construction over the staging protocol.
//!
//! The builder assembles a literal Cypher body and a map of staged
//! parameters. Dynamic values never enter the body text: each one is
//! recorded under a generated key and the body references it as
//! `<temp_schema>.get_param('<key>')`, resolved by the engine at
//! execution time. Only builder-generated keys and schema-validated
//! identifiers are ever spliced into the source.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::executor::{CypherResult, StatementOptions};
use crate::pool::AgeConnection;
use crate::row::Params;
use crate::staging::valid_identifier;

/// A finished statement: literal body, staged parameters, target graph,
/// and the output column aliases the executor should declare.
#[derive(Debug, Clone)]
pub struct BuiltQuery {
    pub graph_name: String,
    pub cypher: String,
    pub params: Params,
    pub columns: Vec<String>,
}

/// Builder for Cypher queries with staged parameters.
///
/// # Example
///
/// ```ignore
/// let query = client
///     .query("social")
///     .match_("(p:Person)")
///     .where_param("p.name", "=", "Alice")
///     .return_items(&["p.name AS name", "p.age"])
///     .limit(10)
///     .build()?;
///
/// let result = client.execute(&query, &Default::default()).await?;
/// ```
pub struct QueryBuilder {
    graph_name: String,
    temp_schema: String,
    clauses: Vec<String>,
    wheres: Vec<String>,
    return_items: Vec<String>,
    order_by: Vec<String>,
    skip: Option<u64>,
    limit: Option<u64>,
    params: Params,
    next_param: usize,
}

impl QueryBuilder {
    /// Creates a builder targeting `graph_name`, emitting staging
    /// function calls qualified with `temp_schema`.
    pub fn new(graph_name: impl Into<String>, temp_schema: impl Into<String>) -> Self {
        Self {
            graph_name: graph_name.into(),
            temp_schema: temp_schema.into(),
            clauses: Vec::new(),
            wheres: Vec::new(),
            return_items: Vec::new(),
            order_by: Vec::new(),
            skip: None,
            limit: None,
            params: Params::new(),
            next_param: 0,
        }
    }

    /// Appends a MATCH clause. The pattern is source text, not data.
    pub fn match_(mut self, pattern: &str) -> Self {
        self.clauses.push(format!("MATCH {}", pattern));
        self
    }

    /// Appends an OPTIONAL MATCH clause.
    pub fn optional_match(mut self, pattern: &str) -> Self {
        self.clauses.push(format!("OPTIONAL MATCH {}", pattern));
        self
    }

    /// Appends a CREATE clause.
    pub fn create(mut self, pattern: &str) -> Self {
        self.clauses.push(format!("CREATE {}", pattern));
        self
    }

    /// Appends a raw clause (WITH, SET, DELETE, …). Static source text
    /// only; route values through the `*_param` methods.
    pub fn clause(mut self, text: &str) -> Self {
        self.clauses.push(text.to_string());
        self
    }

    /// Stages `values` and appends
    /// `UNWIND <temp_schema>.get_param_array('<key>') AS <alias>`.
    ///
    /// # Panics
    ///
    /// Panics if a value cannot be serialized to JSON.
    pub fn unwind_param<T: Serialize>(mut self, values: &[T], alias: &str) -> Self {
        let array = values
            .iter()
            .map(|v| serde_json::to_value(v).expect("failed to serialize parameter value"))
            .collect();
        let key = self.stage(JsonValue::Array(array));
        self.clauses.push(format!(
            "UNWIND {}.get_param_array('{}') AS {}",
            self.temp_schema, key, alias
        ));
        self
    }

    /// Adds a WHERE condition. Static source text only.
    pub fn where_clause(mut self, condition: &str) -> Self {
        self.wheres.push(condition.to_string());
        self
    }

    /// Stages `value` and adds the condition
    /// `<lhs> <op> <temp_schema>.get_param('<key>')`.
    ///
    /// # Panics
    ///
    /// Panics if the value cannot be serialized to JSON.
    pub fn where_param<T: Serialize>(mut self, lhs: &str, op: &str, value: T) -> Self {
        let json = serde_json::to_value(value).expect("failed to serialize parameter value");
        let key = self.stage(json);
        self.wheres.push(format!(
            "{} {} {}.get_param('{}')",
            lhs, op, self.temp_schema, key
        ));
        self
    }

    /// Stages `value` under a caller-chosen key. `$key` references in the
    /// assembled body are replaced with the staging call at build time.
    ///
    /// # Panics
    ///
    /// Panics if the value cannot be serialized to JSON.
    pub fn with_param<T: Serialize>(mut self, key: &str, value: T) -> Self {
        let json = serde_json::to_value(value).expect("failed to serialize parameter value");
        self.params.insert(key.to_string(), json);
        self
    }

    /// Sets the RETURN items. Aliased items (`expr AS alias`) become
    /// columns named by their alias.
    pub fn return_items(mut self, items: &[&str]) -> Self {
        self.return_items = items.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn order_by(mut self, expr: &str) -> Self {
        self.order_by.push(expr.to_string());
        self
    }

    /// SKIP count. Typed, so it is written as a literal.
    pub fn skip(mut self, count: u64) -> Self {
        self.skip = Some(count);
        self
    }

    /// LIMIT count. Typed, so it is written as a literal.
    pub fn limit(mut self, count: u64) -> Self {
        self.limit = Some(count);
        self
    }

    fn stage(&mut self, value: JsonValue) -> String {
        let key = format!("p{}", self.next_param);
        self.next_param += 1;
        self.params.insert(key.clone(), value);
        key
    }

    /// Assembles the final statement.
    pub fn build(self) -> Result<BuiltQuery, Error> {
        if self.clauses.is_empty() && self.return_items.is_empty() {
            return Err(Error::Config("query has no clauses".into()));
        }

        let mut body = String::new();
        for clause in &self.clauses {
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(clause);
        }

        if !self.wheres.is_empty() {
            body.push_str("\nWHERE ");
            body.push_str(&self.wheres.join(" AND "));
        }

        if !self.return_items.is_empty() {
            body.push_str("\nRETURN ");
            body.push_str(&self.return_items.join(", "));
        }

        if !self.order_by.is_empty() {
            body.push_str("\nORDER BY ");
            body.push_str(&self.order_by.join(", "));
        }

        if let Some(skip) = self.skip {
            body.push_str(&format!("\nSKIP {}", skip));
        }
        if let Some(limit) = self.limit {
            body.push_str(&format!("\nLIMIT {}", limit));
        }

        // Replace $key placeholders for explicitly-named parameters
        for key in self.params.keys() {
            if !valid_identifier(key) {
                return Err(Error::Config(format!(
                    "parameter key '{}' is not a valid identifier",
                    key
                )));
            }
            let placeholder = regex::Regex::new(&format!(r"\${}\b", regex::escape(key)))
                .map_err(|e| Error::Internal(format!("placeholder pattern failed: {}", e)))?;
            let call = format!("{}.get_param('{}')", self.temp_schema, key);
            body = placeholder.replace_all(&body, call.as_str()).into_owned();
        }

        let columns = if self.return_items.is_empty() {
            vec!["result".to_string()]
        } else {
            self.return_items.iter().map(|item| column_alias(item)).collect()
        };

        Ok(BuiltQuery {
            graph_name: self.graph_name,
            cypher: body,
            params: self.params,
            columns,
        })
    }
}

/// Column name for a RETURN item: the alias after ` AS `, or the item
/// text itself.
fn column_alias(item: &str) -> String {
    let lowered = item.to_ascii_lowercase();
    match lowered.rfind(" as ") {
        Some(pos) => item[pos + 4..].trim().to_string(),
        None => item.trim().to_string(),
    }
}

impl AgeConnection {
    /// Executes a built query on this connection: stages its parameters,
    /// then runs the literal body with the declared columns.
    pub async fn execute_built(
        &self,
        query: &BuiltQuery,
        opts: &StatementOptions,
    ) -> Result<CypherResult, Error> {
        self.execute_cypher_with_columns(
            &query.graph_name,
            &query.cypher,
            &query.columns,
            &query.params,
            opts,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_where_param_routes_through_staging() {
        let query = QueryBuilder::new("social", "age_client")
            .match_("(p:Person)")
            .where_param("p.name", "=", "Alice")
            .return_items(&["p"])
            .build()
            .unwrap();

        assert_eq!(
            query.cypher,
            "MATCH (p:Person)\nWHERE p.name = age_client.get_param('p0')\nRETURN p"
        );
        assert_eq!(query.params.get("p0"), Some(&json!("Alice")));
        assert_eq!(query.columns, vec!["p"]);
        // The value itself never appears in the body
        assert!(!query.cypher.contains("Alice"));
    }

    #[test]
    fn test_multiple_params_get_distinct_keys() {
        let query = QueryBuilder::new("social", "age_client")
            .match_("(p:Person)")
            .where_param("p.age", ">", 21)
            .where_param("p.city", "=", "Lisbon")
            .return_items(&["p.name AS name"])
            .build()
            .unwrap();

        assert!(query.cypher.contains("p.age > age_client.get_param('p0')"));
        assert!(query.cypher.contains("AND p.city = age_client.get_param('p1')"));
        assert_eq!(query.params.len(), 2);
        assert_eq!(query.columns, vec!["name"]);
    }

    #[test]
    fn test_with_param_placeholder_substitution() {
        let query = QueryBuilder::new("social", "age_client")
            .match_("(p:Person)")
            .where_clause("p.age > $min_age")
            .with_param("min_age", 21)
            .return_items(&["p"])
            .build()
            .unwrap();

        assert!(query
            .cypher
            .contains("p.age > age_client.get_param('min_age')"));
        assert_eq!(query.params.get("min_age"), Some(&json!(21)));
    }

    #[test]
    fn test_placeholder_respects_word_boundaries() {
        let query = QueryBuilder::new("g", "s")
            .match_("(n)")
            .where_clause("n.a = $x AND n.b = $xy")
            .with_param("x", 1)
            .with_param("xy", 2)
            .return_items(&["n"])
            .build()
            .unwrap();

        assert!(query.cypher.contains("n.a = s.get_param('x')"));
        assert!(query.cypher.contains("n.b = s.get_param('xy')"));
    }

    #[test]
    fn test_unwind_param() {
        let query = QueryBuilder::new("social", "age_client")
            .unwind_param(&[1, 2, 3], "id")
            .match_("(p:Person {id: id})")
            .return_items(&["p"])
            .build()
            .unwrap();

        assert!(query
            .cypher
            .starts_with("UNWIND age_client.get_param_array('p0') AS id"));
        assert_eq!(query.params.get("p0"), Some(&json!([1, 2, 3])));
    }

    #[test]
    fn test_order_skip_limit_are_literals() {
        let query = QueryBuilder::new("social", "age_client")
            .match_("(p:Person)")
            .return_items(&["p.name AS name"])
            .order_by("name")
            .skip(20)
            .limit(10)
            .build()
            .unwrap();

        assert!(query.cypher.ends_with("ORDER BY name\nSKIP 20\nLIMIT 10"));
    }

    #[test]
    fn test_bad_param_key_rejected() {
        let result = QueryBuilder::new("g", "s")
            .match_("(n)")
            .with_param("bad key", 1)
            .return_items(&["n"])
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_builder_rejected() {
        assert!(QueryBuilder::new("g", "s").build().is_err());
    }

    #[test]
    fn test_write_only_query_gets_placeholder_column() {
        let query = QueryBuilder::new("g", "s")
            .create("(n:Person {name: $name})")
            .with_param("name", "Alice")
            .build()
            .unwrap();

        assert_eq!(query.columns, vec!["result"]);
        assert!(query.cypher.contains("CREATE (n:Person {name: s.get_param('name')})"));
    }

    #[test]
    fn test_column_alias_extraction() {
        assert_eq!(column_alias("p.name AS name"), "name");
        assert_eq!(column_alias("count(p) as total"), "total");
        assert_eq!(column_alias("p.age"), "p.age");
    }
}
