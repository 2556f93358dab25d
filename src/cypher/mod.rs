//! Cypher RETURN-clause extraction.
//!
//! Apache AGE requires the SQL column definition list of a `cypher()`
//! call to match the query's RETURN clause. This module extracts the
//! column names so the executor can generate `as ("a" agtype, …)`
//! automatically. For aliased expressions (`expr AS alias`) the alias is
//! used; for unaliased expressions, the expression text.
//!
//! # Example
//!
//! ```ignore
//! let columns = extract_return_columns("MATCH (n) RETURN n.name AS name, n.age")?;
//! assert_eq!(columns, vec!["name", "n.age"]);
//! ```

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;

#[derive(Parser)]
#[grammar = "cypher/return_clause.pest"]
struct ReturnClauseParser;

/// Errors from RETURN-clause extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The query has no RETURN clause (write-only queries).
    NoReturnClause,
    /// `RETURN *` cannot be mapped to a fixed column list.
    ReturnStarNotSupported,
    /// The scanner could not make sense of the query text.
    InvalidSyntax(String),
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::NoReturnClause => write!(f, "query has no RETURN clause"),
            ParseError::ReturnStarNotSupported => {
                write!(f, "RETURN * is not supported - specify columns explicitly")
            }
            ParseError::InvalidSyntax(msg) => write!(f, "cypher scan error: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// Extracts column names from a Cypher query's final RETURN clause.
///
/// Only top-level RETURN clauses count; RETURN-like text inside strings,
/// maps, or bracketed expressions is ignored. With UNION queries the last
/// clause wins, which matches the shape of the rows AGE produces.
pub fn extract_return_columns(query: &str) -> Result<Vec<String>, ParseError> {
    let pairs = ReturnClauseParser::parse(Rule::Cypher, query)
        .map_err(|e| ParseError::InvalidSyntax(e.to_string()))?;

    let mut columns = Vec::new();
    for pair in pairs {
        collect_returns(pair, &mut columns)?;
    }

    if columns.is_empty() {
        return Err(ParseError::NoReturnClause);
    }
    Ok(columns)
}

fn collect_returns(pair: Pair<'_, Rule>, columns: &mut Vec<String>) -> Result<(), ParseError> {
    match pair.as_rule() {
        Rule::Return => {
            // Keep only the final RETURN clause
            columns.clear();
            for inner in pair.into_inner() {
                if inner.as_rule() == Rule::ProjectionItems {
                    for item in inner.into_inner() {
                        match item.as_rule() {
                            Rule::Star => return Err(ParseError::ReturnStarNotSupported),
                            Rule::ProjectionItem => columns.push(column_name(item)),
                            _ => {}
                        }
                    }
                }
            }
            Ok(())
        }
        _ => {
            for inner in pair.into_inner() {
                collect_returns(inner, columns)?;
            }
            Ok(())
        }
    }
}

/// For `Expression AS Alias`, returns the alias; otherwise the expression
/// text as written.
fn column_name(item: Pair<'_, Rule>) -> String {
    let full_text = item.as_str().trim().to_string();
    let mut expression = None;
    let mut alias = None;

    for inner in item.into_inner() {
        match inner.as_rule() {
            Rule::Expression => expression = Some(inner.as_str().trim().to_string()),
            Rule::Alias => alias = Some(inner.as_str().trim_matches('`').to_string()),
            _ => {}
        }
    }

    alias.or(expression).unwrap_or(full_text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_variable() {
        let cols = extract_return_columns("MATCH (n) RETURN n").unwrap();
        assert_eq!(cols, vec!["n"]);
    }

    #[test]
    fn test_multiple_with_alias() {
        let cols = extract_return_columns("MATCH (a)-[r]->(b) RETURN a, r AS rel, b").unwrap();
        assert_eq!(cols, vec!["a", "rel", "b"]);
    }

    #[test]
    fn test_property_access_and_arithmetic() {
        let cols = extract_return_columns("MATCH (n) RETURN n.name, n.age + 10").unwrap();
        assert_eq!(cols, vec!["n.name", "n.age + 10"]);
    }

    #[test]
    fn test_aggregate_with_alias() {
        let cols = extract_return_columns("MATCH (v:Person) RETURN count(v) AS created").unwrap();
        assert_eq!(cols, vec!["created"]);
    }

    #[test]
    fn test_aggregate_without_alias() {
        let cols = extract_return_columns("MATCH (p:Person) RETURN count(p)").unwrap();
        assert_eq!(cols, vec!["count(p)"]);
    }

    #[test]
    fn test_no_return_clause() {
        let err = extract_return_columns("CREATE (n:Test {id: 1})").unwrap_err();
        assert_eq!(err, ParseError::NoReturnClause);
    }

    #[test]
    fn test_delete_no_return() {
        let err = extract_return_columns("MATCH (n:Test) DETACH DELETE n").unwrap_err();
        assert_eq!(err, ParseError::NoReturnClause);
    }

    #[test]
    fn test_return_star_rejected() {
        let err = extract_return_columns("MATCH (n) RETURN *").unwrap_err();
        assert_eq!(err, ParseError::ReturnStarNotSupported);
    }

    #[test]
    fn test_with_clause_not_confused_with_return() {
        let cols =
            extract_return_columns("MATCH (n) WITH n, count(n) AS c RETURN c").unwrap();
        assert_eq!(cols, vec!["c"]);
    }

    #[test]
    fn test_trailing_order_by_and_limit() {
        let cols = extract_return_columns(
            "MATCH (n) RETURN n.name AS name ORDER BY name LIMIT 5",
        )
        .unwrap();
        assert_eq!(cols, vec!["name"]);
    }

    #[test]
    fn test_return_inside_string_ignored() {
        let err =
            extract_return_columns("CREATE (n:Note {text: 'please RETURN this book'})")
                .unwrap_err();
        assert_eq!(err, ParseError::NoReturnClause);
    }

    #[test]
    fn test_commas_inside_function_call() {
        let cols =
            extract_return_columns("MATCH (n) RETURN coalesce(n.a, n.b) AS ab, n.c").unwrap();
        assert_eq!(cols, vec!["ab", "n.c"]);
    }

    #[test]
    fn test_map_projection_commas_ignored() {
        let cols = extract_return_columns("MATCH (n) RETURN {a: n.a, b: n.b} AS m").unwrap();
        assert_eq!(cols, vec!["m"]);
    }

    #[test]
    fn test_last_return_wins() {
        let cols = extract_return_columns(
            "MATCH (a) RETURN a UNION MATCH (b) RETURN b AS a",
        )
        .unwrap();
        assert_eq!(cols, vec!["a"]);
    }

    #[test]
    fn test_distinct_is_skipped() {
        let cols = extract_return_columns("MATCH (n) RETURN DISTINCT n.name").unwrap();
        assert_eq!(cols, vec!["n.name"]);
    }

    #[test]
    fn test_returns_identifier_is_not_a_return() {
        let err = extract_return_columns("MATCH (n:RETURNS) SET n.x = 1").unwrap_err();
        assert_eq!(err, ParseError::NoReturnClause);
    }
}
