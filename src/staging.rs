//! Parameter staging: the safe path for caller data into Cypher bodies.
//!
//! The engine's `cypher()` function only takes dynamic data as part of its
//! literal body string, so caller values are never interpolated. Instead,
//! every connection owns a staging table `age_params(key, value)` plus a
//! fixed set of server-side functions returning `agtype`; Cypher bodies
//! reference values through those functions and the engine resolves them
//! at execution time.
//!
//! The staging table is a regular table, not `TEMP`: it survives across
//! statements within a session and composes with pooling because the pool
//! truncates it on every release. All key unquoting happens server-side
//! (`trim(both '"' from key::text)`); no client-side string interpolation
//! of user data ever reaches SQL or Cypher.

use serde_json::Value as JsonValue;

use crate::error::Error;
use crate::pool::AgeConnection;
use crate::row::Params;

/// Name of the per-session staging table.
pub const STAGING_TABLE: &str = "age_params";

/// Conventional key prefix for a vertex label's staged rows.
pub const VERTEX_KEY_PREFIX: &str = "vertex:";

/// Conventional key prefix for an edge label's staged rows.
pub const EDGE_KEY_PREFIX: &str = "edge:";

/// Staged key for a vertex label.
pub fn vertex_param_key(label: &str) -> String {
    format!("{}{}", VERTEX_KEY_PREFIX, label)
}

/// Staged key for an edge label.
pub fn edge_param_key(label: &str) -> String {
    format!("{}{}", EDGE_KEY_PREFIX, label)
}

/// Whether `name` is a plain SQL/Cypher identifier.
///
/// Identifiers validated here (schemas, graph names, labels) may be
/// embedded into statement text directly; anything else must arrive
/// through staging or bind parameters.
pub(crate) fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validates an identifier, mapping failure to a CONFIG error.
pub(crate) fn check_identifier(name: &str, what: &str) -> Result<(), Error> {
    if valid_identifier(name) {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "{} '{}' is not a valid identifier",
            what, name
        )))
    }
}

/// DDL for the staging table. Idempotent.
pub(crate) fn staging_table_ddl(schema: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {schema}.{table} (key text PRIMARY KEY, value json)",
        schema = schema,
        table = STAGING_TABLE,
    )
}

/// DDL for the fixed set of staging functions, created once per session.
///
/// `CREATE OR REPLACE` keeps re-initialization idempotent. Each function
/// takes its key as `agtype` (which is how Cypher passes string literals)
/// and unquotes it server-side.
pub(crate) fn staging_functions_ddl(temp_schema: &str, schema: &str) -> String {
    let get_param = format!(
        r#"
CREATE OR REPLACE FUNCTION {ts}.get_param(param_key agtype)
RETURNS agtype
LANGUAGE plpgsql
STABLE
AS $func$
DECLARE
    key_text text;
    stored json;
BEGIN
    key_text := trim(both '"' from param_key::text);
    SELECT p.value INTO stored FROM {sch}.{table} p WHERE p.key = key_text;
    IF stored IS NULL THEN
        RETURN 'null'::agtype;
    END IF;
    RETURN stored::text::agtype;
END;
$func$;
"#,
        ts = temp_schema,
        sch = schema,
        table = STAGING_TABLE,
    );

    let get_param_array = format!(
        r#"
CREATE OR REPLACE FUNCTION {ts}.get_param_array(param_key agtype)
RETURNS SETOF agtype
LANGUAGE plpgsql
STABLE
AS $func$
DECLARE
    key_text text;
BEGIN
    key_text := trim(both '"' from param_key::text);
    RETURN QUERY
    SELECT elem::text::agtype
    FROM {sch}.{table} p,
         json_array_elements(p.value) AS elem
    WHERE p.key = key_text;
END;
$func$;
"#,
        ts = temp_schema,
        sch = schema,
        table = STAGING_TABLE,
    );

    let get_vertices = format!(
        r#"
CREATE OR REPLACE FUNCTION {ts}.get_vertices(label_name agtype)
RETURNS SETOF agtype
LANGUAGE plpgsql
STABLE
AS $func$
DECLARE
    key_text text;
BEGIN
    key_text := '{vprefix}' || trim(both '"' from label_name::text);
    RETURN QUERY
    SELECT elem::text::agtype
    FROM {sch}.{table} p,
         json_array_elements(p.value) AS elem
    WHERE p.key = key_text;
END;
$func$;
"#,
        ts = temp_schema,
        sch = schema,
        table = STAGING_TABLE,
        vprefix = VERTEX_KEY_PREFIX,
    );

    let get_edges = format!(
        r#"
CREATE OR REPLACE FUNCTION {ts}.get_edges(label_name agtype)
RETURNS SETOF agtype
LANGUAGE plpgsql
STABLE
AS $func$
DECLARE
    key_text text;
BEGIN
    key_text := '{eprefix}' || trim(both '"' from label_name::text);
    RETURN QUERY
    SELECT elem::text::agtype
    FROM {sch}.{table} p,
         json_array_elements(p.value) AS elem
    WHERE p.key = key_text;
END;
$func$;
"#,
        ts = temp_schema,
        sch = schema,
        table = STAGING_TABLE,
        eprefix = EDGE_KEY_PREFIX,
    );

    format!(
        "{}{}{}{}",
        get_param, get_param_array, get_vertices, get_edges
    )
}

/// Full session-init batch: load the extension, set the search path,
/// create the staging schema, table, and functions. Idempotent; running
/// it twice leaves the same objects and an empty staging table.
pub(crate) fn session_init_batch(search_path: &str, schema: &str, temp_schema: &str) -> String {
    format!(
        "LOAD 'age';\nSET search_path = {search_path};\nCREATE SCHEMA IF NOT EXISTS {ts};\n{table};\n{functions}",
        search_path = search_path,
        ts = temp_schema,
        table = staging_table_ddl(schema),
        functions = staging_functions_ddl(temp_schema, schema),
    )
}

/// SQL to reset the staging table; run by the pool on every release.
pub(crate) fn clear_params_sql(schema: &str) -> String {
    format!("TRUNCATE {}.{}", schema, STAGING_TABLE)
}

impl AgeConnection {
    /// Upserts a single staged parameter on this connection.
    ///
    /// The value is visible to staging functions only on this connection,
    /// and only until the connection is released back to the pool.
    pub async fn set_param(&self, key: &str, value: &JsonValue) -> Result<(), Error> {
        let sql = format!(
            "INSERT INTO {}.{} (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value",
            self.settings().schema,
            STAGING_TABLE,
        );
        self.raw_sql(&sql, &[&key, value])
            .await
            .map_err(|e| Error::ParamStaging(format!("failed to stage key '{}': {}", key, e)))?;
        Ok(())
    }

    /// Upserts every entry of `params`.
    pub async fn set_params(&self, params: &Params) -> Result<(), Error> {
        for (key, value) in params {
            self.set_param(key, value).await?;
        }
        Ok(())
    }

    /// Reads a staged parameter back, client-side. Returns `None` when the
    /// key has not been staged on this connection.
    pub async fn get_param(&self, key: &str) -> Result<Option<JsonValue>, Error> {
        let sql = format!(
            "SELECT value FROM {}.{} WHERE key = $1",
            self.settings().schema,
            STAGING_TABLE,
        );
        let rows = self.raw_sql(&sql, &[&key]).await?;
        match rows.first() {
            Some(row) => {
                let value: JsonValue = row.try_get(0).map_err(|e| {
                    Error::ParamStaging(format!("failed to decode staged key '{}': {}", key, e))
                })?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Truncates the staging table. The pool calls this on release; callers
    /// may also invoke it to drop staged data early.
    pub async fn clear_params(&self) -> Result<(), Error> {
        let sql = clear_params_sql(&self.settings().schema);
        self.raw_sql(&sql, &[]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifier() {
        assert!(valid_identifier("age_client"));
        assert!(valid_identifier("Person"));
        assert!(valid_identifier("_private"));
        assert!(valid_identifier("p2"));

        assert!(!valid_identifier(""));
        assert!(!valid_identifier("2fast"));
        assert!(!valid_identifier("bad-name"));
        assert!(!valid_identifier("x; DROP TABLE age_params"));
        assert!(!valid_identifier("spa ce"));
    }

    #[test]
    fn test_param_keys() {
        assert_eq!(vertex_param_key("Person"), "vertex:Person");
        assert_eq!(edge_param_key("KNOWS"), "edge:KNOWS");
    }

    #[test]
    fn test_staging_table_ddl() {
        let ddl = staging_table_ddl("public");
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS public.age_params (key text PRIMARY KEY, value json)"
        );
    }

    #[test]
    fn test_staging_functions_are_idempotent_and_qualified() {
        let ddl = staging_functions_ddl("age_client", "public");
        // One CREATE OR REPLACE per function
        assert_eq!(ddl.matches("CREATE OR REPLACE FUNCTION").count(), 4);
        assert!(ddl.contains("age_client.get_param(param_key agtype)"));
        assert!(ddl.contains("age_client.get_param_array(param_key agtype)"));
        assert!(ddl.contains("age_client.get_vertices(label_name agtype)"));
        assert!(ddl.contains("age_client.get_edges(label_name agtype)"));
        // All reads hit the configured staging table
        assert!(ddl.contains("public.age_params"));
        // Key unquoting is server-side
        assert!(ddl.contains(r#"trim(both '"' from param_key::text)"#));
        // Loader key conventions
        assert!(ddl.contains("'vertex:' ||"));
        assert!(ddl.contains("'edge:' ||"));
    }

    #[test]
    fn test_session_init_batch_order() {
        let batch = session_init_batch("ag_catalog, public", "public", "age_client");
        let load = batch.find("LOAD 'age'").unwrap();
        let path = batch.find("SET search_path = ag_catalog, public").unwrap();
        let schema = batch.find("CREATE SCHEMA IF NOT EXISTS age_client").unwrap();
        let table = batch.find("CREATE TABLE IF NOT EXISTS").unwrap();
        let func = batch.find("CREATE OR REPLACE FUNCTION").unwrap();
        assert!(load < path && path < schema && schema < table && table < func);
    }
}
