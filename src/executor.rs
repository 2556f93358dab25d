//! Statement execution: relational SQL with bind parameters, and Cypher
//! through the engine's `cypher()` function with a literal body.
//!
//! The engine does not accept bind parameters in the Cypher body
//! position, so dynamic values never appear in the body: they are staged
//! on the same connection first (see [`crate::staging`]) and the body
//! references them through the staging functions. The only text ever
//! interpolated into a statement is identifiers validated against
//! `[A-Za-z_][A-Za-z0-9_]*` and the caller's Cypher source itself.

use std::error::Error as StdError;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tokio_postgres::types::{FromSql, ToSql, Type};
use tokio_postgres::NoTls;
use tokio_util::sync::CancellationToken;

use crate::cypher::{extract_return_columns, ParseError};
use crate::error::{CypherErrorClass, Error};
use crate::pool::AgeConnection;
use crate::row::{Params, Row, RowStream};
use crate::staging::check_identifier;

/// Per-statement execution options.
#[derive(Debug, Clone, Default)]
pub struct StatementOptions {
    /// Overrides the pool's default statement timeout.
    pub timeout: Option<Duration>,
    /// Cooperative cancellation; firing aborts the running statement via
    /// the driver's cancel path and surfaces [`Error::Cancelled`].
    pub cancellation: Option<CancellationToken>,
}

impl StatementOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..Self::default()
        }
    }

    pub fn with_cancellation(token: CancellationToken) -> Self {
        Self {
            cancellation: Some(token),
            ..Self::default()
        }
    }
}

/// Result of a relational statement.
#[derive(Debug, Clone)]
pub struct SqlResult {
    pub rows: Vec<Row>,
    /// Leading command word of the statement (SELECT, INSERT, …).
    pub command: String,
    pub row_count: usize,
}

/// Result of a Cypher statement.
#[derive(Debug, Clone)]
pub struct CypherResult {
    /// Records keyed by the caller's output aliases.
    pub rows: Vec<Row>,
    pub command: String,
    pub row_count: usize,
}

/// What kind of statement is running, for error mapping.
enum StatementKind<'a> {
    Sql,
    Cypher { graph: &'a str, body: &'a str },
}

impl AgeConnection {
    /// Runs a relational statement with ordinary bind parameters.
    pub async fn execute_sql(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        opts: &StatementOptions,
    ) -> Result<SqlResult, Error> {
        let rows = self
            .run_with_retry(sql, params, opts, StatementKind::Sql)
            .await?;
        Ok(SqlResult {
            command: command_word(sql),
            row_count: rows.len(),
            rows: rows.iter().map(parse_pg_row).collect(),
        })
    }

    /// Runs a Cypher statement against `graph`.
    ///
    /// Every entry of `params` is staged on this connection first, so the
    /// body can reference it through the staging functions. The SQL
    /// column list is derived from the RETURN clause; write-only bodies
    /// get a placeholder column.
    pub async fn execute_cypher(
        &self,
        graph: &str,
        cypher: &str,
        params: &Params,
        opts: &StatementOptions,
    ) -> Result<CypherResult, Error> {
        let columns = derive_columns(cypher, graph)?;
        self.execute_cypher_with_columns(graph, cypher, &columns, params, opts)
            .await
    }

    /// Like [`execute_cypher`](Self::execute_cypher), with the output
    /// column list supplied by the caller instead of derived. Used by the
    /// loader and the query builder, which know their RETURN items.
    pub async fn execute_cypher_with_columns(
        &self,
        graph: &str,
        cypher: &str,
        columns: &[String],
        params: &Params,
        opts: &StatementOptions,
    ) -> Result<CypherResult, Error> {
        check_identifier(graph, "graph name")?;
        self.set_params(params).await?;

        let sql = build_cypher_statement(graph, cypher, columns);
        let rows = self
            .run_with_retry(&sql, &[], opts, StatementKind::Cypher { graph, body: cypher })
            .await?;

        Ok(CypherResult {
            command: "cypher".to_string(),
            row_count: rows.len(),
            rows: rows.iter().map(parse_pg_row).collect(),
        })
    }

    /// Streams a Cypher result instead of materializing it. Rows are
    /// fetched on demand; the stream borrows this connection.
    pub async fn stream_cypher(
        &self,
        graph: &str,
        cypher: &str,
        params: &Params,
    ) -> Result<RowStream<'_>, Error> {
        use futures::TryStreamExt;

        check_identifier(graph, "graph name")?;
        self.set_params(params).await?;

        let columns = derive_columns(cypher, graph)?;
        let sql = build_cypher_statement(graph, cypher, &columns);

        self.session().begin_statement(&sql)?;
        let stream = self
            .client()
            .query_raw::<_, &str, _>(&sql, std::iter::empty())
            .await
            .map_err(|e| {
                self.session().finish_statement(false);
                Error::from_cypher(e, cypher, graph)
            })?;
        self.session().finish_statement(true);

        let graph = graph.to_string();
        let cypher = cypher.to_string();
        Ok(Box::pin(stream.map_ok(|row| parse_pg_row(&row)).map_err(
            move |e| Error::from_cypher(e, &cypher, &graph),
        )))
    }

    /// Bare statement runner for internal use (staging upserts, DDL).
    pub(crate) async fn raw_sql(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<tokio_postgres::Row>, Error> {
        self.run_statement(sql, params, &StatementOptions::default(), &StatementKind::Sql)
            .await
    }

    /// Retries transient statement failures (serialization failure,
    /// deadlock victim) per the configured policy. Connection-class
    /// failures are not retried here: the session is broken and recovery
    /// belongs to the pool. Inside a transaction nothing is retried.
    async fn run_with_retry(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        opts: &StatementOptions,
        kind: StatementKind<'_>,
    ) -> Result<Vec<tokio_postgres::Row>, Error> {
        let retry = &self.settings().retry;
        let max_attempts = if self.session().in_transaction() {
            1
        } else {
            retry.max_attempts
        };

        let mut attempt = 1;
        loop {
            match self.run_statement(sql, params, opts, &kind).await {
                Err(err)
                    if err.is_transient()
                        && !matches!(err, Error::Connection { .. })
                        && attempt < max_attempts =>
                {
                    let delay = retry.jittered_delay(attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "transient statement failure, retrying: {}",
                        err
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    /// One statement execution with state tracking, timeout, and
    /// cancellation.
    async fn run_statement(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        opts: &StatementOptions,
        kind: &StatementKind<'_>,
    ) -> Result<Vec<tokio_postgres::Row>, Error> {
        if let Some(token) = &opts.cancellation {
            if token.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        self.session().begin_statement(sql)?;

        let timeout = opts.timeout.or(self.settings().statement_timeout);
        let result = self.drive(sql, params, timeout, opts.cancellation.as_ref()).await;

        match result {
            Ok(rows) => {
                self.session().finish_statement(true);
                Ok(rows)
            }
            Err(DriveError::Db(err)) => {
                let mapped = match kind {
                    StatementKind::Sql => Error::from_sql(err, sql),
                    StatementKind::Cypher { graph, body } => Error::from_cypher(err, body, graph),
                };
                // Server-reported statement errors leave the session
                // usable; connection-class failures do not.
                let broken = matches!(mapped, Error::Connection { .. });
                self.session().finish_statement(!broken);
                if self.session().in_transaction() {
                    self.session().set_txn_aborted();
                }
                Err(mapped)
            }
            Err(DriveError::Timeout(dur)) => {
                // The statement may still be running server-side even
                // after the cancel request; the session state is unknown.
                self.session().finish_statement(false);
                Err(Error::Statement {
                    message: format!("statement timed out after {} ms", dur.as_millis()),
                    statement: sql.chars().take(512).collect(),
                    code: None,
                })
            }
            Err(DriveError::Cancelled) => {
                self.session().finish_statement(false);
                Err(Error::Cancelled)
            }
        }
    }

    /// Drives the query future against the timeout and cancellation
    /// signal, issuing an engine-level cancel when either fires.
    async fn drive(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        timeout: Option<Duration>,
        cancellation: Option<&CancellationToken>,
    ) -> Result<Vec<tokio_postgres::Row>, DriveError> {
        let cancel_handle = self.client().cancel_token();
        let query = async {
            match timeout {
                Some(dur) => match tokio::time::timeout(dur, self.client().query(sql, params)).await
                {
                    Ok(res) => res.map_err(DriveError::Db),
                    Err(_) => Err(DriveError::Timeout(dur)),
                },
                None => self.client().query(sql, params).await.map_err(DriveError::Db),
            }
        };

        let outcome = match cancellation {
            Some(token) => {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(DriveError::Cancelled),
                    res = query => res,
                }
            }
            None => query.await,
        };

        if matches!(outcome, Err(DriveError::Cancelled) | Err(DriveError::Timeout(_))) {
            // Best-effort engine-level abort of the in-flight statement
            if let Err(e) = cancel_handle.cancel_query(NoTls).await {
                tracing::debug!("cancel request failed: {}", e);
            }
        }
        outcome
    }
}

enum DriveError {
    Db(tokio_postgres::Error),
    Timeout(Duration),
    Cancelled,
}

/// Derives the SQL column list from the Cypher body. Write-only bodies
/// (no RETURN) use a placeholder column; the query returns no rows.
fn derive_columns(cypher: &str, graph: &str) -> Result<Vec<String>, Error> {
    match extract_return_columns(cypher) {
        Ok(columns) => Ok(columns),
        Err(ParseError::NoReturnClause) => Ok(vec!["result".to_string()]),
        Err(err @ ParseError::ReturnStarNotSupported)
        | Err(err @ ParseError::InvalidSyntax(_)) => Err(Error::Cypher {
            message: err.to_string(),
            query: cypher.to_string(),
            graph: graph.to_string(),
            class: CypherErrorClass::Syntax,
            code: None,
        }),
    }
}

/// Builds the `SELECT * FROM cypher(…)` wrapper with a literal body.
///
/// Column names are always quoted so reserved words (e.g. `count`) and
/// expression texts survive as column names. The dollar-quote tag is
/// chosen to not collide with the body.
pub(crate) fn build_cypher_statement(graph: &str, body: &str, columns: &[String]) -> String {
    let column_defs: Vec<String> = columns
        .iter()
        .map(|name| format!("\"{}\" agtype", name.replace('"', "\"\"")))
        .collect();

    let tag = dollar_tag(body);
    format!(
        "SELECT * FROM cypher('{graph}', {tag} {body} {tag}) as ({columns})",
        graph = graph,
        tag = tag,
        body = body,
        columns = column_defs.join(", "),
    )
}

/// Picks a dollar-quote tag that does not occur in the body.
fn dollar_tag(body: &str) -> String {
    let mut tag = "$body$".to_string();
    let mut n = 0u32;
    while body.contains(&tag) {
        n += 1;
        tag = format!("$body{}$", n);
    }
    tag
}

fn command_word(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase()
}

/// Translates a driver row into the generic [`Row`] type.
///
/// `agtype` columns go through [`decode_agtype`]; every other column is
/// mapped onto its closest JSON shape. A column that fails to decode
/// becomes JSON null rather than failing the whole row.
pub(crate) fn parse_pg_row(pg_row: &tokio_postgres::Row) -> Row {
    pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            (
                column.name().to_string(),
                column_to_json(pg_row, idx, column.type_()),
            )
        })
        .collect()
}

fn column_to_json(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> JsonValue {
    if AgtypeValue::accepts(ty) {
        return row
            .try_get::<_, AgtypeValue>(idx)
            .map(|v| v.0)
            .unwrap_or(JsonValue::Null);
    }

    let decoded = if *ty == Type::BOOL {
        row.try_get::<_, bool>(idx).ok().map(JsonValue::Bool)
    } else if [Type::INT2, Type::INT4, Type::INT8].contains(ty) {
        read_integer(row, idx, ty).map(|n| JsonValue::Number(n.into()))
    } else if [Type::FLOAT4, Type::FLOAT8].contains(ty) {
        read_float(row, idx, ty)
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
    } else if [Type::JSON, Type::JSONB].contains(ty) {
        row.try_get::<_, JsonValue>(idx).ok()
    } else if [Type::TEXT_ARRAY, Type::VARCHAR_ARRAY].contains(ty) {
        row.try_get::<_, Vec<String>>(idx)
            .ok()
            .map(|items| items.into_iter().map(JsonValue::String).collect())
    } else {
        // TEXT, VARCHAR, NAME, BPCHAR, and anything unrecognized
        row.try_get::<_, String>(idx).ok().map(JsonValue::String)
    };

    decoded.unwrap_or(JsonValue::Null)
}

/// Widens any integer column to i64.
fn read_integer(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Option<i64> {
    if *ty == Type::INT2 {
        row.try_get::<_, i16>(idx).ok().map(i64::from)
    } else if *ty == Type::INT4 {
        row.try_get::<_, i32>(idx).ok().map(i64::from)
    } else {
        row.try_get::<_, i64>(idx).ok()
    }
}

/// Widens any float column to f64.
fn read_float(row: &tokio_postgres::Row, idx: usize, ty: &Type) -> Option<f64> {
    if *ty == Type::FLOAT4 {
        row.try_get::<_, f32>(idx).ok().map(f64::from)
    } else {
        row.try_get::<_, f64>(idx).ok()
    }
}

/// Wrapper for reading agtype values from the wire.
#[derive(Debug)]
struct AgtypeValue(JsonValue);

impl<'a> FromSql<'a> for AgtypeValue {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        decode_agtype(raw).map(AgtypeValue)
    }

    fn accepts(ty: &Type) -> bool {
        // agtype has no fixed OID; recognize it by name
        ty.name() == "agtype"
    }
}

/// Decodes agtype's wire form: a leading version byte, then JSON text.
/// Composite values end in a `::vertex`/`::edge`/`::path` annotation
/// after the JSON, which must come off before parsing.
fn decode_agtype(raw: &[u8]) -> Result<JsonValue, Box<dyn StdError + Sync + Send>> {
    let text = match raw.split_first() {
        None => return Ok(JsonValue::Null),
        Some((&1, rest)) => std::str::from_utf8(rest)?,
        Some(_) => std::str::from_utf8(raw)?,
    };

    let json_text = match text.rsplit_once("::") {
        Some((body, "vertex" | "edge" | "path")) => body,
        _ => text,
    };

    Ok(serde_json::from_str(json_text)?)
}
