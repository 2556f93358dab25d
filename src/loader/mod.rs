//! Batch graph loader: schema-validated, staged, transactional ingestion.
//!
//! A load runs in phases: validation (client-side, before any connection
//! is taken), then vertex storage, then edge storage, inside one
//! transaction. Rows reach the engine through the staging protocol: each
//! label's slice is staged under its conventional key and a single
//! `UNWIND` statement per slice reads it back through the staging
//! functions. Either every row commits or none do.

mod progress;

pub use progress::{
    LoadError, LoadPhase, LoadResult, LoadWarning, ProgressCallback, ProgressEvent,
};

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind};
use crate::executor::{CypherResult, StatementOptions};
use crate::graph::AgeClient;
use crate::pool::{AgeConnection, ReleaseOutcome};
use crate::row::Params;
use crate::schema::{validate_edge_rows, validate_vertex_rows, GraphSchema};
use crate::staging::{check_identifier, edge_param_key, vertex_param_key};

use progress::ProgressReporter;

/// Rows to ingest, grouped by label. Processing order follows the
/// schema's declaration order, not map order.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GraphData {
    #[serde(default)]
    pub vertices: HashMap<String, Vec<JsonValue>>,
    #[serde(default)]
    pub edges: HashMap<String, Vec<JsonValue>>,
}

impl GraphData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vertices(mut self, label: impl Into<String>, rows: Vec<JsonValue>) -> Self {
        self.vertices.insert(label.into(), rows);
        self
    }

    pub fn with_edges(mut self, label: impl Into<String>, rows: Vec<JsonValue>) -> Self {
        self.edges.insert(label.into(), rows);
        self
    }
}

/// Loader knobs; see the crate docs for defaults.
#[derive(Clone)]
pub struct LoadOptions {
    /// Target graph. Must be a plain identifier.
    pub graph_name: String,
    /// Rows staged per `UNWIND` statement.
    pub batch_size: usize,
    /// Validate rows against the schema before loading.
    pub validate_before_load: bool,
    /// Drop offending rows (recorded as warnings) instead of failing.
    pub continue_on_validation_error: bool,
    /// Skip the client-side endpoint existence check; edge endpoints are
    /// asserted to exist in the graph already.
    pub assume_existing_vertices: bool,
    /// Commit per batch slice instead of once per load. Trades atomicity
    /// for throughput.
    pub streaming_transactions: bool,
    pub on_progress: Option<ProgressCallback>,
    pub cancellation: Option<CancellationToken>,
}

impl LoadOptions {
    pub fn new(graph_name: impl Into<String>) -> Self {
        Self {
            graph_name: graph_name.into(),
            batch_size: 1000,
            validate_before_load: true,
            continue_on_validation_error: false,
            assume_existing_vertices: false,
            streaming_transactions: false,
            on_progress: None,
            cancellation: None,
        }
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn continue_on_validation_error(mut self, value: bool) -> Self {
        self.continue_on_validation_error = value;
        self
    }

    pub fn assume_existing_vertices(mut self, value: bool) -> Self {
        self.assume_existing_vertices = value;
        self
    }

    pub fn streaming_transactions(mut self, value: bool) -> Self {
        self.streaming_transactions = value;
        self
    }

    pub fn on_progress(mut self, callback: ProgressCallback) -> Self {
        self.on_progress = Some(callback);
        self
    }

    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }
}

impl std::fmt::Debug for LoadOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadOptions")
            .field("graph_name", &self.graph_name)
            .field("batch_size", &self.batch_size)
            .field("validate_before_load", &self.validate_before_load)
            .field("continue_on_validation_error", &self.continue_on_validation_error)
            .field("assume_existing_vertices", &self.assume_existing_vertices)
            .field("streaming_transactions", &self.streaming_transactions)
            .finish()
    }
}

struct PreparedVertices {
    label: String,
    rows: Vec<JsonValue>,
}

struct PreparedEdges {
    label: String,
    from_vertex: String,
    to_vertex: String,
    rows: Vec<JsonValue>,
}

struct Prepared {
    vertices: Vec<PreparedVertices>,
    edges: Vec<PreparedEdges>,
    total_vertices: u64,
    total_edges: u64,
}

/// Batch loader bound to one client and one schema.
pub struct GraphLoader<'a> {
    client: &'a AgeClient,
    schema: &'a GraphSchema,
}

impl<'a> GraphLoader<'a> {
    pub fn new(client: &'a AgeClient, schema: &'a GraphSchema) -> Self {
        Self { client, schema }
    }

    /// Loads vertices and edges atomically into the target graph.
    ///
    /// Caught failures come back as a `LoadResult` with `success: false`;
    /// only [`Error::Cancelled`] propagates as an `Err`.
    pub async fn load_graph_data(
        &self,
        data: &GraphData,
        options: &LoadOptions,
    ) -> Result<LoadResult, Error> {
        let started = Instant::now();
        let reporter = ProgressReporter::new(options.on_progress.clone(), started);
        let mut warnings = Vec::new();

        if let Err(e) = check_identifier(&options.graph_name, "graph name") {
            return Ok(failure_result(expand_error(e), warnings, started));
        }
        if options.batch_size == 0 {
            let err = Error::Config("batch_size must be at least 1".into());
            return Ok(failure_result(expand_error(err), warnings, started));
        }

        // Phase 1: validation, entirely client-side. Failures here mean
        // no transaction was ever started.
        let prepared = match self.validate_phase(data, options, &reporter, &mut warnings) {
            Ok(prepared) => prepared,
            Err(errors) => return Ok(failure_result(errors, warnings, started)),
        };

        check_cancelled(options)?;

        match self.execute_load(&prepared, options, &reporter).await {
            Ok((vertex_count, edge_count)) => Ok(LoadResult {
                success: true,
                vertex_count,
                edge_count,
                vertex_labels: prepared
                    .vertices
                    .iter()
                    .filter(|p| !p.rows.is_empty())
                    .map(|p| p.label.clone())
                    .collect(),
                edge_labels: prepared
                    .edges
                    .iter()
                    .filter(|p| !p.rows.is_empty())
                    .map(|p| p.label.clone())
                    .collect(),
                duration: started.elapsed(),
                errors: Vec::new(),
                warnings,
            }),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(err) => Ok(failure_result(expand_error(err), warnings, started)),
        }
    }

    /// Loads rows for a single vertex label.
    pub async fn load_vertices(
        &self,
        label: &str,
        rows: Vec<JsonValue>,
        options: &LoadOptions,
    ) -> Result<LoadResult, Error> {
        let data = GraphData::new().with_vertices(label, rows);
        self.load_graph_data(&data, options).await
    }

    /// Loads rows for a single edge label. Endpoint vertices are asserted
    /// to pre-exist in the graph, since no vertex rows accompany them.
    pub async fn load_edges(
        &self,
        label: &str,
        rows: Vec<JsonValue>,
        options: &LoadOptions,
    ) -> Result<LoadResult, Error> {
        let data = GraphData::new().with_edges(label, rows);
        let options = options.clone().assume_existing_vertices(true);
        self.load_graph_data(&data, &options).await
    }

    // ------------------------------------------------------------------
    // Phase 1: validation
    // ------------------------------------------------------------------

    fn validate_phase(
        &self,
        data: &GraphData,
        options: &LoadOptions,
        reporter: &ProgressReporter,
        warnings: &mut Vec<LoadWarning>,
    ) -> Result<Prepared, Vec<LoadError>> {
        let mut errors = Vec::new();

        for label in data.vertices.keys() {
            if self.schema.vertex(label).is_none() {
                errors.push(LoadError {
                    kind: ErrorKind::Config,
                    label: Some(label.clone()),
                    row_index: None,
                    message: format!("vertex label '{}' is not declared in the schema", label),
                });
            }
        }
        for label in data.edges.keys() {
            if self.schema.edge(label).is_none() {
                errors.push(LoadError {
                    kind: ErrorKind::Config,
                    label: Some(label.clone()),
                    row_index: None,
                    message: format!("edge label '{}' is not declared in the schema", label),
                });
            }
        }
        if !errors.is_empty() {
            return Err(errors);
        }

        let total_labels = (data.vertices.len() + data.edges.len()) as u64;
        let mut processed_labels = 0u64;

        let mut prepared = Prepared {
            vertices: Vec::new(),
            edges: Vec::new(),
            total_vertices: 0,
            total_edges: 0,
        };

        // Vertex labels first, then edge labels, both in schema order.
        for label in self.schema.vertex_labels() {
            let Some(rows) = data.vertices.get(label) else {
                continue;
            };
            let spec = self.schema.vertex(label).expect("label came from schema");

            let kept = if options.validate_before_load {
                let report = validate_vertex_rows(spec, rows);
                collect_rows(label, rows, report, options, warnings, &mut errors)
            } else {
                rows.clone()
            };

            processed_labels += 1;
            reporter.validation(processed_labels, total_labels, label);

            prepared.total_vertices += kept.len() as u64;
            prepared.vertices.push(PreparedVertices {
                label: label.to_string(),
                rows: kept,
            });
        }

        for label in self.schema.edge_labels() {
            let Some(rows) = data.edges.get(label) else {
                continue;
            };
            let spec = self.schema.edge(label).expect("label came from schema");

            let kept = if options.validate_before_load {
                let report = validate_edge_rows(spec, rows);
                collect_rows(label, rows, report, options, warnings, &mut errors)
            } else {
                rows.clone()
            };

            processed_labels += 1;
            reporter.validation(processed_labels, total_labels, label);

            prepared.total_edges += kept.len() as u64;
            prepared.edges.push(PreparedEdges {
                label: label.to_string(),
                from_vertex: spec.from_vertex.clone(),
                to_vertex: spec.to_vertex.clone(),
                rows: kept,
            });
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        if !options.assume_existing_vertices {
            let endpoint_errors = endpoint_precheck(&prepared);
            if !endpoint_errors.is_empty() {
                return Err(endpoint_errors);
            }
        }

        Ok(prepared)
    }

    // ------------------------------------------------------------------
    // Phases 2-5: transaction, storage, commit
    // ------------------------------------------------------------------

    async fn execute_load(
        &self,
        prepared: &Prepared,
        options: &LoadOptions,
        reporter: &ProgressReporter,
    ) -> Result<(u64, u64), Error> {
        let pool = self.client.pool();
        let mut conn = pool.acquire().await?;

        let result = if options.streaming_transactions {
            self.run_streaming(&mut conn, prepared, options, reporter).await
        } else {
            self.run_atomic(&mut conn, prepared, options, reporter).await
        };

        // A cancelled statement may still be aborting server-side; route
        // the session through recovery rather than back to the idle set.
        let outcome = match &result {
            Err(e) if matches!(e.kind(), ErrorKind::Connection | ErrorKind::Cancelled) => {
                ReleaseOutcome::Error
            }
            _ => ReleaseOutcome::Success,
        };
        pool.release(conn, outcome).await;

        result
    }

    async fn run_atomic(
        &self,
        conn: &mut AgeConnection,
        prepared: &Prepared,
        options: &LoadOptions,
        reporter: &ProgressReporter,
    ) -> Result<(u64, u64), Error> {
        let txn = conn.begin().await?;
        match self.run_phases(&txn, prepared, options, reporter).await {
            Ok(counts) => {
                txn.commit().await?;
                Ok(counts)
            }
            Err(err) => {
                if let Err(rollback_err) = txn.rollback().await {
                    tracing::warn!(
                        "rollback after load failure also failed: {}",
                        rollback_err
                    );
                }
                Err(err)
            }
        }
    }

    async fn run_phases(
        &self,
        exec: &AgeConnection,
        prepared: &Prepared,
        options: &LoadOptions,
        reporter: &ProgressReporter,
    ) -> Result<(u64, u64), Error> {
        let stmt_opts = statement_options(options);

        let mut stored_vertices = 0u64;
        for vertices in &prepared.vertices {
            for slice in vertices.rows.chunks(options.batch_size) {
                check_cancelled(options)?;
                let created = self
                    .store_vertex_slice(
                        exec,
                        options,
                        &vertices.label,
                        slice,
                        &stmt_opts,
                        reporter,
                        stored_vertices,
                        prepared.total_vertices,
                    )
                    .await?;
                stored_vertices += created;
                reporter.vertex_progress(
                    LoadPhase::Storing,
                    stored_vertices,
                    prepared.total_vertices,
                    &vertices.label,
                );
            }
        }

        let mut stored_edges = 0u64;
        for edges in &prepared.edges {
            for slice in edges.rows.chunks(options.batch_size) {
                check_cancelled(options)?;
                let created = self
                    .store_edge_slice(
                        exec,
                        options,
                        edges,
                        slice,
                        &stmt_opts,
                        reporter,
                        stored_edges,
                        prepared.total_edges,
                    )
                    .await?;
                stored_edges += created;
                reporter.edge_progress(
                    LoadPhase::Storing,
                    stored_edges,
                    prepared.total_edges,
                    &edges.label,
                );
            }
        }

        Ok((stored_vertices, stored_edges))
    }

    async fn run_streaming(
        &self,
        conn: &mut AgeConnection,
        prepared: &Prepared,
        options: &LoadOptions,
        reporter: &ProgressReporter,
    ) -> Result<(u64, u64), Error> {
        let stmt_opts = statement_options(options);

        let mut stored_vertices = 0u64;
        for vertices in &prepared.vertices {
            for slice in vertices.rows.chunks(options.batch_size) {
                check_cancelled(options)?;
                let txn = conn.begin().await?;
                match self
                    .store_vertex_slice(
                        &txn,
                        options,
                        &vertices.label,
                        slice,
                        &stmt_opts,
                        reporter,
                        stored_vertices,
                        prepared.total_vertices,
                    )
                    .await
                {
                    Ok(created) => {
                        txn.commit().await?;
                        stored_vertices += created;
                        reporter.vertex_progress(
                            LoadPhase::Storing,
                            stored_vertices,
                            prepared.total_vertices,
                            &vertices.label,
                        );
                    }
                    Err(err) => {
                        if let Err(rollback_err) = txn.rollback().await {
                            tracing::warn!("slice rollback failed: {}", rollback_err);
                        }
                        return Err(err);
                    }
                }
            }
        }

        let mut stored_edges = 0u64;
        for edges in &prepared.edges {
            for slice in edges.rows.chunks(options.batch_size) {
                check_cancelled(options)?;
                let txn = conn.begin().await?;
                match self
                    .store_edge_slice(
                        &txn,
                        options,
                        edges,
                        slice,
                        &stmt_opts,
                        reporter,
                        stored_edges,
                        prepared.total_edges,
                    )
                    .await
                {
                    Ok(created) => {
                        txn.commit().await?;
                        stored_edges += created;
                        reporter.edge_progress(
                            LoadPhase::Storing,
                            stored_edges,
                            prepared.total_edges,
                            &edges.label,
                        );
                    }
                    Err(err) => {
                        if let Err(rollback_err) = txn.rollback().await {
                            tracing::warn!("slice rollback failed: {}", rollback_err);
                        }
                        return Err(err);
                    }
                }
            }
        }

        Ok((stored_vertices, stored_edges))
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_vertex_slice(
        &self,
        exec: &AgeConnection,
        options: &LoadOptions,
        label: &str,
        slice: &[JsonValue],
        stmt_opts: &StatementOptions,
        reporter: &ProgressReporter,
        cumulative: u64,
        total: u64,
    ) -> Result<u64, Error> {
        let key = vertex_param_key(label);
        exec.set_param(&key, &JsonValue::Array(slice.to_vec())).await?;
        reporter.vertex_progress(
            LoadPhase::Staging,
            cumulative + slice.len() as u64,
            total,
            label,
        );

        let cypher = vertex_unwind_cypher(self.client.temp_schema(), label);
        let result = exec
            .execute_cypher_with_columns(
                &options.graph_name,
                &cypher,
                &[String::from("created")],
                &Params::new(),
                stmt_opts,
            )
            .await?;

        let created = created_count(&result, label)?;
        if created != slice.len() as u64 {
            return Err(Error::ParamStaging(format!(
                "staged {} row(s) under '{}' but the engine created {}",
                slice.len(),
                key,
                created
            )));
        }
        Ok(created)
    }

    #[allow(clippy::too_many_arguments)]
    async fn store_edge_slice(
        &self,
        exec: &AgeConnection,
        options: &LoadOptions,
        edges: &PreparedEdges,
        slice: &[JsonValue],
        stmt_opts: &StatementOptions,
        reporter: &ProgressReporter,
        cumulative: u64,
        total: u64,
    ) -> Result<u64, Error> {
        let key = edge_param_key(&edges.label);
        exec.set_param(&key, &JsonValue::Array(slice.to_vec())).await?;
        reporter.edge_progress(
            LoadPhase::Staging,
            cumulative + slice.len() as u64,
            total,
            &edges.label,
        );

        let cypher = edge_unwind_cypher(
            self.client.temp_schema(),
            &edges.label,
            &edges.from_vertex,
            &edges.to_vertex,
        );
        let result = exec
            .execute_cypher_with_columns(
                &options.graph_name,
                &cypher,
                &[String::from("created")],
                &Params::new(),
                stmt_opts,
            )
            .await?;

        let created = created_count(&result, &edges.label)?;
        let staged = slice.len() as u64;
        if created < staged {
            // Fewer edges than rows: at least one endpoint did not match
            let missing = self
                .find_missing_endpoints(exec, options, edges, stmt_opts)
                .await;
            return Err(Error::ReferentialIntegrity {
                label: edges.label.clone(),
                staged,
                created,
                missing,
            });
        }
        if created > staged {
            return Err(Error::ParamStaging(format!(
                "staged {} row(s) under '{}' but the engine created {}",
                staged, key, created
            )));
        }
        Ok(created)
    }

    /// Best-effort diagnosis of which endpoints were missing; the slice is
    /// still staged when this runs.
    async fn find_missing_endpoints(
        &self,
        exec: &AgeConnection,
        options: &LoadOptions,
        edges: &PreparedEdges,
        stmt_opts: &StatementOptions,
    ) -> Vec<String> {
        let cypher = missing_endpoints_cypher(
            self.client.temp_schema(),
            &edges.label,
            &edges.from_vertex,
            &edges.to_vertex,
        );
        match exec
            .execute_cypher_with_columns(
                &options.graph_name,
                &cypher,
                &[String::from("from_id"), String::from("to_id")],
                &Params::new(),
                stmt_opts,
            )
            .await
        {
            Ok(result) => result
                .rows
                .iter()
                .take(32)
                .map(|row| {
                    let from = row.get_raw("from_id").cloned().unwrap_or(JsonValue::Null);
                    let to = row.get_raw("to_id").cloned().unwrap_or(JsonValue::Null);
                    format!("{} -> {}", from, to)
                })
                .collect(),
            Err(err) => {
                tracing::debug!("missing-endpoint diagnosis failed: {}", err);
                Vec::new()
            }
        }
    }
}

// ----------------------------------------------------------------------
// Cypher statement builders (literal bodies; labels are schema-validated
// identifiers, never caller free text)
// ----------------------------------------------------------------------

fn vertex_unwind_cypher(temp_schema: &str, label: &str) -> String {
    format!(
        "UNWIND {ts}.get_vertices('{label}') AS row CREATE (v:{label}) SET v = row RETURN count(v) AS created",
        ts = temp_schema,
        label = label,
    )
}

fn edge_unwind_cypher(temp_schema: &str, label: &str, from_vertex: &str, to_vertex: &str) -> String {
    format!(
        "UNWIND {ts}.get_edges('{label}') AS r MATCH (a:{from} {{id: r.from}}), (b:{to} {{id: r.to}}) CREATE (a)-[e:{label}]->(b) SET e = r.properties RETURN count(e) AS created",
        ts = temp_schema,
        label = label,
        from = from_vertex,
        to = to_vertex,
    )
}

fn missing_endpoints_cypher(
    temp_schema: &str,
    label: &str,
    from_vertex: &str,
    to_vertex: &str,
) -> String {
    format!(
        "UNWIND {ts}.get_edges('{label}') AS r OPTIONAL MATCH (a:{from} {{id: r.from}}) OPTIONAL MATCH (b:{to} {{id: r.to}}) WITH r, a, b WHERE a IS NULL OR b IS NULL RETURN r.from AS from_id, r.to AS to_id",
        ts = temp_schema,
        label = label,
        from = from_vertex,
        to = to_vertex,
    )
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

fn statement_options(options: &LoadOptions) -> StatementOptions {
    StatementOptions {
        timeout: None,
        cancellation: options.cancellation.clone(),
    }
}

fn check_cancelled(options: &LoadOptions) -> Result<(), Error> {
    if let Some(token) = &options.cancellation {
        if token.is_cancelled() {
            return Err(Error::Cancelled);
        }
    }
    Ok(())
}

fn created_count(result: &CypherResult, label: &str) -> Result<u64, Error> {
    let row = result.rows.first().ok_or_else(|| {
        Error::ParamStaging(format!(
            "count query for label '{}' returned no rows",
            label
        ))
    })?;
    let created: i64 = row.get("created").map_err(|e| {
        Error::ParamStaging(format!(
            "count query for label '{}' returned an unreadable value: {}",
            label, e
        ))
    })?;
    Ok(created.max(0) as u64)
}

/// Applies a validation report to a label's rows: either record every
/// violation as an error, or drop offending rows with warnings.
fn collect_rows(
    label: &str,
    rows: &[JsonValue],
    report: crate::schema::ValidationReport,
    options: &LoadOptions,
    warnings: &mut Vec<LoadWarning>,
    errors: &mut Vec<LoadError>,
) -> Vec<JsonValue> {
    for warning in &report.warnings {
        warnings.push(LoadWarning {
            label: label.to_string(),
            row_index: Some(warning.row_index),
            message: warning.message.clone(),
        });
    }

    if report.is_clean() {
        return rows.to_vec();
    }

    if options.continue_on_validation_error {
        let offending = report.offending_rows();
        for violation in &report.errors {
            warnings.push(LoadWarning {
                label: label.to_string(),
                row_index: Some(violation.row_index),
                message: format!("row dropped: {}", violation.message),
            });
        }
        rows.iter()
            .enumerate()
            .filter(|(i, _)| !offending.contains(i))
            .map(|(_, row)| row.clone())
            .collect()
    } else {
        for violation in &report.errors {
            errors.push(LoadError {
                kind: ErrorKind::Validation,
                label: Some(label.to_string()),
                row_index: Some(violation.row_index),
                message: violation.message.clone(),
            });
        }
        Vec::new()
    }
}

/// Checks edge endpoints against the vertex ids present in this batch.
fn endpoint_precheck(prepared: &Prepared) -> Vec<LoadError> {
    let mut ids_by_label: HashMap<&str, HashSet<String>> = HashMap::new();
    for vertices in &prepared.vertices {
        let ids = ids_by_label.entry(vertices.label.as_str()).or_default();
        for row in &vertices.rows {
            if let Some(id) = row.get("id") {
                ids.insert(id.to_string());
            }
        }
    }

    let mut errors = Vec::new();
    for edges in &prepared.edges {
        for (row_index, row) in edges.rows.iter().enumerate() {
            for (field, endpoint_label) in
                [("from", &edges.from_vertex), ("to", &edges.to_vertex)]
            {
                let Some(id) = row.get(field) else {
                    continue; // already rejected by validation
                };
                let known = ids_by_label
                    .get(endpoint_label.as_str())
                    .map(|ids| ids.contains(&id.to_string()))
                    .unwrap_or(false);
                if !known {
                    errors.push(LoadError {
                        kind: ErrorKind::ReferentialIntegrity,
                        label: Some(edges.label.clone()),
                        row_index: Some(row_index),
                        message: format!(
                            "edge '{}' references {} vertex '{}' with id {} not present in this batch",
                            edges.label, field, endpoint_label, id
                        ),
                    });
                }
            }
        }
    }
    errors
}

fn expand_error(err: Error) -> Vec<LoadError> {
    match err {
        Error::Validation { label, violations } => violations
            .into_iter()
            .map(|v| LoadError {
                kind: ErrorKind::Validation,
                label: Some(label.clone()),
                row_index: Some(v.row_index),
                message: v.message,
            })
            .collect(),
        Error::ReferentialIntegrity {
            ref label,
            staged,
            created,
            ref missing,
        } => vec![LoadError {
            kind: ErrorKind::ReferentialIntegrity,
            label: Some(label.clone()),
            row_index: None,
            message: if missing.is_empty() {
                format!(
                    "staged {} edge row(s), engine matched {}",
                    staged, created
                )
            } else {
                format!(
                    "staged {} edge row(s), engine matched {}; missing endpoints: {}",
                    staged,
                    created,
                    missing.join(", ")
                )
            },
        }],
        other => vec![LoadError {
            kind: other.kind(),
            label: None,
            row_index: None,
            message: other.to_string(),
        }],
    }
}

fn failure_result(
    errors: Vec<LoadError>,
    warnings: Vec<LoadWarning>,
    started: Instant,
) -> LoadResult {
    LoadResult {
        success: false,
        vertex_count: 0,
        edge_count: 0,
        vertex_labels: Vec::new(),
        edge_labels: Vec::new(),
        duration: started.elapsed(),
        errors,
        warnings,
    }
}
