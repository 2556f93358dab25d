//! Client facade: pool ownership, graph management, statement surface.

use std::sync::Arc;

use once_cell::sync::OnceCell;
use tokio_postgres::types::ToSql;

use crate::config::ClientConfig;
use crate::error::{Error, ErrorKind};
use crate::executor::{CypherResult, SqlResult, StatementOptions};
use crate::loader::{GraphData, GraphLoader, LoadOptions, LoadResult};
use crate::pool::{AgePool, LifecycleHooks, NoopHooks, PoolStats, ReleaseOutcome};
use crate::query::{BuiltQuery, QueryBuilder};
use crate::row::Params;
use crate::schema::GraphSchema;
use crate::staging::check_identifier;

/// Schema-aware client for PostgreSQL + Apache AGE.
///
/// Owns a connection pool whose sessions are guaranteed to have the
/// extension loaded and the staging objects in place. The methods here
/// borrow a connection per call; acquire one explicitly (or use
/// [`AgePool::with_connection`]) to run several statements on one
/// session, since staged parameters are connection-scoped.
pub struct AgeClient {
    pool: AgePool,
    config: ClientConfig,
}

impl AgeClient {
    /// Connects with the empty hook set.
    pub async fn connect(config: ClientConfig) -> Result<Self, Error> {
        Self::connect_with_hooks(config, Arc::new(NoopHooks)).await
    }

    /// Connects with application lifecycle hooks. Pre-dials
    /// `pool.min_idle` sessions when configured.
    pub async fn connect_with_hooks(
        config: ClientConfig,
        hooks: Arc<dyn LifecycleHooks>,
    ) -> Result<Self, Error> {
        let pool = AgePool::new(&config, hooks)?;
        if config.pool.min_idle > 0 {
            pool.warm_up(config.pool.min_idle).await?;
        }
        Ok(Self { pool, config })
    }

    pub fn pool(&self) -> &AgePool {
        &self.pool
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Schema housing the staging functions.
    pub fn temp_schema(&self) -> &str {
        &self.config.temp_schema
    }

    pub fn stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Terminal shutdown of the pool.
    pub fn close(&self) {
        self.pool.close();
    }

    // ------------------------------------------------------------------
    // Graph management
    // ------------------------------------------------------------------

    /// Whether a graph with this name exists in the engine catalog.
    pub async fn graph_exists(&self, name: &str) -> Result<bool, Error> {
        check_identifier(name, "graph name")?;
        let conn = self.pool.acquire().await?;
        let result = conn
            .raw_sql(
                "SELECT 1 FROM ag_catalog.ag_graph WHERE name = $1::name",
                &[&name],
            )
            .await;
        self.pool.release(conn, release_outcome(&result)).await;
        Ok(!result?.is_empty())
    }

    /// Creates the graph if it does not exist. Idempotent.
    pub async fn create_graph(&self, name: &str) -> Result<(), Error> {
        check_identifier(name, "graph name")?;
        let sql = ensure_graph_sql(name);
        let conn = self.pool.acquire().await?;
        let result = conn.raw_sql(&sql, &[]).await;
        self.pool.release(conn, release_outcome(&result)).await;
        result?;
        tracing::info!(graph = name, "graph ensured");
        Ok(())
    }

    /// Drops the graph if it exists. `cascade` removes its labels and
    /// data as well.
    pub async fn drop_graph(&self, name: &str, cascade: bool) -> Result<(), Error> {
        check_identifier(name, "graph name")?;
        let sql = drop_graph_sql(name, cascade);
        let conn = self.pool.acquire().await?;
        let result = conn.raw_sql(&sql, &[]).await;
        self.pool.release(conn, release_outcome(&result)).await;
        result?;
        tracing::info!(graph = name, "graph dropped");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Statement surface (borrow-per-call)
    // ------------------------------------------------------------------

    /// Runs one relational statement on a borrowed connection.
    pub async fn execute_sql(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
        opts: &StatementOptions,
    ) -> Result<SqlResult, Error> {
        let conn = self.pool.acquire().await?;
        let result = conn.execute_sql(sql, params, opts).await;
        self.pool.release(conn, release_outcome(&result)).await;
        result
    }

    /// Runs one Cypher statement on a borrowed connection, staging
    /// `params` on that same connection first.
    pub async fn execute_cypher(
        &self,
        graph: &str,
        cypher: &str,
        params: &Params,
        opts: &StatementOptions,
    ) -> Result<CypherResult, Error> {
        let conn = self.pool.acquire().await?;
        let result = conn.execute_cypher(graph, cypher, params, opts).await;
        self.pool.release(conn, release_outcome(&result)).await;
        result
    }

    /// Runs a built query from the fluent builder.
    pub async fn execute(
        &self,
        query: &BuiltQuery,
        opts: &StatementOptions,
    ) -> Result<CypherResult, Error> {
        let conn = self.pool.acquire().await?;
        let result = conn.execute_built(query, opts).await;
        self.pool.release(conn, release_outcome(&result)).await;
        result
    }

    /// Streams a Cypher result, holding a pooled connection for the
    /// stream's lifetime. The connection returns to the pool when the
    /// stream is dropped; its staging table is reset before reuse.
    pub async fn stream_cypher(
        &self,
        graph: &str,
        cypher: &str,
        params: &Params,
    ) -> Result<crate::row::RowStream<'static>, Error> {
        use async_stream::try_stream;
        use futures::TryStreamExt;

        let conn = self.pool.acquire().await?;
        let graph = graph.to_string();
        let cypher = cypher.to_string();
        let params = params.clone();

        Ok(Box::pin(try_stream! {
            // conn is captured by the generator and kept alive for the
            // stream's lifetime
            let inner = conn.stream_cypher(&graph, &cypher, &params).await?;
            futures::pin_mut!(inner);
            while let Some(row) = inner.try_next().await? {
                yield row;
            }
        }))
    }

    /// Starts a fluent query against `graph`.
    pub fn query(&self, graph: &str) -> QueryBuilder {
        QueryBuilder::new(graph, self.temp_schema())
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Batch loader bound to this client and `schema`.
    pub fn loader<'a>(&'a self, schema: &'a GraphSchema) -> GraphLoader<'a> {
        GraphLoader::new(self, schema)
    }

    /// Convenience: one-shot batch load.
    pub async fn load_graph_data(
        &self,
        schema: &GraphSchema,
        data: &GraphData,
        options: &LoadOptions,
    ) -> Result<LoadResult, Error> {
        self.loader(schema).load_graph_data(data, options).await
    }
}

impl std::fmt::Debug for AgeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgeClient")
            .field("database", &self.config.database)
            .field("temp_schema", &self.config.temp_schema)
            .field("pool", &self.pool)
            .finish()
    }
}

fn release_outcome<T>(result: &Result<T, Error>) -> ReleaseOutcome {
    match result {
        Err(e) if matches!(e.kind(), ErrorKind::Connection) => ReleaseOutcome::Error,
        _ => ReleaseOutcome::Success,
    }
}

/// The engine has no `IF NOT EXISTS` for `create_graph`; check the
/// catalog inside one DO block. The name is a validated identifier.
fn ensure_graph_sql(name: &str) -> String {
    format!(
        r#"
DO $$
BEGIN
    IF NOT EXISTS (
        SELECT 1 FROM ag_catalog.ag_graph WHERE name = '{name}'
    ) THEN
        PERFORM ag_catalog.create_graph('{name}');
    END IF;
END $$;
"#,
        name = name
    )
}

fn drop_graph_sql(name: &str, cascade: bool) -> String {
    format!(
        r#"
DO $$
BEGIN
    IF EXISTS (
        SELECT 1 FROM ag_catalog.ag_graph WHERE name = '{name}'
    ) THEN
        PERFORM ag_catalog.drop_graph('{name}', {cascade});
    END IF;
END $$;
"#,
        name = name,
        cascade = cascade
    )
}

// ----------------------------------------------------------------------
// Optional process-wide default client
// ----------------------------------------------------------------------

static DEFAULT_CLIENT: OnceCell<AgeClient> = OnceCell::new();

/// Installs a process-wide default client. A convenience layered on top
/// of [`AgeClient`]; nothing in the crate requires it, and tests should
/// construct isolated clients instead.
///
/// Returns the client back if a default is already installed.
pub fn init_default(client: AgeClient) -> Result<(), AgeClient> {
    DEFAULT_CLIENT.set(client)
}

/// The installed default client, if any.
pub fn default_client() -> Option<&'static AgeClient> {
    DEFAULT_CLIENT.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ensure_graph_sql_checks_catalog_first() {
        let sql = ensure_graph_sql("my_graph");
        let check = sql
            .find("ag_catalog.ag_graph WHERE name = 'my_graph'")
            .unwrap();
        let create = sql.find("ag_catalog.create_graph('my_graph')").unwrap();
        assert!(check < create);
    }

    #[test]
    fn test_drop_graph_sql_cascade_flag() {
        assert!(drop_graph_sql("g", true).contains("drop_graph('g', true)"));
        assert!(drop_graph_sql("g", false).contains("drop_graph('g', false)"));
    }
}
