//! agekit - Schema-aware client for PostgreSQL + Apache AGE
//!
//! The engine's `cypher()` function accepts dynamic data only as part of
//! its literal body string; ordinary bind parameters do not reach the
//! body. This crate works around that safely: caller values are staged
//! in a per-connection table and read back inside Cypher through
//! server-side `agtype` functions, so no user data is ever interpolated
//! into statement text.
//!
//! On top of the staging protocol sit a lifecycle-aware connection pool,
//! a schema model with row validation, transactions with savepoints, a
//! transactional batch loader with progress reporting, and a fluent
//! query builder.

pub mod config;
pub mod cypher;
pub mod error;
pub mod executor;
pub mod graph;
pub mod loader;
pub mod pool;
pub mod query;
pub mod row;
pub mod schema;
pub mod staging;
pub mod txn;

// Re-export the surface most callers need
pub use config::{ClientConfig, PoolConfig, RetryConfig};
pub use error::{Error, ErrorKind};
pub use executor::{CypherResult, SqlResult, StatementOptions};
pub use graph::{default_client, init_default, AgeClient};
pub use loader::{
    GraphData, GraphLoader, LoadError, LoadOptions, LoadPhase, LoadResult, LoadWarning,
    ProgressCallback, ProgressEvent,
};
pub use pool::{
    AgeConnection, AgePool, AgeSession, ConnectionState, LifecycleHooks, NoopHooks, PoolStats,
    ReleaseOutcome,
};
pub use query::{BuiltQuery, QueryBuilder};
pub use row::{Edge, Params, Row, RowStream, Vertex};
pub use schema::{
    GraphSchema, PropertyDef, PropertyKind, ValidationReport, Violation, ViolationCode,
};
pub use txn::AgeTransaction;
