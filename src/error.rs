//! Error types with a stable kind taxonomy and SQLSTATE-based classification.

use thiserror::Error;

use crate::schema::Violation;

/// Coarse error categories exposed to callers for matching and reporting.
///
/// Every [`Error`] maps to exactly one kind via [`Error::kind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Invalid schema or client configuration. Never retryable.
    Config,
    /// Dial failure or a session terminated mid-flight.
    Connection,
    /// The pool could not serve an acquire within its timeout.
    AcquireTimeout,
    /// Syntax or runtime error from a relational statement.
    Statement,
    /// Statement error raised from inside the `cypher()` call.
    Cypher,
    /// A row violated the declared graph schema.
    Validation,
    /// An edge row referenced a vertex that does not exist.
    ReferentialIntegrity,
    /// Upsert into the staging table failed, or a staging function
    /// returned null where a value was required.
    ParamStaging,
    /// Commit/rollback failure, savepoint misuse, or use of a
    /// completed transaction.
    Transaction,
    /// Caller-driven abort.
    Cancelled,
    /// The pool has been shut down.
    Shutdown,
    /// Invariant breakage inside the library.
    Internal,
}

/// Classification of an engine error raised inside a Cypher body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CypherErrorClass {
    Syntax,
    Runtime,
}

/// Library error type.
///
/// Statement text carried in errors is truncated and parameter values are
/// never included; parameter keys may appear in context messages.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<tokio_postgres::Error>,
    },

    #[error("timed out acquiring a connection after {waited_ms} ms")]
    AcquireTimeout { waited_ms: u64 },

    #[error("statement failed: {message}")]
    Statement {
        message: String,
        /// Leading fragment of the statement, for diagnostics.
        statement: String,
        /// SQLSTATE code, when the server reported one.
        code: Option<String>,
    },

    #[error("cypher error on graph '{graph}': {message}")]
    Cypher {
        message: String,
        query: String,
        graph: String,
        class: CypherErrorClass,
        code: Option<String>,
    },

    #[error("validation failed for label '{label}': {} violation(s)", violations.len())]
    Validation {
        label: String,
        violations: Vec<Violation>,
    },

    #[error("referential integrity violation on edge label '{label}': staged {staged} row(s), engine matched {created}")]
    ReferentialIntegrity {
        label: String,
        staged: u64,
        created: u64,
        /// External ids of endpoints that could not be matched, when known.
        missing: Vec<String>,
    },

    #[error("parameter staging failed: {0}")]
    ParamStaging(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("connection pool is shut down")]
    Shutdown,

    #[error("{0}")]
    Internal(String),
}

/// SQLSTATE codes treated as transient: serialization failure, deadlock
/// victim, admin shutdown, and connection-class failures.
const TRANSIENT_SQLSTATES: &[&str] = &["40001", "40P01", "57P01", "08000", "08003", "08006"];

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_) => ErrorKind::Config,
            Error::Connection { .. } => ErrorKind::Connection,
            Error::AcquireTimeout { .. } => ErrorKind::AcquireTimeout,
            Error::Statement { .. } => ErrorKind::Statement,
            Error::Cypher { .. } => ErrorKind::Cypher,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::ReferentialIntegrity { .. } => ErrorKind::ReferentialIntegrity,
            Error::ParamStaging(_) => ErrorKind::ParamStaging,
            Error::Transaction(_) => ErrorKind::Transaction,
            Error::Cancelled => ErrorKind::Cancelled,
            Error::Shutdown => ErrorKind::Shutdown,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether the executor or pool may retry the failed operation.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Connection { .. } => true,
            Error::Statement { code: Some(c), .. } | Error::Cypher { code: Some(c), .. } => {
                TRANSIENT_SQLSTATES.contains(&c.as_str())
            }
            _ => false,
        }
    }

    /// Maps a driver error raised by an ordinary relational statement.
    pub(crate) fn from_sql(err: tokio_postgres::Error, statement: &str) -> Self {
        if let Some(db) = err.as_db_error() {
            let code = db.code().code().to_string();
            let message = format!("{}: {} [{}]", db.severity(), db.message(), code);
            if code.starts_with("08") || code == "57P01" {
                return Error::Connection {
                    message,
                    source: Some(err),
                };
            }
            return Error::Statement {
                message,
                statement: truncate_statement(statement),
                code: Some(code),
            };
        }
        if err.is_closed() {
            return Error::Connection {
                message: "connection closed".into(),
                source: Some(err),
            };
        }
        Error::Statement {
            message: err.to_string(),
            statement: truncate_statement(statement),
            code: None,
        }
    }

    /// Maps a driver error raised while executing a `cypher()` call.
    ///
    /// Syntax-class SQLSTATEs (class 42) are reported as Cypher syntax
    /// errors; everything else from the engine is a runtime error.
    pub(crate) fn from_cypher(err: tokio_postgres::Error, query: &str, graph: &str) -> Self {
        if let Some(db) = err.as_db_error() {
            let code = db.code().code().to_string();
            if code.starts_with("08") || code == "57P01" {
                return Error::Connection {
                    message: format!("{}: {} [{}]", db.severity(), db.message(), code),
                    source: Some(err),
                };
            }
            let class = if code.starts_with("42") {
                CypherErrorClass::Syntax
            } else {
                CypherErrorClass::Runtime
            };
            return Error::Cypher {
                message: format!("{}: {}", db.severity(), db.message()),
                query: truncate_statement(query),
                graph: graph.to_string(),
                class,
                code: Some(code),
            };
        }
        if err.is_closed() {
            return Error::Connection {
                message: "connection closed".into(),
                source: Some(err),
            };
        }
        Error::Cypher {
            message: err.to_string(),
            query: truncate_statement(query),
            graph: graph.to_string(),
            class: CypherErrorClass::Runtime,
            code: None,
        }
    }
}

/// Keeps error payloads bounded; statements can embed large literal bodies.
fn truncate_statement(statement: &str) -> String {
    const MAX: usize = 512;
    if statement.len() <= MAX {
        statement.to_string()
    } else {
        let mut end = MAX;
        while !statement.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &statement[..end])
    }
}
